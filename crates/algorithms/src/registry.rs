//! Algorithm registry for lookup and discovery.

use crate::algorithm::{Algorithm, DynAlgorithm};
use kernelharness_backend_cpu::HostKernelRegistry;
use std::sync::Arc;
use tracing::debug;

#[derive(Default, Clone)]
pub struct AlgorithmRegistry {
    algorithms: Vec<DynAlgorithm>,
}

impl AlgorithmRegistry {
    pub fn new() -> Self {
        Self {
            algorithms: Vec::new(),
        }
    }

    pub fn with_default_algorithms() -> Self {
        let mut registry = Self::new();
        registry.register(crate::dilate::Dilate3x3);
        registry.register(crate::gaussian::Gaussian5x5);
        registry
    }

    /// Later registrations with an existing id replace the earlier one.
    pub fn register<A>(&mut self, algorithm: A)
    where
        A: Algorithm + 'static,
    {
        let algorithm: DynAlgorithm = Arc::new(algorithm);
        let id = algorithm.id();
        match self.algorithms.iter_mut().find(|a| a.id() == id) {
            Some(slot) => {
                debug!(algorithm = id, "replacing registered algorithm");
                *slot = algorithm;
            }
            None => {
                debug!(algorithm = id, "registered algorithm");
                self.algorithms.push(algorithm);
            }
        }
    }

    pub fn algorithms(&self) -> &[DynAlgorithm] {
        &self.algorithms
    }

    pub fn find(&self, id: &str) -> Option<DynAlgorithm> {
        self.algorithms
            .iter()
            .find(|algorithm| algorithm.id() == id)
            .map(Arc::clone)
    }

    /// Every host kernel provided by the registered algorithms.
    pub fn host_kernels(&self) -> HostKernelRegistry {
        let mut kernels = HostKernelRegistry::new();
        for kernel in self.algorithms.iter().flat_map(|algorithm| algorithm.host_kernels()) {
            kernels.register_shared(kernel);
        }
        kernels
    }
}
