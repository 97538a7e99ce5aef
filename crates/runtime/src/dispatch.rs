//! Work sizes and dispatch paths.

use crate::error::BackendError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which host-side dispatch path a kernel variant uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPath {
    #[default]
    Standard,
    /// Vendor extension path.
    #[serde(alias = "cl_extension")]
    Extension,
}

impl DispatchPath {
    /// Value of the `HOST_TYPE` define passed to the kernel build.
    pub fn host_type(self) -> i32 {
        match self {
            DispatchPath::Standard => 0,
            DispatchPath::Extension => 1,
        }
    }
}

impl fmt::Display for DispatchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchPath::Standard => f.write_str("standard"),
            DispatchPath::Extension => f.write_str("extension"),
        }
    }
}

/// Global and local work sizes for up to three dimensions.
///
/// Unused dimensions are 1. A local size of all zeros lets the backend pick;
/// backends here treat it as 1 per dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkDims {
    dims: u32,
    global: [u32; 3],
    local: [u32; 3],
}

impl WorkDims {
    pub fn new(work_dim: u32, global: &[usize], local: &[usize]) -> Result<Self, BackendError> {
        if !(1..=3).contains(&work_dim) {
            return Err(BackendError::WorkSize(format!(
                "work_dim must be 1, 2 or 3 (got {work_dim})"
            )));
        }
        let active = work_dim as usize;
        if global.len() < active {
            return Err(BackendError::WorkSize(format!(
                "{active} global sizes required, {} given",
                global.len()
            )));
        }

        let mut global_sizes = [1u32; 3];
        for (dim, size) in global.iter().take(active).enumerate() {
            if *size == 0 {
                return Err(BackendError::WorkSize(format!("global size {dim} is zero")));
            }
            global_sizes[dim] = to_u32(*size, "global", dim)?;
        }

        let mut local_sizes = [1u32; 3];
        let explicit_local = local.iter().take(active).any(|size| *size != 0);
        if explicit_local {
            if local.len() < active {
                return Err(BackendError::WorkSize(format!(
                    "{active} local sizes required, {} given",
                    local.len()
                )));
            }
            for (dim, size) in local.iter().take(active).enumerate() {
                if *size == 0 {
                    return Err(BackendError::WorkSize(format!(
                        "local size {dim} is zero while others are set"
                    )));
                }
                local_sizes[dim] = to_u32(*size, "local", dim)?;
            }
        }

        Ok(Self {
            dims: work_dim,
            global: global_sizes,
            local: local_sizes,
        })
    }

    pub fn one_dimensional(items: usize) -> Result<Self, BackendError> {
        Self::new(1, &[items], &[])
    }

    pub fn dims(&self) -> u32 {
        self.dims
    }

    pub fn global(&self) -> [u32; 3] {
        self.global
    }

    pub fn local(&self) -> [u32; 3] {
        self.local
    }

    /// `ceil(global / local)` per dimension.
    pub fn workgroup_counts(&self) -> [u32; 3] {
        [0, 1, 2].map(|dim| self.global[dim].div_ceil(self.local[dim]))
    }

    pub fn total_invocations(&self) -> u64 {
        self.global.iter().map(|size| u64::from(*size)).product()
    }
}

fn to_u32(size: usize, which: &str, dim: usize) -> Result<u32, BackendError> {
    u32::try_from(size)
        .map_err(|_| BackendError::WorkSize(format!("{which} size {dim} ({size}) exceeds u32")))
}
