//! Dispatch planning against device limits.

use kernelharness_runtime::{BackendError, WorkDims};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuDispatchPlan {
    pub workgroups: [u32; 3],
}

#[derive(Debug, Clone, Copy)]
pub struct GpuPlanner {
    max_workgroups_per_dimension: u32,
}

impl GpuPlanner {
    pub fn new(limits: &wgpu::Limits) -> Self {
        Self::with_max_workgroups(limits.max_compute_workgroups_per_dimension)
    }

    pub fn with_max_workgroups(max_workgroups_per_dimension: u32) -> Self {
        Self {
            max_workgroups_per_dimension,
        }
    }

    /// Workgroup counts for `work`. The local size must match the kernel's
    /// `@workgroup_size`.
    pub fn plan(&self, work: &WorkDims) -> Result<GpuDispatchPlan, BackendError> {
        let workgroups = work.workgroup_counts();
        if let Some(dim) = workgroups
            .iter()
            .position(|count| *count > self.max_workgroups_per_dimension)
        {
            return Err(BackendError::WorkSize(format!(
                "{} workgroups in dimension {dim} exceed the device limit of {}",
                workgroups[dim], self.max_workgroups_per_dimension
            )));
        }
        Ok(GpuDispatchPlan { workgroups })
    }
}

impl Default for GpuPlanner {
    fn default() -> Self {
        Self::new(&wgpu::Limits::default())
    }
}
