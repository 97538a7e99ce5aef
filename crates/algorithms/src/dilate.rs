//! 3x3 grayscale dilation.

use crate::algorithm::Algorithm;
use crate::image::{clamped, clamped_flat};
use anyhow::{ensure, Context, Result};
use kernelharness_args::ExecutionParameters;
use kernelharness_backend_cpu::{DynHostKernel, HostInvocation, HostKernel};
use ndarray::{Array2, ArrayView2};
use std::sync::Arc;

/// Maximum over the clamped 3x3 neighbourhood.
pub fn dilate3x3(input: ArrayView2<'_, u8>) -> Array2<u8> {
    Array2::from_shape_fn(input.dim(), |(y, x)| {
        let (y, x) = (y as isize, x as isize);
        let mut max = 0u8;
        for dy in -1..=1 {
            for dx in -1..=1 {
                max = max.max(clamped(&input, y + dy, x + dx));
            }
        }
        max
    })
}

pub(crate) fn ensure_same_shape(input: &ArrayView2<'_, u8>, params: &ExecutionParameters) -> Result<()> {
    let (height, width) = input.dim();
    let builtins = &params.builtins;
    ensure!(
        builtins.dst_width as usize == width && builtins.dst_height as usize == height,
        "output {}x{} must match input {width}x{height}",
        builtins.dst_width,
        builtins.dst_height
    );
    Ok(())
}

#[derive(Debug, Default)]
pub struct Dilate3x3;

impl Algorithm for Dilate3x3 {
    fn id(&self) -> &'static str {
        "dilate3x3"
    }

    fn name(&self) -> &'static str {
        "Dilate 3x3"
    }

    fn reference(&self, input: ArrayView2<'_, u8>, params: &ExecutionParameters) -> Result<Array2<u8>> {
        ensure_same_shape(&input, params)?;
        Ok(dilate3x3(input))
    }

    fn host_kernels(&self) -> Vec<DynHostKernel> {
        vec![Arc::new(Dilate3x3Host)]
    }
}

/// Host kernel `dilate3x3(input, output, int width, int height)`.
///
/// Walks the global work range like a device would, one output pixel per
/// work item, skipping items outside the image.
#[derive(Debug, Default)]
pub struct Dilate3x3Host;

impl HostKernel for Dilate3x3Host {
    fn name(&self) -> &str {
        "dilate3x3"
    }

    fn execute(&self, invocation: &mut HostInvocation<'_>) -> Result<()> {
        let width = usize::try_from(invocation.int(2)?).context("negative width")?;
        let height = usize::try_from(invocation.int(3)?).context("negative height")?;
        let [global_x, global_y, _] = invocation.work().global();
        let pixels = width * height;

        let input = invocation.buffer(0)?.get(..pixels).map(<[u8]>::to_vec);
        let input = input.with_context(|| format!("input buffer smaller than {width}x{height}"))?;
        let output = invocation.buffer_mut(1)?;
        ensure!(output.len() >= pixels, "output buffer smaller than {width}x{height}");

        for gy in 0..(global_y as usize).min(height) {
            for gx in 0..(global_x as usize).min(width) {
                let (y, x) = (gy as isize, gx as isize);
                let mut max = 0u8;
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        max = max.max(clamped_flat(&input, width, height, y + dy, x + dx));
                    }
                }
                output[gy * width + gx] = max;
            }
        }
        Ok(())
    }
}
