//! 5x5 Gaussian blur with binomial weights.

use crate::algorithm::{Algorithm, Tolerance};
use crate::dilate::ensure_same_shape;
use crate::image::{clamped, clamped_flat};
use anyhow::{ensure, Context, Result};
use kernelharness_args::ExecutionParameters;
use kernelharness_backend_cpu::{DynHostKernel, HostInvocation, HostKernel};
use ndarray::{Array2, ArrayView2};
use std::sync::Arc;

/// One row of the separable kernel; the 2D weights are its outer product.
pub const BINOMIAL_5: [u32; 5] = [1, 4, 6, 4, 1];
pub const WEIGHT_SUM: u32 = 256;

/// Weight of tap `(dy, dx)`, both in `0..5`.
#[inline]
pub fn weight(dy: usize, dx: usize) -> u32 {
    BINOMIAL_5[dy] * BINOMIAL_5[dx]
}

pub fn gaussian5x5(input: ArrayView2<'_, u8>) -> Array2<u8> {
    Array2::from_shape_fn(input.dim(), |(y, x)| {
        let mut sum = 0u32;
        for dy in 0..5 {
            for dx in 0..5 {
                let sample = clamped(&input, y as isize + dy as isize - 2, x as isize + dx as isize - 2);
                sum += weight(dy, dx) * u32::from(sample);
            }
        }
        (sum as f32 / WEIGHT_SUM as f32 + 0.5) as u8
    })
}

#[derive(Debug, Default)]
pub struct Gaussian5x5;

impl Algorithm for Gaussian5x5 {
    fn id(&self) -> &'static str {
        "gaussian5x5"
    }

    fn name(&self) -> &'static str {
        "Gaussian blur 5x5"
    }

    fn reference(&self, input: ArrayView2<'_, u8>, params: &ExecutionParameters) -> Result<Array2<u8>> {
        ensure_same_shape(&input, params)?;
        Ok(gaussian5x5(input))
    }

    /// Device float paths may round differently at exact halves.
    fn default_tolerance(&self) -> Tolerance {
        Tolerance::new(1.0, 0.001)
    }

    fn host_kernels(&self) -> Vec<DynHostKernel> {
        vec![Arc::new(Gaussian5x5Host)]
    }
}

/// Host kernel `gaussian5x5(input, output, struct { int width; int height; })`.
#[derive(Debug, Default)]
pub struct Gaussian5x5Host;

impl HostKernel for Gaussian5x5Host {
    fn name(&self) -> &str {
        "gaussian5x5"
    }

    fn execute(&self, invocation: &mut HostInvocation<'_>) -> Result<()> {
        let (width, height) = {
            let mut dims = invocation.packed(2)?;
            let width = usize::try_from(dims.i32()?).context("negative width")?;
            let height = usize::try_from(dims.i32()?).context("negative height")?;
            (width, height)
        };
        let [global_x, global_y, _] = invocation.work().global();
        let pixels = width * height;

        let input = invocation
            .buffer(0)?
            .get(..pixels)
            .map(<[u8]>::to_vec)
            .with_context(|| format!("input buffer smaller than {width}x{height}"))?;
        let output = invocation.buffer_mut(1)?;
        ensure!(output.len() >= pixels, "output buffer smaller than {width}x{height}");

        for gy in 0..(global_y as usize).min(height) {
            for gx in 0..(global_x as usize).min(width) {
                let mut sum = 0u32;
                for dy in 0..5 {
                    for dx in 0..5 {
                        let y = gy as isize + dy as isize - 2;
                        let x = gx as isize + dx as isize - 2;
                        sum += weight(dy, dx) * u32::from(clamped_flat(&input, width, height, y, x));
                    }
                }
                output[gy * width + gx] = ((sum + WEIGHT_SUM / 2) / WEIGHT_SUM) as u8;
            }
        }
        Ok(())
    }
}
