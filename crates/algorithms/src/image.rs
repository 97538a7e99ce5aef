//! Image buffers and helpers shared by the algorithms.

use anyhow::{bail, ensure, Result};
use ndarray::{Array2, ArrayView2};

/// Seed of the synthetic input used when a configuration names no file.
pub const SYNTHETIC_SEED: u64 = 0x6b68_5f69_6d67;

/// Build a `(height, width)` image from rows of `stride` bytes.
pub fn image_from_bytes(bytes: &[u8], width: usize, height: usize, stride: usize) -> Result<Array2<u8>> {
    ensure!(stride >= width, "row stride {stride} is narrower than width {width}");
    let needed = match height {
        0 => 0,
        h => (h - 1) * stride + width,
    };
    if bytes.len() < needed {
        bail!(
            "image {width}x{height} (stride {stride}) needs {needed} bytes, got {}",
            bytes.len()
        );
    }
    Ok(Array2::from_shape_fn((height, width), |(y, x)| bytes[y * stride + x]))
}

/// Tightly packed row-major bytes of `image`.
pub fn image_to_bytes(image: &ArrayView2<'_, u8>) -> Vec<u8> {
    image.iter().copied().collect()
}

/// Rows of `stride` bytes, padding filled with zero.
pub fn image_to_strided_bytes(image: &ArrayView2<'_, u8>, stride: usize) -> Vec<u8> {
    let (height, width) = image.dim();
    let stride = stride.max(width);
    let mut out = vec![0u8; height * stride];
    for (y, row) in image.rows().into_iter().enumerate() {
        for (x, &value) in row.iter().enumerate() {
            out[y * stride + x] = value;
        }
    }
    out
}

/// Deterministic pseudo-random image.
pub fn synthetic_image(width: usize, height: usize, seed: u64) -> Array2<u8> {
    let mut rng = fastrand::Rng::with_seed(seed);
    Array2::from_shape_simple_fn((height, width), || rng.u8(..))
}

/// Sample with coordinates clamped to the image border.
#[inline]
pub fn clamped(image: &ArrayView2<'_, u8>, y: isize, x: isize) -> u8 {
    let (height, width) = image.dim();
    let y = y.clamp(0, height as isize - 1) as usize;
    let x = x.clamp(0, width as isize - 1) as usize;
    image[[y, x]]
}

/// Same as [`clamped`] for a tightly packed byte slice.
#[inline]
pub(crate) fn clamped_flat(data: &[u8], width: usize, height: usize, y: isize, x: isize) -> u8 {
    let y = y.clamp(0, height as isize - 1) as usize;
    let x = x.clamp(0, width as isize - 1) as usize;
    data[y * width + x]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn strided_rows_drop_padding() {
        let bytes = [1, 2, 0xee, 3, 4, 0xee];
        let image = image_from_bytes(&bytes, 2, 2, 3).unwrap();
        assert_eq!(image, array![[1, 2], [3, 4]]);
        assert_eq!(image_to_bytes(&image.view()), vec![1, 2, 3, 4]);
        assert_eq!(image_to_strided_bytes(&image.view(), 3), vec![1, 2, 0, 3, 4, 0]);
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(image_from_bytes(&[0; 5], 2, 3, 2).is_err());
        assert!(image_from_bytes(&[0; 6], 3, 1, 2).is_err());
        assert!(image_from_bytes(&[0; 5], 2, 3, 3).unwrap_err().to_string().contains("needs 8"));
    }

    #[test]
    fn synthetic_input_is_deterministic() {
        let a = synthetic_image(8, 4, SYNTHETIC_SEED);
        let b = synthetic_image(8, 4, SYNTHETIC_SEED);
        assert_eq!(a, b);
        assert_eq!(a.dim(), (4, 8));
        assert_ne!(a, synthetic_image(8, 4, SYNTHETIC_SEED + 1));
    }

    #[test]
    fn clamping_repeats_the_border() {
        let image = array![[1u8, 2], [3, 4]];
        let view = image.view();
        assert_eq!(clamped(&view, -1, -1), 1);
        assert_eq!(clamped(&view, 5, 0), 3);
        assert_eq!(clamped(&view, 0, 9), 2);
        assert_eq!(clamped_flat(&[1, 2, 3, 4], 2, 2, 2, 2), 4);
    }
}
