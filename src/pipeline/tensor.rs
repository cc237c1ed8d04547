use std::{
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::{Frame, Point};

/// Counts per-tick frame snapshots handed out and released.
#[derive(Clone, Debug, Default)]
pub struct ResourceLedger {
    inner: Arc<LedgerCounts>,
}

#[derive(Debug, Default)]
struct LedgerCounts {
    allocated: AtomicU64,
    released: AtomicU64,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocated(&self) -> u64 {
        self.inner.allocated.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.inner.released.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> u64 {
        self.allocated().saturating_sub(self.released())
    }
}

/// The mirrored snapshot of one tick. Released exactly once, on
/// [`FrameTensor::dispose`] or on drop, whichever comes first.
#[derive(Debug)]
pub struct FrameTensor {
    frame: Frame,
    ledger: ResourceLedger,
    released: bool,
}

impl FrameTensor {
    pub fn new(frame: Frame, ledger: &ResourceLedger) -> Self {
        ledger.inner.allocated.fetch_add(1, Ordering::SeqCst);
        Self {
            frame,
            ledger: ledger.clone(),
            released: false,
        }
    }

    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.ledger.inner.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Deref for FrameTensor {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        &self.frame
    }
}

impl Drop for FrameTensor {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Clone, Copy, Debug)]
pub enum PixelRange {
    /// `[0, 1]`
    Unit,
    /// `[-1, 1]`
    Signed,
}

impl PixelRange {
    fn map(self, value: u8) -> f32 {
        match self {
            PixelRange::Unit => value as f32 / 255.0,
            PixelRange::Signed => value as f32 / 127.5 - 1.0,
        }
    }
}

fn check_frame(frame: &Frame) -> Result<()> {
    let expected_len = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(4);
    if frame.width == 0 || frame.height == 0 || frame.rgba.len() != expected_len {
        return Err(anyhow!(
            "frame buffer size mismatch: got {} bytes for {}x{}",
            frame.rgba.len(),
            frame.width,
            frame.height
        ));
    }
    Ok(())
}

/// Stretches `frame` to `target_w`x`target_h` and returns an NHWC tensor.
pub fn resize_to_tensor(
    frame: &Frame,
    target_w: u32,
    target_h: u32,
    range: PixelRange,
) -> Result<Array4<f32>> {
    check_frame(frame)?;
    let resized = resize_rgba(&frame.rgba, frame.width, frame.height, target_w, target_h)?;
    rgba_to_tensor(&resized, target_w, target_h, range)
}

pub fn resize_rgba(
    rgba: &[u8],
    width: u32,
    height: u32,
    target_w: u32,
    target_h: u32,
) -> Result<Vec<u8>> {
    if width == target_w && height == target_h {
        return Ok(rgba.to_vec());
    }
    let src_image = fir::images::Image::from_vec_u8(width, height, rgba.to_vec(), fir::PixelType::U8x4)?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    Ok(dst_image.into_vec())
}

fn rgba_to_tensor(rgba: &[u8], width: u32, height: u32, range: PixelRange) -> Result<Array4<f32>> {
    let normalized: Vec<f32> = rgba
        .par_chunks_exact(4)
        .flat_map_iter(|px| [range.map(px[0]), range.map(px[1]), range.map(px[2])])
        .collect();
    Array4::<f32>::from_shape_vec((1, height as usize, width as usize, 3), normalized)
        .map_err(|err| anyhow!("failed to build input tensor: {err}"))
}

/// Maps crop-space coordinates back into the source frame.
#[derive(Clone, Debug)]
pub struct CropTransform {
    pub center: Point,
    pub side: f32,
    pub angle: f32,
    pub output_size: u32,
}

impl CropTransform {
    pub fn project(&self, x: f32, y: f32) -> Point {
        let half = self.output_size as f32 / 2.0;
        let scale = self.side / self.output_size as f32;
        let dx = (x - half) * scale;
        let dy = (y - half) * scale;
        let (sin, cos) = self.angle.sin_cos();
        Point::new(
            self.center.x + dx * cos - dy * sin,
            self.center.y + dx * sin + dy * cos,
        )
    }
}

/// Samples a square of `side` pixels around `center`, rotated by `angle`,
/// into an `output_size`x`output_size` NHWC tensor.
pub fn prepare_rotated_crop(
    frame: &Frame,
    center: Point,
    side: f32,
    angle: f32,
    output_size: u32,
    range: PixelRange,
) -> Result<(Array4<f32>, CropTransform)> {
    check_frame(frame)?;
    let transform = CropTransform {
        center,
        side,
        angle,
        output_size,
    };

    let size = output_size as usize;
    let data: Vec<f32> = (0..size)
        .into_par_iter()
        .flat_map_iter(|y| {
            let transform = &transform;
            (0..size).flat_map(move |x| {
                let src = transform.project(x as f32 + 0.5, y as f32 + 0.5);
                let rgb = sample_rgb(frame, src.x, src.y);
                [range.map(rgb[0]), range.map(rgb[1]), range.map(rgb[2])]
            })
        })
        .collect();

    let array = Array4::<f32>::from_shape_vec((1, size, size, 3), data)
        .map_err(|err| anyhow!("failed to build rotated crop tensor: {err}"))?;
    Ok((array, transform))
}

fn sample_rgb(frame: &Frame, x: f32, y: f32) -> [u8; 3] {
    if x.is_nan() || y.is_nan() {
        return [0, 0, 0];
    }
    let (w, h) = (frame.width as i32, frame.height as i32);
    let fetch = |ix: i32, iy: i32| -> [f32; 3] {
        if ix < 0 || iy < 0 || ix >= w || iy >= h {
            return [0.0, 0.0, 0.0];
        }
        let idx = ((iy as u32 * frame.width + ix as u32) as usize) * 4;
        [
            frame.rgba[idx] as f32,
            frame.rgba[idx + 1] as f32,
            frame.rgba[idx + 2] as f32,
        ]
    };

    let sx = x - 0.5;
    let sy = y - 0.5;
    let x0 = sx.floor();
    let y0 = sy.floor();
    let fx = sx - x0;
    let fy = sy - y0;
    let (ix, iy) = (x0 as i32, y0 as i32);
    let c00 = fetch(ix, iy);
    let c10 = fetch(ix + 1, iy);
    let c01 = fetch(ix, iy + 1);
    let c11 = fetch(ix + 1, iy + 1);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    let mut out = [0u8; 3];
    for c in 0..3 {
        let value = lerp(lerp(c00[c], c10[c], fx), lerp(c01[c], c11[c], fx), fy);
        out[c] = value.round().clamp(0.0, 255.0) as u8;
    }
    out
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn tensor_released_once_on_dispose_or_drop() {
        let ledger = ResourceLedger::new();
        let first = FrameTensor::new(Frame::filled(2, 2, [0; 4]), &ledger);
        first.dispose();
        {
            let _second = FrameTensor::new(Frame::filled(2, 2, [0; 4]), &ledger);
        }
        assert_eq!(ledger.allocated(), 2);
        assert_eq!(ledger.released(), 2);
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn resize_to_tensor_normalizes_signed() {
        let frame = Frame::filled(4, 2, [255, 0, 0, 255]);
        let tensor = resize_to_tensor(&frame, 4, 2, PixelRange::Signed).unwrap();
        assert_eq!(tensor.shape(), &[1, 2, 4, 3]);
        assert_relative_eq!(tensor[[0, 1, 3, 0]], 1.0);
        assert_relative_eq!(tensor[[0, 1, 3, 1]], -1.0);
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        let mut frame = Frame::filled(4, 4, [0; 4]);
        frame.rgba.truncate(10);
        assert!(resize_to_tensor(&frame, 2, 2, PixelRange::Unit).is_err());
    }

    #[test]
    fn crop_projection_inverts_to_center() {
        let transform = CropTransform {
            center: Point::new(50.0, 40.0),
            side: 64.0,
            angle: 0.3,
            output_size: 32,
        };
        let c = transform.project(16.0, 16.0);
        assert_relative_eq!(c.x, 50.0, epsilon = 1e-4);
        assert_relative_eq!(c.y, 40.0, epsilon = 1e-4);
    }

    #[test]
    fn unrotated_crop_samples_source_pixels() {
        let mut frame = Frame::filled(4, 4, [0, 0, 0, 255]);
        // top-left 2x2 white
        for (x, y) in [(0u32, 0u32), (1, 0), (0, 1), (1, 1)] {
            let idx = ((y * 4 + x) * 4) as usize;
            frame.rgba[idx..idx + 3].copy_from_slice(&[255, 255, 255]);
        }
        let (tensor, _) =
            prepare_rotated_crop(&frame, Point::new(2.0, 2.0), 4.0, 0.0, 4, PixelRange::Unit)
                .unwrap();
        assert_relative_eq!(tensor[[0, 0, 0, 0]], 1.0);
        assert_relative_eq!(tensor[[0, 3, 3, 0]], 0.0);
    }
}
