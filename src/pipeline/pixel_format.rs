use anyhow::{Result, anyhow};
use nokhwa::{Buffer, utils::FrameFormat};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use crate::types::Frame;

/// Converts a raw camera buffer of any supported format into an RGBA frame.
pub fn decode_camera_frame(buffer: &Buffer) -> Result<Frame> {
    let resolution = buffer.resolution();
    let (width, height) = (resolution.width_x, resolution.height_y);
    let data = buffer.buffer();

    let rgba = match buffer.source_frame_format() {
        FrameFormat::NV12 => nv12_to_rgba(data, width, height)?,
        FrameFormat::YUYV => yuyv_to_rgba(data, width, height)?,
        FrameFormat::MJPEG => mjpeg_to_rgba(data, width, height)?,
        FrameFormat::RAWRGB => expand_to_rgba(data, width, height, Channels::Rgb)?,
        FrameFormat::RAWBGR => expand_to_rgba(data, width, height, Channels::Bgr)?,
        FrameFormat::GRAY => expand_to_rgba(data, width, height, Channels::Gray)?,
    };

    Ok(Frame::new(rgba, width, height))
}

fn require_len(format: &str, data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        return Err(anyhow!(
            "{format} buffer too small: got {}, expected {expected}",
            data.len()
        ));
    }
    Ok(())
}

fn nv12_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let y_len = width as usize * height as usize;
    let uv_len = y_len / 2;
    require_len("NV12", data, y_len + uv_len)?;

    let image = YuvBiPlanarImage {
        y_plane: &data[..y_len],
        y_stride: width,
        uv_plane: &data[y_len..y_len + uv_len],
        uv_stride: width,
        width,
        height,
    };
    let mut rgba = vec![0u8; y_len * 4];
    yuv_nv12_to_rgba(
        &image,
        &mut rgba,
        width * 4,
        YuvRange::Limited,
        YuvStandardMatrix::Bt601,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12 to RGBA failed: {err:?}"))?;
    Ok(rgba)
}

fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let pixels = width as usize * height as usize;
    require_len("YUYV", data, pixels * 2)?;

    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };
    let mut rgba = vec![0u8; pixels * 4];
    yuyv422_to_rgba(
        &packed,
        &mut rgba,
        width * 4,
        YuvRange::Limited,
        YuvStandardMatrix::Bt601,
    )
    .map_err(|err| anyhow!("YUYV422 to RGBA failed: {err:?}"))?;
    Ok(rgba)
}

fn mjpeg_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;
    require_len("MJPEG", &rgba, width as usize * height as usize * 4)?;
    Ok(rgba)
}

#[derive(Clone, Copy)]
enum Channels {
    Rgb,
    Bgr,
    Gray,
}

impl Channels {
    fn stride(self) -> usize {
        match self {
            Channels::Rgb | Channels::Bgr => 3,
            Channels::Gray => 1,
        }
    }
}

fn expand_to_rgba(data: &[u8], width: u32, height: u32, channels: Channels) -> Result<Vec<u8>> {
    let pixels = width as usize * height as usize;
    let stride = channels.stride();
    require_len("raw", data, pixels * stride)?;

    let mut rgba = vec![0u8; pixels * 4];
    rgba.par_chunks_mut(4)
        .zip(data[..pixels * stride].par_chunks_exact(stride))
        .for_each(|(dst, src)| {
            let [r, g, b] = match channels {
                Channels::Rgb => [src[0], src[1], src[2]],
                Channels::Bgr => [src[2], src[1], src[0]],
                Channels::Gray => [src[0], src[0], src[0]],
            };
            dst.copy_from_slice(&[r, g, b, 255]);
        });
    Ok(rgba)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_is_swapped_into_rgba() {
        let rgba = expand_to_rgba(&[1, 2, 3, 4, 5, 6], 2, 1, Channels::Bgr).unwrap();
        assert_eq!(rgba, vec![3, 2, 1, 255, 6, 5, 4, 255]);
    }

    #[test]
    fn gray_is_replicated() {
        let rgba = expand_to_rgba(&[9, 200], 1, 2, Channels::Gray).unwrap();
        assert_eq!(rgba, vec![9, 9, 9, 255, 200, 200, 200, 255]);
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(expand_to_rgba(&[1, 2], 2, 1, Channels::Rgb).is_err());
        assert!(yuyv_to_rgba(&[0; 3], 2, 1).is_err());
        assert!(nv12_to_rgba(&[0; 4], 2, 2).is_err());
    }
}
