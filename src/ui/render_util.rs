use std::sync::Arc;

use gpui::RenderImage;
use image::{Frame as ImageFrame, ImageBuffer, Rgba};

use crate::types::OutputFrame;

pub(super) fn output_to_image(frame: &OutputFrame) -> Option<Arc<RenderImage>> {
    let mut bgra = frame.rgba.clone();
    // GPUI expects BGRA.
    for px in bgra.chunks_exact_mut(4) {
        px.swap(0, 2);
    }

    let buffer = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(frame.width, frame.height, bgra)?;
    Some(Arc::new(RenderImage::new(vec![ImageFrame::new(buffer)])))
}
