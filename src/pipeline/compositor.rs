use std::path::Path;

use anyhow::{Context, Result, anyhow};

use super::{
    illustration::IllustrationEngine,
    surface::{BlendMode, Surface, Transform},
    tensor::{FrameTensor, ResourceLedger, resize_rgba},
};
use crate::{
    config::{BackgroundSource, CaptureConfig, OutputConfig},
    types::{FaceFrame, Frame, OutputFrame, Point, Pose},
};

/// Mirrors camera frames into a capture-sized buffer.
pub struct FrameCompositor {
    surface: Surface,
    ledger: ResourceLedger,
}

impl FrameCompositor {
    pub fn new(capture: CaptureConfig, ledger: ResourceLedger) -> Self {
        Self {
            surface: Surface::new(capture.width, capture.height),
            ledger,
        }
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    /// Paints `frame` mirrored horizontally and returns a snapshot of the buffer.
    pub fn capture_frame(&mut self, frame: &Frame) -> FrameTensor {
        let (w, h) = (self.surface.width() as f32, self.surface.height() as f32);
        self.surface.clear();
        self.surface.save();
        self.surface.reset_transform();
        self.surface.scale(-1.0, 1.0);
        self.surface.translate(-w, 0.0);
        self.surface.draw_image(frame, 0.0, 0.0, w, h);
        self.surface.restore();
        FrameTensor::new(self.surface.to_frame(), &self.ledger)
    }
}

/// Loads the configured background at exactly `width`x`height`.
pub fn load_background(source: &BackgroundSource, width: u32, height: u32) -> Result<Frame> {
    match source {
        BackgroundSource::File(path) => load_background_file(path, width, height),
        BackgroundSource::Gradient { top, bottom } => Ok(gradient(width, height, *top, *bottom)),
    }
}

fn load_background_file(path: &Path, width: u32, height: u32) -> Result<Frame> {
    let image = image::open(path)
        .with_context(|| format!("failed to read background {}", path.display()))?
        .to_rgba8();
    let (src_w, src_h) = image.dimensions();
    if src_w == 0 || src_h == 0 {
        return Err(anyhow!("background {} is empty", path.display()));
    }
    let rgba = resize_rgba(image.as_raw(), src_w, src_h, width, height)?;
    log::info!(
        "background {} loaded ({src_w}x{src_h} -> {width}x{height})",
        path.display()
    );
    Ok(Frame::new(rgba, width, height))
}

fn gradient(width: u32, height: u32, top: [u8; 4], bottom: [u8; 4]) -> Frame {
    let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        let t = if height > 1 {
            y as f32 / (height - 1) as f32
        } else {
            0.0
        };
        let mut row = [0u8; 4];
        for c in 0..4 {
            row[c] = (top[c] as f32 + (bottom[c] as f32 - top[c] as f32) * t).round() as u8;
        }
        for _ in 0..width {
            rgba.extend_from_slice(&row);
        }
    }
    Frame::new(rgba, width, height)
}

/// Draws the character over the background onto the output surface.
pub struct OutputCompositor {
    surface: Surface,
    background: Frame,
    correction: Transform,
    capture: CaptureConfig,
    clear_without_pose: bool,
    sequence: u64,
}

impl OutputCompositor {
    pub fn new(cfg: &OutputConfig, capture: CaptureConfig, background: Frame) -> Self {
        let (sx, sy) = cfg
            .correction
            .scale_factors(cfg.height, capture.width, capture.height);
        let pivot = Point::new(cfg.correction.pivot.0, cfg.correction.pivot.1);
        Self {
            surface: Surface::new(cfg.width, cfg.height),
            background,
            correction: Transform::scale_about(sx, sy, pivot),
            capture,
            clear_without_pose: cfg.clear_without_pose,
            sequence: 0,
        }
    }

    pub fn correction(&self) -> Transform {
        self.correction
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    /// Renders one output frame. Without a pose the engine is not touched.
    pub fn composite(
        &mut self,
        engine: &mut dyn IllustrationEngine,
        pose: Option<&Pose>,
        face: Option<&FaceFrame>,
    ) -> OutputFrame {
        if pose.is_some() || self.clear_without_pose {
            self.surface.clear();
        }

        if let Some(pose) = pose {
            engine.update_skeleton(pose, face);
            self.surface.save();
            self.surface.set_transform(self.correction);
            engine.draw(&mut self.surface, self.capture.width, self.capture.height);
            self.surface.restore();
        }

        let (w, h) = (self.surface.width() as f32, self.surface.height() as f32);
        self.surface.save();
        self.surface.reset_transform();
        self.surface.set_blend_mode(BlendMode::DestinationOver);
        self.surface.draw_image(&self.background, 0.0, 0.0, w, h);
        self.surface.restore();

        self.sequence += 1;
        let frame = self.surface.to_frame();
        OutputFrame {
            rgba: frame.rgba,
            width: frame.width,
            height: frame.height,
            sequence: self.sequence,
            timestamp: frame.timestamp,
        }
    }
}
