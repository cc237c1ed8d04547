use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::detector::FaceRegion;
use crate::{
    pipeline::{
        pose::decode::sigmoid,
        tensor::{CropTransform, PixelRange, prepare_rotated_crop},
    },
    types::{FACE_MESH_POINTS, FaceDetection, Frame, Point},
};

pub const MESH_INPUT_SIZE: u32 = 192;

const RIGHT_EYE: usize = 0;
const LEFT_EYE: usize = 1;

/// Square crop around a detected face, rotated so the eyes are level.
pub fn crop_from_face(region: &FaceRegion, crop_scale: f32) -> (Point, f32, f32) {
    let center = region.center();
    let side = region.width().max(region.height()) * crop_scale;
    let angle = match (region.keypoints.get(RIGHT_EYE), region.keypoints.get(LEFT_EYE)) {
        (Some(right), Some(left)) => (left.y - right.y).atan2(left.x - right.x),
        _ => 0.0,
    };
    (center, side, angle)
}

/// Maps `x, y, z` triples in crop pixels back into frame pixels.
pub fn project_mesh(raw: &[f32], transform: &CropTransform) -> Result<Vec<Point>> {
    if raw.len() < FACE_MESH_POINTS * 3 {
        return Err(anyhow!(
            "face mesh output has {} values, expected {}",
            raw.len(),
            FACE_MESH_POINTS * 3
        ));
    }
    Ok(raw
        .chunks_exact(3)
        .take(FACE_MESH_POINTS)
        .map(|p| transform.project(p[0], p[1]))
        .collect())
}

pub struct FaceMesh {
    session: Session,
    confidence_threshold: f32,
    crop_scale: f32,
}

impl FaceMesh {
    pub fn new(model_path: &Path, confidence_threshold: f32, crop_scale: f32) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load face mesh from {}", model_path.display()))?;

        Ok(Self {
            session,
            confidence_threshold,
            crop_scale,
        })
    }

    /// Landmarks for `region`, or `None` when the model says no face is in the crop.
    pub fn landmarks(&mut self, frame: &Frame, region: &FaceRegion) -> Result<Option<FaceDetection>> {
        let (center, side, angle) = crop_from_face(region, self.crop_scale);
        let (input, transform) = prepare_rotated_crop(
            frame,
            center,
            side,
            angle,
            MESH_INPUT_SIZE,
            PixelRange::Unit,
        )?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run face mesh session")?;

        let mut coords = None;
        let mut flag = None;
        for idx in 0..outputs.len() {
            let array = outputs[idx].try_extract_array::<f32>()?;
            match array.len() {
                n if n >= FACE_MESH_POINTS * 3 => coords = Some(array.iter().copied().collect::<Vec<_>>()),
                1 => flag = array.iter().next().copied(),
                _ => {}
            }
        }
        let coords = coords.ok_or_else(|| anyhow!("face mesh returned no landmark output"))?;
        let confidence = flag.map(sigmoid).unwrap_or(region.score);
        if confidence < self.confidence_threshold {
            return Ok(None);
        }

        let mesh = project_mesh(&coords, &transform)?;
        Ok(Some(FaceDetection {
            mesh,
            bbox: region.bbox,
            confidence,
        }))
    }
}
