pub mod detector;
pub mod mesh;

use std::path::Path;

use anyhow::Result;

use self::{detector::FaceDetector, mesh::FaceMesh};
use crate::{
    config::FaceConfig,
    types::{FaceDetection, Frame},
};

/// Face-landmark estimation collaborator.
pub trait FaceEstimator: Send {
    fn estimate_faces(&mut self, frame: &Frame) -> Result<Vec<FaceDetection>>;
}

/// BlazeFace box detection followed by FaceMesh on each face crop.
pub struct OrtFaceEstimator {
    detector: FaceDetector,
    mesh: FaceMesh,
}

impl OrtFaceEstimator {
    pub fn new(detector_path: &Path, mesh_path: &Path, cfg: &FaceConfig) -> Result<Self> {
        let detector = FaceDetector::new(detector_path, cfg)?;
        let mesh = FaceMesh::new(mesh_path, cfg.mesh_confidence_threshold, cfg.crop_scale)?;
        log::info!(
            "face estimator ready using {} and {}",
            detector_path.display(),
            mesh_path.display()
        );
        Ok(Self { detector, mesh })
    }
}

impl FaceEstimator for OrtFaceEstimator {
    fn estimate_faces(&mut self, frame: &Frame) -> Result<Vec<FaceDetection>> {
        let regions = self.detector.detect(frame)?;
        let mut faces = Vec::with_capacity(regions.len());
        for region in &regions {
            if let Some(face) = self.mesh.landmarks(frame, region)? {
                faces.push(face);
            }
        }
        Ok(faces)
    }
}
