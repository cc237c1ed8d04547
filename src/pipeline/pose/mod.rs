pub mod decode;

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use self::decode::{DecodeParams, FeatureMap, POSE_CHAIN, PoseNetOutputs, decode_multiple_poses, sigmoid};
use super::tensor::{PixelRange, resize_to_tensor};
use crate::{
    config::PoseNetConfig,
    types::{Frame, NUM_KEYPOINTS, Pose},
};

/// Body-pose estimation collaborator.
pub trait PoseEstimator: Send {
    /// Poses found in `frame`, in frame pixel coordinates, best first.
    fn estimate_poses(&mut self, frame: &Frame) -> Result<Vec<Pose>>;
}

/// PoseNet MobileNetV1 on ONNX Runtime.
pub struct PoseNetEstimator {
    session: Session,
    cfg: PoseNetConfig,
}

impl PoseNetEstimator {
    pub fn new(model_path: &Path, cfg: PoseNetConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load PoseNet from {}", model_path.display()))?;

        log::info!(
            "PoseNet {} ready (stride {}, input {}, multiplier {}, {}-byte weights)",
            cfg.architecture,
            cfg.output_stride,
            cfg.valid_input_resolution(),
            cfg.multiplier,
            cfg.quant_bytes
        );
        Ok(Self { session, cfg })
    }

}

/// Only `min_part_confidence` gates decoding; any pose that comes back is kept.
fn decode_params(cfg: &PoseNetConfig) -> DecodeParams {
    DecodeParams {
        output_stride: cfg.output_stride,
        max_detections: cfg.max_detections,
        score_threshold: cfg.min_part_confidence,
        nms_radius: cfg.nms_radius,
    }
}

/// Rescales poses decoded at `resolution` into `frame` pixels.
fn to_frame_space(poses: Vec<Pose>, frame: &Frame, resolution: u32) -> Vec<Pose> {
    let sx = frame.width as f32 / resolution as f32;
    let sy = frame.height as f32 / resolution as f32;
    poses.into_iter().map(|pose| pose.scaled(sx, sy)).collect()
}

impl PoseEstimator for PoseNetEstimator {
    fn estimate_poses(&mut self, frame: &Frame) -> Result<Vec<Pose>> {
        let resolution = self.cfg.valid_input_resolution();
        let input = resize_to_tensor(frame, resolution, resolution, PixelRange::Signed)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run PoseNet session")?;

        let mut maps = Vec::with_capacity(outputs.len());
        for idx in 0..outputs.len() {
            let array = outputs[idx].try_extract_array::<f32>()?;
            let shape = array.shape().to_vec();
            maps.push(to_feature_map(&shape, array.iter().copied().collect())?);
        }
        let mut raw = classify_outputs(maps)?;
        for v in raw.heatmaps.data.iter_mut() {
            *v = sigmoid(*v);
        }

        let poses = decode_multiple_poses(&raw, &decode_params(&self.cfg))?;
        Ok(to_frame_space(poses, frame, resolution))
    }
}

fn is_posenet_channels(c: usize) -> bool {
    c == NUM_KEYPOINTS || c == NUM_KEYPOINTS * 2 || c == POSE_CHAIN.len() * 2
}

/// Accepts NHWC as-is and transposes NCHW outputs.
fn to_feature_map(shape: &[usize], data: Vec<f32>) -> Result<FeatureMap> {
    match shape {
        [1, c, h, w] if is_posenet_channels(*c) && !is_posenet_channels(*w) => {
            let (c, h, w) = (*c, *h, *w);
            let mut nhwc = vec![0.0; data.len()];
            for ch in 0..c {
                for y in 0..h {
                    for x in 0..w {
                        nhwc[(y * w + x) * c + ch] = data[(ch * h + y) * w + x];
                    }
                }
            }
            FeatureMap::new(h, w, c, nhwc)
        }
        _ => FeatureMap::from_nhwc(shape, data),
    }
}

/// Orders raw outputs by channel count: heatmaps (17), offsets (34), then the
/// two displacement maps (32 each), forward before backward.
fn classify_outputs(maps: Vec<FeatureMap>) -> Result<PoseNetOutputs> {
    let mut heatmaps = None;
    let mut offsets = None;
    let mut displacements = Vec::new();
    for map in maps {
        match map.channels {
            c if c == NUM_KEYPOINTS => heatmaps = Some(map),
            c if c == NUM_KEYPOINTS * 2 => offsets = Some(map),
            c if c == POSE_CHAIN.len() * 2 => displacements.push(map),
            other => log::debug!("ignoring PoseNet output with {other} channels"),
        }
    }

    let mut displacements = displacements.into_iter();
    match (heatmaps, offsets, displacements.next(), displacements.next()) {
        (Some(heatmaps), Some(offsets), Some(displacements_fwd), Some(displacements_bwd)) => {
            Ok(PoseNetOutputs {
                heatmaps,
                offsets,
                displacements_fwd,
                displacements_bwd,
            })
        }
        _ => Err(anyhow!(
            "PoseNet model must expose heatmap, offset and two displacement outputs"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nchw_outputs_are_transposed() {
        // 17 channels of 2x3, value = channel index
        let (c, h, w) = (NUM_KEYPOINTS, 2, 3);
        let data: Vec<f32> = (0..c).flat_map(|ch| vec![ch as f32; h * w]).collect();
        let map = to_feature_map(&[1, c, h, w], data).unwrap();
        assert_eq!((map.height, map.width, map.channels), (2, 3, 17));
        assert_eq!(map.get(1, 2, 5), 5.0);
    }

    #[test]
    fn outputs_are_classified_by_channel_count() {
        let map = |c: usize, fill: f32| FeatureMap::new(2, 2, c, vec![fill; 4 * c]).unwrap();
        let outputs = classify_outputs(vec![
            map(32, 1.0),
            map(17, 0.0),
            map(32, 2.0),
            map(34, 0.0),
        ])
        .unwrap();
        assert_eq!(outputs.displacements_fwd.data[0], 1.0);
        assert_eq!(outputs.displacements_bwd.data[0], 2.0);
        assert_eq!(outputs.offsets.channels, 34);
    }

    #[test]
    fn weak_pose_above_part_threshold_is_kept() {
        let cfg = PoseNetConfig::default();
        let mut outputs = decode::tests::single_peak_outputs();
        for v in outputs.heatmaps.data.iter_mut() {
            if *v > 0.0 {
                *v = 0.12;
            }
        }
        let poses = decode_multiple_poses(&outputs, &decode_params(&cfg)).unwrap();
        let poses = to_frame_space(poses, &Frame::filled(386, 193, [0; 4]), 64);

        assert_eq!(poses.len(), 1);
        assert!((poses[0].score - 0.12).abs() < 1e-5);
        let nose = poses[0].keypoint(crate::types::BodyPart::Nose).unwrap();
        assert!((nose.position.x - 32.0 * 386.0 / 64.0).abs() < 1e-3);
        assert!((nose.position.y - 32.0 * 193.0 / 64.0).abs() < 1e-3);
    }

    #[test]
    fn missing_outputs_are_an_error() {
        let heat = FeatureMap::new(2, 2, 17, vec![0.0; 68]).unwrap();
        assert!(classify_outputs(vec![heat]).is_err());
    }
}
