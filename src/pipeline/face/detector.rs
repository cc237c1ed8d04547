use std::{cmp::Ordering, path::Path};

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use crate::{
    config::FaceConfig,
    pipeline::{
        pose::decode::sigmoid,
        tensor::{PixelRange, resize_to_tensor},
    },
    types::{Frame, Point},
};

pub const DETECTOR_INPUT_SIZE: u32 = 128;
const FACE_KEYPOINTS: usize = 6;
const FEATURES_PER_ANCHOR: usize = 4 + FACE_KEYPOINTS * 2;
const RAW_SCORE_CLIP: f32 = 100.0;

/// (stride, anchors per cell) of the short-range model's two feature maps.
const ANCHOR_LAYERS: [(u32, usize); 2] = [(8, 2), (16, 6)];

/// Box and keypoint of one detected face, in frame pixels.
#[derive(Clone, Debug)]
pub struct FaceRegion {
    pub bbox: [f32; 4],
    /// Right eye, left eye, nose tip, mouth, right ear tragion, left ear tragion.
    pub keypoints: Vec<Point>,
    pub score: f32,
}

impl FaceRegion {
    pub fn center(&self) -> Point {
        Point::new(
            (self.bbox[0] + self.bbox[2]) * 0.5,
            (self.bbox[1] + self.bbox[3]) * 0.5,
        )
    }

    pub fn width(&self) -> f32 {
        (self.bbox[2] - self.bbox[0]).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.bbox[3] - self.bbox[1]).max(0.0)
    }
}

/// Unit-square anchor centers for a 128x128 input, 896 in total.
pub fn generate_anchors() -> Vec<[f32; 2]> {
    let mut anchors = Vec::new();
    for (stride, per_cell) in ANCHOR_LAYERS {
        let cells = (DETECTOR_INPUT_SIZE / stride) as usize;
        for y in 0..cells {
            for x in 0..cells {
                let center = [
                    (x as f32 + 0.5) / cells as f32,
                    (y as f32 + 0.5) / cells as f32,
                ];
                anchors.extend(std::iter::repeat_n(center, per_cell));
            }
        }
    }
    anchors
}

pub struct FaceDetector {
    session: Session,
    anchors: Vec<[f32; 2]>,
    score_threshold: f32,
    nms_threshold: f32,
    top_k: usize,
}

impl FaceDetector {
    pub fn new(model_path: &Path, cfg: &FaceConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!("failed to load face detector from {}", model_path.display())
            })?;

        Ok(Self {
            session,
            anchors: generate_anchors(),
            score_threshold: cfg.detector_score_threshold,
            nms_threshold: cfg.detector_nms_threshold,
            top_k: cfg.max_faces.max(1),
        })
    }

    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>> {
        let input = resize_to_tensor(
            frame,
            DETECTOR_INPUT_SIZE,
            DETECTOR_INPUT_SIZE,
            PixelRange::Signed,
        )?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run face detector session")?;

        if outputs.len() < 2 {
            return Err(anyhow!(
                "face detector returned {} outputs, expected 2",
                outputs.len()
            ));
        }

        let mut regressors = None;
        let mut scores = None;
        for idx in 0..outputs.len() {
            let array = outputs[idx].try_extract_array::<f32>()?;
            let values: Vec<f32> = array.iter().copied().collect();
            match array.shape().last().copied() {
                Some(FEATURES_PER_ANCHOR) => regressors = Some(values),
                Some(1) => scores = Some(values),
                _ => {}
            }
        }
        let (Some(regressors), Some(scores)) = (regressors, scores) else {
            return Err(anyhow!("face detector outputs are not [.., 16] boxes and [.., 1] scores"));
        };

        let candidates = decode_face_outputs(
            &regressors,
            &scores,
            &self.anchors,
            frame.width,
            frame.height,
            self.score_threshold,
        )?;
        Ok(nms(candidates, self.nms_threshold, self.top_k))
    }
}

/// Decodes raw regressors and logits against `anchors` into frame pixels.
pub fn decode_face_outputs(
    regressors: &[f32],
    scores: &[f32],
    anchors: &[[f32; 2]],
    frame_w: u32,
    frame_h: u32,
    score_threshold: f32,
) -> Result<Vec<FaceRegion>> {
    let count = anchors.len();
    if scores.len() < count || regressors.len() < count * FEATURES_PER_ANCHOR {
        return Err(anyhow!(
            "face detector produced {} scores and {} regressors for {count} anchors",
            scores.len(),
            regressors.len()
        ));
    }

    let input = DETECTOR_INPUT_SIZE as f32;
    let (fw, fh) = (frame_w as f32, frame_h as f32);
    let mut regions = Vec::new();

    for (idx, anchor) in anchors.iter().enumerate() {
        let score = sigmoid(scores[idx].clamp(-RAW_SCORE_CLIP, RAW_SCORE_CLIP));
        if score < score_threshold {
            continue;
        }
        let raw = &regressors[idx * FEATURES_PER_ANCHOR..(idx + 1) * FEATURES_PER_ANCHOR];
        let cx = raw[0] / input + anchor[0];
        let cy = raw[1] / input + anchor[1];
        let hw = raw[2] / input / 2.0;
        let hh = raw[3] / input / 2.0;
        if hw <= 0.0 || hh <= 0.0 {
            continue;
        }

        let bbox = [
            ((cx - hw) * fw).clamp(0.0, fw),
            ((cy - hh) * fh).clamp(0.0, fh),
            ((cx + hw) * fw).clamp(0.0, fw),
            ((cy + hh) * fh).clamp(0.0, fh),
        ];
        let keypoints = (0..FACE_KEYPOINTS)
            .map(|k| {
                Point::new(
                    (raw[4 + k * 2] / input + anchor[0]) * fw,
                    (raw[4 + k * 2 + 1] / input + anchor[1]) * fh,
                )
            })
            .collect();

        regions.push(FaceRegion {
            bbox,
            keypoints,
            score,
        });
    }
    Ok(regions)
}

fn nms(mut candidates: Vec<FaceRegion>, threshold: f32, top_k: usize) -> Vec<FaceRegion> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut keep: Vec<FaceRegion> = Vec::new();
    for candidate in candidates {
        if keep.iter().any(|k| iou(&k.bbox, &candidate.bbox) >= threshold) {
            continue;
        }
        keep.push(candidate);
        if keep.len() >= top_k {
            break;
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    if inter <= 0.0 {
        return 0.0;
    }
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}
