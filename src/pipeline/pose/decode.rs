//! PoseNet multi-person decoding.
//!
//! Root candidates are local maxima of the keypoint heatmaps. Each root grows
//! into a full pose by following the displacement fields along the part
//! chain, and candidates whose root lies within the NMS radius of the same
//! keypoint of an already accepted pose are discarded.

use std::{cmp::Ordering, collections::BinaryHeap};

use anyhow::{Result, anyhow};

use crate::types::{BodyPart, Keypoint, NUM_KEYPOINTS, Point, Pose};

const LOCAL_MAXIMUM_RADIUS: i32 = 1;
const OFFSET_REFINE_STEPS: usize = 2;

/// Parent/child pairs walked when growing a pose from its root.
pub const POSE_CHAIN: [(BodyPart, BodyPart); 16] = [
    (BodyPart::Nose, BodyPart::LeftEye),
    (BodyPart::LeftEye, BodyPart::LeftEar),
    (BodyPart::Nose, BodyPart::RightEye),
    (BodyPart::RightEye, BodyPart::RightEar),
    (BodyPart::Nose, BodyPart::LeftShoulder),
    (BodyPart::LeftShoulder, BodyPart::LeftElbow),
    (BodyPart::LeftElbow, BodyPart::LeftWrist),
    (BodyPart::LeftShoulder, BodyPart::LeftHip),
    (BodyPart::LeftHip, BodyPart::LeftKnee),
    (BodyPart::LeftKnee, BodyPart::LeftAnkle),
    (BodyPart::Nose, BodyPart::RightShoulder),
    (BodyPart::RightShoulder, BodyPart::RightElbow),
    (BodyPart::RightElbow, BodyPart::RightWrist),
    (BodyPart::RightShoulder, BodyPart::RightHip),
    (BodyPart::RightHip, BodyPart::RightKnee),
    (BodyPart::RightKnee, BodyPart::RightAnkle),
];

/// An `[height, width, channels]` block of model output, row-major.
#[derive(Clone, Debug)]
pub struct FeatureMap {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl FeatureMap {
    pub fn new(height: usize, width: usize, channels: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != height * width * channels {
            return Err(anyhow!(
                "feature map holds {} values, expected {height}x{width}x{channels}",
                data.len()
            ));
        }
        Ok(Self {
            height,
            width,
            channels,
            data,
        })
    }

    /// Builds from an NHWC tensor shape with a batch of one.
    pub fn from_nhwc(shape: &[usize], data: Vec<f32>) -> Result<Self> {
        match shape {
            [1, h, w, c] | [h, w, c] => Self::new(*h, *w, *c, data),
            other => Err(anyhow!("unexpected feature map shape {other:?}")),
        }
    }

    #[inline]
    pub fn get(&self, y: usize, x: usize, c: usize) -> f32 {
        self.data[(y * self.width + x) * self.channels + c]
    }
}

/// Raw PoseNet outputs. `heatmaps` must already be passed through a sigmoid.
#[derive(Clone, Debug)]
pub struct PoseNetOutputs {
    pub heatmaps: FeatureMap,
    pub offsets: FeatureMap,
    pub displacements_fwd: FeatureMap,
    pub displacements_bwd: FeatureMap,
}

impl PoseNetOutputs {
    pub fn validate(&self) -> Result<()> {
        let (h, w) = (self.heatmaps.height, self.heatmaps.width);
        let edges = POSE_CHAIN.len();
        let checks = [
            ("heatmaps", &self.heatmaps, NUM_KEYPOINTS),
            ("offsets", &self.offsets, NUM_KEYPOINTS * 2),
            ("forward displacements", &self.displacements_fwd, edges * 2),
            ("backward displacements", &self.displacements_bwd, edges * 2),
        ];
        for (name, map, channels) in checks {
            if map.height != h || map.width != w || map.channels != channels {
                return Err(anyhow!(
                    "{name} shape {}x{}x{} does not match {h}x{w}x{channels}",
                    map.height,
                    map.width,
                    map.channels
                ));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DecodeParams {
    pub output_stride: u32,
    pub max_detections: usize,
    pub score_threshold: f32,
    pub nms_radius: f32,
}

#[derive(Clone, Copy, Debug)]
struct PartCandidate {
    score: f32,
    y: usize,
    x: usize,
    id: usize,
}

impl PartialEq for PartCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score
    }
}

impl Eq for PartCandidate {}

impl PartialOrd for PartCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PartCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.total_cmp(&other.score)
    }
}

fn is_local_maximum(scores: &FeatureMap, id: usize, y: usize, x: usize, score: f32) -> bool {
    let (h, w) = (scores.height as i32, scores.width as i32);
    let (yi, xi) = (y as i32, x as i32);
    for cy in (yi - LOCAL_MAXIMUM_RADIUS).max(0)..(yi + LOCAL_MAXIMUM_RADIUS + 1).min(h) {
        for cx in (xi - LOCAL_MAXIMUM_RADIUS).max(0)..(xi + LOCAL_MAXIMUM_RADIUS + 1).min(w) {
            if scores.get(cy as usize, cx as usize, id) > score {
                return false;
            }
        }
    }
    true
}

fn part_queue(scores: &FeatureMap, threshold: f32) -> BinaryHeap<PartCandidate> {
    let mut queue = BinaryHeap::new();
    for y in 0..scores.height {
        for x in 0..scores.width {
            for id in 0..scores.channels {
                let score = scores.get(y, x, id);
                if score < threshold {
                    continue;
                }
                if is_local_maximum(scores, id, y, x, score) {
                    queue.push(PartCandidate { score, y, x, id });
                }
            }
        }
    }
    queue
}

fn offset_point(offsets: &FeatureMap, y: usize, x: usize, id: usize) -> Point {
    Point::new(offsets.get(y, x, id + NUM_KEYPOINTS), offsets.get(y, x, id))
}

fn image_coords(candidate: &PartCandidate, stride: f32, offsets: &FeatureMap) -> Point {
    let offset = offset_point(offsets, candidate.y, candidate.x, candidate.id);
    Point::new(
        candidate.x as f32 * stride + offset.x,
        candidate.y as f32 * stride + offset.y,
    )
}

fn strided_index(point: Point, stride: f32, height: usize, width: usize) -> (usize, usize) {
    let y = (point.y / stride).round().clamp(0.0, (height - 1) as f32) as usize;
    let x = (point.x / stride).round().clamp(0.0, (width - 1) as f32) as usize;
    (y, x)
}

fn displacement(displacements: &FeatureMap, edge: usize, y: usize, x: usize) -> Point {
    let edges = displacements.channels / 2;
    Point::new(
        displacements.get(y, x, edges + edge),
        displacements.get(y, x, edge),
    )
}

fn traverse_to_target(
    edge: usize,
    source: &Keypoint,
    target: BodyPart,
    outputs: &PoseNetOutputs,
    displacements: &FeatureMap,
    stride: f32,
) -> Keypoint {
    let (h, w) = (outputs.heatmaps.height, outputs.heatmaps.width);
    let (sy, sx) = strided_index(source.position, stride, h, w);
    let step = displacement(displacements, edge, sy, sx);
    let mut position = Point::new(source.position.x + step.x, source.position.y + step.y);

    for _ in 0..OFFSET_REFINE_STEPS {
        let (ty, tx) = strided_index(position, stride, h, w);
        let offset = offset_point(&outputs.offsets, ty, tx, target.index());
        position = Point::new(tx as f32 * stride + offset.x, ty as f32 * stride + offset.y);
    }

    let (ty, tx) = strided_index(position, stride, h, w);
    Keypoint {
        part: target,
        position,
        score: outputs.heatmaps.get(ty, tx, target.index()),
    }
}

fn decode_pose(
    root: &PartCandidate,
    root_position: Point,
    outputs: &PoseNetOutputs,
    stride: f32,
) -> Vec<Keypoint> {
    let mut keypoints: [Option<Keypoint>; NUM_KEYPOINTS] = [None; NUM_KEYPOINTS];
    let Some(root_part) = BodyPart::from_index(root.id) else {
        return Vec::new();
    };
    keypoints[root.id] = Some(Keypoint {
        part: root_part,
        position: root_position,
        score: root.score,
    });

    // Walk child -> parent with backward displacements, then parent -> child.
    for (edge, (parent, child)) in POSE_CHAIN.iter().enumerate().rev() {
        if let (Some(source), None) = (keypoints[child.index()], keypoints[parent.index()]) {
            keypoints[parent.index()] = Some(traverse_to_target(
                edge,
                &source,
                *parent,
                outputs,
                &outputs.displacements_bwd,
                stride,
            ));
        }
    }
    for (edge, (parent, child)) in POSE_CHAIN.iter().enumerate() {
        if let (Some(source), None) = (keypoints[parent.index()], keypoints[child.index()]) {
            keypoints[child.index()] = Some(traverse_to_target(
                edge,
                &source,
                *child,
                outputs,
                &outputs.displacements_fwd,
                stride,
            ));
        }
    }

    keypoints.into_iter().flatten().collect()
}

fn within_nms_radius(poses: &[Pose], radius_sq: f32, point: Point, part: BodyPart) -> bool {
    poses.iter().any(|pose| {
        pose.keypoint(part)
            .is_some_and(|kp| kp.position.distance_sq(&point) <= radius_sq)
    })
}

fn instance_score(existing: &[Pose], radius_sq: f32, keypoints: &[Keypoint]) -> f32 {
    let total: f32 = keypoints
        .iter()
        .filter(|kp| !within_nms_radius(existing, radius_sq, kp.position, kp.part))
        .map(|kp| kp.score)
        .sum();
    total / NUM_KEYPOINTS as f32
}

/// Decodes up to `params.max_detections` poses in model-input pixel space.
pub fn decode_multiple_poses(outputs: &PoseNetOutputs, params: &DecodeParams) -> Result<Vec<Pose>> {
    outputs.validate()?;
    let stride = params.output_stride.max(1) as f32;
    let radius_sq = params.nms_radius * params.nms_radius;

    let mut queue = part_queue(&outputs.heatmaps, params.score_threshold);
    let mut poses: Vec<Pose> = Vec::new();

    while poses.len() < params.max_detections {
        let Some(root) = queue.pop() else {
            break;
        };
        let Some(root_part) = BodyPart::from_index(root.id) else {
            continue;
        };
        let root_position = image_coords(&root, stride, &outputs.offsets);
        if within_nms_radius(&poses, radius_sq, root_position, root_part) {
            continue;
        }

        let keypoints = decode_pose(&root, root_position, outputs, stride);
        let score = instance_score(&poses, radius_sq, &keypoints);
        poses.push(Pose { keypoints, score });
    }

    Ok(poses)
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
