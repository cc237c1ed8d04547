//! Bridges estimator output and the illustration rig.
//!
//! Poses come out of the estimator in unmirrored camera space; [`normalize`]
//! moves them into the mirrored space the face mesh and the rig live in.

use crate::types::{
    BodyPart, FACE_OVAL, FaceDetection, FaceFrame, FacePart, Keypoint, Point, Pose,
};

/// Limb segments drawn between pose keypoints.
pub const POSE_CONNECTIONS: &[(BodyPart, BodyPart)] = &[
    (BodyPart::LeftShoulder, BodyPart::RightShoulder),
    (BodyPart::LeftShoulder, BodyPart::LeftElbow),
    (BodyPart::LeftElbow, BodyPart::LeftWrist),
    (BodyPart::RightShoulder, BodyPart::RightElbow),
    (BodyPart::RightElbow, BodyPart::RightWrist),
    (BodyPart::LeftShoulder, BodyPart::LeftHip),
    (BodyPart::RightShoulder, BodyPart::RightHip),
    (BodyPart::LeftHip, BodyPart::RightHip),
    (BodyPart::LeftHip, BodyPart::LeftKnee),
    (BodyPart::LeftKnee, BodyPart::LeftAnkle),
    (BodyPart::RightHip, BodyPart::RightKnee),
    (BodyPart::RightKnee, BodyPart::RightAnkle),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoneKind {
    Torso,
    Arm,
    Leg,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bone {
    pub from: BodyPart,
    pub to: BodyPart,
    pub kind: BoneKind,
}

/// Bone list a character is rigged against. Immutable once bound.
#[derive(Clone, Debug, PartialEq)]
pub struct Skeleton {
    bones: Vec<Bone>,
    /// Polygon filled as the torso, in drawing order.
    torso: [BodyPart; 4],
}

impl Skeleton {
    pub fn human() -> Self {
        let bones = POSE_CONNECTIONS
            .iter()
            .map(|&(from, to)| Bone {
                from,
                to,
                kind: bone_kind(from, to),
            })
            .collect();
        Self {
            bones,
            torso: [
                BodyPart::LeftShoulder,
                BodyPart::RightShoulder,
                BodyPart::RightHip,
                BodyPart::LeftHip,
            ],
        }
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn torso(&self) -> &[BodyPart; 4] {
        &self.torso
    }
}

impl Default for Skeleton {
    fn default() -> Self {
        Self::human()
    }
}

fn bone_kind(from: BodyPart, to: BodyPart) -> BoneKind {
    use BodyPart::*;
    let limb = |p: BodyPart| match p {
        LeftElbow | RightElbow | LeftWrist | RightWrist => Some(BoneKind::Arm),
        LeftKnee | RightKnee | LeftAnkle | RightAnkle => Some(BoneKind::Leg),
        _ => None,
    };
    limb(to).or(limb(from)).unwrap_or(BoneKind::Torso)
}

/// Reflects `pose` about the vertical center of a `frame_width` wide frame
/// and swaps left and right parts. Applying it twice restores the input.
pub fn normalize(pose: &Pose, frame_width: u32) -> Pose {
    let width = frame_width as f32;
    Pose {
        keypoints: pose
            .keypoints
            .iter()
            .map(|kp| Keypoint {
                part: kp.part.mirrored(),
                position: Point::new(width - kp.position.x, kp.position.y),
                score: kp.score,
            })
            .collect(),
        score: pose.score,
    }
}

/// Named landmarks of the first detected face, or `None` for an empty list.
pub fn to_face_frame(faces: &[FaceDetection]) -> Option<FaceFrame> {
    let face = faces.first()?;
    let lookup = |index: usize| face.mesh.get(index).copied().unwrap_or_default();
    Some(FaceFrame {
        parts: FacePart::ALL
            .iter()
            .map(|part| lookup(part.mesh_index()))
            .collect(),
        oval: FACE_OVAL.iter().map(|&i| lookup(i)).collect(),
        confidence: face.confidence,
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::types::FACE_MESH_POINTS;

    fn sample_pose() -> Pose {
        Pose {
            keypoints: BodyPart::ALL
                .iter()
                .enumerate()
                .map(|(i, &part)| Keypoint {
                    part,
                    position: Point::new(10.0 + i as f32 * 7.0, 20.0 + i as f32),
                    score: 0.5 + i as f32 * 0.01,
                })
                .collect(),
            score: 0.8,
        }
    }

    #[test]
    fn normalize_mirrors_and_swaps_sides() {
        let pose = sample_pose();
        let mirrored = normalize(&pose, 300);
        let wrist = pose.keypoint(BodyPart::LeftWrist).unwrap();
        let swapped = mirrored.keypoint(BodyPart::RightWrist).unwrap();
        assert_relative_eq!(swapped.position.x, 300.0 - wrist.position.x);
        assert_relative_eq!(swapped.position.y, wrist.position.y);
        assert_relative_eq!(swapped.score, wrist.score);
        let nose = mirrored.keypoint(BodyPart::Nose).unwrap();
        assert_relative_eq!(nose.position.x, 290.0);
    }

    #[test]
    fn normalize_is_an_involution() {
        let pose = sample_pose();
        let twice = normalize(&normalize(&pose, 300), 300);
        assert_eq!(twice, pose);
    }

    #[test]
    fn no_faces_means_no_face_frame() {
        assert!(to_face_frame(&[]).is_none());
    }

    #[test]
    fn face_frame_picks_named_mesh_points() {
        let mesh = (0..FACE_MESH_POINTS)
            .map(|i| Point::new(i as f32, 0.0))
            .collect();
        let faces = [FaceDetection {
            mesh,
            bbox: [0.0; 4],
            confidence: 0.7,
        }];
        let frame = to_face_frame(&faces).unwrap();
        assert_eq!(frame.parts.len(), FacePart::ALL.len());
        assert_relative_eq!(frame.part(FacePart::NoseTip).x, 1.0);
        assert_relative_eq!(frame.part(FacePart::JawMid).x, 152.0);
        assert_eq!(frame.oval.len(), FACE_OVAL.len());
        assert_relative_eq!(frame.confidence, 0.7);
    }

    #[test]
    fn bones_are_classified() {
        let skeleton = Skeleton::human();
        let kinds = |k| skeleton.bones().iter().filter(|b| b.kind == k).count();
        assert_eq!(kinds(BoneKind::Arm), 4);
        assert_eq!(kinds(BoneKind::Leg), 4);
        assert_eq!(kinds(BoneKind::Torso), 4);
    }
}
