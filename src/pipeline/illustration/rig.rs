use crate::types::{BodyPart, FaceFrame, NUM_KEYPOINTS, Point, Pose};

const HEAD_FROM_EARS: f32 = 0.62;
const HEAD_FROM_EYES: f32 = 1.25;
const HEAD_FROM_SHOULDERS: f32 = 0.32;

/// Head placement derived from the current rig state.
#[derive(Clone, Debug, PartialEq)]
pub enum Head {
    /// Face-mesh outline in frame pixels.
    Outline(Vec<Point>),
    /// Disc estimated from pose keypoints alone.
    Disc { center: Point, radius: f32 },
}

impl Head {
    pub fn center(&self) -> Point {
        match self {
            Head::Disc { center, .. } => *center,
            Head::Outline(points) => {
                let n = points.len().max(1) as f32;
                let (sx, sy) = points
                    .iter()
                    .fold((0.0, 0.0), |acc, p| (acc.0 + p.x, acc.1 + p.y));
                Point::new(sx / n, sy / n)
            }
        }
    }

    /// Half the larger extent of the head.
    pub fn radius(&self) -> f32 {
        match self {
            Head::Disc { radius, .. } => *radius,
            Head::Outline(points) => {
                let center = self.center();
                points
                    .iter()
                    .map(|p| p.distance(&center))
                    .fold(0.0, f32::max)
            }
        }
    }
}

/// Joint positions and face of the bound character for the current tick.
#[derive(Clone, Debug, Default)]
pub struct Rig {
    joints: [Option<Point>; NUM_KEYPOINTS],
    face: Option<FaceFrame>,
}

impl Rig {
    /// Replaces the rig state. Joints scored below `min_score` become absent.
    pub fn update(&mut self, pose: &Pose, face: Option<&FaceFrame>, min_score: f32) {
        self.joints = [None; NUM_KEYPOINTS];
        for kp in &pose.keypoints {
            if kp.score >= min_score && kp.position.x.is_finite() && kp.position.y.is_finite() {
                self.joints[kp.part.index()] = Some(kp.position);
            }
        }
        self.face = face.cloned();
    }

    pub fn joint(&self, part: BodyPart) -> Option<Point> {
        self.joints[part.index()]
    }

    pub fn face(&self) -> Option<&FaceFrame> {
        self.face.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.iter().all(Option::is_none)
    }

    pub fn head(&self) -> Option<Head> {
        if let Some(face) = &self.face {
            if face.oval.len() >= 3 {
                return Some(Head::Outline(face.oval.clone()));
            }
        }

        let pair = |a: BodyPart, b: BodyPart| Some((self.joint(a)?, self.joint(b)?));
        let eyes = pair(BodyPart::LeftEye, BodyPart::RightEye);
        let center = self
            .joint(BodyPart::Nose)
            .or_else(|| eyes.map(|(l, r)| l.midpoint(&r)))?;

        let radius = if let Some((l, r)) = pair(BodyPart::LeftEar, BodyPart::RightEar) {
            l.distance(&r) * HEAD_FROM_EARS
        } else if let Some((l, r)) = eyes {
            l.distance(&r) * HEAD_FROM_EYES
        } else if let Some((l, r)) = pair(BodyPart::LeftShoulder, BodyPart::RightShoulder) {
            l.distance(&r) * HEAD_FROM_SHOULDERS
        } else {
            return None;
        };

        (radius > 0.0).then_some(Head::Disc { center, radius })
    }

    /// Where the neck meets the shoulders.
    pub fn neck_base(&self) -> Option<Point> {
        let left = self.joint(BodyPart::LeftShoulder)?;
        let right = self.joint(BodyPart::RightShoulder)?;
        Some(left.midpoint(&right))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::types::Keypoint;

    fn pose(parts: &[(BodyPart, f32, f32, f32)]) -> Pose {
        Pose {
            keypoints: parts
                .iter()
                .map(|&(part, x, y, score)| Keypoint {
                    part,
                    position: Point::new(x, y),
                    score,
                })
                .collect(),
            score: 0.9,
        }
    }

    #[test]
    fn low_confidence_joints_are_dropped() {
        let mut rig = Rig::default();
        rig.update(
            &pose(&[
                (BodyPart::Nose, 10.0, 10.0, 0.9),
                (BodyPart::LeftWrist, 20.0, 20.0, 0.05),
            ]),
            None,
            0.1,
        );
        assert!(rig.joint(BodyPart::Nose).is_some());
        assert!(rig.joint(BodyPart::LeftWrist).is_none());
    }

    #[test]
    fn head_disc_is_sized_from_ears() {
        let mut rig = Rig::default();
        rig.update(
            &pose(&[
                (BodyPart::Nose, 100.0, 50.0, 0.9),
                (BodyPart::LeftEar, 120.0, 50.0, 0.9),
                (BodyPart::RightEar, 80.0, 50.0, 0.9),
            ]),
            None,
            0.1,
        );
        let head = rig.head().unwrap();
        assert_relative_eq!(head.radius(), 40.0 * HEAD_FROM_EARS);
        assert_relative_eq!(head.center().x, 100.0);
    }

    #[test]
    fn face_outline_takes_precedence() {
        let face = FaceFrame {
            parts: Vec::new(),
            oval: vec![
                Point::new(0.0, 0.0),
                Point::new(10.0, 0.0),
                Point::new(10.0, 10.0),
                Point::new(0.0, 10.0),
            ],
            confidence: 0.9,
        };
        let mut rig = Rig::default();
        rig.update(&pose(&[(BodyPart::Nose, 100.0, 50.0, 0.9)]), Some(&face), 0.1);
        let head = rig.head().unwrap();
        assert!(matches!(head, Head::Outline(_)));
        assert_relative_eq!(head.center().x, 5.0);
    }

    #[test]
    fn no_head_without_face_keypoints() {
        let mut rig = Rig::default();
        rig.update(&pose(&[(BodyPart::LeftKnee, 1.0, 1.0, 0.9)]), None, 0.1);
        assert!(rig.head().is_none());
        assert!(rig.neck_base().is_none());
        assert!(!rig.is_empty());
    }
}
