mod avatar;
mod rig;

use anyhow::{Result, anyhow};

pub use avatar::{AvatarAsset, AvatarKind, Ears};
pub use rig::{Head, Rig};

use super::{
    skeleton::{BoneKind, Skeleton},
    surface::{Rgba, Surface},
};
use crate::types::{BodyPart, FaceFrame, FacePart, Point, Pose};

/// Width the asset proportions are authored for.
const REFERENCE_WIDTH: f32 = 300.0;
const HAND_RADIUS: f32 = 0.7;
const NECK_WIDTH: f32 = 0.9;
const EYE_DOT: f32 = 0.12;

/// Renders a rigged character driven by pose and face data.
pub trait IllustrationEngine: Send {
    /// Binds the character once per session.
    fn bind_skeleton(&mut self, skeleton: Skeleton, asset: AvatarAsset) -> Result<()>;

    fn update_skeleton(&mut self, pose: &Pose, face: Option<&FaceFrame>);

    /// Draws the current rig using the surface's current transform.
    fn draw(&mut self, surface: &mut Surface, frame_width: u32, frame_height: u32);
}

/// Flat-shaded vector character built from strokes and filled shapes.
pub struct VectorIllustration {
    binding: Option<(Skeleton, AvatarAsset)>,
    rig: Rig,
    min_part_confidence: f32,
}

impl VectorIllustration {
    pub fn new(min_part_confidence: f32) -> Self {
        Self {
            binding: None,
            rig: Rig::default(),
            min_part_confidence,
        }
    }

    pub fn rig(&self) -> &Rig {
        &self.rig
    }

    pub fn asset(&self) -> Option<&AvatarAsset> {
        self.binding.as_ref().map(|(_, asset)| asset)
    }
}

impl IllustrationEngine for VectorIllustration {
    fn bind_skeleton(&mut self, skeleton: Skeleton, asset: AvatarAsset) -> Result<()> {
        if let Some((_, bound)) = &self.binding {
            return Err(anyhow!("illustration already bound to {}", bound.kind));
        }
        log::info!(
            "illustration bound to {} ({} bones)",
            asset.kind,
            skeleton.bones().len()
        );
        self.binding = Some((skeleton, asset));
        Ok(())
    }

    fn update_skeleton(&mut self, pose: &Pose, face: Option<&FaceFrame>) {
        self.rig.update(pose, face, self.min_part_confidence);
    }

    fn draw(&mut self, surface: &mut Surface, frame_width: u32, _frame_height: u32) {
        let Some((skeleton, asset)) = &self.binding else {
            log::debug!("draw skipped, no skeleton bound");
            return;
        };
        if self.rig.is_empty() {
            return;
        }
        let unit = frame_width.max(1) as f32 / REFERENCE_WIDTH;
        let painter = Painter {
            rig: &self.rig,
            asset,
            unit,
        };
        painter.body(surface, skeleton);
        painter.head(surface);
    }
}

struct Painter<'a> {
    rig: &'a Rig,
    asset: &'a AvatarAsset,
    unit: f32,
}

impl Painter<'_> {
    fn body(&self, surface: &mut Surface, skeleton: &Skeleton) {
        let a = self.asset;
        let limb_width = |kind: BoneKind| {
            let width = match kind {
                BoneKind::Arm | BoneKind::Torso => a.arm_width,
                BoneKind::Leg => a.leg_width,
            };
            width * self.unit
        };

        for (p0, p1) in self.segments(skeleton, BoneKind::Leg) {
            self.outlined_line(surface, p0, p1, limb_width(BoneKind::Leg), a.pants);
        }

        let torso: Option<Vec<Point>> = skeleton
            .torso()
            .iter()
            .map(|&part| self.rig.joint(part))
            .collect();
        match torso {
            Some(corners) => {
                if a.outline_width > 0.0 {
                    let mut closed = corners.clone();
                    closed.push(corners[0]);
                    surface.stroke_path(&closed, a.outline_width * 2.0 * self.unit, a.outline);
                }
                surface.fill_polygon(&corners, a.shirt);
            }
            None => {
                for (p0, p1) in self.segments(skeleton, BoneKind::Torso) {
                    self.outlined_line(surface, p0, p1, limb_width(BoneKind::Torso), a.shirt);
                }
            }
        }

        if let (Some(neck), Some(head)) = (self.rig.neck_base(), self.rig.head()) {
            surface.stroke_line(neck, head.center(), a.arm_width * NECK_WIDTH * self.unit, a.skin);
        }

        for (p0, p1) in self.segments(skeleton, BoneKind::Arm) {
            self.outlined_line(surface, p0, p1, limb_width(BoneKind::Arm), a.shirt);
        }
        for wrist in [BodyPart::LeftWrist, BodyPart::RightWrist] {
            if let Some(p) = self.rig.joint(wrist) {
                surface.fill_circle(p, a.arm_width * HAND_RADIUS * self.unit, a.skin);
            }
        }
    }

    fn segments<'s>(
        &'s self,
        skeleton: &'s Skeleton,
        kind: BoneKind,
    ) -> impl Iterator<Item = (Point, Point)> + 's {
        let rig = self.rig;
        skeleton
            .bones()
            .iter()
            .filter(move |b| b.kind == kind)
            .filter_map(move |b| Some((rig.joint(b.from)?, rig.joint(b.to)?)))
    }

    fn outlined_line(&self, surface: &mut Surface, p0: Point, p1: Point, width: f32, color: Rgba) {
        if self.asset.outline_width > 0.0 {
            let outer = width + self.asset.outline_width * 2.0 * self.unit;
            surface.stroke_line(p0, p1, outer, self.asset.outline);
        }
        surface.stroke_line(p0, p1, width, color);
    }

    fn head(&self, surface: &mut Surface) {
        let Some(head) = self.rig.head() else {
            return;
        };
        let a = self.asset;
        let center = head.center();
        let radius = head.radius();

        match a.ears {
            Ears::None => {}
            Ears::Round => {
                for side in [-1.0, 1.0] {
                    let ear = Point::new(center.x + side * radius * 0.8, center.y - radius * 0.8);
                    surface.fill_circle(ear, radius * 0.35, a.outline);
                    surface.fill_circle(ear, radius * 0.25, a.skin);
                }
            }
            Ears::Pointed => {
                for side in [-1.0, 1.0] {
                    surface.fill_polygon(
                        &[
                            Point::new(center.x + side * radius * 0.3, center.y - radius * 0.8),
                            Point::new(center.x + side * radius * 0.9, center.y - radius * 1.3),
                            Point::new(center.x + side * radius * 0.8, center.y - radius * 0.3),
                        ],
                        a.outline,
                    );
                }
            }
        }

        match &head {
            Head::Outline(oval) => {
                if a.outline_width > 0.0 {
                    let mut closed = oval.clone();
                    closed.push(oval[0]);
                    surface.stroke_path(&closed, a.outline_width * 2.0 * self.unit, a.outline);
                }
                surface.fill_polygon(oval, a.skin);
            }
            Head::Disc { center, radius } => {
                if a.outline_width > 0.0 {
                    surface.fill_circle(*center, radius + a.outline_width * self.unit, a.outline);
                }
                surface.fill_circle(*center, *radius, a.skin);
            }
        }

        if let Some(hair) = a.hair {
            let cap: Vec<Point> = (0..=16)
                .map(|i| {
                    let t = std::f32::consts::PI * (1.0 + i as f32 / 16.0);
                    Point::new(center.x + radius * t.cos(), center.y + radius * 0.95 * t.sin())
                })
                .collect();
            let mut shape = cap;
            shape.push(Point::new(center.x + radius, center.y - radius * 0.45));
            shape.push(Point::new(center.x - radius, center.y - radius * 0.45));
            surface.fill_polygon(&shape, hair);
        }

        match self.rig.face() {
            Some(face) => self.expression(surface, face),
            None => self.neutral_expression(surface, center, radius),
        }
    }

    /// Eyes, brows and mouth from tracked face parts.
    fn expression(&self, surface: &mut Surface, face: &FaceFrame) {
        let a = self.asset;
        let line = (1.5 * self.unit).max(1.0);
        let eyes = [
            (
                FacePart::RightEyeOuter,
                FacePart::RightEyeInner,
                FacePart::RightEyeTop,
                FacePart::RightEyeBottom,
            ),
            (
                FacePart::LeftEyeOuter,
                FacePart::LeftEyeInner,
                FacePart::LeftEyeTop,
                FacePart::LeftEyeBottom,
            ),
        ];
        for (outer, inner, top, bottom) in eyes {
            let (outer, inner) = (face.part(outer), face.part(inner));
            let center = outer.midpoint(&inner);
            let rx = outer.distance(&inner) * 0.3;
            let ry = face.part(top).distance(&face.part(bottom)) * 0.5;
            if ry < line {
                surface.stroke_line(outer, inner, line, a.eye);
            } else {
                surface.fill_ellipse(center, rx, ry, a.eye);
            }
            if let Some(frame) = a.glasses {
                let rim = outer.distance(&inner) * 0.75;
                surface.stroke_path(&ring(center, rim, rim * 0.8), line * 1.5, frame);
            }
        }
        if let Some(frame) = a.glasses {
            surface.stroke_line(
                face.part(FacePart::RightEyeInner),
                face.part(FacePart::LeftEyeInner),
                line * 1.5,
                frame,
            );
        }

        for brow in [
            [FacePart::RightBrowOuter, FacePart::RightBrowMid, FacePart::RightBrowInner],
            [FacePart::LeftBrowInner, FacePart::LeftBrowMid, FacePart::LeftBrowOuter],
        ] {
            let points: Vec<Point> = brow.iter().map(|&p| face.part(p)).collect();
            surface.stroke_path(&points, line * 1.5, a.hair.unwrap_or(a.outline));
        }

        let gap = face
            .part(FacePart::UpperLipInner)
            .distance(&face.part(FacePart::LowerLipInner));
        if gap > line {
            surface.fill_polygon(
                &[
                    face.part(FacePart::RightMouthCorner),
                    face.part(FacePart::UpperLipInner),
                    face.part(FacePart::LeftMouthCorner),
                    face.part(FacePart::LowerLipInner),
                ],
                a.mouth,
            );
        } else {
            surface.stroke_path(
                &[
                    face.part(FacePart::RightMouthCorner),
                    face.part(FacePart::UpperLipInner),
                    face.part(FacePart::LeftMouthCorner),
                ],
                line,
                a.mouth,
            );
        }
        surface.fill_circle(face.part(FacePart::NoseTip), line, a.outline);
    }

    fn neutral_expression(&self, surface: &mut Surface, center: Point, radius: f32) {
        let a = self.asset;
        let eye_y = center.y - radius * 0.15;
        let eyes = [BodyPart::RightEye, BodyPart::LeftEye].map(|part| {
            self.rig.joint(part).unwrap_or_else(|| {
                let side = if part == BodyPart::RightEye { -1.0 } else { 1.0 };
                Point::new(center.x + side * radius * 0.35, eye_y)
            })
        });
        for eye in eyes {
            surface.fill_circle(eye, radius * EYE_DOT, a.eye);
            if let Some(frame) = a.glasses {
                surface.stroke_path(&ring(eye, radius * 0.3, radius * 0.25), radius * 0.06, frame);
            }
        }
        let mouth_y = center.y + radius * 0.45;
        surface.stroke_line(
            Point::new(center.x - radius * 0.25, mouth_y),
            Point::new(center.x + radius * 0.25, mouth_y),
            radius * 0.08,
            a.mouth,
        );
    }
}

fn ring(center: Point, rx: f32, ry: f32) -> Vec<Point> {
    (0..=24)
        .map(|i| {
            let t = i as f32 / 24.0 * std::f32::consts::TAU;
            Point::new(center.x + rx * t.cos(), center.y + ry * t.sin())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Keypoint;

    fn standing_pose() -> Pose {
        let joints = [
            (BodyPart::Nose, 150.0, 60.0),
            (BodyPart::LeftEye, 160.0, 52.0),
            (BodyPart::RightEye, 140.0, 52.0),
            (BodyPart::LeftEar, 172.0, 58.0),
            (BodyPart::RightEar, 128.0, 58.0),
            (BodyPart::LeftShoulder, 190.0, 120.0),
            (BodyPart::RightShoulder, 110.0, 120.0),
            (BodyPart::LeftElbow, 210.0, 170.0),
            (BodyPart::RightElbow, 90.0, 170.0),
            (BodyPart::LeftWrist, 220.0, 215.0),
            (BodyPart::RightWrist, 80.0, 215.0),
            (BodyPart::LeftHip, 175.0, 220.0),
            (BodyPart::RightHip, 125.0, 220.0),
        ];
        Pose {
            keypoints: joints
                .iter()
                .map(|&(part, x, y)| Keypoint {
                    part,
                    position: Point::new(x, y),
                    score: 0.9,
                })
                .collect(),
            score: 0.9,
        }
    }

    fn bound_engine(kind: AvatarKind) -> VectorIllustration {
        let mut engine = VectorIllustration::new(0.1);
        engine
            .bind_skeleton(Skeleton::human(), AvatarAsset::for_kind(kind))
            .unwrap();
        engine
    }

    #[test]
    fn second_binding_is_rejected() {
        let mut engine = bound_engine(AvatarKind::Boy);
        let again = engine.bind_skeleton(Skeleton::human(), AvatarAsset::for_kind(AvatarKind::Girl));
        assert!(again.is_err());
        assert_eq!(engine.asset().unwrap().kind, AvatarKind::Boy);
    }

    #[test]
    fn pose_without_face_draws_character() {
        let mut engine = bound_engine(AvatarKind::Glasses);
        engine.update_skeleton(&standing_pose(), None);
        let mut surface = Surface::new(300, 300);
        engine.draw(&mut surface, 300, 300);

        let shirt = AvatarAsset::for_kind(AvatarKind::Glasses).shirt;
        assert_eq!(surface.pixel(150, 170), shirt);
        assert_ne!(surface.pixel(150, 60), [0, 0, 0, 0]);
        assert_eq!(surface.pixel(5, 5), [0, 0, 0, 0]);
    }

    #[test]
    fn every_avatar_draws_with_a_face() {
        let oval: Vec<Point> = (0..36)
            .map(|i| {
                let t = i as f32 / 36.0 * std::f32::consts::TAU;
                Point::new(150.0 + 25.0 * t.cos(), 55.0 + 30.0 * t.sin())
            })
            .collect();
        let parts = FacePart::ALL
            .iter()
            .enumerate()
            .map(|(i, _)| Point::new(140.0 + (i % 5) as f32 * 5.0, 45.0 + (i / 5) as f32 * 4.0))
            .collect();
        let face = FaceFrame {
            parts,
            oval,
            confidence: 0.9,
        };

        for kind in AvatarKind::ALL {
            let mut engine = bound_engine(kind);
            engine.update_skeleton(&standing_pose(), Some(&face));
            let mut surface = Surface::new(300, 300);
            engine.draw(&mut surface, 300, 300);
            assert_ne!(surface.pixel(150, 80), [0, 0, 0, 0], "{kind} head missing");
        }
    }

    #[test]
    fn unbound_engine_draws_nothing() {
        let mut engine = VectorIllustration::new(0.1);
        engine.update_skeleton(&standing_pose(), None);
        let mut surface = Surface::new(50, 50);
        engine.draw(&mut surface, 50, 50);
        assert!(surface.pixels().iter().all(|&b| b == 0));
    }
}
