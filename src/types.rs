use std::time::Instant;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgba,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    pub fn filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            rgba.extend_from_slice(&color);
        }
        Self::new(rgba, width, height)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_sq(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn distance(&self, other: &Point) -> f32 {
        self.distance_sq(other).sqrt()
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) * 0.5, (self.y + other.y) * 0.5)
    }
}

/// PoseNet keypoints, in model output order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BodyPart {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

pub const NUM_KEYPOINTS: usize = 17;

impl BodyPart {
    pub const ALL: [BodyPart; NUM_KEYPOINTS] = [
        BodyPart::Nose,
        BodyPart::LeftEye,
        BodyPart::RightEye,
        BodyPart::LeftEar,
        BodyPart::RightEar,
        BodyPart::LeftShoulder,
        BodyPart::RightShoulder,
        BodyPart::LeftElbow,
        BodyPart::RightElbow,
        BodyPart::LeftWrist,
        BodyPart::RightWrist,
        BodyPart::LeftHip,
        BodyPart::RightHip,
        BodyPart::LeftKnee,
        BodyPart::RightKnee,
        BodyPart::LeftAnkle,
        BodyPart::RightAnkle,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<BodyPart> {
        Self::ALL.get(index).copied()
    }

    /// The same joint on the other side of the body. Center parts map to themselves.
    pub fn mirrored(self) -> BodyPart {
        match self {
            BodyPart::Nose => BodyPart::Nose,
            BodyPart::LeftEye => BodyPart::RightEye,
            BodyPart::RightEye => BodyPart::LeftEye,
            BodyPart::LeftEar => BodyPart::RightEar,
            BodyPart::RightEar => BodyPart::LeftEar,
            BodyPart::LeftShoulder => BodyPart::RightShoulder,
            BodyPart::RightShoulder => BodyPart::LeftShoulder,
            BodyPart::LeftElbow => BodyPart::RightElbow,
            BodyPart::RightElbow => BodyPart::LeftElbow,
            BodyPart::LeftWrist => BodyPart::RightWrist,
            BodyPart::RightWrist => BodyPart::LeftWrist,
            BodyPart::LeftHip => BodyPart::RightHip,
            BodyPart::RightHip => BodyPart::LeftHip,
            BodyPart::LeftKnee => BodyPart::RightKnee,
            BodyPart::RightKnee => BodyPart::LeftKnee,
            BodyPart::LeftAnkle => BodyPart::RightAnkle,
            BodyPart::RightAnkle => BodyPart::LeftAnkle,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keypoint {
    pub part: BodyPart,
    pub position: Point,
    pub score: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pose {
    pub keypoints: Vec<Keypoint>,
    pub score: f32,
}

impl Pose {
    pub fn keypoint(&self, part: BodyPart) -> Option<&Keypoint> {
        self.keypoints.iter().find(|kp| kp.part == part)
    }

    /// Position of `part` if it was detected with at least `min_score`.
    pub fn confident(&self, part: BodyPart, min_score: f32) -> Option<Point> {
        self.keypoint(part)
            .filter(|kp| kp.score >= min_score)
            .map(|kp| kp.position)
    }

    pub fn scaled(mut self, sx: f32, sy: f32) -> Pose {
        for kp in &mut self.keypoints {
            kp.position.x *= sx;
            kp.position.y *= sy;
        }
        self
    }
}

/// Raw face-mesh output for one face, in frame pixels.
#[derive(Clone, Debug)]
pub struct FaceDetection {
    pub mesh: Vec<Point>,
    pub bbox: [f32; 4],
    pub confidence: f32,
}

pub const FACE_MESH_POINTS: usize = 468;

/// Named facial landmarks driving the avatar's expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FacePart {
    TopMid,
    JawMid,
    RightCheek,
    LeftCheek,
    RightJaw,
    LeftJaw,
    RightBrowOuter,
    RightBrowMid,
    RightBrowInner,
    LeftBrowInner,
    LeftBrowMid,
    LeftBrowOuter,
    RightEyeOuter,
    RightEyeTop,
    RightEyeInner,
    RightEyeBottom,
    LeftEyeInner,
    LeftEyeTop,
    LeftEyeOuter,
    LeftEyeBottom,
    NoseBridge,
    NoseTip,
    RightNostril,
    LeftNostril,
    RightMouthCorner,
    UpperLipTop,
    UpperLipInner,
    LowerLipInner,
    LowerLipBottom,
    LeftMouthCorner,
}

impl FacePart {
    pub const ALL: [FacePart; 30] = [
        FacePart::TopMid,
        FacePart::JawMid,
        FacePart::RightCheek,
        FacePart::LeftCheek,
        FacePart::RightJaw,
        FacePart::LeftJaw,
        FacePart::RightBrowOuter,
        FacePart::RightBrowMid,
        FacePart::RightBrowInner,
        FacePart::LeftBrowInner,
        FacePart::LeftBrowMid,
        FacePart::LeftBrowOuter,
        FacePart::RightEyeOuter,
        FacePart::RightEyeTop,
        FacePart::RightEyeInner,
        FacePart::RightEyeBottom,
        FacePart::LeftEyeInner,
        FacePart::LeftEyeTop,
        FacePart::LeftEyeOuter,
        FacePart::LeftEyeBottom,
        FacePart::NoseBridge,
        FacePart::NoseTip,
        FacePart::RightNostril,
        FacePart::LeftNostril,
        FacePart::RightMouthCorner,
        FacePart::UpperLipTop,
        FacePart::UpperLipInner,
        FacePart::LowerLipInner,
        FacePart::LowerLipBottom,
        FacePart::LeftMouthCorner,
    ];

    /// Index of this part in the 468-point face mesh.
    pub fn mesh_index(self) -> usize {
        match self {
            FacePart::TopMid => 10,
            FacePart::JawMid => 152,
            FacePart::RightCheek => 234,
            FacePart::LeftCheek => 454,
            FacePart::RightJaw => 172,
            FacePart::LeftJaw => 397,
            FacePart::RightBrowOuter => 70,
            FacePart::RightBrowMid => 105,
            FacePart::RightBrowInner => 107,
            FacePart::LeftBrowInner => 336,
            FacePart::LeftBrowMid => 334,
            FacePart::LeftBrowOuter => 300,
            FacePart::RightEyeOuter => 33,
            FacePart::RightEyeTop => 159,
            FacePart::RightEyeInner => 133,
            FacePart::RightEyeBottom => 145,
            FacePart::LeftEyeInner => 362,
            FacePart::LeftEyeTop => 386,
            FacePart::LeftEyeOuter => 263,
            FacePart::LeftEyeBottom => 374,
            FacePart::NoseBridge => 6,
            FacePart::NoseTip => 1,
            FacePart::RightNostril => 48,
            FacePart::LeftNostril => 278,
            FacePart::RightMouthCorner => 61,
            FacePart::UpperLipTop => 0,
            FacePart::UpperLipInner => 13,
            FacePart::LowerLipInner => 14,
            FacePart::LowerLipBottom => 17,
            FacePart::LeftMouthCorner => 291,
        }
    }
}

/// Face-mesh indices tracing the face outline, clockwise from the forehead.
pub const FACE_OVAL: [usize; 36] = [
    10, 338, 297, 332, 284, 251, 389, 356, 454, 323, 361, 288, 397, 365, 379, 378, 400, 377, 152,
    148, 176, 149, 150, 136, 172, 58, 132, 93, 234, 127, 162, 21, 54, 103, 67, 109,
];

#[derive(Clone, Debug, PartialEq)]
pub struct FaceFrame {
    /// One position per entry of [`FacePart::ALL`].
    pub parts: Vec<Point>,
    pub oval: Vec<Point>,
    pub confidence: f32,
}

impl FaceFrame {
    pub fn part(&self, part: FacePart) -> Point {
        self.parts.get(part as usize).copied().unwrap_or_default()
    }
}

#[derive(Clone, Debug)]
pub struct OutputFrame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u64,
    pub timestamp: Instant,
}
