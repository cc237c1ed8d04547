use std::{env, path::PathBuf, str::FromStr, time::Duration};

use crate::{
    error::SessionError,
    pipeline::illustration::AvatarKind,
};

pub const DEFAULT_CAPTURE_SIZE: (u32, u32) = (300, 300);
pub const DEFAULT_OUTPUT_SIZE: (u32, u32) = (1280, 760);
pub const DEFAULT_TARGET_FPS: u32 = 60;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub camera_index: u32,
    pub avatar: AvatarKind,
    pub capture: CaptureConfig,
    pub posenet: PoseNetConfig,
    pub face: FaceConfig,
    pub output: OutputConfig,
    pub models: ModelSources,
    pub target_fps: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            avatar: AvatarKind::default(),
            capture: CaptureConfig::default(),
            posenet: PoseNetConfig::default(),
            face: FaceConfig::default(),
            output: OutputConfig::default(),
            models: ModelSources::in_dir(PathBuf::from("models")),
            target_fps: DEFAULT_TARGET_FPS,
        }
    }
}

impl AppConfig {
    /// Defaults overridden by `AVATAR_*` environment variables.
    pub fn from_env() -> Result<Self, SessionError> {
        let mut cfg = Self::default();

        if let Some(index) = parse_var::<u32>("AVATAR_CAMERA_INDEX")? {
            cfg.camera_index = index;
        }
        if let Ok(name) = env::var("AVATAR_NAME") {
            cfg.avatar = AvatarKind::from_name(&name).ok_or_else(|| {
                SessionError::Config(format!(
                    "unknown avatar {name:?}, expected one of {}",
                    AvatarKind::names().join(", ")
                ))
            })?;
        }
        if let Ok(path) = env::var("AVATAR_BACKGROUND") {
            cfg.output.background = BackgroundSource::File(PathBuf::from(path));
        }
        if let Ok(dir) = env::var("AVATAR_MODEL_DIR") {
            let urls = cfg.models.clone();
            cfg.models = ModelSources::in_dir(PathBuf::from(dir));
            cfg.models.posenet.url = urls.posenet.url;
            cfg.models.face_detector.url = urls.face_detector.url;
            cfg.models.face_mesh.url = urls.face_mesh.url;
        }
        if let Ok(url) = env::var("AVATAR_POSENET_URL") {
            cfg.models.posenet.url = Some(url);
        }
        if let Ok(url) = env::var("AVATAR_FACE_DETECTOR_URL") {
            cfg.models.face_detector.url = Some(url);
        }
        if let Ok(url) = env::var("AVATAR_FACE_MESH_URL") {
            cfg.models.face_mesh.url = Some(url);
        }
        if let Some(fps) = parse_var::<u32>("AVATAR_TARGET_FPS")? {
            if fps == 0 {
                return Err(SessionError::Config(
                    "AVATAR_TARGET_FPS must be positive".to_string(),
                ));
            }
            cfg.target_fps = fps;
        }

        Ok(cfg)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.target_fps.max(1)))
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, SessionError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| SessionError::Config(format!("invalid value {raw:?} for {name}"))),
        Err(_) => Ok(None),
    }
}

/// Resolution the camera image is mirrored into before estimation.
#[derive(Clone, Copy, Debug)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_CAPTURE_SIZE.0,
            height: DEFAULT_CAPTURE_SIZE.1,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PoseNetConfig {
    pub architecture: String,
    pub output_stride: u32,
    pub input_resolution: u32,
    pub multiplier: f32,
    pub quant_bytes: u8,
    pub min_part_confidence: f32,
    pub nms_radius: f32,
    pub max_detections: usize,
}

impl Default for PoseNetConfig {
    fn default() -> Self {
        Self {
            architecture: "MobileNetV1".to_string(),
            output_stride: 16,
            input_resolution: 200,
            multiplier: 0.75,
            quant_bytes: 2,
            min_part_confidence: 0.1,
            nms_radius: 30.0,
            max_detections: 1,
        }
    }
}

impl PoseNetConfig {
    /// Largest resolution not above the requested one that the stride divides evenly.
    pub fn valid_input_resolution(&self) -> u32 {
        let stride = self.output_stride.max(1);
        (self.input_resolution / stride) * stride + 1
    }
}

#[derive(Clone, Debug)]
pub struct FaceConfig {
    pub detector_score_threshold: f32,
    pub detector_nms_threshold: f32,
    pub mesh_confidence_threshold: f32,
    pub max_faces: usize,
    /// Crop side relative to the detected face box.
    pub crop_scale: f32,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            detector_score_threshold: 0.75,
            detector_nms_threshold: 0.3,
            mesh_confidence_threshold: 0.5,
            max_faces: 1,
            crop_scale: 1.6,
        }
    }
}

#[derive(Clone, Debug)]
pub enum BackgroundSource {
    File(PathBuf),
    Gradient { top: [u8; 4], bottom: [u8; 4] },
}

#[derive(Clone, Debug)]
pub struct OutputConfig {
    pub width: u32,
    pub height: u32,
    pub background: BackgroundSource,
    pub correction: CorrectionConfig,
    /// Clear the character on ticks without a pose instead of keeping the last drawing.
    pub clear_without_pose: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        let bundled = PathBuf::from("resources").join("background.jpg");
        let background = if bundled.exists() {
            BackgroundSource::File(bundled)
        } else {
            BackgroundSource::Gradient {
                top: [186, 220, 246, 255],
                bottom: [244, 236, 214, 255],
            }
        };

        Self {
            width: DEFAULT_OUTPUT_SIZE.0,
            height: DEFAULT_OUTPUT_SIZE.1,
            background,
            correction: CorrectionConfig::default(),
            clear_without_pose: true,
        }
    }
}

/// Hand-tuned placement of the character on the output surface.
///
/// This is an approximation: it is not derived from the measured bounds of
/// the rig, it only anchors a capture-sized drawing inside the output frame.
#[derive(Clone, Copy, Debug)]
pub struct CorrectionConfig {
    pub scale: CorrectionScale,
    pub pivot: (f32, f32),
}

#[derive(Clone, Copy, Debug)]
pub enum CorrectionScale {
    /// `output_height / capture_width` horizontally, `output_height / capture_height` vertically.
    OutputHeightOverCapture,
    Fixed { sx: f32, sy: f32 },
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            scale: CorrectionScale::OutputHeightOverCapture,
            pivot: (-150.0, 0.0),
        }
    }
}

impl CorrectionConfig {
    pub fn scale_factors(&self, output_height: u32, capture_width: u32, capture_height: u32) -> (f32, f32) {
        match self.scale {
            CorrectionScale::OutputHeightOverCapture => (
                output_height as f32 / capture_width.max(1) as f32,
                output_height as f32 / capture_height.max(1) as f32,
            ),
            CorrectionScale::Fixed { sx, sy } => (sx, sy),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ModelSource {
    pub path: PathBuf,
    pub url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ModelSources {
    pub posenet: ModelSource,
    pub face_detector: ModelSource,
    pub face_mesh: ModelSource,
}

pub const POSENET_MODEL_FILENAME: &str = "posenet_mobilenet_v1_075_stride16.onnx";
pub const FACE_DETECTOR_MODEL_FILENAME: &str = "face_detection_short_range.onnx";
pub const FACE_MESH_MODEL_FILENAME: &str = "face_landmark.onnx";

impl ModelSources {
    pub fn in_dir(dir: PathBuf) -> Self {
        Self {
            posenet: ModelSource {
                path: dir.join(POSENET_MODEL_FILENAME),
                url: None,
            },
            face_detector: ModelSource {
                path: dir.join(FACE_DETECTOR_MODEL_FILENAME),
                url: None,
            },
            face_mesh: ModelSource {
                path: dir.join(FACE_MESH_MODEL_FILENAME),
                url: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posenet_resolution_snaps_to_stride() {
        let cfg = PoseNetConfig::default();
        assert_eq!(cfg.valid_input_resolution(), 193);
    }

    #[test]
    fn default_correction_maps_capture_height_to_output_height() {
        let cfg = CorrectionConfig::default();
        let (sx, sy) = cfg.scale_factors(760, 300, 300);
        assert!((sx - 760.0 / 300.0).abs() < 1e-6);
        assert!((sy - 760.0 / 300.0).abs() < 1e-6);

        let fixed = CorrectionConfig {
            scale: CorrectionScale::Fixed { sx: 2.0, sy: 3.0 },
            pivot: (0.0, 0.0),
        };
        assert_eq!(fixed.scale_factors(760, 300, 300), (2.0, 3.0));
    }

    #[test]
    fn frame_interval_follows_target_fps() {
        let cfg = AppConfig {
            target_fps: 50,
            ..AppConfig::default()
        };
        assert_eq!(cfg.frame_interval(), Duration::from_millis(20));
    }
}
