#[cfg(feature = "camera-nokhwa")]
pub mod camera;
pub mod compositor;
pub mod driver;
pub mod face;
pub mod illustration;
#[cfg(feature = "camera-nokhwa")]
pub mod pixel_format;
pub mod pose;
pub mod skeleton;
pub mod surface;
pub mod tensor;

#[cfg(feature = "camera-nokhwa")]
pub use camera::{CameraDevice, CameraStream, available_cameras, select_camera, start_camera_stream};
pub use compositor::{FrameCompositor, OutputCompositor, load_background};
pub use driver::{FpsMeter, FrameLoop, LoopHandle, OutputStream, TickObserver, TickOutcome, TickReport};
pub use face::{FaceEstimator, OrtFaceEstimator};
pub use illustration::{AvatarAsset, AvatarKind, IllustrationEngine, VectorIllustration};
pub use pose::{PoseEstimator, PoseNetEstimator};
pub use skeleton::{Skeleton, normalize, to_face_frame};
pub use surface::{BlendMode, Surface, Transform};
pub use tensor::{FrameTensor, ResourceLedger};
