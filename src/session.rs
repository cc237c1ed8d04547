use crossbeam_channel::Receiver;

use crate::{
    config::AppConfig,
    error::SessionError,
    model_download::{ModelDownloadEvent, ModelKind, ensure_model_ready},
    pipeline::{
        AvatarAsset, AvatarKind, FaceEstimator, FrameCompositor, FrameLoop, IllustrationEngine,
        LoopHandle, OrtFaceEstimator, OutputCompositor, OutputStream, PoseEstimator,
        PoseNetEstimator, ResourceLedger, Skeleton, TickObserver, load_background,
    },
    types::Frame,
};

/// Source of the estimator collaborators for a session.
pub trait ModelProvider {
    fn load_pose_estimator(&self, config: &AppConfig) -> Result<Box<dyn PoseEstimator>, SessionError>;

    fn load_face_estimator(&self, config: &AppConfig) -> Result<Box<dyn FaceEstimator>, SessionError>;
}

/// ONNX models from [`AppConfig::models`], downloaded first when missing.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrtModels;

fn log_download(event: ModelDownloadEvent) {
    match event {
        ModelDownloadEvent::AlreadyPresent { model } => log::debug!("{model} model present"),
        ModelDownloadEvent::Started { model, total } => {
            log::info!("downloading {model} model ({total:?} bytes)")
        }
        ModelDownloadEvent::Progress { .. } => {}
        ModelDownloadEvent::Finished { model } => log::info!("{model} model ready"),
    }
}

impl ModelProvider for OrtModels {
    fn load_pose_estimator(&self, config: &AppConfig) -> Result<Box<dyn PoseEstimator>, SessionError> {
        let source = &config.models.posenet;
        let load = || {
            ensure_model_ready(ModelKind::PoseNet, source, log_download)?;
            PoseNetEstimator::new(&source.path, config.posenet.clone())
        };
        load()
            .map(|estimator| Box::new(estimator) as Box<dyn PoseEstimator>)
            .map_err(|error| SessionError::ModelLoad {
                kind: ModelKind::PoseNet,
                error,
            })
    }

    fn load_face_estimator(&self, config: &AppConfig) -> Result<Box<dyn FaceEstimator>, SessionError> {
        let models = &config.models;
        for (kind, source) in [
            (ModelKind::FaceDetector, &models.face_detector),
            (ModelKind::FaceMesh, &models.face_mesh),
        ] {
            ensure_model_ready(kind, source, log_download)
                .map_err(|error| SessionError::ModelLoad { kind, error })?;
        }
        OrtFaceEstimator::new(&models.face_detector.path, &models.face_mesh.path, &config.face)
            .map(|estimator| Box::new(estimator) as Box<dyn FaceEstimator>)
            .map_err(|error| SessionError::ModelLoad {
                kind: ModelKind::FaceMesh,
                error,
            })
    }
}

/// A running avatar pipeline. Dropping it stops the frame loop.
pub struct Session {
    avatar: AvatarKind,
    output: OutputStream,
    ledger: ResourceLedger,
    handle: LoopHandle,
}

impl Session {
    /// Loads every asset and model, binds the avatar, then starts the loop.
    ///
    /// Nothing is spawned unless all of that succeeded.
    pub fn start(
        config: &AppConfig,
        frames: Receiver<Frame>,
        models: &dyn ModelProvider,
        mut engine: Box<dyn IllustrationEngine>,
        observer: Option<Box<dyn TickObserver>>,
    ) -> Result<Session, SessionError> {
        let output_cfg = &config.output;
        let background = load_background(&output_cfg.background, output_cfg.width, output_cfg.height)
            .map_err(SessionError::Asset)?;

        let pose_estimator = models.load_pose_estimator(config)?;
        let face_estimator = models.load_face_estimator(config)?;

        engine
            .bind_skeleton(Skeleton::human(), AvatarAsset::for_kind(config.avatar))
            .map_err(SessionError::Asset)?;

        let ledger = ResourceLedger::new();
        let frame_loop = FrameLoop::new(
            FrameCompositor::new(config.capture, ledger.clone()),
            OutputCompositor::new(output_cfg, config.capture, background),
            pose_estimator,
            face_estimator,
            engine,
            config.capture,
        );
        let (output, handle) = frame_loop
            .run(frames, config.frame_interval(), observer)
            .map_err(SessionError::Loop)?;

        log::info!(
            "session started: avatar {}, capture {}x{}, output {}x{} @ {} fps",
            config.avatar,
            config.capture.width,
            config.capture.height,
            output_cfg.width,
            output_cfg.height,
            config.target_fps
        );

        Ok(Session {
            avatar: config.avatar,
            output,
            ledger,
            handle,
        })
    }

    pub fn avatar(&self) -> AvatarKind {
        self.avatar
    }

    pub fn output(&self) -> &OutputStream {
        &self.output
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn stop(self) {
        self.handle.stop();
    }
}
