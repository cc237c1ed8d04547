use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, anyhow};
use avatar_stream::{
    AppConfig, ModelProvider, OrtModels, Session, SessionError, TickError,
    config::{BackgroundSource, CaptureConfig, CorrectionConfig, CorrectionScale, OutputConfig},
    model_download::ModelKind,
    pipeline::{
        AvatarAsset, FaceEstimator, FrameCompositor, FrameLoop, IllustrationEngine,
        OutputCompositor, PoseEstimator, ResourceLedger, Skeleton, Surface, TickObserver,
        TickOutcome, TickReport, VectorIllustration, load_background,
    },
    types::{BodyPart, FACE_MESH_POINTS, FaceDetection, FaceFrame, Frame, Keypoint, Point, Pose},
};
use crossbeam_channel::bounded;

const CAPTURE: CaptureConfig = CaptureConfig {
    width: 60,
    height: 60,
};

fn output_config() -> OutputConfig {
    OutputConfig {
        width: 80,
        height: 60,
        background: BackgroundSource::Gradient {
            top: [10, 20, 200, 255],
            bottom: [200, 180, 20, 255],
        },
        correction: CorrectionConfig {
            scale: CorrectionScale::Fixed { sx: 1.0, sy: 1.0 },
            pivot: (0.0, 0.0),
        },
        clear_without_pose: true,
    }
}

fn camera_frame() -> Frame {
    Frame::filled(120, 90, [90, 90, 90, 255])
}

/// A pose in camera pixels that covers most of a 120x90 frame.
fn standing_pose() -> Pose {
    let joints = [
        (BodyPart::Nose, 60.0, 15.0),
        (BodyPart::LeftEye, 64.0, 12.0),
        (BodyPart::RightEye, 56.0, 12.0),
        (BodyPart::LeftEar, 68.0, 14.0),
        (BodyPart::RightEar, 52.0, 14.0),
        (BodyPart::LeftShoulder, 75.0, 30.0),
        (BodyPart::RightShoulder, 45.0, 30.0),
        (BodyPart::LeftElbow, 85.0, 45.0),
        (BodyPart::RightElbow, 35.0, 45.0),
        (BodyPart::LeftWrist, 90.0, 60.0),
        (BodyPart::RightWrist, 30.0, 60.0),
        (BodyPart::LeftHip, 70.0, 60.0),
        (BodyPart::RightHip, 50.0, 60.0),
        (BodyPart::LeftKnee, 70.0, 75.0),
        (BodyPart::RightKnee, 50.0, 75.0),
        (BodyPart::LeftAnkle, 70.0, 88.0),
        (BodyPart::RightAnkle, 50.0, 88.0),
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

fn face_detection() -> FaceDetection {
    let mesh = (0..FACE_MESH_POINTS)
        .map(|i| {
            let t = i as f32 / FACE_MESH_POINTS as f32 * std::f32::consts::TAU;
            Point::new(30.0 + 6.0 * t.cos(), 10.0 + 7.0 * t.sin())
        })
        .collect();
    FaceDetection {
        mesh,
        bbox: [24.0, 3.0, 36.0, 17.0],
        confidence: 0.95,
    }
}

/// Pops one scripted answer per call; an empty script means "nothing found".
struct ScriptedPoses(VecDeque<Result<Vec<Pose>>>);

impl PoseEstimator for ScriptedPoses {
    fn estimate_poses(&mut self, _frame: &Frame) -> Result<Vec<Pose>> {
        self.0.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

struct ScriptedFaces(VecDeque<Result<Vec<FaceDetection>>>);

impl FaceEstimator for ScriptedFaces {
    fn estimate_faces(&mut self, frame: &Frame) -> Result<Vec<FaceDetection>> {
        assert_eq!((frame.width, frame.height), (CAPTURE.width, CAPTURE.height));
        self.0.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[derive(Clone, Debug, PartialEq)]
enum EngineCall {
    Bind,
    Update { has_face: bool },
    Draw,
}

/// Records calls and paints a solid block so drawn frames differ from the background.
#[derive(Clone, Default)]
struct RecordingEngine {
    calls: Arc<Mutex<Vec<EngineCall>>>,
}

impl RecordingEngine {
    fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, call: &EngineCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }
}

impl IllustrationEngine for RecordingEngine {
    fn bind_skeleton(&mut self, _skeleton: Skeleton, _asset: AvatarAsset) -> Result<()> {
        self.calls.lock().unwrap().push(EngineCall::Bind);
        Ok(())
    }

    fn update_skeleton(&mut self, _pose: &Pose, face: Option<&FaceFrame>) {
        self.calls.lock().unwrap().push(EngineCall::Update {
            has_face: face.is_some(),
        });
    }

    fn draw(&mut self, surface: &mut Surface, _frame_width: u32, _frame_height: u32) {
        self.calls.lock().unwrap().push(EngineCall::Draw);
        surface.fill_circle(Point::new(30.0, 30.0), 10.0, [255, 0, 255, 255]);
    }
}

fn frame_loop(
    poses: Vec<Result<Vec<Pose>>>,
    faces: Vec<Result<Vec<FaceDetection>>>,
    engine: Box<dyn IllustrationEngine>,
    ledger: &ResourceLedger,
) -> FrameLoop {
    let output = output_config();
    let background = load_background(&output.background, output.width, output.height).unwrap();
    FrameLoop::new(
        FrameCompositor::new(CAPTURE, ledger.clone()),
        OutputCompositor::new(&output, CAPTURE, background),
        Box::new(ScriptedPoses(poses.into())),
        Box::new(ScriptedFaces(faces.into())),
        engine,
        CAPTURE,
    )
}

#[test]
fn ten_ticks_with_and_without_pose() {
    let ledger = ResourceLedger::new();
    let engine = RecordingEngine::default();
    let poses = (0..10)
        .map(|tick| Ok(if tick < 5 { vec![standing_pose()] } else { Vec::new() }))
        .collect();
    let faces = (0..10)
        .map(|tick| Ok(if tick < 5 { vec![face_detection()] } else { Vec::new() }))
        .collect();
    let mut frame_loop = frame_loop(poses, faces, Box::new(engine.clone()), &ledger);

    let output = output_config();
    let background = load_background(&output.background, output.width, output.height).unwrap();
    let frame = camera_frame();

    for tick in 0..10 {
        let (out, report) = frame_loop.tick(&frame).unwrap();
        assert_eq!(out.sequence, tick + 1);
        if tick < 5 {
            assert_eq!(report.outcome, TickOutcome::Character);
            assert_ne!(out.rgba, background.rgba, "tick {tick} should show the character");
        } else {
            assert_eq!(report.outcome, TickOutcome::BackgroundOnly);
            assert_eq!(out.rgba, background.rgba, "tick {tick} should be background only");
        }
    }

    assert_eq!(engine.count(&EngineCall::Update { has_face: true }), 5);
    assert_eq!(engine.count(&EngineCall::Update { has_face: false }), 0);
    assert_eq!(engine.count(&EngineCall::Draw), 5);
    assert_eq!(ledger.allocated(), 10);
    assert_eq!(ledger.released(), 10);
}

#[test]
fn pose_without_face_drives_engine_with_none() {
    let ledger = ResourceLedger::new();
    let engine = RecordingEngine::default();
    let mut frame_loop = frame_loop(
        vec![Ok(vec![standing_pose()])],
        vec![Ok(Vec::new())],
        Box::new(engine.clone()),
        &ledger,
    );

    let (_, report) = frame_loop.tick(&camera_frame()).unwrap();
    assert_eq!(report.faces, 0);
    assert_eq!(
        engine.calls(),
        vec![EngineCall::Update { has_face: false }, EngineCall::Draw]
    );
}

#[test]
fn vector_avatar_renders_without_face() {
    let ledger = ResourceLedger::new();
    let mut engine = VectorIllustration::new(0.1);
    engine
        .bind_skeleton(Skeleton::human(), AvatarAsset::for_kind(Default::default()))
        .unwrap();
    let mut frame_loop = frame_loop(
        vec![Ok(vec![standing_pose()])],
        vec![Ok(Vec::new())],
        Box::new(engine),
        &ledger,
    );

    let output = output_config();
    let background = load_background(&output.background, output.width, output.height).unwrap();
    let (out, _) = frame_loop.tick(&camera_frame()).unwrap();
    assert_ne!(out.rgba, background.rgba);
}

#[test]
fn estimator_failure_skips_tick_and_releases_snapshot() {
    let ledger = ResourceLedger::new();
    let engine = RecordingEngine::default();
    let mut frame_loop = frame_loop(
        vec![Ok(vec![standing_pose()]), Err(anyhow!("pose model crashed"))],
        vec![Err(anyhow!("face model crashed")), Ok(Vec::new()), Ok(Vec::new())],
        Box::new(engine.clone()),
        &ledger,
    );
    let frame = camera_frame();

    let face_failure = frame_loop.tick(&frame).unwrap_err();
    assert!(matches!(face_failure, TickError::Estimation { stage: "face", .. }));
    assert_eq!(ledger.live(), 0);

    // the pose script was not consumed by the failed tick
    let (_, report) = frame_loop.tick(&frame).unwrap();
    assert_eq!(report.outcome, TickOutcome::Character);

    let pose_failure = frame_loop.tick(&frame).unwrap_err();
    assert!(matches!(pose_failure, TickError::Estimation { stage: "pose", .. }));

    assert_eq!(ledger.allocated(), 3);
    assert_eq!(ledger.released(), 3);
    assert_eq!(engine.count(&EngineCall::Draw), 1);
}

#[test]
fn pose_is_mirrored_into_capture_space() {
    struct Capture(Arc<Mutex<Option<Pose>>>);

    impl IllustrationEngine for Capture {
        fn bind_skeleton(&mut self, _: Skeleton, _: AvatarAsset) -> Result<()> {
            Ok(())
        }

        fn update_skeleton(&mut self, pose: &Pose, _: Option<&FaceFrame>) {
            *self.0.lock().unwrap() = Some(pose.clone());
        }

        fn draw(&mut self, _: &mut Surface, _: u32, _: u32) {}
    }

    let seen = Arc::new(Mutex::new(None));
    let ledger = ResourceLedger::new();
    let mut frame_loop = frame_loop(
        vec![Ok(vec![standing_pose()])],
        vec![Ok(Vec::new())],
        Box::new(Capture(seen.clone())),
        &ledger,
    );
    frame_loop.tick(&camera_frame()).unwrap();

    let pose = seen.lock().unwrap().clone().unwrap();
    // camera left wrist at (90, 60) in 120x90 becomes the right wrist at 60 - 45 in 60x60
    let wrist = pose.keypoint(BodyPart::RightWrist).unwrap();
    assert!((wrist.position.x - 15.0).abs() < 1e-4);
    assert!((wrist.position.y - 40.0).abs() < 1e-4);
}

struct CountingObserver(Arc<AtomicUsize>);

impl TickObserver for CountingObserver {
    fn on_tick(&mut self, _report: &TickReport) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

struct FailingModels;

impl ModelProvider for FailingModels {
    fn load_pose_estimator(&self, _: &AppConfig) -> Result<Box<dyn PoseEstimator>, SessionError> {
        Err(SessionError::ModelLoad {
            kind: ModelKind::PoseNet,
            error: anyhow!("endpoint unreachable"),
        })
    }

    fn load_face_estimator(&self, _: &AppConfig) -> Result<Box<dyn FaceEstimator>, SessionError> {
        unreachable!("pose model fails first")
    }
}

struct FakeModels;

impl ModelProvider for FakeModels {
    fn load_pose_estimator(&self, _: &AppConfig) -> Result<Box<dyn PoseEstimator>, SessionError> {
        Ok(Box::new(ScriptedPoses(VecDeque::new())))
    }

    fn load_face_estimator(&self, _: &AppConfig) -> Result<Box<dyn FaceEstimator>, SessionError> {
        Ok(Box::new(ScriptedFaces(VecDeque::new())))
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        capture: CAPTURE,
        output: output_config(),
        target_fps: 200,
        ..AppConfig::default()
    }
}

#[test]
fn model_load_failure_does_not_start_loop() {
    let ticks = Arc::new(AtomicUsize::new(0));
    let engine = RecordingEngine::default();
    let (_tx, rx) = bounded(1);

    let result = Session::start(
        &test_config(),
        rx,
        &FailingModels,
        Box::new(engine.clone()),
        Some(Box::new(CountingObserver(ticks.clone()))),
    );

    assert!(matches!(
        result,
        Err(SessionError::ModelLoad {
            kind: ModelKind::PoseNet,
            ..
        })
    ));
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(ticks.load(Ordering::SeqCst), 0);
    assert!(engine.calls().is_empty());
}

#[test]
fn unreachable_model_endpoint_fails_session_start() {
    let dir = std::env::temp_dir().join(format!("avatar-stream-missing-{}", std::process::id()));
    let mut config = test_config();
    config.models = avatar_stream::config::ModelSources::in_dir(dir.clone());
    config.models.posenet.url = Some("http://127.0.0.1:9/posenet.onnx".to_string());
    let (_tx, rx) = bounded(1);

    let result = Session::start(
        &config,
        rx,
        &OrtModels,
        Box::new(RecordingEngine::default()),
        None,
    );

    assert!(matches!(
        result,
        Err(SessionError::ModelLoad {
            kind: ModelKind::PoseNet,
            ..
        })
    ));
    assert!(!config.models.posenet.path.exists());
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn running_session_streams_until_camera_closes() {
    let ticks = Arc::new(AtomicUsize::new(0));
    let engine = RecordingEngine::default();
    let (tx, rx) = bounded(1);

    let session = Session::start(
        &test_config(),
        rx,
        &FakeModels,
        Box::new(engine.clone()),
        Some(Box::new(CountingObserver(ticks.clone()))),
    )
    .unwrap();
    assert_eq!(engine.calls(), vec![EngineCall::Bind]);

    tx.send(camera_frame()).unwrap();
    let first = session
        .output()
        .recv_timeout(Duration::from_secs(5))
        .unwrap();
    assert_eq!((first.width, first.height), (80, 60));

    drop(tx);
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while session.is_running() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(!session.is_running());
    assert!(ticks.load(Ordering::SeqCst) >= 1);
    assert_eq!(session.ledger().live(), 0);
    session.stop();
}

struct RecordingObserver(Arc<Mutex<Vec<TickOutcome>>>);

impl TickObserver for RecordingObserver {
    fn on_tick(&mut self, report: &TickReport) {
        self.0.lock().unwrap().push(report.outcome);
    }
}

#[test]
fn loop_recovers_from_failed_tick_and_stops_on_request() {
    let ledger = ResourceLedger::new();
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let frame_loop = frame_loop(
        vec![Ok(vec![standing_pose()]), Ok(vec![standing_pose()])],
        vec![Err(anyhow!("face model crashed"))],
        Box::new(RecordingEngine::default()),
        &ledger,
    );

    let (tx, rx) = bounded(1);
    tx.send(camera_frame()).unwrap();
    let (output, handle) = frame_loop
        .run(
            rx,
            Duration::from_millis(5),
            Some(Box::new(RecordingObserver(outcomes.clone()))),
        )
        .unwrap();

    let first = output.recv_timeout(Duration::from_secs(5)).unwrap();
    let second = output.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(first.sequence, 1);
    assert!(second.sequence > first.sequence);

    // camera sender is still alive, only the stop flag ends the loop
    assert!(handle.is_running());
    let stopping = std::time::Instant::now();
    handle.stop();
    assert!(stopping.elapsed() < Duration::from_secs(2));

    loop {
        match output.recv_timeout(Duration::from_secs(2)) {
            Ok(_) => continue,
            Err(err) => {
                assert!(err.is_disconnected());
                break;
            }
        }
    }
    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes[0], TickOutcome::Skipped);
    assert_eq!(outcomes[1], TickOutcome::Character);
    assert_eq!(ledger.live(), 0);
    drop(tx);
}
