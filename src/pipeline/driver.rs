use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, TrySendError, bounded};

use super::{
    compositor::{FrameCompositor, OutputCompositor},
    face::FaceEstimator,
    illustration::IllustrationEngine,
    pose::PoseEstimator,
    skeleton::{normalize, to_face_frame},
};
use crate::{
    config::CaptureConfig,
    error::TickError,
    types::{Frame, OutputFrame},
};

/// Finished output frames, newest only.
pub type OutputStream = Receiver<OutputFrame>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Character drawn over the background.
    Character,
    /// No pose this tick, background only.
    BackgroundOnly,
    Skipped,
}

#[derive(Clone, Debug)]
pub struct TickReport {
    pub outcome: TickOutcome,
    pub poses: usize,
    pub faces: usize,
    pub elapsed: Duration,
}

/// Receives a report after every tick of a running loop.
pub trait TickObserver: Send {
    fn on_tick(&mut self, report: &TickReport);
}

/// Logs the rendered frame rate once per second.
pub struct FpsMeter {
    window_start: Instant,
    frames: u32,
}

impl FpsMeter {
    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frames: 0,
        }
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl TickObserver for FpsMeter {
    fn on_tick(&mut self, report: &TickReport) {
        if report.outcome != TickOutcome::Skipped {
            self.frames += 1;
        }
        let elapsed = self.window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            let fps = self.frames as f32 / elapsed.as_secs_f32();
            log::info!("output {fps:.1} fps");
            self.frames = 0;
            self.window_start = Instant::now();
        }
    }
}

/// Everything one tick needs, owned by the loop thread.
pub struct FrameLoop {
    frame_compositor: FrameCompositor,
    output: OutputCompositor,
    pose_estimator: Box<dyn PoseEstimator>,
    face_estimator: Box<dyn FaceEstimator>,
    engine: Box<dyn IllustrationEngine>,
    capture: CaptureConfig,
}

impl FrameLoop {
    pub fn new(
        frame_compositor: FrameCompositor,
        output: OutputCompositor,
        pose_estimator: Box<dyn PoseEstimator>,
        face_estimator: Box<dyn FaceEstimator>,
        engine: Box<dyn IllustrationEngine>,
        capture: CaptureConfig,
    ) -> Self {
        Self {
            frame_compositor,
            output,
            pose_estimator,
            face_estimator,
            engine,
            capture,
        }
    }

    /// Runs one mirror, estimate, draw and composite pass over `frame`.
    ///
    /// The mirrored snapshot is released before this returns on every path.
    pub fn tick(&mut self, frame: &Frame) -> Result<(OutputFrame, TickReport), TickError> {
        let started = Instant::now();
        let snapshot = self.frame_compositor.capture_frame(frame);

        let faces = self
            .face_estimator
            .estimate_faces(&snapshot)
            .map_err(|error| TickError::Estimation {
                stage: "face",
                error,
            })?;
        let poses = self
            .pose_estimator
            .estimate_poses(frame)
            .map_err(|error| TickError::Estimation {
                stage: "pose",
                error,
            })?;
        snapshot.dispose();

        let sx = self.capture.width as f32 / frame.width.max(1) as f32;
        let sy = self.capture.height as f32 / frame.height.max(1) as f32;
        let pose = poses
            .first()
            .map(|raw| normalize(&raw.clone().scaled(sx, sy), self.capture.width));
        let face = to_face_frame(&faces);

        let output = self
            .output
            .composite(self.engine.as_mut(), pose.as_ref(), face.as_ref());

        let report = TickReport {
            outcome: if pose.is_some() {
                TickOutcome::Character
            } else {
                TickOutcome::BackgroundOnly
            },
            poses: poses.len(),
            faces: faces.len(),
            elapsed: started.elapsed(),
        };
        Ok((output, report))
    }

    /// Moves the loop onto its own thread. Ticks are sequential and paced by
    /// `interval`; the last camera frame is reused when no newer one arrived.
    pub fn run(
        mut self,
        frames: Receiver<Frame>,
        interval: Duration,
        mut observer: Option<Box<dyn TickObserver>>,
    ) -> Result<(OutputStream, LoopHandle)> {
        let (output_tx, output_rx) = bounded(1);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = thread::Builder::new()
            .name("frame-loop".to_string())
            .spawn(move || {
                let mut last_frame: Option<Frame> = None;

                while !stop_flag.load(Ordering::SeqCst) {
                    match recv_latest_frame(&frames, interval) {
                        Ok(Some(frame)) => last_frame = Some(frame),
                        Ok(None) => {}
                        Err(TickError::Disconnected) => {
                            log::info!("camera source closed, frame loop exiting");
                            break;
                        }
                        Err(err) => log::debug!("frame wait failed: {err}"),
                    }
                    if stop_flag.load(Ordering::SeqCst) {
                        break;
                    }

                    let result = match &last_frame {
                        Some(frame) => self.tick(frame),
                        None => Err(TickError::NoFrame),
                    };
                    let report = match result {
                        Ok((output, report)) => {
                            match output_tx.try_send(output) {
                                Ok(()) => {}
                                Err(TrySendError::Full(_)) => {
                                    log::debug!("output consumer lagging, frame dropped");
                                }
                                Err(TrySendError::Disconnected(_)) => {
                                    log::info!("output stream closed, frame loop exiting");
                                    break;
                                }
                            }
                            report
                        }
                        Err(TickError::NoFrame) => {
                            log::debug!("tick skipped: {}", TickError::NoFrame);
                            skipped_report()
                        }
                        Err(err) => {
                            log::warn!("tick skipped: {err}");
                            skipped_report()
                        }
                    };
                    if let Some(observer) = observer.as_mut() {
                        observer.on_tick(&report);
                    }
                }
            })
            .context("failed to spawn frame loop thread")?;

        Ok((
            output_rx,
            LoopHandle {
                stop,
                handle: Some(handle),
            },
        ))
    }
}

fn skipped_report() -> TickReport {
    TickReport {
        outcome: TickOutcome::Skipped,
        poses: 0,
        faces: 0,
        elapsed: Duration::ZERO,
    }
}

/// Waits up to `timeout` for a frame and drains anything queued behind it.
pub fn recv_latest_frame(
    frames: &Receiver<Frame>,
    timeout: Duration,
) -> Result<Option<Frame>, TickError> {
    let mut frame = match frames.recv_timeout(timeout) {
        Ok(frame) => frame,
        Err(RecvTimeoutError::Timeout) => return Ok(None),
        Err(RecvTimeoutError::Disconnected) => return Err(TickError::Disconnected),
    };
    while let Ok(newer) = frames.try_recv() {
        frame = newer;
    }
    Ok(Some(frame))
}

/// Stops the frame loop on [`LoopHandle::stop`] or drop and joins its thread.
#[derive(Debug)]
pub struct LoopHandle {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl LoopHandle {
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("frame loop thread panicked");
            } else {
                log::info!("frame loop stopped");
            }
        }
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::unbounded;

    use super::*;

    #[test]
    fn latest_frame_wins() {
        let (tx, rx) = unbounded();
        for width in 1..=3 {
            tx.send(Frame::filled(width, 1, [0; 4])).unwrap();
        }
        let frame = recv_latest_frame(&rx, Duration::from_millis(10))
            .unwrap()
            .unwrap();
        assert_eq!(frame.width, 3);
        assert!(rx.is_empty());
    }

    #[test]
    fn timeout_yields_no_frame() {
        let (_tx, rx) = unbounded::<Frame>();
        let frame = recv_latest_frame(&rx, Duration::from_millis(5)).unwrap();
        assert!(frame.is_none());
    }

    #[test]
    fn disconnect_is_reported() {
        let (tx, rx) = unbounded::<Frame>();
        drop(tx);
        assert!(matches!(
            recv_latest_frame(&rx, Duration::from_millis(5)),
            Err(TickError::Disconnected)
        ));
    }

    #[test]
    fn fps_meter_ignores_skipped_ticks() {
        let mut meter = FpsMeter::new();
        meter.on_tick(&skipped_report());
        assert_eq!(meter.frames, 0);
        meter.on_tick(&TickReport {
            outcome: TickOutcome::BackgroundOnly,
            ..skipped_report()
        });
        assert_eq!(meter.frames, 1);
    }
}
