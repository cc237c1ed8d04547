use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Sender, TrySendError};
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    query,
    utils::{ApiBackend, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType},
};

use super::pixel_format;
use crate::types::Frame;

// Uncompressed formats first; MJPEG decoding costs more per frame than the
// models we feed.
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
    FrameFormat::GRAY,
];

const READ_FAILURE_BACKOFF: Duration = Duration::from_millis(20);

fn requested_formats() -> [RequestedFormat<'static>; 3] {
    [
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
}

/// Running capture thread. Stops and joins on [`CameraStream::stop`] or drop.
#[derive(Debug)]
pub struct CameraStream {
    label: String,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraStream {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Frames discarded because the frame loop had not taken the previous one.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            log::info!(
                "camera {} stopped ({} frames dropped)",
                self.label,
                self.dropped_frames()
            );
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn available_cameras() -> Result<Vec<CameraDevice>> {
    let cameras = query(ApiBackend::Auto).context("failed to enumerate cameras")?;
    Ok(cameras
        .into_iter()
        .map(|info| CameraDevice {
            index: info.index().clone(),
            label: info.human_name(),
        })
        .collect())
}

/// Picks the camera at `position` in the enumeration order.
pub fn select_camera(position: u32) -> Result<CameraDevice> {
    let cameras = available_cameras()?;
    if cameras.is_empty() {
        return Err(anyhow!("no camera devices found"));
    }
    let count = cameras.len();
    cameras
        .into_iter()
        .nth(position as usize)
        .ok_or_else(|| anyhow!("camera index {position} out of range ({count} available)"))
}

fn open_camera(index: &CameraIndex) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats() {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(anyhow::Error::from(err)),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

/// Opens `device` and publishes decoded frames on `frame_tx` until stopped.
///
/// The camera is opened once on the calling thread so that permission and
/// busy-device errors surface here instead of inside the capture thread.
pub fn start_camera_stream(device: CameraDevice, frame_tx: Sender<Frame>) -> Result<CameraStream> {
    let probe = open_camera(&device.index)
        .with_context(|| format!("failed to open camera {}", device.label))?;
    let format = probe.camera_format();
    log::info!(
        "camera {} opened at {}x{} {:?} @ {} fps",
        device.label,
        format.resolution().width_x,
        format.resolution().height_y,
        format.format(),
        format.frame_rate()
    );
    drop(probe);

    let stop = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicU64::new(0));
    let stop_flag = stop.clone();
    let dropped_count = dropped.clone();
    let label = device.label.clone();

    let handle = thread::Builder::new()
        .name("camera-capture".to_string())
        .spawn(move || {
            let mut camera = match open_camera(&device.index) {
                Ok(cam) => cam,
                Err(err) => {
                    log::error!("failed to reopen camera {}: {err:?}", device.label);
                    return;
                }
            };

            while !stop_flag.load(Ordering::Relaxed) {
                let buffer = match camera.frame() {
                    Ok(buffer) => buffer,
                    Err(err) => {
                        log::warn!("camera frame read failed: {err:?}");
                        thread::sleep(READ_FAILURE_BACKOFF);
                        continue;
                    }
                };

                let frame = match pixel_format::decode_camera_frame(&buffer) {
                    Ok(frame) => frame,
                    Err(err) => {
                        log::warn!("failed to decode camera frame: {err:?}");
                        continue;
                    }
                };

                match frame_tx.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        dropped_count.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        log::info!("frame loop gone, closing camera {}", device.label);
                        break;
                    }
                }
            }

            if let Err(err) = camera.stop_stream() {
                log::warn!("failed to stop camera stream cleanly: {err:?}");
            }
        })
        .context("failed to spawn camera capture thread")?;

    Ok(CameraStream {
        label,
        stop,
        dropped,
        handle: Some(handle),
    })
}
