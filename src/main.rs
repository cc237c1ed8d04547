#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use anyhow::Result;
use avatar_stream::{
    AppConfig, OrtModels, Session, SessionError,
    pipeline::{FpsMeter, VectorIllustration, select_camera, start_camera_stream},
    ui,
};
use crossbeam_channel::bounded;
use gpui::Application;

fn main() -> Result<()> {
    env_logger::init();

    let config = AppConfig::from_env()?;
    let (camera_frame_tx, camera_frame_rx) = bounded(1);

    let device = select_camera(config.camera_index).map_err(SessionError::Capture)?;
    let camera_label = device.label.clone();
    let camera = start_camera_stream(device, camera_frame_tx).map_err(SessionError::Capture)?;

    let session = Session::start(
        &config,
        camera_frame_rx,
        &OrtModels,
        Box::new(VectorIllustration::new(config.posenet.min_part_confidence)),
        Some(Box::new(FpsMeter::new())),
    )?;

    Application::new()
        .with_assets(gpui_component_assets::Assets)
        .run(move |app| {
            gpui_component::init(app);

            if let Err(err) = ui::launch_ui(app, session, camera_label) {
                log::error!("failed to launch ui: {err:?}");
            }
        });

    camera.stop();
    Ok(())
}
