//! Webcam to animated avatar video stream.
//!
//! Each tick of the [`pipeline::FrameLoop`] mirrors the newest camera frame,
//! estimates body pose and face landmarks, drives a rigged vector avatar and
//! composites it over a background into an [`pipeline::OutputStream`].

pub mod config;
pub mod error;
pub mod model_download;
pub mod pipeline;
pub mod session;
pub mod types;
pub mod ui;

pub use config::AppConfig;
pub use error::{SessionError, TickError};
pub use session::{ModelProvider, OrtModels, Session};
