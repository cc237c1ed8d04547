use thiserror::Error;

use crate::model_download::ModelKind;

/// Failures that abort session start.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("camera unavailable: {0:#}")]
    Capture(anyhow::Error),
    #[error("failed to load {kind} model: {error:#}")]
    ModelLoad {
        kind: ModelKind,
        error: anyhow::Error,
    },
    #[error("failed to load asset: {0:#}")]
    Asset(anyhow::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to start frame loop: {0:#}")]
    Loop(anyhow::Error),
}

/// Reasons a single tick produced no output frame.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("no camera frame received yet")]
    NoFrame,
    #[error("camera source disconnected")]
    Disconnected,
    #[error("{stage} estimation failed: {error:#}")]
    Estimation {
        stage: &'static str,
        error: anyhow::Error,
    },
}
