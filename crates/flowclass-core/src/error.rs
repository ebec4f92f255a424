//! Error types for flowclass

use thiserror::Error;

/// flowclass error type
#[derive(Error, Debug)]
pub enum FlowError {
    /// Invalid or inconsistent configuration
    #[error("config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Model could not be loaded or is malformed
    #[error("model error: {0}")]
    Model(String),

    /// Scoring collaborator failed
    #[error("inference error: {0}")]
    Inference(String),

    /// Packet source failed
    #[error("packet source error: {0}")]
    Source(String),

    /// Packet record could not be decoded
    #[error("parse error: {0}")]
    Parse(String),

    /// Window hand-off channel closed unexpectedly
    #[error("window channel closed")]
    ChannelClosed,
}

/// Result type for flowclass
pub type FlowResult<T> = Result<T, FlowError>;
