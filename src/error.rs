// src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MocapError {
    #[error("Capture source could not be opened: {0}")]
    CaptureOpen(String),

    #[error("Please select a valid video file: {0}")]
    UnsupportedVideo(String),

    #[error("Unknown mode: {0}")]
    UnknownMode(String),

    #[error("Please select a valid rig ({0})")]
    InvalidRig(String),

    #[error("No bones found")]
    NoBones,

    #[error("Invalid frame range: {start}..={end}")]
    FrameRange { start: i32, end: i32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, MocapError>;
