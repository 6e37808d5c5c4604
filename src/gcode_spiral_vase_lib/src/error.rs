//! Errors from the job layer around the spiral transform.
//!
//! The per-layer transform itself never fails; an odd layer degrades to a less perfect but still
//! printable result. Only reading/writing files and loading configuration can go wrong.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpiralVaseError {
    /// I/O error reading input or writing output.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration file isn't valid JSON for the expected shape.
    #[error("Configuration parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration parsed but holds values the transform can't work with.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, SpiralVaseError>;
