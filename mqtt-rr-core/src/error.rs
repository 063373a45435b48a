//! Error types for the recording format

use std::io;
use thiserror::Error;

/// Errors that can occur when encoding or decoding recording frames
#[derive(Error, Debug)]
pub enum FrameError {
    /// Message could not be serialized
    #[error("Cannot encode message: {0}")]
    Encode(String),

    /// Frame bytes do not form a valid length prefix or message
    #[error("Corrupt frame: {0}")]
    Corrupt(String),

    /// File ended inside a frame
    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Underlying reader or writer failed
    #[error("I/O operation failed")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// True for conditions that mean "no more usable data" during playback
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, FrameError::Corrupt(_) | FrameError::Truncated { .. })
    }
}

impl From<rmp_serde::encode::Error> for FrameError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        FrameError::Encode(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for FrameError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        FrameError::Corrupt(e.to_string())
    }
}
