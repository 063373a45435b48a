//! Errors reported by the record and replay tools

use miette::Diagnostic;
use mqtt_rr_core::FrameError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Cannot connect to MQTT broker: {0}")]
    #[diagnostic(
        code(mqtt_rr::connection),
        help("check the broker URL (-b) and that the broker is reachable")
    )]
    ConnectionFailure(String),

    #[error("Cannot subscribe to topic '{topic}': {reason}")]
    #[diagnostic(code(mqtt_rr::subscription))]
    SubscriptionFailure { topic: String, reason: String },

    #[error("Cannot create recording file '{}'", path.display())]
    #[diagnostic(code(mqtt_rr::file_create))]
    FileCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot open recording file '{}'", path.display())]
    #[diagnostic(code(mqtt_rr::file_open))]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Recording frame error")]
    #[diagnostic(code(mqtt_rr::frame))]
    Frame(#[from] FrameError),

    #[error("I/O operation failed")]
    Io(#[from] io::Error),
}
