//! # MQTT Record/Replay
//!
//! Command-line tools that capture MQTT traffic into a file and play it back
//! onto a broker with the original timing.
//!
//! ## Architecture
//!
//! The file format and playback engine live in [`mqtt_rr_core`]; this crate
//! adds the broker connection ([`rumqttc`]), the [`tokio`] runtime, signal
//! handling and terminal key input.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      mqtt-rr                            │
//! │  ┌─────────────────┐          ┌───────────────────────┐ │
//! │  │ mqtt-record     │          │ mqtt-replay           │ │
//! │  │ RecordingSession│          │ ReplaySession         │ │
//! │  └────────┬────────┘          └───────────┬───────────┘ │
//! │           │                               │             │
//! │           ▼                               ▼             │
//! │  ┌─────────────────┐          ┌───────────────────────┐ │
//! │  │ Recorder        │          │ PacingScheduler       │ │
//! │  │ (FrameWriter)   │          │ + MqttPublisher       │ │
//! │  │                 │          │ + TerminalControls    │ │
//! │  └─────────────────┘          └───────────────────────┘ │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Command-Line Interface
//!
//! See [`RecordCli`] and [`ReplayCli`]. The default log level is info; each
//! `-v` raises it (debug, trace) and each `-q` lowers it (warn, error, off).

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, LogLevel, Verbosity};
use log::LevelFilter;
use std::path::PathBuf;

pub mod broker;
pub mod error;
pub mod recording;
pub mod terminal;

pub use error::Error;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_BROKER_URL: &str = "tcp://localhost:1883";

#[derive(Parser, Clone, Debug)]
#[command(name = "mqtt-record", version, about = "Record MQTT messages to a file")]
pub struct RecordCli {
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// MQTT broker URL
    #[arg(short, long, default_value = DEFAULT_BROKER_URL)]
    pub broker: String,

    /// MQTT topic to subscribe
    #[arg(short, long, default_value = "#")]
    pub topic: String,

    /// Output file name, `$topic` and `$time` are substituted
    #[arg(short, long, default_value = "recording-$topic-$time.mqtt")]
    pub output: String,

    /// Print regular message statistics per topic
    #[arg(short, long, default_value_t = false)]
    pub stats: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(name = "mqtt-replay", version, about = "Replay a recording onto an MQTT broker")]
pub struct ReplayCli {
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// MQTT broker URL
    #[arg(short, long, default_value = DEFAULT_BROKER_URL)]
    pub broker: String,

    /// Input file
    #[arg(short, long)]
    pub input: PathBuf,

    /// Starting time offset (seconds)
    #[arg(short, long, default_value_t = 0)]
    pub start: u64,

    /// End time (seconds, 0 plays the full file)
    #[arg(short, long, default_value_t = 0)]
    pub end: u64,
}

/// Route `log` output through env_logger at the level chosen on the command line
pub fn init_logging<L: LogLevel>(verbose: &Verbosity<L>) {
    let level = verbose.log_level_filter();
    env_logger::Builder::new()
        .filter_level(level)
        // the MQTT client is chatty at debug level
        .filter_module("rumqttc", level.min(LevelFilter::Info))
        .format_target(false)
        .init();
}
