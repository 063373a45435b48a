//! MQTT recording and playback sessions.
//!
//! - [`recorder`] subscribes to a topic filter and appends every message to a
//!   recording file
//! - [`player`] publishes a recording back onto a broker with its original
//!   pacing
//!
//! Both sides share the frame format from [`mqtt_rr_core::frame`]:
//!
//! ```text
//! ┌──────────────────────────┐
//! │ Length prefix (10 bytes) │  zig-zag varint, zero padded
//! │ Message body             │  MessagePack {Millis, Topic, Payload}
//! ├──────────────────────────┤
//! │ Length prefix (10 bytes) │
//! │ Message body             │
//! │ ...                      │
//! └──────────────────────────┘
//! ```
//!
//! There is no header, index or footer; a file truncated between frames is a
//! valid, shorter recording.

pub mod player;
pub mod recorder;

pub use player::ReplaySession;
pub use recorder::{output_filename, verify_recording, Recorder, RecordingSession};
