//! # MQTT Record/Replay Core
//!
//! Platform-independent recording format and playback engine for captured
//! MQTT traffic.
//!
//! This crate contains the file format and the timing logic with **no network,
//! async or terminal dependencies**. Everything that talks to a broker or a
//! keyboard lives in `mqtt-rr` and plugs in through small traits.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  mqtt-rr-core (no tokio, no MQTT client, no terminal)       │
//! │  ├── message/    (RecordedMessage)                          │
//! │  ├── frame/      (length-prefixed MessagePack frames)       │
//! │  ├── cursor/     (sequential reader with seek/restart)      │
//! │  ├── scheduler/  (pacing state machine)                     │
//! │  └── stats/      (per-topic running statistics)             │
//! └─────────────────────────────────────────────────────────────┘
//!                 ▲                           ▲
//!    ┌────────────┴────────────┐   ┌─────────┴─────────┐
//!    │  mqtt-record            │   │ mqtt-replay       │
//!    │  (Recorder, rumqttc)    │   │ (MqttPublisher,   │
//!    │                         │   │  TerminalControls)│
//!    └─────────────────────────┘   └───────────────────┘
//! ```
//!
//! ## File Format
//!
//! A recording has no header, footer or index. It is a plain sequence of
//! frames, readable strictly forward:
//!
//! ```text
//! ┌──────────────────────────┐
//! │ Length (10 bytes)        │  zig-zag varint, zero padded
//! │ Message (length bytes)   │  MessagePack {Millis, Topic, Payload}
//! ├──────────────────────────┤
//! │ Length                   │
//! │ Message                  │
//! │ ...                      │
//! └──────────────────────────┘
//! ```
//!
//! ## Example: Writing and Reading Frames
//!
//! ```rust
//! use mqtt_rr_core::{FrameReader, FrameWriter, RecordedMessage};
//! use std::io::Cursor;
//!
//! let mut buf = Vec::new();
//! let mut writer = FrameWriter::new(&mut buf);
//! writer.write_message(&RecordedMessage::new(1000, "a", vec![1])).unwrap();
//!
//! let mut reader = FrameReader::new(Cursor::new(buf));
//! let frame = reader.next_frame().unwrap().unwrap();
//! assert_eq!(frame.message.topic, "a");
//! ```

pub mod cursor;
pub mod error;
pub mod frame;
pub mod message;
pub mod scheduler;
pub mod stats;

pub use cursor::PlaybackCursor;
pub use error::FrameError;
pub use frame::{decode, encode, Frame, FrameReader, FrameWriter, LENGTH_PREFIX_SIZE};
pub use message::RecordedMessage;
pub use scheduler::{
    Clock, ControlEvent, Controls, PacingScheduler, PlaybackSettings, PlaybackState,
    PublishError, Publisher, SystemClock,
};
pub use stats::{MsgStats, StatValues, StatsAggregate};
