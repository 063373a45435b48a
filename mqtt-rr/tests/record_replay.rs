//! Record to a file, then replay it through the pacing scheduler

use mqtt_rr::recording::{verify_recording, Recorder};
use mqtt_rr_core::{
    Clock, ControlEvent, Controls, PacingScheduler, PlaybackCursor, PlaybackSettings,
    PlaybackState, PublishError, Publisher, RecordedMessage, SystemClock,
};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::time::Duration;

struct NoControls;

impl Controls for NoControls {
    fn poll(&mut self) -> Option<ControlEvent> {
        None
    }

    fn wait_halted(&mut self) -> io::Result<ControlEvent> {
        Ok(ControlEvent::Quit)
    }
}

/// Keeps every message together with the clock reading at publish time
struct Collector {
    clock: SystemClock,
    published: Vec<(Duration, RecordedMessage)>,
}

impl Publisher for Collector {
    fn publish(&mut self, message: &RecordedMessage) -> Result<(), PublishError> {
        self.published.push((self.clock.now(), message.clone()));
        Ok(())
    }
}

fn record_scenario(path: &Path) {
    let mut recorder = Recorder::create(path).unwrap();
    recorder.record("a", &[0x01], 1000).unwrap();
    recorder.record("b", &[], 1500).unwrap();
    recorder.record("a", &[0xab, 0xcd], 3000).unwrap();
    recorder.finish().unwrap();
}

fn replay(path: &Path, settings: PlaybackSettings) -> (PlaybackState, Vec<(Duration, RecordedMessage)>) {
    let clock = SystemClock::new();
    let publisher = Collector {
        clock,
        published: Vec::new(),
    };
    let cursor = PlaybackCursor::new(BufReader::new(File::open(path).unwrap()));
    let mut scheduler = PacingScheduler::new(cursor, publisher, clock, NoControls, settings);
    let state = scheduler.run().unwrap();
    (state, scheduler.publisher().published.clone())
}

#[test]
fn test_replay_keeps_order_and_gaps() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenario.mqtt");
    record_scenario(&path);
    assert_eq!(verify_recording(&path).unwrap(), 3);

    let (state, published) = replay(&path, PlaybackSettings::default());
    assert_eq!(state, PlaybackState::Finished);

    let messages: Vec<_> = published.iter().map(|(_, m)| m.clone()).collect();
    assert_eq!(
        messages,
        vec![
            RecordedMessage::new(1000, "a", vec![0x01]),
            RecordedMessage::new(1500, "b", vec![]),
            RecordedMessage::new(3000, "a", vec![0xab, 0xcd]),
        ]
    );

    let gap = |i: usize| published[i].0 - published[i - 1].0;
    let tolerance = Duration::from_millis(50);
    assert!(gap(1) >= Duration::from_millis(495), "gap {:?}", gap(1));
    assert!(gap(1) <= Duration::from_millis(500) + tolerance, "gap {:?}", gap(1));
    assert!(gap(2) >= Duration::from_millis(1495), "gap {:?}", gap(2));
    assert!(gap(2) <= Duration::from_millis(1500) + tolerance, "gap {:?}", gap(2));
}

#[test]
fn test_replay_from_start_offset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenario.mqtt");
    record_scenario(&path);

    let (state, published) = replay(&path, PlaybackSettings::from_seconds(2, 0));
    assert_eq!(state, PlaybackState::Finished);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].1, RecordedMessage::new(3000, "a", vec![0xab, 0xcd]));
    assert!(published[0].0 < Duration::from_millis(100));
}

#[test]
fn test_replay_with_end_offset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenario.mqtt");
    record_scenario(&path);

    let settings = PlaybackSettings {
        end_millis: Some(600),
        ..PlaybackSettings::default()
    };
    let (state, published) = replay(&path, settings);
    assert_eq!(state, PlaybackState::Finished);
    let topics: Vec<_> = published.iter().map(|(_, m)| m.topic.as_str()).collect();
    assert_eq!(topics, vec!["a", "b"]);
}

#[test]
fn test_replay_tolerates_truncated_tail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenario.mqtt");
    record_scenario(&path);

    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
    assert!(verify_recording(&path).is_err());

    let settings = PlaybackSettings {
        end_millis: Some(500),
        ..PlaybackSettings::default()
    };
    let (state, published) = replay(&path, settings);
    assert_eq!(state, PlaybackState::Finished);
    assert_eq!(published.len(), 2);
}
