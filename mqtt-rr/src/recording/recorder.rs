//! MQTT recorder.
//!
//! A [`RecordingSession`] connects, subscribes, and appends each received
//! message to the output file as one frame. The session owns the single
//! [`Recorder`]; the MQTT event loop task only forwards messages to it over a
//! channel, so frames can never interleave.

use chrono::{DateTime, TimeZone};
use log::{debug, error, info, log_enabled, warn, Level};
use mqtt_rr_core::{FrameError, FrameReader, FrameWriter, RecordedMessage, StatsAggregate};
use rumqttc::AsyncClient;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_graceful_shutdown::SubsystemHandle;

use crate::broker::{self, BrokerUrl, Received, Subscription};
use crate::{Error, RecordCli};

pub const REPORT_INTERVAL: Duration = Duration::from_secs(5);

const DISCONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Expand the output file template.
///
/// The first `$topic` becomes the topic filter with `/` replaced by `_`, the
/// first `$time` becomes the local start time as `YYYY-MM-DDTHHMMSS`.
pub fn output_filename<Tz: TimeZone>(template: &str, topic: &str, time: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    let topic = topic.replace('/', "_");
    let time = time.format("%Y-%m-%dT%H%M%S").to_string();
    template.replacen("$topic", &topic, 1).replacen("$time", &time, 1)
}

/// Appends received messages as frames and keeps per-topic statistics
pub struct Recorder<W: Write> {
    writer: FrameWriter<W>,
    stats: StatsAggregate,
    last_millis: i64,
    interval_count: u64,
}

impl Recorder<BufWriter<File>> {
    /// Create (or truncate) the recording file
    pub fn create(path: &Path) -> Result<Self, Error> {
        let file = File::create(path).map_err(|source| Error::FileCreate {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Recording to {}", path.display());
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> Recorder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: FrameWriter::new(writer),
            stats: StatsAggregate::new(),
            last_millis: i64::MIN,
            interval_count: 0,
        }
    }

    /// Append one message stamped with its receipt time.
    ///
    /// A wall clock that steps backwards is held at the last stamp so frame
    /// timestamps never decrease. Returns the serialized message size.
    pub fn record(
        &mut self,
        topic: &str,
        payload: &[u8],
        received_at_millis: i64,
    ) -> Result<usize, FrameError> {
        let captured_at_millis = received_at_millis.max(self.last_millis);
        let message = RecordedMessage::new(captured_at_millis, topic, payload.to_vec());
        let size = self.writer.write_message(&message)?;

        debug!("t={}, {} bytes, topic={}", captured_at_millis, size, topic);
        self.last_millis = captured_at_millis;
        self.interval_count += 1;
        self.stats.record(topic, captured_at_millis, size);
        Ok(size)
    }

    pub fn record_received(&mut self, received: &Received) -> Result<usize, FrameError> {
        self.record(&received.topic, &received.payload, received.received_at_millis)
    }

    /// Messages recorded since the previous call
    pub fn take_interval_count(&mut self) -> u64 {
        std::mem::take(&mut self.interval_count)
    }

    pub fn stats(&self) -> &StatsAggregate {
        &self.stats
    }

    pub fn frame_count(&self) -> u64 {
        self.writer.frame_count()
    }

    pub fn bytes_written(&self) -> u64 {
        self.writer.bytes_written()
    }

    /// Flush all frames and hand back the underlying writer
    pub fn finish(self) -> io::Result<W> {
        self.writer.finish()
    }
}

/// Re-read a closed recording with the strict frame reader.
///
/// Returns the number of complete frames; a truncated or undecodable frame
/// is an error.
pub fn verify_recording(path: &Path) -> Result<u64, Error> {
    let file = File::open(path).map_err(|source| Error::FileOpen {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = FrameReader::new(BufReader::new(file));

    let mut frames = 0;
    while reader.next_frame()?.is_some() {
        frames += 1;
    }
    Ok(frames)
}

/// A connected, subscribed recorder ready to run as a subsystem
pub struct RecordingSession {
    recorder: Recorder<BufWriter<File>>,
    path: PathBuf,
    client: AsyncClient,
    incoming: UnboundedReceiver<Received>,
    event_loop: JoinHandle<()>,
    print_stats: bool,
}

impl RecordingSession {
    /// Create the output file, then connect and subscribe.
    ///
    /// Any failure here ends the program before recording begins.
    pub async fn start(args: &RecordCli, path: PathBuf) -> Result<Self, Error> {
        let mut recorder = Recorder::create(&path)?;

        let url = BrokerUrl::parse(&args.broker)?;
        let (client, mut eventloop) = broker::connect(&url, "mqtt-record").await?;
        for received in broker::subscribe(&client, &mut eventloop, &args.topic).await? {
            recorder.record_received(&received)?;
        }

        let (tx, incoming) = mpsc::unbounded_channel();
        let event_loop = broker::spawn_event_loop(
            eventloop,
            Some(Subscription {
                client: client.clone(),
                topic: args.topic.clone(),
                incoming: tx,
            }),
        );

        Ok(Self {
            recorder,
            path,
            client,
            incoming,
            event_loop,
            print_stats: args.stats,
        })
    }

    /// Record until shutdown is requested, then close and verify the file
    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), Error> {
        let mut report_timer = interval(REPORT_INTERVAL);
        report_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        report_timer.tick().await;

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    info!("Recording interrupted");
                    break;
                }
                _ = report_timer.tick() => self.report(),
                received = self.incoming.recv() => match received {
                    Some(received) => {
                        if let Err(e) = self.recorder.record_received(&received) {
                            error!("Failed to write frame: {}", e);
                            return Err(e.into());
                        }
                    }
                    None => {
                        warn!("MQTT event loop stopped");
                        break;
                    }
                },
            }
        }

        self.close().await
    }

    fn report(&mut self) {
        let count = self.recorder.take_interval_count();
        info!(
            "Recorded {:4} messages in last {} sec.",
            count,
            REPORT_INTERVAL.as_secs()
        );
        if self.print_stats && log_enabled!(Level::Info) {
            print!("{}", self.recorder.stats());
        }
    }

    async fn close(self) -> Result<(), Error> {
        if let Err(e) = self.client.disconnect().await {
            debug!("MQTT disconnect failed: {}", e);
        }
        if tokio::time::timeout(DISCONNECT_TIMEOUT, self.event_loop)
            .await
            .is_err()
        {
            debug!("MQTT event loop did not stop in time");
        }

        println!();
        println!("Message Statistics by Topic:");
        print!("{}", self.recorder.stats());

        let written = self.recorder.frame_count();
        let bytes = self.recorder.bytes_written();
        self.recorder.finish()?;

        let verified = verify_recording(&self.path)?;
        if verified != written {
            return Err(FrameError::Corrupt(format!(
                "{} frames written but {} read back",
                written, verified
            ))
            .into());
        }
        info!(
            "Recording finished: {} frames, {} bytes in {}",
            written,
            bytes,
            self.path.display()
        );
        Ok(())
    }
}
