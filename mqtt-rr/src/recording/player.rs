//! Replays a recording onto an MQTT broker.
//!
//! Pacing runs in [`PacingScheduler`] on a blocking thread. It publishes
//! through the async client via the runtime handle, and reads transport
//! events from [`TerminalControls`], which are fed by a Ctrl-C listener task
//! and, while halted, by the keyboard.

use crossbeam::channel::Sender;
use log::{debug, info};
use mqtt_rr_core::{
    ControlEvent, PacingScheduler, PlaybackCursor, PlaybackSettings, PlaybackState, SystemClock,
};
use rumqttc::AsyncClient;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::broker::{self, BrokerUrl, MqttPublisher};
use crate::terminal::TerminalControls;
use crate::{Error, ReplayCli};

const DISCONNECT_TIMEOUT: Duration = Duration::from_millis(100);

/// An opened recording and a connected client, ready to play
pub struct ReplaySession {
    file: File,
    path: PathBuf,
    client: AsyncClient,
    event_loop: JoinHandle<()>,
    settings: PlaybackSettings,
}

impl ReplaySession {
    /// Open the input file, then connect to the broker
    pub async fn start(args: &ReplayCli) -> Result<Self, Error> {
        let file = File::open(&args.input).map_err(|source| Error::FileOpen {
            path: args.input.clone(),
            source,
        })?;

        let url = BrokerUrl::parse(&args.broker)?;
        let (client, eventloop) = broker::connect(&url, "mqtt-replay").await?;
        let event_loop = broker::spawn_event_loop(eventloop, None);

        Ok(Self {
            file,
            path: args.input.clone(),
            client,
            event_loop,
            settings: PlaybackSettings::from_seconds(args.start, args.end),
        })
    }

    /// Play until the end of the recording or an abort.
    ///
    /// After [`PlaybackState::Finished`] the client is disconnected, giving
    /// queued publishes a short grace period. After
    /// [`PlaybackState::Aborted`] nothing is flushed; the caller is expected
    /// to exit right away.
    pub async fn run(self) -> Result<PlaybackState, Error> {
        info!("Replaying {}", self.path.display());

        let (tx, rx) = crossbeam::channel::unbounded();
        let interrupts = tokio::spawn(forward_interrupts(tx));

        let publisher = MqttPublisher::new(self.client.clone(), Handle::current());
        let controls = TerminalControls::new(rx);
        let reader = BufReader::new(self.file);
        let settings = self.settings;

        let playback = tokio::task::spawn_blocking(move || {
            let cursor = PlaybackCursor::new(reader);
            let mut scheduler =
                PacingScheduler::new(cursor, publisher, SystemClock::new(), controls, settings);
            let state = scheduler.run()?;
            info!(
                "Published {} messages, {} failed",
                scheduler.published_count(),
                scheduler.publish_failures()
            );
            Ok::<_, io::Error>(state)
        });
        let state = playback.await.map_err(io::Error::other)??;
        interrupts.abort();

        if state == PlaybackState::Finished {
            info!("Replay finished");
            if let Err(e) = self.client.disconnect().await {
                debug!("MQTT disconnect failed: {}", e);
            }
            if tokio::time::timeout(DISCONNECT_TIMEOUT, self.event_loop)
                .await
                .is_err()
            {
                debug!("MQTT event loop did not stop in time");
            }
        }
        Ok(state)
    }
}

/// Turn every Ctrl-C into a [`ControlEvent::Interrupt`]
async fn forward_interrupts(tx: Sender<ControlEvent>) {
    while tokio::signal::ctrl_c().await.is_ok() {
        if tx.send(ControlEvent::Interrupt).is_err() {
            break;
        }
    }
}
