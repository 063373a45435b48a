//! MQTT broker connection.
//!
//! Both tools talk to the broker through a [`rumqttc::AsyncClient`]. The
//! matching [`EventLoop`] is polled by hand until the broker confirms the
//! connection (and, for the recorder, the subscription), after which it is
//! handed to a background task by [`spawn_event_loop`].

use http::Uri;
use log::{debug, info, warn};
use mqtt_rr_core::frame::MAX_FRAME_LEN;
use mqtt_rr_core::{PublishError, Publisher, RecordedMessage};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Incoming, MqttOptions,
    Outgoing, QoS, SubscribeReasonCode,
};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::Error;

pub const DEFAULT_PORT: u16 = 1883;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const REQUEST_CAPACITY: usize = 100;
/// Largest MQTT packet accepted or sent. Kept below the frame limit so every
/// received publish fits in one recording frame.
const MAX_PACKET_SIZE: usize = MAX_FRAME_LEN - 1024;

/// Broker address parsed from a `tcp://[user[:password]@]host[:port]` URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerUrl {
    pub host: String,
    pub port: u16,
    pub credentials: Option<(String, String)>,
}

impl BrokerUrl {
    /// Accepts `tcp://` and `mqtt://` URLs, or a bare `host[:port]`
    pub fn parse(url: &str) -> Result<Self, Error> {
        let invalid = |reason: String| Error::ConnectionFailure(format!("'{}': {}", url, reason));

        let full = if url.contains("://") {
            url.to_string()
        } else {
            format!("tcp://{}", url)
        };
        let uri: Uri = full.parse().map_err(|e| invalid(format!("{}", e)))?;

        match uri.scheme_str() {
            Some("tcp") | Some("mqtt") => {}
            Some(other) => return Err(invalid(format!("unsupported scheme '{}'", other))),
            None => return Err(invalid("missing scheme".to_string())),
        }

        let authority = uri
            .authority()
            .ok_or_else(|| invalid("missing host".to_string()))?;
        let host = authority.host();
        if host.is_empty() {
            return Err(invalid("missing host".to_string()));
        }

        let credentials = authority
            .as_str()
            .rsplit_once('@')
            .map(|(userinfo, _)| match userinfo.split_once(':') {
                Some((user, password)) => (user.to_string(), password.to_string()),
                None => (userinfo.to_string(), String::new()),
            });

        Ok(Self {
            host: host.to_string(),
            port: authority.port_u16().unwrap_or(DEFAULT_PORT),
            credentials,
        })
    }

    fn options(&self, client_id: String) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        if let Some((user, password)) = &self.credentials {
            options.set_credentials(user.clone(), password.clone());
        }
        options
    }
}

impl std::fmt::Display for BrokerUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A publish as it arrived, stamped with the local wall-clock time of receipt
#[derive(Debug, Clone)]
pub struct Received {
    pub received_at_millis: i64,
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Received {
    fn now(publish: rumqttc::Publish) -> Self {
        Self {
            received_at_millis: chrono::Utc::now().timestamp_millis(),
            topic: publish.topic,
            payload: publish.payload.to_vec(),
        }
    }
}

/// Connect and wait for the broker to accept the session.
///
/// `client_name` is combined with the process id into the client id, so two
/// instances of the same tool can run side by side.
pub async fn connect(url: &BrokerUrl, client_name: &str) -> Result<(AsyncClient, EventLoop), Error> {
    let client_id = format!("{}-{}", client_name, std::process::id());
    debug!("Connecting to MQTT broker {} as '{}'", url, client_id);

    let (client, mut eventloop) = AsyncClient::new(url.options(client_id), REQUEST_CAPACITY);

    let confirmed = tokio::time::timeout(CONFIRM_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    return if ack.code == ConnectReturnCode::Success {
                        Ok(())
                    } else {
                        Err(format!("connection refused: {:?}", ack.code))
                    }
                }
                Ok(_) => {}
                Err(e) => return Err(e.to_string()),
            }
        }
    })
    .await;

    match confirmed {
        Ok(Ok(())) => {
            info!("Connected to MQTT broker {}", url);
            Ok((client, eventloop))
        }
        Ok(Err(reason)) => Err(Error::ConnectionFailure(format!("{}: {}", url, reason))),
        Err(_) => Err(Error::ConnectionFailure(format!(
            "{}: no answer within {} s",
            url,
            CONFIRM_TIMEOUT.as_secs()
        ))),
    }
}

/// Subscribe with QoS 0 and wait for the broker's acknowledgement.
///
/// Publishes that race ahead of the acknowledgement are returned so the
/// caller can record them.
pub async fn subscribe(
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    topic: &str,
) -> Result<Vec<Received>, Error> {
    let failure = |reason: String| Error::SubscriptionFailure {
        topic: topic.to_string(),
        reason,
    };

    client
        .subscribe(topic, QoS::AtMostOnce)
        .await
        .map_err(|e| failure(e.to_string()))?;

    let mut early = Vec::new();
    let confirmed = tokio::time::timeout(CONFIRM_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::SubAck(ack))) => {
                    return if ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        Err("rejected by broker".to_string())
                    } else {
                        Ok(())
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => early.push(Received::now(publish)),
                Ok(_) => {}
                Err(e) => return Err(e.to_string()),
            }
        }
    })
    .await;

    match confirmed {
        Ok(Ok(())) => {
            info!("Subscribed to '{}'", topic);
            Ok(early)
        }
        Ok(Err(reason)) => Err(failure(reason)),
        Err(_) => Err(failure(format!("no answer within {} s", CONFIRM_TIMEOUT.as_secs()))),
    }
}

/// A live subscription whose publishes are forwarded to `incoming`
pub struct Subscription {
    pub client: AsyncClient,
    pub topic: String,
    pub incoming: UnboundedSender<Received>,
}

impl Subscription {
    /// Ask for the topic again on a fresh session.
    ///
    /// Must not wait on the request queue: it runs on the task that drains it.
    fn renew(&self) {
        match self.client.try_subscribe(self.topic.clone(), QoS::AtMostOnce) {
            Ok(()) => info!("Resubscribing to '{}'", self.topic),
            Err(e) => warn!("Cannot resubscribe to '{}': {}", self.topic, e),
        }
    }
}

/// Keep polling the event loop in the background.
///
/// With a `subscription`, incoming publishes are forwarded to its channel,
/// and every connection acknowledgement after a reconnect renews the
/// subscription, as sessions are clean. The task ends after an outgoing
/// disconnect, once every client handle is gone, or when the receiving side
/// of the channel is dropped. Other connection errors are logged and the
/// client reconnects on the next poll.
pub fn spawn_event_loop(
    mut eventloop: EventLoop,
    subscription: Option<Subscription>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    if let Some(subscription) = &subscription {
                        if subscription.incoming.send(Received::now(publish)).is_err() {
                            break;
                        }
                    }
                }
                // connect() consumed the first acknowledgement
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("Reconnected to MQTT broker");
                    if let Some(subscription) = &subscription {
                        subscription.renew();
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("Disconnected from MQTT broker");
                    break;
                }
                Ok(_) => {}
                Err(ConnectionError::RequestsDone) => break,
                Err(e) => {
                    warn!("MQTT connection error: {}", e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    })
}

/// [`Publisher`] sending QoS 0, non-retained messages through an
/// [`AsyncClient`] from a blocking thread.
pub struct MqttPublisher {
    client: AsyncClient,
    runtime: Handle,
}

impl MqttPublisher {
    /// Publishing blocks on `runtime`, so use it from a `spawn_blocking` thread
    pub fn new(client: AsyncClient, runtime: Handle) -> Self {
        Self { client, runtime }
    }
}

impl Publisher for MqttPublisher {
    fn publish(&mut self, message: &RecordedMessage) -> Result<(), PublishError> {
        self.runtime
            .block_on(self.client.publish(
                message.topic.clone(),
                QoS::AtMostOnce,
                false,
                message.payload.clone(),
            ))
            .map_err(|e| PublishError {
                topic: message.topic.clone(),
                reason: e.to_string(),
            })
    }
}
