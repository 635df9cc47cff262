use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::error::TransportError;
use crate::transport::{Backoff, Inbound, Publisher};

pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_CHANNEL_CAPACITY: usize = 10;
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Broker connection parameters.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub publish_timeout: Duration,
    /// Topic filters (re)subscribed on every connect.
    pub subscriptions: Vec<String>,
}

impl MqttSettings {
    pub fn new(host: &str, port: u16, client_id: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            client_id: client_id.to_string(),
            keep_alive: Duration::from_secs(60),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            subscriptions: Vec::new(),
        }
    }

    pub fn subscribe(mut self, filter: String) -> Self {
        self.subscriptions.push(filter);
        self
    }
}

/// Creates the publishing handle and the event-loop driver for `settings`.
///
/// Nothing touches the network until [`MqttDriver::run`] polls.
pub fn connect(settings: &MqttSettings) -> (MqttPublisher, MqttDriver) {
    let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    options.set_keep_alive(settings.keep_alive);
    options.set_manual_acks(true);

    let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
    let publisher = MqttPublisher {
        client: client.clone(),
        timeout: settings.publish_timeout,
    };
    let driver = MqttDriver {
        client,
        eventloop,
        subscriptions: settings.subscriptions.clone(),
        backoff: Backoff::default(),
        dropped: 0,
    };
    (publisher, driver)
}

#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    timeout: Duration,
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let request = self.client.publish(topic, QoS::AtLeastOnce, false, payload);
        match time::timeout(self.timeout, request).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(TransportError::PublishTimeout {
                topic: topic.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

/// Owns the rumqttc event loop: connects, resubscribes, forwards publishes.
pub struct MqttDriver {
    client: AsyncClient,
    eventloop: EventLoop,
    subscriptions: Vec<String>,
    backoff: Backoff,
    /// Inbound messages discarded because the consumer queue was full.
    dropped: u64,
}

/// Result of handing one inbound message to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Forward {
    Queued,
    Dropped,
    Closed,
}

fn forward(inbound: &mpsc::Sender<Inbound>, message: Inbound, dropped: &mut u64) -> Forward {
    match inbound.try_send(message) {
        Ok(()) => Forward::Queued,
        Err(TrySendError::Full(message)) => {
            *dropped += 1;
            error!(
                topic = %message.topic,
                dropped = *dropped,
                "inbound queue full, dropping message"
            );
            Forward::Dropped
        }
        Err(TrySendError::Closed(_)) => Forward::Closed,
    }
}

impl MqttDriver {
    /// Polls the connection until shutdown or until the inbound receiver closes.
    ///
    /// Connection errors are retried forever with exponential backoff. Inbound
    /// publishes are acknowledged only after they have been queued for the
    /// consumer. While the consumer is saturated they are dropped, counted and
    /// logged at error level, and the event loop keeps servicing outbound
    /// publishes.
    pub async fn run(mut self, inbound: mpsc::Sender<Inbound>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt connected");
                        self.backoff.reset();
                        self.subscribe_all();
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = Inbound {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        };
                        if forward(&inbound, message, &mut self.dropped) == Forward::Closed {
                            break;
                        }
                        // Dropped messages are acked too, or the broker's inflight window fills.
                        if let Err(e) = self.client.try_ack(&publish) {
                            warn!(topic = %publish.topic, "ack not queued: {e}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("mqtt disconnected by broker");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let delay = self.backoff.next_delay();
                        let err = TransportError::Connection(e.to_string());
                        error!(retry_in_ms = delay.as_millis() as u64, "{err}");
                        tokio::select! {
                            changed = shutdown.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                            _ = time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
        self.disconnect().await;
        info!(dropped = self.dropped, "mqtt event loop stopped");
    }

    /// Sends DISCONNECT and polls until it is flushed or the grace period ends.
    async fn disconnect(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("disconnect request not queued: {e}");
            return;
        }
        let eventloop = &mut self.eventloop;
        let flushed = time::timeout(DISCONNECT_GRACE, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if flushed.is_err() {
            debug!("disconnect not flushed within grace period");
        }
    }

    fn subscribe_all(&self) {
        for filter in &self.subscriptions {
            match self.client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                Ok(()) => info!(%filter, "subscribed"),
                Err(e) => error!(%filter, "subscribe failed: {e}"),
            }
        }
    }
}
