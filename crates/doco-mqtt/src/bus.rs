//! MQTT connection
//!
//! The rumqttc event loop runs on its own task. While connected it forwards
//! inbound publishes as [`BusEvent::Message`]. When the connection drops it
//! parks until [`MessageBus::request_reconnect`] is called, so the control loop
//! decides how often a reconnect is attempted (once per tick) and a dead
//! broker never turns into a busy loop.

use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::topics::OFFLINE;

/// Capacity of the rumqttc request queue and of the event channel
const CHANNEL_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Not connected to broker")]
    Disconnected,
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Publish/subscribe surface used by the publisher and the control loop
pub trait MessageBus: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Queue a QoS 1 publish without waiting for the broker
    fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), BusError>;

    fn subscribe(&self, topic: &str) -> Result<(), BusError>;

    /// Allow one more connection attempt if the connection is down
    fn request_reconnect(&self) {}
}

/// Connection change or inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// Broker accepted the connection (first connect or reconnect)
    Connected,
    /// An established connection was lost
    Disconnected,
    Message { topic: String, payload: String },
}

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    /// Retained `offline` is published here by the broker if we vanish
    pub last_will_topic: String,
}

impl BusConfig {
    pub fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        options.set_last_will(LastWill::new(
            &self.last_will_topic,
            OFFLINE,
            QoS::AtLeastOnce,
            true,
        ));
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            options.set_credentials(username, password);
        }
        options
    }
}

/// MQTT client handle
pub struct MqttBus {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    reconnect: Arc<Notify>,
}

impl MqttBus {
    /// Start the connection task. Connection attempts begin immediately;
    /// events arrive on the returned receiver.
    pub fn connect(config: &BusConfig) -> (Self, mpsc::Receiver<BusEvent>) {
        let (client, eventloop) = AsyncClient::new(config.options(), CHANNEL_CAPACITY);
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let reconnect = Arc::new(Notify::new());

        info!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            "Connecting to MQTT broker"
        );
        tokio::spawn(drive(eventloop, connected.clone(), reconnect.clone(), tx));

        (
            Self {
                client,
                connected,
                reconnect,
            },
            rx,
        )
    }

    /// Graceful disconnect; the last will is not triggered
    pub async fn disconnect(&self) -> Result<(), BusError> {
        self.client.disconnect().await?;
        Ok(())
    }
}

impl MessageBus for MqttBus {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::Disconnected);
        }
        self.client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload.as_bytes().to_vec())?;
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::Disconnected);
        }
        self.client.try_subscribe(topic, QoS::AtLeastOnce)?;
        Ok(())
    }

    fn request_reconnect(&self) {
        if !self.is_connected() {
            self.reconnect.notify_one();
        }
    }
}

async fn drive(
    mut eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    reconnect: Arc<Notify>,
    tx: mpsc::Sender<BusEvent>,
) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::Release);
                info!("Connected to MQTT broker");
                Some(BusEvent::Connected)
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => Some(BusEvent::Message {
                topic: publish.topic.clone(),
                payload: String::from_utf8_lossy(&publish.payload).into_owned(),
            }),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                connected.store(false, Ordering::Release);
                info!("Disconnected from MQTT broker");
                return;
            }
            Ok(_) => None,
            Err(e) => {
                if connected.swap(false, Ordering::AcqRel) {
                    warn!(error = %e, "MQTT connection lost");
                    if tx.send(BusEvent::Disconnected).await.is_err() {
                        return;
                    }
                } else {
                    debug!(error = %e, "MQTT connection attempt failed");
                }
                reconnect.notified().await;
                None
            }
        };

        if let Some(event) = event {
            if tx.send(event).await.is_err() {
                debug!("Bus event receiver dropped, stopping MQTT task");
                return;
            }
        }
    }
}
