//! ==============================================================================
//! ingest.rs - mqtt ingestion relay
//! ==============================================================================
//!
//! purpose:
//!     turns each mqtt publish into one persisted reading and one push event.
//!
//! ```text
//!     mqtt publish ──► decode ──► store.insert ──► broadcast nuevoDato
//!                        │             │
//!                        ▼             ▼
//!                   warn + drop   error + skip broadcast
//! ```
//!
//! relationships:
//!     - used by: main.rs (spawns run_mqtt), web.rs (subscribes viewers)
//!     - uses: store.rs (persistence), domain.rs (wire format)
//!
//! there is no batching and no retry: one message, one document, one
//! broadcast. delivery beyond that is whatever qos the broker gives us.
//!
//! ==============================================================================

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::config::MqttConfig;
use crate::domain::{PushEvent, SensorReading};
use crate::error::IngestError;
use crate::store::ReadingStore;

/// parse an mqtt payload into a reading
pub fn decode(payload: &[u8]) -> Result<SensorReading, IngestError> {
    let reading: SensorReading = serde_json::from_slice(payload)?;
    Ok(reading.normalized())
}

#[derive(Clone)]
pub struct Relay {
    store: Arc<dyn ReadingStore>,
    push: broadcast::Sender<PushEvent>,
    show_readings: bool,
}

impl Relay {
    pub fn new(store: Arc<dyn ReadingStore>, channel_capacity: usize) -> Self {
        let (push, _) = broadcast::channel(channel_capacity.max(1));
        Self { store, push, show_readings: false }
    }

    pub fn with_reading_log(mut self, show_readings: bool) -> Self {
        self.show_readings = show_readings;
        self
    }

    pub fn store(&self) -> &Arc<dyn ReadingStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.push.subscribe()
    }

    /// persist, then broadcast; nothing is broadcast when persisting fails
    pub async fn ingest(&self, reading: SensorReading) -> Result<(), IngestError> {
        self.store.insert(&reading).await?;

        if self.show_readings {
            tracing::info!(
                fecha = %reading.fecha,
                humedad = ?reading.humedad,
                temperatura = ?reading.temperatura,
                ph = ?reading.ph,
                "[INGEST] reading stored"
            );
        }

        // no receivers just means nobody is watching
        if let Ok(viewers) = self.push.send(PushEvent::NuevoDato(reading)) {
            tracing::debug!(viewers, "[INGEST] broadcast nuevoDato");
        }
        Ok(())
    }

    /// full path for one raw payload; failures are logged here
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<(), IngestError> {
        let reading = match decode(payload) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(
                    payload = %String::from_utf8_lossy(payload),
                    "[INGEST] dropping malformed message: {}",
                    e
                );
                return Err(e);
            }
        };

        if let Err(e) = self.ingest(reading).await {
            tracing::error!("[INGEST] {}", e);
            return Err(e);
        }
        Ok(())
    }
}

fn qos_level(level: u8) -> QoS {
    match level {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

// ==============================================================================
// mqtt subscriber
// ==============================================================================

pub async fn run_mqtt(config: MqttConfig, relay: Relay) {
    let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.max(5)));
    options.set_clean_session(true);
    if let (Some(user), Some(pass)) = (config.username.clone(), config.password.clone()) {
        options.set_credentials(user, pass);
    }

    let qos = qos_level(config.qos);
    let (client, mut eventloop) = AsyncClient::new(options, 100);

    tracing::info!(
        "[MQTT] connecting to {}:{} (topic {})",
        config.host,
        config.port,
        config.topic
    );

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("[MQTT] connected");
                // clean sessions forget subscriptions, so resubscribe every time
                if let Err(e) = client.subscribe(config.topic.clone(), qos).await {
                    tracing::error!("[MQTT] subscribe to {} failed: {}", config.topic, e);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::trace!(topic = %publish.topic, bytes = publish.payload.len(), "[MQTT] publish");
                let _ = relay.handle_payload(&publish.payload).await;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("[MQTT] connection error: {}", e);
                tokio::time::sleep(config.reconnect_delay()).await;
            }
        }
    }
}
