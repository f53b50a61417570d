//! MQTT publisher.
//!
//! Values go to `<device>/<id>`, channel descriptions to `<device>/<id>/$meta`
//! and batch lines to the configured batch topic. Set commands arrive on
//! `<device>/<id>/set`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use unitbridge_core::publish::{Channel, PublishError, Publisher};
use unitbridge_core::settings::BrokerSettings;

const DEFAULT_MQTT_PORT: u16 = 1883;
const SET_SUFFIX: &str = "/set";

/// A set command received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCommand {
    pub id: String,
    pub value: String,
}

/// Split `tcp://host:port` into host and port.
pub fn parse_broker_url(url: &str) -> Result<(String, u16)> {
    let address = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url)
        .trim_end_matches('/');
    match address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .with_context(|| format!("Invalid broker port in {}", url))?;
            Ok((host.to_string(), port))
        }
        None if !address.is_empty() => Ok((address.to_string(), DEFAULT_MQTT_PORT)),
        None => anyhow::bail!("Broker URL {} has no host", url),
    }
}

/// Property id addressed by a set topic, if `topic` is one.
pub fn set_target(device: &str, topic: &str) -> Option<String> {
    let id = topic
        .strip_prefix(device)?
        .strip_prefix('/')?
        .strip_suffix(SET_SUFFIX)?;
    (!id.is_empty() && !id.contains('/')).then(|| id.to_string())
}

/// Publisher backed by an MQTT broker.
pub struct MqttPublisher {
    client: AsyncClient,
    device: String,
    batch_topic: Option<String>,
    retained: Mutex<HashMap<String, bool>>,
}

impl MqttPublisher {
    /// Create the client and start its event loop. Set commands are forwarded
    /// on the returned receiver.
    pub async fn connect(
        broker: &BrokerSettings,
        batch_topic: Option<String>,
    ) -> Result<(Self, mpsc::Receiver<SetCommand>)> {
        let (host, port) = parse_broker_url(&broker.url)?;
        let client_id = format!("{}-{:08x}", broker.device_name, rand::random::<u32>());
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(password)) = (&broker.user, &broker.password) {
            options.set_credentials(user, password);
        }

        let (client, event_loop) = AsyncClient::new(options, 64);
        let set_topic = format!("{}/+{}", broker.device_name, SET_SUFFIX);
        client
            .subscribe(&set_topic, QoS::AtLeastOnce)
            .await
            .context("Failed to subscribe to set commands")?;
        info!(broker = %broker.url, topic = %set_topic, "MQTT client started");

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(drive_event_loop(event_loop, broker.device_name.clone(), tx));

        if let Some(topic) = &batch_topic {
            info!(topic = %topic, "Publishing batch lines");
        }

        Ok((
            Self {
                client,
                device: broker.device_name.clone(),
                batch_topic,
                retained: Mutex::new(HashMap::new()),
            },
            rx,
        ))
    }

    fn retained(&self) -> MutexGuard<'_, HashMap<String, bool>> {
        self.retained
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn send(&self, topic: String, retain: bool, payload: Vec<u8>) -> Result<(), PublishError> {
        self.client
            .publish(&topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| PublishError::Failed {
                topic,
                reason: e.to_string(),
            })
    }
}

async fn drive_event_loop(
    mut event_loop: EventLoop,
    device: String,
    commands: mpsc::Sender<SetCommand>,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let Some(id) = set_target(&device, &publish.topic) else {
                    continue;
                };
                let value = String::from_utf8_lossy(&publish.payload).trim().to_string();
                debug!(id = %id, value = %value, "Set command");
                if !forward_command(&commands, SetCommand { id, value }) {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT connection error: {}", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

/// Hand a set command to the writer without waiting; a full queue drops the
/// command. Returns `false` once the writer is gone.
fn forward_command(commands: &mpsc::Sender<SetCommand>, command: SetCommand) -> bool {
    match commands.try_send(command) {
        Ok(()) => true,
        Err(TrySendError::Full(command)) => {
            warn!(id = %command.id, "Set command queue full, dropping command");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn announce(&self, channels: &[Channel]) -> Result<(), PublishError> {
        for channel in channels {
            self.retained().insert(channel.id.clone(), channel.retained);
            let meta = serde_json::to_vec(channel)?;
            self.send(format!("{}/{}/$meta", self.device, channel.id), true, meta)
                .await?;
        }
        Ok(())
    }

    async fn publish_value(&self, id: &str, value: Option<&str>) -> Result<(), PublishError> {
        let retain = self.retained().get(id).copied().unwrap_or(true);
        let payload = value.unwrap_or_default().as_bytes().to_vec();
        self.send(format!("{}/{}", self.device, id), retain, payload)
            .await
    }

    async fn publish_batch(&self, line: &str) -> Result<(), PublishError> {
        match &self.batch_topic {
            Some(topic) => self.send(topic.clone(), false, line.as_bytes().to_vec()).await,
            None => Ok(()),
        }
    }
}
