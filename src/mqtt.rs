use std::time::Duration;

use log::{debug, error, info};
use rumqttc::{MqttOptions, QoS, SubscribeFilter};
use tokio::sync::broadcast;

use crate::config;
use crate::messages::ScanCommand;
use crate::tag::{TAG_DETECTED_EVENT, TagDetected};

#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error(transparent)]
    Client(#[from] rumqttc::ClientError),
    #[error("encoding event: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    publisher_id: String,
    topic_path: String,
}

impl MqttClient {
    pub fn new(config: &config::MqttConfig) -> (Self, rumqttc::EventLoop) {
        let publisher_id = config
            .publisher_id
            .as_ref()
            .unwrap_or(&"nfc-monitor".to_string())
            .to_string();

        let mut mqttoptions = MqttOptions::new(
            publisher_id.clone(),
            config.host.clone(),
            config.port.unwrap_or(1883),
        );

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, 10);

        (
            MqttClient {
                client,
                publisher_id,
                topic_path: config.topic_path.clone().unwrap_or("nfc".to_string()),
            },
            eventloop,
        )
    }

    pub async fn subscribe(&self) -> Result<(), rumqttc::ClientError> {
        self.client
            .subscribe_many(vec![
                SubscribeFilter::new(format!("{}/scan/start", self.topic_path), QoS::AtMostOnce),
                SubscribeFilter::new(format!("{}/scan/stop", self.topic_path), QoS::AtMostOnce),
            ])
            .await?;

        Ok(())
    }

    /// Drives the connection, turning control messages into scan commands.
    pub async fn event_loop(
        &self,
        eventloop: &mut rumqttc::EventLoop,
        tx: broadcast::Sender<ScanCommand>,
    ) {
        loop {
            match eventloop.poll().await {
                Ok(notification) => match notification {
                    rumqttc::Event::Incoming(rumqttc::Packet::Publish(p)) => {
                        debug!("Received MQTT message on topic {}: {:?}", p.topic, p.payload);

                        let Some(command) = command_for_topic(&p.topic) else {
                            continue;
                        };
                        if let Err(err) = tx.send(command) {
                            error!("Error forwarding scan command: {:?}", err);
                        }
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::SubAck(_)) => {
                        debug!("Subscription acknowledged");
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_)) => {
                        debug!("Connection acknowledged");
                        if let Err(err) = self.subscribe().await {
                            error!("Error subscribing to MQTT topics: {:?}", err);
                        }
                    }
                    _ => {}
                },
                Err(e) => {
                    error!("Error polling MQTT event loop: {:?}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    pub fn event_topic(&self) -> String {
        format!(
            "{}/{}/{}",
            self.topic_path,
            topic_segment(&self.publisher_id),
            TAG_DETECTED_EVENT
        )
    }

    pub async fn announce_tag(&self, event: &TagDetected) -> Result<(), MqttError> {
        info!("Announcing tag {} on MQTT", event.tag_id);
        let payload = serde_json::to_string(event)?;
        self.client
            .publish(self.event_topic(), QoS::AtMostOnce, false, payload)
            .await?;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), rumqttc::ClientError> {
        debug!("Disconnecting MQTT client");
        self.client.disconnect().await
    }
}

fn command_for_topic(topic: &str) -> Option<ScanCommand> {
    match topic {
        t if t.ends_with("/scan/start") => Some(ScanCommand::Start),
        t if t.ends_with("/scan/stop") => Some(ScanCommand::Stop),
        _ => None,
    }
}

/// Replaces characters that would split or wildcard an MQTT topic level.
fn topic_segment(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
}
