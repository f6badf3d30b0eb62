//! MQTT plumbing: the bot's handle for publishing/subscribing and the
//! consumer loop that feeds inbound bus messages into the bot.
//!
//! Every topic is prefixed with the configured topic prefix. Subscriptions
//! are remembered so they can be replayed after the broker drops us.

use anyhow::Result;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::bot::Bot;
use crate::config::MqttConfig;

pub struct Bus {
    client: AsyncClient,
    prefix: String,
    subscriptions: Mutex<Vec<String>>,
}

impl Bus {
    pub fn new(cfg: &MqttConfig) -> (Self, EventLoop) {
        let mut options = MqttOptions::new("busbot", &cfg.host, cfg.port);
        options.set_keep_alive(Duration::from_secs(60));

        let (client, event_loop) = AsyncClient::new(options, 64);

        (
            Self {
                client,
                prefix: cfg.prefix.clone(),
                subscriptions: Mutex::new(Vec::new()),
            },
            event_loop,
        )
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        let full = format!("{}{}", self.prefix, topic);
        info!("subscribing to {}", full);
        self.subscriptions.lock().unwrap().push(full.clone());
        self.client.subscribe(full, QoS::AtMostOnce).await?;
        Ok(())
    }

    pub async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        self.publish_with(topic, payload, false).await
    }

    /// Publish with the broker-side retain flag, for parameters late-joining
    /// plugins must still see.
    pub async fn publish_retained(&self, topic: &str, payload: &str) -> Result<()> {
        self.publish_with(topic, payload, true).await
    }

    async fn publish_with(&self, topic: &str, payload: &str, retain: bool) -> Result<()> {
        let full = format!("{}{}", self.prefix, topic);
        debug!("publishing {:?} to {}", payload, full);
        self.client
            .publish(full, QoS::AtMostOnce, retain, payload)
            .await?;
        Ok(())
    }

    /// Replay every subscription; the broker forgets them across reconnects.
    async fn resubscribe_all(&self) -> Result<()> {
        let topics = self.subscriptions.lock().unwrap().clone();
        for topic in topics {
            info!("re-subscribing to {}", topic);
            self.client.subscribe(topic, QoS::AtMostOnce).await?;
        }
        Ok(())
    }
}

/// Drive the MQTT event loop forever, routing publishes into the bot.
pub async fn run(mut event_loop: EventLoop, bot: Arc<Bot>) {
    let mut first_connect = true;

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("connected to MQTT broker");
                // The initial subscriptions are already queued on the
                // client; replaying them here would deliver duplicates.
                if first_connect {
                    first_connect = false;
                } else if let Err(e) = bot.bus().resubscribe_all().await {
                    error!("re-subscribe failed: {}", e);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let topic = publish.topic.clone();
                match String::from_utf8(publish.payload.to_vec()) {
                    Ok(payload) => {
                        if let Err(e) = bot.handle_bus_message(&topic, &payload).await {
                            error!("bus message on {} failed: {:#}", topic, e);
                        }
                    }
                    Err(_) => warn!("dropping non-UTF-8 payload on {}", topic),
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT connection error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
