//! MQTT bus listener

use std::sync::Arc;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;

use super::gateway::{IngestionGateway, RawMessage};

/// Subscribes to device telemetry and feeds every publish to the gateway
pub struct BusListener {
    config: MqttConfig,
    gateway: Arc<IngestionGateway>,
}

impl BusListener {
    /// Create a listener
    pub fn new(config: MqttConfig, gateway: Arc<IngestionGateway>) -> Self {
        Self { config, gateway }
    }

    fn options(&self) -> MqttOptions {
        let mut options =
            MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(self.config.keep_alive);
        if let Some(username) = &self.config.username {
            let password = self.config.password.clone().unwrap_or_default();
            options.set_credentials(username, password);
        }
        options
    }

    /// Poll the broker until `shutdown` fires
    ///
    /// The subscription is renewed on every connection acknowledgement, so a
    /// broker restart does not silently end the stream. Connection errors are
    /// logged and retried after `reconnect_delay`.
    pub async fn run(self, shutdown: CancellationToken) {
        let (client, mut eventloop) =
            AsyncClient::new(self.options(), self.config.channel_capacity.max(1));

        info!(
            host = %self.config.host,
            port = self.config.port,
            topic = %self.config.topic,
            "MQTT listener started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(topic = %self.config.topic, "Connected to broker, subscribing");
                        if let Err(e) = client.try_subscribe(&self.config.topic, QoS::AtLeastOnce) {
                            error!(error = %e, "Failed to subscribe");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!(
                            topic = %publish.topic,
                            bytes = publish.payload.len(),
                            "Message received"
                        );
                        self.gateway
                            .handle(RawMessage::from_topic(publish.topic, publish.payload));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "MQTT connection error");
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                        }
                    }
                },
            }
        }

        if let Err(e) = client.try_disconnect() {
            debug!(error = %e, "MQTT disconnect failed");
        }
        info!("MQTT listener stopped");
    }
}
