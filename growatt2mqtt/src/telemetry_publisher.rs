use crate::{
    metric_collector::MetricCollector,
    mqtt_config::MqttConfig,
    mqtt_wrapper::MqttWrapper,
    telemetry::TelemetrySnapshot,
};

use anyhow::Context;
use log::{debug, warn};

/// Publishes every snapshot as one flat JSON document on a fixed topic.
pub struct TelemetryPublisher<MQTT: MqttWrapper> {
    client: MQTT,
    topic: String,
}

impl<MQTT: MqttWrapper> TelemetryPublisher<MQTT> {
    pub fn new(config: &MqttConfig, suffix: &str) -> Self {
        let client = MQTT::new(config, suffix);
        Self::with_client(client, config.topic())
    }

    pub fn with_client(client: MQTT, topic: &str) -> Self {
        Self {
            client,
            topic: topic.to_string(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn client(&self) -> &MQTT {
        &self.client
    }
}

impl<MQTT: MqttWrapper> MetricCollector for TelemetryPublisher<MQTT> {
    fn publish(&mut self, snapshot: &TelemetrySnapshot) -> anyhow::Result<()> {
        let payload = snapshot
            .to_json()
            .context("unable to serialize telemetry snapshot")?;
        debug!("Publishing to {} with payload {payload}", self.topic);
        self.client
            .publish(self.topic.as_str(), false, payload)
            .with_context(|| format!("publishing to {} failed", self.topic))
    }

    fn disconnect(&mut self) {
        if let Err(e) = self.client.disconnect() {
            warn!("mqtt disconnect failed: {e:?}");
        }
    }
}
