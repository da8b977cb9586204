use crate::mqtt_config::MqttConfig;

pub trait MqttWrapper {
    // This trait provides an interface that decouples library code from an
    // implementation of the MQTT client. On library calling code, one needs to
    // wrap the MQTT implementation, i.e. the client, in a new type that in
    // turn implements this trait. Telemetry is fire-and-forget, so
    // implementations publish at most once.

    fn publish<S, V>(&mut self, topic: S, retain: bool, payload: V) -> anyhow::Result<()>
    where
        S: Clone + Into<String>,
        V: Clone + Into<Vec<u8>>;

    fn disconnect(&mut self) -> anyhow::Result<()>;

    fn new(config: &MqttConfig, suffix: &str) -> Self;
}
