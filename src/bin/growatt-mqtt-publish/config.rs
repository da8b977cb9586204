use std::{env, fs, path::PathBuf, time::Duration};

use growatt2mqtt::{
    clock_reconciler::DEFAULT_DRIFT_THRESHOLD_SECS, device_session::SessionSettings,
    mqtt_config::MqttConfig, poll_loop::DEFAULT_POLL_INTERVAL, telemetry::DeviceEndpoint,
};
use log::{info, warn};
use serde_derive::Deserialize;

static REQUEST_TIMEOUT_DEFAULT: u64 = 3_000;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub devices: Vec<DeviceEndpoint>,
    pub mqtt: Option<MqttConfig>,
    /// milliseconds between two cycles of the same device
    pub update_interval: Option<u64>,
    /// milliseconds allowed for connecting, reading and writing
    pub request_timeout: Option<u64>,
    /// seconds of clock drift tolerated before the device clock is reset
    pub clock_drift_threshold: Option<u32>,
    pub correct_clock: Option<bool>,
}

impl Config {
    pub fn is_valid(&self) -> bool {
        !self.devices.is_empty() && self.mqtt.as_ref().is_some_and(|x| x.is_valid())
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout.unwrap_or(REQUEST_TIMEOUT_DEFAULT))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            drift_threshold_secs: self
                .clock_drift_threshold
                .unwrap_or(DEFAULT_DRIFT_THRESHOLD_SECS),
            correct_clock: self.correct_clock.unwrap_or(true),
        }
    }

    /// Reads config.toml from the working directory, or next to the
    /// executable, and applies environment overrides.
    pub fn load() -> Config {
        let contents = match config_path().map(fs::read_to_string) {
            Some(Ok(contents)) => contents,
            Some(Err(e)) => {
                warn!("Could not read config.toml: {e}");
                "".into()
            }
            None => {
                warn!("No config.toml found, relying on environment variables");
                "".into()
            }
        };
        let mut config = Self::parse(&contents);
        config.apply_overrides(|key| env::var(key).ok());
        config
    }

    pub fn parse(contents: &str) -> Config {
        match toml::from_str::<Config>(contents) {
            Ok(config) => config,
            Err(e) => {
                warn!("toml config unparsable: {e}");
                Config::default()
            }
        }
    }

    pub fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // $GROWATT_DEVICES, e.g. "ew11-1:502:1,ew11-2"
        if let Some(devices) = var("GROWATT_DEVICES") {
            self.devices = devices
                .split(',')
                .map(str::trim)
                .filter(|device| !device.is_empty())
                .filter_map(parse_device)
                .collect();
        }
        // $MQTT_BROKER_HOST
        if let Some(host) = var("MQTT_BROKER_HOST") {
            self.mqtt.get_or_insert_with(MqttConfig::default).host = host;
        }
        // $MQTT_USERNAME (optional)
        if let Some(username) = var("MQTT_USERNAME") {
            self.mqtt.get_or_insert_with(MqttConfig::default).username = Some(username);
        }
        // $MQTT_PASSWORD (optional)
        if let Some(password) = var("MQTT_PASSWORD") {
            self.mqtt.get_or_insert_with(MqttConfig::default).password = Some(password);
        }
        // $MQTT_PORT (optional)
        if let Some(port) = var("MQTT_PORT") {
            self.mqtt.get_or_insert_with(MqttConfig::default).port =
                Some(port.parse().unwrap_or(1883));
        }
        // $MQTT_TOPIC (optional)
        if let Some(topic) = var("MQTT_TOPIC") {
            self.mqtt.get_or_insert_with(MqttConfig::default).topic = Some(topic);
        }
    }
}

fn config_path() -> Option<PathBuf> {
    let mut path = env::current_dir().ok()?;
    path.push("config.toml");
    if path.exists() {
        return Some(path);
    }
    info!("{} does not exist. Trying relative path", path.display());
    let mut path = env::current_exe().ok()?;
    path.pop();
    path.push("config.toml");
    path.exists().then_some(path)
}

fn parse_device(spec: &str) -> Option<DeviceEndpoint> {
    let mut parts = spec.split(':');
    let host = parts.next().filter(|host| !host.is_empty())?;
    let port = match parts.next() {
        Some(port) => port.parse().ok()?,
        None => 502,
    };
    let unit_id = match parts.next() {
        Some(unit_id) => unit_id.parse().ok()?,
        None => 1,
    };
    Some(DeviceEndpoint::new(host, port, unit_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const EXAMPLE: &str = r#"
        update_interval = 15000
        clock_drift_threshold = 90

        [[devices]]
        host = "ew11-1.whizzy.org"

        [[devices]]
        host = "ew11-2.whizzy.org"
        port = 8899
        unit_id = 3

        [mqtt]
        host = "broker"
        topic = "solar/growatt"
    "#;

    #[test]
    fn parses_devices_with_defaults() {
        let config = Config::parse(EXAMPLE);
        assert!(config.is_valid());
        assert_eq!(
            config.devices,
            vec![
                DeviceEndpoint::new("ew11-1.whizzy.org", 502, 1),
                DeviceEndpoint::new("ew11-2.whizzy.org", 8899, 3),
            ]
        );
        assert_eq!(config.update_interval(), Duration::from_secs(15));
        assert_eq!(config.request_timeout(), Duration::from_secs(3));
        assert_eq!(config.session_settings().drift_threshold_secs, 90);
        assert!(config.session_settings().correct_clock);
        assert_eq!(config.mqtt.as_ref().map(|m| m.topic()), Some("solar/growatt"));
    }

    #[test]
    fn empty_config_is_invalid() {
        let config = Config::parse("");
        assert!(!config.is_valid());
        assert_eq!(config.update_interval(), DEFAULT_POLL_INTERVAL);
        assert_eq!(
            config.session_settings().drift_threshold_secs,
            DEFAULT_DRIFT_THRESHOLD_SECS
        );
    }

    #[test]
    fn environment_overrides_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("GROWATT_DEVICES", "10.0.0.5:503:2, 10.0.0.6,:1"),
            ("MQTT_BROKER_HOST", "mqtt.local"),
            ("MQTT_PORT", "not-a-port"),
            ("MQTT_TOPIC", "inverters"),
        ]);
        let mut config = Config::parse(EXAMPLE);
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(
            config.devices,
            vec![
                DeviceEndpoint::new("10.0.0.5", 503, 2),
                DeviceEndpoint::new("10.0.0.6", 502, 1),
            ]
        );
        let mqtt = config.mqtt.unwrap();
        assert_eq!(mqtt.host, "mqtt.local");
        assert_eq!(mqtt.port, Some(1883));
        assert_eq!(mqtt.topic(), "inverters");
    }
}
