use std::{thread, time::Duration};

use growatt2mqtt::{mqtt_config::MqttConfig, mqtt_wrapper::MqttWrapper};
use log::warn;
use rumqttc::{
    tokio_rustls::{self, rustls::ClientConfig},
    Client, MqttOptions, QoS, Transport,
};

const PUBLISH_ATTEMPTS: usize = 3;

pub struct RumqttcWrapper {
    client: Client,
}

fn tls_transport() -> Transport {
    // Use rustls-native-certs to load root certificates from the operating system.
    let mut roots = tokio_rustls::rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        warn!("could not load platform certificate: {e}");
    }
    for cert in native.certs {
        if let Err(e) = roots.add(cert) {
            warn!("ignoring platform certificate: {e}");
        }
    }

    let client_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    Transport::tls_with_config(client_config.into())
}

impl MqttWrapper for RumqttcWrapper {
    fn publish<S, V>(&mut self, topic: S, retain: bool, payload: V) -> anyhow::Result<()>
    where
        S: Clone + Into<String>,
        V: Clone + Into<Vec<u8>>,
    {
        // try_publish never blocks, a full request queue is retried shortly after
        for _ in 1..PUBLISH_ATTEMPTS {
            if self
                .client
                .try_publish(topic.clone(), QoS::AtMostOnce, retain, payload.clone())
                .is_ok()
            {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(100));
        }
        Ok(self
            .client
            .try_publish(topic, QoS::AtMostOnce, retain, payload)?)
    }

    fn disconnect(&mut self) -> anyhow::Result<()> {
        Ok(self.client.disconnect()?)
    }

    fn new(config: &MqttConfig, suffix: &str) -> Self {
        let use_tls = config.tls.is_some_and(|tls| tls);

        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| "growatt-mqtt-publisher".to_string());
        let mut mqttoptions = MqttOptions::new(
            client_id + suffix,
            &config.host,
            config.port.unwrap_or_else(|| {
                if use_tls {
                    return 8883;
                }
                1883
            }),
        );
        mqttoptions.set_keep_alive(Duration::from_secs(5));
        if use_tls {
            mqttoptions.set_transport(tls_transport());
        }

        //parse the mqtt authentication options
        if let Some((username, password)) = match (&config.username, &config.password) {
            (None, None) => None,
            (None, Some(_)) => None,
            (Some(username), None) => Some((username.clone(), "".into())),
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
        } {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut connection) = Client::new(mqttoptions, 512);

        thread::spawn(move || {
            // keep polling the event loop to make sure outgoing messages get sent
            // the call to .iter() blocks and suspends the thread effectively by
            // calling .recv() under the hood. This implies that the loop terminates
            // once the client disconnects
            for notification in connection.iter() {
                if let Err(e) = notification {
                    warn!("mqtt connection error: {e}");
                    thread::sleep(Duration::from_secs(1));
                }
            }
        });
        Self { client }
    }
}
