mod config;
mod logging;
mod rumqttc_wrapper;
mod tokio_modbus_wrapper;

use config::Config;
use growatt2mqtt::clock_reconciler::LocalClock;
use growatt2mqtt::poll_loop::PollLoop;
use growatt2mqtt::register_map::GROWATT_HYBRID;
use growatt2mqtt::telemetry_publisher::TelemetryPublisher;
use rumqttc_wrapper::RumqttcWrapper;
use tokio_modbus_wrapper::TokioModbusWrapper;

use log::{error, info};

fn main() {
    logging::init_logger(std::env::var_os("GROWATT_DEBUG").is_some());
    info!("Running revision: {}", env!("GIT_HASH"));
    if std::env::args().len() > 1 {
        error!("Arguments passed. Tool is configured by config.toml in its path");
    }
    let config = Config::load();

    if let Err(errors) = GROWATT_HYBRID.validate() {
        for e in errors {
            error!("register map: {e}");
        }
        std::process::exit(1);
    }
    if !config.is_valid() {
        error!("config.toml needs at least one [[devices]] entry and an [mqtt] host");
        std::process::exit(1);
    }
    let Some(mqtt_config) = config.mqtt.clone() else {
        std::process::exit(1);
    };

    for device in &config.devices {
        info!("inverter: {device}");
    }
    info!(
        "publishing to {} on topic {}",
        mqtt_config.host,
        mqtt_config.topic()
    );
    let settings = config.session_settings();
    if settings.correct_clock {
        info!(
            "correcting inverter clocks drifting more than {}s",
            settings.drift_threshold_secs
        );
    }

    let request_timeout = config.request_timeout();
    let poll_loop = PollLoop::new(config.devices.clone(), &GROWATT_HYBRID, settings)
        .with_interval(config.update_interval());

    poll_loop.run(
        &LocalClock,
        |device| TokioModbusWrapper::new(device, request_timeout),
        |device| {
            TelemetryPublisher::<RumqttcWrapper>::new(
                &mqtt_config,
                &format!("-{}-{}", device.host, device.unit_id),
            )
        },
    );
}
