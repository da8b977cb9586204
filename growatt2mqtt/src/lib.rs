// externally visible interfaces
pub mod clock_reconciler;
pub mod device_session;
pub mod error;
pub mod metric_collector;
pub mod modbus_wrapper;
pub mod mqtt_config;
pub mod mqtt_wrapper;
pub mod poll_loop;
pub mod register_decoder;
pub mod register_map;
pub mod telemetry;
pub mod telemetry_publisher;
