use std::io::Write;
use std::thread;

use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;

/// Timestamped lines tagged with the emitting thread, so output of the
/// per-device poll workers can be told apart. `RUST_LOG` refines the level.
pub fn init_logger(debug: bool) {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                thread::current().name().unwrap_or("main"),
                record.args()
            )
        })
        .filter(None, level)
        .filter_module("rumqttc", LevelFilter::Warn)
        .parse_default_env()
        .init();
}
