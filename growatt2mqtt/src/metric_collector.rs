use crate::telemetry::TelemetrySnapshot;

pub trait MetricCollector {
    fn publish(&mut self, snapshot: &TelemetrySnapshot) -> anyhow::Result<()>;

    fn disconnect(&mut self) {}
}
