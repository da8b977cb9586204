use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::clock_reconciler::ReferenceClock;
use crate::device_session::{DeviceSession, PollReport, SessionSettings};
use crate::error::SessionError;
use crate::metric_collector::MetricCollector;
use crate::modbus_wrapper::ModbusWrapper;
use crate::register_map::RegisterMap;
use crate::telemetry::DeviceEndpoint;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

// granularity at which sleeping workers notice a shutdown request
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum NetworkState {
    Unknown,
    Online,
    Offline,
}

/// Per-device bookkeeping that outlives single sessions.
struct DeviceWorker<'a, T, C> {
    endpoint: &'a DeviceEndpoint,
    transport: T,
    collector: C,
    state: NetworkState,
}

impl<'a, T: ModbusWrapper, C: MetricCollector> DeviceWorker<'a, T, C> {
    fn set_state(&mut self, new_state: NetworkState) {
        if self.state != new_state {
            self.state = new_state;
            info!("Inverter {} is {new_state:?}", self.endpoint);
        }
    }

    fn poll(
        &mut self,
        map: &RegisterMap,
        settings: &SessionSettings,
        clock: &dyn ReferenceClock,
        shutdown: &AtomicBool,
    ) -> Result<PollReport, SessionError> {
        let mut session =
            DeviceSession::new(self.endpoint, map, settings, clock).with_cancellation(shutdown);
        let result = session.poll(&mut self.transport, &mut self.collector);
        match &result {
            Ok(report) if report.degraded_groups.is_empty() => {
                self.set_state(NetworkState::Online)
            }
            Ok(report) => {
                self.set_state(NetworkState::Online);
                warn!(
                    "{}: published without {}",
                    self.endpoint,
                    report.degraded_groups.join(", ")
                );
            }
            Err(SessionError::Cancelled) => info!("{}: poll cancelled", self.endpoint),
            Err(e @ SessionError::Publish { .. }) => {
                self.set_state(NetworkState::Online);
                error!("{}: {e}", self.endpoint);
            }
            Err(e) => {
                self.set_state(NetworkState::Offline);
                error!("{}: {e}", self.endpoint);
            }
        }
        result
    }
}

/// Polls a fixed set of inverters, one worker thread per device.
pub struct PollLoop<'m> {
    devices: Vec<DeviceEndpoint>,
    map: &'m RegisterMap,
    settings: SessionSettings,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl<'m> PollLoop<'m> {
    pub fn new(
        devices: Vec<DeviceEndpoint>,
        map: &'m RegisterMap,
        settings: SessionSettings,
    ) -> Self {
        Self {
            devices,
            map,
            settings,
            interval: DEFAULT_POLL_INTERVAL,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Setting the returned flag stops [`PollLoop::run`] and cancels running
    /// sessions before they publish.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Polls every device once, concurrently, and returns the outcomes in
    /// device order.
    pub fn run_once<T, C, FT, FC>(
        &self,
        clock: &(dyn ReferenceClock + Sync),
        transport_for: FT,
        collector_for: FC,
    ) -> Vec<(DeviceEndpoint, Result<PollReport, SessionError>)>
    where
        T: ModbusWrapper,
        C: MetricCollector,
        FT: Fn(&DeviceEndpoint) -> T + Sync,
        FC: Fn(&DeviceEndpoint) -> C + Sync,
    {
        thread::scope(|scope| {
            let handles: Vec<_> = self
                .devices
                .iter()
                .map(|endpoint| {
                    let transport_for = &transport_for;
                    let collector_for = &collector_for;
                    scope.spawn(move || {
                        let mut worker = DeviceWorker {
                            endpoint,
                            transport: transport_for(endpoint),
                            collector: collector_for(endpoint),
                            state: NetworkState::Unknown,
                        };
                        let result = worker.poll(self.map, &self.settings, clock, &self.shutdown);
                        worker.collector.disconnect();
                        result
                    })
                })
                .collect();
            self.devices
                .iter()
                .zip(handles)
                .map(|(endpoint, handle)| {
                    let result = handle.join().unwrap_or_else(|_| {
                        Err(SessionError::transport(
                            format!("polling {endpoint}"),
                            anyhow::anyhow!("worker panicked"),
                        ))
                    });
                    (endpoint.clone(), result)
                })
                .collect()
        })
    }

    /// Polls every device on the configured interval until shutdown is
    /// requested. A device's next cycle starts only after its previous one
    /// has finished.
    pub fn run<T, C, FT, FC>(
        &self,
        clock: &(dyn ReferenceClock + Sync),
        transport_for: FT,
        collector_for: FC,
    ) where
        T: ModbusWrapper,
        C: MetricCollector,
        FT: Fn(&DeviceEndpoint) -> T + Sync,
        FC: Fn(&DeviceEndpoint) -> C + Sync,
    {
        info!(
            "polling {} device(s) every {:.2}s",
            self.devices.len(),
            self.interval.as_secs_f64()
        );
        thread::scope(|scope| {
            for endpoint in &self.devices {
                let transport_for = &transport_for;
                let collector_for = &collector_for;
                let spawned = thread::Builder::new()
                    .name(format!("poll-{}", endpoint.host))
                    .spawn_scoped(scope, move || {
                        let mut worker = DeviceWorker {
                            endpoint,
                            transport: transport_for(endpoint),
                            collector: collector_for(endpoint),
                            state: NetworkState::Unknown,
                        };
                        while !self.shutdown.load(Ordering::SeqCst) {
                            let started = Instant::now();
                            // outcome is logged by the worker
                            let _ = worker.poll(self.map, &self.settings, clock, &self.shutdown);
                            self.sleep_until(started + self.interval);
                        }
                        worker.collector.disconnect();
                        info!("{endpoint}: worker stopped");
                    });
                if let Err(e) = spawned {
                    error!("unable to start worker for {endpoint}: {e}");
                }
            }
        });
    }

    fn sleep_until(&self, deadline: Instant) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep(SHUTDOWN_POLL.min(deadline - now));
        }
    }
}
