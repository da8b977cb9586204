use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};

use crate::clock_reconciler::{
    build_correction_payload, compute_delta, parse_device_time, should_correct, ClockDelta,
    ReferenceClock, CLOCK_BASE_ADDRESS, CLOCK_REGISTER_COUNT, DEFAULT_DRIFT_THRESHOLD_SECS,
};
use crate::error::SessionError;
use crate::metric_collector::MetricCollector;
use crate::modbus_wrapper::ModbusWrapper;
use crate::register_decoder::UNKNOWN_SERIAL;
use crate::register_map::{GroupKind, RegisterGroup, RegisterMap};
use crate::telemetry::{
    AddressSpace, DecodedFields, DeviceEndpoint, RawRegisterBlock, TelemetrySnapshot,
    TelemetryValue, SERIAL_NUMBER_KEY,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    ReadingIdentity,
    ReadingConfig,
    ReadingLive,
    ReconcilingClock,
    Publishing,
    Closed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    pub drift_threshold_secs: u32,
    pub correct_clock: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            drift_threshold_secs: DEFAULT_DRIFT_THRESHOLD_SECS,
            correct_clock: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockOutcome {
    Disabled,
    /// The clock registers could not be read.
    Unavailable,
    /// Device or reference time cannot be expressed in the clock registers.
    Rejected,
    InSync(ClockDelta),
    Corrected(ClockDelta),
    CorrectionFailed(ClockDelta),
}

#[derive(Clone, Debug, PartialEq)]
pub struct PollReport {
    pub holding: TelemetrySnapshot,
    pub input: TelemetrySnapshot,
    pub clock: ClockOutcome,
    /// Optional groups whose read failed this cycle.
    pub degraded_groups: Vec<&'static str>,
}

/// Closes the wrapped transport when dropped.
struct Connection<'t, T: ModbusWrapper> {
    transport: &'t mut T,
}

impl<'t, T: ModbusWrapper> Deref for Connection<'t, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.transport
    }
}

impl<'t, T: ModbusWrapper> DerefMut for Connection<'t, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.transport
    }
}

impl<'t, T: ModbusWrapper> Drop for Connection<'t, T> {
    fn drop(&mut self) {
        self.transport.close();
    }
}

/// One polling pass against one inverter. Nothing is published unless every
/// required group was read.
pub struct DeviceSession<'a> {
    endpoint: &'a DeviceEndpoint,
    map: &'a RegisterMap,
    settings: &'a SessionSettings,
    clock: &'a dyn ReferenceClock,
    cancel: Option<&'a AtomicBool>,
    state: SessionState,
    degraded_groups: Vec<&'static str>,
}

impl<'a> DeviceSession<'a> {
    pub fn new(
        endpoint: &'a DeviceEndpoint,
        map: &'a RegisterMap,
        settings: &'a SessionSettings,
        clock: &'a dyn ReferenceClock,
    ) -> Self {
        Self {
            endpoint,
            map,
            settings,
            clock,
            cancel: None,
            state: SessionState::Idle,
            degraded_groups: Vec::new(),
        }
    }

    /// Abort between steps once `flag` is set.
    pub fn with_cancellation(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn set_state(&mut self, new_state: SessionState) {
        if self.state != new_state {
            debug!("{}: {:?} -> {new_state:?}", self.endpoint, self.state);
            self.state = new_state;
        }
    }

    fn check_cancelled(&self) -> Result<(), SessionError> {
        match self.cancel {
            Some(flag) if flag.load(Ordering::SeqCst) => Err(SessionError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Runs the full cycle. Publication failures are reported after both
    /// snapshots were attempted.
    pub fn poll<T, C>(
        &mut self,
        transport: &mut T,
        collector: &mut C,
    ) -> Result<PollReport, SessionError>
    where
        T: ModbusWrapper,
        C: MetricCollector + ?Sized,
    {
        self.degraded_groups.clear();
        let result = self.run(transport, collector);
        match &result {
            Ok(_) => self.set_state(SessionState::Closed),
            Err(e) => {
                debug!("{}: session ended: {e}", self.endpoint);
                self.set_state(SessionState::Failed);
            }
        }
        result
    }

    fn run<T, C>(
        &mut self,
        transport: &mut T,
        collector: &mut C,
    ) -> Result<PollReport, SessionError>
    where
        T: ModbusWrapper,
        C: MetricCollector + ?Sized,
    {
        let (holding, input, clock) = self.collect(transport)?;

        self.set_state(SessionState::Publishing);
        self.check_cancelled()?;
        let mut first_failure = None;
        for snapshot in [&holding, &input] {
            if let Err(cause) = collector.publish(snapshot) {
                warn!("{}: snapshot lost: {cause:#}", self.endpoint);
                first_failure.get_or_insert(cause);
            }
        }
        if let Some(cause) = first_failure {
            return Err(SessionError::Publish { cause });
        }

        Ok(PollReport {
            holding,
            input,
            clock,
            degraded_groups: self.degraded_groups.clone(),
        })
    }

    /// Everything that needs the device connection. The connection is
    /// released before the snapshots are published.
    fn collect<T: ModbusWrapper>(
        &mut self,
        transport: &mut T,
    ) -> Result<(TelemetrySnapshot, TelemetrySnapshot, ClockOutcome), SessionError> {
        self.check_cancelled()?;
        self.set_state(SessionState::Connecting);
        transport
            .connect()
            .map_err(|e| SessionError::transport(format!("connecting to {}", self.endpoint), e))?;
        let mut connection = Connection { transport };

        self.set_state(SessionState::ReadingIdentity);
        let identity = self.read_stage(&mut *connection, GroupKind::Identity)?;
        let serial_number = resolve_serial_number(&identity);
        debug!("{}: serial number {serial_number}", self.endpoint);

        self.set_state(SessionState::ReadingConfig);
        let config = self.read_stage(&mut *connection, GroupKind::Config)?;

        self.set_state(SessionState::ReadingLive);
        let live = self.read_stage(&mut *connection, GroupKind::Live)?;

        self.set_state(SessionState::ReconcilingClock);
        self.check_cancelled()?;
        let clock = self.reconcile_clock(&mut *connection);
        drop(connection);

        let mut groups = identity;
        groups.extend(config);
        groups.extend(live);
        let holding = assemble_snapshot(AddressSpace::Holding, &groups, &serial_number);
        let input = assemble_snapshot(AddressSpace::Input, &groups, &serial_number);
        Ok((holding, input, clock))
    }

    fn read_stage<T: ModbusWrapper>(
        &mut self,
        transport: &mut T,
        kind: GroupKind,
    ) -> Result<Vec<(AddressSpace, DecodedFields)>, SessionError> {
        let mut decoded = Vec::new();
        for group in self.map.groups_of(kind) {
            self.check_cancelled()?;
            match read_group(transport, group) {
                Ok(block) => decoded.push((group.space, decode_group(&block, group))),
                Err(e) if group.optional => {
                    warn!("{}: skipping optional {group}: {e}", self.endpoint);
                    self.degraded_groups.push(group.name);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(decoded)
    }

    fn reconcile_clock<T: ModbusWrapper>(&self, transport: &mut T) -> ClockOutcome {
        if !self.settings.correct_clock {
            return ClockOutcome::Disabled;
        }
        let registers =
            match transport.read_holding_registers(CLOCK_BASE_ADDRESS, CLOCK_REGISTER_COUNT) {
                Ok(registers) => registers,
                Err(e) => {
                    warn!("{}: unable to read device clock: {e:#}", self.endpoint);
                    return ClockOutcome::Unavailable;
                }
            };
        let device_time = match parse_device_time(&registers) {
            Ok(device_time) => device_time,
            Err(e) => {
                warn!("{}: clock not corrected: {e}", self.endpoint);
                return ClockOutcome::Rejected;
            }
        };

        let delta = compute_delta(device_time, self.clock.now());
        if !should_correct(&delta, self.settings.drift_threshold_secs) {
            debug!(
                "{}: device clock within {}s of reference",
                self.endpoint, delta.delta_seconds
            );
            return ClockOutcome::InSync(delta);
        }
        let payload = match build_correction_payload(delta.reference_time) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("{}: clock not corrected: {e}", self.endpoint);
                return ClockOutcome::Rejected;
            }
        };
        match transport.write_registers(CLOCK_BASE_ADDRESS, &payload) {
            Ok(()) => {
                info!(
                    "{}: device clock {} was off by {}s, set to {}",
                    self.endpoint, delta.device_time, delta.delta_seconds, delta.reference_time
                );
                ClockOutcome::Corrected(delta)
            }
            Err(e) => {
                warn!("{}: clock correction failed: {e:#}", self.endpoint);
                ClockOutcome::CorrectionFailed(delta)
            }
        }
    }
}

/// Issues the single read request covering `group`.
pub fn read_group<T: ModbusWrapper>(
    transport: &mut T,
    group: &RegisterGroup,
) -> Result<RawRegisterBlock, SessionError> {
    let values = transport
        .read_registers(group.space, group.base, group.count)
        .map_err(|e| SessionError::transport(format!("reading {group}"), e))?;
    Ok(RawRegisterBlock::new(group.space, group.base, values))
}

pub fn decode_group(block: &RawRegisterBlock, group: &RegisterGroup) -> DecodedFields {
    group.decode(block)
}

/// Merges all groups read from `space` and adds the serial number.
pub fn assemble_snapshot(
    space: AddressSpace,
    groups: &[(AddressSpace, DecodedFields)],
    serial_number: &str,
) -> TelemetrySnapshot {
    TelemetrySnapshot::assemble(
        groups
            .iter()
            .filter(|(group_space, _)| *group_space == space)
            .map(|(_, fields)| fields.clone()),
        serial_number,
    )
}

fn resolve_serial_number(identity: &[(AddressSpace, DecodedFields)]) -> String {
    identity
        .iter()
        .find_map(|(_, fields)| match fields.get(SERIAL_NUMBER_KEY) {
            Some(TelemetryValue::Text(serial)) if !serial.is_empty() => Some(serial.clone()),
            _ => None,
        })
        .unwrap_or_else(|| UNKNOWN_SERIAL.to_string())
}
