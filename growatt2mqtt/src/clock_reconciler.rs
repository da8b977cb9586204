use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use thiserror::Error;

/// Holding register holding the clock year; the full clock spans
/// `[year-2000, month, day, hour, minute, second, weekday]`.
pub const CLOCK_BASE_ADDRESS: u16 = 45;
pub const CLOCK_REGISTER_COUNT: u16 = 7;
pub const DEFAULT_DRIFT_THRESHOLD_SECS: u32 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("expected 7 clock registers, got {0}")]
    ShortClockBlock(usize),
    #[error("device reports an impossible time {0:?}")]
    InvalidDeviceTime(Vec<u16>),
    #[error("year {0} cannot be written to the device clock")]
    YearOutOfRange(i32),
}

/// Source of the trusted time the device clock is compared against.
pub trait ReferenceClock {
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock of the host running the poller.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalClock;

impl ReferenceClock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockDelta {
    pub device_time: NaiveDateTime,
    pub reference_time: NaiveDateTime,
    /// Positive when the device clock lags behind the reference.
    pub delta_seconds: i64,
}

pub fn compute_delta(device_time: NaiveDateTime, reference_time: NaiveDateTime) -> ClockDelta {
    ClockDelta {
        device_time,
        reference_time,
        delta_seconds: (reference_time - device_time).num_seconds(),
    }
}

pub fn should_correct(delta: &ClockDelta, threshold_seconds: u32) -> bool {
    delta.delta_seconds.unsigned_abs() > u64::from(threshold_seconds)
}

/// `[year-2000, month, day, hour, minute, second, iso weekday]`
pub fn build_correction_payload(reference_time: NaiveDateTime) -> Result<Vec<u16>, ClockError> {
    let year = reference_time.year();
    let short_year = year - 2000;
    if !(0..=99).contains(&short_year) {
        return Err(ClockError::YearOutOfRange(year));
    }
    // every component below is bounded well inside u16
    Ok(vec![
        short_year as u16,
        reference_time.month() as u16,
        reference_time.day() as u16,
        reference_time.hour() as u16,
        reference_time.minute() as u16,
        reference_time.second() as u16,
        reference_time.weekday().number_from_monday() as u16,
    ])
}

/// Parses the clock registers. Years below 100 are offsets from 2000; larger
/// values are taken as absolute years. The weekday register is ignored.
pub fn parse_device_time(registers: &[u16]) -> Result<NaiveDateTime, ClockError> {
    let [year, month, day, hour, minute, second, _weekday] = registers else {
        return Err(ClockError::ShortClockBlock(registers.len()));
    };
    let year = if *year < 100 {
        2000 + i32::from(*year)
    } else {
        i32::from(*year)
    };
    NaiveDate::from_ymd_opt(year, u32::from(*month), u32::from(*day))
        .and_then(|date| {
            date.and_hms_opt(u32::from(*hour), u32::from(*minute), u32::from(*second))
        })
        .ok_or_else(|| ClockError::InvalidDeviceTime(registers.to_vec()))
}
