use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_derive::Deserialize;

/// Key under which the resolved serial number is merged into every snapshot.
pub const SERIAL_NUMBER_KEY: &str = "serialNumber";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    Holding,
    Input,
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressSpace::Holding => write!(f, "holding"),
            AddressSpace::Input => write!(f, "input"),
        }
    }
}

/// Connection target of one inverter.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct DeviceEndpoint {
    pub host: String,
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
}

fn default_modbus_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

impl DeviceEndpoint {
    pub fn new(host: &str, port: u16, unit_id: u8) -> Self {
        Self {
            host: host.to_string(),
            port,
            unit_id,
        }
    }
}

impl fmt::Display for DeviceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.host, self.port, self.unit_id)
    }
}

/// Registers as returned by one read request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawRegisterBlock {
    pub space: AddressSpace,
    pub start: u16,
    pub values: Vec<u16>,
}

impl RawRegisterBlock {
    pub fn new(space: AddressSpace, start: u16, values: Vec<u16>) -> Self {
        Self {
            space,
            start,
            values,
        }
    }

    /// Register at `offset` relative to `start`, if the read covered it.
    pub fn get(&self, offset: usize) -> Option<u16> {
        self.values.get(offset).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A single decoded value, serialized without any type tag.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    Integer(i64),
    Decimal(f64),
    Text(String),
    Flag(bool),
}

impl fmt::Display for TelemetryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryValue::Integer(v) => write!(f, "{v}"),
            TelemetryValue::Decimal(v) => write!(f, "{v}"),
            TelemetryValue::Text(v) => write!(f, "{v}"),
            TelemetryValue::Flag(v) => write!(f, "{v}"),
        }
    }
}

/// Field name to value, as produced by decoding one register group.
pub type DecodedFields = BTreeMap<String, TelemetryValue>;

/// Decoded telemetry of one address space of one device for one cycle.
///
/// Serializes as a flat JSON object. There is no way to modify a snapshot
/// once it has been assembled.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TelemetrySnapshot {
    fields: DecodedFields,
}

impl TelemetrySnapshot {
    /// Merges the decoded groups in order and adds the serial number last.
    pub fn assemble<I>(groups: I, serial_number: &str) -> Self
    where
        I: IntoIterator<Item = DecodedFields>,
    {
        let mut fields = DecodedFields::new();
        for group in groups {
            fields.extend(group);
        }
        fields.insert(
            SERIAL_NUMBER_KEY.to_string(),
            TelemetryValue::Text(serial_number.to_string()),
        );
        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<&TelemetryValue> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn serial_number(&self) -> Option<&str> {
        match self.fields.get(SERIAL_NUMBER_KEY) {
            Some(TelemetryValue::Text(serial)) => Some(serial),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.fields {
            writeln!(f, "{name}: {value}")?;
        }
        Ok(())
    }
}
