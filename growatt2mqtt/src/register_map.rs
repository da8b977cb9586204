use std::fmt;

use log::{debug, warn};
use thiserror::Error;

use crate::register_decoder::{
    decode_ascii_pair, decode_bit, decode_bitfield_binary, decode_scaled, decode_wide,
};
use crate::telemetry::{AddressSpace, DecodedFields, RawRegisterBlock, TelemetryValue};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Decode {
    /// Register value as an integer.
    Raw,
    Scaled { factor: f64, precision: u8 },
    /// Two registers, high word first.
    Wide { factor: f64, precision: u8 },
    BitfieldBinary,
    /// Packed ASCII, two characters per register.
    AsciiPair,
    Bit(u8),
}

impl Decode {
    fn accepts_offset_count(&self, count: usize) -> bool {
        match self {
            Decode::Wide { .. } => count == 2,
            Decode::AsciiPair => count >= 1,
            _ => count == 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GroupKind {
    Identity,
    Config,
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("field {field}: offset {offset} outside block of {len} registers")]
    OffsetOutOfRange {
        field: &'static str,
        offset: usize,
        len: usize,
    },
    #[error("field {field}: {count} offsets do not fit its decode rule")]
    WrongOffsetCount { field: &'static str, count: usize },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub offsets: &'static [usize],
    pub decode: Decode,
}

impl FieldSpec {
    pub const fn raw(name: &'static str, offsets: &'static [usize]) -> Self {
        Self {
            name,
            offsets,
            decode: Decode::Raw,
        }
    }

    pub const fn scaled(
        name: &'static str,
        offsets: &'static [usize],
        factor: f64,
        precision: u8,
    ) -> Self {
        Self {
            name,
            offsets,
            decode: Decode::Scaled { factor, precision },
        }
    }

    pub const fn wide(
        name: &'static str,
        offsets: &'static [usize],
        factor: f64,
        precision: u8,
    ) -> Self {
        Self {
            name,
            offsets,
            decode: Decode::Wide { factor, precision },
        }
    }

    pub const fn bitfield(name: &'static str, offsets: &'static [usize]) -> Self {
        Self {
            name,
            offsets,
            decode: Decode::BitfieldBinary,
        }
    }

    pub const fn ascii(name: &'static str, offsets: &'static [usize]) -> Self {
        Self {
            name,
            offsets,
            decode: Decode::AsciiPair,
        }
    }

    pub const fn bit(name: &'static str, offsets: &'static [usize], index: u8) -> Self {
        Self {
            name,
            offsets,
            decode: Decode::Bit(index),
        }
    }

    /// Decodes this field from `block`. Any offset the block does not cover
    /// makes the whole field unavailable.
    pub fn decode(&self, block: &RawRegisterBlock) -> Result<TelemetryValue, DecodeError> {
        if !self.decode.accepts_offset_count(self.offsets.len()) {
            return Err(DecodeError::WrongOffsetCount {
                field: self.name,
                count: self.offsets.len(),
            });
        }
        let registers = self
            .offsets
            .iter()
            .map(|&offset| {
                block.get(offset).ok_or(DecodeError::OffsetOutOfRange {
                    field: self.name,
                    offset,
                    len: block.len(),
                })
            })
            .collect::<Result<Vec<u16>, DecodeError>>()?;

        let value = match self.decode {
            Decode::Raw => TelemetryValue::Integer(i64::from(registers[0])),
            Decode::Scaled { factor, precision } => {
                numeric(decode_scaled(registers[0], factor, precision), precision)
            }
            Decode::Wide { factor, precision } => numeric(
                decode_wide(registers[0], registers[1], factor, precision),
                precision,
            ),
            Decode::BitfieldBinary => TelemetryValue::Text(decode_bitfield_binary(registers[0])),
            Decode::AsciiPair => {
                let words: Vec<Option<u16>> = registers.into_iter().map(Some).collect();
                TelemetryValue::Text(decode_ascii_pair(&words))
            }
            Decode::Bit(index) => TelemetryValue::Flag(decode_bit(registers[0], index)),
        };
        Ok(value)
    }
}

fn numeric(value: f64, precision: u8) -> TelemetryValue {
    if precision == 0 {
        TelemetryValue::Integer(value as i64)
    } else {
        TelemetryValue::Decimal(value)
    }
}

/// A contiguous register range fetched with a single read request.
#[derive(Clone, Copy, Debug)]
pub struct RegisterGroup {
    pub name: &'static str,
    pub kind: GroupKind,
    pub space: AddressSpace,
    pub base: u16,
    pub count: u16,
    /// Read failures only drop this group's fields instead of failing the poll.
    pub optional: bool,
    pub fields: &'static [FieldSpec],
}

impl RegisterGroup {
    /// Decodes every field the block covers. Fields that cannot be decoded
    /// are left out; nothing is defaulted.
    pub fn decode(&self, block: &RawRegisterBlock) -> DecodedFields {
        if block.len() != usize::from(self.count) {
            warn!(
                "{}: expected {} registers from {} {}, got {}",
                self.name,
                self.count,
                self.space,
                self.base,
                block.len()
            );
        }
        let mut decoded = DecodedFields::new();
        for field in self.fields {
            match field.decode(block) {
                Ok(value) => {
                    debug!("{}: {} = {value}", self.name, field.name);
                    decoded.insert(field.name.to_string(), value);
                }
                Err(e) => warn!("{}: {e}", self.name),
            }
        }
        decoded
    }
}

impl fmt::Display for RegisterGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} {}..{})",
            self.name,
            self.space,
            self.base,
            u32::from(self.base) + u32::from(self.count)
        )
    }
}

#[derive(Debug)]
pub struct RegisterMap {
    pub groups: &'static [RegisterGroup],
}

impl RegisterMap {
    pub fn groups(&self) -> &'static [RegisterGroup] {
        self.groups
    }

    pub fn groups_of(&self, kind: GroupKind) -> impl Iterator<Item = &'static RegisterGroup> {
        self.groups.iter().filter(move |group| group.kind == kind)
    }

    pub fn field(&self, name: &str) -> Option<(&'static RegisterGroup, &'static FieldSpec)> {
        self.groups.iter().find_map(|group| {
            group
                .fields
                .iter()
                .find(|field| field.name == name)
                .map(|field| (group, field))
        })
    }

    /// Checks every row against its decode rule and its group's extent.
    pub fn validate(&self) -> Result<(), Vec<DecodeError>> {
        let mut errors = Vec::new();
        for group in self.groups {
            for field in group.fields {
                if !field.decode.accepts_offset_count(field.offsets.len()) {
                    errors.push(DecodeError::WrongOffsetCount {
                        field: field.name,
                        count: field.offsets.len(),
                    });
                }
                for &offset in field.offsets {
                    if offset >= usize::from(group.count) {
                        errors.push(DecodeError::OffsetOutOfRange {
                            field: field.name,
                            offset,
                            len: usize::from(group.count),
                        });
                    }
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

const SERIAL_NUMBER: &[FieldSpec] = &[FieldSpec::ascii("serialNumber", &[0, 1, 2, 3, 4])];

const HOLDING_BASE: &[FieldSpec] = &[
    FieldSpec::raw("safetyFunctionsBitMap", &[1]),
    FieldSpec::raw("maxOutputActivePower", &[3]),
    FieldSpec::raw("maxOutputReactivePower", &[4]),
    FieldSpec::raw("inverterPowerFactor", &[5]),
    FieldSpec::wide("NormalPower", &[6, 7], 0.1, 1),
    FieldSpec::raw("inverterNormalVoltage", &[8]),
    FieldSpec::raw("firmwareVersionH", &[9]),
    FieldSpec::raw("firmwareVersionM", &[10]),
    FieldSpec::raw("firmwareVersionL", &[11]),
    FieldSpec::raw("controllerVersionH", &[12]),
    FieldSpec::raw("controllerVersionM", &[13]),
    FieldSpec::raw("controllerVersionL", &[14]),
    FieldSpec::raw("lcdLanguage", &[15]),
];

// base 122
const HOLDING_EXPORT_LIMIT: &[FieldSpec] = &[
    FieldSpec::raw("exportLimitState", &[0]),
    FieldSpec::raw("exportLimitRate", &[1]),
    FieldSpec::raw("svgFunctionEnabled", &[19]),
    FieldSpec::raw("numBatteryModules", &[63]),
];

// base 241
const HOLDING_LOCATION: &[FieldSpec] = &[
    FieldSpec::raw("inverterLng", &[0]),
    FieldSpec::raw("inverterLat", &[1]),
];

// base 1000
const HOLDING_STORAGE: &[FieldSpec] = &[
    FieldSpec::raw("vbatStopCharge", &[5]),
    FieldSpec::raw("vbatStopDischarge", &[6]),
    FieldSpec::raw("battMdlSerialNum", &[14]),
    FieldSpec::raw("battMdlParallNum", &[15]),
    // 0 = load first, 1 = battery first, 2 = grid first
    FieldSpec::raw("priorityMode", &[44]),
    FieldSpec::raw("battType", &[48]),
    FieldSpec::raw("exportToGridRatePercent", &[70]),
    FieldSpec::raw("exportToGridStopDischargePercent", &[71]),
    FieldSpec::raw("batFirstChargeRate", &[90]),
    FieldSpec::raw("batFirstStopChargeSOC", &[91]),
    FieldSpec::raw("acChargeEnabled", &[92]),
];

// base 125, words stored most significant last
const HOLDING_BATTERY_SERIALS: &[FieldSpec] = &[
    FieldSpec::raw("batt1SerialNum8", &[0]),
    FieldSpec::raw("batt1SerialNum7", &[1]),
    FieldSpec::raw("batt1SerialNum6", &[2]),
    FieldSpec::raw("batt1SerialNum5", &[3]),
    FieldSpec::raw("batt1SerialNum4", &[4]),
    FieldSpec::raw("batt1SerialNum3", &[5]),
    FieldSpec::raw("batt1SerialNum2", &[6]),
    FieldSpec::raw("batt1SerialNum1", &[7]),
    FieldSpec::raw("batt2SerialNum8", &[8]),
    FieldSpec::raw("batt2SerialNum7", &[9]),
    FieldSpec::raw("batt2SerialNum6", &[10]),
    FieldSpec::raw("batt2SerialNum5", &[11]),
    FieldSpec::raw("batt2SerialNum4", &[12]),
    FieldSpec::raw("batt2SerialNum3", &[13]),
    FieldSpec::raw("batt2SerialNum2", &[14]),
    FieldSpec::raw("batt2SerialNum1", &[15]),
];

const INPUT_BASE: &[FieldSpec] = &[
    // 6 while idle at night
    FieldSpec::raw("inverterStatus", &[0]),
    FieldSpec::wide("pvPowerTotal", &[1, 2], 0.1, 1),
    FieldSpec::scaled("pv1Voltage", &[3], 0.1, 1),
    FieldSpec::scaled("pv1Current", &[4], 0.1, 1),
    FieldSpec::wide("pv1Power", &[5, 6], 0.1, 1),
    FieldSpec::scaled("pv2Voltage", &[7], 0.1, 1),
    FieldSpec::scaled("pv2Current", &[8], 0.1, 1),
    FieldSpec::wide("pv2Power", &[9, 10], 0.1, 1),
    FieldSpec::wide("pvBattPower", &[35, 36], 0.1, 1),
    FieldSpec::scaled("gridFreq", &[37], 0.01, 3),
    FieldSpec::scaled("gridVolt", &[38], 0.1, 2),
    FieldSpec::scaled("pvOutputCurrent", &[39], 0.1, 1),
    FieldSpec::wide("pvOutputWattsVA", &[40, 41], 0.1, 1),
    FieldSpec::scaled("inverterTemperature", &[93], 0.1, 1),
    FieldSpec::scaled("IPMTemperature", &[94], 0.1, 1),
    FieldSpec::scaled("boostTemperature", &[95], 0.1, 1),
    // 0..20000 rather than a 0..1 ratio
    FieldSpec::raw("inverterPowerFactorNow", &[100]),
    FieldSpec::raw("realOutputPowerPercent", &[101]),
    FieldSpec::wide("OPFullWatt", &[102, 103], 0.1, 1),
    FieldSpec::raw("InverterFaultCode", &[105]),
    FieldSpec::wide("FaultBitCode", &[106, 107], 1.0, 0),
    FieldSpec::wide("WarningBitCode", &[110, 111], 1.0, 0),
    // low word shares register 107 with FaultBitCode on the observed map
    FieldSpec::wide("ACChargePower", &[116, 107], 0.1, 1),
];

// base 1000
const INPUT_STORAGE: &[FieldSpec] = &[
    FieldSpec::raw("systemWorkMode", &[0]),
    FieldSpec::wide("dischargePower", &[9, 10], 0.1, 1),
    FieldSpec::wide("chargePower", &[11, 12], 0.1, 1),
    FieldSpec::scaled("battVoltage", &[13], 0.1, 3),
    FieldSpec::raw("battSOC", &[14]),
    FieldSpec::wide("gridImportPowerTotal", &[21, 22], 0.1, 1),
    FieldSpec::wide("gridExportPowerTotal", &[29, 30], 0.1, 1),
    FieldSpec::wide("pLocalLoadTotal", &[37, 38], 0.1, 1),
    FieldSpec::raw("battTemperature", &[40]),
    FieldSpec::raw("epsFreq", &[67]),
    FieldSpec::scaled("epsVolt", &[68], 0.1, 2),
    FieldSpec::raw("epsCurrent", &[69]),
    FieldSpec::wide("epsPower", &[70, 71], 0.1, 1),
    FieldSpec::raw("epsLoadPercent", &[80]),
    FieldSpec::raw("epsPowerFactor", &[81]),
    FieldSpec::raw("bmsStatus", &[83]),
    FieldSpec::bitfield("bmsStatusBitmap", &[83]),
    FieldSpec::bit("bmsCellBalanced", &[83], 3),
    FieldSpec::bit("bmsSleepEnabled", &[83], 4),
    FieldSpec::bit("bmsDischargeEnabled", &[83], 5),
    FieldSpec::bit("bmsChargeEnabled", &[83], 6),
    FieldSpec::bit("bmsBatteryDisconnected", &[83], 7),
    FieldSpec::raw("bmsError", &[85]),
    FieldSpec::raw("bmsSOC", &[86]),
    FieldSpec::raw("bmsDeltaV", &[94]),
    FieldSpec::raw("bmsCycleCount", &[95]),
    FieldSpec::raw("bmsSOH", &[96]),
    FieldSpec::raw("cellVoltage1", &[108]),
    FieldSpec::raw("cellVoltage2", &[109]),
    FieldSpec::raw("cellVoltage3", &[110]),
    FieldSpec::raw("cellVoltage4", &[111]),
    FieldSpec::raw("cellVoltage5", &[112]),
    FieldSpec::raw("cellVoltage6", &[113]),
    FieldSpec::raw("cellVoltage7", &[114]),
    FieldSpec::raw("cellVoltage8", &[115]),
    FieldSpec::raw("cellVoltage9", &[116]),
    FieldSpec::raw("cellVoltage10", &[117]),
    FieldSpec::raw("cellVoltage11", &[118]),
    FieldSpec::raw("cellVoltage12", &[119]),
    FieldSpec::raw("cellVoltage13", &[120]),
    FieldSpec::raw("cellVoltage14", &[121]),
    FieldSpec::raw("cellVoltage15", &[122]),
    FieldSpec::raw("cellVoltage16", &[123]),
];

/// Offsets are relative to each group's base and follow what the devices
/// report, including where vendor documentation disagrees.
pub static GROWATT_HYBRID: RegisterMap = RegisterMap {
    groups: &[
        RegisterGroup {
            name: "serial-number",
            kind: GroupKind::Identity,
            space: AddressSpace::Holding,
            base: 23,
            count: 5,
            optional: true,
            fields: SERIAL_NUMBER,
        },
        RegisterGroup {
            name: "holding-base",
            kind: GroupKind::Config,
            space: AddressSpace::Holding,
            base: 0,
            count: 16,
            optional: false,
            fields: HOLDING_BASE,
        },
        RegisterGroup {
            name: "holding-export-limit",
            kind: GroupKind::Config,
            space: AddressSpace::Holding,
            base: 122,
            count: 64,
            optional: false,
            fields: HOLDING_EXPORT_LIMIT,
        },
        RegisterGroup {
            name: "holding-location",
            kind: GroupKind::Config,
            space: AddressSpace::Holding,
            base: 241,
            count: 3,
            optional: true,
            fields: HOLDING_LOCATION,
        },
        RegisterGroup {
            name: "holding-storage",
            kind: GroupKind::Config,
            space: AddressSpace::Holding,
            base: 1000,
            count: 93,
            optional: false,
            fields: HOLDING_STORAGE,
        },
        RegisterGroup {
            name: "holding-battery-serials",
            kind: GroupKind::Config,
            space: AddressSpace::Holding,
            base: 125,
            count: 16,
            optional: true,
            fields: HOLDING_BATTERY_SERIALS,
        },
        RegisterGroup {
            name: "input-base",
            kind: GroupKind::Live,
            space: AddressSpace::Input,
            base: 0,
            count: 117,
            optional: false,
            fields: INPUT_BASE,
        },
        RegisterGroup {
            name: "input-storage",
            kind: GroupKind::Live,
            space: AddressSpace::Input,
            base: 1000,
            count: 124,
            optional: false,
            fields: INPUT_STORAGE,
        },
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    fn input_block(values: Vec<u16>) -> RawRegisterBlock {
        RawRegisterBlock::new(AddressSpace::Input, 0, values)
    }

    #[test]
    fn growatt_map_is_consistent() {
        assert_eq!(GROWATT_HYBRID.validate(), Ok(()));
    }

    #[test]
    fn field_names_are_unique() {
        let mut names: Vec<&str> = GROWATT_HYBRID
            .groups()
            .iter()
            .flat_map(|group| group.fields.iter().map(|field| field.name))
            .collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn battery_serials_and_location_are_optional() {
        for name in ["batt1SerialNum8", "inverterLat", "serialNumber"] {
            let (group, _) = GROWATT_HYBRID.field(name).unwrap();
            assert!(group.optional, "{name}");
        }
        let (group, _) = GROWATT_HYBRID.field("inverterStatus").unwrap();
        assert!(!group.optional);
    }

    #[test]
    fn validate_reports_bad_rows() {
        static BAD: RegisterMap = RegisterMap {
            groups: &[RegisterGroup {
                name: "bad",
                kind: GroupKind::Live,
                space: AddressSpace::Input,
                base: 0,
                count: 4,
                optional: false,
                fields: &[
                    FieldSpec::wide("tooShort", &[1], 0.1, 1),
                    FieldSpec::raw("pastEnd", &[4]),
                ],
            }],
        };
        let errors = BAD.validate().unwrap_err();
        assert_eq!(
            errors,
            vec![
                DecodeError::WrongOffsetCount {
                    field: "tooShort",
                    count: 1
                },
                DecodeError::OffsetOutOfRange {
                    field: "pastEnd",
                    offset: 4,
                    len: 4
                },
            ]
        );
    }

    #[test]
    fn live_block_decodes_known_values() {
        let mut values = vec![0u16; 117];
        values[..7].copy_from_slice(&[6, 0, 150, 150, 10, 1023, 20]);
        values[37] = 255;
        values[106] = 1;
        values[107] = 2;
        let (group, _) = GROWATT_HYBRID.field("inverterStatus").unwrap();
        let fields = group.decode(&input_block(values));

        assert_eq!(fields.len(), INPUT_BASE.len());
        assert_eq!(fields["inverterStatus"], TelemetryValue::Integer(6));
        assert_eq!(fields["pvPowerTotal"], TelemetryValue::Decimal(15.0));
        assert_eq!(fields["pv1Voltage"], TelemetryValue::Decimal(15.0));
        assert_eq!(fields["pv1Current"], TelemetryValue::Decimal(1.0));
        assert_eq!(
            fields["pv1Power"],
            TelemetryValue::Decimal(decode_wide(1023, 20, 0.1, 1))
        );
        assert_eq!(fields["gridFreq"], TelemetryValue::Decimal(2.55));
        assert_eq!(fields["FaultBitCode"], TelemetryValue::Integer(65538));
    }

    #[test]
    fn short_block_drops_only_uncovered_fields() {
        let (group, _) = GROWATT_HYBRID.field("inverterStatus").unwrap();
        let fields = group.decode(&input_block(vec![0; 107]));

        for missing in ["FaultBitCode", "WarningBitCode", "ACChargePower"] {
            assert!(!fields.contains_key(missing), "{missing}");
        }
        assert_eq!(fields.len(), INPUT_BASE.len() - 3);
        assert!(fields.contains_key("InverterFaultCode"));
        assert!(fields.contains_key("OPFullWatt"));
    }

    #[test]
    fn decoding_is_repeatable() {
        let (group, _) = GROWATT_HYBRID.field("bmsStatus").unwrap();
        let mut values = vec![7u16; 124];
        values[83] = 0b0000_0000_0110_1000;
        let block = input_block(values);
        let first = group.decode(&block);
        assert_eq!(first, group.decode(&block));
        assert_eq!(
            first["bmsStatusBitmap"],
            TelemetryValue::Text("0000000001101000".to_string())
        );
        assert_eq!(first["bmsCellBalanced"], TelemetryValue::Flag(true));
        assert_eq!(first["bmsSleepEnabled"], TelemetryValue::Flag(false));
        assert_eq!(first["bmsDischargeEnabled"], TelemetryValue::Flag(true));
        assert_eq!(first["bmsChargeEnabled"], TelemetryValue::Flag(true));
        assert_eq!(first["bmsBatteryDisconnected"], TelemetryValue::Flag(false));
    }

    #[test]
    fn serial_number_decodes_from_identity_block() {
        let (group, field) = GROWATT_HYBRID.field("serialNumber").unwrap();
        assert_eq!(group.kind, GroupKind::Identity);
        let block = RawRegisterBlock::new(
            AddressSpace::Holding,
            23,
            vec![0x4142, 0x4331, 0x3233, 0x3435, 0x3637],
        );
        assert_eq!(
            field.decode(&block),
            Ok(TelemetryValue::Text("ABC1234567".to_string()))
        );
    }
}
