use crate::prelude::*;

use bytes::Bytes;
use num_enum::TryFromPrimitive;
use rust_decimal::Decimal;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

// StatusFormat {{{
/// Layout of the status payload as announced by the inverter.
///
/// Byte `i` of the format is the type ID of the quantity stored in the 2-byte
/// slot at `payload[2 * i..2 * i + 2]`. Fetched once per connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusFormat(Bytes);

impl StatusFormat {
    pub fn new(format: impl Into<Bytes>) -> Self {
        Self(format.into())
    }

    pub fn position(&self, type_id: u8) -> Option<usize> {
        self.0.iter().position(|&id| id == type_id)
    }

    pub fn contains(&self, type_id: u8) -> bool {
        self.position(type_id).is_some()
    }

    /// Expected status payload size for this format.
    pub fn payload_len(&self) -> usize {
        self.0.len() * 2
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
// }}}

/// The 2-byte slot holding `type_id`, or `None` when the format does not
/// carry it. A payload too short to hold the slot also yields `None`.
pub fn locate<'a>(type_id: u8, format: &StatusFormat, payload: &'a [u8]) -> Option<&'a [u8]> {
    let index = format.position(type_id)?;
    payload.get(index * 2..index * 2 + 2)
}

// OperatingMode {{{
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum OperatingMode {
    Wait = 0,
    Normal = 1,
    Fault = 2,
    PermanentFault = 3,
    Check = 4,
    PvPowerOff = 5,
}

impl OperatingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::Wait => "Wait",
            OperatingMode::Normal => "Normal",
            OperatingMode::Fault => "Fault",
            OperatingMode::PermanentFault => "Permanent fault",
            OperatingMode::Check => "Check",
            OperatingMode::PvPowerOff => "PV power off",
        }
    }
}

impl std::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OperatingMode {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
} // }}}

// StatusValue {{{
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StatusValue {
    Bytes(Vec<u8>),
    Integer(i64),
    Decimal(Decimal),
    Mode(OperatingMode),
}

impl StatusValue {
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            StatusValue::Decimal(d) => Some(*d),
            StatusValue::Integer(i) => Some(Decimal::from(*i)),
            _ => None,
        }
    }
}

impl std::fmt::Display for StatusValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusValue::Bytes(b) => write!(f, "{:02x?}", b),
            StatusValue::Integer(i) => write!(f, "{}", i),
            StatusValue::Decimal(d) => write!(f, "{}", d),
            StatusValue::Mode(m) => write!(f, "{}", m),
        }
    }
} // }}}

// Descriptor {{{
/// How to pull one named value out of a status payload.
#[derive(Debug)]
pub enum Descriptor {
    /// Slots of the given type IDs concatenated, high word first.
    Bytes(&'static [u8]),
    /// Big-endian integer over the concatenated slots (at most four IDs).
    Integer {
        type_ids: &'static [u8],
        signed: bool,
    },
    /// Integer scaled by `10^scale`.
    Decimal {
        type_ids: &'static [u8],
        scale: i32,
        signed: bool,
    },
    OperatingMode(u8),
    /// First alternative that is present, for fields firmware moved around.
    FirstOf(&'static [Descriptor]),
    /// `then` only applies when `type_id`'s presence in the format equals
    /// `present`.
    IfPresent {
        type_id: u8,
        present: bool,
        then: &'static Descriptor,
    },
}

impl Descriptor {
    pub fn value(&self, format: &StatusFormat, payload: &[u8]) -> Result<Option<StatusValue>> {
        Ok(match self {
            Descriptor::Bytes(type_ids) => concat(type_ids, format, payload).map(StatusValue::Bytes),
            Descriptor::Integer { type_ids, signed } => {
                concat(type_ids, format, payload).map(|b| StatusValue::Integer(to_integer(&b, *signed)))
            }
            Descriptor::Decimal {
                type_ids,
                scale,
                signed,
            } => concat(type_ids, format, payload)
                .map(|b| StatusValue::Decimal(scaled(to_integer(&b, *signed), *scale))),
            Descriptor::OperatingMode(type_id) => match locate(*type_id, format, payload) {
                Some(slot) => {
                    let raw = u16::from_be_bytes([slot[0], slot[1]]);
                    let mode = OperatingMode::try_from(raw).map_err(|_| Error::UnknownEnumValue {
                        kind: "operating mode",
                        value: raw.to_string(),
                    })?;
                    Some(StatusValue::Mode(mode))
                }
                None => None,
            },
            Descriptor::FirstOf(alternatives) => {
                for alternative in alternatives.iter() {
                    if let Some(value) = alternative.value(format, payload)? {
                        return Ok(Some(value));
                    }
                }
                None
            }
            Descriptor::IfPresent {
                type_id,
                present,
                then,
            } => {
                if format.contains(*type_id) == *present {
                    then.value(format, payload)?
                } else {
                    None
                }
            }
        })
    }
}

fn concat(type_ids: &[u8], format: &StatusFormat, payload: &[u8]) -> Option<Vec<u8>> {
    let mut r = Vec::with_capacity(type_ids.len() * 2);
    for &type_id in type_ids {
        r.extend_from_slice(locate(type_id, format, payload)?);
    }
    Some(r)
}

fn to_integer(bytes: &[u8], signed: bool) -> i64 {
    let unsigned = bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    let bits = bytes.len() as u32 * 8;

    if signed && bits > 0 && bits < 64 && unsigned & (1 << (bits - 1)) != 0 {
        (unsigned as i64) - (1i64 << bits)
    } else {
        unsigned as i64
    }
}

fn scaled(value: i64, scale: i32) -> Decimal {
    if scale <= 0 {
        Decimal::new(value, scale.unsigned_abs())
    } else {
        Decimal::from(value) * Decimal::from(10i64.pow(scale as u32))
    }
}
// }}}

// field table {{{
// expands to a literal so the table can borrow it for 'static
macro_rules! decimal {
    ([$($type_id:expr),+], $scale:expr) => {
        Descriptor::Decimal {
            type_ids: &[$($type_id),+],
            scale: $scale,
            signed: false,
        }
    };
}

/// Reverse-engineered status fields. The type IDs are an external contract,
/// they differ per hardware revision and cannot be derived.
pub static STATUS_FIELDS: &[(&str, Descriptor)] = &[
    ("operation_mode", Descriptor::OperatingMode(0x0c)),
    (
        "total_operation_time",
        Descriptor::Integer {
            type_ids: &[0x09, 0x0a],
            signed: false,
        },
    ),
    ("pv1_input_power", decimal!([0x27], 0)),
    ("pv2_input_power", decimal!([0x28], 0)),
    ("pv1_voltage", decimal!([0x01], -1)),
    ("pv2_voltage", decimal!([0x02], -1)),
    ("pv1_current", decimal!([0x04], -1)),
    ("pv2_current", decimal!([0x05], -1)),
    (
        "output_power",
        Descriptor::FirstOf(&[decimal!([0x0b], 0), decimal!([0x34], 0)]),
    ),
    ("energy_today", decimal!([0x11], -2)),
    (
        "energy_total",
        Descriptor::FirstOf(&[decimal!([0x07, 0x08], -1), decimal!([0x35, 0x36], -1)]),
    ),
    // single phase, only when the S-phase current is missing
    (
        "grid_voltage",
        Descriptor::IfPresent {
            type_id: 0x51,
            present: false,
            then: &decimal!([0x32], -1),
        },
    ),
    (
        "grid_current",
        Descriptor::IfPresent {
            type_id: 0x51,
            present: false,
            then: &decimal!([0x31], -1),
        },
    ),
    (
        "grid_frequency",
        Descriptor::IfPresent {
            type_id: 0x51,
            present: false,
            then: &decimal!([0x33], -2),
        },
    ),
    // three phase
    (
        "grid_voltage_r_phase",
        Descriptor::IfPresent {
            type_id: 0x51,
            present: true,
            then: &decimal!([0x32], -1),
        },
    ),
    (
        "grid_current_r_phase",
        Descriptor::IfPresent {
            type_id: 0x51,
            present: true,
            then: &decimal!([0x31], -1),
        },
    ),
    (
        "grid_frequency_r_phase",
        Descriptor::IfPresent {
            type_id: 0x51,
            present: true,
            then: &decimal!([0x33], -2),
        },
    ),
    ("grid_voltage_s_phase", decimal!([0x52], -1)),
    ("grid_current_s_phase", decimal!([0x51], -1)),
    ("grid_frequency_s_phase", decimal!([0x53], -2)),
    ("grid_voltage_t_phase", decimal!([0x72], -1)),
    ("grid_current_t_phase", decimal!([0x71], -1)),
    ("grid_frequency_t_phase", decimal!([0x73], -2)),
    (
        "internal_temperature",
        Descriptor::Decimal {
            type_ids: &[0x00],
            scale: -1,
            signed: true,
        },
    ),
    (
        "heatsink_temperature",
        Descriptor::Decimal {
            type_ids: &[0x2f],
            scale: -1,
            signed: true,
        },
    ),
]; // }}}

// Status {{{
/// Decoded status values in field table order. Fields the inverter does not
/// report are simply missing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Status(Vec<(&'static str, StatusValue)>);

impl Status {
    pub fn get(&self, name: &str) -> Option<&StatusValue> {
        self.0.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(&'static str, StatusValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Status {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Runs every entry of [`STATUS_FIELDS`] against one status payload.
///
/// A payload whose size doesn't match the format is logged and decoded
/// anyway; firmware versions disagree on this and partial data beats none.
pub fn decode_status(format: &StatusFormat, payload: &[u8]) -> Result<Status> {
    if format.payload_len() != payload.len() {
        let e = Error::DecodeInconsistency {
            format_len: format.len(),
            payload_len: payload.len(),
        };
        warn!(
            "{} (format {:02x?}, payload {:02x?})",
            e,
            format.as_bytes(),
            payload
        );
    }

    let mut values = Vec::with_capacity(STATUS_FIELDS.len());
    for (name, descriptor) in STATUS_FIELDS {
        if let Some(value) = descriptor.value(format, payload)? {
            values.push((*name, value));
        }
    }

    Ok(Status(values))
} // }}}
