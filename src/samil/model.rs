use crate::prelude::*;

use num_enum::TryFromPrimitive;
use serde::{Serialize, Serializer};
use std::ops::Range;

// DeviceType {{{
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum DeviceType {
    SinglePhase = 1,
    ThreePhase = 2,
    SolarEnviMonitor = 3,
    RPhase = 4,
    SPhase = 5,
    TPhase = 6,
}

impl DeviceType {
    pub fn description(&self) -> &'static str {
        match self {
            DeviceType::SinglePhase => "Single-phase inverter",
            DeviceType::ThreePhase => "Three-phase inverter",
            DeviceType::SolarEnviMonitor => "SolarEnvi Monitor",
            DeviceType::RPhase => "R-phase inverter of the three combined single-phase ones",
            DeviceType::SPhase => "S-phase inverter of the three combined single-phase ones",
            DeviceType::TPhase => "T-phase inverter of the three combined single-phase ones",
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

impl Serialize for DeviceType {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.description())
    }
}

impl std::str::FromStr for DeviceType {
    type Err = Error;

    /// Parses the ASCII digit the inverter sends, e.g. `"2"`.
    fn from_str(s: &str) -> Result<Self> {
        let unknown = || Error::UnknownEnumValue {
            kind: "device type",
            value: s.to_string(),
        };
        let code: u8 = s.parse().map_err(|_| unknown())?;
        Self::try_from(code).map_err(|_| unknown())
    }
} // }}}

// ModelInfo {{{
/// Identity record returned for a model info request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub device_type: DeviceType,
    pub va_rating: String,
    pub firmware_version: String,
    pub model_name: String,
    pub manufacturer: String,
    pub serial_number: String,
    pub communication_version: String,
    pub other_version: String,
    pub general: String,
}

impl ModelInfo {
    const DEVICE_TYPE: Range<usize> = 0..1;
    const VA_RATING: Range<usize> = 1..7;
    const FIRMWARE_VERSION: Range<usize> = 7..12;
    const MODEL_NAME: Range<usize> = 12..28;
    const MANUFACTURER: Range<usize> = 28..44;
    const SERIAL_NUMBER: Range<usize> = 44..60;
    const COMMUNICATION_VERSION: Range<usize> = 60..65;
    const OTHER_VERSION: Range<usize> = 65..70;
    const GENERAL: Range<usize> = 70..71;

    /// Decodes the fixed-offset record. Fields cut off by a short payload come
    /// out empty, but the device type must always be present and known.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let field = |range: Range<usize>| -> Result<String> {
            let start = range.start.min(payload.len());
            let end = range.end.min(payload.len());
            decode_string(&payload[start..end])
        };

        Ok(Self {
            device_type: field(Self::DEVICE_TYPE)?.parse()?,
            va_rating: field(Self::VA_RATING)?,
            firmware_version: field(Self::FIRMWARE_VERSION)?,
            model_name: field(Self::MODEL_NAME)?,
            manufacturer: field(Self::MANUFACTURER)?,
            serial_number: field(Self::SERIAL_NUMBER)?,
            communication_version: field(Self::COMMUNICATION_VERSION)?,
            other_version: field(Self::OTHER_VERSION)?,
            general: field(Self::GENERAL)?,
        })
    }
} // }}}

/// ASCII up to the first NUL, surrounding whitespace trimmed.
pub fn decode_string(input: &[u8]) -> Result<String> {
    let end = input.iter().position(|&b| b == 0).unwrap_or(input.len());
    let bytes = &input[..end];

    if !bytes.is_ascii() {
        return Err(Error::MalformedMessage(format!(
            "non-ASCII string field {:02x?}",
            bytes
        )));
    }

    Ok(String::from_utf8_lossy(bytes).trim().to_string())
}
