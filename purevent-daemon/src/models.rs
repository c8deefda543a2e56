//! Shared data model: device profiles, frame-type tags, decoded readings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;

/// Catalog of the device profiles the gateway knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceProfile {
    VentilationUnit,
    Co2Sensor,
    ClimateSensor,
    AssistantModule,
}

/// EnOcean equipment profile identifiers (RORG / FUNC / TYPE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Eep {
    pub rorg: u8,
    pub func: u8,
    pub kind: u8,
}

/// How the payload of a 4BS telegram is laid out for a given profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FourByteLayout {
    /// bytes 1-2: 11-bit CO2 magnitude scaled to `span_ppm`
    Co2 { span_ppm: f64 },
    /// byte 1: humidity, byte 2: temperature scaled to `temperature_span`
    Climate { temperature_span: f64 },
}

pub const DEFAULT_CO2_SPAN_PPM: f64 = 2500.0;
pub const DEFAULT_TEMPERATURE_SPAN: f64 = 51.0;

impl DeviceProfile {
    pub const ALL: [DeviceProfile; 4] = [
        DeviceProfile::VentilationUnit,
        DeviceProfile::Co2Sensor,
        DeviceProfile::ClimateSensor,
        DeviceProfile::AssistantModule,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            DeviceProfile::VentilationUnit => "D1079-01-00",
            DeviceProfile::Co2Sensor => "A5-09-04",
            DeviceProfile::ClimateSensor => "A5-04-01",
            DeviceProfile::AssistantModule => "D1079-00-00",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.code().eq_ignore_ascii_case(code.trim()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceProfile::VentilationUnit => "VMI Purevent",
            DeviceProfile::Co2Sensor => "Capteur CO2",
            DeviceProfile::ClimateSensor => "Capteur T°/Humidité",
            DeviceProfile::AssistantModule => "Assistant Ventilairsec",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DeviceProfile::VentilationUnit => "Ventilation Mécanique par Insufflation Purevent",
            DeviceProfile::Co2Sensor => "Capteur de dioxyde de carbone",
            DeviceProfile::ClimateSensor => "Capteur température et humidité",
            DeviceProfile::AssistantModule => "Module assistant Ventilairsec",
        }
    }

    pub fn eep(&self) -> Eep {
        match self {
            DeviceProfile::VentilationUnit => Eep { rorg: 0xD1, func: 0x07, kind: 0x09 },
            DeviceProfile::Co2Sensor => Eep { rorg: 0xA5, func: 0x09, kind: 0x04 },
            DeviceProfile::ClimateSensor => Eep { rorg: 0xA5, func: 0x04, kind: 0x01 },
            DeviceProfile::AssistantModule => Eep { rorg: 0xD1, func: 0x07, kind: 0x08 },
        }
    }

    pub fn four_byte_layout(&self) -> FourByteLayout {
        match self {
            DeviceProfile::ClimateSensor => FourByteLayout::Climate { temperature_span: DEFAULT_TEMPERATURE_SPAN },
            _ => FourByteLayout::Co2 { span_ppm: DEFAULT_CO2_SPAN_PPM },
        }
    }
}

/// Declared type of a registered device. Codes outside the catalog are kept
/// verbatim so that whatever the operator registered survives a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceType {
    Profile(DeviceProfile),
    Other(String),
}

impl DeviceType {
    pub fn unknown() -> Self {
        DeviceType::Other("unknown".to_string())
    }

    pub fn profile(&self) -> Option<DeviceProfile> {
        match self {
            DeviceType::Profile(p) => Some(*p),
            DeviceType::Other(_) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceType::Profile(p) => p.name(),
            DeviceType::Other(_) => "Unknown",
        }
    }
}

impl From<String> for DeviceType {
    fn from(code: String) -> Self {
        match DeviceProfile::from_code(&code) {
            Some(p) => DeviceType::Profile(p),
            None => DeviceType::Other(code),
        }
    }
}

impl From<&str> for DeviceType {
    fn from(code: &str) -> Self {
        DeviceType::from(code.to_string())
    }
}

impl From<DeviceType> for String {
    fn from(t: DeviceType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Profile(p) => f.write_str(p.code()),
            DeviceType::Other(code) => f.write_str(code),
        }
    }
}

/// Frame-type tag of a radio telegram (the RORG byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FrameType {
    /// 4BS, fixed 4-byte telegram
    FourByte,
    /// VLD, variable-length telegram
    VariableLength,
    /// RPS, rocker switch telegram
    RockerSwitch,
    Other(u8),
}

impl FrameType {
    pub const RORG_4BS: u8 = 0xA5;
    pub const RORG_VLD: u8 = 0xD2;
    pub const RORG_RPS: u8 = 0xF6;

    pub fn from_rorg(rorg: u8) -> Self {
        match rorg {
            Self::RORG_4BS => FrameType::FourByte,
            Self::RORG_VLD => FrameType::VariableLength,
            Self::RORG_RPS => FrameType::RockerSwitch,
            other => FrameType::Other(other),
        }
    }

    pub fn rorg(&self) -> u8 {
        match self {
            FrameType::FourByte => Self::RORG_4BS,
            FrameType::VariableLength => Self::RORG_VLD,
            FrameType::RockerSwitch => Self::RORG_RPS,
            FrameType::Other(b) => *b,
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}", self.rorg())
    }
}

impl From<FrameType> for String {
    fn from(t: FrameType) -> Self {
        t.to_string()
    }
}

impl TryFrom<String> for FrameType {
    type Error = std::num::ParseIntError;

    fn try_from(tag: String) -> Result<Self, Self::Error> {
        let digits = tag.trim().trim_start_matches("0x").trim_start_matches("0X");
        u8::from_str_radix(digits, 16).map(FrameType::from_rorg)
    }
}

/// One decoded value in a device's state map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Measurement {
    Integer(i64),
    Number(f64),
    Text(String),
    Tokens(Vec<String>),
}

impl Measurement {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Measurement::Integer(i) => Some(*i as f64),
            Measurement::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Measurement::Text(s) => Some(s),
            _ => None,
        }
    }
}

pub type Measurements = BTreeMap<String, Measurement>;

/// Formats a radio address the way it is shown everywhere: 8 uppercase hex digits.
pub fn format_address(address: u32) -> String {
    format!("{:08X}", address)
}

/// Parses `0185A3F2`, `0x0185a3f2` or `01:85:A3:F2` into a radio address.
pub fn parse_address(text: &str) -> Option<u32> {
    let hex: String = text
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect();
    if hex.is_empty() || hex.len() > 8 {
        return None;
    }
    u32::from_str_radix(&hex, 16).ok()
}

/// Lowercase `0x..` token used for opaque bytes in readings.
pub fn hex_token(byte: u8) -> String {
    format!("{:#x}", byte)
}

/// A telegram as it came off the gateway, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RadioFrame {
    pub sender: u32,
    pub frame_type: FrameType,
    /// user data only (no RORG, sender id or status byte)
    pub payload: Vec<u8>,
    pub received_at: OffsetDateTime,
}

impl RadioFrame {
    pub fn sender_id(&self) -> String {
        format_address(self.sender)
    }
}

/// Structured result of decoding one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub device_id: String,
    pub measurements: Measurements,
    pub frame_type: FrameType,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub sender_id: String,
    pub rorg: FrameType,
    pub data: Measurements,
}

impl From<&Reading> for HistoryEntry {
    fn from(r: &Reading) -> Self {
        Self {
            timestamp: r.timestamp,
            sender_id: r.device_id.clone(),
            rorg: r.frame_type,
            data: r.measurements.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_codes_round_trip() {
        for p in DeviceProfile::ALL {
            assert_eq!(DeviceProfile::from_code(p.code()), Some(p));
        }
        assert_eq!(DeviceProfile::from_code("a5-09-04"), Some(DeviceProfile::Co2Sensor));
        assert_eq!(DeviceProfile::from_code("F6-02-01"), None);
    }

    #[test]
    fn test_unknown_device_type_is_kept_verbatim() {
        let t = DeviceType::from("F6-02-01");
        assert_eq!(t.to_string(), "F6-02-01");
        assert_eq!(t.name(), "Unknown");
        assert_eq!(t.profile(), None);

        let json = serde_json::to_string(&DeviceType::Profile(DeviceProfile::ClimateSensor)).unwrap();
        assert_eq!(json, "\"A5-04-01\"");
    }

    #[test]
    fn test_frame_type_tags() {
        assert_eq!(FrameType::from_rorg(0xA5), FrameType::FourByte);
        assert_eq!(FrameType::FourByte.to_string(), "A5");
        assert_eq!(FrameType::Other(0xD1).to_string(), "D1");
        let parsed: FrameType = serde_json::from_str("\"F6\"").unwrap();
        assert_eq!(parsed, FrameType::RockerSwitch);
    }

    #[test]
    fn test_address_helpers() {
        assert_eq!(format_address(0x0185A3F2), "0185A3F2");
        assert_eq!(parse_address("0185a3f2"), Some(0x0185A3F2));
        assert_eq!(parse_address("0x0185A3F2"), Some(0x0185A3F2));
        assert_eq!(parse_address("01:85:A3:F2"), Some(0x0185A3F2));
        assert_eq!(parse_address("not-an-id"), None);
        assert_eq!(parse_address("0185A3F2FF"), None);
        assert_eq!(hex_token(0x0a), "0xa");
        assert_eq!(hex_token(0xF6), "0xf6");
    }

    #[test]
    fn test_measurement_json_shape() {
        let mut m = Measurements::new();
        m.insert("raw_value".into(), Measurement::Integer(1024));
        m.insert("co2_ppm".into(), Measurement::Number(1250.6));
        m.insert("payload".into(), Measurement::Tokens(vec!["0x01".into()]));
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["raw_value"], 1024);
        assert_eq!(json["co2_ppm"], 1250.6);
        assert_eq!(json["payload"][0], "0x01");

        let back: Measurements = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }
}
