//! Telegram decoder: radio frame -> structured reading.
//!
//! Pure functions only. The receive loop calls [`decode`] for every frame and
//! treats both `Ok(None)` (unsupported frame type) and `Err` as "drop and go on".

use crate::models::{
    hex_token, DeviceProfile, FourByteLayout, FrameType, Measurement, Measurements, RadioFrame, Reading,
    DEFAULT_CO2_SPAN_PPM,
};

/// Largest raw value of the 11-bit CO2 magnitude.
pub const CO2_RAW_MAX: u16 = 2047;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("short frame: {frame_type} needs {needed} bytes, got {got}")]
    ShortFrame { frame_type: FrameType, needed: usize, got: usize },
    #[error("empty frame: {0} telegram without payload")]
    EmptyFrame(FrameType),
}

/// Decodes one frame. `profile` is the declared profile of the sender, when known;
/// it only changes how 4BS payloads are interpreted.
pub fn decode(frame: &RadioFrame, profile: Option<DeviceProfile>) -> Result<Option<Reading>, DecodeError> {
    let measurements = match frame.frame_type {
        FrameType::FourByte => {
            let layout = profile
                .map(|p| p.four_byte_layout())
                .unwrap_or(FourByteLayout::Co2 { span_ppm: DEFAULT_CO2_SPAN_PPM });
            decode_four_byte(&frame.payload, layout)?
        }
        FrameType::VariableLength => decode_variable_length(&frame.payload)?,
        FrameType::RockerSwitch => decode_rocker_switch(&frame.payload)?,
        FrameType::Other(rorg) => {
            tracing::debug!("unsupported RORG {:#04x} from {}, skipping", rorg, frame.sender_id());
            return Ok(None);
        }
    };

    Ok(Some(Reading {
        device_id: frame.sender_id(),
        measurements,
        frame_type: frame.frame_type,
        timestamp: frame.received_at,
    }))
}

fn decode_four_byte(payload: &[u8], layout: FourByteLayout) -> Result<Measurements, DecodeError> {
    if payload.len() < 4 {
        return Err(DecodeError::ShortFrame { frame_type: FrameType::FourByte, needed: 4, got: payload.len() });
    }

    let mut data = Measurements::new();
    match layout {
        FourByteLayout::Co2 { span_ppm } => {
            let raw = u16::from_be_bytes([payload[1], payload[2]]);
            data.insert("co2_ppm".into(), Measurement::Number(scale_co2(raw, span_ppm)));
            data.insert("raw_value".into(), Measurement::Integer(raw as i64));
        }
        FourByteLayout::Climate { temperature_span } => {
            let raw_humidity = payload[1] as u16;
            let raw_temperature = payload[2] as u16;
            data.insert("humidity".into(), Measurement::Number(round1(humidity_percent(raw_humidity))));
            data.insert(
                "temperature".into(),
                Measurement::Number(round1(temperature_celsius(raw_temperature, temperature_span))),
            );
            data.insert("raw_humidity".into(), Measurement::Integer(raw_humidity as i64));
            data.insert("raw_temperature".into(), Measurement::Integer(raw_temperature as i64));
        }
    }
    Ok(data)
}

fn decode_variable_length(payload: &[u8]) -> Result<Measurements, DecodeError> {
    let Some((command, rest)) = payload.split_first() else {
        return Err(DecodeError::EmptyFrame(FrameType::VariableLength));
    };
    let mut data = Measurements::new();
    data.insert("command".into(), Measurement::Text(hex_token(*command)));
    if !rest.is_empty() {
        data.insert("payload".into(), Measurement::Tokens(rest.iter().copied().map(hex_token).collect()));
    }
    Ok(data)
}

fn decode_rocker_switch(payload: &[u8]) -> Result<Measurements, DecodeError> {
    let Some(status) = payload.first() else {
        return Err(DecodeError::EmptyFrame(FrameType::RockerSwitch));
    };
    let mut data = Measurements::new();
    data.insert("button_state".into(), Measurement::Text(hex_token(*status)));
    Ok(data)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn scale_co2(raw: u16, span_ppm: f64) -> f64 {
    let raw = raw.min(CO2_RAW_MAX);
    round1(raw as f64 / CO2_RAW_MAX as f64 * span_ppm)
}

/// CO2 concentration in ppm over the 0-2500 ppm sensor range, one decimal.
/// Values above the 11-bit range saturate at full scale.
pub fn co2_ppm(raw: u16) -> f64 {
    scale_co2(raw, DEFAULT_CO2_SPAN_PPM)
}

/// Temperature in °C for a raw byte over `scale` degrees. Out-of-range input gives 0.
pub fn temperature_celsius(raw: u16, scale: f64) -> f64 {
    if raw > 255 {
        return 0.0;
    }
    raw as f64 / 255.0 * scale
}

/// Relative humidity in percent for a raw byte. Out-of-range input gives 0.
pub fn humidity_percent(raw: u16) -> f64 {
    if raw > 255 {
        return 0.0;
    }
    raw as f64 / 255.0 * 100.0
}
