/**
 * COMMAND PATH - HTTP command -> VLD telegram -> gateway
 *
 * A command becomes a single VLD RADIO_ERP1 packet addressed to the device:
 *   user data = command byte(s) followed by parameter bytes
 *
 * Encoding is best-effort: the command is read as a hex token ("0x31", "31")
 * and otherwise sent as its ASCII bytes. Parameters are a boolean (0x01/0x00),
 * a non-negative number (rounded, saturated to 0xFF), a hex token string, or
 * an array of those.
 *
 * Delivery is one attempt with a boolean result. No retry, no acknowledgement.
 */

use crate::esp3::{Esp3Packet, FrameError};
use crate::models::{parse_address, FrameType};
use crate::transport::SerialTransport;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// VLD telegrams carry 1 to 14 bytes of user data.
pub const VLD_MAX_USER_DATA: usize = 14;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub device_id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("invalid device id: {0}")]
    InvalidDevice(String),
    #[error("empty command")]
    EmptyCommand,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("telegram too long: {0} bytes")]
    TooLong(usize),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

fn hex_byte(text: &str) -> Option<u8> {
    let t = text.trim();
    let digits = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")).unwrap_or(t);
    if digits.is_empty() || digits.len() > 2 {
        return None;
    }
    u8::from_str_radix(digits, 16).ok()
}

fn command_bytes(command: &str) -> Result<Vec<u8>, EncodeError> {
    if command.trim().is_empty() {
        return Err(EncodeError::EmptyCommand);
    }
    Ok(match hex_byte(command) {
        Some(b) => vec![b],
        None => command.as_bytes().to_vec(),
    })
}

fn number_byte(n: &Number) -> Option<u8> {
    if let Some(v) = n.as_u64() {
        return Some(u8::try_from(v).unwrap_or(u8::MAX));
    }
    let v = n.as_f64()?;
    (v.is_finite() && v >= 0.0).then(|| v.round().min(255.0) as u8)
}

fn parameter_bytes(value: &Value, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    match value {
        Value::Null => Ok(()),
        Value::Bool(flag) => {
            out.push(u8::from(*flag));
            Ok(())
        }
        Value::Number(n) => {
            let byte = number_byte(n).ok_or_else(|| EncodeError::InvalidParameter(n.to_string()))?;
            out.push(byte);
            Ok(())
        }
        Value::String(s) => {
            let byte = hex_byte(s).ok_or_else(|| EncodeError::InvalidParameter(s.clone()))?;
            out.push(byte);
            Ok(())
        }
        // nested arrays are flattened
        Value::Array(items) => items.iter().try_for_each(|item| parameter_bytes(item, out)),
        other => Err(EncodeError::InvalidParameter(other.to_string())),
    }
}

/// Builds the encoded ESP3 frame for `request`, sent from `sender`.
pub fn encode_command(request: &CommandRequest, sender: u32) -> Result<Vec<u8>, EncodeError> {
    let destination =
        parse_address(&request.device_id).ok_or_else(|| EncodeError::InvalidDevice(request.device_id.clone()))?;

    let mut user_data = command_bytes(&request.command)?;
    if let Some(params) = &request.parameters {
        parameter_bytes(params, &mut user_data)?;
    }
    if user_data.len() > VLD_MAX_USER_DATA {
        return Err(EncodeError::TooLong(user_data.len()));
    }

    Ok(Esp3Packet::radio(FrameType::RORG_VLD, &user_data, sender, 0x00, destination).encode()?)
}

/// Where encoded frames go. The serial transport in production.
pub trait Outbound: Send + Sync {
    fn is_connected(&self) -> bool;
    fn send(&self, frame: &[u8]) -> bool;
}

impl Outbound for SerialTransport {
    fn is_connected(&self) -> bool {
        SerialTransport::is_connected(self)
    }

    fn send(&self, frame: &[u8]) -> bool {
        SerialTransport::send(self, frame)
    }
}

#[derive(Clone)]
pub struct CommandPath {
    outbound: Arc<dyn Outbound>,
    sender: u32,
}

impl CommandPath {
    pub fn new(outbound: Arc<dyn Outbound>, sender: u32) -> Self {
        Self { outbound, sender }
    }

    /// One best-effort delivery attempt; true only if the frame was written.
    pub fn submit(&self, request: &CommandRequest) -> bool {
        let command_id = Uuid::new_v4();
        if !self.outbound.is_connected() {
            error!("command {} to {} rejected: gateway not connected", command_id, request.device_id);
            return false;
        }

        let frame = match encode_command(request, self.sender) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("command {} to {} not encodable: {}", command_id, request.device_id, e);
                return false;
            }
        };

        let sent = self.outbound.send(&frame);
        if sent {
            info!("command {} '{}' sent to {}", command_id, request.command, request.device_id);
        } else {
            error!("command {} '{}' to {} failed", command_id, request.command, request.device_id);
        }
        sent
    }
}
