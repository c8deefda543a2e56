/**
 * ESP3 - Serial framing between the daemon and the EnOcean gateway
 *
 * ROLE:
 * The USB gateway does not hand us radio telegrams directly: every telegram is
 * wrapped in an ESP3 packet on the serial line. This module turns the raw byte
 * stream into packets (and packets into `RadioFrame`s), and builds outbound
 * packets for the command path.
 *
 * WIRE FORMAT:
 *   0x55 | data_len (u16 BE) | opt_len (u8) | packet_type (u8) | CRC8(header)
 *        | data[data_len] | optional[opt_len] | CRC8(data + optional)
 *
 * RADIO_ERP1 data: RORG | user data | sender id (4 bytes) | status
 * RADIO_ERP1 optional: sub-telegram count | destination id (4) | dBm | security
 */

use crate::models::{FrameType, RadioFrame};
use time::OffsetDateTime;

pub const SYNC_BYTE: u8 = 0x55;
const HEADER_LEN: usize = 4;
/// sync + header + header CRC
const PREAMBLE_LEN: usize = 1 + HEADER_LEN + 1;
/// Anything larger than this in the reassembly buffer is garbage.
const MAX_BUFFERED: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    RadioErp1,
    Response,
    RadioSubTel,
    Event,
    CommonCommand,
    Other(u8),
}

impl PacketType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => PacketType::RadioErp1,
            0x02 => PacketType::Response,
            0x03 => PacketType::RadioSubTel,
            0x04 => PacketType::Event,
            0x05 => PacketType::CommonCommand,
            other => PacketType::Other(other),
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            PacketType::RadioErp1 => 0x01,
            PacketType::Response => 0x02,
            PacketType::RadioSubTel => 0x03,
            PacketType::Event => 0x04,
            PacketType::CommonCommand => 0x05,
            PacketType::Other(b) => *b,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("header CRC mismatch (expected {expected:#04x}, got {actual:#04x})")]
    HeaderCrc { expected: u8, actual: u8 },
    #[error("data CRC mismatch (expected {expected:#04x}, got {actual:#04x})")]
    DataCrc { expected: u8, actual: u8 },
    #[error("radio packet too short: {0} bytes")]
    ShortRadioPacket(usize),
    #[error("packet data too long: {0} bytes")]
    Oversized(usize),
}

/// CRC8 with polynomial 0x07, initial value 0.
pub fn crc8(bytes: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for byte in bytes {
        crc ^= byte;
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ 0x07;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Esp3Packet {
    pub packet_type: PacketType,
    pub data: Vec<u8>,
    pub optional: Vec<u8>,
}

impl Esp3Packet {
    /// Builds a RADIO_ERP1 packet. `destination` goes into the optional data.
    pub fn radio(rorg: u8, user_data: &[u8], sender: u32, status: u8, destination: u32) -> Self {
        let mut data = Vec::with_capacity(user_data.len() + 6);
        data.push(rorg);
        data.extend_from_slice(user_data);
        data.extend_from_slice(&sender.to_be_bytes());
        data.push(status);

        let mut optional = Vec::with_capacity(7);
        optional.push(0x03); // sub-telegram count for sending
        optional.extend_from_slice(&destination.to_be_bytes());
        optional.push(0xFF); // dBm, ignored when sending
        optional.push(0x00); // no security

        Self { packet_type: PacketType::RadioErp1, data, optional }
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let data_len = u16::try_from(self.data.len()).map_err(|_| FrameError::Oversized(self.data.len()))?;
        let opt_len = u8::try_from(self.optional.len()).map_err(|_| FrameError::Oversized(self.optional.len()))?;

        let mut out = Vec::with_capacity(PREAMBLE_LEN + self.data.len() + self.optional.len() + 1);
        out.push(SYNC_BYTE);
        let [hi, lo] = data_len.to_be_bytes();
        let header = [hi, lo, opt_len, self.packet_type.as_byte()];
        out.extend_from_slice(&header);
        out.push(crc8(&header));
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.optional);
        out.push(crc8(&out[PREAMBLE_LEN..]));
        Ok(out)
    }

    /// Converts a RADIO_ERP1 packet into a frame for the decoder.
    /// Returns `Ok(None)` for packets that do not carry a telegram.
    pub fn to_radio_frame(&self, received_at: OffsetDateTime) -> Result<Option<RadioFrame>, FrameError> {
        if self.packet_type != PacketType::RadioErp1 {
            return Ok(None);
        }
        // RORG + sender id + status
        if self.data.len() < 6 {
            return Err(FrameError::ShortRadioPacket(self.data.len()));
        }
        let n = self.data.len();
        let sender = u32::from_be_bytes([self.data[n - 5], self.data[n - 4], self.data[n - 3], self.data[n - 2]]);
        Ok(Some(RadioFrame {
            sender,
            frame_type: FrameType::from_rorg(self.data[0]),
            payload: self.data[1..n - 5].to_vec(),
            received_at,
        }))
    }

    /// Return code of a RESPONSE packet (0 = OK).
    pub fn response_code(&self) -> Option<u8> {
        match self.packet_type {
            PacketType::Response => self.data.first().copied(),
            _ => None,
        }
    }
}

/// Streaming reassembler: feed it whatever the serial port returned, get whole
/// packets back. Corrupt packets are skipped by resynchronising on the next sync byte.
#[derive(Debug, Default)]
pub struct Esp3Decoder {
    buffer: Vec<u8>,
}

impl Esp3Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Appends `bytes` and drains every complete packet. CRC failures are
    /// reported alongside the packets so the caller can log them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Esp3Packet, FrameError>> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();

        loop {
            match self.buffer.iter().position(|b| *b == SYNC_BYTE) {
                Some(0) => {}
                Some(pos) => {
                    self.buffer.drain(..pos);
                }
                None => {
                    self.buffer.clear();
                    break;
                }
            }
            if self.buffer.len() < PREAMBLE_LEN {
                break;
            }

            let header = [self.buffer[1], self.buffer[2], self.buffer[3], self.buffer[4]];
            let expected = crc8(&header);
            if expected != self.buffer[5] {
                out.push(Err(FrameError::HeaderCrc { expected, actual: self.buffer[5] }));
                self.buffer.drain(..1);
                continue;
            }

            let data_len = u16::from_be_bytes([header[0], header[1]]) as usize;
            let opt_len = header[2] as usize;
            let total = PREAMBLE_LEN + data_len + opt_len + 1;
            if total > MAX_BUFFERED {
                out.push(Err(FrameError::Oversized(data_len + opt_len)));
                self.buffer.drain(..1);
                continue;
            }
            if self.buffer.len() < total {
                break;
            }

            let body = &self.buffer[PREAMBLE_LEN..total - 1];
            let expected = crc8(body);
            let actual = self.buffer[total - 1];
            if expected != actual {
                out.push(Err(FrameError::DataCrc { expected, actual }));
                self.buffer.drain(..1);
                continue;
            }

            out.push(Ok(Esp3Packet {
                packet_type: PacketType::from_byte(header[3]),
                data: body[..data_len].to_vec(),
                optional: body[data_len..].to_vec(),
            }));
            self.buffer.drain(..total);
        }

        if self.buffer.len() > MAX_BUFFERED {
            let excess = self.buffer.len() - MAX_BUFFERED;
            self.buffer.drain(..excess);
        }
        out
    }
}
