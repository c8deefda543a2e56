/*!
Builds ESP3-framed radio telegrams as the gateway would put them on the wire.
*/

use anyhow::Result;
use purevent_daemon::esp3::{Esp3Packet, PacketType};
use purevent_daemon::models::FrameType;

/// Telegrams from one sender address.
#[derive(Debug, Clone, Copy)]
pub struct TelegramBuilder {
    sender: u32,
    status: u8,
}

impl TelegramBuilder {
    pub fn new(sender: u32) -> Self {
        Self { sender, status: 0x00 }
    }

    pub fn with_status(mut self, status: u8) -> Self {
        self.status = status;
        self
    }

    pub fn raw(&self, rorg: u8, user_data: &[u8]) -> Result<Vec<u8>> {
        // received telegrams carry the broadcast id as destination
        Ok(Esp3Packet::radio(rorg, user_data, self.sender, self.status, 0xFFFF_FFFF).encode()?)
    }

    /// 4BS CO2 telegram with an 11-bit raw magnitude, data-telegram bit set.
    pub fn co2(&self, raw: u16) -> Result<Vec<u8>> {
        let [hi, lo] = raw.to_be_bytes();
        self.raw(FrameType::RORG_4BS, &[0x00, hi, lo, 0x08])
    }

    pub fn climate(&self, raw_humidity: u8, raw_temperature: u8) -> Result<Vec<u8>> {
        self.raw(FrameType::RORG_4BS, &[0x00, raw_humidity, raw_temperature, 0x08])
    }

    /// 4BS telegram with only two user bytes; the decoder rejects it.
    pub fn short_four_byte(&self) -> Result<Vec<u8>> {
        self.raw(FrameType::RORG_4BS, &[0x00, 0x10])
    }

    pub fn vld(&self, command: u8, payload: &[u8]) -> Result<Vec<u8>> {
        let mut data = vec![command];
        data.extend_from_slice(payload);
        self.raw(FrameType::RORG_VLD, &data)
    }

    pub fn rocker(&self, button: u8) -> Result<Vec<u8>> {
        self.raw(FrameType::RORG_RPS, &[button])
    }
}

/// RESPONSE packet the gateway sends after a write.
pub fn response(code: u8) -> Result<Vec<u8>> {
    let packet = Esp3Packet { packet_type: PacketType::Response, data: vec![code], optional: Vec::new() };
    Ok(packet.encode()?)
}
