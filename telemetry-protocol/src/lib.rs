//! On-air frame format for the sensor telemetry hub.
//!
//! Field nodes and the gateway share this crate so the two ends stay
//! bit-exact: a node runs `Frame::pack` + [`append_crc`] before handing the
//! payload to the radio, the gateway runs [`check_and_strip`] +
//! `Frame::unpack` on everything the radio delivers.
//!
//! 60 (0x3c) bytes are available on the air, limited by the radio's packet
//! engine. The last two carry the CRC, leaving 58 for data:
//!
//! | Offset      | Width  | Purpose                                          |
//! |-------------|--------|--------------------------------------------------|
//! | 0x00        | u8     | Node ID of the Tx node                           |
//! | 0x01        | u8     | Node ID repeat (sanity check when the CRC fails) |
//! | 0x02 - 0x03 | u16    | Packet serial number, wraps at 0x10000           |
//! | 0x04 - 0x05 | u16    | Status register, one event per asserted bit      |
//! | 0x06 - 0x07 | u8,u8  | Reserved, zero on emit, ignored on receive       |
//! | 0x08 - 0x39 | Bf x10 | Sensor ID byte + big-endian IEEE-754 float pairs |
//! | 0x3a - 0x3b | u16    | CRC-16/CCITT-FALSE, appended high byte first     |
//!
//! Sensor ID 0xff is sent as padding when no sensor fills a slot and must
//! never be recorded.

use byteorder::{BigEndian, ByteOrder};
use crc::{Crc, CRC_16_IBM_3740};
use thiserror::Error;

/// Full on-air length including the trailing CRC.
pub const FRAME_LEN: usize = 60;
/// Plaintext struct length, CRC excluded.
pub const PAYLOAD_LEN: usize = 58;
/// Number of (sensor ID, value) pairs carried per frame.
pub const SENSOR_SLOTS: usize = 10;
/// Slot ID transmitted as padding when a node has nothing to put there.
pub const PAD_SENSOR_ID: u8 = 0xFF;

/// Byte offset of the first sensor slot.
const SENSOR_OFFSET: usize = 8;
/// Bytes per sensor slot: one ID byte and a big-endian f32.
const SLOT_LEN: usize = 5;

// CRC-16/IBM-3740 is the registered name of CRC-16/CCITT-FALSE:
// width 16, poly 0x1021, init 0xFFFF, no reflection, no final xor.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// A frame the radio delivered that cannot be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BadFrame {
    #[error("CRC check failed")]
    BadCrc,
    #[error("unexpected frame length {got}, expected {expected}")]
    BadLength { got: usize, expected: usize },
}

/// CRC-16/CCITT-FALSE over `data`.
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Returns `payload` with the 16-bit CRC appended, high byte first.
pub fn append_crc(payload: &[u8]) -> Vec<u8> {
    let crc = crc16(payload);
    let mut framed = Vec::with_capacity(payload.len() + 2);
    framed.extend_from_slice(payload);
    framed.push((crc >> 8) as u8);
    framed.push((crc & 0xFF) as u8);
    framed
}

/// Verifies the trailing CRC and strips it.
///
/// Running the CRC over a payload plus its own appended CRC yields zero, so
/// a single pass both validates the frame and locates the boundary.
pub fn check_and_strip(rx: &[u8]) -> Result<&[u8], BadFrame> {
    if rx.len() < 2 || crc16(rx) != 0 {
        return Err(BadFrame::BadCrc);
    }
    Ok(&rx[..rx.len() - 2])
}

/// One decoded frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    /// Transmitting node, 0x00-0xFE.
    pub node_id: u8,
    /// Per-node counter, increments with every sent frame.
    pub serial: u16,
    /// Event bitmap; bit i asserted means event i on this node.
    pub status: u16,
    /// Sensor slots; ID [`PAD_SENSOR_ID`] marks an empty slot.
    pub sensors: [(u8, f32); SENSOR_SLOTS],
}

impl Frame {
    /// Decodes a CRC-stripped payload.
    pub fn unpack(stripped: &[u8]) -> Result<Frame, BadFrame> {
        if stripped.len() != PAYLOAD_LEN {
            return Err(BadFrame::BadLength {
                got: stripped.len(),
                expected: PAYLOAD_LEN,
            });
        }
        let mut sensors = [(PAD_SENSOR_ID, 0.0f32); SENSOR_SLOTS];
        let slots = stripped[SENSOR_OFFSET..].chunks_exact(SLOT_LEN);
        for (slot, chunk) in sensors.iter_mut().zip(slots) {
            *slot = (chunk[0], BigEndian::read_f32(&chunk[1..]));
        }
        Ok(Frame {
            node_id: stripped[0],
            serial: BigEndian::read_u16(&stripped[2..4]),
            status: BigEndian::read_u16(&stripped[4..6]),
            sensors,
        })
    }

    /// Encodes the 58-byte payload; the CRC is not yet appended.
    ///
    /// The node ID is emitted twice and the reserved pair is zeroed.
    pub fn pack(&self) -> [u8; PAYLOAD_LEN] {
        let mut buf = [0u8; PAYLOAD_LEN];
        buf[0] = self.node_id;
        buf[1] = self.node_id;
        BigEndian::write_u16(&mut buf[2..4], self.serial);
        BigEndian::write_u16(&mut buf[4..6], self.status);
        for (i, (id, value)) in self.sensors.iter().enumerate() {
            let at = SENSOR_OFFSET + i * SLOT_LEN;
            buf[at] = *id;
            BigEndian::write_f32(&mut buf[at + 1..at + SLOT_LEN], *value);
        }
        buf
    }

    /// The slots that carry real readings, padding filtered out.
    pub fn readings(&self) -> impl Iterator<Item = (u8, f32)> + '_ {
        self.sensors
            .iter()
            .copied()
            .filter(|(id, _)| *id != PAD_SENSOR_ID)
    }
}

/// Increments a packet serial, wrapping at 0x10000.
pub fn next_serial(serial: u16) -> u16 {
    serial.wrapping_add(1)
}
