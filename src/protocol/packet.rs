//! Notification packet types and parsing.
//!
//! Every notification from the scale has the same framing:
//! - byte 0: packet id
//! - byte 1: declared length (informational, not used to bound parsing)
//! - last byte: checksum (carried, not verified)
//!
//! Weight readings (`0x10`) additionally carry:
//! - byte 2: scale type (21 = kilograms)
//! - bytes 3-4: weight * 100, big-endian
//! - byte 5: convergence flag (0 = still converging, 1 = final)

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::utils::hex_spaced;

/// Scale type byte reported by kilogram scales.
pub const SCALE_TYPE_KILOGRAMS: u8 = 21;

/// Packet types understood by the handshake protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Weight reading (0x10).
    WeightReading = 0x10,
    /// First device-initiated handshake packet (0x12).
    Handshake1 = 0x12,
    /// Second device-initiated handshake packet (0x14).
    Handshake2 = 0x14,
    /// Any other packet id.
    Unknown = 0xFF,
}

impl PacketType {
    /// Create from raw byte value.
    pub fn from_raw(value: u8) -> Self {
        match value {
            0x10 => Self::WeightReading,
            0x12 => Self::Handshake1,
            0x14 => Self::Handshake2,
            _ => Self::Unknown,
        }
    }

    /// Name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::WeightReading => "WeightReading",
            Self::Handshake1 => "Handshake1",
            Self::Handshake2 => "Handshake2",
            Self::Unknown => "Unknown",
        }
    }
}

/// Unit the scale reports its readings in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScaleType {
    /// Kilograms (scale type 21).
    Kilograms,
    /// Any other scale type byte. The weight is still decoded the same way.
    Unknown(u8),
}

impl ScaleType {
    /// Map the raw scale type byte.
    pub const fn from_raw(value: u8) -> Self {
        match value {
            SCALE_TYPE_KILOGRAMS => Self::Kilograms,
            other => Self::Unknown(other),
        }
    }

    /// Convert back to the raw byte.
    pub const fn to_raw(&self) -> u8 {
        match self {
            Self::Kilograms => SCALE_TYPE_KILOGRAMS,
            Self::Unknown(raw) => *raw,
        }
    }
}

impl std::fmt::Display for ScaleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kilograms => write!(f, "kg"),
            Self::Unknown(raw) => write!(f, "unknown({})", raw),
        }
    }
}

/// Convergence state of a weight reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReadingState {
    /// Display still blinking, value may change (flag 0).
    Converging,
    /// Value settled (flag 1).
    Final,
    /// Any other flag value.
    Unknown(u8),
}

impl ReadingState {
    /// Map the raw convergence flag.
    pub const fn from_raw(value: u8) -> Self {
        match value {
            0 => Self::Converging,
            1 => Self::Final,
            other => Self::Unknown(other),
        }
    }

    /// Check if the reading is final.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final)
    }
}

impl std::fmt::Display for ReadingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Converging => write!(f, "converging"),
            Self::Final => write!(f, "final"),
            Self::Unknown(raw) => write!(f, "unknown({})", raw),
        }
    }
}

/// Fields specific to a weight reading packet.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WeightReading {
    /// Scale type reported by the device.
    pub scale_type: ScaleType,
    /// Weight in kilograms, two decimal digits of precision.
    pub weight_kg: f64,
    /// Convergence state.
    pub state: ReadingState,
}

impl WeightReading {
    /// Decode the weight bytes (big-endian, hundredths of a kilogram).
    pub fn decode_weight(high: u8, low: u8) -> f64 {
        u16::from_be_bytes([high, low]) as f64 / 100.0
    }
}

/// Variant-specific content of a packet.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketBody {
    /// First handshake packet.
    Handshake1,
    /// Second handshake packet.
    Handshake2,
    /// Weight reading.
    WeightReading(WeightReading),
    /// Unrecognized packet, payload opaque.
    Unknown,
}

/// A decoded notification from the scale.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    packet_id: u8,
    declared_length: u8,
    checksum: u8,
    body: PacketBody,
    raw: Bytes,
}

impl Packet {
    /// Minimum buffer size: packet id + declared length.
    pub const HEADER_SIZE: usize = 2;
    /// Minimum size of a weight reading (header, scale type, weight, flag).
    pub const WEIGHT_READING_MIN_SIZE: usize = 6;

    /// Parse a notification buffer.
    ///
    /// Buffers shorter than [`Packet::HEADER_SIZE`] are rejected. Unrecognized
    /// packet ids decode to [`PacketBody::Unknown`].
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE {
            return Err(Error::MalformedPacket {
                length: data.len(),
                reason: "missing packet id or length".to_string(),
            });
        }

        let packet_id = data[0];
        let body = match PacketType::from_raw(packet_id) {
            PacketType::Handshake1 => PacketBody::Handshake1,
            PacketType::Handshake2 => PacketBody::Handshake2,
            PacketType::WeightReading => {
                if data.len() < Self::WEIGHT_READING_MIN_SIZE {
                    return Err(Error::MalformedPacket {
                        length: data.len(),
                        reason: "weight reading truncated".to_string(),
                    });
                }
                PacketBody::WeightReading(WeightReading {
                    scale_type: ScaleType::from_raw(data[2]),
                    weight_kg: WeightReading::decode_weight(data[3], data[4]),
                    state: ReadingState::from_raw(data[5]),
                })
            }
            PacketType::Unknown => PacketBody::Unknown,
        };

        Ok(Self {
            packet_id,
            declared_length: data[1],
            checksum: data[data.len() - 1],
            body,
            raw: Bytes::copy_from_slice(data),
        })
    }

    /// Raw packet id byte.
    pub fn packet_id(&self) -> u8 {
        self.packet_id
    }

    /// Packet type derived from the id.
    pub fn packet_type(&self) -> PacketType {
        PacketType::from_raw(self.packet_id)
    }

    /// Payload length as declared in byte 1.
    pub fn declared_length(&self) -> u8 {
        self.declared_length
    }

    /// Last byte of the buffer.
    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    /// Variant-specific content.
    pub fn body(&self) -> &PacketBody {
        &self.body
    }

    /// The weight reading, if this is one.
    pub fn weight_reading(&self) -> Option<&WeightReading> {
        match &self.body {
            PacketBody::WeightReading(reading) => Some(reading),
            _ => None,
        }
    }

    /// The raw notification buffer.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }
}

impl std::fmt::Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:#04x} {} len={}",
            self.packet_id,
            self.packet_type().name(),
            self.declared_length
        )?;

        if let PacketBody::WeightReading(reading) = &self.body {
            write!(
                f,
                " scale={} weight={:.2}kg state={}",
                reading.scale_type, reading.weight_kg, reading.state
            )?;
        }

        write!(
            f,
            " payload=[{}] checksum={:#04x}",
            hex_spaced(&self.raw),
            self.checksum
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn weight_buffer(high: u8, low: u8, flag: u8) -> Vec<u8> {
        vec![0x10, 0x08, 0x15, high, low, flag, 0x00, 0x9c]
    }

    #[test]
    fn test_packet_type_from_raw() {
        assert_eq!(PacketType::from_raw(0x10), PacketType::WeightReading);
        assert_eq!(PacketType::from_raw(0x12), PacketType::Handshake1);
        assert_eq!(PacketType::from_raw(0x14), PacketType::Handshake2);
        assert_eq!(PacketType::from_raw(0x13), PacketType::Unknown);
        assert_eq!(PacketType::from_raw(0xFF), PacketType::Unknown);
    }

    #[test]
    fn test_parse_weight_reading() {
        let packet = Packet::parse(&weight_buffer(0x1C, 0x20, 0x00)).unwrap();

        assert_eq!(packet.packet_id(), 0x10);
        assert_eq!(packet.declared_length(), 0x08);
        assert_eq!(packet.checksum(), 0x9c);

        let reading = packet.weight_reading().unwrap();
        assert_eq!(reading.scale_type, ScaleType::Kilograms);
        assert!((reading.weight_kg - 72.00).abs() < 1e-9);
        assert_eq!(reading.state, ReadingState::Converging);
    }

    #[test]
    fn test_parse_final_reading() {
        let packet = Packet::parse(&weight_buffer(0x1F, 0xCB, 0x01)).unwrap();
        let reading = packet.weight_reading().unwrap();
        assert!((reading.weight_kg - 81.71).abs() < 1e-9);
        assert!(reading.state.is_final());
    }

    #[test]
    fn test_parse_unknown_scale_type() {
        let packet = Packet::parse(&[0x10, 0x08, 0x07, 0x00, 0x64, 0x00, 0x00, 0x00]).unwrap();
        let reading = packet.weight_reading().unwrap();
        assert_eq!(reading.scale_type, ScaleType::Unknown(7));
        assert!((reading.weight_kg - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_handshakes() {
        let packet = Packet::parse(&[0x12, 0x11, 0x15, 0x00, 0x2a]).unwrap();
        assert_eq!(packet.body(), &PacketBody::Handshake1);
        assert_eq!(packet.checksum(), 0x2a);

        let packet = Packet::parse(&[0x14, 0x0b, 0x15, 0x00, 0x4f]).unwrap();
        assert_eq!(packet.body(), &PacketBody::Handshake2);
    }

    #[test]
    fn test_parse_unknown_packet() {
        let packet = Packet::parse(&[0x21, 0x05, 0xaa, 0xbb, 0xcc]).unwrap();
        assert_eq!(packet.packet_type(), PacketType::Unknown);
        assert_eq!(packet.body(), &PacketBody::Unknown);
        assert_eq!(packet.raw().as_ref(), &[0x21, 0x05, 0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn test_parse_header_only() {
        // Two bytes is the smallest valid buffer; the checksum is byte 1.
        let packet = Packet::parse(&[0x30, 0x02]).unwrap();
        assert_eq!(packet.declared_length(), 0x02);
        assert_eq!(packet.checksum(), 0x02);
    }

    #[test]
    fn test_parse_too_short() {
        for data in [&[][..], &[0x10][..]] {
            match Packet::parse(data) {
                Err(Error::MalformedPacket { length, .. }) => assert_eq!(length, data.len()),
                other => panic!("expected MalformedPacket, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_parse_truncated_weight_reading() {
        let result = Packet::parse(&[0x10, 0x08, 0x15, 0x1C, 0x20]);
        assert!(matches!(
            result,
            Err(Error::MalformedPacket { length: 5, .. })
        ));
    }

    #[test]
    fn test_format_weight_reading() {
        let packet = Packet::parse(&[0x10, 0x08, 0x15, 0x1C, 0x20, 0x01, 0x00, 0x9c]).unwrap();
        assert_eq!(
            packet.to_string(),
            "0x10 WeightReading len=8 scale=kg weight=72.00kg state=final \
             payload=[10 08 15 1c 20 01 00 9c] checksum=0x9c"
        );
    }

    #[test]
    fn test_format_handshake() {
        let packet = Packet::parse(&[0x12, 0x05, 0x15, 0x00, 0x2a]).unwrap();
        assert_eq!(
            packet.to_string(),
            "0x12 Handshake1 len=5 payload=[12 05 15 00 2a] checksum=0x2a"
        );
    }

    proptest! {
        #[test]
        fn prop_weight_matches_formula(high: u8, low: u8, flag in 0u8..2) {
            let packet = Packet::parse(&weight_buffer(high, low, flag)).unwrap();
            let reading = packet.weight_reading().unwrap();
            let expected = ((high as u32) * 256 + low as u32) as f64 / 100.0;
            prop_assert!((reading.weight_kg - expected).abs() < 1e-9);
        }

        #[test]
        fn prop_parse_never_panics(data in proptest::collection::vec(any::<u8>(), 0..32)) {
            let _ = Packet::parse(&data);
        }
    }
}
