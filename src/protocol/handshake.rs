//! Handshake and measurement decision table.
//!
//! The scale sends two handshake packets that must each be acknowledged with a
//! fixed byte sequence before it streams weight readings. The first final
//! reading is answered with a stop command, which ends the measurement cycle on
//! the device.

use crate::events::ScaleEvent;
use crate::protocol::packet::{Packet, PacketBody, ReadingState};

/// Acknowledgement for handshake packet `0x12`.
pub const HANDSHAKE_1_ACK: [u8; 9] = [0x13, 0x09, 0x15, 0x01, 0x10, 0x00, 0x00, 0x00, 0x42];

/// Acknowledgement for handshake packet `0x14`.
pub const HANDSHAKE_2_ACK: [u8; 8] = [0x20, 0x08, 0x15, 0x09, 0x0b, 0xac, 0x29, 0x26];

/// Stop command sent after the first final reading.
pub const STOP_MEASUREMENT: [u8; 5] = [0x1f, 0x05, 0x15, 0x10, 0x49];

/// What to do in response to a packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Write these bytes to the command characteristic.
    SendBytes(&'static [u8]),
    /// Raise an application event.
    RaiseEvent(ScaleEvent),
    /// Write the bytes, then raise the event.
    SendAndRaise(&'static [u8], ScaleEvent),
    /// Nothing to do. The packet still counts as activity.
    NoOp,
}

impl Action {
    /// Command bytes to write, if any.
    pub fn command(&self) -> Option<&'static [u8]> {
        match self {
            Self::SendBytes(bytes) | Self::SendAndRaise(bytes, _) => Some(*bytes),
            _ => None,
        }
    }

    /// Event to raise, if any.
    pub fn event(&self) -> Option<&ScaleEvent> {
        match self {
            Self::RaiseEvent(event) | Self::SendAndRaise(_, event) => Some(event),
            _ => None,
        }
    }
}

/// Decide how to react to a packet.
pub fn decide(packet: &Packet) -> Action {
    match packet.body() {
        PacketBody::Handshake1 => Action::SendBytes(&HANDSHAKE_1_ACK),
        PacketBody::Handshake2 => Action::SendBytes(&HANDSHAKE_2_ACK),
        PacketBody::WeightReading(reading) => match reading.state {
            ReadingState::Converging => {
                Action::RaiseEvent(ScaleEvent::LiveUpdate(reading.weight_kg))
            }
            ReadingState::Final => Action::SendAndRaise(
                &STOP_MEASUREMENT,
                ScaleEvent::Measurement(reading.weight_kg),
            ),
            ReadingState::Unknown(_) => Action::NoOp,
        },
        PacketBody::Unknown => Action::NoOp,
    }
}
