//! Protocol module for parsing packets and deciding responses.
//!
//! This module contains the implementations for:
//! - Notification packet parsing and diagnostics formatting
//! - The handshake / measurement decision table

pub mod handshake;
pub mod packet;

pub use handshake::{decide, Action, HANDSHAKE_1_ACK, HANDSHAKE_2_ACK, STOP_MEASUREMENT};
pub use packet::{Packet, PacketBody, PacketType, ReadingState, ScaleType, WeightReading};
