//! BLE communication module.
//!
//! This module provides the transport seam used by scale sessions, a btleplug
//! implementation of it, and an in-memory implementation for replays.

pub mod memory;
pub mod peripheral;
pub mod transport;
pub mod uuids;

pub use memory::MemoryChannel;
pub use peripheral::{BtleplugChannel, BtleplugConnector};
pub use transport::{NotificationStream, ScaleChannel, ScaleConnector, SubscriptionHandle};
pub use uuids::*;
