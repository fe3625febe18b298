// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # weighscale-rust-ble
//!
//! A cross-platform Rust library for reading body weight from QN-protocol
//! Bluetooth Low Energy scales (the cheap "FFE0" bathroom scales).
//!
//! The scale streams short notification packets. After a two-step handshake
//! it reports converging weights, then a final one; the host acknowledges the
//! final reading with a stop command.
//!
//! ## Features
//!
//! - **Packet decoding**: Typed view of every notification packet
//! - **Handshake**: Automatic acknowledgement of both handshake packets
//! - **Events**: Live updates while the weight settles, one final measurement
//! - **Inactivity timeout**: Sessions end when the scale goes quiet
//! - **Supervisor**: Connect, measure, tear down and reconnect in a loop
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use weighscale_rust_ble::{BtleplugConnector, Result, SessionSupervisor, SupervisorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connector = Arc::new(BtleplugConnector::new().await?);
//!     let config = SupervisorConfig::new("34:03:DE:08:C7:B9").with_run_once(true);
//!
//!     let supervisor = SessionSupervisor::new(connector, config);
//!     let outcome = supervisor
//!         .run(|session| {
//!             session.on_live_update(|kg| println!("  {:.2} kg", kg));
//!         })
//!         .await?;
//!
//!     if let Some(measurement) = outcome.measurement() {
//!         println!("Weight: {}", measurement);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data and config types

// Public modules
pub mod ble;
pub mod data;
pub mod error;
pub mod events;
pub mod protocol;
pub mod session;
pub mod supervisor;
pub mod utils;

// Re-exports for convenience
pub use error::{Error, Result};
pub use events::{EventKind, ListenerId, ScaleEvent};
pub use session::{ScaleSession, SessionState};
pub use supervisor::{SessionOutcome, SessionSupervisor, SupervisorConfig, SupervisorState};
pub use utils::{kilograms_to_pounds, pounds_to_kilograms};

// Re-export commonly used types from submodules
pub use ble::{
    BtleplugChannel, BtleplugConnector, GattProfile, MemoryChannel, NotificationStream,
    ScaleChannel, ScaleConnector, SubscriptionHandle,
};
pub use data::Measurement;
pub use protocol::{Packet, PacketBody, PacketType, ReadingState, ScaleType, WeightReading};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        let _ = std::any::TypeId::of::<SessionSupervisor>();
        let _ = std::any::TypeId::of::<ScaleSession>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<Packet>();
        let _ = std::any::TypeId::of::<ScaleEvent>();
        let _ = std::any::TypeId::of::<Measurement>();
        let _ = std::any::TypeId::of::<MemoryChannel>();
    }

    #[test]
    fn test_weight_conversion() {
        assert!((kilograms_to_pounds(100.0) - 220.462).abs() < 0.001);
        assert!((pounds_to_kilograms(220.462_262_18) - 100.0).abs() < 0.001);
    }
}
