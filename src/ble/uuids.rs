//! BLE Service and Characteristic UUIDs.
//!
//! Contains the UUIDs used to talk to QN-protocol scales.

use uuid::Uuid;

// Scale Service (vendor-specific, 16-bit UUIDs on the Bluetooth base)
/// Scale service UUID.
pub const SCALE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_ffe0_0000_1000_8000_00805f9b34fb);
/// Notify characteristic UUID (notifications from the scale).
pub const SCALE_NOTIFY_UUID: Uuid = Uuid::from_u128(0x0000_ffe1_0000_1000_8000_00805f9b34fb);
/// Command characteristic UUID (write to the scale).
pub const SCALE_COMMAND_UUID: Uuid = Uuid::from_u128(0x0000_ffe3_0000_1000_8000_00805f9b34fb);

/// The service and characteristic pair used for one scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GattProfile {
    /// Service that owns both characteristics.
    pub service: Uuid,
    /// Characteristic the scale notifies on.
    pub notify: Uuid,
    /// Characteristic commands are written to.
    pub command: Uuid,
}

impl GattProfile {
    /// Create a profile from explicit UUIDs.
    pub const fn new(service: Uuid, notify: Uuid, command: Uuid) -> Self {
        Self {
            service,
            notify,
            command,
        }
    }

    /// Create a profile from 16-bit UUIDs on the Bluetooth base UUID.
    pub const fn from_short(service: u16, notify: u16, command: u16) -> Self {
        Self::new(
            short_uuid(service),
            short_uuid(notify),
            short_uuid(command),
        )
    }
}

impl Default for GattProfile {
    fn default() -> Self {
        Self::new(SCALE_SERVICE_UUID, SCALE_NOTIFY_UUID, SCALE_COMMAND_UUID)
    }
}

/// Expand a 16-bit UUID onto the Bluetooth base UUID.
pub const fn short_uuid(value: u16) -> Uuid {
    Uuid::from_u128(0x0000_0000_0000_1000_8000_00805f9b34fb | ((value as u128) << 96))
}
