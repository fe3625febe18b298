//! Error types for the weighscale-rust-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// No scale with the requested address showed up while scanning.
    #[error("Scale not found: {address}")]
    DeviceNotFound {
        /// The hardware address that was searched for.
        address: String,
    },

    /// Failed to establish a connection to the scale.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// Writing to the command characteristic failed.
    #[error("Command write failed: {reason}")]
    WriteFailed {
        /// Description of why the write failed.
        reason: String,
    },

    /// A notification buffer was too short to be decoded.
    #[error("Malformed packet ({length} bytes): {reason}")]
    MalformedPacket {
        /// Length of the offending buffer.
        length: usize,
        /// What was missing.
        reason: String,
    },

    /// The session has already ended and cannot be restarted.
    #[error("Session already ended")]
    SessionEnded,

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error came from acquiring a connection to the scale.
    ///
    /// These are the failures the supervisor absorbs with its retry delay.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            Self::Bluetooth(_)
                | Self::BluetoothUnavailable
                | Self::DeviceNotFound { .. }
                | Self::ConnectionFailed { .. }
                | Self::CharacteristicNotFound { .. }
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::MalformedPacket {
            length: 1,
            reason: "missing header".to_string(),
        };
        assert_eq!(err.to_string(), "Malformed packet (1 bytes): missing header");

        let err = Error::DeviceNotFound {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
        };
        assert_eq!(err.to_string(), "Scale not found: AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_is_connect_failure() {
        assert!(Error::BluetoothUnavailable.is_connect_failure());
        assert!(Error::ConnectionFailed {
            reason: "timeout".to_string()
        }
        .is_connect_failure());
        assert!(!Error::SessionEnded.is_connect_failure());
        assert!(!Error::WriteFailed {
            reason: "gatt".to_string()
        }
        .is_connect_failure());
    }
}
