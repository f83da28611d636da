use thiserror::Error;

/// Errors that can occur when working with FTMS indoor bikes
#[derive(Error, Debug)]
pub enum BikeError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// No Bluetooth adapter is available or powered on
    #[error("Bluetooth adapter not ready")]
    AdapterNotReady,

    /// No compatible bike found during scanning
    #[error("Fitness bike not found")]
    DeviceNotFound,

    /// Device connection failed
    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    /// Device disconnected unexpectedly
    #[error("Device disconnected")]
    Disconnected,

    /// Connected device does not expose the Fitness Machine Service
    #[error("Fitness Machine Service not found on device")]
    ServiceNotFound,

    /// A required GATT characteristic is missing on the device
    #[error("Characteristic unavailable: {0}")]
    CharacteristicUnavailable(String),

    /// Invalid command parameters
    #[error("Invalid command parameters: {0}")]
    InvalidParameters(String),

    /// Both write modes failed when sending a control command
    #[error("Control point write failed: {0}")]
    WriteFailure(String),

    /// Frame or response parsing failed
    #[error("Failed to parse frame: {0}")]
    ParseError(String),

    /// Operation timed out
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },
}

/// Result type for bike operations
pub type Result<T> = std::result::Result<T, BikeError>;

impl BikeError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_)
                | Self::AdapterNotReady
                | Self::ConnectionFailed(_)
                | Self::Disconnected
                | Self::DeviceNotFound
        )
    }

    /// Check if this error is recoverable by retrying the operation
    ///
    /// `InvalidParameters` is excluded: retrying the identical rejected
    /// input can never succeed, the caller has to change it.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::WriteFailure(_))
    }

    /// Check if this error indicates a protocol mismatch on the peripheral
    #[must_use]
    pub const fn is_protocol_mismatch(&self) -> bool {
        matches!(self, Self::ServiceNotFound | Self::CharacteristicUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let connection_error = BikeError::ConnectionFailed("test".to_string());
        assert!(connection_error.is_connection_error());
        assert!(!connection_error.is_recoverable());
        assert!(!connection_error.is_protocol_mismatch());

        let timeout_error = BikeError::Timeout { timeout_ms: 5000 };
        assert!(!timeout_error.is_connection_error());
        assert!(timeout_error.is_recoverable());

        // A rejected parameter stays rejected on retry.
        let parameter_error = BikeError::InvalidParameters("level 81".to_string());
        assert!(!parameter_error.is_recoverable());
        assert!(!parameter_error.is_connection_error());

        let service_error = BikeError::ServiceNotFound;
        assert!(!service_error.is_connection_error());
        assert!(!service_error.is_recoverable());
        assert!(service_error.is_protocol_mismatch());
    }

    #[test]
    fn test_error_display() {
        let error = BikeError::InvalidParameters("resistance out of range".to_string());
        let error_string = format!("{error}");
        assert!(error_string.contains("Invalid command parameters"));
        assert!(error_string.contains("resistance out of range"));
    }

    #[test]
    fn test_characteristic_unavailable_display() {
        let error = BikeError::CharacteristicUnavailable("control point".to_string());
        assert!(format!("{error}").contains("control point"));
    }
}
