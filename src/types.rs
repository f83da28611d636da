use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration, time::SystemTime};

/// Connection lifecycle state of a bike device
///
/// Exactly one live instance exists per [`crate::BikeDevice`]; every state
/// transitions to `Disconnected` immediately when the adapter reports a
/// disconnect, regardless of what was in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No active connection
    Disconnected,
    /// GATT connection in progress
    Connecting,
    /// GATT connection established
    Connected,
    /// Enumerating the Fitness Machine Service and its characteristics
    DiscoveringServices,
    /// Subscribed to telemetry notifications and applying frames
    Monitoring,
}

impl ConnectionState {
    /// Whether this state represents a live connection
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(
            self,
            Self::Connected | Self::DiscoveringServices | Self::Monitoring
        )
    }

    /// Whether telemetry frames are currently applied to the metrics state
    #[must_use]
    pub const fn is_monitoring(self) -> bool {
        matches!(self, Self::Monitoring)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::DiscoveringServices => write!(f, "Discovering Services"),
            Self::Monitoring => write!(f, "Monitoring"),
        }
    }
}

/// Latest known telemetry snapshot for a bike
///
/// Fields are overwritten as new frames arrive. Fields absent from a given
/// frame either retain their previous value or are recomputed from history
/// by the [`crate::MetricsEngine`]; they are never left undefined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BikeMetrics {
    /// Instantaneous speed in km/h
    pub speed: f64,
    /// Average speed in km/h (hardware-reported or computed from history)
    pub average_speed: f64,
    /// Instantaneous cadence in rpm
    pub cadence: f64,
    /// Average cadence in rpm (hardware-reported or computed from history)
    pub average_cadence: f64,
    /// Total distance in meters (hardware-reported or speed-integrated)
    pub distance: f64,
    /// Instantaneous power in watts
    pub power: i16,
    /// Average power in watts
    pub average_power: i16,
    /// Current resistance level
    pub resistance: i16,
    /// When this snapshot was last updated
    pub timestamp: SystemTime,
}

impl Default for BikeMetrics {
    fn default() -> Self {
        Self {
            speed: 0.0,
            average_speed: 0.0,
            cadence: 0.0,
            average_cadence: 0.0,
            distance: 0.0,
            power: 0,
            average_power: 0,
            resistance: 0,
            timestamp: SystemTime::now(),
        }
    }
}

/// Connection status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Whether a GATT connection is currently established
    pub is_connected: bool,
    /// Advertised name of the connected device, if any
    pub device_name: Option<String>,
    /// Platform identifier of the connected device, if any
    pub device_id: Option<String>,
    /// Whether telemetry notifications are being applied
    pub is_monitoring: bool,
    /// When the last telemetry frame arrived, if any
    pub last_data_received: Option<SystemTime>,
}

/// Summary of a discovered bike
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Platform-specific peripheral identifier
    pub id: String,
    /// Advertised device name
    pub name: String,
    /// Signal strength (RSSI) at discovery time
    pub rssi: i16,
}

impl DeviceInfo {
    /// Create new device info
    #[must_use]
    pub const fn new(id: String, name: String, rssi: i16) -> Self {
        Self { id, name, rssi }
    }
}

/// Connection parameters
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// How long to scan for devices before giving up
    pub scan_timeout: Duration,
    /// Timeout for establishing the GATT connection
    pub connect_timeout: Duration,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}
