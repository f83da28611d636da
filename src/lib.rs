#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # Aerobike 🚴
//!
//! A Rust library for monitoring and controlling FTMS indoor exercise bikes
//! via Bluetooth Low Energy.
//!
//! This library speaks the standardized Bluetooth Fitness Machine Service
//! (FTMS, service `0x1826`) that most modern smart trainers and indoor bikes
//! expose. It discovers a compatible bike, decodes the Indoor Bike Data
//! telemetry stream into structured metrics, derives the values budget
//! hardware does not report (total distance, running averages), and issues
//! resistance-control commands through the Fitness Machine Control Point.
//!
//! ## What the library handles for you
//!
//! - **Device discovery**: time-bounded scanning with early exit on the
//!   first compatible bike
//! - **Telemetry decoding**: the flag-driven Indoor Bike Data frame layout,
//!   including gracefully truncated frames from quirky firmware
//! - **Derived metrics**: speed-integrated distance and moving averages for
//!   bikes that omit those fields, with hardware values taking precedence
//!   whenever they are plausible
//! - **Resistance control**: the request-control / set-target-resistance
//!   exchange, including the write-mode fallback many bikes require
//! - **Acknowledgment decoding**: control point indications mapped to the
//!   FTMS result-code table
//!
//! ## Quick Start
//!
//! ```no_run
//! use aerobike::BikeDevice;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Scan for and connect to the first compatible bike
//!     let bike = BikeDevice::connect_first().await?;
//!
//!     // Set resistance level (1-80)
//!     bike.set_resistance_level(20).await?;
//!
//!     // Read the latest telemetry snapshot
//!     let metrics = bike.metrics().await;
//!     println!("{:.1} km/h @ {:.0} rpm", metrics.speed, metrics.cadence);
//!
//!     bike.disconnect().await?;
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy discovery and transport module
pub mod ble;
/// Main device control interface
pub mod device;
/// Error types and handling
pub mod error;
/// Derived metrics engine (history buffers, distance integration)
pub mod metrics;
/// FTMS wire codec: telemetry frames, control commands, acknowledgments
pub mod protocol;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use ble::{BikeConnection, BleManager, ControlPointWriter};
pub use device::BikeDevice;
pub use error::{BikeError, Result};
pub use metrics::MetricsEngine;
pub use protocol::{
    ControlCommand, ControlResponse, IndoorBikeData, MachineFeatures, ResultCode,
    MAX_RESISTANCE_LEVEL, MIN_RESISTANCE_LEVEL,
};
pub use types::{BikeMetrics, ConnectionParams, ConnectionState, ConnectionStatus, DeviceInfo};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fitness Machine Service UUID (Bluetooth SIG assigned number `0x1826`)
///
/// The standardized GATT service exposed by FTMS-compliant exercise
/// equipment. Used both as the scan filter and for service discovery after
/// connecting.
pub const FITNESS_MACHINE_SERVICE_UUID: &str = "00001826-0000-1000-8000-00805f9b34fb";

/// Indoor Bike Data characteristic UUID (`0x2AD2`, notify)
///
/// Streams telemetry frames: a 16-bit flags word followed by conditionally
/// present fields (speed, cadence, distance, resistance, power). See
/// [`protocol::parse_indoor_bike_data`] for the frame layout.
pub const INDOOR_BIKE_DATA_UUID: &str = "00002ad2-0000-1000-8000-00805f9b34fb";

/// Fitness Machine Control Point characteristic UUID (`0x2AD9`, write + indicate)
///
/// Accepts control commands (request control, set target resistance) and
/// delivers 3-byte acknowledgment frames back via indications.
pub const CONTROL_POINT_UUID: &str = "00002ad9-0000-1000-8000-00805f9b34fb";

/// Fitness Machine Feature characteristic UUID (`0x2ACC`, read)
///
/// Two little-endian 32-bit feature words describing what the machine
/// supports, decoded by [`protocol::MachineFeatures`].
pub const MACHINE_FEATURE_UUID: &str = "00002acc-0000-1000-8000-00805f9b34fb";

/// Advertised name of the bike model this library was developed against
///
/// Devices matching this name qualify during scanning even when their
/// advertisement omits the Fitness Machine Service UUID, which some
/// budget bikes do.
pub const TARGET_DEVICE_NAME: &str = "MG03";
