use async_trait::async_trait;
use btleplug::{
    api::{
        Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
        ScanFilter, ValueNotification, WriteType,
    },
    platform::{Adapter, Manager, Peripheral, PeripheralId},
};
use futures::stream::{Stream, StreamExt};
use std::{pin::Pin, time::Duration};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{BikeError, Result},
    protocol::MachineFeatures,
    types::{ConnectionParams, DeviceInfo},
    CONTROL_POINT_UUID, FITNESS_MACHINE_SERVICE_UUID, INDOOR_BIKE_DATA_UUID, MACHINE_FEATURE_UUID,
    TARGET_DEVICE_NAME,
};

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| BikeError::ParseError(format!("invalid UUID {value}: {e}")))
}

/// Whether an advertised name alone qualifies a peripheral as a target bike
///
/// Some budget bikes omit the Fitness Machine Service from their
/// advertisement, so the known model name and a generic "bike" substring
/// also qualify.
fn matches_target_name(name: &str) -> bool {
    name == TARGET_DEVICE_NAME || name.to_lowercase().contains("bike")
}

struct DiscoveredBike {
    peripheral: Peripheral,
    info: DeviceInfo,
}

/// BLE manager for bike discovery and connection establishment
///
/// Holds the peripherals found by the most recent scan; a new scan discards
/// the previous result set. Taking `&mut self` for [`scan_for_devices`]
/// guarantees at most one scan is outstanding per manager.
///
/// [`scan_for_devices`]: BleManager::scan_for_devices
pub struct BleManager {
    manager: Manager,
    discovered: Vec<DiscoveredBike>,
}

impl BleManager {
    /// Create a new BLE manager
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::Ble`] if the Bluetooth stack cannot be reached.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;

        Ok(Self {
            manager,
            discovered: Vec::new(),
        })
    }

    async fn central(&self) -> Result<Adapter> {
        let adapters = self.manager.adapters().await?;
        adapters
            .into_iter()
            .next()
            .ok_or(BikeError::AdapterNotReady)
    }

    /// Scan for compatible bikes
    ///
    /// Runs a single time-bounded scan filtered by the Fitness Machine
    /// Service. A peripheral qualifies when it advertises that service or
    /// its name matches the known target names; the scan ends immediately
    /// on the first qualifying match. Reaching the timeout is not an error:
    /// the result is whatever was found, possibly empty.
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::AdapterNotReady`] if no Bluetooth adapter is
    /// available, or [`BikeError::Ble`] for other Bluetooth errors.
    pub async fn scan_for_devices(&mut self, scan_timeout: Duration) -> Result<Vec<DeviceInfo>> {
        info!("Starting scan for fitness bikes...");
        self.discovered.clear();

        let central = self.central().await?;
        let service_uuid = parse_uuid(FITNESS_MACHINE_SERVICE_UUID)?;

        // Events must be subscribed before the scan starts so no
        // advertisement can slip between the two calls.
        let mut events = central.events().await?;
        central
            .start_scan(ScanFilter {
                services: vec![service_uuid],
            })
            .await?;

        let deadline = tokio::time::sleep(scan_timeout);
        tokio::pin!(deadline);

        // Timeout and first-match completion race; whichever fires first
        // ends the loop and the other path is dropped with it.
        loop {
            tokio::select! {
                () = &mut deadline => {
                    debug!("scan timeout elapsed");
                    break;
                }
                event = events.next() => {
                    match event {
                        Some(CentralEvent::DeviceDiscovered(id)) => {
                            let Ok(peripheral) = central.peripheral(&id).await else {
                                continue;
                            };
                            if let Some(info) = qualify(&peripheral, &service_uuid).await {
                                info!("Found compatible bike: {}", info.name);
                                self.discovered.push(DiscoveredBike { peripheral, info });
                                break;
                            }
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
        }

        central.stop_scan().await?;

        let devices: Vec<DeviceInfo> = self.discovered.iter().map(|d| d.info.clone()).collect();
        info!("Scan completed. Found {} compatible bike(s)", devices.len());
        Ok(devices)
    }

    /// Connect to a previously discovered bike
    ///
    /// Connects to the device with the given identifier, or to the first
    /// discovered device when `device_id` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::DeviceNotFound`] if the identifier does not
    /// match any discovered device (or nothing was discovered),
    /// [`BikeError::Timeout`] if the connection attempt times out, or
    /// [`BikeError::ConnectionFailed`] for transport-level failures.
    pub async fn connect(
        &mut self,
        device_id: Option<&str>,
        params: &ConnectionParams,
    ) -> Result<BikeConnection> {
        let entry = match device_id {
            Some(id) => self.discovered.iter().find(|d| d.info.id == id),
            None => self.discovered.first(),
        }
        .ok_or(BikeError::DeviceNotFound)?;

        let peripheral = entry.peripheral.clone();
        let info = entry.info.clone();
        let central = self.central().await?;

        info!("Connecting to: {}", info.name);

        let timeout_ms = u64::try_from(params.connect_timeout.as_millis()).unwrap_or(u64::MAX);
        timeout(params.connect_timeout, peripheral.connect())
            .await
            .map_err(|_| BikeError::Timeout { timeout_ms })?
            .map_err(|e| BikeError::ConnectionFailed(e.to_string()))?;

        info!("GATT connection established");

        Ok(BikeConnection {
            peripheral,
            central,
            info,
            data_char: None,
            control_char: None,
            feature_char: None,
        })
    }
}

async fn qualify(peripheral: &Peripheral, service_uuid: &Uuid) -> Option<DeviceInfo> {
    let properties = peripheral.properties().await.ok()??;
    let name = properties
        .local_name
        .clone()
        .unwrap_or_else(|| "Unknown".to_string());

    let advertises_service = properties.services.contains(service_uuid);
    if advertises_service || matches_target_name(&name) {
        Some(DeviceInfo::new(
            peripheral.address().to_string(),
            name,
            properties.rssi.unwrap_or(0),
        ))
    } else {
        debug!("ignoring non-matching device: {name}");
        None
    }
}

/// Active connection to a bike
///
/// Produced by [`BleManager::connect`]; characteristics are bound by
/// [`discover_ftms`](Self::discover_ftms) afterwards.
pub struct BikeConnection {
    peripheral: Peripheral,
    central: Adapter,
    info: DeviceInfo,
    data_char: Option<Characteristic>,
    control_char: Option<Characteristic>,
    feature_char: Option<Characteristic>,
}

impl BikeConnection {
    /// Discover the Fitness Machine Service and bind its characteristics
    ///
    /// A missing telemetry or control characteristic is logged but not
    /// fatal; the corresponding capability is simply unavailable.
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::ServiceNotFound`] when the device does not
    /// expose the Fitness Machine Service, or [`BikeError::Ble`] for
    /// discovery failures.
    pub async fn discover_ftms(&mut self) -> Result<()> {
        self.peripheral.discover_services().await?;

        let service_uuid = parse_uuid(FITNESS_MACHINE_SERVICE_UUID)?;
        let data_uuid = parse_uuid(INDOOR_BIKE_DATA_UUID)?;
        let control_uuid = parse_uuid(CONTROL_POINT_UUID)?;
        let feature_uuid = parse_uuid(MACHINE_FEATURE_UUID)?;

        let services = self.peripheral.services();
        let service = services
            .iter()
            .find(|s| s.uuid == service_uuid)
            .ok_or(BikeError::ServiceNotFound)?;

        info!("Fitness Machine Service discovered");
        for characteristic in &service.characteristics {
            debug!(
                "  characteristic {}: {:?}",
                characteristic.uuid, characteristic.properties
            );
        }

        self.data_char = service
            .characteristics
            .iter()
            .find(|c| c.uuid == data_uuid)
            .cloned();
        self.control_char = service
            .characteristics
            .iter()
            .find(|c| c.uuid == control_uuid)
            .cloned();
        self.feature_char = service
            .characteristics
            .iter()
            .find(|c| c.uuid == feature_uuid)
            .cloned();

        if self.data_char.is_none() {
            warn!("Indoor Bike Data characteristic not available; telemetry disabled");
        }
        if self.control_char.is_none() {
            warn!("Control Point characteristic not available; resistance control disabled");
        }

        Ok(())
    }

    /// Enable telemetry notifications
    ///
    /// Returns whether telemetry is now flowing; `false` means the device
    /// has no Indoor Bike Data characteristic.
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::Ble`] if the subscription fails.
    pub async fn subscribe_telemetry(&self) -> Result<bool> {
        let Some(data_char) = self.data_char.as_ref() else {
            return Ok(false);
        };

        self.peripheral.subscribe(data_char).await?;
        info!("Indoor Bike Data monitoring started");
        Ok(true)
    }

    /// Enable control point acknowledgment indications when supported
    ///
    /// Acknowledgments are purely observational, so a missing INDICATE
    /// property or a failed subscription is logged and swallowed rather
    /// than surfaced.
    pub async fn subscribe_control_indications(&self) -> bool {
        let Some(control_char) = self.control_char.as_ref() else {
            return false;
        };
        if !control_char.properties.contains(CharPropFlags::INDICATE) {
            debug!("control point does not support indications");
            return false;
        }

        match self.peripheral.subscribe(control_char).await {
            Ok(()) => {
                info!("Control Point response monitoring started");
                true
            }
            Err(e) => {
                warn!("Control Point subscription failed: {e}");
                false
            }
        }
    }

    /// Stream of value notifications from the peripheral
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::Ble`] if the stream cannot be established.
    pub async fn notifications(
        &self,
    ) -> Result<Pin<Box<dyn Stream<Item = ValueNotification> + Send>>> {
        Ok(self.peripheral.notifications().await?)
    }

    /// Read and decode the Fitness Machine Feature characteristic
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::CharacteristicUnavailable`] when the device has
    /// no feature characteristic, or [`BikeError::ParseError`] for a
    /// malformed value.
    pub async fn read_features(&self) -> Result<MachineFeatures> {
        let characteristic = self.feature_char.as_ref().ok_or_else(|| {
            BikeError::CharacteristicUnavailable("fitness machine feature".to_string())
        })?;

        let data = self.peripheral.read(characteristic).await?;
        MachineFeatures::from_bytes(&data)
    }

    /// Whether the device exposes the control point
    #[must_use]
    pub const fn has_control_point(&self) -> bool {
        self.control_char.is_some()
    }

    /// Whether the device exposes telemetry
    #[must_use]
    pub const fn has_telemetry(&self) -> bool {
        self.data_char.is_some()
    }

    /// Summary of the connected device
    #[must_use]
    pub const fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub(crate) fn peripheral_id(&self) -> PeripheralId {
        self.peripheral.id()
    }

    pub(crate) const fn central(&self) -> &Adapter {
        &self.central
    }

    /// Check if the device is still connected
    pub async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    /// Disconnect from the device
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::Ble`] if disconnection fails.
    pub async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

/// Write access to the Fitness Machine Control Point
///
/// The command sequence in [`crate::device`] depends only on this trait,
/// which keeps it testable against a double that records writes instead of
/// touching a radio.
#[async_trait]
pub trait ControlPointWriter: Send + Sync {
    /// Write a command payload to the control point using the given mode
    async fn write_command(&self, payload: &[u8], write_type: WriteType) -> Result<()>;
}

#[async_trait]
impl ControlPointWriter for BikeConnection {
    async fn write_command(&self, payload: &[u8], write_type: WriteType) -> Result<()> {
        let characteristic = self
            .control_char
            .as_ref()
            .ok_or_else(|| BikeError::CharacteristicUnavailable("control point".to_string()))?;

        debug!("Sending control command: {:02X?}", payload);
        self.peripheral
            .write(characteristic, payload, write_type)
            .await?;
        Ok(())
    }
}
