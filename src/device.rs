use crate::{
    ble::{parse_uuid, BikeConnection, BleManager, ControlPointWriter},
    error::{BikeError, Result},
    metrics::MetricsEngine,
    protocol::{
        parse_control_response, parse_indoor_bike_data, ControlCommand, ControlResponse,
        MachineFeatures,
    },
    types::{BikeMetrics, ConnectionParams, ConnectionState, ConnectionStatus, DeviceInfo},
    CONTROL_POINT_UUID, INDOOR_BIKE_DATA_UUID,
};
use btleplug::{
    api::{Central, CentralEvent, ValueNotification, WriteType},
    platform::{Adapter, PeripheralId},
};
use futures::stream::{Stream, StreamExt};
use std::{
    pin::Pin,
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, info, warn};

/// Fixed delay between request-control and the actual command
///
/// This gives the bike's firmware time to process the control grant. It is
/// a settle delay, not an acknowledgment wait: the grant is never confirmed
/// before the command is sent.
pub const CONTROL_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Main interface for an FTMS indoor bike
///
/// `BikeDevice` owns one connection (the library assumes a single device),
/// the metrics state derived from its telemetry stream, and the control
/// point command sequence. Telemetry frames are applied by a background
/// task as they arrive; callers read point-in-time snapshots via
/// [`metrics`](Self::metrics) and [`status`](Self::status).
///
/// # Examples
///
/// ```no_run
/// use aerobike::BikeDevice;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let bike = BikeDevice::connect_first().await?;
///     println!("Connected to: {}", bike.device_info().name);
///
///     bike.set_resistance_level(20).await?;
///
///     let metrics = bike.metrics().await;
///     println!("{:.1} km/h, {:.0} W", metrics.speed, metrics.power);
///
///     bike.disconnect().await?;
///     Ok(())
/// }
/// ```
pub struct BikeDevice {
    connection: Arc<Mutex<Option<BikeConnection>>>,
    device_info: DeviceInfo,
    state: Arc<RwLock<ConnectionState>>,
    engine: Arc<RwLock<MetricsEngine>>,
    control_responses: Arc<RwLock<Vec<ControlResponse>>>,
    last_data: Arc<RwLock<Option<SystemTime>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BikeDevice {
    /// Scan for and connect to the first compatible bike with default settings
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::DeviceNotFound`] if the scan finishes without a
    /// compatible bike, or any connection/discovery error from the
    /// underlying connection process.
    pub async fn connect_first() -> Result<Self> {
        Self::connect_first_with_params(ConnectionParams::default()).await
    }

    /// Scan for and connect to the first compatible bike with custom parameters
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::DeviceNotFound`] if the scan finishes without a
    /// compatible bike, or any connection/discovery error from the
    /// underlying connection process.
    pub async fn connect_first_with_params(params: ConnectionParams) -> Result<Self> {
        let mut manager = BleManager::new().await?;
        let devices = manager.scan_for_devices(params.scan_timeout).await?;

        if devices.is_empty() {
            return Err(BikeError::DeviceNotFound);
        }

        Self::connect_to_device(&mut manager, None, &params).await
    }

    /// Connect to a bike discovered by a previous scan on `manager`
    ///
    /// Connects to the device with the given identifier, or the first
    /// discovered device when `device_id` is `None`. On success the device
    /// is already subscribed to telemetry (when the bike supports it) and
    /// background monitoring is running.
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::DeviceNotFound`] if no matching device was
    /// discovered, [`BikeError::ServiceNotFound`] if the device lacks the
    /// Fitness Machine Service, or transport errors from connection and
    /// subscription. Any failure after the GATT connection unwinds back to
    /// the disconnected state.
    pub async fn connect_to_device(
        manager: &mut BleManager,
        device_id: Option<&str>,
        params: &ConnectionParams,
    ) -> Result<Self> {
        let state = Arc::new(RwLock::new(ConnectionState::Connecting));

        let mut connection = manager.connect(device_id, params).await?;
        *state.write().await = ConnectionState::Connected;

        *state.write().await = ConnectionState::DiscoveringServices;
        if let Err(e) = connection.discover_ftms().await {
            teardown(&connection, &state).await;
            return Err(e);
        }

        let monitoring = match connection.subscribe_telemetry().await {
            Ok(monitoring) => monitoring,
            Err(e) => {
                teardown(&connection, &state).await;
                return Err(e);
            }
        };

        connection.subscribe_control_indications().await;

        let notifications = match connection.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                teardown(&connection, &state).await;
                return Err(e);
            }
        };

        let device_info = connection.info().clone();
        let central = connection.central().clone();
        let peripheral_id = connection.peripheral_id();

        *state.write().await = if monitoring {
            ConnectionState::Monitoring
        } else {
            ConnectionState::Connected
        };

        let engine = Arc::new(RwLock::new(MetricsEngine::new()));
        let control_responses = Arc::new(RwLock::new(Vec::new()));
        let last_data = Arc::new(RwLock::new(None));

        let device = Self {
            connection: Arc::new(Mutex::new(Some(connection))),
            device_info,
            state: Arc::clone(&state),
            engine: Arc::clone(&engine),
            control_responses: Arc::clone(&control_responses),
            last_data: Arc::clone(&last_data),
            tasks: Mutex::new(Vec::new()),
        };

        let notification_task = tokio::spawn(run_notification_loop(
            notifications,
            Arc::clone(&state),
            engine,
            control_responses,
            last_data,
        ));
        let watch_task = tokio::spawn(run_disconnect_watch(central, peripheral_id, state));

        {
            let mut tasks = device.tasks.lock().await;
            tasks.push(notification_task);
            tasks.push(watch_task);
        }

        Ok(device)
    }

    /// Get device information
    #[must_use]
    pub const fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    /// Latest telemetry snapshot
    pub async fn metrics(&self) -> BikeMetrics {
        self.engine.read().await.snapshot()
    }

    /// Current connection status snapshot
    ///
    /// The device name and identifier stay populated after a disconnect;
    /// only the connection flags change.
    pub async fn status(&self) -> ConnectionStatus {
        let state = *self.state.read().await;
        ConnectionStatus {
            is_connected: state.is_connected(),
            device_name: Some(self.device_info.name.clone()),
            device_id: Some(self.device_info.id.clone()),
            is_monitoring: state.is_monitoring(),
            last_data_received: *self.last_data.read().await,
        }
    }

    /// Current lifecycle state
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Check if the device is connected
    pub async fn is_connected(&self) -> bool {
        self.state.read().await.is_connected()
    }

    /// Control point acknowledgments received so far, in arrival order
    pub async fn control_responses(&self) -> Vec<ControlResponse> {
        self.control_responses.read().await.clone()
    }

    /// Set the target resistance level
    ///
    /// Runs the full command sequence: validate the level, request control
    /// (failures here are logged and swallowed, since many bikes accept
    /// resistance commands without an explicit grant), wait the settle
    /// delay, then write the set-target-resistance command. The write is
    /// attempted without response first and retried once with response.
    ///
    /// The bike's acknowledgment arrives asynchronously and is exposed via
    /// [`control_responses`](Self::control_responses); it does not gate
    /// this method's completion.
    ///
    /// # Arguments
    ///
    /// * `level` - Target resistance level, `1..=80`
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::InvalidParameters`] for an out-of-range level
    /// (nothing is written in that case), [`BikeError::Disconnected`] when
    /// no connection is active, [`BikeError::CharacteristicUnavailable`]
    /// when the bike has no control point, or [`BikeError::WriteFailure`]
    /// when both write modes fail.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use aerobike::BikeDevice;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let bike = BikeDevice::connect_first().await?;
    /// bike.set_resistance_level(20).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn set_resistance_level(&self, level: u8) -> Result<()> {
        info!("Setting resistance level: {level}");

        // Holding the connection lock for the whole sequence serializes
        // concurrent control commands.
        let connection = self.connection.lock().await;
        let connection = connection.as_ref().ok_or(BikeError::Disconnected)?;
        if !connection.has_control_point() {
            return Err(BikeError::CharacteristicUnavailable(
                "control point".to_string(),
            ));
        }

        send_resistance_level(connection, level).await
    }

    /// Read and decode the bike's feature flags
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::Disconnected`] when no connection is active, or
    /// the read/parse errors from the feature characteristic.
    pub async fn read_features(&self) -> Result<MachineFeatures> {
        let connection = self.connection.lock().await;
        let connection = connection.as_ref().ok_or(BikeError::Disconnected)?;
        connection.read_features().await
    }

    /// Disconnect from the device and stop monitoring
    ///
    /// Idempotent: calling this on an already-disconnected device is a
    /// no-op. The status afterwards always reports
    /// `is_connected = false, is_monitoring = false`, even when the
    /// transport-level disconnect fails.
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::Ble`] if the transport-level disconnect fails.
    pub async fn disconnect(&self) -> Result<()> {
        info!("Disconnecting from device");

        // Flip the state first so no further telemetry is applied even if
        // the transport disconnect fails below.
        *self.state.write().await = ConnectionState::Disconnected;

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }

        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            connection.disconnect().await?;
        }

        Ok(())
    }
}

async fn teardown(connection: &BikeConnection, state: &Arc<RwLock<ConnectionState>>) {
    *state.write().await = ConnectionState::Disconnected;
    if let Err(e) = connection.disconnect().await {
        debug!("cleanup disconnect failed: {e}");
    }
}

/// Validate and run the resistance command sequence against a control point
async fn send_resistance_level(writer: &dyn ControlPointWriter, level: u8) -> Result<()> {
    let command = ControlCommand::set_target_resistance(level)?;
    send_resistance_sequence(writer, &command).await
}

async fn send_resistance_sequence(
    writer: &dyn ControlPointWriter,
    command: &ControlCommand,
) -> Result<()> {
    let request = ControlCommand::request_control();
    if let Err(e) = writer
        .write_command(&request.to_bytes(), WriteType::WithoutResponse)
        .await
    {
        warn!("Request control failed: {e}; attempting command anyway");
    }

    sleep(CONTROL_SETTLE_DELAY).await;

    let payload = command.to_bytes();
    debug!("Sending resistance command: {:02X?}", &payload[..]);

    match writer
        .write_command(&payload, WriteType::WithoutResponse)
        .await
    {
        Ok(()) => Ok(()),
        Err(first) => {
            warn!("Write without response failed, retrying with response: {first}");
            writer
                .write_command(&payload, WriteType::WithResponse)
                .await
                .map_err(|second| {
                    BikeError::WriteFailure(format!(
                        "write without response failed: {first}; write with response failed: {second}"
                    ))
                })
        }
    }
}

async fn run_notification_loop(
    mut notifications: Pin<Box<dyn Stream<Item = ValueNotification> + Send>>,
    state: Arc<RwLock<ConnectionState>>,
    engine: Arc<RwLock<MetricsEngine>>,
    control_responses: Arc<RwLock<Vec<ControlResponse>>>,
    last_data: Arc<RwLock<Option<SystemTime>>>,
) {
    let Ok(data_uuid) = parse_uuid(INDOOR_BIKE_DATA_UUID) else {
        return;
    };
    let Ok(control_uuid) = parse_uuid(CONTROL_POINT_UUID) else {
        return;
    };

    while let Some(notification) = notifications.next().await {
        if notification.uuid == data_uuid {
            if !state.read().await.is_monitoring() {
                continue;
            }
            match parse_indoor_bike_data(&notification.value) {
                Ok(frame) => {
                    engine.write().await.apply(&frame);
                    *last_data.write().await = Some(SystemTime::now());
                }
                Err(e) => warn!("dropping malformed telemetry frame: {e}"),
            }
        } else if notification.uuid == control_uuid {
            match parse_control_response(&notification.value) {
                Ok(response) => {
                    info!(
                        "Control Point response: {} (request opcode {:#04X})",
                        response.result, response.request_opcode
                    );
                    control_responses.write().await.push(response);
                }
                Err(e) => warn!("dropping malformed control response: {e}"),
            }
        }
    }

    // The notification stream only ends when the peripheral is gone.
    let mut state = state.write().await;
    if *state != ConnectionState::Disconnected {
        warn!("notification stream ended; marking device disconnected");
        *state = ConnectionState::Disconnected;
    }
}

async fn run_disconnect_watch(
    central: Adapter,
    peripheral_id: PeripheralId,
    state: Arc<RwLock<ConnectionState>>,
) {
    let Ok(mut events) = central.events().await else {
        return;
    };

    while let Some(event) = events.next().await {
        if let CentralEvent::DeviceDisconnected(disconnected) = event {
            if disconnected == peripheral_id {
                warn!("Device disconnected");
                *state.write().await = ConnectionState::Disconnected;
                break;
            }
        }
    }
}
