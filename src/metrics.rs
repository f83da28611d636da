use crate::{protocol::IndoorBikeData, types::BikeMetrics};
use std::{
    collections::VecDeque,
    time::{Instant, SystemTime},
};
use tracing::{debug, info};

/// Number of samples kept for the computed speed/cadence averages
pub const HISTORY_CAPACITY: usize = 10;

/// Hardware distance values at or above this are treated as sensor garbage
pub const MAX_PLAUSIBLE_DISTANCE_M: u32 = 999_999;

/// Integration increments at or below this (meters) are discarded as noise
pub const MIN_DISTANCE_INCREMENT_M: f64 = 0.1;

/// Integration increments at or above this (meters) are discarded as clock anomalies
pub const MAX_DISTANCE_INCREMENT_M: f64 = 100.0;

/// Bounded FIFO sample buffer used for the computed running averages
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl HistoryBuffer {
    /// Create a buffer holding at most `capacity` samples
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest one when at capacity
    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Arithmetic mean of the buffered samples, `0.0` when empty
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let len = self.samples.len() as f64;
        self.samples.iter().sum::<f64>() / len
    }

    /// Number of buffered samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the buffer holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Speed-integrated distance estimate for bikes that do not report distance
///
/// The accumulator advances by `speed / 3.6 × elapsed` per telemetry frame
/// while integration is enabled, and is frozen permanently for the
/// connection once the hardware reports a plausible distance of its own.
#[derive(Debug, Clone)]
pub struct DistanceAccumulator {
    total_m: f64,
    last_update: Option<Instant>,
    enabled: bool,
}

impl Default for DistanceAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl DistanceAccumulator {
    /// Create an accumulator with integration enabled
    #[must_use]
    pub const fn new() -> Self {
        Self {
            total_m: 0.0,
            last_update: None,
            enabled: true,
        }
    }

    /// Integrate an instantaneous speed sample taken at `now`
    ///
    /// Does nothing once [`freeze`](Self::freeze) has been called. The
    /// increment is accepted only when it falls inside
    /// (`MIN_DISTANCE_INCREMENT_M`, `MAX_DISTANCE_INCREMENT_M`); values
    /// outside that band are discarded without touching the total. The
    /// last-update timestamp is refreshed on every enabled call either way.
    pub fn integrate(&mut self, speed_kmh: f64, now: Instant) {
        if !self.enabled {
            return;
        }

        if let Some(last) = self.last_update {
            if speed_kmh > 0.0 {
                let elapsed = now.duration_since(last).as_secs_f64();
                let increment = speed_kmh / 3.6 * elapsed;

                if increment > MIN_DISTANCE_INCREMENT_M && increment < MAX_DISTANCE_INCREMENT_M {
                    self.total_m += increment;
                    debug!(
                        "distance increment: +{:.2}m (total: {:.1}m)",
                        increment, self.total_m
                    );
                }
            }
        }

        self.last_update = Some(now);
    }

    /// Permanently disable integration for the rest of the connection
    pub fn freeze(&mut self) {
        self.enabled = false;
    }

    /// Adopt an authoritative total and disable integration
    ///
    /// Frames that omit the distance field afterwards keep reading the
    /// adopted total instead of dropping back to the integrated one.
    /// The carry-forward is deliberate: reverting to the stale integrated
    /// total would make the reported distance jump backwards, so do not
    /// "restore" drop-back behavior here.
    pub fn freeze_at(&mut self, total_m: f64) {
        self.total_m = total_m;
        self.enabled = false;
    }

    /// Whether integration is still active
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Accumulated distance in meters
    #[must_use]
    pub const fn total_m(&self) -> f64 {
        self.total_m
    }
}

/// Owns the authoritative metrics snapshot and everything derived from it
///
/// One engine instance exists per connection. Decoded telemetry frames are
/// applied in arrival order; the engine fills in the fields the hardware
/// omitted (averages from history, distance from integration) so the
/// snapshot is always fully populated.
#[derive(Debug)]
pub struct MetricsEngine {
    metrics: BikeMetrics,
    speed_history: HistoryBuffer,
    cadence_history: HistoryBuffer,
    distance: DistanceAccumulator,
}

impl Default for MetricsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsEngine {
    /// Create an engine with an empty snapshot and integration enabled
    #[must_use]
    pub fn new() -> Self {
        Self {
            metrics: BikeMetrics::default(),
            speed_history: HistoryBuffer::new(HISTORY_CAPACITY),
            cadence_history: HistoryBuffer::new(HISTORY_CAPACITY),
            distance: DistanceAccumulator::new(),
        }
    }

    /// Apply a decoded telemetry frame to the snapshot
    pub fn apply(&mut self, frame: &IndoorBikeData) {
        self.apply_at(frame, Instant::now(), SystemTime::now());
    }

    fn apply_at(&mut self, frame: &IndoorBikeData, now: Instant, wall: SystemTime) {
        self.metrics.timestamp = wall;

        // History is updated before the averages are computed so a frame's
        // own instantaneous sample participates in its average.
        if let Some(speed) = frame.speed {
            self.metrics.speed = speed;
            self.speed_history.push(speed);
            self.distance.integrate(speed, now);
        }

        // Hardware-supplied averages always win over computed ones.
        self.metrics.average_speed = frame
            .average_speed
            .unwrap_or_else(|| self.speed_history.mean());

        if let Some(cadence) = frame.cadence {
            self.metrics.cadence = cadence;
            self.cadence_history.push(cadence);
        }

        self.metrics.average_cadence = frame
            .average_cadence
            .unwrap_or_else(|| self.cadence_history.mean());

        match frame.distance {
            Some(hardware) if hardware > 0 && hardware < MAX_PLAUSIBLE_DISTANCE_M => {
                self.metrics.distance = f64::from(hardware);
                if self.distance.is_enabled() {
                    info!("using hardware distance ({hardware}m), disabling speed integration");
                }
                self.distance.freeze_at(f64::from(hardware));
            }
            _ => {
                self.metrics.distance = self.distance.total_m().round();
            }
        }

        if let Some(resistance) = frame.resistance {
            self.metrics.resistance = resistance;
        }

        if let Some(power) = frame.power {
            self.metrics.power = power;
        }

        if let Some(average_power) = frame.average_power {
            self.metrics.average_power = average_power;
        }
    }

    /// Borrow the current snapshot
    #[must_use]
    pub const fn metrics(&self) -> &BikeMetrics {
        &self.metrics
    }

    /// Clone the current snapshot
    #[must_use]
    pub fn snapshot(&self) -> BikeMetrics {
        self.metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn speed_frame(speed: f64) -> IndoorBikeData {
        IndoorBikeData {
            speed: Some(speed),
            ..IndoorBikeData::default()
        }
    }

    #[test]
    fn test_history_buffer_capacity() {
        let mut buffer = HistoryBuffer::new(HISTORY_CAPACITY);
        for i in 0..100 {
            buffer.push(f64::from(i));
            assert!(buffer.len() <= HISTORY_CAPACITY);
        }
        // The ten most recent samples survive: 90..=99
        assert_eq!(buffer.len(), HISTORY_CAPACITY);
        assert_eq!(buffer.mean(), 94.5);
    }

    #[test]
    fn test_history_buffer_mean() {
        let mut buffer = HistoryBuffer::new(HISTORY_CAPACITY);
        assert_eq!(buffer.mean(), 0.0);

        buffer.push(10.0);
        buffer.push(20.0);
        assert_eq!(buffer.mean(), 15.0);
    }

    #[test]
    fn test_accumulator_basic_integration() {
        let mut acc = DistanceAccumulator::new();
        let t0 = Instant::now();

        // First sample only establishes the timestamp.
        acc.integrate(36.0, t0);
        assert_eq!(acc.total_m(), 0.0);

        // 36 km/h = 10 m/s, 2 s elapsed -> 20 m
        acc.integrate(36.0, t0 + Duration::from_secs(2));
        assert!((acc.total_m() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_accumulator_rejects_out_of_band_increments() {
        let mut acc = DistanceAccumulator::new();
        let t0 = Instant::now();
        acc.integrate(36.0, t0);

        // 10 m/s * 0.005 s = 0.05 m, below the noise floor
        acc.integrate(36.0, t0 + Duration::from_millis(5));
        assert_eq!(acc.total_m(), 0.0);

        // 10 m/s * 60 s = 600 m, above the anomaly ceiling
        acc.integrate(36.0, t0 + Duration::from_millis(5) + Duration::from_secs(60));
        assert_eq!(acc.total_m(), 0.0);
    }

    #[test]
    fn test_accumulator_ignores_zero_speed() {
        let mut acc = DistanceAccumulator::new();
        let t0 = Instant::now();
        acc.integrate(36.0, t0);
        acc.integrate(0.0, t0 + Duration::from_secs(2));
        assert_eq!(acc.total_m(), 0.0);
    }

    #[test]
    fn test_accumulator_freeze() {
        let mut acc = DistanceAccumulator::new();
        let t0 = Instant::now();
        acc.integrate(36.0, t0);
        acc.freeze();
        acc.integrate(36.0, t0 + Duration::from_secs(2));
        assert_eq!(acc.total_m(), 0.0);
        assert!(!acc.is_enabled());
    }

    #[test]
    fn test_computed_average_speed() {
        let mut engine = MetricsEngine::new();
        let t0 = Instant::now();
        let wall = SystemTime::now();

        engine.apply_at(&speed_frame(10.0), t0, wall);
        engine.apply_at(&speed_frame(20.0), t0 + Duration::from_secs(1), wall);

        assert_eq!(engine.metrics().speed, 20.0);
        assert_eq!(engine.metrics().average_speed, 15.0);
    }

    #[test]
    fn test_hardware_average_takes_precedence() {
        let mut engine = MetricsEngine::new();
        let frame = IndoorBikeData {
            speed: Some(10.0),
            average_speed: Some(42.0),
            ..IndoorBikeData::default()
        };
        engine.apply_at(&frame, Instant::now(), SystemTime::now());
        assert_eq!(engine.metrics().average_speed, 42.0);
    }

    #[test]
    fn test_computed_average_cadence() {
        let mut engine = MetricsEngine::new();
        let t0 = Instant::now();
        let wall = SystemTime::now();

        let frame = IndoorBikeData {
            cadence: Some(60.0),
            ..IndoorBikeData::default()
        };
        engine.apply_at(&frame, t0, wall);
        let frame = IndoorBikeData {
            cadence: Some(80.0),
            ..IndoorBikeData::default()
        };
        engine.apply_at(&frame, t0 + Duration::from_secs(1), wall);

        assert_eq!(engine.metrics().average_cadence, 70.0);
    }

    #[test]
    fn test_integrated_distance_in_snapshot() {
        let mut engine = MetricsEngine::new();
        let t0 = Instant::now();
        let wall = SystemTime::now();

        engine.apply_at(&speed_frame(36.0), t0, wall);
        engine.apply_at(&speed_frame(36.0), t0 + Duration::from_secs(2), wall);

        assert_eq!(engine.metrics().distance, 20.0);
    }

    #[test]
    fn test_plausible_hardware_distance_freezes_integration() {
        let mut engine = MetricsEngine::new();
        let t0 = Instant::now();
        let wall = SystemTime::now();

        let frame = IndoorBikeData {
            speed: Some(36.0),
            distance: Some(500),
            ..IndoorBikeData::default()
        };
        engine.apply_at(&frame, t0, wall);
        assert_eq!(engine.metrics().distance, 500.0);
        assert!(!engine.distance.is_enabled());

        // Integration stays off when later frames omit the field, and the
        // adopted hardware total carries forward.
        engine.apply_at(&speed_frame(36.0), t0 + Duration::from_secs(2), wall);
        assert_eq!(engine.metrics().distance, 500.0);
        assert!(!engine.distance.is_enabled());
    }

    #[test]
    fn test_implausible_hardware_distance_is_ignored() {
        let mut engine = MetricsEngine::new();
        let t0 = Instant::now();
        let wall = SystemTime::now();

        engine.apply_at(&speed_frame(36.0), t0, wall);

        let frame = IndoorBikeData {
            speed: Some(36.0),
            distance: Some(MAX_PLAUSIBLE_DISTANCE_M),
            ..IndoorBikeData::default()
        };
        engine.apply_at(&frame, t0 + Duration::from_secs(2), wall);

        // Accumulator value (20 m) wins over the garbage hardware field,
        // and integration remains enabled.
        assert_eq!(engine.metrics().distance, 20.0);
        assert!(engine.distance.is_enabled());
    }

    #[test]
    fn test_zero_hardware_distance_is_ignored() {
        let mut engine = MetricsEngine::new();
        let frame = IndoorBikeData {
            distance: Some(0),
            ..IndoorBikeData::default()
        };
        engine.apply_at(&frame, Instant::now(), SystemTime::now());
        assert!(engine.distance.is_enabled());
        assert_eq!(engine.metrics().distance, 0.0);
    }

    #[test]
    fn test_absent_fields_retain_previous_values() {
        let mut engine = MetricsEngine::new();
        let frame = IndoorBikeData {
            speed: Some(25.0),
            resistance: Some(12),
            power: Some(180),
            ..IndoorBikeData::default()
        };
        engine.apply_at(&frame, Instant::now(), SystemTime::now());

        engine.apply_at(&speed_frame(26.0), Instant::now(), SystemTime::now());
        assert_eq!(engine.metrics().resistance, 12);
        assert_eq!(engine.metrics().power, 180);
        assert_eq!(engine.metrics().speed, 26.0);
    }
}
