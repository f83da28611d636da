use crate::error::{BikeError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum resistance level accepted by [`ControlCommand::set_target_resistance`]
pub const MIN_RESISTANCE_LEVEL: u8 = 1;

/// Maximum resistance level accepted by [`ControlCommand::set_target_resistance`]
pub const MAX_RESISTANCE_LEVEL: u8 = 80;

/// Flags word bit: average speed field present
pub const FLAG_AVERAGE_SPEED: u16 = 1 << 1;
/// Flags word bit: instantaneous cadence field present
pub const FLAG_INSTANTANEOUS_CADENCE: u16 = 1 << 2;
/// Flags word bit: average cadence field present
pub const FLAG_AVERAGE_CADENCE: u16 = 1 << 3;
/// Flags word bit: total distance field present
pub const FLAG_TOTAL_DISTANCE: u16 = 1 << 4;
/// Flags word bit: resistance level field present
pub const FLAG_RESISTANCE_LEVEL: u16 = 1 << 5;
/// Flags word bit: instantaneous power field present
pub const FLAG_INSTANTANEOUS_POWER: u16 = 1 << 6;
/// Flags word bit: average power field present
pub const FLAG_AVERAGE_POWER: u16 = 1 << 7;

/// Control point opcodes used by this library
///
/// The FTMS control point defines many more opcodes (target power, indoor
/// bike simulation, start/resume); resistance control only needs these two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpCode {
    /// Request control of the fitness machine (no payload)
    RequestControl = 0x00,
    /// Set target resistance level (payload: little-endian u16 level)
    SetTargetResistance = 0x04,
}

/// A decoded Indoor Bike Data telemetry frame
///
/// Each field is `Some` only when its flag bit was set *and* enough bytes
/// remained in the frame. The engine applies present fields to the shared
/// metrics snapshot and derives the rest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndoorBikeData {
    /// Instantaneous speed in km/h
    pub speed: Option<f64>,
    /// Average speed in km/h
    pub average_speed: Option<f64>,
    /// Instantaneous cadence in rpm
    pub cadence: Option<f64>,
    /// Average cadence in rpm
    pub average_cadence: Option<f64>,
    /// Total distance in meters
    pub distance: Option<u32>,
    /// Resistance level
    pub resistance: Option<i16>,
    /// Instantaneous power in watts
    pub power: Option<i16>,
    /// Average power in watts
    pub average_power: Option<i16>,
}

/// Parse an Indoor Bike Data frame (characteristic `0x2AD2`)
///
/// Frame layout: a 16-bit little-endian flags word, then fields in fixed
/// order, each present only when its flag bit is set:
///
/// - Instantaneous speed (always present, u16 × 0.01 km/h)
/// - Average speed (bit 1, u16 × 0.01 km/h)
/// - Instantaneous cadence (bit 2, u16 × 0.5 rpm)
/// - Average cadence (bit 3, u16 × 0.5 rpm)
/// - Total distance (bit 4, u24 little-endian, meters)
/// - Resistance level (bit 5, i16)
/// - Instantaneous power (bit 6, i16, watts)
/// - Average power (bit 7, i16, watts)
///
/// Fields whose bytes are missing are silently dropped rather than treated
/// as an error; real bikes routinely send frames shorter than their flags
/// claim.
///
/// # Errors
///
/// Returns [`BikeError::ParseError`] only when the frame is too short to
/// contain the flags word.
pub fn parse_indoor_bike_data(data: &[u8]) -> Result<IndoorBikeData> {
    if data.len() < 2 {
        return Err(BikeError::ParseError(format!(
            "frame too short for flags word: {} bytes",
            data.len()
        )));
    }

    let mut buf = data;
    let flags = buf.get_u16_le();
    let mut frame = IndoorBikeData::default();

    if buf.remaining() >= 2 {
        frame.speed = Some(f64::from(buf.get_u16_le()) * 0.01);
    }

    if flags & FLAG_AVERAGE_SPEED != 0 && buf.remaining() >= 2 {
        frame.average_speed = Some(f64::from(buf.get_u16_le()) * 0.01);
    }

    if flags & FLAG_INSTANTANEOUS_CADENCE != 0 && buf.remaining() >= 2 {
        frame.cadence = Some(f64::from(buf.get_u16_le()) * 0.5);
    }

    if flags & FLAG_AVERAGE_CADENCE != 0 && buf.remaining() >= 2 {
        frame.average_cadence = Some(f64::from(buf.get_u16_le()) * 0.5);
    }

    if flags & FLAG_TOTAL_DISTANCE != 0 && buf.remaining() >= 3 {
        let lo = u32::from(buf.get_u8());
        let mid = u32::from(buf.get_u8());
        let hi = u32::from(buf.get_u8());
        frame.distance = Some(lo | (mid << 8) | (hi << 16));
    }

    if flags & FLAG_RESISTANCE_LEVEL != 0 && buf.remaining() >= 2 {
        frame.resistance = Some(buf.get_i16_le());
    }

    if flags & FLAG_INSTANTANEOUS_POWER != 0 && buf.remaining() >= 2 {
        frame.power = Some(buf.get_i16_le());
    }

    if flags & FLAG_AVERAGE_POWER != 0 && buf.remaining() >= 2 {
        frame.average_power = Some(buf.get_i16_le());
    }

    Ok(frame)
}

/// A control point command: opcode plus payload bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCommand {
    /// Command opcode
    pub opcode: OpCode,
    /// Payload bytes following the opcode
    pub payload: Vec<u8>,
}

impl ControlCommand {
    /// Create a request-control command (opcode `0x00`, no payload)
    #[must_use]
    pub const fn request_control() -> Self {
        Self {
            opcode: OpCode::RequestControl,
            payload: Vec::new(),
        }
    }

    /// Create a set-target-resistance command (opcode `0x04`)
    ///
    /// The level is encoded as a little-endian u16 following the opcode.
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::InvalidParameters`] when `level` is outside
    /// `1..=80`. Validation happens here so an out-of-range level never
    /// reaches the transport.
    pub fn set_target_resistance(level: u8) -> Result<Self> {
        if !(MIN_RESISTANCE_LEVEL..=MAX_RESISTANCE_LEVEL).contains(&level) {
            return Err(BikeError::InvalidParameters(format!(
                "resistance level {level} is out of range ({MIN_RESISTANCE_LEVEL} - {MAX_RESISTANCE_LEVEL})"
            )));
        }

        Ok(Self {
            opcode: OpCode::SetTargetResistance,
            payload: u16::from(level).to_le_bytes().to_vec(),
        })
    }

    /// Serialize the command to wire bytes
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.payload.len());
        buf.put_u8(self.opcode as u8);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }
}

/// Result code carried in a control point acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultCode {
    /// Command accepted
    Success,
    /// Opcode not supported by this machine
    NotSupported,
    /// Parameter rejected by the machine
    InvalidParameter,
    /// Machine failed to execute the command
    OperationFailed,
    /// Control was not granted before the command
    ControlNotPermitted,
    /// Result code outside the standardized table
    Unknown(u8),
}

impl From<u8> for ResultCode {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Self::Success,
            0x02 => Self::NotSupported,
            0x03 => Self::InvalidParameter,
            0x04 => Self::OperationFailed,
            0x05 => Self::ControlNotPermitted,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::NotSupported => write!(f, "NOT_SUPPORTED"),
            Self::InvalidParameter => write!(f, "INVALID_PARAMETER"),
            Self::OperationFailed => write!(f, "OPERATION_FAILED"),
            Self::ControlNotPermitted => write!(f, "CONTROL_NOT_PERMITTED"),
            Self::Unknown(code) => write!(f, "UNKNOWN({code})"),
        }
    }
}

/// A decoded control point acknowledgment
///
/// Acks arrive asynchronously as 3-byte indication frames: response opcode,
/// echoed request opcode, result code. They are observational; the command
/// sequence does not block on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    /// Response opcode (normally `0x80`)
    pub response_opcode: u8,
    /// Opcode of the command being acknowledged
    pub request_opcode: u8,
    /// Outcome reported by the machine
    pub result: ResultCode,
}

/// Parse a control point acknowledgment frame
///
/// # Errors
///
/// Returns [`BikeError::ParseError`] when the frame is shorter than the
/// 3 bytes an acknowledgment requires.
pub fn parse_control_response(data: &[u8]) -> Result<ControlResponse> {
    if data.len() < 3 {
        return Err(BikeError::ParseError(format!(
            "acknowledgment too short: {} bytes, expected 3",
            data.len()
        )));
    }

    Ok(ControlResponse {
        response_opcode: data[0],
        request_opcode: data[1],
        result: ResultCode::from(data[2]),
    })
}

/// Decoded Fitness Machine Feature characteristic (`0x2ACC`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineFeatures {
    /// Raw machine features word
    pub features: u32,
    /// Raw target-setting features word
    pub target_settings: u32,
}

impl MachineFeatures {
    /// Parse the feature characteristic value (two little-endian u32 words)
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::ParseError`] when fewer than 8 bytes are given.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(BikeError::ParseError(format!(
                "feature value too short: {} bytes, expected 8",
                data.len()
            )));
        }

        let mut buf = data;
        Ok(Self {
            features: buf.get_u32_le(),
            target_settings: buf.get_u32_le(),
        })
    }

    /// Whether the machine supports resistance level targets
    #[must_use]
    pub const fn resistance_level_supported(&self) -> bool {
        self.features & (1 << 3) != 0
    }

    /// Whether the machine supports power targets
    #[must_use]
    pub const fn power_target_supported(&self) -> bool {
        self.features & (1 << 4) != 0
    }

    /// Whether the machine supports indoor bike simulation parameters
    #[must_use]
    pub const fn simulation_supported(&self) -> bool {
        self.features & (1 << 5) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_only_frame() {
        // flags 0x0000, speed bytes 0x64 0x00 -> 100 * 0.01 = 1.00 km/h
        let frame = parse_indoor_bike_data(&[0x00, 0x00, 0x64, 0x00]).unwrap();
        assert_eq!(frame.speed, Some(1.00));
        assert_eq!(frame.average_speed, None);
        assert_eq!(frame.cadence, None);
        assert_eq!(frame.distance, None);
        assert_eq!(frame.power, None);
    }

    #[test]
    fn test_full_frame() {
        let flags: u16 = FLAG_AVERAGE_SPEED
            | FLAG_INSTANTANEOUS_CADENCE
            | FLAG_AVERAGE_CADENCE
            | FLAG_TOTAL_DISTANCE
            | FLAG_RESISTANCE_LEVEL
            | FLAG_INSTANTANEOUS_POWER
            | FLAG_AVERAGE_POWER;

        let mut data = Vec::new();
        data.extend_from_slice(&flags.to_le_bytes());
        data.extend_from_slice(&3000u16.to_le_bytes()); // 30.00 km/h
        data.extend_from_slice(&2500u16.to_le_bytes()); // 25.00 km/h avg
        data.extend_from_slice(&160u16.to_le_bytes()); // 80.0 rpm
        data.extend_from_slice(&150u16.to_le_bytes()); // 75.0 rpm avg
        data.extend_from_slice(&[0xD2, 0x04, 0x00]); // 1234 m
        data.extend_from_slice(&20i16.to_le_bytes());
        data.extend_from_slice(&250i16.to_le_bytes());
        data.extend_from_slice(&240i16.to_le_bytes());

        let frame = parse_indoor_bike_data(&data).unwrap();
        assert_eq!(frame.speed, Some(30.00));
        assert_eq!(frame.average_speed, Some(25.00));
        assert_eq!(frame.cadence, Some(80.0));
        assert_eq!(frame.average_cadence, Some(75.0));
        assert_eq!(frame.distance, Some(1234));
        assert_eq!(frame.resistance, Some(20));
        assert_eq!(frame.power, Some(250));
        assert_eq!(frame.average_power, Some(240));
    }

    #[test]
    fn test_negative_power() {
        let flags = FLAG_INSTANTANEOUS_POWER;
        let mut data = Vec::new();
        data.extend_from_slice(&flags.to_le_bytes());
        data.extend_from_slice(&100u16.to_le_bytes());
        data.extend_from_slice(&(-12i16).to_le_bytes());

        let frame = parse_indoor_bike_data(&data).unwrap();
        assert_eq!(frame.power, Some(-12));
    }

    #[test]
    fn test_truncated_frame_drops_missing_fields() {
        // Flags claim cadence and power, but the frame ends after speed.
        let flags = FLAG_INSTANTANEOUS_CADENCE | FLAG_INSTANTANEOUS_POWER;
        let mut data = Vec::new();
        data.extend_from_slice(&flags.to_le_bytes());
        data.extend_from_slice(&500u16.to_le_bytes());

        let frame = parse_indoor_bike_data(&data).unwrap();
        assert_eq!(frame.speed, Some(5.00));
        assert_eq!(frame.cadence, None);
        assert_eq!(frame.power, None);
    }

    #[test]
    fn test_frame_without_flags_word_is_error() {
        assert!(parse_indoor_bike_data(&[0x00]).is_err());
        assert!(parse_indoor_bike_data(&[]).is_err());
    }

    #[test]
    fn test_flags_only_frame_has_no_fields() {
        let frame = parse_indoor_bike_data(&[0xFF, 0x00]).unwrap();
        assert_eq!(frame, IndoorBikeData::default());
    }

    #[test]
    fn test_request_control_encoding() {
        let bytes = ControlCommand::request_control().to_bytes();
        assert_eq!(&bytes[..], &[0x00]);
    }

    #[test]
    fn test_set_resistance_encoding() {
        let bytes = ControlCommand::set_target_resistance(20)
            .unwrap()
            .to_bytes();
        assert_eq!(&bytes[..], &[0x04, 0x14, 0x00]);

        let bytes = ControlCommand::set_target_resistance(80)
            .unwrap()
            .to_bytes();
        assert_eq!(&bytes[..], &[0x04, 0x50, 0x00]);
    }

    #[test]
    fn test_resistance_level_bounds() {
        assert!(ControlCommand::set_target_resistance(0).is_err());
        assert!(ControlCommand::set_target_resistance(81).is_err());
        assert!(ControlCommand::set_target_resistance(1).is_ok());
        assert!(ControlCommand::set_target_resistance(80).is_ok());
    }

    #[test]
    fn test_control_response_parsing() {
        let response = parse_control_response(&[0x80, 0x04, 0x01]).unwrap();
        assert_eq!(response.response_opcode, 0x80);
        assert_eq!(response.request_opcode, 0x04);
        assert_eq!(response.result, ResultCode::Success);

        let response = parse_control_response(&[0x80, 0x04, 0x05]).unwrap();
        assert_eq!(response.result, ResultCode::ControlNotPermitted);
    }

    #[test]
    fn test_unknown_result_code() {
        let response = parse_control_response(&[0x80, 0x00, 0x7F]).unwrap();
        assert_eq!(response.result, ResultCode::Unknown(0x7F));
        assert_eq!(format!("{}", response.result), "UNKNOWN(127)");
    }

    #[test]
    fn test_short_control_response_is_error() {
        assert!(parse_control_response(&[0x80, 0x04]).is_err());
    }

    #[test]
    fn test_machine_features() {
        let mut data = Vec::new();
        data.extend_from_slice(&((1u32 << 3) | (1 << 5)).to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());

        let features = MachineFeatures::from_bytes(&data).unwrap();
        assert!(features.resistance_level_supported());
        assert!(!features.power_target_supported());
        assert!(features.simulation_supported());

        assert!(MachineFeatures::from_bytes(&data[..4]).is_err());
    }
}
