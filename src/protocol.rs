use core::fmt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const MAX_FRAME_SIZE: usize = 1024;
pub const MODULE_NAME: &str = "chassis_tester";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Gear {
    #[default]
    #[serde(rename = "GEAR_NEUTRAL")]
    Neutral,
    #[serde(rename = "GEAR_DRIVE")]
    Drive,
    #[serde(rename = "GEAR_REVERSE")]
    Reverse,
    #[serde(rename = "GEAR_PARKING")]
    Park,
}

impl Gear {
    pub fn short_name(self) -> &'static str {
        match self {
            Gear::Neutral => "N",
            Gear::Drive => "D",
            Gear::Reverse => "R",
            Gear::Park => "P",
        }
    }
}

impl fmt::Display for Gear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DrivingMode {
    #[default]
    CompleteManual,
    CompleteAutoDrive,
    AutoSteerOnly,
    AutoSpeedOnly,
    EmergencyMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoError,
    CmdNotInPeriod,
    ChassisError,
    ChassisErrorOnSteer,
    ChassisErrorOnBrake,
    ChassisErrorOnThrottle,
    ChassisErrorOnGear,
    ManualIntervention,
    ChassisCanNotInPeriod,
    UnknownError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::CmdNotInPeriod => "CMD_NOT_IN_PERIOD",
            ErrorCode::ChassisError => "CHASSIS_ERROR",
            ErrorCode::ChassisErrorOnSteer => "CHASSIS_ERROR_ON_STEER",
            ErrorCode::ChassisErrorOnBrake => "CHASSIS_ERROR_ON_BRAKE",
            ErrorCode::ChassisErrorOnThrottle => "CHASSIS_ERROR_ON_THROTTLE",
            ErrorCode::ChassisErrorOnGear => "CHASSIS_ERROR_ON_GEAR",
            ErrorCode::ManualIntervention => "MANUAL_INTERVENTION",
            ErrorCode::ChassisCanNotInPeriod => "CHASSIS_CAN_NOT_IN_PERIOD",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TurnSignal {
    #[default]
    #[serde(rename = "TURN_NONE")]
    None,
    #[serde(rename = "TURN_LEFT")]
    Left,
    #[serde(rename = "TURN_RIGHT")]
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleSignal {
    pub turn_signal: TurnSignal,
    pub high_beam: bool,
    pub low_beam: bool,
    pub emergency_light: bool,
    pub horn: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Header {
    pub module_name: String,
    pub sequence_num: u64,
    pub timestamp_sec: f64,
}

/// Outgoing actuation request.
///
/// Percentages are 0-100, `speed` is a target in m/s and `acceleration` a target in
/// m/s². The header is filled in by the publisher, never by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    #[serde(default)]
    pub header: Header,
    pub throttle: f64,
    pub brake: f64,
    pub steering_target: f64,
    pub speed: f64,
    pub acceleration: f64,
    pub gear_location: Gear,
    pub parking_brake: bool,
    pub driving_mode: DrivingMode,
    #[serde(default)]
    pub signal: VehicleSignal,
}

impl ControlCommand {
    /// Neutral, parking brake requested, all actuators released, autonomous mode
    /// requested.
    pub fn safe_base() -> Self {
        Self {
            header: Header::default(),
            throttle: 0.0,
            brake: 0.0,
            steering_target: 0.0,
            speed: 0.0,
            acceleration: 0.0,
            gear_location: Gear::Neutral,
            parking_brake: true,
            driving_mode: DrivingMode::CompleteAutoDrive,
            signal: VehicleSignal::default(),
        }
    }

    pub fn full_stop() -> Self {
        Self {
            throttle: 0.0,
            brake: 100.0,
            speed: 0.0,
            acceleration: 0.0,
            ..Self::safe_base()
        }
    }

    pub fn safe_reset(brake: f64) -> Self {
        Self {
            brake,
            gear_location: Gear::Neutral,
            parking_brake: true,
            ..Self::safe_base()
        }
    }

    pub fn is_full_stop(&self) -> bool {
        self.throttle <= 0.0 && self.brake >= 100.0 && self.speed == 0.0 && self.acceleration == 0.0
    }
}

/// Incoming chassis telemetry frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChassisFeedback {
    pub driving_mode: DrivingMode,
    pub gear_location: Gear,
    pub throttle_percentage: f64,
    pub brake_percentage: f64,
    pub steering_percentage: f64,
    pub speed_mps: f64,
    #[serde(default)]
    pub instantaneous_acceleration: Option<f64>,
    #[serde(default)]
    pub error_code: Option<ErrorCode>,
    pub parking_brake: bool,
    #[serde(default)]
    pub signal: VehicleSignal,
}

impl ChassisFeedback {
    /// True when the vehicle reported a concrete fault code.
    pub fn error_reported(&self) -> bool {
        !matches!(self.error_code, None | Some(ErrorCode::NoError))
    }
}

pub fn encode_command(command: &ControlCommand) -> Result<String, ProtocolError> {
    encode(command)
}

pub fn decode_command(line: &str) -> Result<ControlCommand, ProtocolError> {
    decode(line)
}

pub fn encode_feedback(frame: &ChassisFeedback) -> Result<String, ProtocolError> {
    encode(frame)
}

pub fn decode_feedback(line: &str) -> Result<ChassisFeedback, ProtocolError> {
    decode(line)
}

fn encode<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    let json = serde_json::to_string(value).map_err(|_| ProtocolError::SerializationError)?;
    if json.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::MessageTooLarge);
    }
    Ok(json)
}

fn decode<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
    if line.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::MessageTooLarge);
    }
    serde_json::from_str(line).map_err(|_| ProtocolError::InvalidJson)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    InvalidJson,
    MessageTooLarge,
    SerializationError,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidJson => write!(f, "Invalid JSON format"),
            ProtocolError::MessageTooLarge => write!(f, "Message exceeds frame size"),
            ProtocolError::SerializationError => write!(f, "Serialization failed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
