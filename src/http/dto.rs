//! Request/response bodies for the HTTP surface. This module owns no
//! domain logic: it only translates JSON shapes into Controller calls and
//! Controller outputs back into JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::controller::{AngleLimitsRequest, MotionConfig, PatternRequest, PositionVerification, ServoConfig};
use crate::error::{Error, Result};
use crate::servo::{DiscoveredServo, ServoId, TelemetrySnapshot};

pub fn parse_id(raw: u8) -> Result<ServoId> {
    ServoId::new(raw).ok_or_else(|| Error::InvalidArgument(format!("servo id {raw} out of range [0,253]")))
}

#[derive(Deserialize)]
pub struct ConnectRequest {
    pub port: String,
    pub baudrate: u32,
}

#[derive(Deserialize)]
pub struct DiscoverRequest {
    pub start_id: u8,
    pub end_id: u8,
}

#[derive(Serialize)]
pub struct DiscoverResponse {
    pub success: bool,
    pub servos: HashMap<String, DiscoveredServoDto>,
}

#[derive(Serialize)]
pub struct DiscoveredServoDto {
    pub id: u8,
    pub model_number: u16,
}

impl From<&DiscoveredServo> for DiscoveredServoDto {
    fn from(d: &DiscoveredServo) -> Self {
        Self {
            id: d.id.get(),
            model_number: d.model_number,
        }
    }
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub connected: bool,
    pub port: Option<String>,
    pub baud: Option<u32>,
    pub discovered: Vec<u8>,
}

#[derive(Serialize)]
pub struct TelemetryResponse {
    pub success: bool,
    pub servo_id: u8,
    pub position: Option<u16>,
    pub angle_degrees: Option<f64>,
    pub speed: Option<u16>,
    pub moving: Option<bool>,
    pub goal_position: Option<u16>,
    pub goal_speed: Option<u16>,
    pub acceleration: Option<u8>,
    pub mode: Option<u8>,
    pub voltage: Option<f64>,
    pub temperature: Option<u8>,
    pub current: Option<u16>,
    pub load: Option<u16>,
    pub torque_enabled: Option<bool>,
}

impl TelemetryResponse {
    pub fn from_snapshot(id: ServoId, snap: &TelemetrySnapshot) -> Self {
        Self {
            success: true,
            servo_id: id.get(),
            position: snap.position,
            angle_degrees: snap.angle_deg,
            speed: snap.speed,
            moving: snap.moving,
            goal_position: snap.goal_position,
            goal_speed: snap.goal_speed,
            acceleration: snap.acceleration,
            mode: snap.mode,
            voltage: snap.voltage_v,
            temperature: snap.temperature_c,
            current: snap.current,
            load: snap.load,
            torque_enabled: snap.torque_enabled,
        }
    }
}

#[derive(Deserialize)]
pub struct PositionRequest {
    pub servo_id: u8,
    pub position: u16,
    #[serde(default)]
    pub speed: u16,
    #[serde(default)]
    pub acceleration: u8,
}

#[derive(Deserialize)]
pub struct SpeedRequest {
    pub servo_id: u8,
    pub speed: u16,
}

#[derive(Deserialize)]
pub struct AccelerationRequest {
    pub servo_id: u8,
    pub acceleration: u8,
}

#[derive(Deserialize)]
pub struct SpeedAccelerationRequest {
    pub servo_id: u8,
    pub speed: u16,
    pub acceleration: u8,
}

#[derive(Deserialize)]
pub struct ChangeIdRequest {
    pub old_id: u8,
    pub new_id: u8,
}

#[derive(Deserialize)]
pub struct AngleLimitsDto {
    pub min: u16,
    pub max: u16,
}

#[derive(Deserialize)]
pub struct MovementConfigDto {
    pub servo_id: u8,
    pub pattern: String,
    #[serde(default)]
    pub start_position: u16,
    #[serde(default)]
    pub end_position: u16,
    #[serde(default)]
    pub center_position: u16,
    #[serde(default)]
    pub amplitude: u16,
    #[serde(default)]
    pub frequency_hz: f64,
    #[serde(default = "default_direction")]
    pub direction: i8,
    #[serde(default)]
    pub speed: u16,
    #[serde(default)]
    pub acceleration: u8,
    #[serde(default = "default_cycles_target")]
    pub cycles_target: i64,
    #[serde(default)]
    pub angle_limits: Option<AngleLimitsDto>,
}

fn default_direction() -> i8 {
    1
}

fn default_cycles_target() -> i64 {
    -1
}

impl MovementConfigDto {
    pub fn try_into_motion_config(self) -> Result<MotionConfig> {
        let id = parse_id(self.servo_id)?;
        let pattern = match self.pattern.as_str() {
            "sweep" => PatternRequest::Sweep {
                start: self.start_position,
                end: self.end_position,
            },
            "wave" => PatternRequest::Wave {
                center: self.center_position,
                amplitude: self.amplitude,
                frequency_hz: self.frequency_hz,
            },
            "rotation" => PatternRequest::Rotation {
                direction: self.direction,
            },
            other => {
                return Err(Error::InvalidArgument(format!("unknown pattern kind '{other}'")));
            }
        };
        Ok(MotionConfig {
            id,
            pattern,
            speed: self.speed,
            acceleration: self.acceleration,
            cycles_target: self.cycles_target,
            angle_limits: self.angle_limits.map(|l| AngleLimitsRequest { min: l.min, max: l.max }),
        })
    }
}

#[derive(Deserialize)]
pub struct StartMotionRequest {
    pub movement_configs: Vec<MovementConfigDto>,
}

#[derive(Deserialize)]
pub struct ServoIdsRequest {
    pub servo_ids: Vec<u8>,
}

#[derive(Serialize)]
pub struct SimpleSuccess {
    pub success: bool,
}

impl SimpleSuccess {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

#[derive(Serialize)]
pub struct ServoConfigResponse {
    pub success: bool,
    pub servo_id: u8,
    pub offset: u16,
    pub min_angle: u16,
    pub max_angle: u16,
    pub cw_dead: u8,
    pub ccw_dead: u8,
}

impl ServoConfigResponse {
    pub fn from_config(id: ServoId, config: ServoConfig) -> Self {
        Self {
            success: true,
            servo_id: id.get(),
            offset: config.offset,
            min_angle: config.min_angle,
            max_angle: config.max_angle,
            cw_dead: config.cw_dead,
            ccw_dead: config.ccw_dead,
        }
    }
}

#[derive(Deserialize)]
pub struct OffsetRequest {
    pub offset: u16,
}

#[derive(Deserialize)]
pub struct DeadZoneRequest {
    pub cw_dead: u8,
    pub ccw_dead: u8,
}

#[derive(Serialize)]
pub struct RestartedEntry {
    pub servo_id: u8,
    pub recovered: bool,
}

#[derive(Serialize)]
pub struct RestartFailedResponse {
    pub success: bool,
    pub results: Vec<RestartedEntry>,
}

#[derive(Serialize)]
pub struct VerifyPositionsResponse {
    pub success: bool,
    pub results: Vec<PositionVerificationDto>,
}

#[derive(Serialize)]
pub struct PositionVerificationDto {
    pub servo_id: u8,
    pub expected: u16,
    pub actual: u16,
    pub delta: i32,
}

impl From<&PositionVerification> for PositionVerificationDto {
    fn from(v: &PositionVerification) -> Self {
        Self {
            servo_id: v.id.get(),
            expected: v.expected,
            actual: v.actual,
            delta: v.delta,
        }
    }
}

#[derive(Serialize)]
pub struct CleanupOrphanedResponse {
    pub success: bool,
    pub cleaned: Vec<u8>,
}

#[derive(Serialize)]
pub struct DiagnosticsResponse {
    pub success: bool,
    pub connected: bool,
    pub discovered_count: usize,
    pub active_patterns: usize,
    pub na_rates: HashMap<u8, f64>,
}

#[derive(Serialize)]
pub struct PingResponse {
    pub success: bool,
    pub servo_id: u8,
    pub responded: bool,
    pub model_number: Option<u16>,
}
