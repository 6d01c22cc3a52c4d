//! Per-servo telemetry snapshot.
//!
//! Every channel is independently optional: a register read that exhausts
//! its retries degrades that one field to `None` ("N/A" at the HTTP
//! surface) rather than failing the whole snapshot. [`TelemetrySnapshot::na_count`]
//! feeds the Supervisor's `na_rate` bookkeeping.

use std::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct TelemetrySnapshot {
    pub position: Option<u16>,
    pub angle_deg: Option<f64>,
    pub speed: Option<u16>,
    pub moving: Option<bool>,
    pub goal_position: Option<u16>,
    pub goal_speed: Option<u16>,
    pub acceleration: Option<u8>,
    pub mode: Option<u8>,
    pub voltage_v: Option<f64>,
    pub temperature_c: Option<u8>,
    pub current: Option<u16>,
    pub load: Option<u16>,
    pub torque_enabled: Option<bool>,
    pub read_at: Instant,
}

impl TelemetrySnapshot {
    /// Number of distinct telemetry channels a snapshot reports on.
    pub const CHANNEL_COUNT: usize = 12;

    pub fn empty(at: Instant) -> Self {
        Self {
            position: None,
            angle_deg: None,
            speed: None,
            moving: None,
            goal_position: None,
            goal_speed: None,
            acceleration: None,
            mode: None,
            voltage_v: None,
            temperature_c: None,
            current: None,
            load: None,
            torque_enabled: None,
            read_at: at,
        }
    }

    pub fn na_count(&self) -> usize {
        let mut missing = 0;
        missing += self.position.is_none() as usize;
        missing += self.speed.is_none() as usize;
        missing += self.moving.is_none() as usize;
        missing += self.goal_position.is_none() as usize;
        missing += self.goal_speed.is_none() as usize;
        missing += self.acceleration.is_none() as usize;
        missing += self.mode.is_none() as usize;
        missing += self.voltage_v.is_none() as usize;
        missing += self.temperature_c.is_none() as usize;
        missing += self.current.is_none() as usize;
        missing += self.load.is_none() as usize;
        missing += self.torque_enabled.is_none() as usize;
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_is_fully_na() {
        let snap = TelemetrySnapshot::empty(Instant::now());
        assert_eq!(snap.na_count(), TelemetrySnapshot::CHANNEL_COUNT);
    }

    #[test]
    fn partial_snapshot_counts_only_missing_channels() {
        let mut snap = TelemetrySnapshot::empty(Instant::now());
        snap.position = Some(2048);
        snap.angle_deg = Some(0.0);
        assert_eq!(snap.na_count(), TelemetrySnapshot::CHANNEL_COUNT - 1);
    }
}
