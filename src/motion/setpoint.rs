//! Pure setpoint math — no I/O, no locks. Kept isolated so the worker
//! loop's control flow can be tested without a transport at all.

use std::f64::consts::PI;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepStep {
    pub next: u16,
    pub direction: i8,
    pub boundary_hit: bool,
}

/// `next = clamp(current + direction*speed, start, end)`; snaps to the
/// boundary and flips direction when it would overshoot either end.
pub fn sweep_step(current: u16, speed: u16, direction: i8, start: u16, end: u16) -> SweepStep {
    if start == end {
        return SweepStep {
            next: start,
            direction,
            boundary_hit: false,
        };
    }

    let delta = speed as i32 * direction.signum() as i32;
    let raw = current as i32 + delta;

    if direction >= 0 {
        if raw >= end as i32 {
            SweepStep {
                next: end,
                direction: -1,
                boundary_hit: true,
            }
        } else {
            SweepStep {
                next: raw.max(start as i32) as u16,
                direction,
                boundary_hit: false,
            }
        }
    } else if raw <= start as i32 {
        SweepStep {
            next: start,
            direction: 1,
            boundary_hit: true,
        }
    } else {
        SweepStep {
            next: raw.min(end as i32) as u16,
            direction,
            boundary_hit: false,
        }
    }
}

/// `round(center + amplitude * sin(2*pi*frequency*elapsed))`, clamped to
/// the servo's physical range.
pub fn wave_position(center: u16, amplitude: u16, frequency_hz: f64, elapsed: Duration) -> u16 {
    let phase = 2.0 * PI * frequency_hz * elapsed.as_secs_f64();
    let raw = center as f64 + amplitude as f64 * phase.sin();
    raw.round().clamp(0.0, 4095.0) as u16
}

/// Rotation has no position setpoint: the wire command is a signed speed.
pub fn rotation_signed_speed(speed: u16, direction: i8) -> i32 {
    speed as i32 * direction.signum() as i32
}

/// Translates a raw position reading into degrees around the mechanical
/// midpoint, per the telemetry contract.
pub fn position_to_degrees(position: u16) -> f64 {
    (position as f64 - 2048.0) * 0.088
}

/// Raw voltage register value (tenths of a volt) to volts.
pub fn raw_to_volts(raw: u8) -> f64 {
    raw as f64 * 0.1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_advances_toward_end_without_hitting_boundary() {
        let step = sweep_step(1000, 200, 1, 500, 3000);
        assert_eq!(
            step,
            SweepStep {
                next: 1200,
                direction: 1,
                boundary_hit: false
            }
        );
    }

    #[test]
    fn sweep_snaps_to_end_and_reverses() {
        let step = sweep_step(2950, 200, 1, 500, 3000);
        assert_eq!(step.next, 3000);
        assert_eq!(step.direction, -1);
        assert!(step.boundary_hit);
    }

    #[test]
    fn sweep_snaps_to_start_and_reverses() {
        let step = sweep_step(650, 200, -1, 500, 3000);
        assert_eq!(step.next, 500);
        assert_eq!(step.direction, 1);
        assert!(step.boundary_hit);
    }

    #[test]
    fn sweep_with_equal_bounds_emits_no_motion_and_no_boundary() {
        for (current, speed, direction) in [(500, 200, 1), (500, 0, -1), (500, 1000, 1)] {
            let step = sweep_step(current, speed, direction, 500, 500);
            assert_eq!(step.next, 500);
            assert!(!step.boundary_hit);
        }
    }

    #[test]
    fn wave_position_at_zero_phase_is_center() {
        let pos = wave_position(2048, 500, 1.0, Duration::from_secs(0));
        assert_eq!(pos, 2048);
    }

    #[test]
    fn wave_position_clamps_to_physical_range() {
        let pos = wave_position(4090, 500, 0.25, Duration::from_secs(1));
        assert!(pos <= 4095);
    }

    #[test]
    fn rotation_signed_speed_encodes_direction() {
        assert_eq!(rotation_signed_speed(500, 1), 500);
        assert_eq!(rotation_signed_speed(500, -1), -500);
    }

    #[test]
    fn position_to_degrees_matches_midpoint_convention() {
        assert_eq!(position_to_degrees(2048), 0.0);
        assert!((position_to_degrees(3048) - 88.0).abs() < 1e-9);
    }
}
