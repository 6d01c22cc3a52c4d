//! The recovery ladder — executed whenever a worker's health check or
//! consecutive-failure counter trips. Steps run in order; the first one
//! that succeeds ends the ladder. Exhausting all five is logged but never
//! stops the motor: callers see degraded telemetry, not a halted pattern.

use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::bus::BusArbiter;
use crate::register;
use crate::servo::ServoId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStep {
    Ping,
    TorqueCycle,
    BaudSanity,
    VoltageProbe,
    PositionHold,
}

/// Runs the ladder against `id`. Returns the step that restored
/// communication, or `None` if all five were exhausted.
pub fn run_ladder(bus: &BusArbiter, id: ServoId, expected_baud_symbol: u8) -> Option<RecoveryStep> {
    if ping_step(bus, id) {
        return Some(RecoveryStep::Ping);
    }
    if torque_cycle_step(bus, id) {
        return Some(RecoveryStep::TorqueCycle);
    }
    if baud_sanity_step(bus, id, expected_baud_symbol) {
        return Some(RecoveryStep::BaudSanity);
    }
    if voltage_probe_step(bus, id) {
        return Some(RecoveryStep::VoltageProbe);
    }
    if position_hold_step(bus, id) {
        return Some(RecoveryStep::PositionHold);
    }
    warn!("servo {id}: recovery ladder exhausted, continuing degraded");
    None
}

fn ping_step(bus: &BusArbiter, id: ServoId) -> bool {
    for _ in 0..5 {
        let (result, _) = bus.ping(id);
        if result.is_success() {
            debug!("servo {id}: recovered via ping");
            return true;
        }
    }
    false
}

fn torque_cycle_step(bus: &BusArbiter, id: ServoId) -> bool {
    for _ in 0..3 {
        if !bus.write_torque_enable(id, false).is_success() {
            continue;
        }
        thread::sleep(Duration::from_millis(100));
        if !bus.write_torque_enable(id, true).is_success() {
            continue;
        }
        let (result, _) = bus.read_u16(id, register::PRESENT_POSITION_L);
        if result.is_success() {
            debug!("servo {id}: recovered via torque cycle");
            return true;
        }
    }
    false
}

fn baud_sanity_step(bus: &BusArbiter, id: ServoId, expected_baud_symbol: u8) -> bool {
    let (result, symbol) = bus.read_u8(id, register::BAUD_RATE);
    if !result.is_success() {
        return false;
    }
    let symbol = symbol.unwrap_or(expected_baud_symbol);
    if symbol == expected_baud_symbol {
        debug!("servo {id}: recovered via baud sanity (already correct)");
        return true;
    }
    bus.write_u8(id, register::BAUD_RATE, expected_baud_symbol).is_success()
}

fn voltage_probe_step(bus: &BusArbiter, id: ServoId) -> bool {
    for _ in 0..5 {
        let (result, _) = bus.read_u8(id, register::PRESENT_VOLTAGE);
        if result.is_success() {
            debug!("servo {id}: recovered via voltage probe");
            return true;
        }
    }
    false
}

fn position_hold_step(bus: &BusArbiter, id: ServoId) -> bool {
    let (result, pos) = bus.read_u16(id, register::PRESENT_POSITION_L);
    let Some(pos) = pos.filter(|_| result.is_success()) else {
        return false;
    };
    bus.write_pos_ex(id, pos, 0, 0).is_success()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;

    fn status_bytes(id: u8, params: &[u8]) -> Vec<u8> {
        let len = (params.len() + 2) as u8;
        let mut buf = vec![0xFF, 0xFF, id, len, 0];
        buf.extend_from_slice(params);
        let sum: u32 = id as u32 + len as u32 + params.iter().map(|&b| b as u32).sum::<u32>();
        buf.push(!(sum as u8));
        buf
    }

    #[test]
    fn ladder_succeeds_immediately_on_ping() {
        let bus = BusArbiter::new();
        let mut fake = FakeTransport::new();
        fake.push_reply(status_bytes(1, &[0x01, 0x00]));
        bus.attach(Box::new(fake));

        let outcome = run_ladder(&bus, ServoId::new(1).unwrap(), 0);
        assert_eq!(outcome, Some(RecoveryStep::Ping));
    }

    #[test]
    fn ladder_reports_exhaustion_when_nothing_responds() {
        let bus = BusArbiter::new();
        bus.attach(Box::new(FakeTransport::new()));

        let outcome = run_ladder(&bus, ServoId::new(1).unwrap(), 0);
        assert_eq!(outcome, None);
    }
}
