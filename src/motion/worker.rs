//! The per-servo worker thread — the cooperative loop described in §4.E.
//!
//! Each worker owns nothing but its servo id; everything it touches
//! (pattern configuration, flags, the bus) is shared state reached through
//! [`BusArbiter`] and [`SessionState`]. The loop never exits on a
//! communication failure: "never stop the motor on communication failure"
//! is enforced by construction — only `running == false` ends the thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::bus::BusArbiter;
use crate::motion::{recovery, setpoint};
use crate::register;
use crate::servo::{KindState, PatternKind, PatternRecord, ServoId, SessionState, WorkerHandle};

const HEALTH_CHECK_EVERY_N_STEPS: u32 = 20;
const CONSECUTIVE_FAILURE_THRESHOLD: u32 = 5;
const EMIT_ATTEMPTS: u32 = 3;
const EMIT_BACKOFF: Duration = Duration::from_millis(20);
const FLAG_POLL_INTERVAL: Duration = Duration::from_millis(100);

enum NextSetpoint {
    Position {
        pos: u16,
        new_direction: Option<i8>,
        boundary_hit: bool,
    },
    Speed {
        signed_speed: i32,
    },
}

pub fn spawn(bus: Arc<BusArbiter>, state: Arc<SessionState>, id: ServoId) -> WorkerHandle {
    let started_at = Instant::now();
    let join = spawn_thread(bus, state, id);
    WorkerHandle { join, started_at }
}

fn spawn_thread(bus: Arc<BusArbiter>, state: Arc<SessionState>, id: ServoId) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("servo-worker-{id}"))
        .spawn(move || run(&bus, &state, id))
        .expect("failed to spawn servo worker thread")
}

fn run(bus: &BusArbiter, state: &SessionState, id: ServoId) {
    seed_position(bus, state, id);

    let mut consecutive_failures: u32 = 0;
    let mut steps_since_health_check: u32 = 0;

    loop {
        let Some(flags) = state.flags(id) else {
            break;
        };
        if !flags.running {
            break;
        }
        if flags.immediate_stop || flags.emergency_stop {
            thread::sleep(FLAG_POLL_INTERVAL);
            continue;
        }
        if flags.paused {
            thread::sleep(FLAG_POLL_INTERVAL);
            continue;
        }

        let Some(record) = state.record_snapshot(id) else {
            break;
        };
        let next = compute_next_setpoint(&record);

        let Some(flags) = state.flags(id) else {
            break;
        };
        if !flags.running || flags.immediate_stop || flags.emergency_stop {
            continue;
        }

        if emit_setpoint(bus, id, &record, &next) {
            consecutive_failures = 0;
            steps_since_health_check += 1;
            let done = state
                .with_record_mut(id, |r| {
                    apply_setpoint(r, &next);
                    r.cycles_complete()
                })
                .unwrap_or(false);
            if done {
                debug!("servo {id}: finite pattern reached its cycle target, stopping");
                state.set_running(id, false);
                break;
            }
        } else {
            consecutive_failures += 1;
            warn!("servo {id}: setpoint emission failed ({consecutive_failures} in a row)");
        }

        if steps_since_health_check >= HEALTH_CHECK_EVERY_N_STEPS
            || consecutive_failures >= CONSECUTIVE_FAILURE_THRESHOLD
        {
            recovery::run_ladder(bus, id, register::BAUD_SYMBOL_1M);
            steps_since_health_check = 0;
            consecutive_failures = 0;
        }

        let step_period = match record.kind() {
            PatternKind::Rotation => Duration::from_millis(50),
            PatternKind::Sweep | PatternKind::Wave => Duration::from_millis(100),
        };
        thread::sleep(step_period);
    }
}

fn seed_position(bus: &BusArbiter, state: &SessionState, id: ServoId) {
    let (result, pos) = bus.read_u16(id, register::PRESENT_POSITION_L);
    let seeded = if result.is_success() {
        pos.unwrap_or(2048)
    } else {
        2048
    };
    state.with_record_mut(id, |r| r.current_position = seeded);
}

fn compute_next_setpoint(record: &PatternRecord) -> NextSetpoint {
    match record.state {
        KindState::Sweep {
            start_position,
            end_position,
            direction,
        } => {
            let step = setpoint::sweep_step(
                record.current_position,
                record.speed,
                direction,
                start_position,
                end_position,
            );
            let clamped = record.angle_limits.clamp(step.next as i32);
            NextSetpoint::Position {
                pos: clamped,
                new_direction: Some(step.direction),
                boundary_hit: step.boundary_hit,
            }
        }
        KindState::Wave {
            center_position,
            amplitude,
            frequency_hz,
            t0,
        } => {
            let pos = setpoint::wave_position(center_position, amplitude, frequency_hz, t0.elapsed());
            let clamped = record.angle_limits.clamp(pos as i32);
            NextSetpoint::Position {
                pos: clamped,
                new_direction: None,
                boundary_hit: false,
            }
        }
        KindState::Rotation { direction } => {
            let signed_speed = setpoint::rotation_signed_speed(record.speed, direction);
            NextSetpoint::Speed { signed_speed }
        }
    }
}

fn emit_setpoint(bus: &BusArbiter, id: ServoId, record: &PatternRecord, next: &NextSetpoint) -> bool {
    for attempt in 0..EMIT_ATTEMPTS {
        let result = match next {
            NextSetpoint::Position { pos, .. } => bus.write_pos_ex(id, *pos, record.speed, record.acceleration),
            NextSetpoint::Speed { signed_speed } => bus.write_spec(id, *signed_speed, record.acceleration),
        };
        if result.is_success() {
            return true;
        }
        if attempt + 1 < EMIT_ATTEMPTS {
            thread::sleep(EMIT_BACKOFF);
        }
    }
    false
}

fn apply_setpoint(record: &mut PatternRecord, next: &NextSetpoint) {
    match next {
        NextSetpoint::Position {
            pos,
            new_direction,
            boundary_hit,
        } => {
            record.current_position = *pos;
            if let KindState::Sweep { direction, .. } = &mut record.state {
                if let Some(d) = new_direction {
                    *direction = *d;
                }
            }
            if *boundary_hit {
                record.cycle_count += 1;
                debug!("servo cycle_count -> {}", record.cycle_count);
            }
        }
        NextSetpoint::Speed { .. } => {
            // Position is informational only for Rotation; nothing to write back.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servo::{AngleLimits, Flags};

    fn sweep_record() -> PatternRecord {
        PatternRecord {
            state: KindState::Sweep {
                start_position: 1000,
                end_position: 1400,
                direction: 1,
            },
            speed: 200,
            acceleration: 50,
            cycles_target: 2,
            cycle_count: 0,
            current_position: 1000,
            angle_limits: AngleLimits::disabled(),
            last_telemetry: None,
        }
    }

    #[test]
    fn compute_next_setpoint_advances_sweep() {
        let record = sweep_record();
        match compute_next_setpoint(&record) {
            NextSetpoint::Position { pos, .. } => assert_eq!(pos, 1200),
            NextSetpoint::Speed { .. } => panic!("expected a position setpoint"),
        }
    }

    #[test]
    fn apply_setpoint_increments_cycle_count_on_boundary() {
        let mut record = sweep_record();
        record.current_position = 1390;
        let next = compute_next_setpoint(&record);
        apply_setpoint(&mut record, &next);
        assert_eq!(record.current_position, 1400);
        assert_eq!(record.cycle_count, 1);
        match record.state {
            KindState::Sweep { direction, .. } => assert_eq!(direction, -1),
            _ => unreachable!(),
        }
    }

    #[test]
    fn worker_exits_promptly_once_running_is_cleared() {
        use crate::transport::fake::FakeTransport;

        let bus = Arc::new(BusArbiter::new());
        bus.attach(Box::new(FakeTransport::new()));
        let state = Arc::new(SessionState::new());
        let id = ServoId::new(9).unwrap();
        state.insert_record(id, sweep_record());
        state.init_flags(id, Flags::running_only());

        let handle = spawn(bus, state.clone(), id);
        std::thread::sleep(Duration::from_millis(50));
        state.set_running(id, false);
        handle.join.join().expect("worker thread should exit cleanly");
    }
}
