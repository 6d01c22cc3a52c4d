//! The Supervisor.
//!
//! A background thread that, every `interval`, repairs any
//! actively-commanded servo whose worker has died or never existed (using
//! the same recovery ladder as a worker's own health check, then either
//! respawning a worker or giving up and clearing `running`), and runs an
//! in-band health check against every active servo to keep N/A-rate
//! statistics live even when no client is polling `/telemetry`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info};

use crate::bus::BusArbiter;
use crate::motion;
use crate::register;
use crate::servo::SessionState;
use crate::stats::CommStats;

const POLL_GRANULARITY: Duration = Duration::from_millis(100);

pub struct Supervisor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Supervisor {
    pub fn start(bus: Arc<BusArbiter>, state: Arc<SessionState>, stats: Arc<CommStats>, interval: Duration) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let loop_stop_flag = stop_flag.clone();
        let handle = thread::Builder::new()
            .name("servo-supervisor".into())
            .spawn(move || run(bus, state, stats, interval, loop_stop_flag))
            .expect("failed to spawn supervisor thread");
        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(
    bus: Arc<BusArbiter>,
    state: Arc<SessionState>,
    stats: Arc<CommStats>,
    interval: Duration,
    stop_flag: Arc<AtomicBool>,
) {
    let mut elapsed = Duration::ZERO;
    while !stop_flag.load(Ordering::SeqCst) {
        thread::sleep(POLL_GRANULARITY);
        elapsed += POLL_GRANULARITY;
        if elapsed < interval {
            continue;
        }
        elapsed = Duration::ZERO;
        tick(&bus, &state, &stats);
    }
}

fn tick(bus: &Arc<BusArbiter>, state: &Arc<SessionState>, stats: &Arc<CommStats>) {
    for id in state.all_record_ids() {
        let Some(flags) = state.flags(id) else { continue };
        if flags.running {
            health_check(bus, stats, id);
        }
    }

    for id in state.ids_needing_worker() {
        let Some(flags) = state.flags(id) else {
            continue;
        };
        if !flags.running {
            continue;
        }

        match motion::run_ladder(bus, id, register::BAUD_SYMBOL_1M) {
            Some(step) => {
                info!("servo {id}: supervisor resurrecting worker (recovered via {step:?})");
                let handle = motion::spawn(bus.clone(), state.clone(), id);
                state.register_worker(id, handle);
            }
            None => {
                error!("servo {id}: supervisor could not restore communication, stopping pattern");
                state.set_running(id, false);
            }
        }
    }
}

/// A single position read, used to keep `na_rate` live between client
/// polls of `/telemetry` rather than to duplicate it.
fn health_check(bus: &BusArbiter, stats: &CommStats, id: crate::servo::ServoId) {
    let (result, _) = bus.read_u16(id, register::PRESENT_POSITION_L);
    stats.record_health_check(id, result.is_success());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servo::{AngleLimits, Flags, KindState, PatternRecord, ServoId, WorkerHandle};
    use crate::transport::fake::FakeTransport;

    fn idle_record() -> PatternRecord {
        PatternRecord {
            state: KindState::Rotation { direction: 1 },
            speed: 100,
            acceleration: 50,
            cycles_target: -1,
            cycle_count: 0,
            current_position: 2048,
            angle_limits: AngleLimits::disabled(),
            last_telemetry: None,
        }
    }

    #[test]
    fn tick_respawns_a_worker_when_recovery_succeeds() {
        let bus = Arc::new(BusArbiter::new());
        let mut fake = FakeTransport::new();
        // Ping succeeds immediately, satisfying the recovery ladder's first step.
        let len = 4u8;
        let sum: u32 = 7 + len as u32 + 0x01 + 0x00;
        fake.push_reply(vec![0xFF, 0xFF, 7, len, 0, 0x01, 0x00, !(sum as u8)]);
        bus.attach(Box::new(fake));

        let state = Arc::new(SessionState::new());
        let stats = Arc::new(CommStats::new());
        let id = ServoId::new(7).unwrap();
        state.insert_record(id, idle_record());
        state.init_flags(id, Flags::running_only());

        tick(&bus, &state, &stats);
        assert!(state.worker_is_live(id));

        state.set_running(id, false);
        if let Some(handle) = state.take_worker(id) {
            let _ = handle.join.join();
        }
    }

    #[test]
    fn tick_stops_pattern_when_recovery_is_exhausted() {
        let bus = Arc::new(BusArbiter::new());
        bus.attach(Box::new(FakeTransport::new()));

        let state = Arc::new(SessionState::new());
        let stats = Arc::new(CommStats::new());
        let id = ServoId::new(8).unwrap();
        state.insert_record(id, idle_record());
        state.init_flags(id, Flags::running_only());

        tick(&bus, &state, &stats);
        assert!(!state.worker_is_live(id));
        assert_eq!(state.flags(id).unwrap().running, false);
    }

    #[test]
    fn tick_health_checks_a_servo_with_a_live_worker() {
        let bus = Arc::new(BusArbiter::new());
        let mut fake = FakeTransport::new();
        let len = 5u8;
        let sum: u32 = 9 + len as u32 + 0x00 + 0x02 + 0x00;
        fake.push_reply(vec![0xFF, 0xFF, 9, len, 0, 0x00, 0x02, !(sum as u8)]);
        bus.attach(Box::new(fake));

        let state = Arc::new(SessionState::new());
        let stats = Arc::new(CommStats::new());
        let id = ServoId::new(9).unwrap();
        state.insert_record(id, idle_record());
        state.init_flags(id, Flags::running_only());
        state.register_worker(
            id,
            WorkerHandle {
                join: thread::spawn(thread::park),
                started_at: std::time::Instant::now(),
            },
        );

        assert_eq!(stats.na_rate(id), None);
        tick(&bus, &state, &stats);
        assert_eq!(stats.na_rate(id), Some(0.0));

        state.set_running(id, false);
        if let Some(handle) = state.take_worker(id) {
            handle.join.thread().unpark();
            let _ = handle.join.join();
        }
    }
}
