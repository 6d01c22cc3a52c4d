//! Servo Session State.
//!
//! Holds the per-servo record of discovery, pattern configuration, worker
//! liveness and last-known telemetry. Two locks guard it, matching the
//! concurrency design: `state_mutex` for membership (creating/destroying
//! records and worker handles) and `pause_mutex`, a strictly finer lock
//! taken only around the cooperative-cancellation flags, never while the
//! bus lock is held.

mod telemetry;

pub use telemetry::TelemetrySnapshot;

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Instant;

/// A validated servo address in `[0, 253]`. `254` (broadcast) is reserved
/// and deliberately has no constructor here.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServoId(u8);

impl ServoId {
    pub const MAX: u8 = 253;

    pub fn new(id: u8) -> Option<Self> {
        if id <= Self::MAX {
            Some(Self(id))
        } else {
            None
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for ServoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Open { port: String, baud: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct DiscoveredServo {
    pub id: ServoId,
    pub model_number: u16,
    pub first_seen_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Sweep,
    Wave,
    Rotation,
}

/// Fields specific to one pattern kind. `direction` is `+1` or `-1`
/// throughout; nothing else in the crate assumes other magnitudes.
#[derive(Debug, Clone, Copy)]
pub enum KindState {
    Sweep {
        start_position: u16,
        end_position: u16,
        direction: i8,
    },
    Wave {
        center_position: u16,
        amplitude: u16,
        frequency_hz: f64,
        t0: Instant,
    },
    Rotation {
        direction: i8,
    },
}

impl KindState {
    pub fn kind(&self) -> PatternKind {
        match self {
            KindState::Sweep { .. } => PatternKind::Sweep,
            KindState::Wave { .. } => PatternKind::Wave,
            KindState::Rotation { .. } => PatternKind::Rotation,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AngleLimits {
    pub enabled: bool,
    pub min: u16,
    pub max: u16,
}

impl AngleLimits {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            min: 0,
            max: 4095,
        }
    }

    /// Clamps to the servo's physical range, then to the configured
    /// soft limits if enabled.
    pub fn clamp(&self, pos: i32) -> u16 {
        let pos = pos.clamp(0, 4095) as u16;
        if self.enabled {
            pos.clamp(self.min, self.max)
        } else {
            pos
        }
    }
}

/// One per actively-commanded servo.
#[derive(Debug, Clone)]
pub struct PatternRecord {
    pub state: KindState,
    pub speed: u16,
    pub acceleration: u8,
    pub cycles_target: i64,
    pub cycle_count: u64,
    pub current_position: u16,
    pub angle_limits: AngleLimits,
    pub last_telemetry: Option<TelemetrySnapshot>,
}

impl PatternRecord {
    pub fn kind(&self) -> PatternKind {
        self.state.kind()
    }

    /// A finite pattern (`cycles_target >= 0`) is done once `cycle_count`
    /// reaches its target; a negative target never completes.
    pub fn cycles_complete(&self) -> bool {
        self.cycles_target >= 0 && self.cycle_count >= self.cycles_target as u64
    }
}

/// The cooperative-cancellation triad plus the master run flag, all
/// guarded together by [`SessionState`]'s `pause_mutex`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub running: bool,
    pub paused: bool,
    pub immediate_stop: bool,
    pub emergency_stop: bool,
}

impl Flags {
    pub fn running_only() -> Self {
        Self {
            running: true,
            ..Default::default()
        }
    }
}

pub struct WorkerHandle {
    pub join: JoinHandle<()>,
    pub started_at: Instant,
}

impl WorkerHandle {
    pub fn is_live(&self) -> bool {
        !self.join.is_finished()
    }
}

#[derive(Default)]
struct StateInner {
    records: HashMap<ServoId, PatternRecord>,
    workers: HashMap<ServoId, WorkerHandle>,
}

/// Discovered map, pattern records, worker handles and the flag triad,
/// behind two separately-scoped locks.
pub struct SessionState {
    state: Mutex<StateInner>,
    pause: Mutex<HashMap<ServoId, Flags>>,
    discovered: Mutex<HashMap<ServoId, DiscoveredServo>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StateInner::default()),
            pause: Mutex::new(HashMap::new()),
            discovered: Mutex::new(HashMap::new()),
        }
    }

    // -- discovered map: single-writer (discover/disconnect), multi-reader --

    pub fn replace_discovered(&self, map: HashMap<ServoId, DiscoveredServo>) {
        *self.discovered.lock().expect("discovered mutex poisoned") = map;
    }

    pub fn discovered_snapshot(&self) -> HashMap<ServoId, DiscoveredServo> {
        self.discovered.lock().expect("discovered mutex poisoned").clone()
    }

    pub fn clear_discovered(&self) {
        self.discovered.lock().expect("discovered mutex poisoned").clear();
    }

    // -- state_mutex: membership of records and worker handles --

    pub fn insert_record(&self, id: ServoId, record: PatternRecord) {
        self.state
            .lock()
            .expect("state mutex poisoned")
            .records
            .insert(id, record);
    }

    pub fn remove_record(&self, id: ServoId) -> Option<PatternRecord> {
        self.state.lock().expect("state mutex poisoned").records.remove(&id)
    }

    pub fn record_snapshot(&self, id: ServoId) -> Option<PatternRecord> {
        self.state.lock().expect("state mutex poisoned").records.get(&id).cloned()
    }

    pub fn all_record_ids(&self) -> Vec<ServoId> {
        self.state.lock().expect("state mutex poisoned").records.keys().copied().collect()
    }

    pub fn with_record_mut<R>(&self, id: ServoId, f: impl FnOnce(&mut PatternRecord) -> R) -> Option<R> {
        let mut inner = self.state.lock().expect("state mutex poisoned");
        inner.records.get_mut(&id).map(f)
    }

    pub fn register_worker(&self, id: ServoId, handle: WorkerHandle) {
        self.state.lock().expect("state mutex poisoned").workers.insert(id, handle);
    }

    pub fn take_worker(&self, id: ServoId) -> Option<WorkerHandle> {
        self.state.lock().expect("state mutex poisoned").workers.remove(&id)
    }

    pub fn worker_is_live(&self, id: ServoId) -> bool {
        self.state
            .lock()
            .expect("state mutex poisoned")
            .workers
            .get(&id)
            .map(WorkerHandle::is_live)
            .unwrap_or(false)
    }

    /// ids with a record but either no worker handle or a finished one —
    /// the condition both the Supervisor and the on-demand repair
    /// operations look for.
    pub fn ids_needing_worker(&self) -> Vec<ServoId> {
        let inner = self.state.lock().expect("state mutex poisoned");
        inner
            .records
            .keys()
            .filter(|id| {
                !inner
                    .workers
                    .get(id)
                    .map(WorkerHandle::is_live)
                    .unwrap_or(false)
            })
            .copied()
            .collect()
    }

    /// Worker handles with no corresponding record: orphaned after a
    /// crashed stop path.
    pub fn orphaned_worker_ids(&self) -> Vec<ServoId> {
        let inner = self.state.lock().expect("state mutex poisoned");
        inner
            .workers
            .keys()
            .filter(|id| !inner.records.contains_key(id))
            .copied()
            .collect()
    }

    // -- pause_mutex: the flag triad, independent of record membership --

    pub fn init_flags(&self, id: ServoId, flags: Flags) {
        self.pause.lock().expect("pause mutex poisoned").insert(id, flags);
    }

    pub fn remove_flags(&self, id: ServoId) {
        self.pause.lock().expect("pause mutex poisoned").remove(&id);
    }

    pub fn flags(&self, id: ServoId) -> Option<Flags> {
        self.pause.lock().expect("pause mutex poisoned").get(&id).copied()
    }

    pub fn with_flags_mut<R>(&self, id: ServoId, f: impl FnOnce(&mut Flags) -> R) -> Option<R> {
        let mut pause = self.pause.lock().expect("pause mutex poisoned");
        pause.get_mut(&id).map(f)
    }

    pub fn set_running(&self, id: ServoId, running: bool) {
        self.with_flags_mut(id, |flags| flags.running = running);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_broadcast_id() {
        assert!(ServoId::new(254).is_none());
        assert!(ServoId::new(253).is_some());
    }

    #[test]
    fn angle_limits_clamp_when_enabled() {
        let limits = AngleLimits {
            enabled: true,
            min: 1000,
            max: 3000,
        };
        assert_eq!(limits.clamp(5000), 3000);
        assert_eq!(limits.clamp(0), 1000);
        assert_eq!(limits.clamp(2000), 2000);
    }

    #[test]
    fn angle_limits_only_clip_to_physical_range_when_disabled() {
        let limits = AngleLimits::disabled();
        assert_eq!(limits.clamp(-10), 0);
        assert_eq!(limits.clamp(5000), 4095);
    }

    #[test]
    fn ids_needing_worker_tracks_missing_and_finished_handles() {
        let state = SessionState::new();
        let id = ServoId::new(3).unwrap();
        state.insert_record(
            id,
            PatternRecord {
                state: KindState::Rotation { direction: 1 },
                speed: 100,
                acceleration: 50,
                cycles_target: -1,
                cycle_count: 0,
                current_position: 2048,
                angle_limits: AngleLimits::disabled(),
                last_telemetry: None,
            },
        );
        assert_eq!(state.ids_needing_worker(), vec![id]);

        let join = std::thread::spawn(|| {});
        join.join().unwrap();
        // A handle whose thread has already finished still counts as
        // "needing a worker": the Supervisor must treat it as dead.
        let join = std::thread::spawn(|| {});
        std::thread::sleep(std::time::Duration::from_millis(10));
        state.register_worker(
            id,
            WorkerHandle {
                join,
                started_at: Instant::now(),
            },
        );
        assert_eq!(state.ids_needing_worker(), vec![id]);
    }
}
