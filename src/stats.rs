//! Communication statistics — bookkeeping only, grounded in
//! `original_source/backend/app.py::get_communication_statistics`. Tracks
//! attempted vs. successful telemetry channel reads per servo since
//! connect and exposes the fraction that came back "N/A". Never gates a
//! control decision.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::servo::{ServoId, TelemetrySnapshot};

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    attempted: u64,
    successful: u64,
}

#[derive(Default)]
pub struct CommStats {
    per_servo: Mutex<HashMap<ServoId, Counters>>,
}

impl CommStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_snapshot(&self, id: ServoId, snapshot: &TelemetrySnapshot) {
        let mut map = self.per_servo.lock().expect("comm stats mutex poisoned");
        let counters = map.entry(id).or_default();
        counters.attempted += TelemetrySnapshot::CHANNEL_COUNT as u64;
        counters.successful += (TelemetrySnapshot::CHANNEL_COUNT - snapshot.na_count()) as u64;
    }

    /// Records a single-register health check (the Supervisor's in-band
    /// probe, not a full telemetry read). Kept as its own one-channel
    /// tally rather than folded into `record_snapshot`'s 12-channel one,
    /// so a supervisor tick that only reads position doesn't make the
    /// aggregate N/A rate look far worse than it is.
    pub fn record_health_check(&self, id: ServoId, succeeded: bool) {
        let mut map = self.per_servo.lock().expect("comm stats mutex poisoned");
        let counters = map.entry(id).or_default();
        counters.attempted += 1;
        counters.successful += succeeded as u64;
    }

    /// Fraction of telemetry channel reads that returned "N/A" since
    /// connect. `None` if nothing has been recorded yet for `id`.
    pub fn na_rate(&self, id: ServoId) -> Option<f64> {
        let map = self.per_servo.lock().expect("comm stats mutex poisoned");
        map.get(&id).map(|c| {
            if c.attempted == 0 {
                0.0
            } else {
                1.0 - (c.successful as f64 / c.attempted as f64)
            }
        })
    }

    pub fn clear(&self) {
        self.per_servo.lock().expect("comm stats mutex poisoned").clear();
    }

    pub fn snapshot(&self) -> HashMap<ServoId, f64> {
        let map = self.per_servo.lock().expect("comm stats mutex poisoned");
        map.iter()
            .map(|(id, c)| {
                let rate = if c.attempted == 0 {
                    0.0
                } else {
                    1.0 - (c.successful as f64 / c.attempted as f64)
                };
                (*id, rate)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn na_rate_reflects_missing_channels() {
        let stats = CommStats::new();
        let id = ServoId::new(1).unwrap();
        let mut snap = TelemetrySnapshot::empty(Instant::now());
        snap.position = Some(2048);
        stats.record_snapshot(id, &snap);

        let rate = stats.na_rate(id).unwrap();
        let expected = 1.0 - (1.0 / TelemetrySnapshot::CHANNEL_COUNT as f64);
        assert!((rate - expected).abs() < 1e-9);
    }

    #[test]
    fn na_rate_is_none_before_any_recording() {
        let stats = CommStats::new();
        assert_eq!(stats.na_rate(ServoId::new(2).unwrap()), None);
    }

    #[test]
    fn health_check_tallies_one_channel_at_a_time() {
        let stats = CommStats::new();
        let id = ServoId::new(3).unwrap();
        stats.record_health_check(id, true);
        stats.record_health_check(id, false);
        assert_eq!(stats.na_rate(id), Some(0.5));
    }
}
