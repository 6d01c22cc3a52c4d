//! Group sync writer.
//!
//! Batches a position or speed command for many servos into one TX frame.
//! Both writers go through [`BusArbiter::sync_write_raw`], so a batch can
//! never interleave with an in-flight single-register transaction; they
//! are constructed once per connection and held for its lifetime (the
//! "shared writer instance" supplement), rather than rebuilt per call.

use std::sync::Arc;

use log::warn;

use crate::bus::BusArbiter;
use crate::register;
use crate::servo::ServoId;
use crate::wire::TransportResult;

#[derive(Debug, Clone, Copy)]
pub struct PositionEntry {
    pub id: ServoId,
    pub pos: u16,
    pub speed: u16,
    pub acc: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct SpeedEntry {
    pub id: ServoId,
    pub signed_speed: i32,
}

/// Outcome of one batched write. Partial-membership: a batch is considered
/// successful overall if at least one id was actually committed.
#[derive(Debug, Clone)]
pub struct GroupWriteReport {
    pub included: Vec<ServoId>,
    pub excluded: Vec<ServoId>,
    pub transport_result: TransportResult,
}

impl GroupWriteReport {
    pub fn success(&self) -> bool {
        !self.included.is_empty() && self.transport_result.is_success()
    }
}

fn encode_position_entry(entry: &PositionEntry) -> Option<(u8, Vec<u8>)> {
    if entry.pos > 4095 {
        return None;
    }
    let [pos_l, pos_h] = entry.pos.to_le_bytes();
    let [speed_l, speed_h] = entry.speed.to_le_bytes();
    Some((
        entry.id.get(),
        vec![entry.acc, pos_l, pos_h, 0, 0, speed_l, speed_h],
    ))
}

fn encode_speed_entry(entry: &SpeedEntry) -> Option<(u8, Vec<u8>)> {
    let encoded: u16 = if entry.signed_speed < 0 {
        let magnitude = entry.signed_speed.unsigned_abs();
        if magnitude > 1023 {
            return None;
        }
        (magnitude as u16).saturating_add(1024)
    } else {
        if entry.signed_speed > 1023 {
            return None;
        }
        entry.signed_speed as u16
    };
    let [speed_l, speed_h] = encoded.to_le_bytes();
    Some((entry.id.get(), vec![0, 0, 0, 0, speed_l, speed_h]))
}

pub struct GroupSyncWriter {
    bus: Arc<BusArbiter>,
}

impl GroupSyncWriter {
    pub fn new(bus: Arc<BusArbiter>) -> Self {
        Self { bus }
    }

    pub fn write_positions(&self, entries: &[PositionEntry]) -> GroupWriteReport {
        let mut included = Vec::new();
        let mut excluded = Vec::new();
        let mut frame_entries = Vec::new();
        for entry in entries {
            match encode_position_entry(entry) {
                Some(encoded) => {
                    included.push(entry.id);
                    frame_entries.push(encoded);
                }
                None => {
                    warn!("servo {}: dropped from position sync batch (out of range)", entry.id);
                    excluded.push(entry.id);
                }
            }
        }
        let transport_result = if frame_entries.is_empty() {
            TransportResult::Success
        } else {
            self.bus.sync_write_raw(register::ACC.addr, 7, &frame_entries)
        };
        GroupWriteReport {
            included,
            excluded,
            transport_result,
        }
    }

    pub fn write_speeds(&self, entries: &[SpeedEntry]) -> GroupWriteReport {
        let mut included = Vec::new();
        let mut excluded = Vec::new();
        let mut frame_entries = Vec::new();
        for entry in entries {
            match encode_speed_entry(entry) {
                Some(encoded) => {
                    included.push(entry.id);
                    frame_entries.push(encoded);
                }
                None => {
                    warn!("servo {}: dropped from speed sync batch (out of range)", entry.id);
                    excluded.push(entry.id);
                }
            }
        }
        let transport_result = if frame_entries.is_empty() {
            TransportResult::Success
        } else {
            self.bus.sync_write_raw(register::ACC.addr, 6, &frame_entries)
        };
        GroupWriteReport {
            included,
            excluded,
            transport_result,
        }
    }
}

/// Both writers, constructed together on connect and held for the
/// connection's lifetime.
pub struct GroupSyncWriters {
    pub positions: GroupSyncWriter,
    pub speeds: GroupSyncWriter,
}

impl GroupSyncWriters {
    pub fn new(bus: Arc<BusArbiter>) -> Self {
        Self {
            positions: GroupSyncWriter::new(bus.clone()),
            speeds: GroupSyncWriter::new(bus),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;

    #[test]
    fn out_of_range_position_is_excluded_but_batch_still_sends() {
        let bus = Arc::new(BusArbiter::new());
        bus.attach(Box::new(FakeTransport::new()));
        let writer = GroupSyncWriter::new(bus);

        let good = ServoId::new(1).unwrap();
        let bad = ServoId::new(2).unwrap();
        let report = writer.write_positions(&[
            PositionEntry {
                id: good,
                pos: 2048,
                speed: 200,
                acc: 50,
            },
            PositionEntry {
                id: bad,
                pos: 9000,
                speed: 200,
                acc: 50,
            },
        ]);

        assert_eq!(report.included, vec![good]);
        assert_eq!(report.excluded, vec![bad]);
        assert!(report.success());
    }

    #[test]
    fn all_entries_excluded_is_not_a_failure_but_is_not_a_success_either() {
        let bus = Arc::new(BusArbiter::new());
        bus.attach(Box::new(FakeTransport::new()));
        let writer = GroupSyncWriter::new(bus);

        let bad = ServoId::new(2).unwrap();
        let report = writer.write_positions(&[PositionEntry {
            id: bad,
            pos: 9000,
            speed: 0,
            acc: 0,
        }]);

        assert!(!report.success());
    }
}
