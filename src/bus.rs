//! The Bus Arbiter.
//!
//! Owns the single serial endpoint and exposes typed, retrying operations.
//! Every call acquires one lock that covers TX, the RX window for the
//! expected reply, and any retry; no other code in the crate touches the
//! transport directly. Bus transactions must never interleave at the byte
//! level, and that is enforced structurally: `transact` is the sole function that
//! writes to or reads from the transport, and it always runs with the lock
//! held for its whole duration.

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::register::{RegisterAddress, RegisterWidth};
use crate::servo::ServoId;
use crate::transport::SerialTransport;
use crate::wire::{decode_status, encode_instruction, Instruction, StatusPacket, TransportResult};

const SINGLE_FRAME_TIMEOUT: Duration = Duration::from_millis(10);
const SYNC_FRAME_TIMEOUT: Duration = Duration::from_millis(20);

const READ_ATTEMPTS: u32 = 3;
const READ_BACKOFF: Duration = Duration::from_millis(50);
const WRITE_ATTEMPTS: u32 = 1;
const SYNC_WRITE_ATTEMPTS: u32 = 2;
const SYNC_WRITE_BACKOFF: Duration = Duration::from_millis(50);
const EEPROM_ATTEMPTS: u32 = 5;
const EEPROM_BACKOFF: Duration = Duration::from_millis(50);

pub struct BusArbiter {
    inner: Mutex<BusInner>,
}

struct BusInner {
    transport: Option<Box<dyn SerialTransport>>,
}

impl Default for BusArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl BusArbiter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusInner { transport: None }),
        }
    }

    pub fn attach(&self, transport: Box<dyn SerialTransport>) {
        let mut inner = self.inner.lock().expect("bus mutex poisoned");
        inner.transport = Some(transport);
    }

    pub fn detach(&self) {
        let mut inner = self.inner.lock().expect("bus mutex poisoned");
        inner.transport = None;
    }

    pub fn is_attached(&self) -> bool {
        self.inner.lock().expect("bus mutex poisoned").transport.is_some()
    }

    /// One TX + RX-with-expected-reply transaction, fully serialized by the
    /// bus lock. Returns `Busy` (never observed by today's blocking callers)
    /// if the transport has not been attached.
    fn transact(
        &self,
        id: u8,
        instr: Instruction,
        params: &[u8],
        timeout: Duration,
    ) -> (TransportResult, Option<StatusPacket>) {
        let mut inner = self.inner.lock().expect("bus mutex poisoned");
        let Some(transport) = inner.transport.as_mut() else {
            return (TransportResult::Busy, None);
        };

        transport.clear_input();
        let frame = encode_instruction(id, instr, params);
        if transport.write_all(&frame).is_err() {
            return (TransportResult::TxFail, None);
        }

        let mut head = [0u8; 4];
        if transport.read_exact_timeout(&mut head, timeout).is_err() {
            return (TransportResult::RxTimeout, None);
        }
        let len = head[3] as usize;
        let mut rest = vec![0u8; len];
        if transport.read_exact_timeout(&mut rest, timeout).is_err() {
            return (TransportResult::RxTimeout, None);
        }

        let mut full = Vec::with_capacity(4 + len);
        full.extend_from_slice(&head);
        full.extend_from_slice(&rest);

        match decode_status(&full) {
            Ok(status) if status.id == id => (TransportResult::Success, Some(status)),
            Ok(_) => (TransportResult::RxCorrupt, None),
            Err(_) => (TransportResult::RxCorrupt, None),
        }
    }

    /// A TX-only transaction (group sync write has no reply on the wire).
    fn transact_no_reply(&self, frame: &[u8]) -> TransportResult {
        let mut inner = self.inner.lock().expect("bus mutex poisoned");
        let Some(transport) = inner.transport.as_mut() else {
            return TransportResult::Busy;
        };
        if transport.write_all(frame).is_err() {
            TransportResult::TxFail
        } else {
            TransportResult::Success
        }
    }

    /// Generic `read_with_retry`/`write_with_retry` combinator: the retry
    /// policy lives here once instead of being repeated at every call site.
    fn with_retry<T>(
        &self,
        attempts: u32,
        backoff: Duration,
        mut op: impl FnMut() -> (TransportResult, Option<T>),
    ) -> (TransportResult, Option<T>) {
        let mut last = TransportResult::RxTimeout;
        for attempt in 0..attempts.max(1) {
            let (result, value) = op();
            if result.is_success() {
                return (result, value);
            }
            last = result;
            if attempt + 1 < attempts {
                thread::sleep(backoff);
            }
        }
        (last, None)
    }

    pub fn ping(&self, id: ServoId) -> (TransportResult, Option<u16>) {
        let (result, status) = self.transact(id.get(), Instruction::Ping, &[], SINGLE_FRAME_TIMEOUT);
        let model = status.and_then(|s| {
            if s.params.len() >= 2 {
                Some(u16::from_le_bytes([s.params[0], s.params[1]]))
            } else {
                None
            }
        });
        (result, model)
    }

    pub fn read_u8(&self, id: ServoId, reg: RegisterAddress) -> (TransportResult, Option<u8>) {
        debug_assert_eq!(reg.width, RegisterWidth::U8);
        self.with_retry(READ_ATTEMPTS, READ_BACKOFF, || {
            let (result, status) =
                self.transact(id.get(), Instruction::Read, &[reg.addr, 1], SINGLE_FRAME_TIMEOUT);
            let value = status.and_then(|s| s.params.first().copied());
            (result, value)
        })
    }

    pub fn read_u16(&self, id: ServoId, reg: RegisterAddress) -> (TransportResult, Option<u16>) {
        debug_assert_eq!(reg.width, RegisterWidth::U16);
        self.with_retry(READ_ATTEMPTS, READ_BACKOFF, || {
            let (result, status) =
                self.transact(id.get(), Instruction::Read, &[reg.addr, 2], SINGLE_FRAME_TIMEOUT);
            let value = status.and_then(|s| {
                if s.params.len() >= 2 {
                    Some(u16::from_le_bytes([s.params[0], s.params[1]]))
                } else {
                    None
                }
            });
            (result, value)
        })
    }

    pub fn write_u8(&self, id: ServoId, reg: RegisterAddress, value: u8) -> TransportResult {
        debug_assert_eq!(reg.width, RegisterWidth::U8);
        self.with_retry(WRITE_ATTEMPTS, Duration::ZERO, || {
            self.transact(id.get(), Instruction::Write, &[reg.addr, value], SINGLE_FRAME_TIMEOUT)
        })
        .0
    }

    pub fn write_u16(&self, id: ServoId, reg: RegisterAddress, value: u16) -> TransportResult {
        debug_assert_eq!(reg.width, RegisterWidth::U16);
        let [lo, hi] = value.to_le_bytes();
        self.with_retry(WRITE_ATTEMPTS, Duration::ZERO, || {
            self.transact(id.get(), Instruction::Write, &[reg.addr, lo, hi], SINGLE_FRAME_TIMEOUT)
        })
        .0
    }

    /// Writes acceleration, goal time (always 0: no interpolation target),
    /// goal position and goal speed in one contiguous block starting at
    /// `ACC`. This is the hold command for positional patterns when
    /// `speed == 0 && acc == 0`.
    pub fn write_pos_ex(&self, id: ServoId, pos: u16, speed: u16, acc: u8) -> TransportResult {
        let [pos_l, pos_h] = pos.to_le_bytes();
        let [speed_l, speed_h] = speed.to_le_bytes();
        let params = [
            crate::register::ACC.addr,
            acc,
            pos_l,
            pos_h,
            0,
            0,
            speed_l,
            speed_h,
        ];
        self.with_retry(WRITE_ATTEMPTS, Duration::ZERO, || {
            self.transact(id.get(), Instruction::Write, &params, SINGLE_FRAME_TIMEOUT)
        })
        .0
    }

    /// Switches the servo to wheel (continuous rotation) mode and issues a
    /// signed speed. Negative speeds are encoded on the wire as
    /// `|speed| + 1024`, matching the ST-series sign convention.
    pub fn write_spec(&self, id: ServoId, signed_speed: i32, acc: u8) -> TransportResult {
        let mode_result = self.write_u8(id, crate::register::MODE, crate::register::mode::WHEEL);
        if !mode_result.is_success() {
            return mode_result;
        }

        let encoded_speed: u16 = if signed_speed < 0 {
            (signed_speed.unsigned_abs() as u16).saturating_add(1024)
        } else {
            signed_speed as u16
        };
        let [speed_l, speed_h] = encoded_speed.to_le_bytes();
        let params = [crate::register::ACC.addr, acc, 0, 0, 0, 0, speed_l, speed_h];
        self.with_retry(WRITE_ATTEMPTS, Duration::ZERO, || {
            self.transact(id.get(), Instruction::Write, &params, SINGLE_FRAME_TIMEOUT)
        })
        .0
    }

    /// Torque-enable is re-asserted more aggressively than a plain register
    /// write because losing it silently leaves a servo un-holding.
    pub fn write_torque_enable(&self, id: ServoId, enabled: bool) -> TransportResult {
        self.with_retry(EEPROM_ATTEMPTS, EEPROM_BACKOFF, || {
            self.transact(
                id.get(),
                Instruction::Write,
                &[crate::register::TORQUE_ENABLE.addr, enabled as u8],
                SINGLE_FRAME_TIMEOUT,
            )
        })
        .0
    }

    pub fn unlock_eeprom(&self, id: ServoId) -> TransportResult {
        self.with_retry(EEPROM_ATTEMPTS, EEPROM_BACKOFF, || {
            self.transact(
                id.get(),
                Instruction::Write,
                &[crate::register::LOCK.addr, 0],
                SINGLE_FRAME_TIMEOUT,
            )
        })
        .0
    }

    pub fn lock_eeprom(&self, id: ServoId) -> TransportResult {
        self.with_retry(EEPROM_ATTEMPTS, EEPROM_BACKOFF, || {
            self.transact(
                id.get(),
                Instruction::Write,
                &[crate::register::LOCK.addr, 1],
                SINGLE_FRAME_TIMEOUT,
            )
        })
        .0
    }

    /// Raw group sync write of a single contiguous register block across
    /// multiple ids. `entry_width` is the per-id payload length in bytes
    /// (not counting the id byte itself). Retried up to twice with a 50ms
    /// backoff, per the bus's group-write retry policy; there is no reply
    /// to validate so the only failure mode visible here is `TxFail`.
    pub fn sync_write_raw(
        &self,
        start_addr: u8,
        entry_width: u8,
        entries: &[(u8, Vec<u8>)],
    ) -> TransportResult {
        let mut params = Vec::with_capacity(2 + entries.len() * (1 + entry_width as usize));
        params.push(start_addr);
        params.push(entry_width);
        for (id, data) in entries {
            debug_assert_eq!(data.len(), entry_width as usize);
            params.push(*id);
            params.extend_from_slice(data);
        }
        let frame = encode_instruction(crate::wire::BROADCAST_ID, Instruction::SyncWrite, &params);

        self.with_retry(SYNC_WRITE_ATTEMPTS, SYNC_WRITE_BACKOFF, || {
            (self.transact_no_reply(&frame), Some(()))
        })
        .0
    }

    pub fn sync_frame_timeout() -> Duration {
        SYNC_FRAME_TIMEOUT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;

    fn attached_bus() -> (BusArbiter, &'static str) {
        let bus = BusArbiter::new();
        (bus, "")
    }

    fn status_bytes(id: u8, error: u8, params: &[u8]) -> Vec<u8> {
        let len = (params.len() + 2) as u8;
        let mut buf = vec![0xFF, 0xFF, id, len, error];
        buf.extend_from_slice(params);
        let sum: u32 = id as u32 + len as u32 + error as u32
            + params.iter().map(|&b| b as u32).sum::<u32>();
        buf.push(!(sum as u8));
        buf
    }

    #[test]
    fn ping_reports_busy_when_not_attached() {
        let (bus, _) = attached_bus();
        let (result, model) = bus.ping(ServoId::new(1).unwrap());
        assert_eq!(result, TransportResult::Busy);
        assert_eq!(model, None);
    }

    #[test]
    fn read_u8_retries_three_times_then_gives_up() {
        let bus = BusArbiter::new();
        let mut fake = FakeTransport::new();
        for _ in 0..3 {
            fake.push_timeout();
        }
        bus.attach(Box::new(fake));

        let (result, value) = bus.read_u8(ServoId::new(1).unwrap(), crate::register::PRESENT_VOLTAGE);
        assert_eq!(result, TransportResult::RxTimeout);
        assert_eq!(value, None);
    }

    #[test]
    fn read_u8_succeeds_on_second_attempt() {
        let bus = BusArbiter::new();
        let mut fake = FakeTransport::new();
        fake.push_timeout();
        fake.push_reply(status_bytes(1, 0, &[0x7B]));
        bus.attach(Box::new(fake));

        let (result, value) = bus.read_u8(ServoId::new(1).unwrap(), crate::register::PRESENT_VOLTAGE);
        assert_eq!(result, TransportResult::Success);
        assert_eq!(value, Some(0x7B));
    }

    #[test]
    fn write_pos_ex_round_trips_through_fake_transport() {
        let bus = BusArbiter::new();
        let mut fake = FakeTransport::new();
        fake.push_reply(status_bytes(1, 0, &[]));
        bus.attach(Box::new(fake));

        let result = bus.write_pos_ex(ServoId::new(1).unwrap(), 2048, 200, 50);
        assert_eq!(result, TransportResult::Success);
    }

    #[test]
    fn sync_write_raw_retries_on_tx_failure() {
        // A transport that never receives a reply is fine for sync writes;
        // only TxFail should trigger the retry loop (there is no RX phase).
        let bus = BusArbiter::new();
        let fake = FakeTransport::new();
        bus.attach(Box::new(fake));

        let result =
            bus.sync_write_raw(crate::register::ACC.addr, 2, &[(1, vec![0x00, 0x08])]);
        assert_eq!(result, TransportResult::Success);
    }
}
