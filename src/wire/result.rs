//! Transport-result classification.
//!
//! The Bus Arbiter is the only place that ever sees a raw I/O error, a
//! timeout, or a checksum mismatch; everything above it sees one of these
//! four outcomes.

/// The outcome of a single bus transaction, before any retry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransportResult {
    Success,
    /// Writing the instruction frame itself failed (port error).
    TxFail,
    /// No reply arrived within the per-frame timeout.
    RxTimeout,
    /// A reply arrived but failed header/length/checksum validation.
    RxCorrupt,
    /// The bus lock could not be acquired (reserved for future non-blocking
    /// callers; the blocking API never observes this today).
    Busy,
}

impl TransportResult {
    pub fn is_success(self) -> bool {
        matches!(self, TransportResult::Success)
    }
}
