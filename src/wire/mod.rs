//! Frame encoding, checksum computation and transport-result classification
//! for the ST-series control-table protocol.
//!
//! This owns the only place in the crate that assembles or parses raw
//! bytes; everything above [`crate::bus`] deals exclusively in typed
//! register reads/writes.

mod frame;
mod result;

pub use frame::{decode_status, encode_instruction, Instruction, StatusPacket};
pub use result::TransportResult;

pub const HEADER: [u8; 2] = [0xFF, 0xFF];
pub const BROADCAST_ID: u8 = 0xFE;
