//! Instruction/status packet framing.
//!
//! Wire shape: `0xFF 0xFF <id> <len> <instr|error> <params...> <checksum>`
//! where `len = params.len() + 2` and
//! `checksum = !(id + len + instr_or_error + sum(params)) & 0xFF`.

use super::HEADER;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    RegWrite = 0x04,
    Action = 0x05,
    SyncWrite = 0x83,
}

/// Build a complete instruction frame ready to write to the wire.
pub fn encode_instruction(id: u8, instr: Instruction, params: &[u8]) -> Vec<u8> {
    let len = (params.len() + 2) as u8;
    let mut frame = Vec::with_capacity(6 + params.len());
    frame.extend_from_slice(&HEADER);
    frame.push(id);
    frame.push(len);
    frame.push(instr as u8);
    frame.extend_from_slice(params);
    frame.push(checksum(id, len, instr as u8, params));
    frame
}

fn checksum(id: u8, len: u8, instr_or_err: u8, params: &[u8]) -> u8 {
    let sum: u32 = id as u32 + len as u32 + instr_or_err as u32
        + params.iter().map(|&b| b as u32).sum::<u32>();
    !(sum as u8)
}

/// A parsed status (reply) packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPacket {
    pub id: u8,
    pub error: u8,
    pub params: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    TooShort,
    BadHeader,
    BadLength,
    ChecksumMismatch,
}

/// Parse a complete status packet from `buf`. `buf` must contain exactly one
/// packet (the Bus Arbiter reads the header and length before deciding how
/// many more bytes to pull off the wire).
pub fn decode_status(buf: &[u8]) -> Result<StatusPacket, DecodeError> {
    if buf.len() < 6 {
        return Err(DecodeError::TooShort);
    }
    if buf[0] != HEADER[0] || buf[1] != HEADER[1] {
        return Err(DecodeError::BadHeader);
    }
    let id = buf[2];
    let len = buf[3];
    if buf.len() != 4 + len as usize {
        return Err(DecodeError::BadLength);
    }
    let error = buf[4];
    let params_end = buf.len() - 1;
    let params = buf[5..params_end].to_vec();
    let expected = checksum(id, len, error, &params);
    let actual = buf[buf.len() - 1];
    if expected != actual {
        return Err(DecodeError::ChecksumMismatch);
    }
    Ok(StatusPacket { id, error, params })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_ping_frame() {
        let frame = encode_instruction(1, Instruction::Ping, &[]);
        assert_eq!(frame, vec![0xFF, 0xFF, 0x01, 0x02, 0x01, 0xFB]);
    }

    #[test]
    fn encodes_write_frame_with_params() {
        let frame = encode_instruction(5, Instruction::Write, &[0x28, 0x01]);
        // len = 2 params + 2 = 4
        let expected_checksum = !(5u32 + 4 + 0x03 + 0x28 + 0x01) as u8;
        assert_eq!(frame[3], 4);
        assert_eq!(*frame.last().unwrap(), expected_checksum);
    }

    #[test]
    fn round_trips_status_packet() {
        let id = 3u8;
        let error = 0u8;
        let params = vec![0x12, 0x34];
        let len = (params.len() + 2) as u8;
        let mut buf = vec![0xFF, 0xFF, id, len, error];
        buf.extend_from_slice(&params);
        buf.push(checksum(id, len, error, &params));

        let decoded = decode_status(&buf).unwrap();
        assert_eq!(decoded.id, id);
        assert_eq!(decoded.error, error);
        assert_eq!(decoded.params, params);
    }

    #[test]
    fn rejects_corrupt_checksum() {
        let mut buf = vec![0xFF, 0xFF, 1, 2, 0, 0x00];
        buf[5] ^= 0xFF;
        assert_eq!(decode_status(&buf), Err(DecodeError::ChecksumMismatch));
    }

    #[test]
    fn rejects_bad_header() {
        let buf = vec![0x00, 0x00, 1, 2, 0, 0xFC];
        assert_eq!(decode_status(&buf), Err(DecodeError::BadHeader));
    }
}
