//! The PIC bootloader packet protocol spoken by VEX controllers.
//!
//! Packets go out as `SI SI <escaped opcode, payload, checksum> EOT`. Inside
//! the escaped region any SI, EOT or ESC byte is preceded by ESC.

use tracing::{debug, info};

use crate::config::Config;
use crate::devices::{hex_dump, Channel};
use crate::errors::{BrickError, ProtocolError, TransportError, ValidationError};
use crate::meta::BootloaderVersion;

/// Start of packet, sent twice
pub const SI: u8 = 0x0F;
/// End of packet
pub const EOT: u8 = 0x04;
/// Escapes the next byte
pub const ESC: u8 = 0x05;

pub const GET_BOOTLOADER_VERSION: u8 = 0x00;
pub const READ_PROGRAM_MEMORY: u8 = 0x01;
pub const WRITE_PROGRAM_MEMORY: u8 = 0x02;
pub const RETURN_TO_USER_CODE: u8 = 0x08;
pub const ERASE_PROGRAM_MEMORY: u8 = 0x09;

/// Return-to-user-code replies end with this instead of EOT
pub const USER_CODE_TERMINATOR: u8 = 0x40;

/// Backstop on the length of any reply
pub const MAX_RESPONSE: usize = 255;

/// Echoed header ahead of read-program-memory data: SI SI opcode len and
/// the address
pub const READ_HEADER: usize = 7;
/// Largest read-program-memory request whose reply, header, checksum and
/// EOT included, stays within `MAX_RESPONSE`
pub const MAX_READ: usize = MAX_RESPONSE - READ_HEADER - 2;

/// Bytes per write block
pub const WRITE_BLOCK: usize = 8;
/// Write blocks that fit one packet
pub const MAX_WRITE_BLOCKS: usize = 31;
/// Bytes per erase block
pub const ERASE_BLOCK: u32 = 64;
/// Erase blocks per request. A count of 256 reads as zero and idles the
/// controller, so requests stay well below it.
pub const MAX_ERASE_BLOCKS: u32 = 128;

/// First writable program address
pub const PROGRAM_START: u32 = 0x0800;
/// Last writable program address
pub const PROGRAM_END: u32 = 0x7ffd;

/// Two's complement of the byte sum, so the sum of everything including the
/// checksum is zero mod 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |sum, b| sum.wrapping_add(*b))
        .wrapping_neg()
}

fn is_special(byte: u8) -> bool {
    matches!(byte, SI | EOT | ESC)
}

/// Prefixes every SI, EOT and ESC with ESC.
pub fn escape(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() * 2);
    for &b in bytes {
        if is_special(b) {
            out.push(ESC);
        }
        out.push(b);
    }
    out
}

/// Reverses `escape`: an ESC is dropped and the byte after it kept verbatim.
pub fn unescape(wire: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(wire.len());
    let mut bytes = wire.iter();
    while let Some(&b) = bytes.next() {
        if b == ESC {
            if let Some(&literal) = bytes.next() {
                out.push(literal);
            }
        } else {
            out.push(b);
        }
    }
    out
}

/// Splits a 24 bit address into little-endian bytes.
pub fn address_bytes(address: u32) -> [u8; 3] {
    let [lo, mid, hi, _] = address.to_le_bytes();
    [lo, mid, hi]
}

/// One bootloader command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PicPacket {
    pub opcode: u8,
    pub payload: Vec<u8>,
}

impl PicPacket {
    pub fn new(opcode: u8, payload: Vec<u8>) -> Self {
        PicPacket { opcode, payload }
    }

    /// The wire encoding: header, escaped body and checksum, trailer.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.payload.len() + 2);
        body.push(self.opcode);
        body.extend_from_slice(&self.payload);
        body.push(checksum(&body));

        let mut wire = vec![SI, SI];
        wire.extend(escape(&body));
        wire.push(EOT);
        wire
    }
}

/// One erase request: `blocks` erase blocks starting at `address`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseChunk {
    pub address: u32,
    pub blocks: u32,
}

/// Splits the erase of `[start, end]` into requests of at most 128 blocks.
pub fn erase_chunks(start: u32, end: u32) -> Vec<EraseChunk> {
    let mut remaining = end.saturating_sub(start) / ERASE_BLOCK + 1;
    let mut address = start;
    let mut chunks = Vec::new();
    while remaining > 0 {
        let blocks = remaining.min(MAX_ERASE_BLOCKS);
        chunks.push(EraseChunk { address, blocks });
        remaining -= blocks;
        address += blocks * ERASE_BLOCK;
    }
    chunks
}

/// Rejects program ranges outside the writable window.
pub fn check_program_range(start: u32, end: u32) -> Result<(), ValidationError> {
    if start < PROGRAM_START || end > PROGRAM_END || end < start {
        return Err(ValidationError::ProgramRange {
            start,
            end,
            valid_start: PROGRAM_START,
            valid_end: PROGRAM_END,
        });
    }
    Ok(())
}

/// A PIC bootloader reachable over `C`.
pub struct PicProtocol<C: Channel> {
    channel: C,
    debug: bool,
}

impl<C: Channel> PicProtocol<C> {
    pub fn new(channel: C, config: &Config) -> Self {
        PicProtocol {
            channel,
            debug: config.debug,
        }
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Drains stray input and closes the underlying channel.
    pub fn close(mut self) -> Result<(), BrickError> {
        self.channel.drain()?;
        self.channel.close()?;
        Ok(())
    }

    fn send_packet(&mut self, packet: &PicPacket) -> Result<(), BrickError> {
        let wire = packet.encode();
        if self.debug {
            debug!(opcode = packet.opcode, "pic packet [{}]", hex_dump(&wire));
        }
        let written = self.channel.send(&wire)?;
        if written != wire.len() {
            return Err(ProtocolError::ShortWrite {
                expected: wire.len(),
                actual: written,
            }
            .into());
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8, BrickError> {
        let byte = self.channel.recv(1)?;
        Ok(*byte.first().ok_or(TransportError::Closed)?)
    }

    /// Reads one reply a byte at a time, unescaping as it goes, up to and
    /// including the first unescaped `terminator`.
    pub fn read_response(&mut self, terminator: u8) -> Result<Vec<u8>, BrickError> {
        let mut response = Vec::new();
        while response.len() < MAX_RESPONSE {
            let byte = self.read_byte()?;
            if byte == ESC {
                let literal = self.read_byte()?;
                response.push(literal);
                continue;
            }
            response.push(byte);
            if byte == terminator {
                if self.debug {
                    debug!("pic reply [{}]", hex_dump(&response));
                }
                return Ok(response);
            }
        }
        Err(ProtocolError::Unterminated(response.len()).into())
    }

    fn exchange(&mut self, packet: &PicPacket, terminator: u8) -> Result<Vec<u8>, BrickError> {
        self.send_packet(packet)?;
        self.read_response(terminator)
    }

    pub fn bootloader_version(&mut self) -> Result<BootloaderVersion, BrickError> {
        let response = self.exchange(&PicPacket::new(GET_BOOTLOADER_VERSION, vec![0x02]), EOT)?;
        match (response.get(4), response.get(5)) {
            (Some(&major), Some(&minor)) => Ok(BootloaderVersion { major, minor }),
            _ => Err(ProtocolError::ShortResponse {
                expected: 6,
                actual: response.len(),
            }
            .into()),
        }
    }

    /// Reads `len` bytes of program memory at `address`. At most
    /// `MAX_READ` bytes per request.
    pub fn read_program_memory(&mut self, address: u32, len: u8) -> Result<Vec<u8>, BrickError> {
        if len as usize > MAX_READ {
            return Err(ValidationError::ReadTooLong {
                requested: len as usize,
                max: MAX_READ,
            }
            .into());
        }

        let mut payload = vec![len];
        payload.extend_from_slice(&address_bytes(address));
        let response = self.exchange(&PicPacket::new(READ_PROGRAM_MEMORY, payload), EOT)?;

        let end = READ_HEADER + len as usize;
        match response.get(READ_HEADER..end) {
            Some(data) => Ok(data.to_vec()),
            None => Err(ProtocolError::ShortResponse {
                expected: end,
                actual: response.len(),
            }
            .into()),
        }
    }

    /// Writes whole 8 byte blocks at `address`, at most 31 per call.
    pub fn write_program_memory(&mut self, address: u32, data: &[u8]) -> Result<(), BrickError> {
        let blocks = data.len() / WRITE_BLOCK;
        if blocks > MAX_WRITE_BLOCKS {
            return Err(ValidationError::TooManyBlocks(blocks).into());
        }
        if data.len() != blocks * WRITE_BLOCK {
            return Err(ValidationError::BlockData {
                blocks,
                expected: blocks * WRITE_BLOCK,
                actual: data.len(),
            }
            .into());
        }

        let mut payload = Vec::with_capacity(4 + data.len());
        payload.push(blocks as u8);
        payload.extend_from_slice(&address_bytes(address));
        payload.extend_from_slice(data);
        self.exchange(&PicPacket::new(WRITE_PROGRAM_MEMORY, payload), EOT)?;
        Ok(())
    }

    /// Erases `[start, end]` in requests of at most 128 erase blocks.
    pub fn erase_program_memory(&mut self, start: u32, end: u32) -> Result<(), BrickError> {
        check_program_range(start, end)?;

        for chunk in erase_chunks(start, end) {
            info!(address = chunk.address, blocks = chunk.blocks, "erasing");
            let mut payload = vec![chunk.blocks as u8];
            payload.extend_from_slice(&address_bytes(chunk.address));
            payload.push(0);
            self.exchange(&PicPacket::new(ERASE_PROGRAM_MEMORY, payload), EOT)?;
        }
        Ok(())
    }

    /// Leaves the bootloader and starts the user program.
    pub fn return_to_user_code(&mut self) -> Result<(), BrickError> {
        self.exchange(
            &PicPacket::new(RETURN_TO_USER_CODE, vec![USER_CODE_TERMINATOR]),
            USER_CODE_TERMINATOR,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::mock::ScriptedChannel;
    use crate::devices::TransportKind;
    use proptest::prelude::*;

    fn pic(stream: &[u8]) -> (PicProtocol<ScriptedChannel>, std::rc::Rc<std::cell::RefCell<crate::devices::mock::Log>>) {
        let (channel, log) = ScriptedChannel::new(TransportKind::Serial);
        (PicProtocol::new(channel.reply(stream), &Config::default()), log)
    }

    proptest! {
        #[test]
        fn escaping_round_trips(payload in proptest::collection::vec(any::<u8>(), 0..300)) {
            prop_assert_eq!(unescape(&escape(&payload)), payload);
        }

        #[test]
        fn checksums_zero_the_sum(opcode in any::<u8>(), payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            let mut body = vec![opcode];
            body.extend_from_slice(&payload);
            let total = body.iter().fold(checksum(&body), |sum, b| sum.wrapping_add(*b));
            prop_assert_eq!(total, 0);
        }

        #[test]
        fn escaped_bodies_hold_no_bare_framing_bytes(payload in proptest::collection::vec(any::<u8>(), 0..64)) {
            let wire = PicPacket::new(WRITE_PROGRAM_MEMORY, payload).encode();
            let body = &wire[2..wire.len() - 1];
            let mut escaped = false;
            for &b in body {
                if escaped {
                    escaped = false;
                } else if b == ESC {
                    escaped = true;
                } else {
                    prop_assert!(b != SI && b != EOT);
                }
            }
        }
    }

    #[test]
    fn special_bytes_are_escaped() {
        assert_eq!(
            escape(&[0x0F, 0x04, 0x05, 0x10]),
            vec![0x05, 0x0F, 0x05, 0x04, 0x05, 0x05, 0x10]
        );
    }

    #[test]
    fn version_packet_layout() {
        assert_eq!(
            PicPacket::new(GET_BOOTLOADER_VERSION, vec![0x02]).encode(),
            vec![0x0F, 0x0F, 0x00, 0x02, 0xFE, 0x04]
        );
    }

    #[test]
    fn erase_never_requests_256_blocks() {
        let start = PROGRAM_START;
        let end = start + 299 * ERASE_BLOCK;
        let chunks = erase_chunks(start, end);
        let blocks: Vec<u32> = chunks.iter().map(|c| c.blocks).collect();
        assert_eq!(blocks, vec![128, 128, 44]);
        assert_eq!(chunks[1].address, start + 128 * 64);
        assert_eq!(chunks[2].address, start + 256 * 64);
    }

    #[test]
    fn escaped_terminators_do_not_end_a_reply() {
        let (mut pic, log) = pic(&[0x0F, 0x0F, 0x00, 0x02, 0x05, 0x04, 0x01, 0xF5, 0x04]);
        let version = pic.bootloader_version().unwrap();
        assert_eq!(version, BootloaderVersion { major: 4, minor: 1 });
        assert_eq!(log.borrow().sent.len(), 1);
    }

    #[test]
    fn return_to_user_code_stops_at_0x40() {
        let (mut pic, log) = pic(&[0x0F, 0x0F, 0x08, 0x05, 0x40, 0x40, 0x04]);
        pic.return_to_user_code().unwrap();
        assert_eq!(log.borrow().sent[0], vec![0x0F, 0x0F, 0x08, 0x40, 0xB8, 0x04]);
    }

    #[test]
    fn runaway_replies_hit_the_backstop() {
        let (mut pic, _log) = pic(&[0x00; 300]);
        assert!(matches!(
            pic.read_response(EOT),
            Err(BrickError::Protocol(ProtocolError::Unterminated(MAX_RESPONSE)))
        ));
    }

    #[test]
    fn oversized_writes_are_rejected_before_sending() {
        let (mut pic, log) = pic(&[]);
        let data = vec![0u8; 32 * WRITE_BLOCK];
        assert!(matches!(
            pic.write_program_memory(PROGRAM_START, &data),
            Err(BrickError::Validation(ValidationError::TooManyBlocks(32)))
        ));
        assert!(matches!(
            pic.write_program_memory(PROGRAM_START, &[0u8; 7]),
            Err(BrickError::Validation(ValidationError::BlockData { .. }))
        ));
        assert!(log.borrow().sent.is_empty());
    }

    #[test]
    fn erase_rejects_ranges_outside_the_window() {
        let (mut pic, log) = pic(&[]);
        assert!(pic.erase_program_memory(0x0700, 0x0900).is_err());
        assert!(pic.erase_program_memory(0x0800, 0x7ffe).is_err());
        assert!(log.borrow().sent.is_empty());
    }

    #[test]
    fn reads_up_to_the_reply_limit() {
        let len = MAX_READ as u8;
        assert_eq!(len, 246);
        let mut stream = vec![SI, SI, READ_PROGRAM_MEMORY, len, 0x00, 0x08, 0x00];
        stream.extend(std::iter::repeat(0x11).take(MAX_READ));
        stream.extend_from_slice(&[0x22, EOT]);
        let (mut full, _log) = pic(&stream);
        assert_eq!(full.read_program_memory(0x0800, len).unwrap(), vec![0x11; MAX_READ]);

        let (mut over, log) = pic(&[]);
        assert!(matches!(
            over.read_program_memory(0x0800, len + 1),
            Err(BrickError::Validation(ValidationError::ReadTooLong { requested: 247, max: 246 }))
        ));
        assert!(log.borrow().sent.is_empty());
    }

    #[test]
    fn read_program_memory_skips_the_echo() {
        let (mut pic, _log) = pic(&[0x0F, 0x0F, 0x01, 0x02, 0x00, 0x08, 0x00, 0xAB, 0xCD, 0x7D, 0x04]);
        assert_eq!(pic.read_program_memory(0x0800, 2).unwrap(), vec![0xAB, 0xCD]);
    }
}
