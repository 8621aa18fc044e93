//! NXT system commands for the brick's flash filesystem.

use super::frame::read_u16_le;
use super::{Command, CommandClass, Field};
use crate::checks::ResponseChecks;
use crate::errors::{ProtocolError, ValidationError};
use crate::filename::Filename;

pub const WRITE: u8 = 0x83;
pub const CLOSE: u8 = 0x84;
pub const DELETE: u8 = 0x85;
pub const OPEN_WRITE_LINEAR: u8 = 0x89;

/// Largest payload a single write carries: a 64 byte USB packet minus the
/// three header bytes.
pub const MAX_WRITE_CHUNK: usize = 61;

/// Opens a linear file of known size for writing; replies with a handle
#[derive(Debug, Clone)]
pub struct OpenWriteLinear {
    pub name: Filename,
    pub size: u32,
}

impl Command for OpenWriteLinear {
    type Response = u8;
    const CLASS: CommandClass = CommandClass::System;
    const OPCODE: u8 = OPEN_WRITE_LINEAR;
    const REPLY_LEN: usize = 4;

    fn fields(&self) -> Vec<Field> {
        vec![Field::Str(self.name.to_string()), Field::Long(self.size)]
    }

    fn decode_reply(reply: &[u8]) -> Result<u8, ProtocolError> {
        reply.get(3).copied().ok_or(ProtocolError::ShortResponse {
            expected: 4,
            actual: reply.len(),
        })
    }
}

/// Appends up to 61 bytes to an open file; replies with the count written
#[derive(Debug, Clone)]
pub struct Write<'a> {
    handle: u8,
    data: &'a [u8],
}

impl<'a> Write<'a> {
    pub fn new(handle: u8, data: &'a [u8]) -> Result<Self, ValidationError> {
        if data.len() > MAX_WRITE_CHUNK {
            return Err(ValidationError::ChunkTooLarge(data.len()));
        }
        Ok(Write { handle, data })
    }
}

impl<'a> Command for Write<'a> {
    type Response = u16;
    const CLASS: CommandClass = CommandClass::System;
    const OPCODE: u8 = WRITE;
    const REPLY_LEN: usize = 6;

    fn fields(&self) -> Vec<Field> {
        vec![Field::Byte(self.handle), Field::Raw(self.data.to_vec())]
    }

    fn decode_reply(reply: &[u8]) -> Result<u16, ProtocolError> {
        read_u16_le(reply, 4)
    }
}

/// Closes a file handle
#[derive(Debug, Clone, Copy)]
pub struct Close(pub u8);

impl Command for Close {
    type Response = ();
    const CLASS: CommandClass = CommandClass::System;
    const OPCODE: u8 = CLOSE;
    const REPLY_LEN: usize = 4;

    fn fields(&self) -> Vec<Field> {
        vec![Field::Byte(self.0)]
    }

    fn decode_reply(_reply: &[u8]) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Deletes a file. The reply is read but not checked, so deleting a file
/// that does not exist is not an error.
#[derive(Debug, Clone)]
pub struct Delete(pub Filename);

impl Command for Delete {
    type Response = ();
    const CLASS: CommandClass = CommandClass::System;
    const OPCODE: u8 = DELETE;
    const REPLY_LEN: usize = 23;
    const CHECKS: ResponseChecks = ResponseChecks::NONE;

    fn fields(&self) -> Vec<Field> {
        vec![Field::Str(self.0.to_string())]
    }

    fn decode_reply(_reply: &[u8]) -> Result<(), ProtocolError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_write_linear_layout() {
        let cmd = OpenWriteLinear {
            name: Filename::new("pong.rxe", None).unwrap(),
            size: 1000,
        };
        let bytes = cmd.frame(true).encode().unwrap();
        assert_eq!(&bytes[..2], &[0x01, 0x89]);
        assert_eq!(&bytes[2..10], b"pong.rxe");
        assert_eq!(&bytes[22..], &1000u32.to_le_bytes());
        assert_eq!(OpenWriteLinear::decode_reply(&[0x02, 0x89, 0x00, 0x05]).unwrap(), 5);
    }

    #[test]
    fn writes_fill_one_usb_packet() {
        let data = [0xAAu8; MAX_WRITE_CHUNK];
        let bytes = Write::new(3, &data).unwrap().frame(true).encode().unwrap();
        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[..3], &[0x01, 0x83, 0x03]);
        assert_eq!(
            Write::new(3, &[0u8; 62]).unwrap_err(),
            ValidationError::ChunkTooLarge(62)
        );
    }
}
