//! Typed NXT command frames and the little-endian helpers they use.

use crate::errors::{ProtocolError, ValidationError};

/// Width of a string field: 19 characters and a terminating NUL
pub const STRING_FIELD_LEN: usize = 20;

/// Bit OR'd into byte 0 to ask the brick not to reply
pub const NO_RESPONSE: u8 = 0x80;

/// Byte 0 of every NXT reply
pub const REPLY_MARKER: u8 = 0x02;

/// The two NXT command classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandClass {
    /// Runtime control: motors, sounds, programs
    Direct = 0x00,
    /// Filesystem and brick management
    System = 0x01,
}

/// One typed value in a command frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Byte(u8),
    /// Sent little-endian
    Word(u16),
    /// Sent little-endian
    Long(u32),
    /// Sent as a 20 byte zero padded, NUL terminated field
    Str(String),
    /// Sent verbatim
    Raw(Vec<u8>),
}

impl Field {
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), ValidationError> {
        match self {
            Field::Byte(b) => out.push(*b),
            Field::Word(w) => out.extend_from_slice(&w.to_le_bytes()),
            Field::Long(l) => out.extend_from_slice(&l.to_le_bytes()),
            Field::Str(s) => out.extend_from_slice(&encode_string(s)?),
            Field::Raw(bytes) => out.extend_from_slice(bytes),
        }
        Ok(())
    }
}

/// Encodes `s` as a fixed 20 byte NUL terminated field.
pub fn encode_string(s: &str) -> Result<[u8; STRING_FIELD_LEN], ValidationError> {
    let bytes = s.as_bytes();
    if bytes.len() >= STRING_FIELD_LEN {
        return Err(ValidationError::StringTooLong(s.to_string()));
    }
    let mut field = [0u8; STRING_FIELD_LEN];
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(field)
}

/// An NXT command ready to be encoded.
///
/// # Members
///
/// * `class` - Direct or system command
/// * `opcode` - The command's opcode
/// * `response_required` - Whether the brick should reply
/// * `fields` - The command's arguments in wire order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    pub class: CommandClass,
    pub opcode: u8,
    pub response_required: bool,
    pub fields: Vec<Field>,
}

impl CommandFrame {
    pub fn new(class: CommandClass, opcode: u8) -> Self {
        CommandFrame {
            class,
            opcode,
            response_required: true,
            fields: Vec::new(),
        }
    }

    pub fn respond(mut self, response_required: bool) -> Self {
        self.response_required = response_required;
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Encodes the header and every field in declaration order.
    pub fn encode(&self) -> Result<Vec<u8>, ValidationError> {
        let mut header = self.class as u8;
        if !self.response_required {
            header |= NO_RESPONSE;
        }

        let mut out = vec![header, self.opcode];
        for field in &self.fields {
            field.encode_into(&mut out)?;
        }
        Ok(out)
    }
}

/// Reads a little-endian u16 at `offset`.
pub fn read_u16_le(buf: &[u8], offset: usize) -> Result<u16, ProtocolError> {
    let bytes = field_at::<2>(buf, offset)?;
    Ok(u16::from_le_bytes(bytes))
}

/// Reads a little-endian u32 at `offset`.
pub fn read_u32_le(buf: &[u8], offset: usize) -> Result<u32, ProtocolError> {
    let bytes = field_at::<4>(buf, offset)?;
    Ok(u32::from_le_bytes(bytes))
}

/// Copies `N` bytes starting at `offset` out of `buf`.
pub fn field_at<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N], ProtocolError> {
    let slice = buf
        .get(offset..offset + N)
        .ok_or(ProtocolError::ShortResponse {
            expected: offset + N,
            actual: buf.len(),
        })?;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

/// Reads a NUL terminated string out of a fixed width field.
pub fn read_string(buf: &[u8], offset: usize, width: usize) -> Result<String, ProtocolError> {
    let field = buf
        .get(offset..offset + width)
        .ok_or(ProtocolError::ShortResponse {
            expected: offset + width,
            actual: buf.len(),
        })?;
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    Ok(String::from_utf8_lossy(&field[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_encode_in_order_little_endian() {
        let frame = CommandFrame::new(CommandClass::Direct, 0x03)
            .field(Field::Word(440))
            .field(Field::Word(200));
        assert_eq!(frame.encode().unwrap(), vec![0x00, 0x03, 0xB8, 0x01, 0xC8, 0x00]);

        let frame = CommandFrame::new(CommandClass::System, 0x89)
            .respond(false)
            .field(Field::Byte(7))
            .field(Field::Long(0x0102_0304));
        assert_eq!(
            frame.encode().unwrap(),
            vec![0x81, 0x89, 0x07, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn strings_fill_twenty_bytes() {
        let field = encode_string("prog.rxe").unwrap();
        assert_eq!(&field[..8], b"prog.rxe");
        assert!(field[8..].iter().all(|&b| b == 0));
        assert!(encode_string(&"x".repeat(19)).is_ok());
        assert_eq!(
            encode_string(&"x".repeat(20)),
            Err(ValidationError::StringTooLong("x".repeat(20)))
        );
    }

    #[test]
    fn reads_are_length_checked() {
        let buf = [0x02, 0x0b, 0x00, 0x40, 0x1f];
        assert_eq!(read_u16_le(&buf, 3).unwrap(), 0x1f40);
        assert!(matches!(
            read_u16_le(&buf, 4),
            Err(ProtocolError::ShortResponse { expected: 6, actual: 5 })
        ));
        assert!(read_u32_le(&buf, 2).is_err());
        assert_eq!(read_u32_le(&[1, 0, 0, 0], 0).unwrap(), 1);
    }

    #[test]
    fn strings_stop_at_nul() {
        let buf = b"\x02\x9b\x00NXT\x00\x00junk";
        assert_eq!(read_string(buf, 3, 6).unwrap(), "NXT");
    }
}
