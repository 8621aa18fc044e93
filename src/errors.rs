use std::path::PathBuf;

use thiserror::Error;

use crate::brick::BrickType;

/// Failures of the byte pipe itself: opening, claiming, reading or writing.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error")]
    IoError(#[from] std::io::Error),
    #[error("Serialport Error")]
    SerialportError(#[from] serialport::Error),
    #[error("USB Error")]
    UsbError(#[from] rusb::Error),
    #[error("cannot claim USB interface {interface}: {source}")]
    CannotClaimInterface {
        interface: u8,
        source: rusb::Error,
    },
    #[error("cannot create RFCOMM socket: {0}")]
    CannotCreateSocket(std::io::Error),
    #[error("cannot bind RFCOMM socket: {0}")]
    CannotBindSocket(std::io::Error),
    #[error("cannot connect to {address}. Try rebooting your NXT brick: {source}")]
    CannotConnectSocket {
        address: String,
        source: std::io::Error,
    },
    #[error("connection closed by the brick")]
    Closed,
    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),
    /// Caller misuse caught at the transport; surfaces as `BrickError::Internal`
    #[error(transparent)]
    Internal(#[from] InternalError),
}

/// The brick answered, but not the way the command requires.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("opcode {opcode:#04x}: expected a {expected} byte response, got {actual}")]
    UnexpectedLength {
        opcode: u8,
        expected: usize,
        actual: usize,
    },
    #[error("opcode {opcode:#04x}: brick reported status {status:#04x} ({})", crate::meta::nxt_status_name(.status))]
    Status { opcode: u8, status: u8 },
    #[error("opcode {opcode:#04x}: response echoes opcode {echoed:#04x}")]
    OpcodeMismatch { opcode: u8, echoed: u8 },
    #[error("wrote {actual} of {expected} bytes")]
    ShortWrite { expected: usize, actual: usize },
    #[error("response not terminated after {0} bytes")]
    Unterminated(usize),
    #[error("response too short: need {expected} bytes, got {actual}")]
    ShortResponse { expected: usize, actual: usize },
}

/// Caller input rejected before any byte reaches the transport.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("filename is empty")]
    EmptyFilename,
    #[error("filename '{0}' contains more than one '.'")]
    TooManyDots(String),
    #[error("filename '{0}' has a stem longer than 15 characters")]
    StemTooLong(String),
    #[error("filename '{0}' has an extension longer than 3 characters")]
    ExtensionTooLong(String),
    #[error("filename '{name}' must have extension {required}")]
    WrongExtension { name: String, required: String },
    #[error("string '{0}' does not fit a 20 byte field")]
    StringTooLong(String),
    #[error("frequency {0}Hz outside 200..=14000")]
    Frequency(u16),
    #[error("{field} {value} outside -100..=100")]
    Percentage { field: &'static str, value: i8 },
    #[error("program range {start:#06x}..{end:#06x} outside {valid_start:#06x}..{valid_end:#06x}")]
    ProgramRange {
        start: u32,
        end: u32,
        valid_start: u32,
        valid_end: u32,
    },
    #[error("hex line {line}: {reason}")]
    HexLine { line: usize, reason: String },
    #[error("write of {0} blocks exceeds the 31 block packet limit")]
    TooManyBlocks(usize),
    #[error("write data is {actual} bytes, {blocks} blocks need {expected}")]
    BlockData {
        blocks: usize,
        expected: usize,
        actual: usize,
    },
    #[error("write of {0} bytes exceeds the 61 byte chunk limit")]
    ChunkTooLarge(usize),
    #[error("read of {requested} bytes exceeds the {max} byte reply limit")]
    ReadTooLong { requested: usize, max: usize },
}

/// API misuse: the caller broke a contract of the library.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum InternalError {
    #[error("brick is not connected")]
    NotConnected,
    #[error("brick is already open")]
    AlreadyOpen,
    #[error("{len} byte frame exceeds the {max} byte transport limit")]
    FrameTooLarge { len: usize, max: usize },
}

/// Every outcome a brick operation can report.
#[derive(Error, Debug)]
pub enum BrickError {
    #[error(transparent)]
    Transport(TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Internal(#[from] InternalError),
    #[error("{operation} is not implemented for {brick} bricks")]
    NotImplemented {
        operation: &'static str,
        brick: BrickType,
    },
    #[error("cannot read {path}: {source}")]
    LocalFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Sorry, no accessible bricks found.")]
    NoBricks,
    #[error("{0} bricks connected, expected exactly one")]
    AmbiguousTarget(usize),
    #[error("brick list is full ({0} entries)")]
    ListFull(usize),
}

impl From<TransportError> for BrickError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Internal(internal) => BrickError::Internal(internal),
            other => BrickError::Transport(other),
        }
    }
}

impl BrickError {
    /// The `sysexits` value a front-end should terminate with.
    pub fn exit_code(&self) -> i32 {
        match self {
            BrickError::Validation(_) | BrickError::AmbiguousTarget(_) => 65,
            BrickError::LocalFile { .. } => 66,
            BrickError::NoBricks | BrickError::NotImplemented { .. } => 69,
            BrickError::Internal(_) | BrickError::ListFull(_) => 70,
            BrickError::Transport(_) | BrickError::Protocol(_) => 74,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_map_to_distinct_exit_codes() {
        assert_eq!(BrickError::NoBricks.exit_code(), 69);
        assert_eq!(BrickError::AmbiguousTarget(2).exit_code(), 65);
        assert_ne!(
            BrickError::NoBricks.exit_code(),
            BrickError::from(TransportError::Closed).exit_code()
        );
    }

    #[test]
    fn transport_misuse_is_reported_as_internal() {
        let err = BrickError::from(TransportError::from(InternalError::FrameTooLarge {
            len: 99,
            max: 98,
        }));
        assert!(matches!(
            err,
            BrickError::Internal(InternalError::FrameTooLarge { len: 99, max: 98 })
        ));
        assert_eq!(err.exit_code(), 70);
    }

    #[test]
    fn status_errors_name_the_nxt_status() {
        let err = ProtocolError::Status {
            opcode: 0x89,
            status: 0x8F,
        };
        assert!(err.to_string().contains("file exists"));
    }
}
