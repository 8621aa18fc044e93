//! Transport channels the brick protocols ride on.

use crate::errors::TransportError;

pub mod bluetooth;
pub mod ports;
pub mod serial;
pub mod usb;

#[cfg(test)]
pub(crate) mod mock;

/// The physical link a channel uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Usb,
    Bluetooth,
    Serial,
}

/// A half-duplex byte pipe to a brick.
///
/// Framing that belongs to the link (the Bluetooth length prefix) is added by
/// `send` and stripped by `recv`, so callers only ever see protocol frames.
pub trait Channel {
    /// Which link this channel runs over
    fn kind(&self) -> TransportKind;

    /// Largest frame `send` accepts
    fn max_frame(&self) -> usize;

    /// Sends one frame and returns how many frame bytes were written.
    fn send(&mut self, frame: &[u8]) -> Result<usize, TransportError>;

    /// Receives up to `max_len` bytes.
    fn recv(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Discards any input buffered from an earlier exchange and returns how
    /// many bytes were thrown away.
    fn drain(&mut self) -> Result<usize, TransportError> {
        Ok(0)
    }

    /// Sets (`true`) or clears the RTS and DTR modem control bits.
    fn set_control_lines(&mut self, _rts: bool, _dtr: bool) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("control line toggling"))
    }

    /// Releases the link. The channel must not be used afterwards.
    fn close(&mut self) -> Result<(), TransportError>;
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn kind(&self) -> TransportKind {
        (**self).kind()
    }

    fn max_frame(&self) -> usize {
        (**self).max_frame()
    }

    fn send(&mut self, frame: &[u8]) -> Result<usize, TransportError> {
        (**self).send(frame)
    }

    fn recv(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        (**self).recv(max_len)
    }

    fn drain(&mut self) -> Result<usize, TransportError> {
        (**self).drain()
    }

    fn set_control_lines(&mut self, rts: bool, dtr: bool) -> Result<(), TransportError> {
        (**self).set_control_lines(rts, dtr)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }
}

/// Formats bytes as space separated hex for debug dumps.
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
