//! NXT over a Bluetooth RFCOMM socket.
//!
//! The socket is a plain byte stream, so every NXT frame travels behind a
//! two byte little-endian length prefix.

use std::fs::File;
use std::io::{Read, Write};
use std::time::Duration;

use tracing::{debug, warn};

use super::{hex_dump, Channel, TransportKind};
use crate::config::Config;
use crate::errors::{InternalError, TransportError};
use crate::meta::BluetoothAddress;

/// Largest buffer the NXT's Bluetooth stack handles, prefix included
pub const NXT_BT_BUFFER: usize = 100;
/// Size of the length prefix
pub const LENGTH_PREFIX: usize = 2;
/// RFCOMM channel the NXT listens on
pub const NXT_RFCOMM_CHANNEL: u8 = 1;

/// The NXT drops the link if it is reopened too quickly after a close.
const CLOSE_SETTLE: Duration = Duration::from_secs(1);

/// A connected RFCOMM stream to an NXT.
pub struct BluetoothChannel {
    stream: Option<File>,
    address: BluetoothAddress,
    debug: bool,
}

impl BluetoothChannel {
    /// Creates the socket, binds it to any local adapter and connects to
    /// the brick's RFCOMM channel.
    pub fn open(address: BluetoothAddress, config: &Config) -> Result<Self, TransportError> {
        let stream = rfcomm::connect(&address, NXT_RFCOMM_CHANNEL)?;
        debug!(%address, "RFCOMM connected");
        Ok(BluetoothChannel {
            stream: Some(stream),
            address,
            debug: config.debug,
        })
    }

    /// The address this channel is connected to
    pub fn address(&self) -> BluetoothAddress {
        self.address
    }

    fn stream(&mut self) -> Result<&mut File, TransportError> {
        self.stream.as_mut().ok_or(TransportError::Closed)
    }
}

/// Prepends the length prefix to a frame.
pub fn encode_frame(frame: &[u8]) -> Result<Vec<u8>, TransportError> {
    let len = u16::try_from(frame.len()).map_err(|_| {
        TransportError::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "frame length does not fit the prefix",
        ))
    })?;
    let mut packet = Vec::with_capacity(frame.len() + LENGTH_PREFIX);
    packet.extend_from_slice(&len.to_le_bytes());
    packet.extend_from_slice(frame);
    Ok(packet)
}

/// Reads one length prefixed frame from a stream.
pub fn read_frame<R: Read>(stream: &mut R) -> Result<Vec<u8>, TransportError> {
    let mut prefix = [0u8; LENGTH_PREFIX];
    stream.read_exact(&mut prefix)?;
    let len = u16::from_le_bytes(prefix) as usize;

    let mut frame = vec![0u8; len];
    stream.read_exact(&mut frame)?;
    Ok(frame)
}

impl Channel for BluetoothChannel {
    fn kind(&self) -> TransportKind {
        TransportKind::Bluetooth
    }

    fn max_frame(&self) -> usize {
        NXT_BT_BUFFER - LENGTH_PREFIX
    }

    fn send(&mut self, frame: &[u8]) -> Result<usize, TransportError> {
        let max = self.max_frame();
        if frame.len() > max {
            return Err(InternalError::FrameTooLarge {
                len: frame.len(),
                max,
            }
            .into());
        }
        let packet = encode_frame(frame)?;
        if self.debug {
            debug!("bt send [{}]", hex_dump(&packet));
        }

        let stream = self.stream()?;
        stream.write_all(&packet)?;
        stream.flush()?;

        // Report frame bytes, the prefix is ours
        Ok(packet.len() - LENGTH_PREFIX)
    }

    fn recv(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let debug = self.debug;
        let mut frame = read_frame(self.stream()?)?;
        if debug {
            debug!("bt recv [{}]", hex_dump(&frame));
        }
        if frame.len() > max_len {
            warn!(len = frame.len(), max_len, "truncating oversized Bluetooth frame");
            frame.truncate(max_len);
        }
        Ok(frame)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(stream) = self.stream.take() {
            std::thread::sleep(CLOSE_SETTLE);
            drop(stream);
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
mod rfcomm {
    use std::fs::File;
    use std::os::fd::{FromRawFd, OwnedFd};

    use crate::errors::TransportError;
    use crate::meta::BluetoothAddress;

    const BTPROTO_RFCOMM: libc::c_int = 3;

    /// `struct sockaddr_rc` from the BlueZ headers
    #[repr(C)]
    struct SockaddrRc {
        rc_family: libc::sa_family_t,
        rc_bdaddr: [u8; 6],
        rc_channel: u8,
    }

    impl SockaddrRc {
        fn new(bdaddr: [u8; 6], channel: u8) -> Self {
            SockaddrRc {
                rc_family: libc::AF_BLUETOOTH as libc::sa_family_t,
                rc_bdaddr: bdaddr,
                rc_channel: channel,
            }
        }
    }

    pub fn connect(address: &BluetoothAddress, channel: u8) -> Result<File, TransportError> {
        let fd = unsafe { libc::socket(libc::AF_BLUETOOTH, libc::SOCK_STREAM, BTPROTO_RFCOMM) };
        if fd < 0 {
            return Err(TransportError::CannotCreateSocket(
                std::io::Error::last_os_error(),
            ));
        }
        // Owned from here on so every error path closes it
        let socket = unsafe { OwnedFd::from_raw_fd(fd) };

        // Any local adapter, first free channel
        let local = SockaddrRc::new([0; 6], 0);
        let rc = unsafe {
            libc::bind(
                fd,
                &local as *const SockaddrRc as *const libc::sockaddr,
                std::mem::size_of::<SockaddrRc>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(TransportError::CannotBindSocket(
                std::io::Error::last_os_error(),
            ));
        }

        let remote = SockaddrRc::new(address.to_bdaddr(), channel);
        let rc = unsafe {
            libc::connect(
                fd,
                &remote as *const SockaddrRc as *const libc::sockaddr,
                std::mem::size_of::<SockaddrRc>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(TransportError::CannotConnectSocket {
                address: address.to_string(),
                source: std::io::Error::last_os_error(),
            });
        }

        Ok(File::from(socket))
    }
}

#[cfg(not(target_os = "linux"))]
mod rfcomm {
    use std::fs::File;

    use crate::errors::TransportError;
    use crate::meta::BluetoothAddress;

    pub fn connect(_address: &BluetoothAddress, _channel: u8) -> Result<File, TransportError> {
        Err(TransportError::Unsupported("Bluetooth RFCOMM"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_carry_a_little_endian_length_prefix() {
        let packet = encode_frame(&[0x00, 0x0b]).unwrap();
        assert_eq!(packet, vec![0x02, 0x00, 0x00, 0x0b]);
    }

    #[test]
    fn oversized_frames_are_refused_before_the_socket() {
        let mut channel = BluetoothChannel {
            stream: None,
            address: "00:16:53:01:02:03".parse().unwrap(),
            debug: false,
        };
        assert!(matches!(
            channel.send(&[0u8; 99]),
            Err(TransportError::Internal(InternalError::FrameTooLarge { len: 99, max: 98 }))
        ));
        // A frame that fits gets as far as the missing socket
        assert!(matches!(channel.send(&[0u8; 98]), Err(TransportError::Closed)));
    }

    #[test]
    fn read_frame_strips_the_prefix() {
        let wire = [0x05, 0x00, 0x02, 0x0b, 0x00, 0x40, 0x1f, 0xff];
        let mut cursor = std::io::Cursor::new(&wire[..]);
        let frame = read_frame(&mut cursor).unwrap();
        assert_eq!(frame, vec![0x02, 0x0b, 0x00, 0x40, 0x1f]);
    }

    #[test]
    fn read_frame_reports_a_truncated_stream() {
        let wire = [0x05, 0x00, 0x02];
        let mut cursor = std::io::Cursor::new(&wire[..]);
        assert!(matches!(
            read_frame(&mut cursor),
            Err(TransportError::IoError(_))
        ));
    }
}
