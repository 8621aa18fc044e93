//! Raw serial link to a VEX/PIC controller's programming port.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits, TTYPort};
use tracing::{debug, warn};

use super::{hex_dump, Channel, TransportKind};
use crate::config::Config;
use crate::errors::TransportError;

/// The PIC bootloader only talks 115200 8N1
pub const VEX_BAUD_RATE: u32 = 115200;

/// Largest packet the bootloader protocol produces after escaping
pub const SERIAL_MAX_FRAME: usize = 1024;

/// Time the controller needs after the port opens before it is quiet
const SETTLE_AFTER_OPEN: Duration = Duration::from_millis(100);

/// An open serial port together with the terminal settings it replaced.
pub struct SerialChannel {
    port: Option<TTYPort>,
    path: PathBuf,
    saved: libc::termios,
    debug: bool,
}

impl SerialChannel {
    /// Opens the device node in raw 115200 8N1 mode, remembering the old
    /// terminal settings, and throws away anything left over from an
    /// earlier session.
    pub fn open(path: &Path, config: &Config) -> Result<Self, TransportError> {
        // Snapshot the settings before serialport rewrites them
        let saved = {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
                .open(path)?;
            get_termios(file.as_raw_fd())?
        };

        let port = serialport::new(path.to_string_lossy(), VEX_BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.serial_timeout)
            .open_native()?;

        // serialport leaves parity errors to the input path, the bootloader
        // link wants them dropped
        let fd = port.as_raw_fd();
        let mut raw = get_termios(fd)?;
        raw.c_iflag |= libc::IGNPAR;
        set_termios(fd, libc::TCSANOW, &raw)?;

        debug!(path = %path.display(), "serial port open");

        let mut channel = SerialChannel {
            port: Some(port),
            path: path.to_path_buf(),
            saved,
            debug: config.debug,
        };

        std::thread::sleep(SETTLE_AFTER_OPEN);
        channel.drain()?;
        Ok(channel)
    }

    /// The device node this channel is attached to
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn port(&mut self) -> Result<&mut TTYPort, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }
}

fn get_termios(fd: libc::c_int) -> Result<libc::termios, TransportError> {
    let mut termios = std::mem::MaybeUninit::<libc::termios>::uninit();
    let rc = unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(unsafe { termios.assume_init() })
}

fn set_termios(
    fd: libc::c_int,
    action: libc::c_int,
    termios: &libc::termios,
) -> Result<(), TransportError> {
    let rc = unsafe { libc::tcsetattr(fd, action, termios) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

impl Channel for SerialChannel {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn max_frame(&self) -> usize {
        SERIAL_MAX_FRAME
    }

    fn send(&mut self, frame: &[u8]) -> Result<usize, TransportError> {
        if self.debug {
            debug!("serial send [{}]", hex_dump(frame));
        }
        let port = self.port()?;
        port.write_all(frame)?;
        port.flush()?;
        Ok(frame.len())
    }

    fn recv(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let debug = self.debug;
        let mut buf = vec![0u8; max_len];
        let read = self.port()?.read(&mut buf)?;
        if read == 0 {
            return Err(TransportError::Closed);
        }
        buf.truncate(read);
        if debug {
            debug!("serial recv [{}]", hex_dump(&buf));
        }
        Ok(buf)
    }

    fn drain(&mut self) -> Result<usize, TransportError> {
        let port = self.port()?;
        let mut discarded = 0;
        loop {
            let pending = port.bytes_to_read()? as usize;
            if pending == 0 {
                break;
            }
            let mut scratch = vec![0u8; pending];
            discarded += port.read(&mut scratch)?;
        }
        port.clear(ClearBuffer::Input)?;

        if discarded > 0 {
            warn!(bytes = discarded, "discarded leftover serial input");
        }
        Ok(discarded)
    }

    fn set_control_lines(&mut self, rts: bool, dtr: bool) -> Result<(), TransportError> {
        let port = self.port()?;
        port.write_request_to_send(rts)?;
        port.write_data_terminal_ready(dtr)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.port.is_none() {
            return Ok(());
        }
        self.drain()?;
        if let Some(port) = self.port.take() {
            set_termios(port.as_raw_fd(), libc::TCSAFLUSH, &self.saved)?;
            debug!(path = %self.path.display(), "serial settings restored");
        }
        Ok(())
    }
}

impl Drop for SerialChannel {
    fn drop(&mut self) {
        if let Some(port) = self.port.take() {
            let _ = set_termios(port.as_raw_fd(), libc::TCSAFLUSH, &self.saved);
        }
    }
}
