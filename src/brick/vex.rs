//! A VEX controller behind its PIC bootloader.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::program_mode::{self, ProgramMode};
use crate::config::Config;
use crate::devices::serial::SerialChannel;
use crate::devices::Channel;
use crate::errors::{BrickError, InternalError, TransportError};
use crate::firmware::FirmwareImage;
use crate::meta::BootloaderVersion;
use crate::protocol::PicProtocol;
use crate::upload::{upload_vex_firmware, UploadReport};

/// A VEX controller on a serial port
pub struct VexBrick {
    device: PathBuf,
    config: Config,
    program_mode: Box<dyn ProgramMode>,
    protocol: Option<PicProtocol<Box<dyn Channel>>>,
}

impl VexBrick {
    pub fn new(device: &Path, config: &Config) -> Self {
        VexBrick {
            device: device.to_path_buf(),
            config: config.clone(),
            program_mode: program_mode::for_kind(config.program_mode),
            protocol: None,
        }
    }

    /// Wraps a channel that is already open.
    pub fn attached(
        channel: Box<dyn Channel>,
        program_mode: Box<dyn ProgramMode>,
        config: &Config,
    ) -> Self {
        VexBrick {
            device: PathBuf::new(),
            config: config.clone(),
            program_mode,
            protocol: Some(PicProtocol::new(channel, config)),
        }
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    pub fn is_open(&self) -> bool {
        self.protocol.is_some()
    }

    pub fn open(&mut self) -> Result<(), BrickError> {
        if self.protocol.is_some() {
            return Err(InternalError::AlreadyOpen.into());
        }
        let channel = SerialChannel::open(&self.device, &self.config)?;
        self.protocol = Some(PicProtocol::new(Box::new(channel), &self.config));
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), BrickError> {
        match self.protocol.take() {
            Some(protocol) => protocol.close(),
            None => Err(InternalError::NotConnected.into()),
        }
    }

    fn protocol(&mut self) -> Result<&mut PicProtocol<Box<dyn Channel>>, BrickError> {
        self.protocol
            .as_mut()
            .ok_or_else(|| InternalError::NotConnected.into())
    }

    /// Program mode, bootloader version, back to the user program.
    pub fn status(&mut self) -> Result<BootloaderVersion, BrickError> {
        let protocol = self
            .protocol
            .as_mut()
            .ok_or(InternalError::NotConnected)?;
        self.program_mode.enter(protocol.channel_mut())?;
        let version = protocol.bootloader_version()?;
        protocol.return_to_user_code()?;
        Ok(version)
    }

    /// Flashes a hex file. The file is parsed and range checked before the
    /// controller is touched.
    pub fn upload(
        &mut self,
        path: &Path,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<UploadReport, BrickError> {
        let image = FirmwareImage::from_file(path)?;
        let protocol = self
            .protocol
            .as_mut()
            .ok_or(InternalError::NotConnected)?;
        upload_vex_firmware(protocol, &image, self.program_mode.as_mut(), progress)
    }

    /// Starts the user program.
    pub fn start(&mut self) -> Result<(), BrickError> {
        self.protocol()?.return_to_user_code()
    }

    /// Copies whatever the user program prints to `out` until the port goes
    /// quiet for longer than the serial timeout or closes. Returns the byte
    /// count.
    pub fn monitor(&mut self, out: &mut dyn Write) -> Result<usize, BrickError> {
        let channel = self.protocol()?.channel_mut();
        let mut total = 0;
        loop {
            let bytes = match channel.recv(256) {
                Ok(b) => b,
                Err(TransportError::Closed) => break,
                Err(TransportError::IoError(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
                    debug!("serial monitor idle, stopping");
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            out.write_all(&bytes).map_err(TransportError::from)?;
            out.flush().map_err(TransportError::from)?;
            total += bytes.len();
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::mock::ScriptedChannel;
    use crate::devices::TransportKind;
    use crate::protocol::pic::{EOT, SI, USER_CODE_TERMINATOR};

    fn no_handshake() -> Box<dyn ProgramMode> {
        Box::new(|_: &mut dyn Channel| -> Result<(), BrickError> { Ok(()) })
    }

    #[test]
    fn status_reads_the_bootloader_version() {
        let (channel, log) = ScriptedChannel::new(TransportKind::Serial);
        let channel = channel
            .reply(&[SI, SI, 0x00, 0x02, 0x03, 0x07, 0xF4, EOT])
            .reply(&[SI, SI, 0x08, USER_CODE_TERMINATOR]);
        let mut vex = VexBrick::attached(Box::new(channel), no_handshake(), &Config::default());

        assert_eq!(vex.status().unwrap(), BootloaderVersion { major: 3, minor: 7 });
        let opcodes: Vec<u8> = log.borrow().sent.iter().map(|f| f[2]).collect();
        assert_eq!(opcodes, vec![0x00, 0x08]);
    }

    #[test]
    fn bad_images_fail_before_the_handshake() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("low.hex");
        std::fs::write(&path, crate::firmware::tests::hex_file(0x0700, 0x0900)).unwrap();

        let (channel, log) = ScriptedChannel::new(TransportKind::Serial);
        let mut vex = VexBrick::attached(
            Box::new(channel),
            Box::new(|_: &mut dyn Channel| -> Result<(), BrickError> {
                panic!("handshake must not run")
            }),
            &Config::default(),
        );

        let err = vex.upload(&path, &mut |_, _| {}).unwrap_err();
        assert!(matches!(err, BrickError::Validation(_)));
        assert!(log.borrow().sent.is_empty());
    }

    #[test]
    fn monitor_echoes_until_the_port_closes() {
        let (channel, _log) = ScriptedChannel::new(TransportKind::Serial);
        let channel = channel.reply(b"hello ").reply(b"robot\n");
        let mut vex = VexBrick::attached(Box::new(channel), no_handshake(), &Config::default());

        let mut out = Vec::new();
        assert_eq!(vex.monitor(&mut out).unwrap(), 12);
        assert_eq!(out, b"hello robot\n");
    }

    #[test]
    fn closed_bricks_refuse_work() {
        let mut vex = VexBrick::new(Path::new("/dev/null"), &Config::default());
        assert!(matches!(
            vex.start(),
            Err(BrickError::Internal(InternalError::NotConnected))
        ));
    }
}
