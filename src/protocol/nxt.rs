//! Request/response driver for NXT commands over any channel.

use tracing::debug;

use crate::checks::ResponseChecks;
use crate::commands::direct::{
    GetBatteryLevel, KeepAlive, PlaySoundFile, PlayTone, SetOutputState, StartProgram, StopProgram,
};
use crate::commands::file::{Close, Delete, OpenWriteLinear, Write};
use crate::commands::system::{BluetoothFactoryReset, GetDeviceInfo, GetFirmwareVersion};
use crate::commands::{Command, CommandFrame};
use crate::config::Config;
use crate::devices::{hex_dump, Channel};
use crate::errors::{BrickError, InternalError, ProtocolError};
use crate::filename::Filename;
use crate::meta::{DeviceInfo, FirmwareVersion, OutputPort};

/// Largest reply the codec reads
pub const MAX_REPLY: usize = 1024;

/// Whether fire-and-forget commands ask the brick to reply.
///
/// Suppressing replies halves the traffic of tight motor control loops.
/// Queries always ask for a reply regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    #[default]
    Respond,
    Suppress,
}

/// Verifies a reply against the checks a command asks for.
///
/// The length is checked first so no payload byte of a malformed reply is
/// ever looked at.
pub fn check_reply(
    opcode: u8,
    expected: usize,
    checks: ResponseChecks,
    reply: &[u8],
) -> Result<(), ProtocolError> {
    if checks.contains(ResponseChecks::LENGTH) && reply.len() != expected {
        return Err(ProtocolError::UnexpectedLength {
            opcode,
            expected,
            actual: reply.len(),
        });
    }

    if checks.intersects(ResponseChecks::OPCODE | ResponseChecks::STATUS) && reply.len() < 3 {
        return Err(ProtocolError::ShortResponse {
            expected: 3,
            actual: reply.len(),
        });
    }

    if checks.contains(ResponseChecks::OPCODE) && reply[1] != opcode {
        return Err(ProtocolError::OpcodeMismatch {
            opcode,
            echoed: reply[1],
        });
    }

    if checks.contains(ResponseChecks::STATUS) && reply[2] != 0 {
        return Err(ProtocolError::Status {
            opcode,
            status: reply[2],
        });
    }

    Ok(())
}

/// An NXT reachable over `C`.
pub struct NxtProtocol<C: Channel> {
    channel: C,
    mode: ResponseMode,
    debug: bool,
}

impl<C: Channel> NxtProtocol<C> {
    pub fn new(channel: C, config: &Config) -> Self {
        NxtProtocol {
            channel,
            mode: ResponseMode::default(),
            debug: config.debug,
        }
    }

    pub fn response_mode(&self) -> ResponseMode {
        self.mode
    }

    pub fn set_response_mode(&mut self, mode: ResponseMode) {
        self.mode = mode;
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Closes the underlying channel.
    pub fn close(mut self) -> Result<(), BrickError> {
        self.channel.close()?;
        Ok(())
    }

    /// Sends a command and decodes its reply. Always asks for a reply.
    pub fn request<Cmd: Command>(&mut self, command: &Cmd) -> Result<Cmd::Response, BrickError> {
        self.transmit(&command.frame(true))?;
        let reply = self.receive::<Cmd>()?;
        Ok(Cmd::decode_reply(&reply)?)
    }

    /// Sends a command whose reply carries no data, honouring the response
    /// mode.
    pub fn execute<Cmd: Command<Response = ()>>(&mut self, command: &Cmd) -> Result<(), BrickError> {
        let respond = self.mode == ResponseMode::Respond;
        self.transmit(&command.frame(respond))?;
        if respond {
            self.receive::<Cmd>()?;
        }
        Ok(())
    }

    fn transmit(&mut self, frame: &CommandFrame) -> Result<(), BrickError> {
        let bytes = frame.encode()?;

        let max = self.channel.max_frame();
        if bytes.len() > max {
            return Err(InternalError::FrameTooLarge {
                len: bytes.len(),
                max,
            }
            .into());
        }

        if self.debug {
            debug!(opcode = frame.opcode, "nxt command [{}]", hex_dump(&bytes));
        }

        let written = self.channel.send(&bytes)?;
        if written != bytes.len() {
            return Err(ProtocolError::ShortWrite {
                expected: bytes.len(),
                actual: written,
            }
            .into());
        }
        Ok(())
    }

    fn receive<Cmd: Command>(&mut self) -> Result<Vec<u8>, BrickError> {
        let reply = self.channel.recv(MAX_REPLY)?;
        if self.debug {
            debug!(opcode = Cmd::OPCODE, "nxt reply [{}]", hex_dump(&reply));
        }
        check_reply(Cmd::OPCODE, Cmd::REPLY_LEN, Cmd::CHECKS, &reply)?;
        Ok(reply)
    }

    pub fn start_program(&mut self, name: &str) -> Result<(), BrickError> {
        self.execute(&StartProgram::new(name)?)
    }

    pub fn stop_program(&mut self) -> Result<(), BrickError> {
        self.execute(&StopProgram)
    }

    pub fn play_sound_file(&mut self, name: &str, looping: bool) -> Result<(), BrickError> {
        self.execute(&PlaySoundFile::new(name, looping)?)
    }

    /// Plays a tone of `frequency` Hz for `duration_ms`. Frequencies outside
    /// 200..=14000 are rejected without touching the channel.
    pub fn play_tone(&mut self, frequency: u16, duration_ms: u16) -> Result<(), BrickError> {
        self.execute(&PlayTone::new(frequency, duration_ms)?)
    }

    pub fn set_output_state(&mut self, state: SetOutputState) -> Result<(), BrickError> {
        self.execute(&state.validated()?)
    }

    pub fn motor_on(&mut self, port: OutputPort, power: i8) -> Result<(), BrickError> {
        self.execute(&SetOutputState::motor_on(port, power)?)
    }

    /// Battery voltage in millivolts
    pub fn battery_level(&mut self) -> Result<u16, BrickError> {
        self.request(&GetBatteryLevel)
    }

    /// Resets the sleep timer and returns the sleep limit in milliseconds.
    /// Control loops should call this every thousand or so iterations.
    pub fn keep_alive(&mut self) -> Result<u32, BrickError> {
        self.request(&KeepAlive)
    }

    pub fn firmware_version(&mut self) -> Result<FirmwareVersion, BrickError> {
        self.request(&GetFirmwareVersion)
    }

    pub fn device_info(&mut self) -> Result<DeviceInfo, BrickError> {
        self.request(&GetDeviceInfo)
    }

    pub fn bluetooth_factory_reset(&mut self) -> Result<(), BrickError> {
        self.execute(&BluetoothFactoryReset)
    }

    pub fn delete_file(&mut self, name: &Filename) -> Result<(), BrickError> {
        self.execute(&Delete(name.clone()))
    }

    /// Opens `name` for a linear write of `size` bytes and returns the handle.
    pub fn open_write_linear(&mut self, name: &Filename, size: u32) -> Result<u8, BrickError> {
        self.request(&OpenWriteLinear {
            name: name.clone(),
            size,
        })
    }

    /// Writes one chunk of at most 61 bytes and returns how many the brick took.
    pub fn write(&mut self, handle: u8, data: &[u8]) -> Result<u16, BrickError> {
        self.request(&Write::new(handle, data)?)
    }

    pub fn close_file(&mut self, handle: u8) -> Result<(), BrickError> {
        self.request(&Close(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::mock::ScriptedChannel;
    use crate::devices::TransportKind;
    use crate::errors::ValidationError;

    fn nxt(channel: ScriptedChannel) -> NxtProtocol<ScriptedChannel> {
        NxtProtocol::new(channel, &Config::default())
    }

    #[test]
    fn short_replies_fail_the_length_gate() {
        let (channel, _log) = ScriptedChannel::new(TransportKind::Usb);
        let mut nxt = nxt(channel.reply(&[0x02, 0x01]));
        let err = nxt.stop_program().unwrap_err();
        assert!(matches!(
            err,
            BrickError::Protocol(ProtocolError::UnexpectedLength {
                opcode: 0x01,
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn nonzero_status_fails_the_command() {
        let (channel, _log) = ScriptedChannel::new(TransportKind::Usb);
        let mut nxt = nxt(channel.reply(&[0x02, 0x00, 0xEC]));
        let err = nxt.start_program("pong").unwrap_err();
        assert!(matches!(
            err,
            BrickError::Protocol(ProtocolError::Status { status: 0xEC, .. })
        ));
    }

    #[test]
    fn bad_tones_never_reach_the_channel() {
        let (channel, log) = ScriptedChannel::new(TransportKind::Usb);
        let mut nxt = nxt(channel);
        for hz in [100, 199, 14001] {
            assert!(matches!(
                nxt.play_tone(hz, 50),
                Err(BrickError::Validation(ValidationError::Frequency(_)))
            ));
        }
        assert!(log.borrow().sent.is_empty());
    }

    #[test]
    fn suppressed_mode_skips_the_reply() {
        let (channel, log) = ScriptedChannel::new(TransportKind::Bluetooth);
        let mut nxt = nxt(channel.reply(&[0x02, 0x0b, 0x00, 0x40, 0x1f]));
        nxt.set_response_mode(ResponseMode::Suppress);

        nxt.motor_on(OutputPort::A, 50).unwrap();
        // Queries still wait for their reply
        assert_eq!(nxt.battery_level().unwrap(), 8000);

        let sent = &log.borrow().sent;
        assert_eq!(sent[0][0], 0x80);
        assert_eq!(&sent[1][..], &[0x00, 0x0b]);
    }

    #[test]
    fn delete_ignores_the_reply_status() {
        let (channel, log) = ScriptedChannel::new(TransportKind::Usb);
        let mut nxt = nxt(channel.reply(&[0x02, 0x85, 0x87]));
        let name = Filename::new("gone.rxe", None).unwrap();
        nxt.delete_file(&name).unwrap();
        assert_eq!(&log.borrow().sent[0][..2], &[0x01, 0x85]);
    }

    #[test]
    fn mismatched_opcodes_are_rejected() {
        let (channel, _log) = ScriptedChannel::new(TransportKind::Usb);
        let mut nxt = nxt(channel.reply(&[0x02, 0x03, 0x00]));
        assert!(matches!(
            nxt.stop_program(),
            Err(BrickError::Protocol(ProtocolError::OpcodeMismatch { .. }))
        ));
    }
}
