//! NXT direct commands: programs, sounds, motors and housekeeping.

use super::frame::{read_u16_le, read_u32_le};
use super::{Command, CommandClass, Field};
use crate::errors::{ProtocolError, ValidationError};
use crate::filename::{Filename, PROGRAM_EXTENSION, SOUND_EXTENSION};
use crate::meta::{check_percentage, OutputMode, OutputPort, RegulationMode, RunState};

pub const START_PROGRAM: u8 = 0x00;
pub const STOP_PROGRAM: u8 = 0x01;
pub const PLAY_SOUND_FILE: u8 = 0x02;
pub const PLAY_TONE: u8 = 0x03;
pub const SET_OUTPUT_STATE: u8 = 0x04;
pub const GET_BATTERY_LEVEL: u8 = 0x0B;
pub const KEEP_ALIVE: u8 = 0x0D;

/// Lowest tone the NXT speaker plays
pub const MIN_TONE_HZ: u16 = 200;
/// Highest tone the NXT speaker plays
pub const MAX_TONE_HZ: u16 = 14000;

/// Starts a program already on the brick
#[derive(Debug, Clone)]
pub struct StartProgram(pub Filename);

impl StartProgram {
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        Ok(StartProgram(Filename::new(name, Some(PROGRAM_EXTENSION))?))
    }
}

impl Command for StartProgram {
    type Response = ();
    const CLASS: CommandClass = CommandClass::Direct;
    const OPCODE: u8 = START_PROGRAM;
    const REPLY_LEN: usize = 3;

    fn fields(&self) -> Vec<Field> {
        vec![Field::Str(self.0.to_string())]
    }

    fn decode_reply(_reply: &[u8]) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Stops whatever program is running
#[derive(Debug, Clone, Copy)]
pub struct StopProgram;

impl Command for StopProgram {
    type Response = ();
    const CLASS: CommandClass = CommandClass::Direct;
    const OPCODE: u8 = STOP_PROGRAM;
    const REPLY_LEN: usize = 3;

    fn decode_reply(_reply: &[u8]) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Plays a sound file stored on the brick
///
/// # Members
///
/// * `looping` - Repeat the sound until stopped
/// * `name` - The sound file, `.rso` appended when missing
#[derive(Debug, Clone)]
pub struct PlaySoundFile {
    pub looping: bool,
    pub name: Filename,
}

impl PlaySoundFile {
    pub fn new(name: &str, looping: bool) -> Result<Self, ValidationError> {
        Ok(PlaySoundFile {
            looping,
            name: Filename::new(name, Some(SOUND_EXTENSION))?,
        })
    }
}

impl Command for PlaySoundFile {
    type Response = ();
    const CLASS: CommandClass = CommandClass::Direct;
    const OPCODE: u8 = PLAY_SOUND_FILE;
    const REPLY_LEN: usize = 3;

    fn fields(&self) -> Vec<Field> {
        vec![
            Field::Byte(self.looping as u8),
            Field::Str(self.name.to_string()),
        ]
    }

    fn decode_reply(_reply: &[u8]) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Plays a tone. Only constructible within the speaker's range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayTone {
    frequency: u16,
    duration_ms: u16,
}

impl PlayTone {
    pub fn new(frequency: u16, duration_ms: u16) -> Result<Self, ValidationError> {
        if !(MIN_TONE_HZ..=MAX_TONE_HZ).contains(&frequency) {
            return Err(ValidationError::Frequency(frequency));
        }
        Ok(PlayTone {
            frequency,
            duration_ms,
        })
    }
}

impl Command for PlayTone {
    type Response = ();
    const CLASS: CommandClass = CommandClass::Direct;
    const OPCODE: u8 = PLAY_TONE;
    const REPLY_LEN: usize = 3;

    fn fields(&self) -> Vec<Field> {
        vec![Field::Word(self.frequency), Field::Word(self.duration_ms)]
    }

    fn decode_reply(_reply: &[u8]) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Configures one motor output
#[derive(Debug, Clone, Copy)]
pub struct SetOutputState {
    pub port: OutputPort,
    pub power: i8,
    pub mode: OutputMode,
    pub regulation: RegulationMode,
    pub turn_ratio: i8,
    pub run_state: RunState,
    pub tacho_limit: u32,
}

impl SetOutputState {
    /// Checks power and turn ratio before anything is sent.
    pub fn validated(self) -> Result<Self, ValidationError> {
        check_percentage("power", self.power)?;
        check_percentage("turn ratio", self.turn_ratio)?;
        Ok(self)
    }

    /// Runs a motor at `power` until told otherwise.
    pub fn motor_on(port: OutputPort, power: i8) -> Result<Self, ValidationError> {
        SetOutputState {
            port,
            power,
            mode: OutputMode::MOTORON,
            regulation: RegulationMode::MotorSpeed,
            turn_ratio: 0,
            run_state: RunState::Running,
            tacho_limit: 0,
        }
        .validated()
    }
}

impl Command for SetOutputState {
    type Response = ();
    const CLASS: CommandClass = CommandClass::Direct;
    const OPCODE: u8 = SET_OUTPUT_STATE;
    const REPLY_LEN: usize = 3;

    fn fields(&self) -> Vec<Field> {
        vec![
            Field::Byte(self.port as u8),
            Field::Byte(self.power as u8),
            Field::Byte(self.mode.bits()),
            Field::Byte(self.regulation as u8),
            Field::Byte(self.turn_ratio as u8),
            Field::Byte(self.run_state as u8),
            Field::Long(self.tacho_limit),
        ]
    }

    fn decode_reply(_reply: &[u8]) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Battery voltage in millivolts
#[derive(Debug, Clone, Copy)]
pub struct GetBatteryLevel;

impl Command for GetBatteryLevel {
    type Response = u16;
    const CLASS: CommandClass = CommandClass::Direct;
    const OPCODE: u8 = GET_BATTERY_LEVEL;
    const REPLY_LEN: usize = 5;

    fn decode_reply(reply: &[u8]) -> Result<u16, ProtocolError> {
        read_u16_le(reply, 3)
    }
}

/// Resets the sleep timer. Replies with the sleep limit in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct KeepAlive;

impl Command for KeepAlive {
    type Response = u32;
    const CLASS: CommandClass = CommandClass::Direct;
    const OPCODE: u8 = KEEP_ALIVE;
    const REPLY_LEN: usize = 7;

    fn decode_reply(reply: &[u8]) -> Result<u32, ProtocolError> {
        read_u32_le(reply, 3)
    }
}
