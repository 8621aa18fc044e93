//! Ways of putting a VEX controller into its bootloader.
//!
//! The bootloader only accepts erase and write commands in program mode.
//! Entering it is hardware specific: the controllers in the field either
//! need the operator to press the programming module's button, or respond
//! to a toggle of the RS-232 control lines. Any closure taking the channel
//! also works as a handshake.

use std::io::{BufRead, BufReader, Stdin, Stdout, Write};
use std::time::Duration;

use tracing::debug;

use crate::config::ProgramModeKind;
use crate::devices::Channel;
use crate::errors::{BrickError, TransportError};

/// Instructions shown by `OperatorPrompt`
pub const PROMPT: &str = "Make sure the VEX controller is turned on.\n\
Press the button on the programming module until the PGRM STATUS button flashes.\n\
Then press return...";

/// A handshake that leaves the controller in program mode
pub trait ProgramMode {
    fn enter(&mut self, channel: &mut dyn Channel) -> Result<(), BrickError>;
}

impl<F> ProgramMode for F
where
    F: FnMut(&mut dyn Channel) -> Result<(), BrickError>,
{
    fn enter(&mut self, channel: &mut dyn Channel) -> Result<(), BrickError> {
        self(channel)
    }
}

/// Asks the operator to press the PGRM button and waits for return.
pub struct OperatorPrompt<R: BufRead, W: Write> {
    input: R,
    output: W,
}

impl OperatorPrompt<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        OperatorPrompt::new(BufReader::new(std::io::stdin()), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> OperatorPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        OperatorPrompt { input, output }
    }
}

impl<R: BufRead, W: Write> ProgramMode for OperatorPrompt<R, W> {
    fn enter(&mut self, channel: &mut dyn Channel) -> Result<(), BrickError> {
        writeln!(self.output, "{}", PROMPT).map_err(TransportError::from)?;
        self.output.flush().map_err(TransportError::from)?;

        let mut line = String::new();
        let read = self.input.read_line(&mut line).map_err(TransportError::from)?;
        if read == 0 {
            return Err(TransportError::IoError(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "no operator confirmation for program mode",
            ))
            .into());
        }

        // The button press can leave status bytes behind
        channel.drain()?;
        Ok(())
    }
}

/// One state of the control lines and how long to hold it. `rts` and
/// `dtr` are modem control bits, `true` meaning the bit is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlStep {
    pub rts: bool,
    pub dtr: bool,
    pub hold: Duration,
}

/// Toggles RTS and DTR through a timed sequence.
#[derive(Debug, Clone)]
pub struct ControlLineSequence {
    steps: Vec<ControlStep>,
}

impl ControlLineSequence {
    pub fn new(steps: Vec<ControlStep>) -> Self {
        ControlLineSequence { steps }
    }

    pub fn steps(&self) -> &[ControlStep] {
        &self.steps
    }
}

impl Default for ControlLineSequence {
    /// RS-232 lines use negative logic: a set modem bit drives the line
    /// low. Both lines low for 500 ms, both raised for 25 ms, RTS dropped
    /// for 25 ms, then both low for 250 ms. The timings are empirical.
    fn default() -> Self {
        let step = |rts, dtr, ms| ControlStep {
            rts,
            dtr,
            hold: Duration::from_millis(ms),
        };
        ControlLineSequence::new(vec![
            step(true, true, 500),
            step(false, false, 25),
            step(true, false, 25),
            step(true, true, 250),
        ])
    }
}

impl ProgramMode for ControlLineSequence {
    fn enter(&mut self, channel: &mut dyn Channel) -> Result<(), BrickError> {
        for step in &self.steps {
            debug!(rts = step.rts, dtr = step.dtr, hold = ?step.hold, "control lines");
            channel.set_control_lines(step.rts, step.dtr)?;
            std::thread::sleep(step.hold);
        }
        channel.drain()?;
        Ok(())
    }
}

/// The handshake a configuration asks for.
pub fn for_kind(kind: ProgramModeKind) -> Box<dyn ProgramMode> {
    match kind {
        ProgramModeKind::Prompt => Box::new(OperatorPrompt::stdio()),
        ProgramModeKind::ControlLines => Box::new(ControlLineSequence::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::mock::ScriptedChannel;
    use crate::devices::TransportKind;

    #[test]
    fn prompt_waits_for_return_then_drains() {
        let (mut channel, log) = ScriptedChannel::new(TransportKind::Serial);
        let mut output = Vec::new();
        let mut prompt = OperatorPrompt::new(&b"\n"[..], &mut output);
        prompt.enter(&mut channel).unwrap();
        drop(prompt);

        assert!(String::from_utf8(output).unwrap().contains("PGRM STATUS"));
        assert_eq!(log.borrow().drained, 1);
    }

    #[test]
    fn prompt_fails_without_an_operator() {
        let (mut channel, log) = ScriptedChannel::new(TransportKind::Serial);
        let mut prompt = OperatorPrompt::new(&b""[..], Vec::new());
        assert!(matches!(
            prompt.enter(&mut channel),
            Err(BrickError::Transport(TransportError::IoError(e)))
                if e.kind() == std::io::ErrorKind::UnexpectedEof
        ));
        assert_eq!(log.borrow().drained, 0);
    }

    #[test]
    fn control_lines_follow_the_sequence() {
        let (mut channel, log) = ScriptedChannel::new(TransportKind::Serial);
        let mut sequence = ControlLineSequence::new(
            ControlLineSequence::default()
                .steps()
                .iter()
                .map(|s| ControlStep {
                    hold: Duration::ZERO,
                    ..*s
                })
                .collect(),
        );
        sequence.enter(&mut channel).unwrap();

        assert_eq!(
            log.borrow().control_lines,
            vec![(true, true), (false, false), (true, false), (true, true)]
        );
    }

    #[test]
    fn default_sequence_keeps_the_empirical_timings() {
        let holds: Vec<u64> = ControlLineSequence::default()
            .steps()
            .iter()
            .map(|s| s.hold.as_millis() as u64)
            .collect();
        assert_eq!(holds, vec![500, 25, 25, 250]);
    }
}
