// Module that contains all commands that can be sent to an NXT

pub mod direct;
pub mod file;
pub mod frame;
pub mod system;

pub use frame::{CommandClass, CommandFrame, Field};

use crate::checks::ResponseChecks;
use crate::errors::ProtocolError;

/// A command trait that every NXT command implements
pub trait Command {
    type Response;

    /// Direct or system
    const CLASS: CommandClass;

    /// The command's opcode
    const OPCODE: u8;

    /// Length of a well-formed reply: marker, opcode, status and payload
    const REPLY_LEN: usize;

    /// Which parts of the reply the codec verifies before decoding
    const CHECKS: ResponseChecks = ResponseChecks::ALL;

    /// The command's arguments in wire order
    fn fields(&self) -> Vec<Field> {
        Vec::new()
    }

    /// Builds the frame for this command
    fn frame(&self, response_required: bool) -> CommandFrame {
        self.fields()
            .into_iter()
            .fold(CommandFrame::new(Self::CLASS, Self::OPCODE), CommandFrame::field)
            .respond(response_required)
    }

    /// Decodes a reply that already passed `CHECKS`
    fn decode_reply(reply: &[u8]) -> Result<Self::Response, ProtocolError>;
}
