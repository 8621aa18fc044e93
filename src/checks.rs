/// NXT response checks
use bitflags::bitflags;

bitflags! {
    /// These flags determine what checks the codec will perform
    /// on a received NXT response.
    pub struct ResponseChecks: u8 {
        const NONE = 0b00000000;
        const LENGTH = 0b00000001;
        const STATUS = 0b00000010;
        const OPCODE = 0b00000100;
        const ALL = Self::LENGTH.bits | Self::STATUS.bits | Self::OPCODE.bits;
    }
}
