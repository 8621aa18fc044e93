//! Wire protocols: the NXT command codec and the PIC bootloader.

pub mod nxt;
pub mod pic;

pub use nxt::{NxtProtocol, ResponseMode};
pub use pic::PicProtocol;
