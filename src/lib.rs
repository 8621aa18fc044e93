//! Communication with Lego NXT and RCX bricks and VEX/PIC controllers.

pub mod brick;
pub mod checks;
pub mod commands;
pub mod config;
pub mod devices;
pub mod errors;
pub mod filename;
pub mod firmware;
pub mod meta;
pub mod protocol;
pub mod upload;

pub use brick::{discover, BrickHandle, BrickList, BrickType, Operations, ProbeFlags};
pub use config::Config;
pub use errors::BrickError;
