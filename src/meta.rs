//! Contains metadata about NXT and VEX bricks
use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

use crate::errors::ValidationError;

/// A six byte Bluetooth device address, most significant byte first as it
/// is written in `XX:XX:XX:XX:XX:XX` notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BluetoothAddress(pub [u8; 6]);

impl BluetoothAddress {
    /// The address in the byte order the kernel's `bdaddr_t` uses (reversed).
    pub fn to_bdaddr(self) -> [u8; 6] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }
}

impl fmt::Display for BluetoothAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for BluetoothAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(|| format!("'{}' is too short", s))?;
            if part.len() != 2 {
                return Err(format!("'{}' is not a Bluetooth address", s));
            }
            *byte = u8::from_str_radix(part, 16).map_err(|e| format!("'{}': {}", s, e))?;
        }
        if parts.next().is_some() {
            return Err(format!("'{}' is too long", s));
        }
        Ok(BluetoothAddress(bytes))
    }
}

/// Firmware and protocol versions reported by an NXT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub protocol_major: u8,
    pub protocol_minor: u8,
    pub firmware_major: u8,
    pub firmware_minor: u8,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Firmware: {}.{:02}", self.firmware_major, self.firmware_minor)?;
        write!(f, "Protocol: {}.{}", self.protocol_major, self.protocol_minor)
    }
}

/// The NXT's answer to get-device-info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub address: BluetoothAddress,
    pub signal_strength: u32,
    pub free_flash: u32,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Name: {}", self.name)?;
        writeln!(f, "Bluetooth address: {}", self.address)?;
        writeln!(f, "Signal strength: {}", self.signal_strength)?;
        write!(f, "Free flash: {} bytes", self.free_flash)
    }
}

/// PIC bootloader version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootloaderVersion {
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for BootloaderVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bootloader version: {}.{}", self.major, self.minor)
    }
}

/// Human readable name for an NXT status byte.
pub fn nxt_status_name(status: &u8) -> &'static str {
    match *status {
        0x00 => "success",
        0x20 => "pending communication transaction in progress",
        0x40 => "specified mailbox queue is empty",
        0x81 => "no more handles",
        0x82 => "no space",
        0x83 => "no more files",
        0x84 => "end of file expected",
        0x85 => "end of file",
        0x86 => "not a linear file",
        0x87 => "file not found",
        0x88 => "handle already closed",
        0x89 => "no linear space",
        0x8A => "undefined error",
        0x8B => "file is busy",
        0x8C => "no write buffers",
        0x8D => "append not possible",
        0x8E => "file is full",
        0x8F => "file exists",
        0x90 => "module not found",
        0x91 => "out of boundary",
        0x92 => "illegal file name",
        0x93 => "illegal handle",
        0xBD => "request failed",
        0xBE => "unknown command opcode",
        0xBF => "insane packet",
        0xC0 => "data contains out-of-range values",
        0xDD => "communication bus error",
        0xDE => "no free memory in communication buffer",
        0xDF => "specified channel/connection is not valid",
        0xE0 => "specified channel/connection not configured or busy",
        0xEC => "no active program",
        0xED => "illegal size specified",
        0xEE => "illegal mailbox queue id specified",
        0xEF => "attempted to access invalid field of a structure",
        0xF0 => "bad input or output specified",
        0xFB => "insufficient memory available",
        0xFF => "bad arguments",
        _ => "unknown status",
    }
}

/// NXT motor ports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputPort {
    A = 0x00,
    B = 0x01,
    C = 0x02,
    All = 0xFF,
}

impl FromStr for OutputPort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" | "0" => Ok(OutputPort::A),
            "B" | "1" => Ok(OutputPort::B),
            "C" | "2" => Ok(OutputPort::C),
            "ALL" => Ok(OutputPort::All),
            _ => Err(format!("'{}' is not an output port (A, B, C or ALL)", s)),
        }
    }
}

bitflags! {
    /// Output mode bits for set-output-state
    pub struct OutputMode: u8 {
        const COAST = 0x00;
        const MOTORON = 0x01;
        const BRAKE = 0x02;
        const REGULATED = 0x04;
    }
}

/// Regulation mode for set-output-state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RegulationMode {
    Idle = 0x00,
    MotorSpeed = 0x01,
    MotorSync = 0x02,
}

/// Run state for set-output-state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Idle = 0x00,
    RampUp = 0x10,
    Running = 0x20,
    RampDown = 0x40,
}

/// Checks a signed percentage (power, turn ratio) lies in -100..=100.
pub fn check_percentage(field: &'static str, value: i8) -> Result<i8, ValidationError> {
    if (-100..=100).contains(&value) {
        Ok(value)
    } else {
        Err(ValidationError::Percentage { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bluetooth_addresses_parse_and_print() {
        let address: BluetoothAddress = "00:16:53:0a:1b:2c".parse().unwrap();
        assert_eq!(address.0, [0x00, 0x16, 0x53, 0x0a, 0x1b, 0x2c]);
        assert_eq!(address.to_string(), "00:16:53:0a:1b:2c");
        assert_eq!(address.to_bdaddr(), [0x2c, 0x1b, 0x0a, 0x53, 0x16, 0x00]);
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        assert!("00:16:53".parse::<BluetoothAddress>().is_err());
        assert!("00:16:53:0a:1b:2c:3d".parse::<BluetoothAddress>().is_err());
        assert!("NXT".parse::<BluetoothAddress>().is_err());
    }

    #[test]
    fn firmware_version_prints_like_the_status_report() {
        let version = FirmwareVersion {
            protocol_major: 1,
            protocol_minor: 124,
            firmware_major: 1,
            firmware_minor: 5,
        };
        assert_eq!(version.to_string(), "Firmware: 1.05\nProtocol: 1.124");
    }

    #[test]
    fn percentages_are_bounded() {
        assert_eq!(check_percentage("power", 100), Ok(100));
        assert_eq!(check_percentage("power", -100), Ok(-100));
        assert!(check_percentage("power", 101).is_err());
        assert!(check_percentage("turn ratio", -128).is_err());
    }
}
