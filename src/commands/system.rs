//! NXT system commands that manage the brick itself.

use super::frame::{field_at, read_string, read_u32_le};
use super::{Command, CommandClass};
use crate::errors::ProtocolError;
use crate::meta::{BluetoothAddress, DeviceInfo, FirmwareVersion};

pub const GET_FIRMWARE_VERSION: u8 = 0x88;
pub const GET_DEVICE_INFO: u8 = 0x9B;
pub const BLUETOOTH_FACTORY_RESET: u8 = 0xA4;

/// Width of the brick name in a device-info reply
const NAME_WIDTH: usize = 15;

/// Firmware and protocol versions
#[derive(Debug, Clone, Copy)]
pub struct GetFirmwareVersion;

impl Command for GetFirmwareVersion {
    type Response = FirmwareVersion;
    const CLASS: CommandClass = CommandClass::System;
    const OPCODE: u8 = GET_FIRMWARE_VERSION;
    const REPLY_LEN: usize = 7;

    fn decode_reply(reply: &[u8]) -> Result<FirmwareVersion, ProtocolError> {
        let [protocol_minor, protocol_major, firmware_minor, firmware_major] =
            field_at::<4>(reply, 3)?;
        Ok(FirmwareVersion {
            protocol_major,
            protocol_minor,
            firmware_major,
            firmware_minor,
        })
    }
}

/// Name, Bluetooth address, signal strength and free flash
#[derive(Debug, Clone, Copy)]
pub struct GetDeviceInfo;

impl Command for GetDeviceInfo {
    type Response = DeviceInfo;
    const CLASS: CommandClass = CommandClass::System;
    const OPCODE: u8 = GET_DEVICE_INFO;
    const REPLY_LEN: usize = 33;

    fn decode_reply(reply: &[u8]) -> Result<DeviceInfo, ProtocolError> {
        Ok(DeviceInfo {
            name: read_string(reply, 3, NAME_WIDTH)?,
            address: BluetoothAddress(field_at::<6>(reply, 18)?),
            signal_strength: read_u32_le(reply, 25)?,
            free_flash: read_u32_le(reply, 29)?,
        })
    }
}

/// Restores the brick's Bluetooth settings to factory defaults
#[derive(Debug, Clone, Copy)]
pub struct BluetoothFactoryReset;

impl Command for BluetoothFactoryReset {
    type Response = ();
    const CLASS: CommandClass = CommandClass::System;
    const OPCODE: u8 = BLUETOOTH_FACTORY_RESET;
    const REPLY_LEN: usize = 3;

    fn decode_reply(_reply: &[u8]) -> Result<(), ProtocolError> {
        Ok(())
    }
}
