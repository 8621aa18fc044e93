//! An NXT reached over USB or Bluetooth.

use std::fmt;
use std::path::Path;
use std::time::Instant;

use rusb::{Device, GlobalContext};
use tracing::debug;

use crate::config::Config;
use crate::devices::bluetooth::BluetoothChannel;
use crate::devices::usb::UsbChannel;
use crate::devices::Channel;
use crate::errors::{BrickError, InternalError};
use crate::filename::Filename;
use crate::meta::{DeviceInfo, FirmwareVersion, OutputPort};
use crate::protocol::{NxtProtocol, ResponseMode};
use crate::upload::{upload_nxt_file, UploadFlags, UploadReport};

/// Where an NXT can be reached
pub enum NxtLink {
    Usb(Device<GlobalContext>),
    Bluetooth(crate::meta::BluetoothAddress),
    /// A channel supplied already open by the caller
    Attached,
}

impl fmt::Debug for NxtLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NxtLink::Usb(d) => write!(f, "usb {:03}:{:03}", d.bus_number(), d.address()),
            NxtLink::Bluetooth(a) => write!(f, "bluetooth {}", a),
            NxtLink::Attached => write!(f, "attached"),
        }
    }
}

/// An NXT and, while open, the codec talking to it
pub struct NxtBrick {
    link: NxtLink,
    config: Config,
    protocol: Option<NxtProtocol<Box<dyn Channel>>>,
}

impl NxtBrick {
    pub fn new(link: NxtLink, config: &Config) -> Self {
        NxtBrick {
            link,
            config: config.clone(),
            protocol: None,
        }
    }

    /// Wraps a channel that is already open.
    pub fn attached(channel: Box<dyn Channel>, config: &Config) -> Self {
        NxtBrick {
            link: NxtLink::Attached,
            config: config.clone(),
            protocol: Some(NxtProtocol::new(channel, config)),
        }
    }

    pub fn link(&self) -> &NxtLink {
        &self.link
    }

    pub fn is_open(&self) -> bool {
        self.protocol.is_some()
    }

    pub fn open(&mut self) -> Result<(), BrickError> {
        if self.protocol.is_some() {
            return Err(InternalError::AlreadyOpen.into());
        }

        let channel: Box<dyn Channel> = match &self.link {
            NxtLink::Usb(device) => Box::new(UsbChannel::open(device, &self.config)?),
            NxtLink::Bluetooth(address) => Box::new(BluetoothChannel::open(*address, &self.config)?),
            NxtLink::Attached => return Err(InternalError::NotConnected.into()),
        };
        debug!(link = ?self.link, "NXT open");
        self.protocol = Some(NxtProtocol::new(channel, &self.config));
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), BrickError> {
        match self.protocol.take() {
            Some(protocol) => protocol.close(),
            None => Err(InternalError::NotConnected.into()),
        }
    }

    /// The open codec
    pub fn protocol(&mut self) -> Result<&mut NxtProtocol<Box<dyn Channel>>, BrickError> {
        self.protocol
            .as_mut()
            .ok_or_else(|| InternalError::NotConnected.into())
    }

    pub fn set_response_mode(&mut self, mode: ResponseMode) -> Result<(), BrickError> {
        self.protocol()?.set_response_mode(mode);
        Ok(())
    }

    pub fn upload(&mut self, path: &Path, flags: UploadFlags) -> Result<UploadReport, BrickError> {
        let started = Instant::now();
        let bytes = upload_nxt_file(self.protocol()?, path, flags)?;
        Ok(UploadReport {
            bytes: bytes as usize,
            elapsed: started.elapsed(),
        })
    }

    pub fn delete(&mut self, name: &str) -> Result<(), BrickError> {
        let name = Filename::new(name, None)?;
        self.protocol()?.delete_file(&name)
    }

    pub fn start(&mut self, name: &str) -> Result<(), BrickError> {
        self.protocol()?.start_program(name)
    }

    pub fn stop(&mut self) -> Result<(), BrickError> {
        self.protocol()?.stop_program()
    }

    pub fn play_tone(&mut self, frequency: u16, duration_ms: u16) -> Result<(), BrickError> {
        self.protocol()?.play_tone(frequency, duration_ms)
    }

    pub fn play_sound(&mut self, name: &str, looping: bool) -> Result<(), BrickError> {
        self.protocol()?.play_sound_file(name, looping)
    }

    pub fn motor_on(&mut self, port: OutputPort, power: i8) -> Result<(), BrickError> {
        self.protocol()?.motor_on(port, power)
    }

    pub fn keep_alive(&mut self) -> Result<u32, BrickError> {
        self.protocol()?.keep_alive()
    }

    pub fn device_info(&mut self) -> Result<DeviceInfo, BrickError> {
        self.protocol()?.device_info()
    }

    pub fn firmware_version(&mut self) -> Result<FirmwareVersion, BrickError> {
        self.protocol()?.firmware_version()
    }

    pub fn battery_level(&mut self) -> Result<u16, BrickError> {
        self.protocol()?.battery_level()
    }
}
