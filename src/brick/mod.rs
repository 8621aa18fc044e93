//! Brick-independent operations routed to the right protocol.
//!
//! Each brick type declares the operations it supports; anything else is
//! answered with `BrickError::NotImplemented` before any I/O.

use std::fmt;
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use rusb::{Device, GlobalContext};
use tracing::{debug, warn};

pub mod nxt;
pub mod program_mode;
pub mod vex;

pub use nxt::{NxtBrick, NxtLink};
pub use vex::VexBrick;

use crate::config::Config;
use crate::devices::ports;
use crate::errors::{BrickError, TransportError};
use crate::meta::{BootloaderVersion, DeviceInfo, FirmwareVersion, OutputPort};
use crate::upload::{UploadFlags, UploadReport};

/// Most bricks a single discovery returns
pub const MAX_BRICKS: usize = 64;

/// The kinds of brick this crate knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrickType {
    Nxt,
    Rcx,
    Vex,
}

impl fmt::Display for BrickType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BrickType::Nxt => "NXT",
            BrickType::Rcx => "RCX",
            BrickType::Vex => "VEX",
        })
    }
}

bitflags! {
    /// Brick-independent operations
    pub struct Operations: u32 {
        const OPEN = 1 << 0;
        const CLOSE = 1 << 1;
        const STATUS = 1 << 2;
        const UPLOAD = 1 << 3;
        const DOWNLOAD = 1 << 4;
        const DELETE = 1 << 5;
        const START = 1 << 6;
        const STOP = 1 << 7;
        const PLAY_TONE = 1 << 8;
        const PLAY_SOUND = 1 << 9;
        const DEVICE_INFO = 1 << 10;
        const FIRMWARE_VERSION = 1 << 11;
        const BATTERY_LEVEL = 1 << 12;
        const FIRMWARE_UPLOAD = 1 << 13;
        const MOTOR = 1 << 14;
        const KEEP_ALIVE = 1 << 15;
    }
}

impl Operations {
    /// Name of a single operation for diagnostics
    pub fn name(self) -> &'static str {
        const NAMES: &[(Operations, &str)] = &[
            (Operations::OPEN, "open"),
            (Operations::CLOSE, "close"),
            (Operations::STATUS, "status"),
            (Operations::UPLOAD, "upload"),
            (Operations::DOWNLOAD, "download"),
            (Operations::DELETE, "delete"),
            (Operations::START, "start"),
            (Operations::STOP, "stop"),
            (Operations::PLAY_TONE, "play tone"),
            (Operations::PLAY_SOUND, "play sound"),
            (Operations::DEVICE_INFO, "device info"),
            (Operations::FIRMWARE_VERSION, "firmware version"),
            (Operations::BATTERY_LEVEL, "battery level"),
            (Operations::FIRMWARE_UPLOAD, "firmware upload"),
            (Operations::MOTOR, "motor control"),
            (Operations::KEEP_ALIVE, "keep alive"),
        ];
        NAMES
            .iter()
            .find(|(op, _)| *op == self)
            .map(|(_, name)| *name)
            .unwrap_or("operation")
    }
}

impl BrickType {
    /// The operations this brick type supports
    pub fn capabilities(self) -> Operations {
        match self {
            BrickType::Nxt => {
                Operations::all() - Operations::DOWNLOAD - Operations::FIRMWARE_UPLOAD
            }
            BrickType::Vex => {
                Operations::OPEN
                    | Operations::CLOSE
                    | Operations::STATUS
                    | Operations::UPLOAD
                    | Operations::START
                    | Operations::DEVICE_INFO
                    | Operations::FIRMWARE_VERSION
            }
            BrickType::Rcx => Operations::empty(),
        }
    }

    pub fn supports(self, operation: Operations) -> bool {
        self.capabilities().contains(operation)
    }
}

/// An RCX on an infrared tower. Known to discovery, not driven.
#[derive(Debug, Clone)]
pub struct RcxBrick {
    pub tower: PathBuf,
}

/// Firmware identity, per brick type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareInfo {
    Nxt(FirmwareVersion),
    Vex(BootloaderVersion),
}

impl fmt::Display for FirmwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirmwareInfo::Nxt(v) => v.fmt(f),
            FirmwareInfo::Vex(v) => v.fmt(f),
        }
    }
}

/// Device identity, per brick type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceDetails {
    Nxt(DeviceInfo),
    Vex(BootloaderVersion),
}

/// What `status` reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrickStatus {
    Nxt {
        info: DeviceInfo,
        firmware: FirmwareVersion,
        battery_mv: u16,
    },
    Vex {
        bootloader: BootloaderVersion,
    },
}

impl fmt::Display for BrickStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrickStatus::Nxt {
                info,
                firmware,
                battery_mv,
            } => {
                writeln!(f, "{}", info)?;
                writeln!(f, "{}", firmware)?;
                write!(f, "Battery level = {}mV", battery_mv)
            }
            BrickStatus::Vex { bootloader } => write!(f, "{}", bootloader),
        }
    }
}

/// A discovered brick of any type
pub enum BrickHandle {
    Nxt(NxtBrick),
    Rcx(RcxBrick),
    Vex(VexBrick),
}

impl BrickHandle {
    pub fn brick_type(&self) -> BrickType {
        match self {
            BrickHandle::Nxt(_) => BrickType::Nxt,
            BrickHandle::Rcx(_) => BrickType::Rcx,
            BrickHandle::Vex(_) => BrickType::Vex,
        }
    }

    pub fn is_open(&self) -> bool {
        match self {
            BrickHandle::Nxt(b) => b.is_open(),
            BrickHandle::Rcx(_) => false,
            BrickHandle::Vex(b) => b.is_open(),
        }
    }

    fn require(&self, operation: Operations) -> Result<(), BrickError> {
        let brick = self.brick_type();
        if brick.supports(operation) {
            Ok(())
        } else {
            Err(BrickError::NotImplemented {
                operation: operation.name(),
                brick,
            })
        }
    }

    fn not_implemented<T>(&self, operation: Operations) -> Result<T, BrickError> {
        Err(BrickError::NotImplemented {
            operation: operation.name(),
            brick: self.brick_type(),
        })
    }

    pub fn open(&mut self) -> Result<(), BrickError> {
        self.require(Operations::OPEN)?;
        match self {
            BrickHandle::Nxt(b) => b.open(),
            BrickHandle::Vex(b) => b.open(),
            BrickHandle::Rcx(_) => self.not_implemented(Operations::OPEN),
        }
    }

    pub fn close(&mut self) -> Result<(), BrickError> {
        self.require(Operations::CLOSE)?;
        match self {
            BrickHandle::Nxt(b) => b.close(),
            BrickHandle::Vex(b) => b.close(),
            BrickHandle::Rcx(_) => self.not_implemented(Operations::CLOSE),
        }
    }

    /// Opens the brick, runs `op` and closes it again. A close failure is
    /// reported only when `op` itself succeeded.
    pub fn session<T>(
        &mut self,
        op: impl FnOnce(&mut BrickHandle) -> Result<T, BrickError>,
    ) -> Result<T, BrickError> {
        let opened_here = !self.is_open();
        if opened_here {
            self.open()?;
        }
        let result = op(self);
        if opened_here {
            match (self.close(), &result) {
                (Err(e), Ok(_)) => return Err(e),
                (Err(e), Err(_)) => warn!(error = %e, "close after failed operation"),
                _ => (),
            }
        }
        result
    }

    pub fn status(&mut self) -> Result<BrickStatus, BrickError> {
        self.require(Operations::STATUS)?;
        match self {
            BrickHandle::Nxt(b) => Ok(BrickStatus::Nxt {
                info: b.device_info()?,
                firmware: b.firmware_version()?,
                battery_mv: b.battery_level()?,
            }),
            BrickHandle::Vex(b) => Ok(BrickStatus::Vex {
                bootloader: b.status()?,
            }),
            BrickHandle::Rcx(_) => self.not_implemented(Operations::STATUS),
        }
    }

    /// Uploads a program or sound (NXT) or a hex image (VEX).
    pub fn upload(&mut self, path: &Path, flags: UploadFlags) -> Result<UploadReport, BrickError> {
        self.require(Operations::UPLOAD)?;
        match self {
            BrickHandle::Nxt(b) => b.upload(path, flags),
            BrickHandle::Vex(b) => b.upload(path, &mut |done, total| {
                debug!(done, total, "clusters written");
            }),
            BrickHandle::Rcx(_) => self.not_implemented(Operations::UPLOAD),
        }
    }

    /// Copies a brick-side file to the host. No brick supports it yet.
    pub fn download(&mut self, _name: &str, _to: &Path) -> Result<(), BrickError> {
        self.require(Operations::DOWNLOAD)?;
        self.not_implemented(Operations::DOWNLOAD)
    }

    /// Replaces the brick's firmware. No brick supports it yet.
    pub fn upload_firmware(&mut self, _image: &Path) -> Result<(), BrickError> {
        self.require(Operations::FIRMWARE_UPLOAD)?;
        self.not_implemented(Operations::FIRMWARE_UPLOAD)
    }

    pub fn delete(&mut self, name: &str) -> Result<(), BrickError> {
        self.require(Operations::DELETE)?;
        match self {
            BrickHandle::Nxt(b) => b.delete(name),
            _ => self.not_implemented(Operations::DELETE),
        }
    }

    /// Starts a program: the named one on an NXT, the flashed one on a VEX.
    pub fn start(&mut self, name: &str) -> Result<(), BrickError> {
        self.require(Operations::START)?;
        match self {
            BrickHandle::Nxt(b) => b.start(name),
            BrickHandle::Vex(b) => b.start(),
            BrickHandle::Rcx(_) => self.not_implemented(Operations::START),
        }
    }

    pub fn stop(&mut self) -> Result<(), BrickError> {
        self.require(Operations::STOP)?;
        match self {
            BrickHandle::Nxt(b) => b.stop(),
            _ => self.not_implemented(Operations::STOP),
        }
    }

    pub fn play_tone(&mut self, frequency: u16, duration_ms: u16) -> Result<(), BrickError> {
        self.require(Operations::PLAY_TONE)?;
        match self {
            BrickHandle::Nxt(b) => b.play_tone(frequency, duration_ms),
            _ => self.not_implemented(Operations::PLAY_TONE),
        }
    }

    pub fn play_sound(&mut self, name: &str, looping: bool) -> Result<(), BrickError> {
        self.require(Operations::PLAY_SOUND)?;
        match self {
            BrickHandle::Nxt(b) => b.play_sound(name, looping),
            _ => self.not_implemented(Operations::PLAY_SOUND),
        }
    }

    pub fn motor_on(&mut self, port: OutputPort, power: i8) -> Result<(), BrickError> {
        self.require(Operations::MOTOR)?;
        match self {
            BrickHandle::Nxt(b) => b.motor_on(port, power),
            _ => self.not_implemented(Operations::MOTOR),
        }
    }

    pub fn keep_alive(&mut self) -> Result<u32, BrickError> {
        self.require(Operations::KEEP_ALIVE)?;
        match self {
            BrickHandle::Nxt(b) => b.keep_alive(),
            _ => self.not_implemented(Operations::KEEP_ALIVE),
        }
    }

    pub fn device_info(&mut self) -> Result<DeviceDetails, BrickError> {
        self.require(Operations::DEVICE_INFO)?;
        match self {
            BrickHandle::Nxt(b) => Ok(DeviceDetails::Nxt(b.device_info()?)),
            BrickHandle::Vex(b) => Ok(DeviceDetails::Vex(b.status()?)),
            BrickHandle::Rcx(_) => self.not_implemented(Operations::DEVICE_INFO),
        }
    }

    pub fn firmware_version(&mut self) -> Result<FirmwareInfo, BrickError> {
        self.require(Operations::FIRMWARE_VERSION)?;
        match self {
            BrickHandle::Nxt(b) => Ok(FirmwareInfo::Nxt(b.firmware_version()?)),
            BrickHandle::Vex(b) => Ok(FirmwareInfo::Vex(b.status()?)),
            BrickHandle::Rcx(_) => self.not_implemented(Operations::FIRMWARE_VERSION),
        }
    }

    pub fn battery_level(&mut self) -> Result<u16, BrickError> {
        self.require(Operations::BATTERY_LEVEL)?;
        match self {
            BrickHandle::Nxt(b) => b.battery_level(),
            _ => self.not_implemented(Operations::BATTERY_LEVEL),
        }
    }
}

/// The bricks a discovery found, in discovery order
#[derive(Default)]
pub struct BrickList {
    bricks: Vec<BrickHandle>,
}

impl BrickList {
    pub fn new() -> Self {
        BrickList::default()
    }

    pub fn push(&mut self, brick: BrickHandle) -> Result<(), BrickError> {
        if self.bricks.len() >= MAX_BRICKS {
            return Err(BrickError::ListFull(MAX_BRICKS));
        }
        self.bricks.push(brick);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bricks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bricks.is_empty()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut BrickHandle> {
        self.bricks.get_mut(index)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut BrickHandle> {
        self.bricks.iter_mut()
    }

    /// The only brick, for operations that must not guess a target.
    pub fn single_mut(&mut self) -> Result<&mut BrickHandle, BrickError> {
        match self.bricks.len() {
            0 => Err(BrickError::NoBricks),
            1 => Ok(&mut self.bricks[0]),
            n => Err(BrickError::AmbiguousTarget(n)),
        }
    }

    /// Runs `op` in a session on every brick, collecting each outcome.
    pub fn each<T>(
        &mut self,
        mut op: impl FnMut(&mut BrickHandle) -> Result<T, BrickError>,
    ) -> Result<Vec<Result<T, BrickError>>, BrickError> {
        if self.bricks.is_empty() {
            return Err(BrickError::NoBricks);
        }
        Ok(self
            .bricks
            .iter_mut()
            .map(|brick| brick.session(&mut op))
            .collect())
    }
}

bitflags! {
    /// Which bricks and transports a discovery probes
    pub struct ProbeFlags: u32 {
        const NXT = 0x01;
        const RCX = 0x02;
        const USB = 0x10;
        const BLUETOOTH = 0x20;
        const SERIAL = 0x40;
    }
}

/// Finds NXTs: every one on USB, or failing that the configured Bluetooth
/// name. A USB bus that cannot be enumerated only skips the USB probe.
pub fn discover(probe: ProbeFlags, config: &Config) -> Result<BrickList, BrickError> {
    discover_with(probe, config, ports::nxt_usb_devices)
}

fn discover_with(
    probe: ProbeFlags,
    config: &Config,
    usb_devices: impl FnOnce() -> Result<Vec<Device<GlobalContext>>, TransportError>,
) -> Result<BrickList, BrickError> {
    let mut list = BrickList::new();

    if probe.contains(ProbeFlags::NXT | ProbeFlags::USB) {
        match usb_devices() {
            Ok(devices) => {
                for device in devices {
                    list.push(BrickHandle::Nxt(NxtBrick::new(NxtLink::Usb(device), config)))?;
                }
            }
            Err(e) => warn!(error = %e, "USB enumeration failed, skipping USB bricks"),
        }
    }

    if list.is_empty() && probe.contains(ProbeFlags::NXT | ProbeFlags::BLUETOOTH) {
        if let Some(address) =
            ports::resolve_bluetooth_name(&config.bluetooth_name, &config.bluetooth_hosts)?
        {
            list.push(BrickHandle::Nxt(NxtBrick::new(NxtLink::Bluetooth(address), config)))?;
        }
    }

    debug!(count = list.len(), "discovery finished");
    Ok(list)
}

/// The VEX controller on the configured serial device.
pub fn vex_on_serial(config: &Config) -> BrickHandle {
    BrickHandle::Vex(VexBrick::new(&config.serial_device, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::mock::ScriptedChannel;
    use crate::devices::{Channel, TransportKind};
    use crate::errors::{InternalError, ValidationError};

    fn attached_nxt(channel: ScriptedChannel) -> BrickHandle {
        BrickHandle::Nxt(NxtBrick::attached(Box::new(channel), &Config::default()))
    }

    #[test]
    fn empty_lists_report_no_bricks() {
        let mut list = BrickList::new();
        let err = list.each(|b| b.status()).unwrap_err();
        assert!(matches!(err, BrickError::NoBricks));
        assert_eq!(err.to_string(), "Sorry, no accessible bricks found.");
        assert_ne!(err.exit_code(), 0);
        assert!(matches!(list.single_mut(), Err(BrickError::NoBricks)));
    }

    #[test]
    fn several_bricks_are_ambiguous_for_single_targets() {
        let mut list = BrickList::new();
        for _ in 0..2 {
            let (channel, _log) = ScriptedChannel::new(TransportKind::Usb);
            list.push(attached_nxt(channel)).unwrap();
        }
        assert!(matches!(list.single_mut(), Err(BrickError::AmbiguousTarget(2))));
    }

    #[test]
    fn lists_hold_at_most_64_bricks() {
        let mut list = BrickList::new();
        for _ in 0..MAX_BRICKS {
            list.push(BrickHandle::Rcx(RcxBrick { tower: PathBuf::new() })).unwrap();
        }
        assert!(matches!(
            list.push(BrickHandle::Rcx(RcxBrick { tower: PathBuf::new() })),
            Err(BrickError::ListFull(MAX_BRICKS))
        ));
    }

    #[test]
    fn capability_table() {
        assert!(BrickType::Nxt.supports(Operations::PLAY_TONE));
        assert!(!BrickType::Nxt.supports(Operations::DOWNLOAD));
        assert!(!BrickType::Nxt.supports(Operations::FIRMWARE_UPLOAD));
        assert!(BrickType::Vex.supports(Operations::UPLOAD));
        assert!(!BrickType::Vex.supports(Operations::PLAY_TONE));
        assert_eq!(BrickType::Rcx.capabilities(), Operations::empty());
    }

    #[test]
    fn unsupported_operations_are_not_implemented() {
        let mut rcx = BrickHandle::Rcx(RcxBrick { tower: PathBuf::new() });
        assert!(matches!(
            rcx.status(),
            Err(BrickError::NotImplemented { operation: "status", brick: BrickType::Rcx })
        ));

        let (channel, log) = ScriptedChannel::new(TransportKind::Serial);
        let mut vex = BrickHandle::Vex(VexBrick::attached(
            Box::new(channel),
            Box::new(|_: &mut dyn Channel| -> Result<(), BrickError> { Ok(()) }),
            &Config::default(),
        ));
        assert!(matches!(
            vex.play_tone(440, 100),
            Err(BrickError::NotImplemented { brick: BrickType::Vex, .. })
        ));
        assert!(log.borrow().sent.is_empty());

        let (channel, _log) = ScriptedChannel::new(TransportKind::Usb);
        let mut nxt = attached_nxt(channel);
        let err = nxt.download("pong.rxe", Path::new("pong.rxe")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "download is not implemented for NXT bricks"
        );
    }

    #[test]
    fn play_tone_validates_then_sends_once() {
        let (channel, log) = ScriptedChannel::new(TransportKind::Usb);
        let mut nxt = attached_nxt(channel.reply(&[0x02, 0x03, 0x00]));

        assert!(matches!(
            nxt.play_tone(100, 50),
            Err(BrickError::Validation(ValidationError::Frequency(100)))
        ));
        assert!(log.borrow().sent.is_empty());

        nxt.play_tone(440, 200).unwrap();
        assert_eq!(log.borrow().sent, vec![vec![0x00, 0x03, 0xB8, 0x01, 0xC8, 0x00]]);
    }

    #[test]
    fn nxt_status_gathers_info_firmware_and_battery() {
        let mut info = vec![0x02, 0x9b, 0x00];
        info.extend_from_slice(b"NXT\0\0\0\0\0\0\0\0\0\0\0\0");
        info.extend_from_slice(&[0x00, 0x16, 0x53, 0x01, 0x02, 0x03, 0x00]);
        info.extend_from_slice(&[0; 8]);

        let (channel, _log) = ScriptedChannel::new(TransportKind::Usb);
        let channel = channel
            .reply(&info)
            .reply(&[0x02, 0x88, 0x00, 124, 1, 28, 1])
            .reply(&[0x02, 0x0b, 0x00, 0x40, 0x1f]);
        let mut nxt = attached_nxt(channel);

        let status = nxt.status().unwrap();
        let text = status.to_string();
        assert!(text.contains("Name: NXT"));
        assert!(text.contains("Firmware: 1.28"));
        assert!(text.contains("Protocol: 1.124"));
        assert!(text.ends_with("Battery level = 8000mV"));
    }

    #[test]
    fn open_handles_cannot_be_reopened_and_closed_ones_refuse_work() {
        let (channel, log) = ScriptedChannel::new(TransportKind::Usb);
        let mut nxt = attached_nxt(channel);
        assert!(matches!(
            nxt.open(),
            Err(BrickError::Internal(InternalError::AlreadyOpen))
        ));

        nxt.close().unwrap();
        assert!(log.borrow().closed);
        assert!(matches!(
            nxt.stop(),
            Err(BrickError::Internal(InternalError::NotConnected))
        ));
    }

    #[test]
    fn usb_failures_fall_back_to_bluetooth() {
        let config = Config {
            bluetooth_name: "00:16:53:01:02:03".to_string(),
            ..Config::default()
        };
        let probe = ProbeFlags::NXT | ProbeFlags::USB | ProbeFlags::BLUETOOTH;
        let mut list = discover_with(probe, &config, || {
            Err(TransportError::UsbError(rusb::Error::Access))
        })
        .unwrap();

        assert_eq!(list.len(), 1);
        match list.single_mut().unwrap() {
            BrickHandle::Nxt(nxt) => {
                assert!(matches!(nxt.link(), NxtLink::Bluetooth(a) if a.0[5] == 0x03))
            }
            _ => panic!("expected an NXT"),
        }
    }

    #[test]
    fn sessions_leave_already_open_bricks_open() {
        let (channel, log) = ScriptedChannel::new(TransportKind::Usb);
        let mut nxt = attached_nxt(channel.reply(&[0x02, 0x01, 0x00]));
        nxt.session(|b| b.stop()).unwrap();
        assert!(nxt.is_open());
        assert!(!log.borrow().closed);
    }
}
