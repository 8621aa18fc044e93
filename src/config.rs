//! Runtime settings shared by every channel and codec.

use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the Bluetooth brick to look for
pub const BTNAME_ENV: &str = "ROBOCTL_BTNAME";

/// Environment variable overriding the VEX serial device
pub const VEX_DEVICE_ENV: &str = "VEXCTL_DEV";

/// The default timeout for a USB bulk transfer in milliseconds
pub const USB_TIMEOUT_MS: u64 = 1000;

/// The default timeout for a serial read in seconds
pub const SERIAL_TIMEOUT_SECONDS: u64 = 30;

/// Bluetooth name used when neither a flag nor the environment gives one
pub const DEFAULT_BTNAME: &str = "NXT";

/// Host table mapping Bluetooth names to addresses
pub const DEFAULT_BLUETOOTH_HOSTS: &str = "/etc/bluetooth/hosts";

#[cfg(target_os = "linux")]
pub const DEFAULT_VEX_DEVICE: &str = "/dev/ttyUSB0";
#[cfg(target_os = "macos")]
pub const DEFAULT_VEX_DEVICE: &str = "/dev/cu.usbserial";
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub const DEFAULT_VEX_DEVICE: &str = "/dev/cuaU0";

/// How the controller is put into program mode before a flash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgramModeKind {
    /// Ask the operator to press the PGRM button and wait for return
    #[default]
    Prompt,
    /// Toggle the RS-232 control lines
    ControlLines,
}

/// Settings threaded through channel and codec constructors.
///
/// # Members
///
/// * `debug` - Dump every frame sent and received at debug level
/// * `usb_timeout` - Bound on each USB bulk transfer
/// * `serial_timeout` - Backstop on each serial read
/// * `bluetooth_name` - Name of the NXT to resolve over Bluetooth
/// * `bluetooth_hosts` - Host table used for Bluetooth name lookup
/// * `serial_device` - Device node the VEX programming cable is attached to
/// * `program_mode` - Handshake used to enter VEX program mode
#[derive(Debug, Clone)]
pub struct Config {
    pub debug: bool,
    pub usb_timeout: Duration,
    pub serial_timeout: Duration,
    pub bluetooth_name: String,
    pub bluetooth_hosts: PathBuf,
    pub serial_device: PathBuf,
    pub program_mode: ProgramModeKind,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            debug: false,
            usb_timeout: Duration::from_millis(USB_TIMEOUT_MS),
            serial_timeout: Duration::from_secs(SERIAL_TIMEOUT_SECONDS),
            bluetooth_name: DEFAULT_BTNAME.to_string(),
            bluetooth_hosts: PathBuf::from(DEFAULT_BLUETOOTH_HOSTS),
            serial_device: PathBuf::from(DEFAULT_VEX_DEVICE),
            program_mode: ProgramModeKind::default(),
        }
    }
}

impl Config {
    /// Defaults overridden by `ROBOCTL_BTNAME` and `VEXCTL_DEV` when set.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Config::default();
        if let Some(name) = lookup(BTNAME_ENV).filter(|n| !n.is_empty()) {
            config.bluetooth_name = name;
        }
        if let Some(dev) = lookup(VEX_DEVICE_ENV).filter(|d| !d.is_empty()) {
            config.serial_device = PathBuf::from(dev);
        }
        config
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}
