//! Finding bricks: USB enumeration and Bluetooth name lookup.

use std::path::Path;

use rusb::{Device, GlobalContext};
use tracing::debug;

use super::usb::{NXT_PRODUCT_ID, NXT_VENDOR_ID};
use crate::errors::TransportError;
use crate::meta::BluetoothAddress;

/// This function finds every NXT on the USB bus.
pub fn nxt_usb_devices() -> Result<Vec<Device<GlobalContext>>, TransportError> {
    let mut found = Vec::new();

    for device in rusb::devices()?.iter() {
        // Devices we cannot describe are not ours to claim
        let desc = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => continue,
        };

        if desc.vendor_id() == NXT_VENDOR_ID && desc.product_id() == NXT_PRODUCT_ID {
            debug!(
                bus = device.bus_number(),
                address = device.address(),
                "found NXT on USB"
            );
            found.push(device);
        }
    }

    Ok(found)
}

/// Looks `name` up in a Bluetooth host table.
///
/// Each line holds an address followed by a name and optional aliases;
/// `#` starts a comment.
pub fn parse_hosts(table: &str, name: &str) -> Option<BluetoothAddress> {
    table
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default())
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let address = fields.next()?.parse::<BluetoothAddress>().ok()?;
            fields.any(|n| n == name).then_some(address)
        })
        .next()
}

/// Resolves a Bluetooth name to an address. A name that already is an
/// address is used as is; otherwise it is looked up in `hosts`.
pub fn resolve_bluetooth_name(
    name: &str,
    hosts: &Path,
) -> Result<Option<BluetoothAddress>, TransportError> {
    if let Ok(address) = name.parse::<BluetoothAddress>() {
        return Ok(Some(address));
    }

    let table = match std::fs::read_to_string(hosts) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(hosts = %hosts.display(), "no Bluetooth host table");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let address = parse_hosts(&table, name);
    debug!(name, ?address, "Bluetooth name lookup");
    Ok(address)
}
