//! NXT over USB bulk endpoints.

use std::time::Duration;

use rusb::{Device, DeviceHandle, GlobalContext};
use tracing::debug;

use super::{hex_dump, Channel, TransportKind};
use crate::config::Config;
use crate::errors::TransportError;

/// Lego's USB vendor id
pub const NXT_VENDOR_ID: u16 = 0x0694;
/// The NXT's USB product id
pub const NXT_PRODUCT_ID: u16 = 0x0002;
/// Interface carrying the command endpoints
pub const NXT_INTERFACE: u8 = 0;
/// Host to brick bulk endpoint
pub const NXT_OUT_ENDPOINT: u8 = 0x01;
/// Brick to host bulk endpoint
pub const NXT_IN_ENDPOINT: u8 = 0x82;
/// Largest packet the NXT's bulk endpoints move
pub const NXT_USB_MAX_FRAME: usize = 64;

/// An open NXT on the USB bus.
pub struct UsbChannel {
    handle: Option<DeviceHandle<GlobalContext>>,
    timeout: Duration,
    debug: bool,
}

impl UsbChannel {
    /// Opens the device and claims the command interface.
    ///
    /// A failed claim usually means missing permissions or a kernel driver
    /// holding the device, and is reported as `CannotClaimInterface`.
    pub fn open(device: &Device<GlobalContext>, config: &Config) -> Result<Self, TransportError> {
        let mut handle = device.open()?;

        match handle.claim_interface(NXT_INTERFACE) {
            Ok(()) => (),
            Err(e) => {
                return Err(TransportError::CannotClaimInterface {
                    interface: NXT_INTERFACE,
                    source: e,
                })
            }
        };

        debug!(
            bus = device.bus_number(),
            address = device.address(),
            "claimed NXT USB interface"
        );

        Ok(UsbChannel {
            handle: Some(handle),
            timeout: config.usb_timeout,
            debug: config.debug,
        })
    }

    fn handle(&self) -> Result<&DeviceHandle<GlobalContext>, TransportError> {
        self.handle.as_ref().ok_or(TransportError::Closed)
    }
}

impl Channel for UsbChannel {
    fn kind(&self) -> TransportKind {
        TransportKind::Usb
    }

    fn max_frame(&self) -> usize {
        NXT_USB_MAX_FRAME
    }

    fn send(&mut self, frame: &[u8]) -> Result<usize, TransportError> {
        if self.debug {
            debug!("usb send [{}]", hex_dump(frame));
        }
        Ok(self
            .handle()?
            .write_bulk(NXT_OUT_ENDPOINT, frame, self.timeout)?)
    }

    fn recv(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; max_len];
        let read = self
            .handle()?
            .read_bulk(NXT_IN_ENDPOINT, &mut buf, self.timeout)?;
        buf.truncate(read);
        if self.debug {
            debug!("usb recv [{}]", hex_dump(&buf));
        }
        Ok(buf)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut handle) = self.handle.take() {
            handle.release_interface(NXT_INTERFACE)?;
        }
        Ok(())
    }
}

impl Drop for UsbChannel {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            let _ = handle.release_interface(NXT_INTERFACE);
        }
    }
}
