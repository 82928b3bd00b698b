use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::drivers::{PressDevice, SwipeDevice};
use crate::error::FpError;
use crate::host::{HostCallbacks, ImgDevState};
use crate::profile::{self, ScanType};
use crate::usb::context::UsbContext;

bitflags::bitflags! {
    /// Driver descriptor flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DriverFlags: u32 {
        const SUPPORTS_UNCONDITIONAL_CAPTURE = 1 << 0;
    }
}

/// One entry of the public driver table: numeric id, name,
/// scan type, and output image geometry. `height: None` means variable
/// (swipe).
#[derive(Debug, Clone, Copy)]
pub struct DriverDescriptor {
    pub id: u32,
    pub name: &'static str,
    pub scan_type: ScanType,
    pub width: usize,
    pub height: Option<usize>,
    pub flags: DriverFlags,
}

pub const DRIVERS: &[DriverDescriptor] = &[
    DriverDescriptor {
        id: 1,
        name: "upeksonly",
        scan_type: ScanType::Swipe,
        width: 288,
        height: None,
        flags: DriverFlags::empty(),
    },
    DriverDescriptor {
        id: 2,
        name: "uru4000",
        scan_type: ScanType::Press,
        width: 384,
        height: Some(289),
        flags: DriverFlags::SUPPORTS_UNCONDITIONAL_CAPTURE,
    },
];

pub fn lookup_driver(scan_type: ScanType) -> Option<&'static DriverDescriptor> {
    DRIVERS.iter().find(|d| d.scan_type == scan_type)
}

/// The driver façade: dispatches `open/close/activate/
/// deactivate/change_state` to the press or swipe implementation selected
/// by the device ID table, so the host-library contract is family-agnostic.
pub enum FpDevice {
    Press(PressDevice),
    Swipe(SwipeDevice),
}

impl FpDevice {
    /// `open`: looks up the profile for `(vendor, product)`, opens the
    /// matching interface, claims it, and reports `open_complete`.
    /// Returns `NoDev` for an unrecognized USB id.
    pub fn open(
        context: &Arc<UsbContext>,
        vendor: u16,
        product: u16,
        host: Rc<RefCell<dyn HostCallbacks>>,
    ) -> Result<Self, FpError> {
        let profile = profile::lookup(vendor, product).ok_or(FpError::NoDev)?;
        match profile.scan_type {
            ScanType::Swipe => Ok(FpDevice::Swipe(SwipeDevice::open(
                context, vendor, product, profile, host,
            )?)),
            ScanType::Press => Ok(FpDevice::Press(PressDevice::open(
                context, vendor, product, profile, host,
            )?)),
        }
    }

    pub fn close(&self) {
        match self {
            FpDevice::Press(d) => d.close(),
            FpDevice::Swipe(d) => d.close(),
        }
    }

    pub async fn activate(&mut self, state: ImgDevState) {
        match self {
            FpDevice::Press(d) => d.activate(state).await,
            FpDevice::Swipe(d) => d.activate(state).await,
        }
    }

    pub async fn deactivate(&mut self) {
        match self {
            FpDevice::Press(d) => d.deactivate().await,
            FpDevice::Swipe(d) => d.deactivate().await,
        }
    }

    /// Optional host entry point: re-enters a sub-state without
    /// rerunning activation. The swipe loop never consults its
    /// requested state, so this is a no-op there beyond what `activate`
    /// already does.
    pub async fn change_state(&mut self, state: ImgDevState) {
        match self {
            FpDevice::Press(d) => d.change_state(state).await,
            FpDevice::Swipe(_) => {}
        }
    }

    /// Starts continuous image acquisition. Only meaningful for press
    /// devices; swipe's capture loop is already driven by its activation
    /// SSM and needs no separate start call.
    pub fn start_imaging(&mut self) {
        if let FpDevice::Press(d) = self {
            d.start_imaging();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swipe_driver_has_variable_height() {
        let d = lookup_driver(ScanType::Swipe).unwrap();
        assert_eq!(d.height, None);
        assert_eq!(d.width, 288);
    }

    #[test]
    fn press_driver_advertises_unconditional_capture() {
        let d = lookup_driver(ScanType::Press).unwrap();
        assert!(d.flags.contains(DriverFlags::SUPPORTS_UNCONDITIONAL_CAPTURE));
    }
}
