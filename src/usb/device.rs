use std::ptr;
use std::sync::Arc;

use libusb1_sys as libusb;
use libusb1_sys::constants::LIBUSB_ENDPOINT_IN;

use super::context::{get_device_descriptor, map_libusb_error, UsbContext, UsbDeviceHandle};
use crate::error::FpError;

/// Endpoints discovered on the claimed interface, plus its own interface
/// number (needed for `libusb_claim_interface`/`libusb_release_interface`).
#[derive(Clone, Copy, Debug)]
pub struct InterfaceInfo {
    pub interface: u8,
    pub in_ep: u8,
    pub out_ep: u8,
    pub int_ep: Option<u8>,
}

struct ConfigDescriptor(*const libusb::libusb_config_descriptor);

impl ConfigDescriptor {
    unsafe fn active(device: *mut libusb::libusb_device) -> Result<Self, FpError> {
        let mut ptr = ptr::null();
        let rc = unsafe { libusb::libusb_get_active_config_descriptor(device, &mut ptr) };
        if rc < 0 {
            return Err(map_libusb_error(rc));
        }
        Ok(Self(ptr))
    }
}

impl Drop for ConfigDescriptor {
    fn drop(&mut self) {
        unsafe { libusb::libusb_free_config_descriptor(self.0) };
    }
}

/// Press devices expose a single vendor-specific interface (class/subclass/
/// protocol all `0xFF`) carrying exactly two bulk endpoints plus the shared
/// interrupt-IN endpoint used by the event listener.
pub fn find_press_interface(device: *mut libusb::libusb_device) -> Result<Option<InterfaceInfo>, FpError> {
    let config = unsafe { ConfigDescriptor::active(device)? };
    let config_ptr = config.0;
    let interface_count = unsafe { (*config_ptr).bNumInterfaces };

    for interface_index in 0..interface_count {
        let interface = unsafe { &*(*config_ptr).interface.add(interface_index as usize) };
        for alt_index in 0..interface.num_altsetting as usize {
            let descriptor = unsafe { &*interface.altsetting.add(alt_index) };
            if descriptor.bInterfaceClass != 0xff
                || descriptor.bInterfaceSubClass != 0xff
                || descriptor.bInterfaceProtocol != 0xff
            {
                continue;
            }
            if descriptor.bNumEndpoints != 2 {
                continue;
            }

            let mut info = InterfaceInfo {
                interface: descriptor.bInterfaceNumber,
                in_ep: 0,
                out_ep: 0,
                int_ep: None,
            };

            for ep_index in 0..descriptor.bNumEndpoints as usize {
                let endpoint = unsafe { &*descriptor.endpoint.add(ep_index) };
                let xfer_type = endpoint.bmAttributes & 0x3;
                let is_in = endpoint.bEndpointAddress & LIBUSB_ENDPOINT_IN != 0;
                match xfer_type {
                    libusb1_sys::constants::LIBUSB_TRANSFER_TYPE_BULK if is_in => {
                        info.in_ep = endpoint.bEndpointAddress
                    }
                    libusb1_sys::constants::LIBUSB_TRANSFER_TYPE_BULK => {
                        info.out_ep = endpoint.bEndpointAddress
                    }
                    libusb1_sys::constants::LIBUSB_TRANSFER_TYPE_INTERRUPT if is_in => {
                        info.int_ep = Some(endpoint.bEndpointAddress)
                    }
                    _ => {}
                }
            }

            if info.in_ep != 0 {
                return Ok(Some(info));
            }
        }
    }

    Ok(None)
}

/// Swipe devices set configuration 1 and use a single interface whose
/// endpoint layout is simpler: one interrupt-IN for scan events and one
/// bulk-IN for packetized row data.
pub fn find_swipe_interface(device: *mut libusb::libusb_device) -> Result<Option<InterfaceInfo>, FpError> {
    let config = unsafe { ConfigDescriptor::active(device)? };
    let config_ptr = config.0;
    let interface_count = unsafe { (*config_ptr).bNumInterfaces };

    for interface_index in 0..interface_count {
        let interface = unsafe { &*(*config_ptr).interface.add(interface_index as usize) };
        for alt_index in 0..interface.num_altsetting as usize {
            let descriptor = unsafe { &*interface.altsetting.add(alt_index) };
            let mut info = InterfaceInfo {
                interface: descriptor.bInterfaceNumber,
                in_ep: 0,
                out_ep: 0,
                int_ep: None,
            };

            for ep_index in 0..descriptor.bNumEndpoints as usize {
                let endpoint = unsafe { &*descriptor.endpoint.add(ep_index) };
                let xfer_type = endpoint.bmAttributes & 0x3;
                let is_in = endpoint.bEndpointAddress & LIBUSB_ENDPOINT_IN != 0;
                match xfer_type {
                    libusb1_sys::constants::LIBUSB_TRANSFER_TYPE_BULK if is_in => {
                        info.in_ep = endpoint.bEndpointAddress
                    }
                    libusb1_sys::constants::LIBUSB_TRANSFER_TYPE_INTERRUPT if is_in => {
                        info.int_ep = Some(endpoint.bEndpointAddress)
                    }
                    _ => {}
                }
            }

            if info.in_ep != 0 {
                return Ok(Some(info));
            }
        }
    }

    Ok(None)
}

/// Opens the first device on the bus matching `vendor`/`product`, claims
/// `interface`, and (for swipe devices) sets configuration 1 first.
pub fn open_matching(
    context: &Arc<UsbContext>,
    vendor: u16,
    product: u16,
    swipe: bool,
) -> Result<(UsbDeviceHandle, InterfaceInfo), FpError> {
    let mut list = ptr::null();
    let count = unsafe { libusb::libusb_get_device_list(context.ptr.0, &mut list) };
    if count < 0 {
        return Err(map_libusb_error(count as i32));
    }

    let mut result = None;
    for i in 0..count {
        let device = unsafe { *list.add(i as usize) };
        let desc = match get_device_descriptor(device) {
            Ok(d) => d,
            Err(_) => continue,
        };
        if desc.idVendor != vendor || desc.idProduct != product {
            continue;
        }

        let info = if swipe {
            find_swipe_interface(device)
        } else {
            find_press_interface(device)
        };
        let info = match info {
            Ok(Some(info)) => info,
            _ => continue,
        };

        let handle = match UsbDeviceHandle::open(context.clone(), device) {
            Ok(h) => h,
            Err(_) => continue,
        };

        if swipe {
            if let Err(e) = handle.set_configuration(1) {
                log::warn!("set_configuration(1) failed: {e}");
            }
        }
        if let Err(e) = handle.claim_interface(info.interface as i32) {
            log::warn!("claim_interface failed: {e}");
            continue;
        }

        result = Some((handle, info));
        break;
    }

    unsafe {
        libusb::libusb_free_device_list(list, 1);
    }

    result.ok_or(FpError::NoDev)
}
