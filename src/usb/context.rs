use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use libusb1_sys as libusb;
use libusb1_sys::constants::LIBUSB_ERROR_INTERRUPTED;

use crate::error::FpError;

#[derive(Copy, Clone)]
pub(crate) struct LibusbCtxPtr(pub(crate) *mut libusb::libusb_context);

unsafe impl Send for LibusbCtxPtr {}
unsafe impl Sync for LibusbCtxPtr {}

/// RAII wrapper owning a libusb context and the background event-handling
/// thread that polls it. This is the crate's single USB reactor: every
/// transfer submitted anywhere in the crate completes through a callback
/// fired from this thread.
pub struct UsbContext {
    pub(crate) ptr: LibusbCtxPtr,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl UsbContext {
    pub fn new() -> Result<Arc<Self>, FpError> {
        let mut ctx = ptr::null_mut();
        let rc = unsafe { libusb::libusb_init(&mut ctx) };
        if rc < 0 {
            return Err(FpError::io(format!("libusb_init failed: {rc}")));
        }

        let ctx_ptr = Arc::new(LibusbCtxPtr(ctx));
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = running.clone();
        let ctx_for_thread = ctx_ptr.clone();

        let handle = std::thread::Builder::new()
            .name("fpcore-usb-events".into())
            .spawn(move || {
                let mut timeval = libc::timeval {
                    tv_sec: 0,
                    tv_usec: 10_000,
                };
                while running_thread.load(Ordering::SeqCst) {
                    let rc = unsafe {
                        libusb::libusb_handle_events_timeout_completed(
                            ctx_for_thread.0,
                            &mut timeval,
                            ptr::null_mut(),
                        )
                    };
                    if rc == LIBUSB_ERROR_INTERRUPTED {
                        continue;
                    }
                    if rc < 0 && running_thread.load(Ordering::SeqCst) {
                        std::thread::yield_now();
                    }
                }
            })
            .map_err(|e| FpError::io(format!("failed to spawn libusb event thread: {e}")))?;

        Ok(Arc::new(UsbContext {
            ptr: *ctx_ptr,
            running,
            thread: Mutex::new(Some(handle)),
        }))
    }
}

impl Drop for UsbContext {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        unsafe {
            let mut zero = libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            };
            let _ = libusb::libusb_handle_events_timeout_completed(
                self.ptr.0,
                &mut zero,
                ptr::null_mut(),
            );
        }
        if let Ok(mut guard) = self.thread.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
        unsafe { libusb::libusb_exit(self.ptr.0) };
    }
}

/// Wrapper around a libusb device handle. Cloning shares the same
/// underlying handle; closing happens once, when the last clone drops.
#[derive(Clone)]
pub struct UsbDeviceHandle {
    pub(crate) context: Arc<UsbContext>,
    pub(crate) handle: Arc<HandleWrapper>,
}

pub(crate) struct HandleWrapper(pub(crate) *mut libusb::libusb_device_handle);

unsafe impl Send for HandleWrapper {}
unsafe impl Sync for HandleWrapper {}

impl Drop for HandleWrapper {
    fn drop(&mut self) {
        unsafe { libusb::libusb_close(self.0) };
    }
}

impl UsbDeviceHandle {
    pub(crate) fn open(
        context: Arc<UsbContext>,
        device: *mut libusb::libusb_device,
    ) -> Result<Self, FpError> {
        let mut handle = ptr::null_mut();
        let rc = unsafe { libusb::libusb_open(device, &mut handle) };
        if rc < 0 {
            return Err(map_libusb_error(rc));
        }
        Ok(Self {
            context,
            handle: Arc::new(HandleWrapper(handle)),
        })
    }

    pub(crate) fn raw(&self) -> *mut libusb::libusb_device_handle {
        self.handle.0
    }

    pub fn set_configuration(&self, config: i32) -> Result<(), FpError> {
        let rc = unsafe { libusb::libusb_set_configuration(self.handle.0, config) };
        if rc < 0 {
            return Err(map_libusb_error(rc));
        }
        Ok(())
    }

    pub fn claim_interface(&self, interface: i32) -> Result<(), FpError> {
        let rc = unsafe { libusb::libusb_claim_interface(self.handle.0, interface) };
        if rc < 0 {
            return Err(map_libusb_error(rc));
        }
        Ok(())
    }

    pub fn release_interface(&self, interface: i32) -> Result<(), FpError> {
        let rc = unsafe { libusb::libusb_release_interface(self.handle.0, interface) };
        if rc < 0 {
            return Err(map_libusb_error(rc));
        }
        Ok(())
    }
}

pub(crate) fn get_device_descriptor(
    device: *mut libusb::libusb_device,
) -> Result<libusb::libusb_device_descriptor, FpError> {
    use std::mem::MaybeUninit;
    let mut desc = MaybeUninit::<libusb::libusb_device_descriptor>::uninit();
    let rc = unsafe { libusb::libusb_get_device_descriptor(device, desc.as_mut_ptr()) };
    if rc < 0 {
        return Err(map_libusb_error(rc));
    }
    Ok(unsafe { desc.assume_init() })
}

pub(crate) fn map_libusb_error(code: i32) -> FpError {
    use libusb1_sys::constants::{
        LIBUSB_ERROR_NO_DEVICE, LIBUSB_ERROR_NO_MEM, LIBUSB_ERROR_NOT_FOUND, LIBUSB_ERROR_TIMEOUT,
    };
    match code {
        LIBUSB_ERROR_TIMEOUT => FpError::TimedOut,
        LIBUSB_ERROR_NO_DEVICE | LIBUSB_ERROR_NOT_FOUND => FpError::NoDev,
        LIBUSB_ERROR_NO_MEM => FpError::NoMem,
        other => FpError::io(format!("libusb error {other}")),
    }
}

pub(crate) fn map_transfer_status(status: i32) -> FpError {
    use libusb1_sys::constants::{
        LIBUSB_TRANSFER_CANCELLED, LIBUSB_TRANSFER_ERROR, LIBUSB_TRANSFER_NO_DEVICE,
        LIBUSB_TRANSFER_OVERFLOW, LIBUSB_TRANSFER_STALL, LIBUSB_TRANSFER_TIMED_OUT,
    };
    match status {
        s if s == LIBUSB_TRANSFER_CANCELLED => FpError::Cancelled,
        s if s == LIBUSB_TRANSFER_TIMED_OUT => FpError::TimedOut,
        s if s == LIBUSB_TRANSFER_NO_DEVICE => FpError::NoDev,
        s if s == LIBUSB_TRANSFER_STALL => FpError::io("transfer stalled"),
        s if s == LIBUSB_TRANSFER_OVERFLOW => FpError::protocol("transfer overflow"),
        s if s == LIBUSB_TRANSFER_ERROR => FpError::io("transfer error"),
        _ => FpError::io("transfer failed"),
    }
}
