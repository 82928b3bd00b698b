use std::cell::RefCell;
use std::os::raw::{c_int, c_uint, c_void};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use libusb1_sys as libusb;
use libusb1_sys::constants::{
    LIBUSB_CONTROL_SETUP_SIZE, LIBUSB_TRANSFER_COMPLETED, LIBUSB_TRANSFER_SHORT_NOT_OK,
    LIBUSB_TRANSFER_TYPE_BULK, LIBUSB_TRANSFER_TYPE_CONTROL, LIBUSB_TRANSFER_TYPE_INTERRUPT,
};
use tokio::sync::oneshot;

use super::context::{map_transfer_status, UsbDeviceHandle};
use crate::error::FpError;

/// Bounded control-transfer timeout. Most register reads/writes use this.
pub const CONTROL_TIMEOUT: Duration = Duration::from_millis(1000);
/// Longer bound used by a handful of slow vendor requests (fw patch writes).
pub const CONTROL_TIMEOUT_LONG: Duration = Duration::from_millis(5000);
/// Interrupt and bulk image transfers never time out on their own; they are
/// torn down by explicit cancellation instead.
pub const NO_TIMEOUT: Duration = Duration::from_millis(0);

fn duration_to_millis(d: Duration) -> c_uint {
    d.as_millis().min(u32::MAX as u128) as c_uint
}

struct RawTransferPtr(*mut libusb::libusb_transfer);
unsafe impl Send for RawTransferPtr {}

type CancelSlot = Arc<Mutex<Option<RawTransferPtr>>>;

/// A handle to an in-flight transfer. Dropping it without awaiting leaves
/// the transfer running; cancellation is always best-effort:
/// the completion callback, not the caller of `cancel`, resolves the
/// outcome as `Cancelled` or `Completed` depending on the race.
pub struct TransferHandle<T> {
    receiver: RefCell<Option<oneshot::Receiver<Result<T, FpError>>>>,
    cancel_slot: CancelSlot,
}

impl<T> TransferHandle<T> {
    /// Requests cancellation of the underlying libusb transfer. A no-op if
    /// the transfer has already completed and been freed.
    pub fn cancel(&self) {
        if let Ok(mut slot) = self.cancel_slot.lock() {
            if let Some(ptr) = slot.take() {
                unsafe {
                    libusb::libusb_cancel_transfer(ptr.0);
                }
            }
        }
    }

    /// Consumes the handle and waits for completion.
    pub async fn wait(self) -> Result<T, FpError> {
        self.wait_ref().await
    }

    /// Waits for completion without consuming the handle, so a caller can
    /// keep it (e.g. behind an `Rc`) purely to retain `cancel` access while
    /// another task awaits it. Panics if called more than once.
    pub async fn wait_ref(&self) -> Result<T, FpError> {
        let receiver = self
            .receiver
            .borrow_mut()
            .take()
            .expect("TransferHandle polled twice");
        match receiver.await {
            Ok(result) => result,
            Err(_) => Err(FpError::io("transfer channel closed before completion")),
        }
    }
}

struct ControlState {
    sender: Option<oneshot::Sender<Result<usize, FpError>>>,
    buffer: Option<Vec<u8>>,
    cancel_slot: CancelSlot,
}

struct BulkReadState {
    sender: Option<oneshot::Sender<Result<Vec<u8>, FpError>>>,
    buffer: Option<Vec<u8>>,
    cancel_slot: CancelSlot,
}

struct BulkWriteState {
    sender: Option<oneshot::Sender<Result<usize, FpError>>>,
    buffer: Option<Vec<u8>>,
    cancel_slot: CancelSlot,
}

/// SETUP + DATA control transfer. The `SHORT_NOT_OK` flag is set on every
/// control transfer: a device returning fewer bytes than
/// requested is a protocol error, not a short read to tolerate.
pub async fn control_out(
    handle: &UsbDeviceHandle,
    request_type: u8,
    request: u8,
    value: u16,
    index: u16,
    data: &[u8],
    timeout: Duration,
) -> Result<TransferHandle<usize>, FpError> {
    let (sender, receiver) = oneshot::channel();
    let cancel_slot: CancelSlot = Arc::new(Mutex::new(None));

    let mut buffer = vec![0u8; LIBUSB_CONTROL_SETUP_SIZE + data.len()];
    unsafe {
        libusb::libusb_fill_control_setup(
            buffer.as_mut_ptr(),
            request_type,
            request,
            value,
            index,
            data.len() as u16,
        );
    }
    buffer[LIBUSB_CONTROL_SETUP_SIZE..].copy_from_slice(data);

    let state = Box::new(ControlState {
        sender: Some(sender),
        buffer: Some(buffer),
        cancel_slot: cancel_slot.clone(),
    });
    let state_ptr = Box::into_raw(state);

    let transfer = unsafe { libusb::libusb_alloc_transfer(0) };
    if transfer.is_null() {
        unsafe {
            let _ = Box::from_raw(state_ptr);
        }
        return Err(FpError::NoMem);
    }

    unsafe {
        (*transfer).dev_handle = handle.raw();
        (*transfer).endpoint = 0;
        (*transfer).transfer_type = LIBUSB_TRANSFER_TYPE_CONTROL;
        (*transfer).timeout = duration_to_millis(timeout);
        (*transfer).flags = LIBUSB_TRANSFER_SHORT_NOT_OK;
        (*transfer).callback = control_callback;
        (*transfer).user_data = state_ptr as *mut c_void;
        if let Some(buf) = (&mut *state_ptr).buffer.as_mut() {
            (*transfer).buffer = buf.as_mut_ptr();
            (*transfer).length = buf.len() as c_int;
        }
    }

    submit_or_cleanup(transfer, state_ptr, &cancel_slot)?;
    Ok(TransferHandle {
        receiver: RefCell::new(Some(receiver)),
        cancel_slot,
    })
}

pub async fn control_in(
    handle: &UsbDeviceHandle,
    request_type: u8,
    request: u8,
    value: u16,
    index: u16,
    length: usize,
    timeout: Duration,
) -> Result<TransferHandle<Vec<u8>>, FpError> {
    let (sender, receiver) = oneshot::channel();
    let cancel_slot: CancelSlot = Arc::new(Mutex::new(None));

    let mut buffer = vec![0u8; LIBUSB_CONTROL_SETUP_SIZE + length];
    unsafe {
        libusb::libusb_fill_control_setup(
            buffer.as_mut_ptr(),
            request_type,
            request,
            value,
            index,
            length as u16,
        );
    }

    let state = Box::new(BulkReadState {
        sender: Some(sender),
        buffer: Some(buffer),
        cancel_slot: cancel_slot.clone(),
    });
    let state_ptr = Box::into_raw(state);

    let transfer = unsafe { libusb::libusb_alloc_transfer(0) };
    if transfer.is_null() {
        unsafe {
            let _ = Box::from_raw(state_ptr);
        }
        return Err(FpError::NoMem);
    }

    unsafe {
        (*transfer).dev_handle = handle.raw();
        (*transfer).endpoint = 0;
        (*transfer).transfer_type = LIBUSB_TRANSFER_TYPE_CONTROL;
        (*transfer).timeout = duration_to_millis(timeout);
        (*transfer).flags = LIBUSB_TRANSFER_SHORT_NOT_OK;
        (*transfer).callback = control_in_callback;
        (*transfer).user_data = state_ptr as *mut c_void;
        if let Some(buf) = (&mut *state_ptr).buffer.as_mut() {
            (*transfer).buffer = buf.as_mut_ptr();
            (*transfer).length = buf.len() as c_int;
        }
    }

    submit_or_cleanup(transfer, state_ptr, &cancel_slot)?;
    Ok(TransferHandle {
        receiver: RefCell::new(Some(receiver)),
        cancel_slot,
    })
}

/// Bulk/interrupt read used for the always-outstanding event listener
/// and for the press driver's image payload transfer.
pub async fn read(
    handle: &UsbDeviceHandle,
    endpoint: u8,
    length: usize,
    interrupt: bool,
    timeout: Duration,
) -> Result<TransferHandle<Vec<u8>>, FpError> {
    let (sender, receiver) = oneshot::channel();
    let cancel_slot: CancelSlot = Arc::new(Mutex::new(None));

    let state = Box::new(BulkReadState {
        sender: Some(sender),
        buffer: Some(vec![0u8; length]),
        cancel_slot: cancel_slot.clone(),
    });
    let state_ptr = Box::into_raw(state);

    let transfer = unsafe { libusb::libusb_alloc_transfer(0) };
    if transfer.is_null() {
        unsafe {
            let _ = Box::from_raw(state_ptr);
        }
        return Err(FpError::NoMem);
    }

    unsafe {
        (*transfer).dev_handle = handle.raw();
        (*transfer).endpoint = endpoint;
        (*transfer).transfer_type = if interrupt {
            LIBUSB_TRANSFER_TYPE_INTERRUPT
        } else {
            LIBUSB_TRANSFER_TYPE_BULK
        };
        (*transfer).timeout = duration_to_millis(timeout);
        (*transfer).callback = bulk_read_callback;
        (*transfer).user_data = state_ptr as *mut c_void;
        if let Some(buf) = (&mut *state_ptr).buffer.as_mut() {
            (*transfer).buffer = buf.as_mut_ptr();
            (*transfer).length = buf.len() as c_int;
        }
    }

    submit_or_cleanup(transfer, state_ptr, &cancel_slot)?;
    Ok(TransferHandle {
        receiver: RefCell::new(Some(receiver)),
        cancel_slot,
    })
}

pub async fn write(
    handle: &UsbDeviceHandle,
    endpoint: u8,
    data: Vec<u8>,
    timeout: Duration,
) -> Result<TransferHandle<usize>, FpError> {
    let (sender, receiver) = oneshot::channel();
    let cancel_slot: CancelSlot = Arc::new(Mutex::new(None));

    let state = Box::new(BulkWriteState {
        sender: Some(sender),
        buffer: Some(data),
        cancel_slot: cancel_slot.clone(),
    });
    let state_ptr = Box::into_raw(state);

    let transfer = unsafe { libusb::libusb_alloc_transfer(0) };
    if transfer.is_null() {
        unsafe {
            let _ = Box::from_raw(state_ptr);
        }
        return Err(FpError::NoMem);
    }

    unsafe {
        (*transfer).dev_handle = handle.raw();
        (*transfer).endpoint = endpoint;
        (*transfer).transfer_type = LIBUSB_TRANSFER_TYPE_BULK;
        (*transfer).timeout = duration_to_millis(timeout);
        (*transfer).callback = bulk_write_callback;
        (*transfer).user_data = state_ptr as *mut c_void;
        if let Some(buf) = (&mut *state_ptr).buffer.as_mut() {
            (*transfer).buffer = buf.as_mut_ptr();
            (*transfer).length = buf.len() as c_int;
        }
    }

    submit_or_cleanup(transfer, state_ptr, &cancel_slot)?;
    Ok(TransferHandle {
        receiver: RefCell::new(Some(receiver)),
        cancel_slot,
    })
}

fn submit_or_cleanup<S>(
    transfer: *mut libusb::libusb_transfer,
    state_ptr: *mut S,
    cancel_slot: &CancelSlot,
) -> Result<(), FpError> {
    let submit = unsafe { libusb::libusb_submit_transfer(transfer) };
    if submit < 0 {
        unsafe {
            let _ = Box::from_raw(state_ptr);
            libusb::libusb_free_transfer(transfer);
        }
        return Err(super::context::map_libusb_error(submit));
    }
    if let Ok(mut slot) = cancel_slot.lock() {
        *slot = Some(RawTransferPtr(transfer));
    }
    Ok(())
}

/// Actual length mismatch on a control transfer is a protocol error, not an
/// I/O error.
fn check_actual_length(transfer: *mut libusb::libusb_transfer) -> Result<usize, FpError> {
    unsafe {
        let status = (*transfer).status;
        if status != LIBUSB_TRANSFER_COMPLETED {
            return Err(map_transfer_status(status));
        }
        Ok((*transfer).actual_length as usize)
    }
}

extern "system" fn control_callback(transfer: *mut libusb::libusb_transfer) {
    unsafe {
        let state_ptr = (*transfer).user_data as *mut ControlState;
        let mut state = Box::from_raw(state_ptr);
        if let Ok(mut slot) = state.cancel_slot.lock() {
            *slot = None;
        }
        let result = check_actual_length(transfer);
        state.buffer.take();
        if let Some(sender) = state.sender.take() {
            let _ = sender.send(result);
        }
        libusb::libusb_free_transfer(transfer);
    }
}

extern "system" fn control_in_callback(transfer: *mut libusb::libusb_transfer) {
    unsafe {
        let state_ptr = (*transfer).user_data as *mut BulkReadState;
        let mut state = Box::from_raw(state_ptr);
        if let Ok(mut slot) = state.cancel_slot.lock() {
            *slot = None;
        }
        let status = (*transfer).status;
        let result = if status == LIBUSB_TRANSFER_COMPLETED {
            if let Some(mut buffer) = state.buffer.take() {
                let actual = (*transfer).actual_length as usize;
                buffer.drain(..LIBUSB_CONTROL_SETUP_SIZE.min(buffer.len()));
                buffer.truncate(actual);
                Ok(buffer)
            } else {
                Err(FpError::io("control_in buffer missing"))
            }
        } else {
            Err(map_transfer_status(status))
        };
        if let Some(sender) = state.sender.take() {
            let _ = sender.send(result);
        }
        libusb::libusb_free_transfer(transfer);
    }
}

extern "system" fn bulk_read_callback(transfer: *mut libusb::libusb_transfer) {
    unsafe {
        let state_ptr = (*transfer).user_data as *mut BulkReadState;
        let mut state = Box::from_raw(state_ptr);
        if let Ok(mut slot) = state.cancel_slot.lock() {
            *slot = None;
        }
        let status = (*transfer).status;
        let result = if status == LIBUSB_TRANSFER_COMPLETED {
            if let Some(mut buffer) = state.buffer.take() {
                let actual = (*transfer).actual_length as usize;
                buffer.truncate(actual);
                Ok(buffer)
            } else {
                Err(FpError::io("bulk read buffer missing"))
            }
        } else {
            Err(map_transfer_status(status))
        };
        if let Some(sender) = state.sender.take() {
            let _ = sender.send(result);
        }
        libusb::libusb_free_transfer(transfer);
    }
}

extern "system" fn bulk_write_callback(transfer: *mut libusb::libusb_transfer) {
    unsafe {
        let state_ptr = (*transfer).user_data as *mut BulkWriteState;
        let mut state = Box::from_raw(state_ptr);
        if let Ok(mut slot) = state.cancel_slot.lock() {
            *slot = None;
        }
        let status = (*transfer).status;
        let result = if status == LIBUSB_TRANSFER_COMPLETED {
            Ok((*transfer).actual_length as usize)
        } else {
            Err(map_transfer_status(status))
        };
        state.buffer.take();
        if let Some(sender) = state.sender.take() {
            let _ = sender.send(result);
        }
        libusb::libusb_free_transfer(transfer);
    }
}
