use std::cell::RefCell;
use std::rc::Rc;

use crate::error::FpError;
use crate::usb::{context::UsbDeviceHandle, transfer};

/// Decoded interrupt events. `DEATH` is logged, never treated
/// as fatal; anything else unrecognized is passed through as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqEvent {
    ScanpwrOn,
    FingerOn,
    FingerOff,
    Death,
    Other(u16),
}

const SCANPWR_ON: u16 = 0x56AA;
const FINGER_ON: u16 = 0x0101;
const FINGER_OFF: u16 = 0x0200;
const DEATH: u16 = 0x0800;

impl IrqEvent {
    fn decode(raw: u16) -> Self {
        match raw {
            SCANPWR_ON => IrqEvent::ScanpwrOn,
            FINGER_ON => IrqEvent::FingerOn,
            FINGER_OFF => IrqEvent::FingerOff,
            DEATH => IrqEvent::Death,
            other => IrqEvent::Other(other),
        }
    }
}

type IrqCallback = Box<dyn FnMut(Result<IrqEvent, FpError>)>;

/// A single always-outstanding interrupt-IN transfer, re-armed after every
/// completion while `running`. `irq_cb` can be swapped or
/// cleared (`set_callback(None)`) without tearing down the loop; only
/// `stop` tears it down, invoking `post_stop` exactly once.
pub struct IrqListener {
    handle: UsbDeviceHandle,
    endpoint: u8,
    callback: RefCell<Option<IrqCallback>>,
    post_stop: RefCell<Option<Box<dyn FnOnce()>>>,
    stopping: RefCell<bool>,
    current: RefCell<Option<Rc<transfer::TransferHandle<Vec<u8>>>>>,
}

impl IrqListener {
    pub fn new(handle: UsbDeviceHandle, endpoint: u8) -> Rc<Self> {
        Rc::new(IrqListener {
            handle,
            endpoint,
            callback: RefCell::new(None),
            post_stop: RefCell::new(None),
            stopping: RefCell::new(false),
            current: RefCell::new(None),
        })
    }

    pub fn set_callback(self: &Rc<Self>, cb: Option<IrqCallback>) {
        *self.callback.borrow_mut() = cb;
    }

    /// Starts the loop on the local task set. Must only be called once per
    /// listener.
    pub fn start(self: &Rc<Self>) {
        let this = self.clone();
        tokio::task::spawn_local(async move {
            this.run().await;
        });
    }

    async fn run(self: Rc<Self>) {
        loop {
            if *self.stopping.borrow() {
                break;
            }
            let pending = match transfer::read(&self.handle, self.endpoint, 4, true, transfer::NO_TIMEOUT).await {
                Ok(p) => Rc::new(p),
                Err(e) => {
                    if let Some(cb) = self.callback.borrow_mut().as_mut() {
                        cb(Err(e));
                    }
                    continue;
                }
            };
            *self.current.borrow_mut() = Some(pending.clone());
            let result = pending.wait_ref().await;
            *self.current.borrow_mut() = None;

            match result {
                Ok(bytes) if bytes.len() >= 2 => {
                    let raw = u16::from_be_bytes([bytes[0], bytes[1]]);
                    let event = IrqEvent::decode(raw);
                    if let Some(cb) = self.callback.borrow_mut().as_mut() {
                        cb(Ok(event));
                    }
                }
                Ok(_) => {
                    if let Some(cb) = self.callback.borrow_mut().as_mut() {
                        cb(Err(FpError::protocol("interrupt transfer short read")));
                    }
                }
                Err(FpError::Cancelled) => break,
                Err(e) => {
                    if let Some(cb) = self.callback.borrow_mut().as_mut() {
                        cb(Err(e));
                    }
                }
            }
        }
        if let Some(cb) = self.post_stop.borrow_mut().take() {
            cb();
        }
    }

    /// Requests a full stop. `cb` runs exactly once, after the current
    /// in-flight transfer's cancellation completes.
    pub fn stop(self: &Rc<Self>, cb: impl FnOnce() + 'static) {
        *self.stopping.borrow_mut() = true;
        *self.post_stop.borrow_mut() = Some(Box::new(cb));
        if let Some(pending) = self.current.borrow().as_ref() {
            pending.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_events() {
        assert_eq!(IrqEvent::decode(0x56AA), IrqEvent::ScanpwrOn);
        assert_eq!(IrqEvent::decode(0x0101), IrqEvent::FingerOn);
        assert_eq!(IrqEvent::decode(0x0200), IrqEvent::FingerOff);
        assert_eq!(IrqEvent::decode(0x0800), IrqEvent::Death);
        assert_eq!(IrqEvent::decode(0x1234), IrqEvent::Other(0x1234));
    }
}
