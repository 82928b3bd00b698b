use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use crate::error::FpError;
use crate::host::{HostCallbacks, ImgDevState};
use crate::irq::IrqListener;
use crate::profile::Profile;
use crate::usb::context::{UsbContext, UsbDeviceHandle};
use crate::usb::device::{self, InterfaceInfo};

use super::activation::{self, LoopCtx};
use super::constants::EP_INTR;

/// The swipe driver's per-device object. Mirrors [`crate::drivers::press::PressDevice`]'s shape:
/// the host callback sink is held for the device's lifetime rather than
/// passed per-call, since the capture loop reports images and finger
/// transitions long after `activate` returns.
pub struct SwipeDevice {
    handle: UsbDeviceHandle,
    interface: InterfaceInfo,
    #[allow(dead_code)]
    profile: &'static Profile,
    irq: Rc<IrqListener>,
    host: Rc<RefCell<dyn HostCallbacks>>,
    stopping: Rc<Cell<bool>>,
    loop_task: Option<tokio::task::JoinHandle<()>>,
}

impl SwipeDevice {
    pub fn open(
        context: &Arc<UsbContext>,
        vendor: u16,
        product: u16,
        profile: &'static Profile,
        host: Rc<RefCell<dyn HostCallbacks>>,
    ) -> Result<Self, FpError> {
        let (handle, interface) = device::open_matching(context, vendor, product, true)?;
        let irq_ep = interface.int_ep.unwrap_or(EP_INTR);
        let irq = IrqListener::new(handle.clone(), irq_ep);
        irq.start();
        host.borrow_mut().open_complete(Ok(()));
        Ok(SwipeDevice {
            handle,
            interface,
            profile,
            irq,
            host,
            stopping: Rc::new(Cell::new(false)),
            loop_task: None,
        })
    }

    pub fn close(&self) {
        let _ = self.handle.release_interface(self.interface.interface as i32);
        self.host.borrow_mut().close_complete();
    }

    /// Spawns the outer loop SSM on the local task set. The
    /// host-requested sub-state only matters for press devices; swipe ignores it and always cycles
    /// await-finger/capture/deinit. Finger presence is reported directly
    /// by the loop's own states (await-finger on arrival, handoff on
    /// capture completion) rather than through a standing interrupt
    /// handler, since the loop's states already own the one interrupt
    /// endpoint swipe devices expose.
    pub async fn activate(&mut self, _requested_state: ImgDevState) {
        self.stopping.set(false);

        let ctx = LoopCtx {
            handle: self.handle.clone(),
            irq: self.irq.clone(),
            stopping: self.stopping.clone(),
            on_image: {
                let host = self.host.clone();
                Rc::new(RefCell::new(move |image: crate::image::Image| {
                    host.borrow_mut().image_captured(image);
                }))
            },
            on_finger_status: {
                let host = self.host.clone();
                Rc::new(RefCell::new(move |present: bool| {
                    host.borrow_mut().report_finger_status(present);
                }))
            },
        };
        let host = self.host.clone();
        let task = tokio::task::spawn_local(async move {
            let ssm = activation::build_loop_ssm();
            let mut ctx = ctx;
            if let Err(e) = ssm.run(&mut ctx).await {
                host.borrow_mut().session_error(e.to_errno());
            }
        });
        self.loop_task = Some(task);
        self.host.borrow_mut().activate_complete(Ok(()));
    }

    pub async fn deactivate(&mut self) {
        self.stopping.set(true);
        if let Some(task) = self.loop_task.take() {
            let _ = task.await;
        }
        self.host.borrow_mut().deactivate_complete();
    }
}
