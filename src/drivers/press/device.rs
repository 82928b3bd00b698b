use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::FpError;
use crate::host::{HostCallbacks, ImgDevState};
use crate::irq::{IrqEvent, IrqListener};
use crate::profile::Profile;
use crate::usb::context::{UsbContext, UsbDeviceHandle};
use crate::usb::device::{self, InterfaceInfo};

use super::activation::{self, ActivationCtx};
use super::constants::EP_INTR;
use super::imaging::ImagingLoop;

/// The press driver's per-device object. Owns the claimed USB interface, the interrupt listener,
/// and the imaging loop once activated. Holds the host callback sink
/// for the device's lifetime, since interrupt and imaging events arrive
/// asynchronously long after any single `open`/`activate` call returns.
pub struct PressDevice {
    handle: UsbDeviceHandle,
    interface: InterfaceInfo,
    profile: &'static Profile,
    irq: Rc<IrqListener>,
    host: Rc<RefCell<dyn HostCallbacks>>,
    imaging: Option<Rc<ImagingLoop>>,
}

impl PressDevice {
    pub fn open(
        context: &Arc<UsbContext>,
        vendor: u16,
        product: u16,
        profile: &'static Profile,
        host: Rc<RefCell<dyn HostCallbacks>>,
    ) -> Result<Self, FpError> {
        let (handle, interface) = device::open_matching(context, vendor, product, false)?;
        let irq_ep = interface.int_ep.unwrap_or(EP_INTR);
        let irq = IrqListener::new(handle.clone(), irq_ep);
        irq.start();
        host.borrow_mut().open_complete(Ok(()));
        Ok(PressDevice {
            handle,
            interface,
            profile,
            irq,
            host,
            imaging: None,
        })
    }

    pub fn close(&self) {
        let _ = self.handle.release_interface(self.interface.interface as i32);
        self.host.borrow_mut().close_complete();
    }

    /// Runs the `init` SSM, then (on success) enters the host-requested
    /// sub-state and reports `activate_complete`.
    pub async fn activate(&mut self, requested_state: ImgDevState) {
        let mut ctx = ActivationCtx {
            handle: self.handle.clone(),
            irq: self.irq.clone(),
            profile: self.profile,
            hwstat: 0,
            scanpwr_timeouts: 0,
        };
        let ssm = activation::build_init_ssm();
        let result = ssm.run(&mut ctx).await;
        match result {
            Ok(()) => match activation::enter_requested_state(&self.handle, requested_state).await
            {
                Ok(()) => {
                    self.install_finger_presence_handler();
                    if requested_state == ImgDevState::Capture {
                        self.start_imaging();
                    }
                    self.host.borrow_mut().activate_complete(Ok(()));
                }
                Err(e) => self.host.borrow_mut().activate_complete(Err(e.to_errno())),
            },
            Err(e) => self.host.borrow_mut().activate_complete(Err(e.to_errno())),
        }
    }

    /// `change_state`: re-enters a sub-state without rerunning
    /// the power-up/firmware/challenge-response pipeline, since that is
    /// only needed once per activation.
    pub async fn change_state(&mut self, requested_state: ImgDevState) {
        if let Some(imaging) = self.imaging.take() {
            imaging.stop();
        }
        match activation::enter_requested_state(&self.handle, requested_state).await {
            Ok(()) => {
                if requested_state == ImgDevState::Capture {
                    self.start_imaging();
                }
            }
            Err(e) => self.host.borrow_mut().session_error(e.to_errno()),
        }
    }

    /// Maps `FINGER_ON`/`FINGER_OFF` interrupts to finger-status reports.
    fn install_finger_presence_handler(&self) {
        let host = self.host.clone();
        self.irq.set_callback(Some(Box::new(move |evt: Result<IrqEvent, FpError>| {
            match evt {
                Ok(IrqEvent::FingerOn) => host.borrow_mut().report_finger_status(true),
                Ok(IrqEvent::FingerOff) => host.borrow_mut().report_finger_status(false),
                Ok(IrqEvent::Death) => log::info!("press device reported a DEATH interrupt"),
                Ok(IrqEvent::ScanpwrOn) | Ok(IrqEvent::Other(_)) => {}
                Err(e) => host.borrow_mut().session_error(e.to_errno()),
            }
        })));
    }

    pub async fn deactivate(&mut self) {
        if let Some(imaging) = self.imaging.take() {
            imaging.stop();
        }
        if let Err(e) = activation::deinit(&self.handle).await {
            self.host.borrow_mut().session_error(e.to_errno());
        }
        self.host.borrow_mut().deactivate_complete();
    }

    pub fn start_imaging(&mut self) {
        let width = self.profile.width;
        let height = self.profile.height.unwrap_or(0);
        let loop_ = ImagingLoop::new(self.handle.clone(), width, height);
        let host_ok = self.host.clone();
        let host_err = self.host.clone();
        loop_.start(
            move |img| host_ok.borrow_mut().image_captured(img),
            move |e| host_err.borrow_mut().session_error(e.to_errno()),
        );
        self.imaging = Some(loop_);
    }
}
