use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::error::FpError;
use crate::irq::{IrqEvent, IrqListener};
use crate::profile::Profile;
use crate::regs::{self, RegFamily};
use crate::ssm::{Ssm, StepOutcome};
use crate::usb::context::UsbDeviceHandle;

use super::aes;
use super::constants::*;
use super::fwfixer;

/// Context threaded through the nested press activation SSMs.
pub struct ActivationCtx {
    pub handle: UsbDeviceHandle,
    pub irq: Rc<IrqListener>,
    pub profile: &'static Profile,
    pub hwstat: u8,
    pub scanpwr_timeouts: u32,
}

/// `rebootpwr`: only called when `hwstat & 0x84 == 0x84`.
pub async fn rebootpwr(handle: &UsbDeviceHandle, hwstat: u8) -> Result<(), FpError> {
    regs::write_reg(handle, RegFamily::Press, REG_HWSTAT, hwstat & 0x0F).await?;
    for _ in 0..REBOOTPWR_MAX_ITERS {
        let status = regs::read_reg(handle, RegFamily::Press, REG_HWSTAT).await?;
        if status & 0x01 != 0 {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(REBOOTPWR_PAUSE_MS)).await;
    }
    Err(FpError::TimedOut)
}

/// `powerup`. Runs `challenge_response` between pauses when
/// the profile requires authentication.
pub async fn powerup(handle: &UsbDeviceHandle, hwstat: u8, auth_cr: bool) -> Result<(), FpError> {
    let snapshot = hwstat & 0x0F;
    for _ in 0..POWERUP_MAX_ITERS {
        regs::write_reg(handle, RegFamily::Press, REG_HWSTAT, snapshot).await?;
        let status = regs::read_reg(handle, RegFamily::Press, REG_HWSTAT).await?;
        if status & 0x80 == 0 {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(POWERUP_PAUSE_MS)).await;
        if auth_cr {
            challenge_response(handle).await?;
        }
    }
    Err(FpError::TimedOut)
}

/// `challenge_response`.
pub async fn challenge_response(handle: &UsbDeviceHandle) -> Result<(), FpError> {
    let bytes = regs::read_regs(handle, RegFamily::Press, REG_CHALLENGE, 16).await?;
    let mut challenge = [0u8; 16];
    challenge.copy_from_slice(&bytes);
    let response = aes::encrypt_challenge(&challenge);
    regs::sm_write_regs(handle, RegFamily::Press, REG_RESPONSE, &response)
        .await
        .into_result()
}

/// Builds the top-level `init` SSM. The
/// "return here after reboot" step is not a distinct state: the reboot
/// sub-SSM is simply awaited inline and both branches continue to the same
/// next state, matching the hybrid explicit-state/async-action design.
pub fn build_init_ssm() -> Ssm<ActivationCtx> {
    Ssm::new(
        "press_init",
        vec![
            // 0: GET_HWSTAT
            Box::new(|ctx: &mut ActivationCtx| {
                Box::pin(async move {
                    match regs::read_reg(&ctx.handle, RegFamily::Press, REG_HWSTAT).await {
                        Ok(v) => {
                            ctx.hwstat = v;
                            StepOutcome::Next
                        }
                        Err(e) => StepOutcome::Abort(e),
                    }
                })
            }),
            // 1: CHECK_HWSTAT_REBOOT (+ implicit "return here after reboot")
            Box::new(|ctx: &mut ActivationCtx| {
                Box::pin(async move {
                    if ctx.hwstat & 0x84 == 0x84 {
                        match rebootpwr(&ctx.handle, ctx.hwstat).await {
                            Ok(()) => StepOutcome::Next,
                            Err(e) => StepOutcome::Abort(e),
                        }
                    } else {
                        StepOutcome::Next
                    }
                })
            }),
            // 2: CHECK_HWSTAT_POWERDOWN
            Box::new(|ctx: &mut ActivationCtx| {
                Box::pin(async move {
                    if ctx.hwstat & 0x80 == 0 {
                        match regs::write_reg(
                            &ctx.handle,
                            RegFamily::Press,
                            REG_HWSTAT,
                            ctx.hwstat | 0x80,
                        )
                        .await
                        {
                            Ok(()) => StepOutcome::Next,
                            Err(e) => StepOutcome::Abort(e),
                        }
                    } else {
                        StepOutcome::Next
                    }
                })
            }),
            // 3: FIX_FIRMWARE
            Box::new(|ctx: &mut ActivationCtx| {
                Box::pin(async move {
                    match fwfixer::run(&ctx.handle).await {
                        Ok(()) => StepOutcome::Next,
                        Err(e) => StepOutcome::Abort(e),
                    }
                })
            }),
            // 4: POWERUP
            Box::new(|ctx: &mut ActivationCtx| {
                Box::pin(async move {
                    match powerup(&ctx.handle, ctx.hwstat, ctx.profile.auth_cr).await {
                        Ok(()) => StepOutcome::Next,
                        Err(e) => StepOutcome::Abort(e),
                    }
                })
            }),
            // 5: AWAIT_SCAN_POWER
            Box::new(|ctx: &mut ActivationCtx| {
                Box::pin(async move {
                    let (tx, rx) = tokio::sync::oneshot::channel();
                    let tx = Rc::new(RefCell::new(Some(tx)));
                    ctx.irq.set_callback(Some(Box::new(move |evt| {
                        if let Ok(IrqEvent::ScanpwrOn) = evt {
                            if let Some(sender) = tx.borrow_mut().take() {
                                let _ = sender.send(());
                            }
                        }
                    })));

                    let timeout = tokio::time::sleep(Duration::from_millis(SCANPWR_TIMEOUT_MS));
                    tokio::pin!(timeout);
                    tokio::select! {
                        _ = rx => {
                            ctx.irq.set_callback(None);
                            StepOutcome::Next
                        }
                        _ = &mut timeout => {
                            ctx.irq.set_callback(None);
                            ctx.scanpwr_timeouts += 1;
                            if ctx.scanpwr_timeouts >= SCANPWR_MAX_RETRIES {
                                StepOutcome::Abort(FpError::TimedOut)
                            } else {
                                StepOutcome::JumpTo(0)
                            }
                        }
                    }
                })
            }),
            // 6: DONE
            Box::new(|_ctx: &mut ActivationCtx| Box::pin(async move { StepOutcome::Complete })),
        ],
    )
}

/// Writes `REG_MODE` for the sub-state the host requested at `activate`
/// time, once `init` has completed.
pub async fn enter_requested_state(
    handle: &UsbDeviceHandle,
    state: crate::host::ImgDevState,
) -> Result<(), FpError> {
    let mode = match state {
        crate::host::ImgDevState::AwaitFingerOn => MODE_AWAIT_FINGER_ON,
        crate::host::ImgDevState::Capture => MODE_CAPTURE,
        crate::host::ImgDevState::AwaitFingerOff => MODE_AWAIT_FINGER_OFF,
    };
    regs::write_reg(handle, RegFamily::Press, REG_MODE, mode).await
}

/// Deinit sequence: plain MODE_INIT + hwstat write,
/// then the caller stops the interrupt listener and reports completion.
pub async fn deinit(handle: &UsbDeviceHandle) -> Result<(), FpError> {
    regs::write_reg(handle, RegFamily::Press, REG_MODE, MODE_INIT).await?;
    regs::write_reg(handle, RegFamily::Press, REG_HWSTAT, 0x80).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn reboot_trigger_mask_matches_hwstat_gate() {
        // hwstat & 0x84 == 0x84 gates rebootpwr.
        assert_eq!(0x85u8 & 0x84, 0x84);
        assert_ne!(0x80u8 & 0x84, 0x84);
    }
}
