use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;

use crate::error::FpError;
use crate::image::Image;
use crate::irq::{IrqEvent, IrqListener};
use crate::regs::{self, RegFamily};
use crate::ssm::{Ssm, StepOutcome};
use crate::usb::{context::UsbDeviceHandle, transfer};

use super::capture::CaptureState;
use super::constants::*;

/// Context threaded through the swipe driver's outer loop SSM. One loop instance runs for the device's whole activated
/// lifetime, cycling finger-wait/capture/deinit until `stopping` is set.
pub struct LoopCtx {
    pub handle: UsbDeviceHandle,
    pub irq: Rc<IrqListener>,
    pub stopping: Rc<Cell<bool>>,
    pub on_image: Rc<RefCell<dyn FnMut(Image)>>,
    pub on_finger_status: Rc<RefCell<dyn FnMut(bool)>>,
}

/// Context threaded through the await-finger register choreography
/// (`build_awfsm`). `read_reg_result` holds the most recent register read,
/// for the next state's branch to consult — mirroring the single
/// `sdev->read_reg_result` field the original driver threads between its
/// own numbered states.
struct AwfsmCtx {
    handle: UsbDeviceHandle,
    read_reg_result: u8,
}

/// Await-finger register choreography: four write bursts interleaved with
/// three read-and-branch steps, ending with the finger-detection-mode
/// burst. A literal numbered-state machine, since each state's action is
/// genuinely a single register operation with no async work to collapse.
fn build_awfsm() -> Ssm<AwfsmCtx> {
    Ssm::new(
        "swipe_awfsm",
        vec![
            // 0: WRITEV_1
            Box::new(|ctx: &mut AwfsmCtx| {
                Box::pin(async move {
                    regs::sm_write_reg_pairs(&ctx.handle, RegFamily::Swipe, AWFSM_WRITEV_1).await
                })
            }),
            // 1: READ_01
            Box::new(|ctx: &mut AwfsmCtx| {
                Box::pin(async move {
                    let (value, outcome) =
                        regs::sm_read_reg(&ctx.handle, RegFamily::Swipe, REG_01).await;
                    if let Some(v) = value {
                        ctx.read_reg_result = v;
                    }
                    outcome
                })
            }),
            // 2: WRITE_01 (branch on the read value)
            Box::new(|ctx: &mut AwfsmCtx| {
                Box::pin(async move {
                    let value = if ctx.read_reg_result != 0xc6 { 0x46 } else { 0xc6 };
                    regs::sm_write_reg(&ctx.handle, RegFamily::Swipe, REG_01, value).await
                })
            }),
            // 3: WRITEV_2
            Box::new(|ctx: &mut AwfsmCtx| {
                Box::pin(async move {
                    regs::sm_write_reg_pairs(&ctx.handle, RegFamily::Swipe, AWFSM_WRITEV_2).await
                })
            }),
            // 4: READ_13
            Box::new(|ctx: &mut AwfsmCtx| {
                Box::pin(async move {
                    let (value, outcome) =
                        regs::sm_read_reg(&ctx.handle, RegFamily::Swipe, REG_13).await;
                    if let Some(v) = value {
                        ctx.read_reg_result = v;
                    }
                    outcome
                })
            }),
            // 5: WRITE_13 (branch on the read value)
            Box::new(|ctx: &mut AwfsmCtx| {
                Box::pin(async move {
                    let value = if ctx.read_reg_result != 0x45 { 0x05 } else { 0x45 };
                    regs::sm_write_reg(&ctx.handle, RegFamily::Swipe, REG_13, value).await
                })
            }),
            // 6: WRITEV_3
            Box::new(|ctx: &mut AwfsmCtx| {
                Box::pin(async move {
                    regs::sm_write_reg_pairs(&ctx.handle, RegFamily::Swipe, AWFSM_WRITEV_3).await
                })
            }),
            // 7: READ_07
            Box::new(|ctx: &mut AwfsmCtx| {
                Box::pin(async move {
                    let (value, outcome) =
                        regs::sm_read_reg(&ctx.handle, RegFamily::Swipe, REG_07).await;
                    if let Some(v) = value {
                        ctx.read_reg_result = v;
                    }
                    outcome
                })
            }),
            // 8: WRITE_07 (echo the read value back)
            Box::new(|ctx: &mut AwfsmCtx| {
                Box::pin(async move {
                    if ctx.read_reg_result != 0x10 && ctx.read_reg_result != 0x90 {
                        log::warn!("swipe: odd reg 0x07 value {:#x}", ctx.read_reg_result);
                    }
                    regs::sm_write_reg(&ctx.handle, RegFamily::Swipe, REG_07, ctx.read_reg_result)
                        .await
                })
            }),
            // 9: WRITEV_4 (enters finger-detection mode)
            Box::new(|ctx: &mut AwfsmCtx| {
                Box::pin(async move {
                    regs::sm_write_reg_pairs(&ctx.handle, RegFamily::Swipe, AWFSM_WRITEV_4).await
                })
            }),
        ],
    )
}

/// Await-finger sub-SSM: runs the register choreography above, then waits
/// for `FINGER_ON`, rechecking the stop flag every [`AWFSM_POLL_MS`] so a
/// `deactivate` can interrupt a wait that would otherwise never see an
/// interrupt.
/// Arrival of the interrupt generates a `finger_on` report to the host
/// before the sub-SSM hands control back to `RUN_CAPSM`.
pub async fn await_finger(
    handle: &UsbDeviceHandle,
    irq: &Rc<IrqListener>,
    stopping: &Rc<Cell<bool>>,
    on_finger_status: &Rc<RefCell<dyn FnMut(bool)>>,
) -> Result<(), FpError> {
    let mut actx = AwfsmCtx {
        handle: handle.clone(),
        read_reg_result: 0,
    };
    build_awfsm().run(&mut actx).await?;

    loop {
        if stopping.get() {
            irq.set_callback(None);
            return Err(FpError::Cancelled);
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Rc::new(RefCell::new(Some(tx)));
        irq.set_callback(Some(Box::new(move |evt: Result<IrqEvent, FpError>| {
            if let Ok(IrqEvent::FingerOn) = evt {
                if let Some(sender) = tx.borrow_mut().take() {
                    let _ = sender.send(());
                }
            }
        })));

        let poll_tick = tokio::time::sleep(Duration::from_millis(AWFSM_POLL_MS));
        tokio::pin!(poll_tick);
        tokio::select! {
            _ = rx => {
                irq.set_callback(None);
                (on_finger_status.borrow_mut())(true);
                return Ok(());
            }
            _ = &mut poll_tick => {
                continue;
            }
        }
    }
}

/// Capture sub-SSM: resets the row-assembly counters, arms the sensor for
/// streaming (`reg15=0x20, reg30=0xE0`), keeps [`NUM_BULK_TRANSFERS`] bulk
/// reads outstanding on the image endpoint feeding each completed buffer's
/// packets to a [`CaptureState`], and writes the capture-mode burst once
/// the pool is launched. Runs until `CaptureState` signals handoff or
/// `stopping` is set by a concurrent `deactivate`. On the way out, every
/// still-outstanding transfer is cancelled and its completion observed
/// before the session returns — the async/await equivalent of the
/// `killing_transfers` deferred-action bookkeeping: the deferred action is
/// just whatever code runs after the final `.await`.
pub async fn capture_session(
    handle: &UsbDeviceHandle,
    stopping: &Rc<Cell<bool>>,
) -> Result<Image, FpError> {
    let mut capture = CaptureState::new();
    regs::write_reg(handle, RegFamily::Swipe, REG_15, CAPSM_REG15_VALUE).await?;
    regs::write_reg(handle, RegFamily::Swipe, REG_30, CAPSM_REG30_VALUE).await?;

    let mut outstanding: Vec<Rc<transfer::TransferHandle<Vec<u8>>>> =
        Vec::with_capacity(NUM_BULK_TRANSFERS);
    let mut inflight = FuturesUnordered::new();

    let mut outcome: Result<(), FpError> = Ok(());
    for _ in 0..NUM_BULK_TRANSFERS {
        match submit_read(handle).await {
            Ok(rc) => {
                outstanding.push(rc.clone());
                inflight.push(wait_tagged(rc));
            }
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }

    if outcome.is_ok() {
        outcome = regs::write_reg_pairs(handle, RegFamily::Swipe, CAPSM_WRITEV).await;
    }

    'drive: while outcome.is_ok() {
        let poll_tick = tokio::time::sleep(Duration::from_millis(AWFSM_POLL_MS));
        tokio::pin!(poll_tick);
        let (rc, result) = tokio::select! {
            next = inflight.next() => match next {
                Some(pair) => pair,
                None => break 'drive,
            },
            _ = &mut poll_tick => {
                if stopping.get() {
                    outcome = Err(FpError::Cancelled);
                }
                continue 'drive;
            }
        };

        outstanding.retain(|h| !Rc::ptr_eq(h, &rc));
        match result {
            Ok(bytes) => {
                for chunk in bytes.chunks_exact(PACKET_SIZE) {
                    capture.process_packet(chunk);
                }
            }
            Err(FpError::Cancelled) => {}
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }

        if capture.should_handoff() {
            break;
        }

        match submit_read(handle).await {
            Ok(rc) => {
                outstanding.push(rc.clone());
                inflight.push(wait_tagged(rc));
            }
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }

    for h in &outstanding {
        h.cancel();
    }
    while inflight.next().await.is_some() {}

    outcome?;
    capture.handoff()
}

async fn submit_read(
    handle: &UsbDeviceHandle,
) -> Result<Rc<transfer::TransferHandle<Vec<u8>>>, FpError> {
    transfer::read(handle, EP_DATA, BULK_TRANSFER_SIZE, false, transfer::NO_TIMEOUT)
        .await
        .map(Rc::new)
}

async fn wait_tagged(
    rc: Rc<transfer::TransferHandle<Vec<u8>>>,
) -> (Rc<transfer::TransferHandle<Vec<u8>>>, Result<Vec<u8>, FpError>) {
    let result = rc.wait_ref().await;
    (rc, result)
}

/// Deinit sub-SSM: resets and drops the sensor into low-power mode.
pub async fn deinit(handle: &UsbDeviceHandle) -> Result<(), FpError> {
    regs::write_reg_pairs(handle, RegFamily::Swipe, DEINITSM_WRITEV).await
}

/// Builds the outer loop SSM: `RUN_AWFSM`/`AWAIT_FINGER` and
/// `RUN_CAPSM`/`CAPTURE` collapse to single states the same way press's
/// `init` SSM collapses its "return here after reboot" step, since the
/// sub-SSM is simply awaited inline.
pub fn build_loop_ssm() -> Ssm<LoopCtx> {
    Ssm::new(
        "swipe_loop",
        vec![
            // 0: AWAIT_FINGER
            Box::new(|ctx: &mut LoopCtx| {
                Box::pin(async move {
                    match await_finger(&ctx.handle, &ctx.irq, &ctx.stopping, &ctx.on_finger_status)
                        .await
                    {
                        Ok(()) => StepOutcome::Next,
                        Err(FpError::Cancelled) => StepOutcome::Complete,
                        Err(e) => StepOutcome::Abort(e),
                    }
                })
            }),
            // 1: CAPTURE
            Box::new(|ctx: &mut LoopCtx| {
                Box::pin(async move {
                    match capture_session(&ctx.handle, &ctx.stopping).await {
                        Ok(image) => {
                            // Handoff reports finger_off before tearing the
                            // bulk pool down.
                            (ctx.on_finger_status.borrow_mut())(false);
                            (ctx.on_image.borrow_mut())(image);
                            StepOutcome::Next
                        }
                        Err(FpError::Cancelled) => StepOutcome::Complete,
                        Err(e) => StepOutcome::Abort(e),
                    }
                })
            }),
            // 2: DEINIT
            Box::new(|ctx: &mut LoopCtx| {
                Box::pin(async move {
                    match deinit(&ctx.handle).await {
                        Ok(()) => StepOutcome::Next,
                        Err(e) => StepOutcome::Abort(e),
                    }
                })
            }),
            // 3: FINAL
            Box::new(|ctx: &mut LoopCtx| {
                Box::pin(async move {
                    if ctx.stopping.get() {
                        StepOutcome::Complete
                    } else {
                        StepOutcome::JumpTo(0)
                    }
                })
            }),
        ],
    )
}

#[cfg(test)]
mod tests {
    #[test]
    fn packet_size_divides_bulk_transfer_size() {
        use super::super::constants::{BULK_TRANSFER_SIZE, PACKET_SIZE};
        assert_eq!(BULK_TRANSFER_SIZE % PACKET_SIZE, 0);
    }

    #[test]
    fn awfsm_writev_4_enters_finger_detection_mode() {
        use super::super::constants::{AWFSM_WRITEV_4, REG_15};
        let tail: Vec<(u16, u8)> = AWFSM_WRITEV_4[AWFSM_WRITEV_4.len() - 5..]
            .iter()
            .map(|rw| (rw.reg, rw.value))
            .collect();
        assert_eq!(
            tail,
            vec![
                (REG_15, 0x20),
                (0x30, 0xe1),
                (REG_15, 0x24),
                (REG_15, 0x04),
                (REG_15, 0x84),
            ]
        );
    }

    #[test]
    fn deinitsm_writev_matches_low_power_sequence() {
        use super::super::constants::{DEINITSM_WRITEV, REG_13};
        let seq: Vec<(u16, u8)> = DEINITSM_WRITEV.iter().map(|rw| (rw.reg, rw.value)).collect();
        assert_eq!(
            seq,
            vec![(0x0b, 0x00), (0x09, 0x20), (REG_13, 0x45), (REG_13, 0x45)]
        );
    }
}
