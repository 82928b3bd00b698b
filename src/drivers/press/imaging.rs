use std::cell::RefCell;
use std::rc::Rc;

use crate::error::FpError;
use crate::image::{Image, ImageFlags};
use crate::usb::{context::UsbDeviceHandle, transfer};

use super::constants::{DATABLK_EXPECT, DATABLK_HEADER_LEN, DATABLK_RQLEN, EP_DATA};

/// The single-shot press imaging loop: one bulk-IN
/// transfer outstanding at a time, resubmitted after every completion
/// until `stop` is called.
pub struct ImagingLoop {
    handle: UsbDeviceHandle,
    width: usize,
    height: usize,
    stopping: RefCell<bool>,
    current: RefCell<Option<Rc<transfer::TransferHandle<Vec<u8>>>>>,
}

impl ImagingLoop {
    pub fn new(handle: UsbDeviceHandle, width: usize, height: usize) -> Rc<Self> {
        Rc::new(ImagingLoop {
            handle,
            width,
            height,
            stopping: RefCell::new(false),
            current: RefCell::new(None),
        })
    }

    pub fn start(
        self: &Rc<Self>,
        mut on_image: impl FnMut(Image) + 'static,
        mut on_error: impl FnMut(FpError) + 'static,
    ) {
        let this = self.clone();
        tokio::task::spawn_local(async move {
            this.run(&mut on_image, &mut on_error).await;
        });
    }

    async fn run(self: Rc<Self>, on_image: &mut dyn FnMut(Image), on_error: &mut dyn FnMut(FpError)) {
        loop {
            if *self.stopping.borrow() {
                break;
            }
            let pending = match transfer::read(
                &self.handle,
                EP_DATA,
                DATABLK_RQLEN,
                false,
                transfer::NO_TIMEOUT,
            )
            .await
            {
                Ok(p) => Rc::new(p),
                Err(e) => {
                    on_error(e);
                    continue;
                }
            };
            *self.current.borrow_mut() = Some(pending.clone());
            let result = pending.wait_ref().await;
            *self.current.borrow_mut() = None;

            match result {
                Err(FpError::Cancelled) => break,
                Err(e) => {
                    on_error(e);
                    if *self.stopping.borrow() {
                        break;
                    }
                }
                Ok(bytes) => {
                    match payload_from(&bytes) {
                        Ok(payload) => {
                            let mut image = Image::from_bytes(
                                self.width,
                                self.height,
                                payload.to_vec(),
                                ImageFlags::empty(),
                            );
                            image.set_flags(
                                ImageFlags::V_FLIPPED
                                    | ImageFlags::H_FLIPPED
                                    | ImageFlags::COLORS_INVERTED,
                            );
                            on_image(image);
                        }
                        Err(e) => on_error(e),
                    }
                    if *self.stopping.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// `stop_imaging_loop`: best-effort cancel of the in-flight
    /// transfer; its callback observes `Cancelled` and the loop exits
    /// without resubmitting.
    pub fn stop(self: &Rc<Self>) {
        *self.stopping.borrow_mut() = true;
        if let Some(pending) = self.current.borrow().as_ref() {
            pending.cancel();
        }
    }
}

/// Strips the header, if present.
fn payload_from(bytes: &[u8]) -> Result<&[u8], FpError> {
    if bytes.len() == DATABLK_EXPECT {
        Ok(&bytes[DATABLK_HEADER_LEN..])
    } else if bytes.len() == DATABLK_EXPECT - DATABLK_HEADER_LEN {
        Ok(bytes)
    } else {
        Err(FpError::protocol(format!(
            "unexpected image payload length {}",
            bytes.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_length_payload_skips_header() {
        let data = vec![0u8; DATABLK_EXPECT];
        let payload = payload_from(&data).unwrap();
        assert_eq!(payload.len(), DATABLK_EXPECT - DATABLK_HEADER_LEN);
    }

    #[test]
    fn headerless_payload_passes_through() {
        let data = vec![0u8; DATABLK_EXPECT - DATABLK_HEADER_LEN];
        let payload = payload_from(&data).unwrap();
        assert_eq!(payload.len(), data.len());
    }

    #[test]
    fn unexpected_length_is_protocol_error() {
        let data = vec![0u8; 10];
        assert!(matches!(payload_from(&data), Err(FpError::Protocol(_))));
    }
}
