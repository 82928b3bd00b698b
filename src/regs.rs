use crate::error::FpError;
use crate::ssm::StepOutcome;
use crate::usb::{context::UsbDeviceHandle, transfer};

/// Which vendor request / field layout a device family uses. Press carries the register in `wValue`; swipe
/// carries it in `wIndex` and always transfers a single byte out / eight
/// bytes back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegFamily {
    Press,
    Swipe,
}

const VENDOR_REQUEST_PRESS: u8 = 0x04;
const VENDOR_REQUEST_SWIPE: u8 = 0x0c;
const REQUEST_TYPE_VENDOR_OUT: u8 = 0x40;
const REQUEST_TYPE_VENDOR_IN: u8 = 0xc0;
const SWIPE_READ_LEN: usize = 8;

impl RegFamily {
    fn request(self) -> u8 {
        match self {
            RegFamily::Press => VENDOR_REQUEST_PRESS,
            RegFamily::Swipe => VENDOR_REQUEST_SWIPE,
        }
    }
}

/// Writes a burst of consecutive registers `first_reg..first_reg+values.len()`.
/// Each write is a separate control transfer, serialized.
pub async fn write_regs(
    handle: &UsbDeviceHandle,
    family: RegFamily,
    first_reg: u16,
    values: &[u8],
) -> Result<(), FpError> {
    for (i, &value) in values.iter().enumerate() {
        write_reg(handle, family, first_reg + i as u16, value).await?;
    }
    Ok(())
}

pub async fn write_reg(
    handle: &UsbDeviceHandle,
    family: RegFamily,
    reg: u16,
    value: u8,
) -> Result<(), FpError> {
    let (req_value, req_index) = match family {
        RegFamily::Press => (reg, 0),
        RegFamily::Swipe => (0, reg),
    };
    let payload = [value];
    let pending = transfer::control_out(
        handle,
        REQUEST_TYPE_VENDOR_OUT,
        family.request(),
        req_value,
        req_index,
        &payload,
        transfer::CONTROL_TIMEOUT,
    )
    .await?;
    let actual = pending.wait().await?;
    if actual != payload.len() {
        return Err(FpError::protocol(format!(
            "write_reg(0x{reg:02x}): wrote {actual} of {} bytes",
            payload.len()
        )));
    }
    Ok(())
}

pub async fn read_reg(
    handle: &UsbDeviceHandle,
    family: RegFamily,
    reg: u16,
) -> Result<u8, FpError> {
    let values = read_regs(handle, family, reg, 1).await?;
    values
        .into_iter()
        .next()
        .ok_or_else(|| FpError::protocol("read_reg: empty response"))
}

pub async fn read_regs(
    handle: &UsbDeviceHandle,
    family: RegFamily,
    first_reg: u16,
    n: usize,
) -> Result<Vec<u8>, FpError> {
    let (req_value, req_index) = match family {
        RegFamily::Press => (first_reg, 0),
        RegFamily::Swipe => (0, first_reg),
    };
    let len = match family {
        RegFamily::Press => n,
        RegFamily::Swipe => SWIPE_READ_LEN,
    };
    let pending = transfer::control_in(
        handle,
        REQUEST_TYPE_VENDOR_IN,
        family.request(),
        req_value,
        req_index,
        len,
        transfer::CONTROL_TIMEOUT,
    )
    .await?;
    let mut data = pending.wait().await?;
    if data.len() < n {
        return Err(FpError::protocol(format!(
            "read_regs(0x{first_reg:02x}, {n}): got {} bytes",
            data.len()
        )));
    }
    data.truncate(n);
    Ok(data)
}

/// One `(register, value)` pair in a burst write that does not target
/// consecutive registers.
#[derive(Clone, Copy, Debug)]
pub struct RegWrite {
    pub reg: u16,
    pub value: u8,
}

/// Writes an explicit, possibly non-consecutive, sequence of register
/// writes. Each write is a separate control transfer, serialized.
pub async fn write_reg_pairs(
    handle: &UsbDeviceHandle,
    family: RegFamily,
    pairs: &[RegWrite],
) -> Result<(), FpError> {
    for rw in pairs {
        write_reg(handle, family, rw.reg, rw.value).await?;
    }
    Ok(())
}

pub async fn sm_write_reg_pairs(
    handle: &UsbDeviceHandle,
    family: RegFamily,
    pairs: &[RegWrite],
) -> StepOutcome {
    match write_reg_pairs(handle, family, pairs).await {
        Ok(()) => StepOutcome::Next,
        Err(e) => StepOutcome::Abort(e),
    }
}

/// `sm_write_reg`: binds a register write's outcome directly to
/// an SSM step outcome, for use as a one-line state action.
pub async fn sm_write_reg(
    handle: &UsbDeviceHandle,
    family: RegFamily,
    reg: u16,
    value: u8,
) -> StepOutcome {
    match write_reg(handle, family, reg, value).await {
        Ok(()) => StepOutcome::Next,
        Err(e) => StepOutcome::Abort(e),
    }
}

pub async fn sm_write_regs(
    handle: &UsbDeviceHandle,
    family: RegFamily,
    first_reg: u16,
    values: &[u8],
) -> StepOutcome {
    match write_regs(handle, family, first_reg, values).await {
        Ok(()) => StepOutcome::Next,
        Err(e) => StepOutcome::Abort(e),
    }
}

/// `sm_read_reg`: same as `sm_write_reg` but yields the value to the
/// caller alongside the outcome, since most callers branch on it.
pub async fn sm_read_reg(
    handle: &UsbDeviceHandle,
    family: RegFamily,
    reg: u16,
) -> (Option<u8>, StepOutcome) {
    match read_reg(handle, family, reg).await {
        Ok(v) => (Some(v), StepOutcome::Next),
        Err(e) => (None, StepOutcome::Abort(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_uses_value_for_register() {
        assert_eq!(RegFamily::Press.request(), 0x04);
    }

    #[test]
    fn swipe_uses_index_for_register() {
        assert_eq!(RegFamily::Swipe.request(), 0x0c);
    }

    #[test]
    fn reg_write_pairs_need_not_be_consecutive() {
        let pairs = [
            RegWrite { reg: 0x09, value: 0x28 },
            RegWrite { reg: 0x13, value: 0x55 },
            RegWrite { reg: 0x0b, value: 0x80 },
        ];
        let regs: Vec<u16> = pairs.iter().map(|p| p.reg).collect();
        assert_eq!(regs, vec![0x09, 0x13, 0x0b]);
    }
}
