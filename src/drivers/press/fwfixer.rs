use crate::error::FpError;
use crate::regs::{self, RegFamily};
use crate::usb::context::UsbDeviceHandle;

use super::constants::FWFIXER_OFFSETS;

/// Locates the firmware's encryption-enable byte and clears it. Tries each of the four candidate addresses in order; a
/// match is the triple `FF X7 41` where the low nibble of the middle byte
/// is `0x7`. If the bit is already clear, the write is skipped. Matching
/// nothing is a hard failure: `NoDev`.
pub async fn run(handle: &UsbDeviceHandle) -> Result<(), FpError> {
    for &addr in FWFIXER_OFFSETS.iter() {
        let bytes = regs::read_regs(handle, RegFamily::Press, addr, 3).await?;
        let (b0, b1, b2) = (bytes[0], bytes[1], bytes[2]);
        if b0 == 0xFF && b2 == 0x41 && (b1 & 0x0F) == 0x07 {
            if b1 & 0x10 == 0 {
                return Ok(());
            }
            regs::write_reg(handle, RegFamily::Press, addr + 1, b1 & 0xEF).await?;
            return Ok(());
        }
    }
    Err(FpError::NoDev)
}

#[cfg(test)]
mod tests {
    /// A triple matching `FF X7 41` identifies the encryption byte
    /// regardless of which of the four offsets it appears at.
    fn matches_pattern(b0: u8, b1: u8, b2: u8) -> bool {
        b0 == 0xFF && b2 == 0x41 && (b1 & 0x0F) == 0x07
    }

    #[test]
    fn recognizes_encryption_marker() {
        assert!(matches_pattern(0xFF, 0x17, 0x41));
        assert!(matches_pattern(0xFF, 0x07, 0x41));
        assert!(!matches_pattern(0xFF, 0x18, 0x41));
        assert!(!matches_pattern(0xFE, 0x17, 0x41));
        assert!(!matches_pattern(0xFF, 0x17, 0x40));
    }

    #[test]
    fn clearing_bit_four_preserves_low_nibble() {
        let b1 = 0x17u8;
        assert_eq!(b1 & 0xEF, 0x07);
    }
}
