use crate::regs::RegWrite;

pub const IMG_WIDTH: usize = 288;
pub const MAX_ROWS: usize = 700;
pub const NUM_BULK_TRANSFERS: usize = 24;
pub const BULK_TRANSFER_SIZE: usize = 4096;
pub const PACKET_SIZE: usize = 64;
pub const PACKET_DATA_LEN: usize = 62;
pub const PACKETS_PER_TRANSFER: usize = BULK_TRANSFER_SIZE / PACKET_SIZE;

pub const SEQNUM_MODULUS: u32 = 16384;
pub const INITIAL_LAST_SEQNUM: u32 = 16383;

pub const ROW_BLANK_TOTAL_THRESHOLD: u32 = 52_000;
pub const NUM_BLANK_LIMIT: u32 = 500;
pub const ROW_DEDUP_DIFF_THRESHOLD: u32 = 3_000;

pub const EP_INTR: u8 = 0x83;
pub const EP_DATA: u8 = 0x82;

pub const REG_01: u16 = 0x01;
pub const REG_07: u16 = 0x07;
pub const REG_13: u16 = 0x13;
pub const REG_15: u16 = 0x15;
pub const REG_30: u16 = 0x30;

/// Await-finger burst 1: idle the sensor and park it at a known baseline
/// before probing register `0x01`.
pub const AWFSM_WRITEV_1: &[RegWrite] = &[
    RegWrite { reg: 0x0a, value: 0x00 },
    RegWrite { reg: 0x0a, value: 0x00 },
    RegWrite { reg: 0x09, value: 0x20 },
    RegWrite { reg: 0x03, value: 0x3b },
    RegWrite { reg: 0x00, value: 0x67 },
    RegWrite { reg: 0x00, value: 0x67 },
];

/// Await-finger burst 2, written after the `0x01` read/write branch.
pub const AWFSM_WRITEV_2: &[RegWrite] = &[
    RegWrite { reg: 0x01, value: 0xc6 },
    RegWrite { reg: 0x0c, value: 0x13 },
    RegWrite { reg: 0x0d, value: 0x0d },
    RegWrite { reg: 0x0e, value: 0x0e },
    RegWrite { reg: 0x0f, value: 0x0d },
    RegWrite { reg: 0x0b, value: 0x00 },
];

/// Await-finger burst 3, written after the `0x13` read/write branch.
pub const AWFSM_WRITEV_3: &[RegWrite] = &[
    RegWrite { reg: 0x13, value: 0x45 },
    RegWrite { reg: 0x30, value: 0xe0 },
    RegWrite { reg: 0x12, value: 0x01 },
    RegWrite { reg: 0x20, value: 0x01 },
    RegWrite { reg: 0x09, value: 0x20 },
    RegWrite { reg: 0x0a, value: 0x00 },
    RegWrite { reg: 0x30, value: 0xe0 },
    RegWrite { reg: 0x20, value: 0x01 },
];

/// Await-finger burst 4: written after `0x07` is read back and echoed.
/// The trailing five writes enter finger-detection mode.
pub const AWFSM_WRITEV_4: &[RegWrite] = &[
    RegWrite { reg: 0x08, value: 0x00 },
    RegWrite { reg: 0x10, value: 0x00 },
    RegWrite { reg: 0x12, value: 0x01 },
    RegWrite { reg: 0x11, value: 0xbf },
    RegWrite { reg: 0x12, value: 0x01 },
    RegWrite { reg: 0x07, value: 0x10 },
    RegWrite { reg: 0x07, value: 0x10 },
    RegWrite { reg: 0x04, value: 0x00 },
    RegWrite { reg: 0x05, value: 0x00 },
    RegWrite { reg: 0x0b, value: 0x00 },
    RegWrite { reg: 0x15, value: 0x20 },
    RegWrite { reg: 0x30, value: 0xe1 },
    RegWrite { reg: 0x15, value: 0x24 },
    RegWrite { reg: 0x15, value: 0x04 },
    RegWrite { reg: 0x15, value: 0x84 },
];

/// Written once the bulk pool is successfully streaming, to switch the
/// sensor into capture mode.
pub const CAPSM_WRITEV: &[RegWrite] = &[
    RegWrite { reg: 0x09, value: 0x28 },
    RegWrite { reg: 0x13, value: 0x55 },
    RegWrite { reg: 0x0b, value: 0x80 },
    RegWrite { reg: 0x04, value: 0x00 },
    RegWrite { reg: 0x05, value: 0x00 },
];

pub const CAPSM_REG15_VALUE: u8 = 0x20;
pub const CAPSM_REG30_VALUE: u8 = 0xE0;

/// Reset and drop into low-power mode on deactivation.
pub const DEINITSM_WRITEV: &[RegWrite] = &[
    RegWrite { reg: 0x0b, value: 0x00 },
    RegWrite { reg: 0x09, value: 0x20 },
    RegWrite { reg: 0x13, value: 0x45 },
    RegWrite { reg: 0x13, value: 0x45 },
];

/// How often the await-finger wait rechecks the stop flag between retries.
pub const AWFSM_POLL_MS: u64 = 250;
