pub const REG_HWSTAT: u16 = 0x07;
pub const REG_MODE: u16 = 0x4E;
pub const REG_RESPONSE: u16 = 0x2000;
pub const REG_CHALLENGE: u16 = 0x2010;

pub const MODE_INIT: u8 = 0x00;
pub const MODE_AWAIT_FINGER_ON: u8 = 0x10;
pub const MODE_CAPTURE: u8 = 0x20;
pub const MODE_AWAIT_FINGER_OFF: u8 = 0x12;

pub const EP_INTR: u8 = 0x81;
pub const EP_DATA: u8 = 0x82;

pub const DATABLK_RQLEN: usize = 0x1B340;
pub const DATABLK_EXPECT: usize = 0x1B1C0;
pub const DATABLK_HEADER_LEN: usize = 64;

pub const FWFIXER_OFFSETS: [u16; 4] = [0x510, 0x62D, 0x792, 0x7F4];

pub const REBOOTPWR_MAX_ITERS: u32 = 100;
pub const REBOOTPWR_PAUSE_MS: u64 = 10;
pub const POWERUP_MAX_ITERS: u32 = 100;
pub const POWERUP_PAUSE_MS: u64 = 10;

pub const SCANPWR_TIMEOUT_MS: u64 = 300;
pub const SCANPWR_MAX_RETRIES: u32 = 3;

pub const AES_KEY: [u8; 16] = [
    0x79, 0xAC, 0x91, 0x79, 0x5C, 0xA1, 0x47, 0x8E, 0x98, 0xE0, 0x0F, 0x3C, 0x59, 0x8F, 0x5F, 0x4B,
];
