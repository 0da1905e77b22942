mod engine;
mod joybus;
mod security;

use modular_bitfield::prelude::*;

pub use engine::{Phase, PifEngine, ResetStep};
pub use joybus::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Size {
    Size4,
    Size64,
}

/// The byte the CPU writes to the last address of PIF RAM.
#[bitfield(bits = 8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PifCommand {
    pub joybus: bool,
    pub challenge: bool,
    pub bit2: bool,
    pub terminate: bool,
    pub lockout: bool,
    pub get_checksum: bool,
    pub check_checksum: bool,
    pub ack: bool,
}

/// Internal RAM map of the PIF.
pub mod layout {
    pub const FRAME_LOW: u8 = 0x00;
    pub const FRAME_HIGH: u8 = 0x10;
    pub const CHALLENGE_TIMEOUT: u8 = 0x0a;
    pub const RESET_TIMER: u8 = 0x0c;
    pub const SEED_BUF: u8 = 0x1a;
    pub const OSINFO: u8 = 0x1b;
    pub const CIC_CHECKSUM_BUF: u8 = 0x20;
    pub const CIC_CHECKSUM: u8 = 0x24;
    pub const TX_COUNT: u8 = 0x22;
    pub const RX_COUNT: u8 = 0x32;
    pub const PIF_CHECKSUM: u8 = 0x34;
    pub const CHANNEL_STATUS: u8 = 0x40;
    pub const BOOT_TIMER: u8 = 0x4a;
    pub const STATUS: u8 = 0x5e;
    pub const KEY_A: u8 = 0x60;
    pub const KEY_B: u8 = 0x70;
    pub const ENTROPY: u8 = 0x68;
    pub const SHARED: u8 = 0x80;
    pub const CHALLENGE_SEND: u8 = 0xdd;
    pub const CHALLENGE_RECV: u8 = 0xdf;
    pub const CHALLENGE_DATA: u8 = 0xe0;
    pub const CMD_HIGH: u8 = 0xfe;
    pub const CMD_LOW: u8 = 0xff;

    /// Distance between internal secrets and where the CPU sees them during boot.
    pub const EXPOSE: u8 = 0xb0;

    pub const OSINFO_RESET: u8 = 1;
    pub const OSINFO_VERSION: u8 = 2;
    pub const OSINFO_64DD: u8 = 3;

    pub const STATUS_CHALLENGE: u8 = 1;
    pub const STATUS_RUNNING: u8 = 3;

    pub const CHANNEL_RESET: u8 = 0;
    pub const CHANNEL_SKIP: u8 = 3;

    pub const CHANNELS: u8 = 5;
}

/// Key table the PIF and NTSC chips seed the continuous compare with.
pub const KEYS_NTSC: [u8; 14] = [
    0x19, 0x4a, 0xf1, 0x88, 0xb5, 0x5a, 0x71, 0xc3, 0xde, 0x61, 0x10, 0xed, 0x9e, 0x8c,
];

pub const KEYS_PAL: [u8; 14] = [
    0x14, 0x2f, 0x35, 0xf1, 0x82, 0x21, 0x77, 0x11, 0x99, 0x88, 0x15, 0x17, 0x55, 0xca,
];

pub fn keys(region: crate::Region) -> &'static [u8; 14] {
    match region {
        crate::Region::Ntsc => &KEYS_NTSC,
        crate::Region::Pal => &KEYS_PAL,
    }
}
