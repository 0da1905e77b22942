//! Port boundary between the chip models and whatever drives their pins.
//!
//! Reads hand back the low nibble of whatever the outside world presents. Errors never come from
//! the chips themselves, only from the driver: a script that ran dry, a dead link, or a stop
//! request.

use crate::sm5::Memory;
use crate::Fault;

pub trait Ports {
    fn read(&mut self, port: u8) -> Result<u8, Fault>;
    fn write(&mut self, port: u8, value: u8) -> Result<(), Fault>;
}

/// Interrupt request lines, sampled at every poll point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interrupts {
    /// Peripheral transfer requested by the RCP.
    pub a: bool,
    /// Reset button.
    pub b: bool,
}

/// Extra signals only the PIF sees.
pub trait PifPorts: Ports {
    /// The CPU command byte at the top of PIF RAM.
    fn read_command(&mut self) -> Result<u8, Fault>;

    /// Wait for the bus to finish a transfer. The bus may move bytes in or out of the shared window
    /// (0x80..=0xff) while the PIF is stopped.
    fn halt(&mut self, _mem: &mut Memory) -> Result<(), Fault> {
        Ok(())
    }

    fn interrupt_requests(&mut self) -> Result<Interrupts, Fault> {
        Ok(Interrupts::default())
    }
}

impl<T: Ports + ?Sized> Ports for &mut T {
    fn read(&mut self, port: u8) -> Result<u8, Fault> {
        (**self).read(port)
    }

    fn write(&mut self, port: u8, value: u8) -> Result<(), Fault> {
        (**self).write(port, value)
    }
}

impl<T: PifPorts + ?Sized> PifPorts for &mut T {
    fn read_command(&mut self) -> Result<u8, Fault> {
        (**self).read_command()
    }

    fn halt(&mut self, mem: &mut Memory) -> Result<(), Fault> {
        (**self).halt(mem)
    }

    fn interrupt_requests(&mut self) -> Result<Interrupts, Fault> {
        (**self).interrupt_requests()
    }
}

pub mod pif_port {
    pub const JOY_TX: u8 = 0x0;
    pub const JOY_RX: u8 = 0x1;
    /// 1 idle, 2 start receive, 3 reset pulse, 0 abort.
    pub const JOY_CTRL: u8 = 0x2;
    /// Bit 2 device present, bit 3 ready.
    pub const JOY_STATUS: u8 = 0x3;
    /// Bit 3 set when nothing answered.
    pub const JOY_ERROR: u8 = 0x4;
    /// Write: bit 0 data, bit 1 clock. Read: bit 3 sampled data.
    pub const CIC: u8 = 0x5;
    pub const ROM_LOCKOUT: u8 = 0x6;
    /// Bit 3 set for reads, bit 2 set for 64 byte transfers.
    pub const TRANSFER: u8 = 0x7;
    pub const RESET: u8 = 0x8;
    pub const ENTROPY: u8 = 0x9;
    pub const JOY_CHANNEL: u8 = 0xa;
    pub const INT_ENABLE: u8 = 0xe;
}

pub mod cic_port {
    /// Read: bit 0 data, bit 1 clock high, bit 2 variant strap. Write: bit 0 data drive.
    pub const LINE: u8 = 0x2;
    /// Written low while sampling the line.
    pub const STROBE: u8 = 0xf;
}
