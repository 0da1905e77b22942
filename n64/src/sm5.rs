//! Memory and register model of the SM5 4-bit microcontroller.
//!
//! Both the PIF and the CIC are SM5 parts. Each engine owns one [`Core`]; nothing here is shared
//! between the two chips.

use core::fmt;

/// 256 nibble cells, grouped into 16 pages of 16.
#[derive(Clone, PartialEq, Eq)]
pub struct Memory {
    pages: [[u8; 16]; 16],
}

impl Memory {
    pub fn new() -> Self {
        Memory { pages: [[0; 16]; 16] }
    }

    #[inline(always)]
    pub fn read(&self, addr: u8) -> u8 {
        self.pages[(addr >> 4) as usize][(addr & 0xf) as usize]
    }

    #[inline(always)]
    pub fn write(&mut self, addr: u8, value: u8) {
        self.pages[(addr >> 4) as usize][(addr & 0xf) as usize] = value & 0xf;
    }

    pub fn bit_test(&self, addr: u8, bit: u8) -> bool {
        self.read(addr) & (1 << bit) != 0
    }

    pub fn bit_set(&mut self, addr: u8, bit: u8) {
        self.write(addr, self.read(addr) | 1 << bit);
    }

    pub fn bit_reset(&mut self, addr: u8, bit: u8) {
        self.write(addr, self.read(addr) & !(1 << bit));
    }

    pub fn swap_cells(&mut self, a: u8, b: u8) {
        let tmp = self.read(a);
        self.write(a, self.read(b));
        self.write(b, tmp);
    }

    pub fn page_mut(&mut self, addr: u8) -> &mut [u8; 16] {
        &mut self.pages[(addr >> 4) as usize]
    }

    /// Cells from `addr` up to the end of its page.
    pub fn page_tail_mut(&mut self, addr: u8) -> &mut [u8] {
        &mut self.pages[(addr >> 4) as usize][(addr & 0xf) as usize..]
    }

    pub fn zero_to_page_end(&mut self, addr: u8) {
        self.page_tail_mut(addr).fill(0);
    }

    /// Store bytes as nibble pairs (high nibble first) starting at `addr`.
    pub fn load_bytes(&mut self, addr: u8, bytes: &[u8]) {
        let mut ptr = addr;
        for &byte in bytes {
            self.write(ptr, byte >> 4);
            self.write(ptr.wrapping_add(1), byte);
            ptr = ptr.wrapping_add(2);
        }
    }

    /// Read `len` bytes stored as nibble pairs starting at `addr`.
    pub fn bytes(&self, addr: u8, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| {
                let ptr = addr.wrapping_add((i * 2) as u8);
                self.read(ptr) << 4 | self.read(ptr.wrapping_add(1))
            })
            .collect()
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, page) in self.pages.iter().enumerate() {
            write!(f, "{:02x}:", i << 4)?;
            for cell in page {
                write!(f, " {:x}", cell)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Eight bit RAM address, split into page (BM) and cell (BL) nibbles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pointer(u8);

impl Pointer {
    pub const fn new(addr: u8) -> Self {
        Pointer(addr)
    }

    pub fn addr(self) -> u8 {
        self.0
    }

    pub fn bm(self) -> u8 {
        self.0 >> 4
    }

    pub fn bl(self) -> u8 {
        self.0 & 0xf
    }

    pub fn set_bm(&mut self, bm: u8) {
        self.0 = (bm & 0xf) << 4 | self.bl();
    }

    pub fn set_bl(&mut self, bl: u8) {
        self.0 = self.0 & 0xf0 | bl & 0xf;
    }

    /// Step BL forward inside the page. Returns true if BL wrapped to 0.
    pub fn inc_page(&mut self) -> bool {
        self.set_bl(self.bl() + 1);
        self.bl() == 0
    }

    /// Step BL backward inside the page. Returns true if BL wrapped to 0xf.
    pub fn dec_page(&mut self) -> bool {
        let wrapped = self.bl() == 0;
        self.set_bl(self.bl().wrapping_sub(1));
        wrapped
    }

    /// Step across the whole address space. Returns true on wrap to 0x00.
    pub fn inc(&mut self) -> bool {
        self.0 = self.0.wrapping_add(1);
        self.0 == 0
    }

    /// Step inside the shared window, wrapping back to 0x80.
    pub fn inc_shared(&mut self) {
        if self.inc() {
            self.0 = 0x80;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registers {
    pub a: u8,
    pub x: u8,
    /// Active address pointer.
    pub b: Pointer,
    /// Saved address pointer, exchanged with `b` by [`Registers::swap_pointers`].
    pub sb: Pointer,
    pub c: bool,
    pub ime: bool,
    pub ifa: bool,
    pub ifb: bool,
    /// Interrupt enable: bit 0 source A, bit 2 source B.
    pub re: u8,
}

impl Registers {
    pub fn swap_pointers(&mut self) {
        std::mem::swap(&mut self.b, &mut self.sb);
    }
}

/// RAM slots the interrupt context is saved into.
pub mod context {
    pub const A: u8 = 0x56;
    pub const BM: u8 = 0x57;
    pub const BL: u8 = 0x47;
    pub const X: u8 = 0x58;
    pub const C: u8 = 0x59;
}

#[derive(Debug, Clone, Default)]
pub struct Core {
    pub mem: Memory,
    pub regs: Registers,
}

impl Core {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exchange the accumulator with a RAM cell.
    pub fn swap_a(&mut self, addr: u8) {
        let cell = self.mem.read(addr);
        self.mem.write(addr, self.regs.a);
        self.regs.a = cell;
    }

    /// Increment the nibble pair ending at B, carrying into the cell below.
    ///
    /// Returns true when both nibbles overflowed; B is then left on the next pair down so that
    /// calls chain into a wider counter.
    pub fn increment8(&mut self) -> bool {
        let regs = &mut self.regs;
        let low = (self.mem.read(regs.b.addr()) + 1) & 0xf;
        self.mem.write(regs.b.addr(), low);
        if low != 0 {
            return false;
        }
        regs.b.dec_page();

        let high = (self.mem.read(regs.b.addr()) + 1) & 0xf;
        self.mem.write(regs.b.addr(), high);
        if high != 0 {
            regs.b.inc_page();
            return false;
        }
        regs.b.dec_page();
        true
    }

    /// Advance a chain of `stages` nibble pairs whose lowest nibble sits at `low`.
    /// Returns true when the whole chain overflowed.
    pub fn step_counter(&mut self, low: u8, stages: usize) -> bool {
        self.regs.b = Pointer::new(low);
        for _ in 0..stages {
            if !self.increment8() {
                return false;
            }
        }
        true
    }

    /// Interrupt entry: SB becomes the working pointer and A is parked in RAM.
    pub fn enter_interrupt(&mut self) {
        self.regs.swap_pointers();
        self.swap_a(context::A);
        self.regs.b = Pointer::new(context::BM);
    }

    /// Interrupt return: undo [`Core::enter_interrupt`] and re-enable interrupts.
    pub fn leave_interrupt(&mut self) {
        self.regs.b = Pointer::new(context::A);
        self.swap_a(context::A);
        self.regs.swap_pointers();
        self.regs.ime = true;
    }

    /// Spill the interrupted pointer, X and C so the handler may use all registers.
    pub fn save_context(&mut self) {
        let saved = self.regs.sb;
        self.mem.write(context::BM, saved.bm());
        self.mem.write(context::BL, saved.bl());
        self.mem.write(context::X, self.regs.x);
        let c = self.mem.read(context::C) & !1 | self.regs.c as u8;
        self.mem.write(context::C, c);
        self.regs.c = false;
    }

    pub fn restore_context(&mut self) {
        self.regs.c = self.mem.bit_test(context::C, 0);
        self.regs.x = self.mem.read(context::X);
        self.regs.sb = Pointer::new(self.mem.read(context::BM) << 4 | self.mem.read(context::BL));
        self.regs.b = Pointer::new(context::BM);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_are_masked_and_start_zeroed() {
        let mut mem = Memory::new();
        assert_eq!(mem.read(0x42), 0);
        mem.write(0x42, 0x1b);
        assert_eq!(mem.read(0x42), 0xb);
        mem.bit_reset(0x42, 3);
        assert_eq!(mem.read(0x42), 0x3);
        mem.bit_set(0x42, 2);
        assert!(mem.bit_test(0x42, 2));
    }

    #[test]
    fn zero_stops_at_page_end() {
        let mut mem = Memory::new();
        mem.page_mut(0x30).fill(7);
        mem.page_mut(0x40).fill(7);
        mem.zero_to_page_end(0x34);
        assert_eq!(mem.read(0x33), 7);
        assert_eq!(mem.read(0x3f), 0);
        assert_eq!(mem.read(0x40), 7);
    }

    #[test]
    fn bytes_round_trip_through_nibbles() {
        let mut mem = Memory::new();
        mem.load_bytes(0xfc, &[0x12, 0x34, 0x56]);
        assert_eq!(mem.read(0xfc), 1);
        assert_eq!(mem.read(0xff), 4);
        assert_eq!(mem.read(0x00), 5);
        assert_eq!(mem.bytes(0xfc, 3), vec![0x12, 0x34, 0x56]);
    }

    #[test]
    fn pointer_wrapping() {
        let mut p = Pointer::new(0x4f);
        assert!(p.inc_page());
        assert_eq!(p.addr(), 0x40);
        assert!(p.dec_page());
        assert_eq!(p.addr(), 0x4f);

        let mut p = Pointer::new(0xff);
        p.inc_shared();
        assert_eq!(p.addr(), 0x80);
        assert!(!p.inc());
        assert_eq!(p.addr(), 0x81);
    }

    #[test]
    fn counter_chain_overflows_once_every_stage_wraps() {
        let mut core = Core::new();
        core.mem.write(0x0e, 0xf);
        core.mem.write(0x0f, 0xe);
        assert!(!core.step_counter(0x0f, 2));
        assert_eq!(core.mem.read(0x0f), 0xf);

        core.mem.write(0x0c, 0xf);
        core.mem.write(0x0d, 0xf);
        assert!(core.step_counter(0x0f, 2));
        assert_eq!([0x0c, 0x0d, 0x0e, 0x0f].map(|a| core.mem.read(a)), [0; 4]);
    }

    #[test]
    fn interrupt_context_round_trip() {
        let mut core = Core::new();
        core.regs.a = 0x9;
        core.regs.x = 0x3;
        core.regs.c = true;
        core.regs.b = Pointer::new(0x2c);
        core.regs.sb = Pointer::new(0x56);

        core.enter_interrupt();
        assert_eq!(core.mem.read(context::A), 0x9);
        core.save_context();
        assert!(!core.regs.c);

        core.regs.a = 0;
        core.regs.x = 0;
        core.regs.sb = Pointer::new(0x10);
        core.restore_context();
        core.leave_interrupt();

        assert_eq!(core.regs.a, 0x9);
        assert_eq!(core.regs.x, 0x3);
        assert!(core.regs.c);
        assert_eq!(core.regs.b, Pointer::new(0x2c));
        assert_eq!(core.regs.sb, Pointer::new(0x56));
        assert!(core.regs.ime);
    }
}
