//! The PIF's half of the CIC protocol: bit transport, checksum exchange, continuous compare,
//! challenge relay and the reset handshake.

use tracing::{debug, trace};

use super::layout::*;
use super::{Dir, PifEngine};
use crate::cipher;
use crate::ports::{pif_port, PifPorts};
use crate::sm5::{context, Pointer};
use crate::{Fault, Region, Violation};

impl PifEngine {
    pub(super) fn write_bit<P: PifPorts + ?Sized>(&mut self, io: &mut P, bit: bool) -> Result<(), Fault> {
        io.write(pif_port::CIC, bit as u8 | 0b10)?;
        io.write(pif_port::CIC, 1)
    }

    pub(super) fn read_bit<P: PifPorts + ?Sized>(&mut self, io: &mut P) -> Result<bool, Fault> {
        io.write(pif_port::CIC, 0b11)?;
        let bit = io.read(pif_port::CIC)? & 0b1000 != 0;
        io.write(pif_port::CIC, 1)?;
        Ok(bit)
    }

    /// Shift four bits from the CIC into `addr`, most significant first.
    pub(super) fn read_nibble<P: PifPorts + ?Sized>(&mut self, io: &mut P, addr: u8) -> Result<(), Fault> {
        let mut value = 0;
        for _ in 0..4 {
            value = value << 1 | self.read_bit(io)? as u8;
        }
        self.core.mem.write(addr, value);
        self.core.regs.c = false;
        Ok(())
    }

    pub(super) fn write_nibble<P: PifPorts + ?Sized>(&mut self, io: &mut P, addr: u8) -> Result<(), Fault> {
        let value = self.core.mem.read(addr);
        for bit in (0..4).rev() {
            self.write_bit(io, value & 1 << bit != 0)?;
        }
        Ok(())
    }

    /// Cold boot only: fetch and descramble the cartridge checksum, then seed both compare
    /// segments.
    pub(super) fn checksum_exchange<P: PifPorts + ?Sized>(&mut self, io: &mut P) -> Result<(), Fault> {
        self.core.mem.bit_set(OSINFO, OSINFO_RESET);
        self.sample_entropy(io)?;

        io.write(pif_port::CIC, 0b11)?;
        io.write(pif_port::CIC, 1)?;
        for addr in CIC_CHECKSUM_BUF..=CIC_CHECKSUM_BUF | 0xf {
            self.read_nibble(io, addr)?;
        }
        for _ in 0..4 {
            cipher::decode_round(self.core.mem.page_tail_mut(CIC_CHECKSUM_BUF));
        }

        self.load_keys();
        self.write_nibble(io, KEY_A + 1)?;
        self.write_nibble(io, KEY_B + 1)?;
        self.core.regs.sb = Pointer::new(context::A);
        Ok(())
    }

    /// Count until the entropy source fires. The count becomes the first key nibble of each
    /// compare segment.
    fn sample_entropy<P: PifPorts + ?Sized>(&mut self, io: &mut P) -> Result<(), Fault> {
        io.write(pif_port::ENTROPY, 1)?;
        loop {
            self.core.step_counter(ENTROPY + 1, 1);
            if io.read(pif_port::ENTROPY)? & 0b1000 != 0 {
                break;
            }
        }
        io.write(pif_port::ENTROPY, 0)?;

        let mem = &mut self.core.mem;
        mem.write(KEY_A + 1, mem.read(ENTROPY));
        mem.write(KEY_B + 1, mem.read(ENTROPY + 1));
        mem.write(ENTROPY, 0);
        mem.write(ENTROPY + 1, 0);
        Ok(())
    }

    fn load_keys(&mut self) {
        let keys = super::keys(self.region);
        let mem = &mut self.core.mem;
        for (i, byte) in keys.iter().enumerate() {
            mem.write(KEY_A + 2 + i as u8, byte & 0xf);
            mem.write(KEY_B + 2 + i as u8, byte >> 4);
        }
        mem.write(KEY_A, keys.len() as u8);
    }

    /// One round of continuous authentication.
    pub(super) fn compare<P: PifPorts + ?Sized>(&mut self, io: &mut P) -> Result<(), Fault> {
        self.write_bit(io, false)?;
        self.write_bit(io, false)?;

        let mem = &mut self.core.mem;
        for _ in 0..3 {
            cipher::compare_round(mem.page_mut(KEY_A));
        }
        for _ in 0..3 {
            cipher::compare_round(mem.page_mut(KEY_B));
        }

        // NTSC walks up to the end of the segment, PAL walks down to cell 1.
        let start = mem.read(KEY_B + 7).max(1);
        let mut index = start;
        loop {
            let ours = self.core.mem.bit_test(KEY_A + index, 0);
            self.write_bit(io, ours)?;
            let theirs = self.read_bit(io)?;
            self.core.regs.c = theirs;
            if theirs != self.core.mem.bit_test(KEY_B + index, 0) {
                return Err(Violation::CompareMismatch { index }.into());
            }
            index = match self.region {
                Region::Ntsc => index + 1,
                Region::Pal => index.wrapping_sub(1),
            } & 0xf;
            if index == 0 {
                trace!("PIF: compare round ok from {:x}", start);
                return Ok(());
            }
        }
    }

    /// Relay a CPU challenge to the CIC and put its answer back in the shared window.
    pub(super) fn challenge_exchange<P: PifPorts + ?Sized>(&mut self, io: &mut P) -> Result<(), Fault> {
        debug!("PIF: challenge");
        self.write_bit(io, true)?;
        self.write_bit(io, false)?;
        self.read_nibble(io, CHALLENGE_TIMEOUT)?;
        self.read_nibble(io, CHALLENGE_TIMEOUT + 1)?;
        self.challenge_pairs(io, CHALLENGE_SEND, Dir::Write)?;

        while !self.core.step_counter(CHALLENGE_TIMEOUT + 1, 1) {}
        self.core.regs.c = self.read_bit(io)?;
        self.challenge_pairs(io, CHALLENGE_RECV, Dir::Read)?;

        self.halt(io)?;
        self.core.regs.sb = Pointer::new(context::A);
        Ok(())
    }

    /// Move nibble pairs between the challenge window and the CIC. The pair count at `count` is
    /// consumed.
    fn challenge_pairs<P: PifPorts + ?Sized>(&mut self, io: &mut P, count: u8, dir: Dir) -> Result<(), Fault> {
        let mut ptr = Pointer::new(CHALLENGE_DATA);
        loop {
            let remaining = self.core.mem.read(count);
            if remaining == 0 {
                return Ok(());
            }
            self.core.mem.write(count, remaining - 1);

            for _ in 0..2 {
                match dir {
                    Dir::Write => self.write_nibble(io, ptr.addr())?,
                    Dir::Read => self.read_nibble(io, ptr.addr())?,
                }
                if ptr.inc_page() {
                    ptr.set_bm(0xf);
                }
            }
        }
    }

    /// First half of the reset handshake: tell the CIC and hold the clock.
    pub(super) fn begin_reset<P: PifPorts + ?Sized>(&mut self, io: &mut P) -> Result<(), Fault> {
        debug!("PIF: reset handshake");
        self.write_bit(io, true)?;
        self.write_bit(io, true)?;
        io.write(pif_port::CIC, 0b11)?;
        self.core.mem.zero_to_page_end(RESET_TIMER);
        Ok(())
    }
}
