//! The cartridge side of the security handshake.
//!
//! The CIC is clocked entirely by the PIF: every bit primitive waits on the clock pin, so a tick
//! only returns once the PIF has driven all the pulses for that step.

use tracing::{debug, trace, warn};

use super::CIC;
use crate::cipher;
use crate::pif;
use crate::ports::{cic_port, Ports};
use crate::sm5::{Core, Memory};
use crate::{Fault, Violation};

const SEGMENT_A: u8 = 0x00;
const SEGMENT_B: u8 = 0x10;
const SEED: u8 = 0x0a;
const CHALLENGE: u8 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    BootRegion,
    BootSeed,
    BootChecksum,
    BootKeys,
    Run,
    Dead(Violation),
}

/// Two bit command the PIF sends at the top of every loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Compare,
    Die,
    Challenge,
    Reset,
}

pub struct CicEngine {
    core: Core,
    cic: CIC,
    state: State,
}

impl CicEngine {
    pub fn new(cic: CIC) -> Self {
        CicEngine {
            core: Core::new(),
            cic,
            state: State::BootRegion,
        }
    }

    pub fn cic(&self) -> CIC {
        self.cic
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn memory(&self) -> &Memory {
        &self.core.mem
    }

    pub fn tick<P: Ports + ?Sized>(&mut self, io: &mut P) -> Result<State, Fault> {
        let next = match self.step(io) {
            Ok(next) => next,
            Err(Fault::Protocol(violation)) => {
                if !matches!(self.state, State::Dead(_)) {
                    warn!("CIC: {} during {:?}", violation, self.state);
                    self.state = State::Dead(violation);
                }
                return Err(violation.into());
            }
            Err(e) => return Err(e),
        };
        if next != self.state {
            debug!("CIC: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
        Ok(next)
    }

    fn step<P: Ports + ?Sized>(&mut self, io: &mut P) -> Result<State, Fault> {
        match self.state {
            State::BootRegion => {
                io.write(cic_port::LINE, 1)?;
                if io.read(cic_port::LINE)? & 0b0100 != 0 {
                    if !self.read_bit(io)? {
                        return Err(Violation::BadStrap.into());
                    }
                } else {
                    io.write(cic_port::LINE, 0)?;
                    self.read_bit(io)?;
                }
                self.write_bit(io, self.cic.region().is_pal())?;
                self.write_bit(io, false)?;
                self.write_bit(io, true)?;
                Ok(State::BootSeed)
            }
            State::BootSeed => {
                self.load_secret(SEED + 2, 0);
                let mem = &mut self.core.mem;
                mem.write(SEED, 0xb);
                mem.write(SEED + 1, 0x5);
                for _ in 0..2 {
                    cipher::encode_round(mem.page_tail_mut(SEED));
                }
                for addr in SEED..=SEED | 0xf {
                    self.write_nibble(io, addr)?;
                }
                Ok(State::BootChecksum)
            }
            State::BootChecksum => {
                self.load_secret(SEGMENT_A + 4, 2);
                self.count_entropy(io)?;
                for _ in 0..4 {
                    cipher::encode_round(self.core.mem.page_mut(SEGMENT_A));
                }
                self.write_bit(io, false)?;
                for addr in SEGMENT_A..=SEGMENT_A | 0xf {
                    self.write_nibble(io, addr)?;
                }
                Ok(State::BootKeys)
            }
            State::BootKeys => {
                let keys = pif::keys(self.cic.region());
                let mem = &mut self.core.mem;
                mem.write(SEGMENT_B + 1, 0xb);
                for (i, byte) in keys.iter().enumerate() {
                    mem.write(SEGMENT_A + 2 + i as u8, byte & 0xf);
                    mem.write(SEGMENT_B + 2 + i as u8, byte >> 4);
                }
                mem.write(SEGMENT_A, keys.len() as u8);
                self.read_nibble(io, SEGMENT_A + 1)?;
                self.read_nibble(io, SEGMENT_B + 1)?;
                Ok(State::Run)
            }
            State::Run => {
                let command = match (self.read_bit(io)?, self.read_bit(io)?) {
                    (false, false) => Command::Compare,
                    (false, true) => Command::Die,
                    (true, false) => Command::Challenge,
                    (true, true) => Command::Reset,
                };
                trace!("CIC: {:?}", command);
                match command {
                    Command::Compare => self.compare(io)?,
                    Command::Die => return Err(Violation::DieCommand.into()),
                    Command::Challenge => self.challenge(io)?,
                    Command::Reset => self.reset_count(io)?,
                }
                Ok(State::Run)
            }
            State::Dead(violation) => Err(violation.into()),
        }
    }

    /// Copy secret nibbles, starting at byte `from`, into `addr` up to the end of its page.
    fn load_secret(&mut self, addr: u8, from: usize) {
        let secret = self.cic.secret();
        let nibbles = common::util::to_nibbles(&secret[from..]);
        for (cell, nibble) in self.core.mem.page_tail_mut(addr).iter_mut().zip(nibbles) {
            *cell = nibble;
        }
    }

    /// Count while the clock stays high before the PIF asks for the checksum.
    fn count_entropy<P: Ports + ?Sized>(&mut self, io: &mut P) -> Result<(), Fault> {
        let mem = &mut self.core.mem;
        let (mut low, mut mid) = (0u8, 0u8);
        while io.read(cic_port::LINE)? & 0b0010 != 0 {
            low = (low + 1) & 0xf;
            if low == 0 {
                mid = (mid + 1) & 0xf;
                if mid == 0 {
                    mem.write(SEGMENT_A + 2, mem.read(SEGMENT_A + 2) + 1);
                }
            }
        }
        mem.write(SEGMENT_A, low + mem.read(SEGMENT_A + 2));
        mem.write(SEGMENT_A + 1, mid);
        Ok(())
    }

    fn compare<P: Ports + ?Sized>(&mut self, io: &mut P) -> Result<(), Fault> {
        let mem = &mut self.core.mem;
        for _ in 0..3 {
            cipher::compare_round(mem.page_mut(SEGMENT_A));
        }
        for _ in 0..3 {
            cipher::compare_round(mem.page_mut(SEGMENT_B));
        }

        let pal = self.cic.region().is_pal();
        let mut index = mem.read(SEGMENT_B + 7).max(1);
        loop {
            let theirs = self.read_bit(io)?;
            let ours = self.core.mem.bit_test(SEGMENT_B + index, 0);
            self.write_bit(io, ours)?;
            if theirs != self.core.mem.bit_test(SEGMENT_A + index, 0) {
                return Err(Violation::CompareMismatch { index }.into());
            }
            index = if pal { index.wrapping_sub(1) } else { index + 1 } & 0xf;
            if index == 0 {
                return Ok(());
            }
        }
    }

    fn challenge<P: Ports + ?Sized>(&mut self, io: &mut P) -> Result<(), Fault> {
        self.core.mem.write(CHALLENGE, 0xa);
        self.write_nibble(io, CHALLENGE)?;
        self.write_nibble(io, CHALLENGE)?;

        let mut buf = [0u8; 32];
        for (i, cell) in buf.iter_mut().enumerate() {
            let addr = CHALLENGE + i as u8;
            self.read_nibble(io, addr)?;
            *cell = self.core.mem.read(addr);
        }
        if self.cic.has_challenge() {
            cipher::challenge(&mut buf, 5);
        } else {
            cipher::complement(&mut buf);
        }
        for (i, &cell) in buf.iter().enumerate() {
            self.core.mem.write(CHALLENGE + i as u8, cell);
        }

        self.write_bit(io, false)?;
        for i in 0..buf.len() as u8 {
            self.write_nibble(io, CHALLENGE + i)?;
        }
        Ok(())
    }

    /// Sit out the PIF's reset pulse, then answer with a zero bit.
    fn reset_count<P: Ports + ?Sized>(&mut self, io: &mut P) -> Result<(), Fault> {
        let mem = &mut self.core.mem;
        mem.write(SEGMENT_A, 0);
        mem.write(SEGMENT_B, 0);
        let mut a = 0u8;
        loop {
            a = (a + 1) & 0xf;
            if a != 0 {
                continue;
            }
            mem.write(SEGMENT_A, mem.read(SEGMENT_A) + 1);
            if mem.read(SEGMENT_A) != 0 {
                continue;
            }
            mem.write(SEGMENT_B, mem.read(SEGMENT_B) + 1);
            if mem.read(SEGMENT_B) == 0 {
                break;
            }
        }
        mem.write(SEGMENT_B, mem.read(SEGMENT_B).wrapping_sub(1));
        self.write_bit(io, false)
    }

    fn wait_clock<P: Ports + ?Sized>(&mut self, io: &mut P, high: bool) -> Result<(), Fault> {
        while (io.read(cic_port::LINE)? & 0b0010 != 0) != high {}
        Ok(())
    }

    fn write_bit<P: Ports + ?Sized>(&mut self, io: &mut P, bit: bool) -> Result<(), Fault> {
        self.wait_clock(io, false)?;
        io.write(cic_port::LINE, bit as u8)?;
        self.wait_clock(io, true)?;
        io.write(cic_port::LINE, 1)
    }

    fn read_bit<P: Ports + ?Sized>(&mut self, io: &mut P) -> Result<bool, Fault> {
        io.write(cic_port::STROBE, 0)?;
        self.wait_clock(io, false)?;
        let bit = io.read(cic_port::LINE)? & 0b0001 != 0;
        io.write(cic_port::STROBE, 1)?;
        self.wait_clock(io, true)?;
        Ok(bit)
    }

    fn read_nibble<P: Ports + ?Sized>(&mut self, io: &mut P, addr: u8) -> Result<(), Fault> {
        let mut value = 0;
        for _ in 0..4 {
            value = value << 1 | self.read_bit(io)? as u8;
        }
        self.core.mem.write(addr, value);
        Ok(())
    }

    fn write_nibble<P: Ports + ?Sized>(&mut self, io: &mut P, addr: u8) -> Result<(), Fault> {
        let value = self.core.mem.read(addr);
        for bit in (0..4).rev() {
            self.write_bit(io, value & 1 << bit != 0)?;
        }
        Ok(())
    }
}

impl common::Engine for CicEngine {
    type Io = Box<dyn Ports + Send>;
    type Error = Fault;

    fn name(&self) -> &'static str {
        "cic"
    }

    fn tick(&mut self, io: &mut Self::Io) -> Result<(), Fault> {
        CicEngine::tick(self, io.as_mut()).map(|_| ())
    }
}
