//! PIF boot sequencer and security loop.
//!
//! Each call to [`PifEngine::tick`] runs one iteration of whatever the PIF is polling for. Bit
//! exchanges with the CIC and cipher rounds run to completion inside a tick; interrupts are only
//! taken at the top of a polling tick.

use tracing::{debug, warn};

use super::layout::*;
use super::{Dir, PifCommand, Size};
use crate::cipher;
use crate::ports::{pif_port, PifPorts};
use crate::sm5::{context, Core, Memory, Pointer, Registers};
use crate::{Fault, Region, Violation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStep {
    /// Clock held, waiting for the CIC to pull data low.
    AwaitCic,
    /// Waiting for the reset line to be released before the NMI pulse.
    AwaitNmi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ColdBoot,
    AwaitLockout,
    AwaitChecksum,
    AwaitAck,
    BootTimerGate,
    /// Booted. A pending challenge is a STATUS bit picked up here, not a phase of its own.
    Running,
    Resetting(ResetStep),
    Error(Violation),
}

pub struct PifEngine {
    pub(super) core: Core,
    pub(super) region: Region,
    phase: Phase,
}

impl PifEngine {
    pub fn new(region: Region) -> Self {
        PifEngine {
            core: Core::new(),
            region,
            phase: Phase::ColdBoot,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn memory(&self) -> &Memory {
        &self.core.mem
    }

    /// Direct access to PIF RAM, standing in for CPU accesses to the shared window.
    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.core.mem
    }

    pub fn registers(&self) -> &Registers {
        &self.core.regs
    }

    pub fn raise_interrupt_a(&mut self) {
        self.core.regs.ifa = true;
    }

    pub fn raise_interrupt_b(&mut self) {
        self.core.regs.ifb = true;
    }

    /// The last command byte latched from the CPU.
    pub fn command(&self) -> PifCommand {
        let mem = &self.core.mem;
        PifCommand::from_bytes([mem.read(CMD_HIGH) << 4 | mem.read(CMD_LOW)])
    }

    pub fn is_running(&self) -> bool {
        self.core.mem.bit_test(STATUS, STATUS_RUNNING)
    }

    pub fn tick<P: PifPorts + ?Sized>(&mut self, io: &mut P) -> Result<Phase, Fault> {
        match self.step(io) {
            Ok(next) => {
                if next != self.phase {
                    debug!("PIF: {:?} -> {:?}", self.phase, next);
                    self.phase = next;
                }
                Ok(next)
            }
            Err(Fault::Protocol(violation)) if !matches!(self.phase, Phase::Error(_)) => {
                warn!("PIF: {} during {:?}", violation, self.phase);
                self.phase = Phase::Error(violation);
                self.core.regs.ime = false;
                self.strobe_reset(io)?;
                Err(violation.into())
            }
            Err(e) => Err(e),
        }
    }

    fn step<P: PifPorts + ?Sized>(&mut self, io: &mut P) -> Result<Phase, Fault> {
        match self.phase {
            Phase::ColdBoot => {
                self.cold_boot(io)?;
                self.enter_boot();
                Ok(Phase::AwaitLockout)
            }
            Phase::AwaitLockout => {
                self.poll_interrupts(io)?;
                if !self.read_command(io)?.lockout() {
                    return Ok(Phase::AwaitLockout);
                }
                self.core.regs.ime = false;
                io.write(pif_port::ROM_LOCKOUT, 1)?;
                io.write(pif_port::JOY_CTRL, 1)?;
                self.skip_all_channels();
                self.core.regs.ime = true;
                Ok(Phase::AwaitChecksum)
            }
            Phase::AwaitChecksum => {
                self.poll_interrupts(io)?;
                if !self.read_command(io)?.get_checksum() {
                    return Ok(Phase::AwaitChecksum);
                }
                self.core.regs.ime = false;
                self.swap_exposed();
                self.core.mem.bit_set(CMD_HIGH, 3);
                self.core.regs.ime = true;
                Ok(Phase::AwaitAck)
            }
            Phase::AwaitAck => {
                self.poll_interrupts(io)?;
                if !self.read_command(io)?.check_checksum() {
                    return Ok(Phase::AwaitAck);
                }
                self.core.regs.ime = false;
                self.core.mem.write(CMD_HIGH, 0);
                if !self.core.regs.c {
                    self.checksum_exchange(io)?;
                }
                self.verify_checksum()?;

                let mem = &mut self.core.mem;
                mem.write(BOOT_TIMER, 0xf);
                mem.write(BOOT_TIMER + 1, 0xb);
                mem.zero_to_page_end(BOOT_TIMER + 2);
                self.core.regs.ime = true;
                Ok(Phase::BootTimerGate)
            }
            Phase::BootTimerGate => {
                self.poll_interrupts(io)?;
                if self.read_command(io)?.terminate() {
                    self.core.regs.ime = false;
                    self.core.mem.zero_to_page_end(CMD_HIGH);
                    self.set_int_enable(io, 0b0101)?;
                    self.core.mem.bit_set(STATUS, STATUS_RUNNING);
                    self.core.regs.ifb = false;
                    self.core.regs.ime = true;
                    return Ok(Phase::Running);
                }
                if self.core.step_counter(BOOT_TIMER + 5, 3) {
                    return Err(Violation::BootTimeout.into());
                }
                Ok(Phase::BootTimerGate)
            }
            Phase::Running => {
                self.poll_interrupts(io)?;
                if !self.is_running() {
                    self.begin_reset(io)?;
                    return Ok(Phase::Resetting(ResetStep::AwaitCic));
                }
                if self.core.mem.bit_test(STATUS, STATUS_CHALLENGE) {
                    self.core.mem.bit_reset(STATUS, STATUS_CHALLENGE);
                    self.challenge_exchange(io)?;
                    self.core.regs.ime = true;
                } else {
                    self.compare(io)?;
                }
                Ok(Phase::Running)
            }
            Phase::Resetting(ResetStep::AwaitCic) => {
                self.poll_interrupts(io)?;
                self.core.mem.bit_set(CMD_HIGH, 3);
                if io.read(pif_port::CIC)? & 0b1000 == 0 {
                    io.write(pif_port::CIC, 1)?;
                    return Ok(Phase::Resetting(ResetStep::AwaitNmi));
                }
                if self.core.step_counter(RESET_TIMER + 3, 2) {
                    return Err(Violation::ResetTimeout.into());
                }
                Ok(Phase::Resetting(ResetStep::AwaitCic))
            }
            Phase::Resetting(ResetStep::AwaitNmi) => {
                self.poll_interrupts(io)?;
                if io.read(pif_port::RESET)? & 0b1000 == 0 {
                    return Ok(Phase::Resetting(ResetStep::AwaitNmi));
                }
                self.core.regs.ime = false;
                io.write(pif_port::ROM_LOCKOUT, 0)?;
                io.write(pif_port::RESET, 9)?;
                io.write(pif_port::RESET, 8)?;
                self.core.regs.c = true;
                self.enter_boot();
                Ok(Phase::AwaitLockout)
            }
            Phase::Error(violation) => {
                self.strobe_reset(io)?;
                Err(violation.into())
            }
        }
    }

    fn cold_boot<P: PifPorts + ?Sized>(&mut self, io: &mut P) -> Result<(), Fault> {
        io.write(pif_port::CIC, 1)?;
        self.set_int_enable(io, 0b0001)?;
        self.core.regs.sb = Pointer::new(context::A);
        self.core.mem.zero_to_page_end(PIF_CHECKSUM);

        self.read_nibble(io, STATUS)?;
        let code = self.core.mem.read(STATUS);
        let chip = if code & 0b0100 != 0 { Region::Pal } else { Region::Ntsc };
        if chip != self.region {
            return Err(Violation::RegionMismatch { console: self.region, chip }.into());
        }
        let os_info = match code & !0b0100 {
            1 => 1 << OSINFO_VERSION,
            9 => 1 << OSINFO_VERSION | 1 << OSINFO_64DD,
            _ => return Err(Violation::BadVersion(code).into()),
        };
        self.core.mem.write(STATUS, os_info);

        for page in (SHARED..=0xf0).step_by(0x10) {
            self.core.mem.zero_to_page_end(page);
        }
        for addr in SEED_BUF..=SEED_BUF | 0xf {
            self.read_nibble(io, addr)?;
        }
        for _ in 0..2 {
            cipher::decode_round(self.core.mem.page_tail_mut(SEED_BUF));
        }

        let mem = &mut self.core.mem;
        let os_info = mem.read(STATUS);
        mem.bit_reset(STATUS, STATUS_CHALLENGE);
        mem.bit_reset(STATUS, STATUS_RUNNING);
        mem.write(OSINFO, os_info);
        debug!(
            "PIF: CIC version {:x}, seed {:x}{:x}",
            code,
            mem.read(SEED_BUF + 2) << 4 | mem.read(SEED_BUF + 3),
            mem.read(SEED_BUF + 4) << 4 | mem.read(SEED_BUF + 5)
        );
        self.core.regs.c = false;
        Ok(())
    }

    /// Start (or restart after reset) the CPU side of the boot handshake.
    fn enter_boot(&mut self) {
        self.core.regs.ime = false;
        self.swap_exposed();
        self.core.mem.zero_to_page_end(CMD_HIGH);
        self.core.regs.ime = true;
    }

    /// Exchange OSINFO, the seed and the CPU checksum slot with the shared window.
    fn swap_exposed(&mut self) {
        for addr in (OSINFO..=OSINFO | 0xf).chain(PIF_CHECKSUM..=PIF_CHECKSUM | 0xf) {
            self.core.mem.swap_cells(addr, addr + EXPOSE);
        }
    }

    fn verify_checksum(&mut self) -> Result<(), Fault> {
        let mem = &mut self.core.mem;
        for index in 0..12 {
            let cpu = mem.read(PIF_CHECKSUM + index);
            mem.write(PIF_CHECKSUM + index, 0);
            if cpu != mem.read(CIC_CHECKSUM + index) {
                return Err(Violation::ChecksumMismatch { index: index as usize }.into());
            }
        }
        Ok(())
    }

    pub(super) fn read_command<P: PifPorts + ?Sized>(&mut self, io: &mut P) -> Result<PifCommand, Fault> {
        let value = io.read_command()?;
        self.core.mem.write(CMD_HIGH, value >> 4);
        self.core.mem.write(CMD_LOW, value);
        Ok(self.command())
    }

    pub(super) fn set_int_enable<P: PifPorts + ?Sized>(&mut self, io: &mut P, value: u8) -> Result<(), Fault> {
        self.core.regs.re = value;
        io.write(pif_port::INT_ENABLE, value)
    }

    fn strobe_reset<P: PifPorts + ?Sized>(&mut self, io: &mut P) -> Result<(), Fault> {
        io.write(pif_port::RESET, self.core.regs.a)?;
        self.core.regs.a = !self.core.regs.a & 0xf;
        Ok(())
    }

    /// Stop for a bus transfer, masking the reset button while stopped.
    pub(super) fn halt<P: PifPorts + ?Sized>(&mut self, io: &mut P) -> Result<(), Fault> {
        self.set_int_enable(io, 0b0001)?;
        io.halt(&mut self.core.mem)?;
        if self.is_running() {
            self.set_int_enable(io, 0b0101)?;
        }
        Ok(())
    }

    fn poll_interrupts<P: PifPorts + ?Sized>(&mut self, io: &mut P) -> Result<(), Fault> {
        let requests = io.interrupt_requests()?;
        let regs = &mut self.core.regs;
        regs.ifa |= requests.a;
        regs.ifb |= requests.b;

        if regs.ime && regs.ifa && regs.re & 0b0001 != 0 {
            regs.ifa = false;
            regs.ime = false;
            self.interrupt_a(io)?;
        }
        let regs = &mut self.core.regs;
        if regs.ime && regs.ifb && regs.re & 0b0100 != 0 {
            regs.ifb = false;
            regs.ime = false;
            self.interrupt_b(io)?;
        }
        Ok(())
    }

    fn interrupt_a<P: PifPorts + ?Sized>(&mut self, io: &mut P) -> Result<(), Fault> {
        self.core.enter_interrupt();
        let dir = match io.read(pif_port::TRANSFER)? & 0b1000 {
            0 => Dir::Write,
            _ => Dir::Read,
        };

        match dir {
            Dir::Write => {
                debug!("PIF: interrupt A, write");
                self.halt(io)?;
                if self.read_command(io)?.joybus() {
                    self.core.mem.bit_reset(CMD_LOW, 0);
                    self.core.save_context();
                    self.parse_frames();
                    self.core.restore_context();
                }
            }
            Dir::Read => {
                let size = match io.read(pif_port::TRANSFER)? & 0b0100 {
                    0 => Size::Size4,
                    _ => Size::Size64,
                };
                debug!("PIF: interrupt A, read {:?}", size);
                match size {
                    Size::Size4 => self.halt(io)?,
                    Size::Size64 => {
                        if !self.read_command(io)?.challenge() {
                            self.transfer(io)?;
                        } else if self.is_running() {
                            // Picked up by the main loop, which halts once the response is ready.
                            self.core.mem.bit_reset(CMD_LOW, 1);
                            self.core.mem.bit_set(STATUS, STATUS_CHALLENGE);
                            self.core.leave_interrupt();
                            self.core.regs.ime = false;
                            return Ok(());
                        } else {
                            self.halt(io)?;
                        }
                    }
                }
            }
        }
        self.core.leave_interrupt();
        Ok(())
    }

    fn interrupt_b<P: PifPorts + ?Sized>(&mut self, io: &mut P) -> Result<(), Fault> {
        debug!("PIF: interrupt B, reset requested");
        self.core.enter_interrupt();
        self.core.mem.bit_reset(STATUS, STATUS_RUNNING);
        self.set_int_enable(io, 0b0001)?;
        io.write(pif_port::RESET, 2)?;
        self.core.leave_interrupt();
        Ok(())
    }
}

impl common::Engine for PifEngine {
    type Io = Box<dyn PifPorts + Send>;
    type Error = Fault;

    fn name(&self) -> &'static str {
        "pif"
    }

    fn tick(&mut self, io: &mut Self::Io) -> Result<(), Fault> {
        PifEngine::tick(self, io.as_mut()).map(|_| ())
    }
}
