//! The serial line between PIF and CIC.
//!
//! The PIF owns the clock. Every pulse it drives a data bit and, on the same pulse, samples
//! whatever the CIC drives; the wire is open drain so both see the AND of the two. Here a pulse
//! is a message from the PIF thread to the CIC thread and the CIC's driven bit is the reply.

use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::time::Duration;

use tracing::trace;

use crate::ports::{cic_port, pif_port, Interrupts, PifPorts, Ports};
use crate::sm5::Memory;
use crate::Fault;

/// How long either side waits for the other before calling the link dead.
pub const LINK_TIMEOUT: Duration = Duration::from_secs(5);

/// The PIF end of the line.
pub trait ClockMaster {
    /// Clock one bit out with `data` driven, returning the bit the CIC drove.
    fn pulse(&mut self, data: bool) -> Result<bool, Fault>;
}

/// The CIC end of the line.
pub trait ClockSlave {
    /// Block until the PIF pulls the clock low. Returns the PIF's data bit.
    fn await_pulse(&mut self) -> Result<bool, Fault>;

    /// Hand back the bit the CIC drove for the current pulse.
    fn answer(&mut self, data: bool) -> Result<(), Fault>;
}

pub struct MasterEnd {
    pulse: SyncSender<bool>,
    answer: Receiver<bool>,
    timeout: Duration,
}

pub struct SlaveEnd {
    pulse: Receiver<bool>,
    answer: SyncSender<bool>,
    timeout: Duration,
}

/// Build both ends of a line. Each direction holds at most one bit in flight.
pub fn duplex(timeout: Duration) -> (MasterEnd, SlaveEnd) {
    let (pulse_tx, pulse_rx) = sync_channel(1);
    let (answer_tx, answer_rx) = sync_channel(1);
    (
        MasterEnd {
            pulse: pulse_tx,
            answer: answer_rx,
            timeout,
        },
        SlaveEnd {
            pulse: pulse_rx,
            answer: answer_tx,
            timeout,
        },
    )
}

fn receive(rx: &Receiver<bool>, timeout: Duration) -> Result<bool, Fault> {
    rx.recv_timeout(timeout).map_err(|e| {
        if let RecvTimeoutError::Timeout = e {
            trace!("link: no reply within {:?}", timeout);
        }
        Fault::LinkClosed
    })
}

impl ClockMaster for MasterEnd {
    fn pulse(&mut self, data: bool) -> Result<bool, Fault> {
        self.pulse.send(data).map_err(|_| Fault::LinkClosed)?;
        receive(&self.answer, self.timeout)
    }
}

impl ClockSlave for SlaveEnd {
    fn await_pulse(&mut self) -> Result<bool, Fault> {
        receive(&self.pulse, self.timeout)
    }

    fn answer(&mut self, data: bool) -> Result<(), Fault> {
        self.answer.send(data).map_err(|_| Fault::LinkClosed)
    }
}

/// PIF ports with the CIC line routed over a [`ClockMaster`]. Everything else goes to `inner`.
pub struct PifSide<P, M> {
    inner: P,
    master: M,
    line: bool,
}

impl<P: PifPorts, M: ClockMaster> PifSide<P, M> {
    pub fn new(inner: P, master: M) -> Self {
        PifSide {
            inner,
            master,
            line: true,
        }
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P: PifPorts, M: ClockMaster> Ports for PifSide<P, M> {
    fn read(&mut self, port: u8) -> Result<u8, Fault> {
        match port {
            pif_port::CIC => Ok(if self.line { 0b1000 } else { 0 }),
            _ => self.inner.read(port),
        }
    }

    fn write(&mut self, port: u8, value: u8) -> Result<(), Fault> {
        match port {
            pif_port::CIC => {
                // Clock bit set pulls the clock low; clearing it only releases the line.
                if value & 0b10 != 0 {
                    let data = value & 1 != 0;
                    let cic = self.master.pulse(data)?;
                    trace!("link: pif {} cic {}", data as u8, cic as u8);
                    self.line = data && cic;
                }
                Ok(())
            }
            _ => self.inner.write(port, value),
        }
    }
}

impl<P: PifPorts, M: ClockMaster> PifPorts for PifSide<P, M> {
    fn read_command(&mut self) -> Result<u8, Fault> {
        self.inner.read_command()
    }

    fn halt(&mut self, mem: &mut Memory) -> Result<(), Fault> {
        self.inner.halt(mem)
    }

    fn interrupt_requests(&mut self) -> Result<Interrupts, Fault> {
        self.inner.interrupt_requests()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pin {
    /// Power on; the first read reports the strap without waiting on the clock.
    Reset,
    /// Clock high, nothing in flight.
    Idle,
    /// Clock held low by the PIF; the CIC has yet to answer.
    Low,
}

/// CIC ports on a [`ClockSlave`].
///
/// A pulse is answered on the first read of the line after the CIC has driven data or raised its
/// sample strobe, which is the point where the chip starts waiting for the clock to come back.
pub struct CicSide<S> {
    slave: S,
    strap: bool,
    pin: Pin,
    drive: bool,
    sampled: bool,
    acted: bool,
}

impl<S: ClockSlave> CicSide<S> {
    pub fn new(slave: S, strap: bool) -> Self {
        CicSide {
            slave,
            strap,
            pin: Pin::Reset,
            drive: true,
            sampled: true,
            acted: false,
        }
    }

    fn high(&self) -> u8 {
        (self.strap as u8) << 2 | 0b10 | self.drive as u8
    }
}

impl<S: ClockSlave> Ports for CicSide<S> {
    fn read(&mut self, port: u8) -> Result<u8, Fault> {
        if port != cic_port::LINE {
            return Err(Fault::Unimplemented("CIC read from a port other than the serial line"));
        }
        match self.pin {
            Pin::Reset => {
                self.pin = Pin::Idle;
                Ok(self.high())
            }
            Pin::Idle => {
                self.sampled = self.slave.await_pulse()?;
                self.pin = Pin::Low;
                self.acted = false;
                Ok((self.strap as u8) << 2 | (self.sampled && self.drive) as u8)
            }
            Pin::Low if self.acted => {
                self.slave.answer(self.drive)?;
                self.pin = Pin::Idle;
                Ok(self.high())
            }
            Pin::Low => Ok((self.strap as u8) << 2 | (self.sampled && self.drive) as u8),
        }
    }

    fn write(&mut self, port: u8, value: u8) -> Result<(), Fault> {
        match port {
            cic_port::LINE => self.drive = value & 1 != 0,
            cic_port::STROBE if value & 1 != 0 => {}
            cic_port::STROBE => return Ok(()),
            _ => return Err(Fault::Unimplemented("CIC write to a port other than the serial line")),
        }
        if self.pin == Pin::Low {
            self.acted = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::cic::{CicEngine, State, CIC};
    use crate::pif::{Phase, PifEngine};
    use crate::{cipher, Region, Violation};

    /// Plays the PIF against a CIC: sends queued bits, records what comes back.
    struct ScriptedMaster {
        send: VecDeque<bool>,
        received: Vec<bool>,
    }

    impl ClockSlave for ScriptedMaster {
        fn await_pulse(&mut self) -> Result<bool, Fault> {
            self.send.pop_front().ok_or(Fault::LinkClosed)
        }

        fn answer(&mut self, data: bool) -> Result<(), Fault> {
            self.received.push(data);
            Ok(())
        }
    }

    fn nibbles(bits: &[bool]) -> String {
        let values: Vec<u8> = bits
            .chunks(4)
            .map(|c| c.iter().fold(0, |n, &b| n << 1 | b as u8))
            .collect();
        common::util::nibble_string(&values)
    }

    fn cic_boot(cic: CIC, pulses: usize) -> (CicEngine, CicSide<ScriptedMaster>) {
        let master = ScriptedMaster {
            send: std::iter::repeat(true).take(pulses).collect(),
            received: Vec::new(),
        };
        let mut io = CicSide::new(master, cic.is_dd());
        let mut engine = CicEngine::new(cic);
        engine.tick(&mut io).unwrap();
        engine.tick(&mut io).unwrap();
        (engine, io)
    }

    #[test]
    fn cic_announces_version_and_seed() {
        let (engine, io) = cic_boot(CIC::Nus6102, 28);
        assert_eq!(engine.state(), State::BootChecksum);
        assert_eq!(nibbles(&io.slave.received), "1bd393d");
    }

    #[test]
    fn pal_and_dd_version_codes() {
        let (_, io) = cic_boot(CIC::Nus7101, 28);
        assert_eq!(nibbles(&io.slave.received[..4]), "5");
        let (_, io) = cic_boot(CIC::Nus8303, 28);
        assert_eq!(nibbles(&io.slave.received[..4]), "9");
    }

    #[test]
    fn strapped_chip_needs_start_bit() {
        let master = ScriptedMaster {
            send: VecDeque::from([false]),
            received: Vec::new(),
        };
        let mut io = CicSide::new(master, true);
        let mut engine = CicEngine::new(CIC::Nus8401);
        let err = engine.tick(&mut io).unwrap_err();
        assert_eq!(err, Fault::Protocol(Violation::BadStrap));
        assert!(matches!(engine.state(), State::Dead(_)));
    }

    #[test]
    fn cic_sends_encoded_checksum() {
        let (mut engine, mut io) = cic_boot(CIC::Nus6102, 28 + 65);
        engine.tick(&mut io).unwrap();
        assert_eq!(engine.state(), State::BootKeys);
        assert_eq!(nibbles(&io.slave.received[29..]), "04e2fac5210fce2f");
    }

    #[test]
    fn reset_counter_leaves_marker() {
        // Boot, then command 11 (reset) and the clock hold the PIF answers with.
        let (mut engine, mut io) = cic_boot(CIC::Nus6102, 28 + 65 + 8 + 3);
        engine.tick(&mut io).unwrap();
        engine.tick(&mut io).unwrap();
        assert_eq!(engine.state(), State::Run);
        engine.tick(&mut io).unwrap();
        assert_eq!(engine.memory().read(0x10), 0xf);
        assert_eq!(engine.memory().read(0x00), 0);
        assert_eq!(io.slave.received.last(), Some(&false));
    }

    #[test]
    fn challenge_without_circuit_complements() {
        let (mut engine, mut io) = cic_boot(CIC::Nus6102, 28 + 65 + 8 + 2 + 8 + 128 + 1 + 128);
        engine.tick(&mut io).unwrap();
        engine.tick(&mut io).unwrap();
        // Command bits 1,1 would be a reset; the PIF sends 1,0 for a challenge.
        io.slave.send[1] = false;
        engine.tick(&mut io).unwrap();

        let received = &io.slave.received;
        assert_eq!(received.len(), 103 + 8 + 128 + 1 + 128);
        assert_eq!(nibbles(&received[103..111]), "aa");
        assert!(!received[239]);
        assert_eq!(nibbles(&received[240..]), "0".repeat(32));
    }

    #[test]
    fn challenge_circuit_transforms_buffer() {
        let (mut engine, mut io) = cic_boot(CIC::Nus6105, 28 + 65 + 8 + 2 + 8 + 128 + 1 + 128);
        engine.tick(&mut io).unwrap();
        engine.tick(&mut io).unwrap();
        io.slave.send[1] = false;
        // An all zero challenge.
        for bit in io.slave.send.range_mut(2 + 8..2 + 8 + 128) {
            *bit = false;
        }
        engine.tick(&mut io).unwrap();

        let received = &io.slave.received;
        assert_eq!(nibbles(&received[240..]), "bf9f9f9f9f9f9f9f9f9f9f9f9f9f9f9f");
        assert_eq!(engine.memory().read(0x20), 0xb);
    }

    #[test]
    fn die_command_kills_cic() {
        let (mut engine, mut io) = cic_boot(CIC::Nus6102, 28 + 65 + 8 + 2);
        engine.tick(&mut io).unwrap();
        engine.tick(&mut io).unwrap();
        io.slave.send[0] = false;
        assert_eq!(engine.tick(&mut io), Err(Fault::Protocol(Violation::DieCommand)));
        assert_eq!(engine.state(), State::Dead(Violation::DieCommand));
        assert_eq!(engine.tick(&mut io), Err(Fault::Protocol(Violation::DieCommand)));
    }

    #[test]
    fn cic_compare_mismatch_is_fatal() {
        let (mut engine, mut io) = cic_boot(CIC::Nus6102, 28 + 65 + 8 + 2 + 2);
        engine.tick(&mut io).unwrap();
        engine.tick(&mut io).unwrap();
        assert_eq!(engine.state(), State::Run);

        let mut mem = engine.memory().clone();
        for _ in 0..3 {
            cipher::compare_round(mem.page_mut(0x00));
        }
        for _ in 0..3 {
            cipher::compare_round(mem.page_mut(0x10));
        }
        let index = mem.read(0x17).max(1);
        io.slave.send[0] = false;
        io.slave.send[1] = false;
        io.slave.send[2] = !mem.bit_test(index, 0);

        let violation = Violation::CompareMismatch { index };
        assert_eq!(engine.tick(&mut io), Err(Fault::Protocol(violation)));
        assert_eq!(engine.state(), State::Dead(violation));
    }

    #[test]
    fn dead_link_is_reported() {
        let (mut master, slave) = duplex(Duration::from_millis(50));
        drop(slave);
        assert_eq!(master.pulse(true), Err(Fault::LinkClosed));
    }

    /// CPU side of a boot: plays the command sequence and supplies the expected checksum.
    struct Cpu {
        command: u8,
        writes: Vec<(u8, u8)>,
    }

    impl Ports for Cpu {
        fn read(&mut self, port: u8) -> Result<u8, Fault> {
            Ok(match port {
                pif_port::ENTROPY => 0b1000,
                pif_port::RESET => 0b1000,
                _ => 0,
            })
        }

        fn write(&mut self, port: u8, value: u8) -> Result<(), Fault> {
            self.writes.push((port, value));
            Ok(())
        }
    }

    impl PifPorts for Cpu {
        fn read_command(&mut self) -> Result<u8, Fault> {
            Ok(self.command)
        }
    }

    /// Boot a PIF against a CIC on its own thread, then run `rounds` compare rounds.
    fn live_pair(cic: CIC, rounds: usize) {
        let (master, slave) = duplex(LINK_TIMEOUT);
        let cic_io: Box<dyn Ports + Send> = Box::new(CicSide::new(slave, cic.is_dd()));
        let cic_thread = common::ThreadAdapter::spawn(CicEngine::new(cic), cic_io, None).unwrap();

        let mut pif = PifEngine::new(cic.region());
        let mut io = PifSide::new(Cpu { command: 0, writes: Vec::new() }, master);

        assert_eq!(pif.tick(&mut io), Ok(Phase::AwaitLockout));
        io.inner.command = 0x10;
        assert_eq!(pif.tick(&mut io), Ok(Phase::AwaitChecksum));

        for (i, nibble) in cic.checksum().into_iter().enumerate() {
            pif.memory_mut().write(0xe4 + i as u8, nibble);
        }
        io.inner.command = 0x20;
        assert_eq!(pif.tick(&mut io), Ok(Phase::AwaitAck));
        io.inner.command = 0x40;
        assert_eq!(pif.tick(&mut io), Ok(Phase::BootTimerGate));
        io.inner.command = 0x08;
        assert_eq!(pif.tick(&mut io), Ok(Phase::Running));
        io.inner.command = 0;

        for _ in 0..rounds {
            assert_eq!(pif.tick(&mut io), Ok(Phase::Running));
        }

        // Taking the CPU side back hangs up the line.
        let cpu = io.into_inner();
        assert!(cpu.writes.contains(&(pif_port::ROM_LOCKOUT, 1)));
        let finished = cic_thread.join().unwrap();
        assert_eq!(finished.result, Err(Fault::LinkClosed));
        assert_eq!(finished.engine.cic(), cic);
        assert_eq!(finished.engine.state(), State::Run);
    }

    #[test]
    fn live_pair_boots_and_keeps_comparing() {
        live_pair(CIC::Nus6102, 3);
    }

    #[test]
    fn live_pal_pair_compares_downwards() {
        live_pair(CIC::Nus7101, 5);
    }
}
