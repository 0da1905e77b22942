//! JoyBus frame parsing and transfers.
//!
//! The CPU lays out one frame per channel in the shared window:
//! `TX RX tx-data[TX & 0x3f] rx-space[RX & 0x3f]`. A write with the joybus command bit makes the
//! PIF parse the list into per-channel frame addresses; a later 64 byte read runs the transfers.

use tracing::{debug, trace};

use super::layout::*;
use super::PifEngine;
use crate::ports::{pif_port, PifPorts};
use crate::sm5::Pointer;
use crate::Fault;

/// What the PIF recorded for one channel during the last parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    pub reset: bool,
    pub skip: bool,
    /// Nibble address of the frame's TX byte.
    pub frame: u8,
}

/// Meaning of a TX byte at a frame boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    /// 0xff: padding, same channel.
    Pad,
    /// 0xfe: end of the frame list.
    End,
    /// 0xfd: reset this channel's device.
    Reset,
    /// 0x00: nothing for this channel.
    Skip,
    Frame,
}

impl Token {
    fn classify(tx: u8) -> Token {
        match tx {
            0xff => Token::Pad,
            0xfe => Token::End,
            0xfd => Token::Reset,
            0x00 => Token::Skip,
            _ => Token::Frame,
        }
    }
}

impl PifEngine {
    pub fn channel(&self, channel: u8) -> Channel {
        let mem = &self.core.mem;
        let status = CHANNEL_STATUS + channel;
        Channel {
            reset: mem.bit_test(status, CHANNEL_RESET),
            skip: mem.bit_test(status, CHANNEL_SKIP),
            frame: mem.read(FRAME_HIGH + channel) << 4 | mem.read(FRAME_LOW + channel),
        }
    }

    pub(super) fn skip_all_channels(&mut self) {
        for status in CHANNEL_STATUS..=CHANNEL_STATUS + CHANNELS {
            self.core.mem.write(status, 1 << CHANNEL_SKIP);
        }
    }

    fn byte_at(&self, addr: usize) -> u8 {
        let mem = &self.core.mem;
        mem.read(addr as u8) << 4 | mem.read(addr as u8 + 1)
    }

    /// Record where each channel's frame starts. No port traffic.
    pub(super) fn parse_frames(&mut self) {
        self.skip_all_channels();

        // Nibble address; allowed to run past 0xff, which ends the list.
        let mut ptr = SHARED as usize;
        let mut channel = 0;
        while channel < CHANNELS && ptr < 0x100 {
            let tx = self.byte_at(ptr);
            match Token::classify(tx) {
                Token::Pad => {
                    ptr += 2;
                    continue;
                }
                Token::End => break,
                Token::Reset => {
                    self.core.mem.bit_set(CHANNEL_STATUS + channel, CHANNEL_RESET);
                    ptr += 2;
                }
                Token::Skip => ptr += 2,
                Token::Frame => {
                    let status = CHANNEL_STATUS + channel;
                    let rx = if ptr + 2 < 0x100 { self.byte_at(ptr + 2) } else { 0 };
                    let next = ptr + 2 * (2 + (tx & 0x3f) as usize + (rx & 0x3f) as usize);
                    if next > 0xff {
                        debug!("PIF: joybus frame on channel {} overruns PIF RAM", channel);
                        self.core.mem.bit_reset(status, CHANNEL_RESET);
                        self.core.mem.bit_set(status, CHANNEL_SKIP);
                        break;
                    }
                    self.core.mem.write(FRAME_HIGH + channel, (ptr >> 4) as u8);
                    self.core.mem.write(FRAME_LOW + channel, ptr as u8);
                    self.core.mem.bit_reset(status, CHANNEL_SKIP);
                    ptr = next;
                }
            }
            channel += 1;
        }
        trace!("PIF: joybus parse done at channel {}", channel);
    }

    /// Run every parsed channel, highest first, then release the bus.
    pub(super) fn transfer<P: PifPorts + ?Sized>(&mut self, io: &mut P) -> Result<(), Fault> {
        self.core.save_context();
        let mut channel = CHANNELS - 1;
        io.write(pif_port::JOY_CHANNEL, channel)?;
        loop {
            self.transfer_channel(io, channel)?;

            let next = io.read(pif_port::JOY_CHANNEL)?;
            if next == 0 {
                break;
            }
            if next > CHANNELS {
                return Err(Fault::Unimplemented("JoyBus channel select beyond channel 4"));
            }
            channel = next - 1;
            io.write(pif_port::JOY_CHANNEL, channel)?;
        }
        self.halt(io)?;
        self.core.restore_context();
        Ok(())
    }

    fn transfer_channel<P: PifPorts + ?Sized>(&mut self, io: &mut P, channel: u8) -> Result<(), Fault> {
        let state = self.channel(channel);
        if state.reset {
            return self.reset_channel(io);
        }
        if state.skip {
            return Ok(());
        }
        if state.frame < SHARED {
            return Err(Fault::Unimplemented("JoyBus frame outside shared RAM"));
        }

        let mut ptr = Pointer::new(state.frame);
        let tx_high = self.core.mem.read(ptr.addr());
        if tx_high & 0b1000 != 0 {
            return Ok(());
        }
        if tx_high & 0b0100 != 0 {
            return self.reset_channel(io);
        }
        let counters = [(TX_COUNT, 0b1111), (RX_COUNT, 0b0011)];
        for (counter, mask) in counters {
            let high = self.core.mem.read(ptr.addr()) & mask;
            self.core.mem.write(ptr.addr(), high);
            self.core.mem.write(counter, high);
            ptr.inc_shared();
            self.core.mem.write(counter + 1, self.core.mem.read(ptr.addr()));
            ptr.inc_shared();
        }

        while self.count_down(TX_COUNT) {
            if !self.await_ready(io)? {
                return self.transfer_error(io);
            }
            for _ in 0..2 {
                io.write(pif_port::JOY_TX, self.core.mem.read(ptr.addr()))?;
                ptr.inc_shared();
            }
        }

        let cmd = self.command();
        if !(cmd.bit2() && cmd.terminate()) {
            io.write(pif_port::JOY_CTRL, 2)?;
        }

        while self.count_down(RX_COUNT) {
            if !self.await_ready(io)? {
                return self.transfer_error(io);
            }
            for _ in 0..2 {
                let value = io.read(pif_port::JOY_RX)?;
                self.core.mem.write(ptr.addr(), value);
                ptr.inc_shared();
            }
        }
        io.write(pif_port::JOY_CTRL, 1)
    }

    /// Decrement the byte counter at `addr`. False once it has run out.
    fn count_down(&mut self, addr: u8) -> bool {
        let mem = &mut self.core.mem;
        let count = mem.read(addr) << 4 | mem.read(addr + 1);
        if count == 0 {
            return false;
        }
        mem.write(addr, (count - 1) >> 4);
        mem.write(addr + 1, count - 1);
        true
    }

    /// Wait for the bus to take or deliver a byte. False when no device is answering.
    fn await_ready<P: PifPorts + ?Sized>(&mut self, io: &mut P) -> Result<bool, Fault> {
        loop {
            if io.read(pif_port::JOY_STATUS)? & 0b0100 == 0 {
                return Ok(false);
            }
            if io.read(pif_port::JOY_STATUS)? & 0b1000 != 0 {
                return Ok(true);
            }
        }
    }

    /// Abort the channel and flag the failure in the high bits of its RX byte.
    fn transfer_error<P: PifPorts + ?Sized>(&mut self, io: &mut P) -> Result<(), Fault> {
        io.write(pif_port::JOY_CTRL, 0)?;
        io.write(pif_port::JOY_CTRL, 1)?;
        let channel = io.read(pif_port::JOY_CHANNEL)?;
        let code = match io.read(pif_port::JOY_ERROR)? & 0b1000 {
            0 => 0b0100,
            _ => 0b1000,
        };
        debug!("PIF: joybus channel {} error {:x}", channel, code);

        let mut ptr = Pointer::new(self.channel(channel).frame);
        ptr.inc_shared();
        ptr.inc_shared();
        let rx_high = self.core.mem.read(ptr.addr());
        self.core.mem.write(ptr.addr(), rx_high + code);
        io.write(pif_port::JOY_ERROR, 0)
    }

    fn reset_channel<P: PifPorts + ?Sized>(&mut self, io: &mut P) -> Result<(), Fault> {
        while io.read(pif_port::JOY_STATUS)? & 0b1000 == 0 {
            io.write(pif_port::JOY_ERROR, 0)?;
        }
        io.write(pif_port::JOY_CTRL, 3)?;
        io.write(pif_port::JOY_CTRL, 1)?;
        while io.read(pif_port::JOY_STATUS)? & 0b1000 == 0 {}
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Region;

    fn parse(bytes: &[u8]) -> PifEngine {
        let mut pif = PifEngine::new(Region::Ntsc);
        pif.memory_mut().load_bytes(SHARED, bytes);
        pif.parse_frames();
        pif
    }

    #[test]
    fn single_frame_then_end() {
        // Bytes after the end marker would otherwise form a frame for channel 1.
        let pif = parse(&[0x02, 0x01, 0xaa, 0xbb, 0x00, 0xfe, 0x01, 0x01, 0x00, 0x00]);
        assert_eq!(pif.channel(0), Channel { reset: false, skip: false, frame: 0x80 });
        for ch in 1..5 {
            assert!(pif.channel(ch).skip, "channel {} active", ch);
        }
    }

    #[test]
    fn padding_and_special_tokens() {
        let pif = parse(&[0xff, 0xff, 0x00, 0xfd, 0x01, 0x04, 0x00, 0, 0, 0, 0, 0xfe]);
        assert!(pif.channel(0).skip);
        assert!(pif.channel(1).reset);
        let ch2 = pif.channel(2);
        assert!(!ch2.skip);
        assert_eq!(ch2.frame, 0x88);
        assert!(pif.channel(3).skip);
    }

    #[test]
    fn five_channels_at_most() {
        let mut frames = Vec::new();
        for _ in 0..6 {
            frames.extend_from_slice(&[0x01, 0x01, 0x00, 0x00]);
        }
        let pif = parse(&frames);
        for ch in 0..5 {
            assert_eq!(pif.channel(ch).frame, 0x80 + 8 * ch);
            assert!(!pif.channel(ch).skip);
        }
        assert!(pif.memory().bit_test(CHANNEL_STATUS + 5, CHANNEL_SKIP));
    }

    #[test]
    fn overrunning_frame_is_disabled() {
        let pif = parse(&[0x00, 0x3f, 0x3f]);
        let ch1 = pif.channel(1);
        assert!(ch1.skip);
        assert!(!ch1.reset);
    }

    #[test]
    fn parse_leaves_shared_ram_untouched() {
        let bytes = [0x03, 0x02, 0x01, 0x02, 0x03, 0xee, 0xee, 0xfe];
        let pif = parse(&bytes);
        assert_eq!(pif.memory().bytes(SHARED, bytes.len()), bytes.to_vec());
    }
}
