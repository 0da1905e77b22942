//! Stimulus scripts: port values come from a text file, every port access is logged.
//!
//! A script is a whitespace separated list of values in C `%i` syntax, consumed one per read.
//! `#` comments run to the end of the line. A few words are special:
//!
//! * `q` stops the run cleanly,
//! * `!a` / `!b` raise interrupt request A or B at the next poll point,
//! * `dma` followed by 64 byte values is what the bus writes into the shared window during the
//!   next halt.

use std::collections::VecDeque;
use std::fmt;
use std::io::Write;

use tracing::trace;

use crate::ports::{Interrupts, PifPorts, Ports};
use crate::sm5::Memory;
use crate::Fault;

pub struct ScriptPorts<W> {
    tokens: VecDeque<String>,
    log: W,
    pending: Interrupts,
}

fn tokenize(source: &str) -> VecDeque<String> {
    source
        .lines()
        .map(|line| line.split('#').next().unwrap_or(""))
        .flat_map(str::split_whitespace)
        .map(str::to_owned)
        .collect()
}

impl<W: Write> ScriptPorts<W> {
    pub fn new(source: &str, log: W) -> Self {
        ScriptPorts {
            tokens: tokenize(source),
            log,
            pending: Interrupts::default(),
        }
    }

    pub fn into_log(self) -> W {
        self.log
    }

    /// Emit one line of the port log.
    pub fn emit(&mut self, args: fmt::Arguments<'_>) -> Result<(), Fault> {
        writeln!(self.log, "{}", args).map_err(|e| Fault::Stimulus(format!("port log: {}", e)))
    }

    /// Next numeric value. Interrupt requests met on the way are latched.
    fn value(&mut self) -> Result<i64, Fault> {
        loop {
            let Some(token) = self.tokens.pop_front() else {
                self.emit(format_args!("scanf error"))?;
                return Err(Fault::Stimulus("script ended".to_string()));
            };
            match token.as_str() {
                "q" => {
                    self.emit(format_args!("  q"))?;
                    return Err(Fault::Stopped);
                }
                "!a" => self.pending.a = true,
                "!b" => self.pending.b = true,
                _ => {
                    return match common::util::parse_int(&token) {
                        Some(value) => Ok(value),
                        None => {
                            self.emit(format_args!("scanf error"))?;
                            Err(Fault::Stimulus(format!("unexpected token {:?}", token)))
                        }
                    }
                }
            }
        }
    }

    /// Log a named read and return its value, printed the way C's `%x` prints an `int`.
    fn logged_value(&mut self, name: fmt::Arguments<'_>) -> Result<i64, Fault> {
        self.emit(format_args!("r {}", name))?;
        let value = self.value()?;
        self.emit(format_args!("  {:x}", value as i32 as u32))?;
        Ok(value)
    }

    /// The part number a CIC script starts with.
    pub fn read_cic(&mut self) -> Result<i64, Fault> {
        self.logged_value(format_args!("cic"))
    }
}

impl<W: Write> Ports for ScriptPorts<W> {
    fn read(&mut self, port: u8) -> Result<u8, Fault> {
        let value = self.logged_value(format_args!("{:x}", port))?;
        Ok(value as u8 & 0xf)
    }

    fn write(&mut self, port: u8, value: u8) -> Result<(), Fault> {
        self.emit(format_args!("w {:x} {:x}", port, value))
    }
}

impl<W: Write> PifPorts for ScriptPorts<W> {
    fn read_command(&mut self) -> Result<u8, Fault> {
        let value = self.logged_value(format_args!("cmd"))?;
        Ok(value as u8)
    }

    fn halt(&mut self, mem: &mut Memory) -> Result<(), Fault> {
        self.emit(format_args!("halt"))?;
        if self.tokens.front().map(String::as_str) != Some("dma") {
            return Ok(());
        }
        self.tokens.pop_front();
        self.emit(format_args!("dma"))?;
        let mut bytes = [0u8; 64];
        for byte in bytes.iter_mut() {
            *byte = self.value()? as u8;
        }
        trace!("script: dma {:02x?}", bytes);
        mem.load_bytes(0x80, &bytes);
        Ok(())
    }

    fn interrupt_requests(&mut self) -> Result<Interrupts, Fault> {
        while let Some(token) = self.tokens.front() {
            match token.as_str() {
                "!a" => self.pending.a = true,
                "!b" => self.pending.b = true,
                _ => break,
            }
            self.tokens.pop_front();
        }
        Ok(std::mem::take(&mut self.pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pif::{Phase, PifEngine};
    use crate::{Region, Violation};

    fn script(source: &str) -> ScriptPorts<Vec<u8>> {
        ScriptPorts::new(source, Vec::new())
    }

    fn log(ports: ScriptPorts<Vec<u8>>) -> String {
        String::from_utf8(ports.into_log()).unwrap()
    }

    #[test]
    fn values_comments_and_stop() {
        let mut ports = script("0x1f # ignored 5\n 010\n7 q 9");
        assert_eq!(ports.read(5), Ok(0xf));
        assert_eq!(ports.read(9), Ok(8));
        assert_eq!(ports.read_command(), Ok(7));
        ports.write(0xe, 5).unwrap();
        assert_eq!(ports.read(3), Err(Fault::Stopped));
        assert_eq!(
            log(ports),
            "r 5\n  1f\nr 9\n  8\nr cmd\n  7\nw e 5\nr 3\n  q\n"
        );
    }

    #[test]
    fn malformed_and_exhausted_scripts() {
        let mut ports = script("zz");
        assert!(matches!(ports.read(1), Err(Fault::Stimulus(_))));
        assert!(log(ports).ends_with("scanf error\n"));

        let mut ports = script("");
        assert!(matches!(ports.read_command(), Err(Fault::Stimulus(_))));
    }

    #[test]
    fn interrupts_latch_until_polled() {
        let mut ports = script("!b 3 !a");
        assert_eq!(ports.read(7), Ok(3));
        let requests = ports.interrupt_requests().unwrap();
        assert!(requests.a && requests.b);
        assert_eq!(ports.interrupt_requests(), Ok(Interrupts::default()));
    }

    #[test]
    fn dma_fills_shared_window() {
        let mut source = String::from("dma");
        for i in 0..64 {
            source.push_str(&format!(" {}", i));
        }
        let mut ports = script(&source);
        let mut mem = Memory::new();
        ports.halt(&mut mem).unwrap();
        assert_eq!(mem.bytes(0x80, 4), vec![0, 1, 2, 3]);
        assert_eq!(mem.bytes(0xfe, 1), vec![63]);

        ports.halt(&mut mem).unwrap();
        assert_eq!(log(ports), "halt\ndma\nhalt\n");
    }

    #[test]
    fn cic_part_number() {
        let mut ports = script("6105");
        assert_eq!(ports.read_cic(), Ok(6105));
        assert_eq!(log(ports), "r cic\n  17d9\n");
    }

    #[test]
    fn pal_chip_in_ntsc_console_is_fatal() {
        // Version nibble 0101, one bit per read.
        let mut ports = script("0 8 0 8");
        let mut pif = PifEngine::new(Region::Ntsc);
        let err = pif.tick(&mut ports).unwrap_err();
        assert_eq!(
            err,
            Fault::Protocol(Violation::RegionMismatch { console: Region::Ntsc, chip: Region::Pal })
        );
        assert!(matches!(pif.phase(), Phase::Error(_)));
        assert_eq!(pif.tick(&mut ports), Err(err));

        let log = log(ports);
        assert!(log.starts_with("w 5 1\nw e 1\nw 5 3\nr 5\n  0\nw 5 1\n"));
        assert!(log.ends_with("w 8 0\nw 8 f\n"));
    }
}
