//! Behavioural model of the N64 boot security chips: the PIF on the console side and the CIC in
//! the cartridge. The two engines only ever talk through the serial line in [`link`].

pub mod cic;
pub mod cipher;
pub mod fault;
pub mod link;
pub mod pif;
pub mod ports;
pub mod script;
pub mod sm5;

pub use fault::{Fault, Violation};

/// Television standard a console or cartridge was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Region {
    Ntsc,
    Pal,
}

impl Region {
    pub fn is_pal(self) -> bool {
        self == Region::Pal
    }
}
