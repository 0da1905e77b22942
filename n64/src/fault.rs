use thiserror::Error;

use crate::Region;

/// Security failures. Either chip treats these as terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("invalid CIC version code {0:#x}")]
    BadVersion(u8),
    #[error("{chip:?} CIC in a {console:?} console")]
    RegionMismatch { console: Region, chip: Region },
    #[error("checksum mismatch at nibble {index}")]
    ChecksumMismatch { index: usize },
    #[error("continuous compare failed at index {index:#x}")]
    CompareMismatch { index: u8 },
    #[error("boot timer expired before terminate")]
    BootTimeout,
    #[error("CIC never acknowledged reset")]
    ResetTimeout,
    #[error("strapped CIC saw no start bit")]
    BadStrap,
    #[error("PIF sent the die command")]
    DieCommand,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("fatal error: {0}")]
    Protocol(#[from] Violation),
    #[error("not implemented: {0}")]
    Unimplemented(&'static str),
    #[error("malformed stimulus: {0}")]
    Stimulus(String),
    #[error("serial link closed")]
    LinkClosed,
    #[error("stimulus requested stop")]
    Stopped,
}

impl Fault {
    /// Process exit status used by the command line harness.
    pub fn exit_code(&self) -> i32 {
        match self {
            Fault::Stopped => 0,
            Fault::Protocol(_) => 1,
            Fault::Unimplemented(_) => 2,
            Fault::Stimulus(_) | Fault::LinkClosed => 3,
        }
    }
}
