mod engine;

pub use engine::{CicEngine, Command, State};

use crate::Region;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CIC {
    #[value(name = "6101")]
    Nus6101,
    #[value(name = "6102")]
    Nus6102,
    #[value(name = "6103")]
    Nus6103,
    #[value(name = "6105")]
    Nus6105,
    #[value(name = "6106")]
    Nus6106,
    #[value(name = "7101")]
    Nus7101,
    #[value(name = "7102")]
    Nus7102,
    #[value(name = "7103")]
    Nus7103,
    #[value(name = "7105")]
    Nus7105,
    #[value(name = "7106")]
    Nus7106,
    #[value(name = "8303")]
    Nus8303,
    #[value(name = "8401")]
    Nus8401,
    #[value(name = "5167")]
    Nus5167,
    #[value(name = "ddus")]
    NusDDUS,
}

impl CIC {
    /// Look a chip up by its part number, the way stimulus scripts name it.
    pub fn from_number(number: i64) -> Option<CIC> {
        Some(match number {
            6101 => CIC::Nus6101,
            6102 => CIC::Nus6102,
            6103 => CIC::Nus6103,
            6105 => CIC::Nus6105,
            6106 => CIC::Nus6106,
            7101 => CIC::Nus7101,
            7102 => CIC::Nus7102,
            7103 => CIC::Nus7103,
            7105 => CIC::Nus7105,
            7106 => CIC::Nus7106,
            8303 => CIC::Nus8303,
            8401 => CIC::Nus8401,
            5167 => CIC::Nus5167,
            _ => return None,
        })
    }

    pub fn region(self) -> Region {
        match self {
            CIC::Nus7101 | CIC::Nus7102 | CIC::Nus7103 | CIC::Nus7105 | CIC::Nus7106 => Region::Pal,
            _ => Region::Ntsc,
        }
    }

    pub fn has_challenge(self) -> bool {
        matches!(self, CIC::Nus6105 | CIC::Nus7105)
    }

    /// 64DD chips tie the strap pin high and announce themselves with version 9.
    pub fn is_dd(self) -> bool {
        matches!(self, CIC::Nus8303 | CIC::Nus8401 | CIC::NusDDUS)
    }

    /// Mask ROM secret: the seed byte twice, then the six checksum bytes.
    pub fn secret(self) -> [u8; 8] {
        match self {
            CIC::Nus6101 => [0x3f, 0x3f, 0x45, 0xcc, 0x73, 0xee, 0x31, 0x7a],
            CIC::Nus6102 | CIC::Nus7101 => [0x3f, 0x3f, 0xa5, 0x36, 0xc0, 0xf1, 0xd8, 0x59],
            CIC::Nus7102 => [0x3f, 0x3f, 0x44, 0x16, 0x0e, 0xc5, 0xd9, 0xaf],
            CIC::Nus6103 | CIC::Nus7103 => [0x78, 0x78, 0x58, 0x6f, 0xd4, 0x70, 0x98, 0x67],
            CIC::Nus6105 | CIC::Nus7105 => [0x91, 0x91, 0x86, 0x18, 0xa4, 0x5b, 0xc2, 0xd3],
            CIC::Nus6106 | CIC::Nus7106 => [0x85, 0x85, 0x2b, 0xba, 0xd4, 0xe6, 0xeb, 0x74],
            CIC::Nus8303 => [0xdd, 0xdd, 0x32, 0xb2, 0x94, 0xe2, 0xab, 0x90],
            CIC::Nus8401 => [0xdd, 0xdd, 0x6e, 0xe8, 0xd9, 0xe8, 0x49, 0x70],
            CIC::Nus5167 => [0xdd, 0xdd, 0x08, 0x3c, 0x6c, 0x77, 0xe0, 0xb1],
            CIC::NusDDUS => [0xde, 0xde, 0x05, 0xba, 0x2e, 0xf0, 0xa5, 0xf1],
        }
    }

    /// The 12 checksum nibbles the CPU must present for this chip.
    pub fn checksum(self) -> [u8; 12] {
        let secret = self.secret();
        std::array::from_fn(|i| {
            let byte = secret[2 + i / 2];
            if i % 2 == 0 { byte >> 4 } else { byte & 0xf }
        })
    }
}
