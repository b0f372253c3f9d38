use crate::error::{OfdmFrameError, Result};
use std::fmt;
use std::str::FromStr;

/// Error-detection scheme appended to the header and payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CrcScheme {
    None,
    /// 8-bit two's complement byte sum
    Checksum,
    /// CRC-8, polynomial 0xD5
    Crc8,
    /// CRC-16-CCITT, polynomial 0x1021, init 0xFFFF
    Crc16,
    /// CRC-24, polynomial 0x864CFB, init 0xB704CE
    Crc24,
    /// CRC-32, polynomial 0x04C11DB7, MSB first
    #[default]
    Crc32,
}

impl CrcScheme {
    pub const ALL: [CrcScheme; 6] = [
        CrcScheme::None,
        CrcScheme::Checksum,
        CrcScheme::Crc8,
        CrcScheme::Crc16,
        CrcScheme::Crc24,
        CrcScheme::Crc32,
    ];

    /// Number of key bytes appended to the protected data.
    pub fn len(self) -> usize {
        match self {
            CrcScheme::None => 0,
            CrcScheme::Checksum | CrcScheme::Crc8 => 1,
            CrcScheme::Crc16 => 2,
            CrcScheme::Crc24 => 3,
            CrcScheme::Crc32 => 4,
        }
    }

    /// Identifier carried in the frame header (3 bits).
    pub fn id(self) -> u8 {
        match self {
            CrcScheme::None => 0,
            CrcScheme::Checksum => 1,
            CrcScheme::Crc8 => 2,
            CrcScheme::Crc16 => 3,
            CrcScheme::Crc24 => 4,
            CrcScheme::Crc32 => 5,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.id() == id)
    }

    /// Compute the key over `data`.
    pub fn compute(self, data: &[u8]) -> u32 {
        match self {
            CrcScheme::None => 0,
            CrcScheme::Checksum => {
                let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
                sum.wrapping_neg() as u32
            }
            CrcScheme::Crc8 => crc_msb_first(data, 8, 0xD5, 0x00, 0x00),
            CrcScheme::Crc16 => crc_msb_first(data, 16, 0x1021, 0xFFFF, 0x0000),
            CrcScheme::Crc24 => crc_msb_first(data, 24, 0x86_4CFB, 0xB7_04CE, 0x00_0000),
            CrcScheme::Crc32 => crc_msb_first(data, 32, 0x04C1_1DB7, 0xFFFF_FFFF, 0xFFFF_FFFF),
        }
    }

    /// Append the key (big-endian) to `data`.
    pub fn append(self, data: &mut Vec<u8>) {
        let key = self.compute(data);
        let n = self.len();
        for i in (0..n).rev() {
            data.push((key >> (8 * i)) as u8);
        }
    }

    /// Check a buffer ending with its key. A buffer shorter than the key fails.
    pub fn validate(self, data_with_key: &[u8]) -> bool {
        let n = self.len();
        if data_with_key.len() < n {
            return false;
        }
        let (data, key) = data_with_key.split_at(data_with_key.len() - n);
        let received = key.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32);
        received == self.compute(data)
    }
}

/// Bitwise MSB-first CRC of `width` bits.
fn crc_msb_first(data: &[u8], width: u32, poly: u32, init: u32, xorout: u32) -> u32 {
    let top = 1u32 << (width - 1);
    let mask = if width == 32 { u32::MAX } else { (1u32 << width) - 1 };

    let mut crc = init;
    for &byte in data {
        crc ^= (byte as u32) << (width - 8);
        for _ in 0..8 {
            if crc & top != 0 {
                crc = (crc << 1) ^ poly;
            } else {
                crc <<= 1;
            }
        }
        crc &= mask;
    }
    (crc ^ xorout) & mask
}

impl fmt::Display for CrcScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CrcScheme::None => "none",
            CrcScheme::Checksum => "checksum",
            CrcScheme::Crc8 => "crc8",
            CrcScheme::Crc16 => "crc16",
            CrcScheme::Crc24 => "crc24",
            CrcScheme::Crc32 => "crc32",
        };
        f.write_str(name)
    }
}

impl FromStr for CrcScheme {
    type Err = OfdmFrameError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|scheme| scheme.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| OfdmFrameError::Configuration(format!("unknown CRC scheme '{}'", s)))
    }
}
