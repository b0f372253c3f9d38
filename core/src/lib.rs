//! OFDM flexible-frame codec for software-defined radio links
//!
//! `FrameGenerator` turns an 8-byte header and a payload into a complex
//! baseband waveform with a synchronization preamble; `FrameSynchronizer`
//! recovers frames from an arbitrary, noisy, frequency-offset sample stream.

pub mod bitpack;
pub mod channel;
pub mod crc;
pub mod error;
pub mod fec;
pub mod framegen;
pub mod framesync;
pub mod framing;
pub mod golay;
pub mod modem;
pub mod ofdm_cp;
pub mod packetizer;
pub mod sample;
pub mod subcarrier;
pub mod training;
pub mod trellis;

pub use crc::CrcScheme;
pub use error::{OfdmFrameError, Result};
pub use fec::FecScheme;
pub use framegen::FrameGenerator;
pub use framesync::{FrameDataStats, FrameListener, FrameStats, FrameSynchronizer, SyncConfig, SyncState};
pub use framing::FrameProperties;
pub use modem::{Modulation, ModulationScheme};
pub use rustfft::num_complex::Complex;
pub use sample::Real;
pub use subcarrier::{SubcarrierAllocation, SubcarrierType};

// Transform size limits
pub const MIN_SUBCARRIERS: usize = 32;
pub const MAX_SUBCARRIERS: usize = 4096;
pub const DEFAULT_NUM_SUBCARRIERS: usize = 64;
pub const DEFAULT_CP_LEN: usize = 16;

// Preamble: short training symbols plus one long training symbol
pub const MIN_PREAMBLE_SYMBOLS: usize = 3;
pub const DEFAULT_PREAMBLE_SYMBOLS: usize = 3;

// Header configuration
pub const PROTOCOL_VERSION: u8 = 104;
pub const HEADER_USER_LEN: usize = 8;
pub const HEADER_LEN: usize = HEADER_USER_LEN + 6; // version, length (2), modulation, check/inner fec, outer fec
pub const HEADER_BLOCK_LEN: usize = HEADER_LEN + 4; // + CRC-32
pub const HEADER_ENCODED_LEN: usize = 2 * HEADER_BLOCK_LEN; // Golay(24,12)
pub const HEADER_BITS: usize = 8 * HEADER_ENCODED_LEN; // 288 BPSK symbols

// Payload limits
pub const DEFAULT_PAYLOAD_LEN: usize = 1024;
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 8192;

// Synchronizer thresholds
pub const DEFAULT_DETECT_THRESHOLD: f64 = 0.6;
pub const DEFAULT_LONG_TRAINING_THRESHOLD: f64 = 0.3;

/// Check a transform size M and cyclic prefix length G.
pub fn validate_dimensions(num_subcarriers: usize, cp_len: usize) -> Result<()> {
    if num_subcarriers % 16 != 0 || !(MIN_SUBCARRIERS..=MAX_SUBCARRIERS).contains(&num_subcarriers) {
        return Err(OfdmFrameError::Configuration(format!(
            "number of subcarriers must be a multiple of 16 in {}..={}, got {}",
            MIN_SUBCARRIERS, MAX_SUBCARRIERS, num_subcarriers
        )));
    }
    if cp_len >= num_subcarriers {
        return Err(OfdmFrameError::Configuration(format!(
            "cyclic prefix length {} must be less than {} subcarriers",
            cp_len, num_subcarriers
        )));
    }
    Ok(())
}
