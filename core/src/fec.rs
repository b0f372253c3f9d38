use crate::bitpack::{soft_to_bytes, BitReader, BitWriter};
use crate::error::{OfdmFrameError, Result};
use crate::trellis::ViterbiDecoder;
use crate::{golay, trellis};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Forward error-correction scheme. Used for both the inner and the outer code
/// of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FecScheme {
    #[default]
    None,
    /// Each bit sent three times, majority vote
    Repeat3,
    /// Each bit sent five times, majority vote
    Repeat5,
    Hamming74,
    /// Hamming(7,4) plus overall parity (SECDED)
    Hamming84,
    /// Shortened Hamming(15,11) carrying one byte per codeword
    Hamming128,
    Golay2412,
    /// Rate 1/2, K=7 convolutional code with Viterbi decoding
    ConvR2K7,
}

impl FecScheme {
    pub const ALL: [FecScheme; 8] = [
        FecScheme::None,
        FecScheme::Repeat3,
        FecScheme::Repeat5,
        FecScheme::Hamming74,
        FecScheme::Hamming84,
        FecScheme::Hamming128,
        FecScheme::Golay2412,
        FecScheme::ConvR2K7,
    ];

    /// Identifier carried in the frame header (5 bits).
    pub fn id(self) -> u8 {
        match self {
            FecScheme::None => 0,
            FecScheme::Repeat3 => 1,
            FecScheme::Repeat5 => 2,
            FecScheme::Hamming74 => 3,
            FecScheme::Hamming84 => 4,
            FecScheme::Hamming128 => 5,
            FecScheme::Golay2412 => 6,
            FecScheme::ConvR2K7 => 7,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.id() == id)
    }

    /// `(data bits, codeword bits)` for block codes.
    fn block_shape(self) -> Option<(u32, u32)> {
        match self {
            FecScheme::Repeat3 => Some((1, 3)),
            FecScheme::Repeat5 => Some((1, 5)),
            FecScheme::Hamming74 => Some((4, 7)),
            FecScheme::Hamming84 => Some((4, 8)),
            FecScheme::Hamming128 => Some((8, 12)),
            FecScheme::Golay2412 => Some((12, 24)),
            FecScheme::None | FecScheme::ConvR2K7 => None,
        }
    }

    /// Nominal code rate.
    pub fn rate(self) -> f64 {
        match self {
            FecScheme::None => 1.0,
            FecScheme::ConvR2K7 => 0.5,
            other => match other.block_shape() {
                Some((k, n)) => k as f64 / n as f64,
                None => 1.0,
            },
        }
    }

    /// Encoded length in bytes of an `n`-byte message.
    pub fn encoded_len(self, n: usize) -> usize {
        match self {
            FecScheme::None => n,
            FecScheme::ConvR2K7 => trellis::encoded_len(n),
            other => match other.block_shape() {
                Some((k, cw)) => {
                    let blocks = (8 * n).div_ceil(k as usize);
                    (blocks * cw as usize).div_ceil(8)
                }
                None => n,
            },
        }
    }

    /// Encode `input`, replacing the contents of `out`.
    pub fn encode(self, input: &[u8], out: &mut Vec<u8>) {
        out.clear();
        match self {
            FecScheme::None => out.extend_from_slice(input),
            FecScheme::ConvR2K7 => trellis::ConvolutionalEncoder::new().encode(input, out),
            other => {
                if let Some((k, n)) = other.block_shape() {
                    let blocks = (8 * input.len()).div_ceil(k as usize);
                    let mut reader = BitReader::new(input);
                    let mut writer = BitWriter::new(out);
                    for _ in 0..blocks {
                        let data = reader.read_bits(k);
                        writer.push_bits(other.encode_block(data), n);
                    }
                    writer.finish();
                }
            }
        }
    }

    /// Decode `input` back into `n` bytes, replacing the contents of `out`.
    /// Uncorrectable blocks are passed through best-effort; the caller's CRC
    /// decides validity. Fails only on a length mismatch.
    pub fn decode(self, input: &[u8], n: usize, out: &mut Vec<u8>) -> Result<()> {
        self.decode_with(input, n, &mut ViterbiDecoder::new(), out)
    }

    /// [`decode`](Self::decode) reusing the caller's Viterbi decoder.
    pub fn decode_with(self, input: &[u8], n: usize, viterbi: &mut ViterbiDecoder, out: &mut Vec<u8>) -> Result<()> {
        if input.len() != self.encoded_len(n) {
            return Err(self.length_error(8 * input.len(), n));
        }

        out.clear();
        match self {
            FecScheme::None => out.extend_from_slice(input),
            FecScheme::ConvR2K7 => viterbi.decode(input, n, out)?,
            other => {
                if let Some((k, cw)) = other.block_shape() {
                    let blocks = (8 * n).div_ceil(k as usize);
                    let mut reader = BitReader::new(input);
                    {
                        let mut writer = BitWriter::new(out);
                        for _ in 0..blocks {
                            let word = reader.read_bits(cw);
                            writer.push_bits(other.decode_block(word), k);
                        }
                        writer.finish();
                    }
                    out.truncate(n);
                }
            }
        }
        Ok(())
    }

    /// Decode `8 * encoded_len(n)` soft bits (positive favours a one) into
    /// `n` bytes, replacing the contents of `out`.
    pub fn decode_soft(self, soft: &[f32], n: usize, viterbi: &mut ViterbiDecoder, out: &mut Vec<u8>) -> Result<()> {
        if soft.len() != 8 * self.encoded_len(n) {
            return Err(self.length_error(soft.len(), n));
        }

        out.clear();
        match self {
            FecScheme::None => soft_to_bytes(soft, out),
            FecScheme::ConvR2K7 => viterbi.decode_soft(soft, n, out)?,
            other => {
                if let Some((k, cw)) = other.block_shape() {
                    let (k, cw) = (k as usize, cw as usize);
                    let blocks = (8 * n).div_ceil(k);
                    {
                        let mut writer = BitWriter::new(out);
                        for word in soft.chunks_exact(cw).take(blocks) {
                            writer.push_bits(other.decode_block_soft(word), k as u32);
                        }
                        writer.finish();
                    }
                    out.truncate(n);
                }
            }
        }
        Ok(())
    }

    fn length_error(self, bits: usize, n: usize) -> OfdmFrameError {
        OfdmFrameError::FecError(format!(
            "{} decoder expected {} bits, got {}",
            self,
            8 * self.encoded_len(n),
            bits
        ))
    }

    fn encode_block(self, data: u32) -> u32 {
        match self {
            FecScheme::Repeat3 => repeat_encode(data, 3),
            FecScheme::Repeat5 => repeat_encode(data, 5),
            FecScheme::Hamming74 => hamming_encode(data, 4, 7),
            FecScheme::Hamming84 => {
                let word = hamming_encode(data, 4, 7);
                (word << 1) | (word.count_ones() & 1)
            }
            FecScheme::Hamming128 => hamming_encode(data, 8, 12),
            FecScheme::Golay2412 => golay::encode_block(data as u16),
            FecScheme::None | FecScheme::ConvR2K7 => data,
        }
    }

    fn decode_block(self, word: u32) -> u32 {
        match self {
            FecScheme::Repeat3 => repeat_decode(word, 3),
            FecScheme::Repeat5 => repeat_decode(word, 5),
            FecScheme::Hamming74 => hamming_decode(word, 7),
            FecScheme::Hamming84 => {
                let inner = word >> 1;
                let overall_odd = word.count_ones() & 1 == 1;
                if overall_odd || hamming_syndrome(inner, 7) == 0 {
                    hamming_decode(inner, 7)
                } else {
                    // even parity with a non-zero syndrome: double error, leave as is
                    hamming_extract(inner, 7)
                }
            }
            FecScheme::Hamming128 => hamming_decode(word, 12),
            FecScheme::Golay2412 => golay::decode_block(word).0 as u32,
            FecScheme::None | FecScheme::ConvR2K7 => word,
        }
    }
}

impl FecScheme {
    /// Maximum-likelihood decision on one codeword of soft bits. Repetition
    /// and Hamming codes search their whole codebook; Golay uses a Chase search.
    fn decode_block_soft(self, soft: &[f32]) -> u32 {
        match self {
            FecScheme::Repeat3 | FecScheme::Repeat5 => (soft.iter().sum::<f32>() > 0.0) as u32,
            FecScheme::Hamming74 | FecScheme::Hamming84 | FecScheme::Hamming128 => {
                let n = soft.len() as u32;
                let mut best = (f32::NEG_INFINITY, 0u32);
                for (data, &word) in self.codebook().iter().enumerate() {
                    let score = soft.iter().enumerate().fold(0.0f32, |acc, (i, &s)| {
                        if bit_at(word, i as u32 + 1, n) {
                            acc + s
                        } else {
                            acc - s
                        }
                    });
                    if score > best.0 {
                        best = (score, data as u32);
                    }
                }
                best.1
            }
            FecScheme::Golay2412 => golay::decode_soft(soft).0 as u32,
            FecScheme::None | FecScheme::ConvR2K7 => soft
                .iter()
                .fold(0u32, |acc, &s| (acc << 1) | (s > 0.0) as u32),
        }
    }

    /// Every codeword of a Hamming code, indexed by its data bits.
    fn codebook(self) -> &'static [u32] {
        static HAMMING74: OnceLock<Vec<u32>> = OnceLock::new();
        static HAMMING84: OnceLock<Vec<u32>> = OnceLock::new();
        static HAMMING128: OnceLock<Vec<u32>> = OnceLock::new();
        let (cell, k) = match self {
            FecScheme::Hamming74 => (&HAMMING74, 4),
            FecScheme::Hamming84 => (&HAMMING84, 4),
            FecScheme::Hamming128 => (&HAMMING128, 8),
            _ => return &[],
        };
        cell.get_or_init(|| (0..1u32 << k).map(|data| self.encode_block(data)).collect())
    }
}

fn repeat_encode(bit: u32, copies: u32) -> u32 {
    if bit & 1 == 1 {
        (1 << copies) - 1
    } else {
        0
    }
}

fn repeat_decode(word: u32, copies: u32) -> u32 {
    (word.count_ones() > copies / 2) as u32
}

// Hamming codewords are indexed by position 1..=n, position 1 in the most
// significant bit. Parity bits sit at the power-of-two positions.

#[inline]
fn bit_at(word: u32, pos: u32, n: u32) -> bool {
    (word >> (n - pos)) & 1 == 1
}

fn hamming_syndrome(word: u32, n: u32) -> u32 {
    (1..=n).filter(|&pos| bit_at(word, pos, n)).fold(0, |s, pos| s ^ pos)
}

fn hamming_encode(data: u32, k: u32, n: u32) -> u32 {
    let mut word = 0u32;
    let mut remaining = k;
    for pos in (1..=n).filter(|p| !p.is_power_of_two()) {
        remaining -= 1;
        if (data >> remaining) & 1 == 1 {
            word |= 1 << (n - pos);
        }
    }
    let syndrome = hamming_syndrome(word, n);
    for pos in (0..n).map(|i| 1u32 << i).take_while(|&p| p <= n) {
        if syndrome & pos != 0 {
            word |= 1 << (n - pos);
        }
    }
    word
}

fn hamming_extract(word: u32, n: u32) -> u32 {
    (1..=n)
        .filter(|p| !p.is_power_of_two())
        .fold(0, |data, pos| (data << 1) | bit_at(word, pos, n) as u32)
}

fn hamming_decode(word: u32, n: u32) -> u32 {
    let syndrome = hamming_syndrome(word, n);
    let corrected = if syndrome != 0 && syndrome <= n {
        word ^ (1 << (n - syndrome))
    } else {
        word
    };
    hamming_extract(corrected, n)
}

impl fmt::Display for FecScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FecScheme::None => "none",
            FecScheme::Repeat3 => "rep3",
            FecScheme::Repeat5 => "rep5",
            FecScheme::Hamming74 => "h74",
            FecScheme::Hamming84 => "h84",
            FecScheme::Hamming128 => "h128",
            FecScheme::Golay2412 => "g2412",
            FecScheme::ConvR2K7 => "v27",
        };
        f.write_str(name)
    }
}

impl FromStr for FecScheme {
    type Err = OfdmFrameError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|scheme| scheme.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| OfdmFrameError::Configuration(format!("unknown FEC scheme '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitpack::bytes_to_soft;

    fn sample_data() -> Vec<u8> {
        (0..23u8).map(|i| i.wrapping_mul(91).rotate_left(3) ^ 0x3c).collect()
    }

    #[test]
    fn test_encoded_lengths() {
        assert_eq!(FecScheme::None.encoded_len(10), 10);
        assert_eq!(FecScheme::Repeat3.encoded_len(10), 30);
        assert_eq!(FecScheme::Repeat5.encoded_len(10), 50);
        assert_eq!(FecScheme::Hamming74.encoded_len(10), 18); // 20 blocks * 7 bits = 140 bits
        assert_eq!(FecScheme::Hamming84.encoded_len(10), 20);
        assert_eq!(FecScheme::Hamming128.encoded_len(10), 15);
        assert_eq!(FecScheme::Golay2412.encoded_len(14), 30);
        assert_eq!(FecScheme::Golay2412.encoded_len(18), 36);
        assert_eq!(FecScheme::ConvR2K7.encoded_len(10), 22);
    }

    #[test]
    fn test_clean_round_trip_all_schemes() {
        let data = sample_data();
        for scheme in FecScheme::ALL {
            let mut encoded = Vec::new();
            let mut decoded = Vec::new();
            scheme.encode(&data, &mut encoded);
            assert_eq!(encoded.len(), scheme.encoded_len(data.len()), "{}", scheme);
            scheme.decode(&encoded, data.len(), &mut decoded).unwrap();
            assert_eq!(decoded, data, "{}", scheme);
        }
    }

    #[test]
    fn test_soft_round_trip_all_schemes() {
        let data = sample_data();
        let mut viterbi = ViterbiDecoder::new();
        for scheme in FecScheme::ALL {
            let mut encoded = Vec::new();
            let mut soft = Vec::new();
            let mut decoded = Vec::new();
            scheme.encode(&data, &mut encoded);
            bytes_to_soft(&encoded, &mut soft);
            // uneven confidence must not change a clean decision
            for (i, s) in soft.iter_mut().enumerate() {
                *s *= 0.2 + (i % 5) as f32;
            }
            scheme.decode_soft(&soft, data.len(), &mut viterbi, &mut decoded).unwrap();
            assert_eq!(decoded, data, "{}", scheme);
        }
        let result = FecScheme::Repeat3.decode_soft(&[0.5; 7], 1, &mut viterbi, &mut Vec::new());
        assert!(matches!(result, Err(OfdmFrameError::FecError(_))));
    }

    #[test]
    fn test_soft_decoding_beats_hard_decisions() {
        let data = sample_data();
        let mut encoded = Vec::new();
        FecScheme::Hamming74.encode(&data, &mut encoded);
        let mut soft = Vec::new();
        bytes_to_soft(&encoded, &mut soft);
        // two unreliable errors in the first codeword: beyond Hamming(7,4)
        for i in [1usize, 5] {
            soft[i] *= -0.1;
        }
        let mut hard_input = Vec::new();
        soft_to_bytes(&soft, &mut hard_input);

        let mut hard = Vec::new();
        FecScheme::Hamming74.decode(&hard_input, data.len(), &mut hard).unwrap();
        assert_ne!(hard, data);

        let mut decoded = Vec::new();
        FecScheme::Hamming74
            .decode_soft(&soft, data.len(), &mut ViterbiDecoder::new(), &mut decoded)
            .unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_single_bit_error_corrected() {
        let data = sample_data();
        let correcting = FecScheme::ALL
            .into_iter()
            .filter(|s| !matches!(s, FecScheme::None));
        for scheme in correcting {
            let mut encoded = Vec::new();
            scheme.encode(&data, &mut encoded);
            for bit in [0usize, 13, 77, 100] {
                let mut corrupted = encoded.clone();
                corrupted[bit / 8] ^= 0x80 >> (bit % 8);
                let mut decoded = Vec::new();
                scheme.decode(&corrupted, data.len(), &mut decoded).unwrap();
                assert_eq!(decoded, data, "{} bit {}", scheme, bit);
            }
        }
    }

    #[test]
    fn test_hamming84_flags_double_error_without_miscorrecting() {
        let word = FecScheme::Hamming84.encode_block(0b1011);
        let corrupted = word ^ 0b0110_0000;
        // double error: the data bits come back unchanged from the damaged word
        let decoded = FecScheme::Hamming84.decode_block(corrupted);
        assert_eq!(decoded, hamming_extract(corrupted >> 1, 7));
    }

    #[test]
    fn test_hamming_codewords_have_zero_syndrome() {
        for data in 0..16 {
            assert_eq!(hamming_syndrome(hamming_encode(data, 4, 7), 7), 0);
        }
        for data in 0..256 {
            assert_eq!(hamming_syndrome(hamming_encode(data, 8, 12), 12), 0);
            assert_eq!(hamming_extract(hamming_encode(data, 8, 12), 12), data);
        }
    }

    #[test]
    fn test_decode_length_mismatch() {
        let mut out = Vec::new();
        let result = FecScheme::Hamming74.decode(&[0u8; 3], 10, &mut out);
        assert!(matches!(result, Err(OfdmFrameError::FecError(_))));
    }

    #[test]
    fn test_ids_and_names() {
        for scheme in FecScheme::ALL {
            assert_eq!(FecScheme::from_id(scheme.id()), Some(scheme));
            assert_eq!(scheme.to_string().parse::<FecScheme>().unwrap(), scheme);
        }
        assert_eq!(FecScheme::from_id(31), None);
        assert!((FecScheme::Hamming128.rate() - 2.0 / 3.0).abs() < 1e-12);
    }
}
