use crate::bitpack::{BitReader, BitWriter};
use crate::error::{OfdmFrameError, Result};

/// Convolutional code rate 1/2 with constraint length 7
/// Generator polynomials: G1 = 133 (octal) = 1011011 (binary)
///                        G2 = 171 (octal) = 1111001 (binary)
///
/// 64 trellis states; every message is terminated with K-1 zero bits so the
/// encoder returns to state 0.
const G1: u8 = 0b1011011;
const G2: u8 = 0b1111001;
const NUM_STATES: usize = 64;
const TAIL_BITS: usize = 6;

/// Output pair for `input` entering a register holding `state`.
#[inline]
fn branch_output(state: u8, input: u8) -> u8 {
    let combined = ((input << 6) | state) & 0x7F;
    (parity(combined & G1) << 1) | parity(combined & G2)
}

#[inline]
fn parity(byte: u8) -> u8 {
    (byte.count_ones() & 1) as u8
}

/// Encoded length in bytes of an `n`-byte message (16 bits per byte plus a
/// 12-bit tail, zero padded to a byte boundary).
pub fn encoded_len(n: usize) -> usize {
    (2 * (8 * n + TAIL_BITS)).div_ceil(8)
}

#[derive(Debug, Clone, Default)]
pub struct ConvolutionalEncoder {
    // Shift register state (constraint length - 1 = 6 bits)
    state: u8,
}

impl ConvolutionalEncoder {
    pub fn new() -> Self {
        Self { state: 0 }
    }

    fn encode_bit(&mut self, input: u8, writer: &mut BitWriter<'_>) {
        let out = branch_output(self.state, input);
        writer.push_bits(out as u32, 2);
        self.state = (self.state >> 1) | (input << 5);
    }

    /// Encode `data` and the termination tail, appending to `out`.
    pub fn encode(&mut self, data: &[u8], out: &mut Vec<u8>) {
        self.state = 0;
        let mut writer = BitWriter::new(out);
        let mut reader = BitReader::new(data);
        for _ in 0..data.len() * 8 {
            let bit = reader.read_bit() as u8;
            self.encode_bit(bit, &mut writer);
        }
        for _ in 0..TAIL_BITS {
            self.encode_bit(0, &mut writer);
        }
        writer.finish();
    }
}

/// Viterbi decoder with correlation branch metrics and full-length traceback.
///
/// Hard input is decoded as full-confidence soft input, which makes the
/// metric equivalent to Hamming distance. Survivor memory is one `u64` per
/// trellis step, 64 bytes per message byte (512 KiB for an 8192-byte
/// message); buffers are allocated on first use and kept for later frames.
#[derive(Debug, Clone, Default)]
pub struct ViterbiDecoder {
    metrics: Vec<f32>,
    next_metrics: Vec<f32>,
    // One survivor bit per state per trellis step
    decisions: Vec<u64>,
}

impl ViterbiDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_len(available_bits: usize, n: usize) -> Result<()> {
        if available_bits != 8 * encoded_len(n) {
            return Err(OfdmFrameError::FecError(format!(
                "convolutional decoder expected {} bits, got {}",
                8 * encoded_len(n),
                available_bits
            )));
        }
        Ok(())
    }

    /// Decode an encoded buffer back into `n` message bytes, appending to `out`.
    pub fn decode(&mut self, encoded: &[u8], n: usize, out: &mut Vec<u8>) -> Result<()> {
        Self::check_len(8 * encoded.len(), n)?;
        let mut reader = BitReader::new(encoded);
        let mut next = || if reader.read_bit() { 1.0f32 } else { -1.0 };
        self.run(n, |_| [next(), next()], out);
        Ok(())
    }

    /// Decode soft bits (positive favours a one) into `n` message bytes,
    /// appending to `out`.
    pub fn decode_soft(&mut self, soft: &[f32], n: usize, out: &mut Vec<u8>) -> Result<()> {
        Self::check_len(soft.len(), n)?;
        self.run(n, |step| [soft[2 * step], soft[2 * step + 1]], out);
        Ok(())
    }

    fn run<F>(&mut self, n: usize, mut received: F, out: &mut Vec<u8>)
    where
        F: FnMut(usize) -> [f32; 2],
    {
        let steps = 8 * n + TAIL_BITS;
        self.metrics.clear();
        self.metrics.resize(NUM_STATES, UNREACHABLE);
        self.metrics[0] = 0.0;
        self.next_metrics.resize(NUM_STATES, UNREACHABLE);
        self.decisions.clear();
        self.decisions.reserve(steps);

        for step in 0..steps {
            let [s1, s2] = received(step);
            let mut survivors = 0u64;
            let mut step_best = UNREACHABLE;

            for next in 0..NUM_STATES {
                let input = (next >> 5) as u8;
                let base = (next << 1) & 0x3F;

                let mut best = f32::NEG_INFINITY;
                let mut best_low = 0;
                for low in 0..2 {
                    let prev = base | low;
                    let code = branch_output(prev as u8, input);
                    let branch = signed(code >> 1, s1) + signed(code & 1, s2);
                    let metric = self.metrics[prev] + branch;
                    if metric > best {
                        best = metric;
                        best_low = low;
                    }
                }

                self.next_metrics[next] = best;
                step_best = step_best.max(best);
                survivors |= (best_low as u64) << next;
            }

            // keep metrics near zero so f32 precision does not degrade on long frames
            for metric in self.next_metrics.iter_mut() {
                *metric = (*metric - step_best).max(UNREACHABLE);
            }
            std::mem::swap(&mut self.metrics, &mut self.next_metrics);
            self.decisions.push(survivors);
        }

        // Terminated code: trace back from state 0, writing message bits in place
        let start = out.len();
        out.resize(start + n, 0);
        let mut state = 0usize;
        for (step, &survivors) in self.decisions.iter().enumerate().rev() {
            if step < 8 * n && state >> 5 == 1 {
                out[start + step / 8] |= 0x80 >> (step % 8);
            }
            let low = ((survivors >> state) & 1) as usize;
            state = ((state << 1) & 0x3F) | low;
        }
    }
}

/// Metric of states no path has reached yet.
const UNREACHABLE: f32 = -1.0e9;

/// Correlation of a code bit with a soft value.
#[inline]
fn signed(bit: u8, soft: f32) -> f32 {
    if bit == 1 {
        soft
    } else {
        -soft
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        ConvolutionalEncoder::new().encode(data, &mut out);
        out
    }

    #[test]
    fn test_convolutional_encode_length() {
        let encoded = encode(&[0xFF]);
        // 8 bits * 2 = 16, plus 6 termination bits * 2 = 12 -> 28 bits
        assert_eq!(encoded.len(), 4);
        assert_eq!(encoded_len(1), 4);
        assert_eq!(encoded_len(10), 22);
    }

    #[test]
    fn test_all_zero_input_encodes_to_zero() {
        assert!(encode(&[0u8; 5]).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_viterbi_clean_round_trip() {
        let data = b"Trellis!";
        let encoded = encode(data);
        let mut decoded = Vec::new();
        ViterbiDecoder::new().decode(&encoded, data.len(), &mut decoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_viterbi_corrects_scattered_errors() {
        let data: Vec<u8> = (0..32u8).map(|i| i.wrapping_mul(37) ^ 0xA5).collect();
        let mut encoded = encode(&data);
        // Isolated single-bit errors well apart from each other
        for bit in (5..encoded.len() * 8 - 8).step_by(41) {
            encoded[bit / 8] ^= 0x80 >> (bit % 8);
        }
        let mut decoded = Vec::new();
        ViterbiDecoder::new().decode(&encoded, data.len(), &mut decoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_viterbi_rejects_wrong_length() {
        let mut decoded = Vec::new();
        let result = ViterbiDecoder::new().decode(&[0u8; 3], 1, &mut decoded);
        assert!(matches!(result, Err(OfdmFrameError::FecError(_))));
    }

    #[test]
    fn test_soft_decoding_uses_confidence() {
        let data: Vec<u8> = (0..24u8).map(|i| i.wrapping_mul(53) ^ 0x3c).collect();
        let mut neighbour = data.clone();
        neighbour[6] ^= 0x04;
        let sent = encode(&data);
        let other = encode(&neighbour);
        let differing: Vec<usize> = (0..sent.len() * 8)
            .filter(|&i| (sent[i / 8] ^ other[i / 8]) & (0x80 >> (i % 8)) != 0)
            .collect();
        assert_eq!(differing.len(), 10);

        // six of the ten bits separating the two codewords arrive flipped but
        // unreliable: hard decisions sit closer to the wrong codeword
        let mut soft = Vec::new();
        crate::bitpack::bytes_to_soft(&sent, &mut soft);
        for &i in &differing[..6] {
            soft[i] *= -0.05;
        }
        let mut hard_input = Vec::new();
        crate::bitpack::soft_to_bytes(&soft, &mut hard_input);

        let mut decoder = ViterbiDecoder::new();
        let mut hard = Vec::new();
        decoder.decode(&hard_input, data.len(), &mut hard).unwrap();
        assert_ne!(hard, data);

        let mut decoded = Vec::new();
        decoder.decode_soft(&soft, data.len(), &mut decoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_longest_payload_keeps_one_survivor_word_per_step() {
        let data: Vec<u8> = (0..crate::DEFAULT_MAX_PAYLOAD_LEN).map(|i| (i * 31 % 251) as u8).collect();
        let mut encoded = encode(&data);
        for bit in (17..encoded.len() * 8).step_by(97) {
            encoded[bit / 8] ^= 0x80 >> (bit % 8);
        }
        let mut decoder = ViterbiDecoder::new();
        let mut decoded = Vec::new();
        decoder.decode(&encoded, data.len(), &mut decoded).unwrap();
        assert_eq!(decoded, data);
        assert_eq!(decoder.decisions.len(), 8 * data.len() + TAIL_BITS);

        // a shorter frame reuses the same storage
        let capacity = decoder.decisions.capacity();
        decoded.clear();
        decoder.decode(&encode(&data[..100]), 100, &mut decoded).unwrap();
        assert_eq!(decoded, &data[..100]);
        assert_eq!(decoder.decisions.capacity(), capacity);
    }

    #[test]
    fn test_decoder_is_reusable() {
        let mut decoder = ViterbiDecoder::new();
        for data in [&b"first"[..], &b"second message"[..], &b""[..]] {
            let mut decoded = Vec::new();
            decoder.decode(&encode(data), data.len(), &mut decoded).unwrap();
            assert_eq!(decoded, data);
        }
    }
}
