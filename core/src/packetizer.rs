//! Payload protection pipeline.
//!
//! Encode: message + check key -> outer FEC -> inner FEC -> whitening.
//! Decode runs the same stages in reverse on soft bits and reports whether
//! the check passed. The outer code sees soft bits only when there is no
//! inner code.

use crate::bitpack::{bytes_to_soft, scramble, scramble_soft};
use crate::crc::CrcScheme;
use crate::error::Result;
use crate::fec::FecScheme;
use crate::trellis::ViterbiDecoder;

#[derive(Debug, Clone)]
pub struct Packetizer {
    msg_len: usize,
    check: CrcScheme,
    fec_inner: FecScheme,
    fec_outer: FecScheme,
    // Length after the check key, after the outer code, after the inner code
    stage_lens: [usize; 3],
    buf_a: Vec<u8>,
    buf_b: Vec<u8>,
    soft: Vec<f32>,
    viterbi: ViterbiDecoder,
}

impl Packetizer {
    pub fn new(msg_len: usize, check: CrcScheme, fec_inner: FecScheme, fec_outer: FecScheme) -> Self {
        let with_key = msg_len + check.len();
        let outer = fec_outer.encoded_len(with_key);
        let inner = fec_inner.encoded_len(outer);
        Self {
            msg_len,
            check,
            fec_inner,
            fec_outer,
            stage_lens: [with_key, outer, inner],
            buf_a: Vec::new(),
            buf_b: Vec::new(),
            soft: Vec::new(),
            viterbi: ViterbiDecoder::new(),
        }
    }

    /// Re-plan for a new configuration, keeping allocated buffers.
    pub fn recreate(&mut self, msg_len: usize, check: CrcScheme, fec_inner: FecScheme, fec_outer: FecScheme) {
        let buf_a = std::mem::take(&mut self.buf_a);
        let buf_b = std::mem::take(&mut self.buf_b);
        let soft = std::mem::take(&mut self.soft);
        let viterbi = std::mem::take(&mut self.viterbi);
        *self = Self {
            buf_a,
            buf_b,
            soft,
            viterbi,
            ..Self::new(msg_len, check, fec_inner, fec_outer)
        };
    }

    pub fn msg_len(&self) -> usize {
        self.msg_len
    }

    /// Bytes on air.
    pub fn encoded_len(&self) -> usize {
        self.stage_lens[2]
    }

    pub fn encode(&mut self, msg: &[u8], out: &mut Vec<u8>) {
        debug_assert_eq!(msg.len(), self.msg_len);
        self.buf_a.clear();
        self.buf_a.extend_from_slice(msg);
        self.check.append(&mut self.buf_a);
        self.fec_outer.encode(&self.buf_a, &mut self.buf_b);
        self.fec_inner.encode(&self.buf_b, out);
        scramble(out);
    }

    /// Decode `encoded` into `out` (best effort even when the check fails).
    /// Returns whether the check key matched.
    pub fn decode(&mut self, encoded: &[u8], out: &mut Vec<u8>) -> Result<bool> {
        bytes_to_soft(encoded, &mut self.soft);
        self.recover(out)
    }

    /// [`decode`](Self::decode) from `8 * encoded_len()` soft bits.
    pub fn decode_soft(&mut self, soft: &[f32], out: &mut Vec<u8>) -> Result<bool> {
        self.soft.clear();
        self.soft.extend_from_slice(soft);
        self.recover(out)
    }

    fn recover(&mut self, out: &mut Vec<u8>) -> Result<bool> {
        let [with_key, outer, _] = self.stage_lens;
        scramble_soft(&mut self.soft);
        if self.fec_inner == FecScheme::None {
            self.fec_outer
                .decode_soft(&self.soft, with_key, &mut self.viterbi, &mut self.buf_a)?;
        } else {
            self.fec_inner
                .decode_soft(&self.soft, outer, &mut self.viterbi, &mut self.buf_b)?;
            self.fec_outer
                .decode_with(&self.buf_b, with_key, &mut self.viterbi, &mut self.buf_a)?;
        }
        let valid = self.check.validate(&self.buf_a);
        out.clear();
        out.extend_from_slice(&self.buf_a[..self.msg_len]);
        Ok(valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lengths() {
        let p = Packetizer::new(100, CrcScheme::Crc32, FecScheme::Hamming84, FecScheme::Repeat3);
        assert_eq!(p.msg_len(), 100);
        assert_eq!(p.encoded_len(), 104 * 3 * 2);

        let plain = Packetizer::new(0, CrcScheme::None, FecScheme::None, FecScheme::None);
        assert_eq!(plain.encoded_len(), 0);
    }

    #[test]
    fn test_encode_decode_with_errors() {
        let msg: Vec<u8> = (0..57u8).map(|i| i ^ 0x6b).collect();
        let mut p = Packetizer::new(msg.len(), CrcScheme::Crc24, FecScheme::ConvR2K7, FecScheme::Golay2412);
        let mut encoded = Vec::new();
        p.encode(&msg, &mut encoded);
        assert_eq!(encoded.len(), p.encoded_len());

        encoded[10] ^= 0x01;
        encoded[90] ^= 0x80;

        let mut decoded = Vec::new();
        assert!(p.decode(&encoded, &mut decoded).unwrap());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_unprotected_error_fails_check() {
        let msg = b"no forward error correction here".to_vec();
        let mut p = Packetizer::new(msg.len(), CrcScheme::Crc16, FecScheme::None, FecScheme::None);
        let mut encoded = Vec::new();
        p.encode(&msg, &mut encoded);
        encoded[4] ^= 0x20;

        let mut decoded = Vec::new();
        assert!(!p.decode(&encoded, &mut decoded).unwrap());
        // best-effort bytes are still delivered
        assert_eq!(decoded.len(), msg.len());
        assert_ne!(decoded, msg);
    }

    #[test]
    fn test_soft_decode_weighs_confidence() {
        let msg: Vec<u8> = (0..40u8).map(|i| i.wrapping_mul(7)).collect();
        let mut p = Packetizer::new(msg.len(), CrcScheme::Crc16, FecScheme::Hamming74, FecScheme::None);
        let mut encoded = Vec::new();
        p.encode(&msg, &mut encoded);

        let mut soft = Vec::new();
        bytes_to_soft(&encoded, &mut soft);
        // two weak errors inside one Hamming(7,4) codeword
        for i in [15usize, 17] {
            soft[i] *= -0.1;
        }
        let mut hard_bytes = Vec::new();
        crate::bitpack::soft_to_bytes(&soft, &mut hard_bytes);

        let mut decoded = Vec::new();
        assert!(!p.decode(&hard_bytes, &mut decoded).unwrap());
        assert!(p.decode_soft(&soft, &mut decoded).unwrap());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_soft_outer_code_without_inner() {
        let msg = b"outer only".to_vec();
        let mut p = Packetizer::new(msg.len(), CrcScheme::Crc8, FecScheme::None, FecScheme::Repeat3);
        let mut encoded = Vec::new();
        p.encode(&msg, &mut encoded);
        let mut soft = Vec::new();
        bytes_to_soft(&encoded, &mut soft);
        // two of three copies flipped, weakly: the strong copy wins
        soft[0] *= -0.2;
        soft[1] *= -0.2;
        let mut decoded = Vec::new();
        assert!(p.decode_soft(&soft, &mut decoded).unwrap());
        assert_eq!(decoded, msg);
        assert!(p.decode_soft(&soft[1..], &mut decoded).is_err());
    }

    #[test]
    fn test_recreate_changes_plan() {
        let mut p = Packetizer::new(10, CrcScheme::None, FecScheme::None, FecScheme::None);
        p.recreate(10, CrcScheme::Crc8, FecScheme::Repeat5, FecScheme::None);
        assert_eq!(p.encoded_len(), 55);
    }
}
