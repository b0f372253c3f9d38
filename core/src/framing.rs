use crate::bitpack::{scramble, scramble_soft};
use crate::crc::CrcScheme;
use crate::error::{OfdmFrameError, Result};
use crate::fec::FecScheme;
use crate::modem::Modulation;
use crate::trellis::ViterbiDecoder;
use crate::{
    DEFAULT_PAYLOAD_LEN, DEFAULT_PREAMBLE_SYMBOLS, HEADER_BITS, HEADER_BLOCK_LEN, HEADER_ENCODED_LEN, HEADER_LEN,
    HEADER_USER_LEN, MIN_PREAMBLE_SYMBOLS, PROTOCOL_VERSION,
};

/// Header protection: fixed regardless of the payload configuration.
const HEADER_CHECK: CrcScheme = CrcScheme::Crc32;
const HEADER_FEC: FecScheme = FecScheme::Golay2412;

/// Per-frame transmission parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameProperties {
    /// Short training symbols plus the one long training symbol.
    pub num_preamble_symbols: usize,
    pub check: CrcScheme,
    pub fec_inner: FecScheme,
    pub fec_outer: FecScheme,
    pub modulation: Modulation,
    /// Largest payload `assemble` accepts.
    pub payload_len: usize,
}

impl Default for FrameProperties {
    fn default() -> Self {
        Self {
            num_preamble_symbols: DEFAULT_PREAMBLE_SYMBOLS,
            check: CrcScheme::Crc32,
            fec_inner: FecScheme::None,
            fec_outer: FecScheme::None,
            modulation: Modulation::QPSK,
            payload_len: DEFAULT_PAYLOAD_LEN,
        }
    }
}

impl FrameProperties {
    pub fn validate(&self) -> Result<()> {
        if self.num_preamble_symbols < MIN_PREAMBLE_SYMBOLS {
            return Err(OfdmFrameError::Configuration(format!(
                "at least {} preamble symbols are required, got {}",
                MIN_PREAMBLE_SYMBOLS, self.num_preamble_symbols
            )));
        }
        if self.payload_len > u16::MAX as usize {
            return Err(OfdmFrameError::Configuration(format!(
                "payload length {} does not fit the 16-bit header field",
                self.payload_len
            )));
        }
        Ok(())
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub user: [u8; HEADER_USER_LEN],
    pub payload_len: u16,
    pub modulation: Modulation,
    pub check: CrcScheme,
    pub fec_inner: FecScheme,
    pub fec_outer: FecScheme,
}

pub struct HeaderEncoder;
pub struct HeaderDecoder;

impl HeaderEncoder {
    /// Serialize the header and append its CRC-32 (18 bytes).
    ///
    /// Layout: user bytes (8), protocol version, payload length (u16 BE),
    /// modulation byte, `crc << 5 | fec_inner`, `fec_outer`, CRC-32.
    pub fn encode_block(header: &FrameHeader) -> Vec<u8> {
        let mut block = Vec::with_capacity(HEADER_BLOCK_LEN);
        block.extend_from_slice(&header.user);
        block.push(PROTOCOL_VERSION);
        block.extend_from_slice(&header.payload_len.to_be_bytes());
        block.push(header.modulation.to_byte());
        block.push((header.check.id() << 5) | header.fec_inner.id());
        block.push(header.fec_outer.id());
        debug_assert_eq!(block.len(), HEADER_LEN);
        HEADER_CHECK.append(&mut block);
        block
    }

    /// Golay-encode and whiten an 18-byte block into the 36 bytes carried on air.
    pub fn protect(block: &[u8], out: &mut Vec<u8>) {
        HEADER_FEC.encode(block, out);
        scramble(out);
    }

    pub fn encode(header: &FrameHeader) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_ENCODED_LEN);
        Self::protect(&Self::encode_block(header), &mut out);
        out
    }
}

impl HeaderDecoder {
    /// Undo whitening and Golay coding of the 36 received bytes.
    pub fn recover(encoded: &[u8], block: &mut Vec<u8>) -> Result<()> {
        if encoded.len() != HEADER_ENCODED_LEN {
            return Err(OfdmFrameError::InvalidInputSize);
        }
        let mut descrambled = [0u8; HEADER_ENCODED_LEN];
        descrambled.copy_from_slice(encoded);
        scramble(&mut descrambled);
        HEADER_FEC.decode(&descrambled, HEADER_BLOCK_LEN, block)
    }

    /// [`recover`](Self::recover) from the 288 received soft bits.
    pub fn recover_soft(soft: &[f32], block: &mut Vec<u8>) -> Result<()> {
        if soft.len() != HEADER_BITS {
            return Err(OfdmFrameError::InvalidInputSize);
        }
        let mut descrambled = [0f32; HEADER_BITS];
        descrambled.copy_from_slice(soft);
        scramble_soft(&mut descrambled);
        // unused by Golay, so it never allocates
        HEADER_FEC.decode_soft(&descrambled, HEADER_BLOCK_LEN, &mut ViterbiDecoder::new(), block)
    }

    /// Verify the CRC and parse an 18-byte block.
    pub fn decode_block(block: &[u8]) -> Result<FrameHeader> {
        if block.len() != HEADER_BLOCK_LEN {
            return Err(OfdmFrameError::InvalidInputSize);
        }
        if !HEADER_CHECK.validate(block) {
            return Err(OfdmFrameError::HeaderCrcMismatch);
        }

        let fields = &block[HEADER_USER_LEN..HEADER_LEN];
        if fields[0] != PROTOCOL_VERSION {
            return Err(OfdmFrameError::ProtocolMismatch {
                expected: PROTOCOL_VERSION,
                found: fields[0],
            });
        }

        let payload_len = u16::from_be_bytes([fields[1], fields[2]]);
        let modulation = Modulation::from_byte(fields[3])
            .ok_or_else(|| OfdmFrameError::UnknownScheme(format!("modulation byte {:#04x}", fields[3])))?;
        let check = CrcScheme::from_id(fields[4] >> 5)
            .ok_or_else(|| OfdmFrameError::UnknownScheme(format!("crc id {}", fields[4] >> 5)))?;
        let fec_inner = FecScheme::from_id(fields[4] & 0x1f)
            .ok_or_else(|| OfdmFrameError::UnknownScheme(format!("inner fec id {}", fields[4] & 0x1f)))?;
        let fec_outer = FecScheme::from_id(fields[5])
            .ok_or_else(|| OfdmFrameError::UnknownScheme(format!("outer fec id {}", fields[5])))?;

        let mut user = [0u8; HEADER_USER_LEN];
        user.copy_from_slice(&block[..HEADER_USER_LEN]);

        Ok(FrameHeader {
            user,
            payload_len,
            modulation,
            check,
            fec_inner,
            fec_outer,
        })
    }

    pub fn decode(encoded: &[u8]) -> Result<FrameHeader> {
        let mut block = Vec::with_capacity(HEADER_BLOCK_LEN);
        Self::recover(encoded, &mut block)?;
        Self::decode_block(&block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::ModulationScheme;

    fn sample_header() -> FrameHeader {
        FrameHeader {
            user: *b"OFDMflex",
            payload_len: 1200,
            modulation: Modulation::new(ModulationScheme::Qam, 4).unwrap(),
            check: CrcScheme::Crc16,
            fec_inner: FecScheme::ConvR2K7,
            fec_outer: FecScheme::Hamming128,
        }
    }

    #[test]
    fn test_header_encode_decode() {
        let header = sample_header();
        let encoded = HeaderEncoder::encode(&header);
        assert_eq!(encoded.len(), HEADER_ENCODED_LEN);
        assert_eq!(HeaderDecoder::decode(&encoded).unwrap(), header);
    }

    #[test]
    fn test_block_layout() {
        let block = HeaderEncoder::encode_block(&sample_header());
        assert_eq!(block.len(), HEADER_BLOCK_LEN);
        assert_eq!(&block[..8], b"OFDMflex");
        assert_eq!(block[8], PROTOCOL_VERSION);
        assert_eq!(u16::from_be_bytes([block[9], block[10]]), 1200);
        assert_eq!(block[11], 0x14);
        assert_eq!(block[12], (3 << 5) | 7);
        assert_eq!(block[13], 5);
    }

    #[test]
    fn test_header_crc_validation() {
        let mut block = HeaderEncoder::encode_block(&sample_header());
        block[3] ^= 0x10;
        match HeaderDecoder::decode_block(&block) {
            Err(OfdmFrameError::HeaderCrcMismatch) => {} // Expected
            other => panic!("Expected HeaderCrcMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_protocol_version_checked() {
        let mut block = HeaderEncoder::encode_block(&sample_header());
        block.truncate(HEADER_LEN);
        block[8] = PROTOCOL_VERSION + 1;
        HEADER_CHECK.append(&mut block);
        assert!(matches!(
            HeaderDecoder::decode_block(&block),
            Err(OfdmFrameError::ProtocolMismatch { found, .. }) if found == PROTOCOL_VERSION + 1
        ));
    }

    #[test]
    fn test_unknown_scheme_rejected() {
        let mut block = HeaderEncoder::encode_block(&sample_header());
        block.truncate(HEADER_LEN);
        block[13] = 30;
        HEADER_CHECK.append(&mut block);
        assert!(matches!(
            HeaderDecoder::decode_block(&block),
            Err(OfdmFrameError::UnknownScheme(_))
        ));
    }

    #[test]
    fn test_channel_bit_errors_corrected() {
        let header = sample_header();
        let mut encoded = HeaderEncoder::encode(&header);
        // one error in each of several Golay codewords
        for byte in [0usize, 7, 13, 20, 35] {
            encoded[byte] ^= 0x04;
        }
        assert_eq!(HeaderDecoder::decode(&encoded).unwrap(), header);
    }

    #[test]
    fn test_soft_header_survives_weak_errors() {
        let header = sample_header();
        let encoded = HeaderEncoder::encode(&header);
        let mut soft = Vec::new();
        crate::bitpack::bytes_to_soft(&encoded, &mut soft);
        // five unreliable errors in the first codeword, more than Golay
        // corrects from hard decisions
        for i in [0usize, 3, 8, 14, 21] {
            soft[i] *= -0.1;
        }
        let mut hard = Vec::new();
        crate::bitpack::soft_to_bytes(&soft, &mut hard);
        assert!(HeaderDecoder::decode(&hard).is_err());

        let mut block = Vec::new();
        HeaderDecoder::recover_soft(&soft, &mut block).unwrap();
        assert_eq!(HeaderDecoder::decode_block(&block).unwrap(), header);
        assert!(matches!(
            HeaderDecoder::recover_soft(&soft[..100], &mut block),
            Err(OfdmFrameError::InvalidInputSize)
        ));
    }

    #[test]
    fn test_properties_validation() {
        assert!(FrameProperties::default().validate().is_ok());
        let short = FrameProperties {
            num_preamble_symbols: 2,
            ..FrameProperties::default()
        };
        assert!(short.validate().is_err());
        let huge = FrameProperties {
            payload_len: 70_000,
            ..FrameProperties::default()
        };
        assert!(huge.validate().is_err());
    }
}
