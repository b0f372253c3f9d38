//! Bit-level packing helpers: MSB-first bit streams, byte to modem symbol
//! packing, soft bits and the data whitening scrambler.
//!
//! A soft bit is an `f32` whose sign is the decision (positive for a one) and
//! whose magnitude is the confidence; zero is an erasure.

/// Appends bit fields to a byte vector, most significant bit first.
pub struct BitWriter<'a> {
    out: &'a mut Vec<u8>,
    acc: u8,
    filled: u32,
}

impl<'a> BitWriter<'a> {
    pub fn new(out: &'a mut Vec<u8>) -> Self {
        Self { out, acc: 0, filled: 0 }
    }

    #[inline]
    pub fn push_bit(&mut self, bit: bool) {
        self.acc = (self.acc << 1) | bit as u8;
        self.filled += 1;
        if self.filled == 8 {
            self.out.push(self.acc);
            self.acc = 0;
            self.filled = 0;
        }
    }

    /// Push the low `n` bits of `value`, MSB first.
    pub fn push_bits(&mut self, value: u32, n: u32) {
        for i in (0..n).rev() {
            self.push_bit((value >> i) & 1 == 1);
        }
    }

    /// Flush a partial byte (zero padded). Returns without effect when aligned.
    pub fn finish(mut self) {
        if self.filled > 0 {
            let pad = 8 - self.filled;
            self.acc <<= pad;
            self.out.push(self.acc);
            self.filled = 0;
        }
    }
}

/// Reads bit fields from a byte slice, MSB first. Reads past the end yield zeros.
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    pub fn read_bit(&mut self) -> bool {
        let byte = self.pos / 8;
        let bit = if byte < self.data.len() {
            (self.data[byte] >> (7 - self.pos % 8)) & 1 == 1
        } else {
            false
        };
        self.pos += 1;
        bit
    }

    pub fn read_bits(&mut self, n: u32) -> u32 {
        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | self.read_bit() as u32;
        }
        value
    }

    pub fn bits_remaining(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.pos)
    }
}

/// Number of `bps`-bit symbols needed to carry `num_bytes` bytes.
pub fn num_symbols(num_bytes: usize, bps: usize) -> usize {
    (8 * num_bytes).div_ceil(bps)
}

/// Repack bytes into `bps`-bit symbols (one symbol per output byte).
pub fn pack_symbols(input: &[u8], bps: usize, out: &mut Vec<u8>) {
    out.clear();
    let n = num_symbols(input.len(), bps);
    let mut reader = BitReader::new(input);
    out.extend((0..n).map(|_| reader.read_bits(bps as u32) as u8));
}

/// Expand bytes into full-confidence soft bits (`+1.0` for a one, `-1.0` for a zero).
pub fn bytes_to_soft(bytes: &[u8], out: &mut Vec<f32>) {
    out.clear();
    out.extend(
        bytes
            .iter()
            .flat_map(|&b| (0..8).rev().map(move |i| if (b >> i) & 1 == 1 { 1.0 } else { -1.0 })),
    );
}

/// Hard decisions on soft bits, appended to `out` MSB first. A trailing
/// partial byte is zero padded.
pub fn soft_to_bytes(soft: &[f32], out: &mut Vec<u8>) {
    let mut writer = BitWriter::new(out);
    for &s in soft {
        writer.push_bit(s > 0.0);
    }
    writer.finish();
}

/// Whitening sequence seed and taps (x^9 + x^5 + 1).
const SCRAMBLER_SEED: u16 = 0x1ff;
const SCRAMBLER_TAP_A: u16 = 8;
const SCRAMBLER_TAP_B: u16 = 4;

fn whitening_masks() -> impl Iterator<Item = u8> {
    let mut state = SCRAMBLER_SEED;
    std::iter::repeat_with(move || {
        let mut mask = 0u8;
        for _ in 0..8 {
            let bit = ((state >> SCRAMBLER_TAP_A) ^ (state >> SCRAMBLER_TAP_B)) & 1;
            state = ((state << 1) | bit) & 0x1ff;
            mask = (mask << 1) | bit as u8;
        }
        mask
    })
}

/// XOR `data` in place with the fixed whitening sequence. Applying it twice
/// restores the input.
pub fn scramble(data: &mut [u8]) {
    for (byte, mask) in data.iter_mut().zip(whitening_masks()) {
        *byte ^= mask;
    }
}

/// [`scramble`] for soft bits: flips the sign wherever the sequence has a one.
pub fn scramble_soft(soft: &mut [f32]) {
    for (chunk, mask) in soft.chunks_mut(8).zip(whitening_masks()) {
        for (i, s) in chunk.iter_mut().enumerate() {
            if (mask >> (7 - i)) & 1 == 1 {
                *s = -*s;
            }
        }
    }
}
