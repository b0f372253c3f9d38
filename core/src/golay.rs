//! Extended Golay (24,12) block code: corrects up to three bit errors per
//! 24-bit codeword, or decodes soft input with a Chase search.

use std::sync::OnceLock;

/// Generator polynomial of the cyclic (23,12) Golay code:
/// x^11 + x^10 + x^6 + x^5 + x^4 + x^2 + 1
const GOLAY_POLY: u32 = 0xC75;

/// Least reliable positions tried in both polarities by [`decode_soft`].
const CHASE_BITS: usize = 4;

/// Remainder of a 23-bit polynomial modulo the generator.
fn poly_mod(mut v: u32) -> u32 {
    for i in (11..23).rev() {
        if v & (1 << i) != 0 {
            v ^= GOLAY_POLY << (i - 11);
        }
    }
    v
}

#[inline]
fn parity(v: u32) -> u32 {
    v.count_ones() & 1
}

/// Encode 12 data bits into a systematic 24-bit codeword
/// (`data << 12 | check << 1 | overall parity`).
pub fn encode_block(data: u16) -> u32 {
    let d = (data as u32) & 0xFFF;
    let c23 = (d << 11) | poly_mod(d << 11);
    (c23 << 1) | parity(c23)
}

fn syndrome(word: u32) -> usize {
    let word = word & 0xFF_FFFF;
    ((poly_mod(word >> 1) << 1) | parity(word)) as usize
}

/// Syndrome -> lowest-weight error pattern, built once for all patterns of
/// weight three or less.
fn syndrome_table() -> &'static [Option<u32>] {
    static TABLE: OnceLock<Vec<Option<u32>>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = vec![None; 1 << 12];
        table[0] = Some(0);
        for i in 0..24 {
            let e1 = 1u32 << i;
            table[syndrome(e1)].get_or_insert(e1);
            for j in (i + 1)..24 {
                let e2 = e1 | (1 << j);
                table[syndrome(e2)].get_or_insert(e2);
                for k in (j + 1)..24 {
                    let e3 = e2 | (1 << k);
                    table[syndrome(e3)].get_or_insert(e3);
                }
            }
        }
        table
    })
}

/// Decode a 24-bit codeword. Returns the 12 data bits and whether the word was
/// correctable; uncorrectable words return their systematic bits unchanged.
pub fn decode_block(word: u32) -> (u16, bool) {
    let word = word & 0xFF_FFFF;
    match syndrome_table()[syndrome(word)] {
        Some(error) => (((word ^ error) >> 12) as u16, true),
        None => ((word >> 12) as u16, false),
    }
}

/// Decode 24 soft bits (`soft[0]` is the most significant, positive favours
/// a one). Every combination of flips of the least reliable hard decisions
/// is decoded algebraically; the candidate codeword that disagrees with the
/// soft input by the least total confidence wins.
pub fn decode_soft(soft: &[f32]) -> (u16, bool) {
    let mut word = 0u32;
    let mut weakest = [(f32::INFINITY, 0u32); CHASE_BITS];
    for (i, &s) in soft.iter().take(24).enumerate() {
        let pos = 23 - i as u32;
        if s > 0.0 {
            word |= 1 << pos;
        }
        // keep the CHASE_BITS smallest magnitudes, sorted
        let r = s.abs();
        if r < weakest[CHASE_BITS - 1].0 {
            let mut j = CHASE_BITS - 1;
            while j > 0 && weakest[j - 1].0 > r {
                weakest[j] = weakest[j - 1];
                j -= 1;
            }
            weakest[j] = (r, pos);
        }
    }

    let table = syndrome_table();
    let mut best: Option<(f32, u32)> = None;
    for pattern in 0..1u32 << CHASE_BITS {
        let flips = (0..CHASE_BITS)
            .filter(|&b| (pattern >> b) & 1 == 1)
            .fold(0u32, |acc, b| acc | (1 << weakest[b].1));
        let trial = word ^ flips;
        let Some(error) = table[syndrome(trial)] else {
            continue;
        };
        let candidate = trial ^ error;
        let disagree = candidate ^ word;
        let cost: f32 = soft
            .iter()
            .take(24)
            .enumerate()
            .filter(|&(i, _)| (disagree >> (23 - i as u32)) & 1 == 1)
            .map(|(_, s)| s.abs())
            .sum();
        if best.map_or(true, |(c, _)| cost < c) {
            best = Some((cost, candidate));
        }
    }

    match best {
        Some((_, codeword)) => ((codeword >> 12) as u16, true),
        None => ((word >> 12) as u16, false),
    }
}
