//! Linear constellations: Gray-coded PSK and square QAM, unit average energy,
//! hard and max-log soft demodulation.

use crate::error::{OfdmFrameError, Result};
use crate::sample::{cis, Real};
use rustfft::num_complex::Complex;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModulationScheme {
    Psk,
    Qam,
}

/// A constellation: scheme plus depth in bits per symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Modulation {
    scheme: ModulationScheme,
    depth: u8,
}

#[inline]
fn gray_encode(i: u32) -> u32 {
    i ^ (i >> 1)
}

#[inline]
fn gray_decode(mut g: u32) -> u32 {
    let mut i = g;
    while g > 1 {
        g >>= 1;
        i ^= g;
    }
    i
}

impl Modulation {
    pub const BPSK: Modulation = Modulation {
        scheme: ModulationScheme::Psk,
        depth: 1,
    };
    pub const QPSK: Modulation = Modulation {
        scheme: ModulationScheme::Psk,
        depth: 2,
    };

    /// PSK supports depths 1..=4, QAM the even depths 2..=8.
    pub fn new(scheme: ModulationScheme, depth: u8) -> Result<Self> {
        let supported = match scheme {
            ModulationScheme::Psk => (1..=4).contains(&depth),
            ModulationScheme::Qam => matches!(depth, 2 | 4 | 6 | 8),
        };
        if !supported {
            return Err(OfdmFrameError::Configuration(format!(
                "unsupported modulation {:?} with depth {}",
                scheme, depth
            )));
        }
        Ok(Self { scheme, depth })
    }

    pub fn scheme(&self) -> ModulationScheme {
        self.scheme
    }

    /// Bits per symbol.
    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn bits_per_symbol(&self) -> usize {
        self.depth as usize
    }

    pub fn num_points(&self) -> u32 {
        1 << self.depth
    }

    /// Header byte: scheme in the high nibble, depth in the low nibble.
    pub fn to_byte(&self) -> u8 {
        let scheme = match self.scheme {
            ModulationScheme::Psk => 0,
            ModulationScheme::Qam => 1,
        };
        (scheme << 4) | self.depth
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        let scheme = match byte >> 4 {
            0 => ModulationScheme::Psk,
            1 => ModulationScheme::Qam,
            _ => return None,
        };
        Self::new(scheme, byte & 0x0f).ok()
    }

    /// Map a `depth`-bit symbol to its constellation point.
    pub fn modulate<T: Real>(&self, symbol: u8) -> Complex<T> {
        let symbol = symbol as u32 & (self.num_points() - 1);
        match self.scheme {
            ModulationScheme::Psk => {
                let index = gray_decode(symbol);
                let step = T::lit(2.0) * T::PI() / T::lit(self.num_points() as f64);
                cis(step * T::lit(index as f64))
            }
            ModulationScheme::Qam => {
                let half = (self.depth / 2) as u32;
                let side = 1u32 << half;
                let level = |bits: u32| T::lit(2.0 * gray_decode(bits) as f64 - (side - 1) as f64);
                let scale = T::one() / self.qam_norm::<T>();
                Complex::new(level(symbol >> half) * scale, level(symbol & (side - 1)) * scale)
            }
        }
    }

    /// Nearest-point hard decision.
    pub fn demodulate<T: Real>(&self, sample: Complex<T>) -> u8 {
        match self.scheme {
            ModulationScheme::Psk => {
                let points = self.num_points();
                let step = T::lit(2.0) * T::PI() / T::lit(points as f64);
                let index = (sample.arg() / step).round().to_i64().unwrap_or(0);
                gray_encode(index.rem_euclid(points as i64) as u32) as u8
            }
            ModulationScheme::Qam => {
                let half = (self.depth / 2) as u32;
                let side = 1u32 << half;
                let norm = self.qam_norm::<T>();
                let slice = |x: T| {
                    let pos = ((x * norm + T::lit((side - 1) as f64)) / T::lit(2.0)).round();
                    let clamped = pos.max(T::zero()).min(T::lit((side - 1) as f64));
                    gray_encode(clamped.to_u32().unwrap_or(0))
                };
                ((slice(sample.re) << half) | slice(sample.im)) as u8
            }
        }
    }

    /// Max-log soft bits of `sample`, most significant first, appended to
    /// `out`. Each value is the squared distance to the nearest point with
    /// that bit clear minus the distance to the nearest point with it set,
    /// times `weight`; positive favours a one.
    pub fn demodulate_soft<T: Real>(&self, sample: Complex<T>, weight: f32, out: &mut Vec<f32>) {
        let depth = self.bits_per_symbol();
        let mut nearest = [[f32::INFINITY; 2]; 8];
        for symbol in 0..self.num_points() {
            let point: Complex<T> = self.modulate(symbol as u8);
            let d = (sample - point).norm_sqr().as_f64() as f32;
            for (bit, pair) in nearest[..depth].iter_mut().enumerate() {
                let b = ((symbol >> (depth - 1 - bit)) & 1) as usize;
                pair[b] = pair[b].min(d);
            }
        }
        out.extend(nearest[..depth].iter().map(|&[zero, one]| (zero - one) * weight));
    }

    // sqrt of the mean energy of the unnormalised square grid
    fn qam_norm<T: Real>(&self) -> T {
        let side = (1u32 << (self.depth / 2)) as f64;
        T::lit((2.0 * (side * side - 1.0) / 3.0).sqrt())
    }
}

impl Default for Modulation {
    fn default() -> Self {
        Self::QPSK
    }
}

impl fmt::Display for Modulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.scheme, self.depth) {
            (ModulationScheme::Psk, 1) => f.write_str("bpsk"),
            (ModulationScheme::Psk, 2) => f.write_str("qpsk"),
            (ModulationScheme::Psk, _) => write!(f, "psk{}", self.num_points()),
            (ModulationScheme::Qam, _) => write!(f, "qam{}", self.num_points()),
        }
    }
}

impl FromStr for Modulation {
    type Err = OfdmFrameError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        let parsed = match lower.as_str() {
            "bpsk" => Some(Self::BPSK),
            "qpsk" => Some(Self::QPSK),
            other => {
                let (scheme, points) = if let Some(rest) = other.strip_prefix("psk") {
                    (ModulationScheme::Psk, rest)
                } else if let Some(rest) = other.strip_prefix("qam") {
                    (ModulationScheme::Qam, rest)
                } else {
                    return Err(OfdmFrameError::Configuration(format!("unknown modulation '{}'", s)));
                };
                points
                    .parse::<u32>()
                    .ok()
                    .filter(|p| p.is_power_of_two() && *p >= 2)
                    .and_then(|p| Self::new(scheme, p.trailing_zeros() as u8).ok())
            }
        };
        parsed.ok_or_else(|| OfdmFrameError::Configuration(format!("unknown modulation '{}'", s)))
    }
}
