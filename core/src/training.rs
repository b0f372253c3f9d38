//! Known training waveforms and pseudo-random sequences shared by the frame
//! generator and the frame synchronizer.
//!
//! Everything here is derived from fixed LFSR seeds, so both ends rebuild the
//! same references from the subcarrier allocation alone.

use crate::error::{OfdmFrameError, Result};
use crate::ofdm_cp::OfdmModulatorCp;
use crate::sample::Real;
use crate::subcarrier::SubcarrierAllocation;
use rustfft::num_complex::Complex;

// Taps for 32-bit LFSR: x^32 + x^31 + x^29 + x^1 + 1 (Galois configuration)
const LFSR_TAPS: u32 = 0xB400_0001;

const SHORT_TRAINING_SEED: u32 = 0x5EED_0501;
const LONG_TRAINING_SEED: u32 = 0x5EED_1A7E;
const PILOT_SEED: u32 = 0x0000_01FF;
const FILL_SEED: u32 = 0x00C0_FFEE;

/// Pseudo-random bit source.
#[derive(Debug, Clone)]
pub struct Lfsr {
    seed: u32,
    state: u32,
}

impl Lfsr {
    pub fn new(seed: u32) -> Self {
        // an all-zero register would lock up
        let seed = if seed == 0 { 1 } else { seed };
        Self { seed, state: seed }
    }

    pub fn next_bit(&mut self) -> bool {
        let out = self.state & 1;
        self.state >>= 1;
        if out != 0 {
            self.state ^= LFSR_TAPS;
        }
        out == 1
    }

    pub fn next_bits(&mut self, n: u32) -> u32 {
        (0..n).fold(0, |acc, _| (acc << 1) | self.next_bit() as u32)
    }

    /// Restart from the seed.
    pub fn reset(&mut self) {
        self.state = self.seed;
    }
}

/// Pilot polarity sequence, restarted at the start of every frame.
#[derive(Debug, Clone)]
pub struct PilotSequence {
    lfsr: Lfsr,
}

impl PilotSequence {
    pub fn new() -> Self {
        Self {
            lfsr: Lfsr::new(PILOT_SEED),
        }
    }

    pub fn reset(&mut self) {
        self.lfsr.reset();
    }

    /// Next pilot value, `+1` or `-1`.
    pub fn next_pilot<T: Real>(&mut self) -> Complex<T> {
        if self.lfsr.next_bit() {
            Complex::new(T::one(), T::zero())
        } else {
            Complex::new(-T::one(), T::zero())
        }
    }
}

impl Default for PilotSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Source of filler symbols for the unused data bins of a frame's last
/// header or payload symbol.
pub fn fill_sequence() -> Lfsr {
    Lfsr::new(FILL_SEED)
}

/// Period of the short training waveform for `m` subcarriers.
pub fn short_period(m: usize) -> usize {
    (m / 4).min(16)
}

fn qpsk<T: Real>(bits: u32) -> Complex<T> {
    let a = T::FRAC_1_SQRT_2();
    let re = if bits & 2 != 0 { -a } else { a };
    let im = if bits & 1 != 0 { -a } else { a };
    Complex::new(re, im)
}

/// Frequency- and time-domain training references.
///
/// The short sequence `S0` occupies only enabled bins that are multiples of
/// `M/L`, making its waveform periodic with period `L`. The long sequence `S1`
/// occupies every enabled bin. Both are scaled to unit average power.
#[derive(Debug, Clone)]
pub struct TrainingSequences<T: Real> {
    period: usize,
    num_short_bins: usize,
    short_freq: Vec<Complex<T>>,
    long_freq: Vec<Complex<T>>,
    short_time: Vec<Complex<T>>,
    long_time: Vec<Complex<T>>,
}

impl<T: Real> TrainingSequences<T> {
    pub fn new(allocation: &SubcarrierAllocation) -> Result<Self> {
        let m = allocation.len();
        let period = short_period(m);
        if period == 0 || m % period != 0 {
            return Err(OfdmFrameError::Configuration(format!(
                "{} subcarriers cannot carry a short training period",
                m
            )));
        }
        let spacing = m / period;

        let mut short_lfsr = Lfsr::new(SHORT_TRAINING_SEED);
        let mut long_lfsr = Lfsr::new(LONG_TRAINING_SEED);
        let mut short_freq = vec![Complex::default(); m];
        let mut long_freq = vec![Complex::default(); m];
        let mut num_short_bins = 0;

        for bin in 0..m {
            if !allocation.is_enabled(bin) {
                continue;
            }
            long_freq[bin] = qpsk(long_lfsr.next_bits(2));
            if bin % spacing == 0 {
                short_freq[bin] = qpsk(short_lfsr.next_bits(2));
                num_short_bins += 1;
            }
        }

        if num_short_bins == 0 {
            return Err(OfdmFrameError::Configuration(format!(
                "allocation enables no subcarrier on the short training grid (every {} bins)",
                spacing
            )));
        }

        let short_time = Self::synthesize(&short_freq, num_short_bins)?;
        let long_time = Self::synthesize(&long_freq, allocation.num_enabled())?;

        Ok(Self {
            period,
            num_short_bins,
            short_freq,
            long_freq,
            short_time,
            long_time,
        })
    }

    fn synthesize(freq: &[Complex<T>], occupied: usize) -> Result<Vec<Complex<T>>> {
        let gain = T::one() / T::lit(occupied as f64).sqrt();
        let mut modulator = OfdmModulatorCp::new(freq.len(), 0, gain)?;
        let mut time = vec![Complex::default(); freq.len()];
        modulator.modulate(freq, &mut time)?;
        Ok(time)
    }

    /// Short training period L.
    pub fn period(&self) -> usize {
        self.period
    }

    pub fn num_short_bins(&self) -> usize {
        self.num_short_bins
    }

    pub fn short_freq(&self) -> &[Complex<T>] {
        &self.short_freq
    }

    /// Known long training values, indexed by bin (zero on null bins).
    pub fn long_freq(&self) -> &[Complex<T>] {
        &self.long_freq
    }

    /// One period (L samples) of the short training waveform.
    pub fn short_period_samples(&self) -> &[Complex<T>] {
        &self.short_time[..self.period]
    }

    /// Long training symbol body (M samples, no cyclic prefix).
    pub fn long_time(&self) -> &[Complex<T>] {
        &self.long_time
    }

    /// Short training sample `offset` samples after the start of the frame.
    /// The first symbol body starts after `cp_len` samples; the waveform is
    /// continuous across symbol boundaries.
    pub fn short_sample(&self, offset: usize, cp_len: usize) -> Complex<T> {
        let phase = (offset as isize - cp_len as isize).rem_euclid(self.period as isize);
        self.short_time[phase as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lfsr_restarts() {
        let mut lfsr = Lfsr::new(0x1234);
        let first: Vec<bool> = (0..40).map(|_| lfsr.next_bit()).collect();
        lfsr.reset();
        let again: Vec<bool> = (0..40).map(|_| lfsr.next_bit()).collect();
        assert_eq!(first, again);
        assert!(first.iter().any(|&b| b) && first.iter().any(|&b| !b));
    }

    #[test]
    fn test_short_waveform_is_periodic() {
        for m in [32usize, 64, 256] {
            let alloc = SubcarrierAllocation::init_default(m).unwrap();
            let training = TrainingSequences::<f64>::new(&alloc).unwrap();
            let l = training.period();
            assert_eq!(l, short_period(m));
            for n in 0..m - l {
                let a = training.short_time[n];
                let b = training.short_time[n + l];
                assert!((a - b).norm() < 1e-9, "M={} n={}", m, n);
            }
        }
    }

    #[test]
    fn test_training_has_unit_power() {
        let alloc = SubcarrierAllocation::init_default(64).unwrap();
        let training = TrainingSequences::<f64>::new(&alloc).unwrap();
        let power = |x: &[Complex<f64>]| x.iter().map(|s| s.norm_sqr()).sum::<f64>() / x.len() as f64;
        assert!((power(training.long_time()) - 1.0).abs() < 1e-9);
        assert!((power(&training.short_time) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_long_training_covers_enabled_bins_only() {
        let alloc = SubcarrierAllocation::init_default(64).unwrap();
        let training = TrainingSequences::<f32>::new(&alloc).unwrap();
        for bin in 0..64 {
            let occupied = training.long_freq()[bin].norm() > 0.5;
            assert_eq!(occupied, alloc.is_enabled(bin));
        }
        assert!(training.num_short_bins() > 0);
        assert!(training
            .short_freq()
            .iter()
            .enumerate()
            .all(|(bin, v)| v.norm() == 0.0 || bin % 4 == 0));
    }

    #[test]
    fn test_short_sample_is_continuous() {
        let alloc = SubcarrierAllocation::init_default(64).unwrap();
        let training = TrainingSequences::<f64>::new(&alloc).unwrap();
        // body of the first symbol starts with the first period sample
        assert_eq!(training.short_sample(16, 16), training.short_period_samples()[0]);
        assert_eq!(training.short_sample(0, 16), training.short_sample(16, 16));
        assert_eq!(training.short_sample(5, 3), training.short_period_samples()[2]);
    }

    #[test]
    fn test_pilots_are_antipodal() {
        let mut pilots = PilotSequence::new();
        let seq: Vec<Complex<f32>> = (0..32).map(|_| pilots.next_pilot()).collect();
        assert!(seq.iter().all(|p| (p.re.abs() - 1.0).abs() < 1e-6 && p.im == 0.0));
        pilots.reset();
        let again: Vec<Complex<f32>> = (0..32).map(|_| pilots.next_pilot()).collect();
        assert_eq!(seq, again);
    }
}
