use crate::sample::{cis, wrap_phase, Real};
use crate::subcarrier::{bin_of, signed_frequency, SubcarrierAllocation};
use log::trace;
use rustfft::num_complex::Complex;

// Carrier tracking loop (payload symbols only)
const PHASE_LOOP_GAIN: f64 = 0.4;
const FREQ_LOOP_GAIN: f64 = 0.05;
const MAX_PHASE_STEP: f64 = 0.3; // rad per symbol
const MAX_FREQ_STEP: f64 = 1e-3; // rad/sample per symbol

/// Channel state of the frame being received: per-bin complex gain, residual
/// timing offset, carrier frequency offset and the carrier phase accumulator
/// used to derotate incoming samples.
#[derive(Debug, Clone)]
pub struct ChannelEstimate<T: Real> {
    num_subcarriers: usize,
    gain: Vec<Complex<T>>,
    equalizer: Vec<Complex<T>>,
    measured: Vec<bool>,
    scratch: Vec<Complex<T>>,
    // Bins in frequency order and the positions in it holding a measurement
    order: Vec<usize>,
    measured_positions: Vec<usize>,
    timing_offset: T,
    cfo: T,
    phase: T,
}

impl<T: Real> ChannelEstimate<T> {
    pub fn new(num_subcarriers: usize) -> Self {
        Self {
            num_subcarriers,
            gain: vec![Complex::default(); num_subcarriers],
            equalizer: vec![Complex::default(); num_subcarriers],
            measured: vec![false; num_subcarriers],
            scratch: vec![Complex::default(); num_subcarriers],
            order: Vec::with_capacity(num_subcarriers),
            measured_positions: Vec::with_capacity(num_subcarriers),
            timing_offset: T::zero(),
            cfo: T::zero(),
            phase: T::zero(),
        }
    }

    /// Discard everything learned about the current frame.
    pub fn reset(&mut self) {
        self.gain.fill(Complex::default());
        self.equalizer.fill(Complex::default());
        self.measured.fill(false);
        self.timing_offset = T::zero();
        self.cfo = T::zero();
        self.phase = T::zero();
    }

    /// Carrier frequency offset in radians per sample.
    pub fn cfo(&self) -> T {
        self.cfo
    }

    /// Start derotating at `cfo` radians per sample. The most recent sample is
    /// the phase reference, so the next one is derotated by `cfo`.
    pub fn lock_cfo(&mut self, cfo: T) {
        self.cfo = cfo;
        self.phase = wrap_phase(cfo);
    }

    pub fn phase(&self) -> T {
        self.phase
    }

    /// Residual timing offset in samples, from the phase slope across bins.
    pub fn timing_offset(&self) -> T {
        self.timing_offset
    }

    /// Timing-deramped gain of `bin`.
    pub fn gain(&self, bin: usize) -> Complex<T> {
        self.gain[bin]
    }

    /// Relative confidence in bin `bin` after equalization: the squared channel
    /// gain, to which the post-equalization signal-to-noise ratio is proportional.
    pub fn reliability(&self, bin: usize) -> T {
        self.gain[bin].norm_sqr()
    }

    /// Remove the carrier offset from one incoming sample and advance the
    /// phase accumulator.
    #[inline]
    pub fn derotate(&mut self, sample: Complex<T>) -> Complex<T> {
        let out = sample * cis(-self.phase);
        self.phase = wrap_phase(self.phase + self.cfo);
        out
    }

    /// Estimate the channel from a received long training symbol `received`
    /// (frequency domain) and the known values `reference`.
    pub fn estimate(&mut self, received: &[Complex<T>], reference: &[Complex<T>], allocation: &SubcarrierAllocation) {
        let m = self.num_subcarriers;
        let two_pi = T::lit(2.0) * T::PI();
        let mf = T::lit(m as f64);

        for bin in 0..m {
            let known = allocation.is_enabled(bin) && reference[bin].norm_sqr() > T::zero();
            self.measured[bin] = known;
            self.gain[bin] = if known {
                received[bin] / reference[bin]
            } else {
                Complex::default()
            };
        }

        // Timing offset: mean phase step between adjacent measured bins
        let mut slope = Complex::<T>::default();
        let half = (m / 2) as isize;
        for f in -half..half - 1 {
            let a = bin_of(f, m);
            let b = bin_of(f + 1, m);
            if self.measured[a] && self.measured[b] {
                slope = slope + self.gain[b] * self.gain[a].conj();
            }
        }
        self.timing_offset = if slope.norm_sqr() > T::zero() {
            slope.arg() * mf / two_pi
        } else {
            T::zero()
        };

        for bin in 0..m {
            if self.measured[bin] {
                let f = T::lit(signed_frequency(bin, m) as f64);
                self.gain[bin] = self.gain[bin] * cis(-two_pi * f * self.timing_offset / mf);
            }
        }

        self.interpolate_missing(allocation);
        self.smooth(allocation);

        for bin in 0..m {
            self.equalizer[bin] = if allocation.is_enabled(bin) && self.gain[bin].norm_sqr() > T::zero() {
                let f = T::lit(signed_frequency(bin, m) as f64);
                let ramp = cis(two_pi * f * self.timing_offset / mf);
                Complex::new(T::one(), T::zero()) / (self.gain[bin] * ramp)
            } else {
                Complex::default()
            };
        }

        trace!(
            "channel estimate: timing offset {:.3} samples, cfo {:.5} rad/sample",
            self.timing_offset.as_f64(),
            self.cfo.as_f64()
        );
    }

    /// Linear interpolation over enabled bins without a measurement, between
    /// the nearest measured neighbours in frequency order. Bins outside the
    /// measured span take the nearest measurement.
    fn interpolate_missing(&mut self, allocation: &SubcarrierAllocation) {
        self.order.clear();
        self.order.extend(allocation.bins_by_frequency());
        self.measured_positions.clear();
        for (pos, &bin) in self.order.iter().enumerate() {
            if self.measured[bin] {
                self.measured_positions.push(pos);
            }
        }
        if self.measured_positions.is_empty() {
            return;
        }

        let (order, measured) = (&self.order, &self.measured_positions);
        for (pos, &bin) in order.iter().enumerate() {
            if !allocation.is_enabled(bin) || self.measured[bin] {
                continue;
            }
            let right = measured.partition_point(|&p| p < pos);
            let value = match (right.checked_sub(1), measured.get(right)) {
                (Some(l), Some(&r)) => {
                    let l = measured[l];
                    let w = T::lit((pos - l) as f64 / (r - l) as f64);
                    self.gain[order[l]] * (T::one() - w) + self.gain[order[r]] * w
                }
                (Some(l), None) => self.gain[order[measured[l]]],
                (None, Some(&r)) => self.gain[order[r]],
                (None, None) => Complex::default(),
            };
            self.gain[bin] = value;
        }
    }

    /// 3-tap (1/4, 1/2, 1/4) smoothing across adjacent enabled bins.
    fn smooth(&mut self, allocation: &SubcarrierAllocation) {
        let m = self.num_subcarriers;
        let quarter = T::lit(0.25);
        let half_w = T::lit(0.5);
        self.scratch.copy_from_slice(&self.gain);
        let raw = &self.scratch;
        for bin in 0..m {
            if !allocation.is_enabled(bin) {
                continue;
            }
            let f = signed_frequency(bin, m);
            let mut acc = raw[bin] * half_w;
            let mut weight = half_w;
            for neighbour in [f - 1, f + 1] {
                if neighbour < -((m / 2) as isize) || neighbour >= (m / 2) as isize {
                    continue;
                }
                let nb = bin_of(neighbour, m);
                if allocation.is_enabled(nb) {
                    acc = acc + raw[nb] * quarter;
                    weight = weight + quarter;
                }
            }
            self.gain[bin] = acc / weight;
        }
    }

    /// Equalize a received symbol in place: divide by the channel gain and
    /// remove the timing ramp. Null bins are zeroed.
    pub fn equalize(&self, symbol: &mut [Complex<T>]) {
        for (y, eq) in symbol.iter_mut().zip(self.equalizer.iter()) {
            *y = *y * *eq;
        }
    }

    /// Common phase error of an equalized symbol measured against the known
    /// pilot values.
    pub fn pilot_phase<I>(&self, symbol: &[Complex<T>], pilots: I) -> T
    where
        I: IntoIterator<Item = (usize, Complex<T>)>,
    {
        let acc = pilots
            .into_iter()
            .fold(Complex::<T>::default(), |acc, (bin, known)| acc + symbol[bin] * known.conj());
        if acc.norm_sqr() > T::zero() {
            acc.arg()
        } else {
            T::zero()
        }
    }

    /// Feed a measured common phase error back into the phase accumulator
    /// and the frequency estimate. Each correction is capped.
    pub fn track(&mut self, phase_error: T, symbol_len: usize) {
        let max_phase = T::lit(MAX_PHASE_STEP);
        let max_freq = T::lit(MAX_FREQ_STEP);
        let dphi = (T::lit(PHASE_LOOP_GAIN) * phase_error).max(-max_phase).min(max_phase);
        let dfreq = (T::lit(FREQ_LOOP_GAIN) * phase_error / T::lit(symbol_len as f64))
            .max(-max_freq)
            .min(max_freq);
        self.phase = wrap_phase(self.phase + dphi);
        self.cfo = self.cfo + dfreq;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subcarrier::SubcarrierType;
    use std::f64::consts::PI;

    fn reference(m: usize) -> Vec<Complex<f64>> {
        (0..m)
            .map(|k| if k % 3 == 0 { Complex::new(1.0, 0.0) } else { Complex::new(0.0, -1.0) })
            .collect()
    }

    fn received(alloc: &SubcarrierAllocation, reference: &[Complex<f64>], h: Complex<f64>, tau: f64) -> Vec<Complex<f64>> {
        let m = alloc.len();
        (0..m)
            .map(|k| {
                if !alloc.is_enabled(k) {
                    return Complex::default();
                }
                let f = signed_frequency(k, m) as f64;
                reference[k] * h * cis(2.0 * PI * f * tau / m as f64)
            })
            .collect()
    }

    #[test]
    fn test_flat_channel_with_timing_offset() {
        let alloc = SubcarrierAllocation::init_default(64).unwrap();
        let reference = reference(64);
        let h = Complex::new(0.3, -0.7);
        let y = received(&alloc, &reference, h, -1.6);

        let mut est = ChannelEstimate::<f64>::new(64);
        est.estimate(&y, &reference, &alloc);
        assert!((est.timing_offset() + 1.6).abs() < 1e-6);
        for bin in alloc.data_bins() {
            assert!((est.gain(bin) - h).norm() < 1e-6, "bin {}", bin);
        }

        let mut eq = y.clone();
        est.equalize(&mut eq);
        for bin in alloc.data_bins() {
            assert!((eq[bin] - reference[bin]).norm() < 1e-6);
        }
        assert_eq!(eq[0], Complex::default());
    }

    #[test]
    fn test_missing_bins_interpolated() {
        let m = 64;
        let alloc = SubcarrierAllocation::init_default(m).unwrap();
        let mut reference = reference(m);
        // no measurement on two data bins
        reference[5] = Complex::default();
        reference[6] = Complex::default();

        // gain varying linearly in frequency
        let y: Vec<Complex<f64>> = (0..m)
            .map(|k| {
                let f = signed_frequency(k, m) as f64;
                reference[k] * Complex::new(1.0 + 0.01 * f, 0.0)
            })
            .collect();

        let mut est = ChannelEstimate::<f64>::new(m);
        est.estimate(&y, &reference, &alloc);
        assert!((est.gain(5).re - 1.05).abs() < 1e-3);
        assert!((est.gain(6).re - 1.06).abs() < 1e-3);
        assert_eq!(alloc.role(5), SubcarrierType::Data);
    }

    #[test]
    fn test_repeated_estimates_reuse_buffers() {
        let m = 64;
        let alloc = SubcarrierAllocation::init_default(m).unwrap();
        let mut reference = reference(m);
        reference[9] = Complex::default();
        let mut est = ChannelEstimate::<f64>::new(m);
        let capacity = (est.order.capacity(), est.measured_positions.capacity());

        for (h, tau) in [(Complex::new(0.5, 0.5), 0.3), (Complex::new(-2.0, 0.1), -0.8)] {
            let y = received(&alloc, &reference, h, tau);
            est.estimate(&y, &reference, &alloc);
            assert!((est.gain(9) - h).norm() < 1e-6);
            assert!((est.reliability(9) - h.norm_sqr()).abs() < 1e-6);
        }
        assert_eq!((est.order.capacity(), est.measured_positions.capacity()), capacity);
        assert_eq!(est.reliability(0), 0.0);
    }

    #[test]
    fn test_pilot_phase() {
        let est = ChannelEstimate::<f64>::new(8);
        let theta = 0.4;
        let mut symbol = vec![Complex::default(); 8];
        symbol[1] = cis(theta);
        symbol[3] = -cis(theta);
        let pilots = [(1usize, Complex::new(1.0, 0.0)), (3usize, Complex::new(-1.0, 0.0))];
        assert!((est.pilot_phase(&symbol, pilots) - theta).abs() < 1e-12);
    }

    #[test]
    fn test_derotate_removes_cfo() {
        let mut est = ChannelEstimate::<f64>::new(64);
        est.lock_cfo(0.05);
        for n in 1..200 {
            let x = cis(0.05 * n as f64) * 2.0;
            let y = est.derotate(x);
            assert!((y - Complex::new(2.0, 0.0)).norm() < 1e-9);
        }
    }

    #[test]
    fn test_tracking_steps_are_bounded() {
        let mut est = ChannelEstimate::<f64>::new(64);
        est.track(3.0, 80);
        assert!((est.phase() - MAX_PHASE_STEP).abs() < 1e-12);
        assert!(est.cfo().abs() <= MAX_FREQ_STEP + 1e-15);
        est.track(-0.1, 80);
        assert!((est.phase() - (MAX_PHASE_STEP - 0.04)).abs() < 1e-12);
    }

    #[test]
    fn test_reset_clears_state() {
        let alloc = SubcarrierAllocation::init_default(64).unwrap();
        let reference = reference(64);
        let y = received(&alloc, &reference, Complex::new(1.0, 1.0), 0.5);
        let mut est = ChannelEstimate::<f64>::new(64);
        est.lock_cfo(0.01);
        est.estimate(&y, &reference, &alloc);
        est.reset();
        assert_eq!(est.cfo(), 0.0);
        assert_eq!(est.timing_offset(), 0.0);
        assert_eq!(est.gain(1), Complex::default());
    }
}
