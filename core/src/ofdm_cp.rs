use crate::error::{OfdmFrameError, Result};
use crate::sample::Real;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// OFDM with Cyclic Prefix (CP) for ISI immunity
///
/// The last `cp_len` samples of every symbol are prepended to it, turning the
/// channel's linear convolution into a circular one:
///
/// [CP: last G samples] [OFDM symbol: M samples] [Next symbol...]
///
/// The transform is unnormalised; the modulator scales its output by a fixed
/// gain so that a fully loaded symbol has unit average power.
pub struct OfdmModulatorCp<T: Real> {
    ifft: Arc<dyn Fft<T>>,
    num_subcarriers: usize,
    cp_len: usize,
    gain: T,
    buffer: Vec<Complex<T>>,
    scratch: Vec<Complex<T>>,
}

/// Forward transform of one CP-stripped symbol.
pub struct OfdmDemodulatorCp<T: Real> {
    fft: Arc<dyn Fft<T>>,
    num_subcarriers: usize,
    scratch: Vec<Complex<T>>,
}

impl<T: Real> OfdmModulatorCp<T> {
    /// `gain` multiplies every output sample, typically `1/sqrt(enabled bins)`.
    pub fn new(num_subcarriers: usize, cp_len: usize, gain: T) -> Result<Self> {
        if cp_len >= num_subcarriers {
            return Err(OfdmFrameError::Configuration(format!(
                "cyclic prefix length {} must be less than {} subcarriers",
                cp_len, num_subcarriers
            )));
        }
        let ifft = FftPlanner::new().plan_fft_inverse(num_subcarriers);
        let scratch = vec![Complex::default(); ifft.get_inplace_scratch_len()];
        Ok(Self {
            ifft,
            num_subcarriers,
            cp_len,
            gain,
            buffer: vec![Complex::default(); num_subcarriers],
            scratch,
        })
    }

    /// Transform `freq` (M bins) and write `[CP][symbol]` into the first M+G
    /// samples of `out`. Returns the number of samples written.
    pub fn modulate(&mut self, freq: &[Complex<T>], out: &mut [Complex<T>]) -> Result<usize> {
        let m = self.num_subcarriers;
        let total = self.total_samples_per_symbol();
        if freq.len() != m || out.len() < total {
            return Err(OfdmFrameError::InvalidInputSize);
        }

        self.buffer.copy_from_slice(freq);
        self.ifft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let (cp, body) = out[..total].split_at_mut(self.cp_len);
        for (dst, &src) in body.iter_mut().zip(self.buffer.iter()) {
            *dst = src * self.gain;
        }
        cp.copy_from_slice(&body[m - self.cp_len..]);
        Ok(total)
    }

    pub fn cp_len(&self) -> usize {
        self.cp_len
    }

    pub fn total_samples_per_symbol(&self) -> usize {
        self.cp_len + self.num_subcarriers
    }
}

impl<T: Real> OfdmDemodulatorCp<T> {
    pub fn new(num_subcarriers: usize) -> Self {
        let fft = FftPlanner::new().plan_fft_forward(num_subcarriers);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        Self {
            fft,
            num_subcarriers,
            scratch,
        }
    }

    /// In-place forward transform of exactly M time samples.
    pub fn demodulate(&mut self, symbol: &mut [Complex<T>]) -> Result<()> {
        if symbol.len() != self.num_subcarriers {
            return Err(OfdmFrameError::InvalidInputSize);
        }
        self.fft.process_with_scratch(symbol, &mut self.scratch);
        Ok(())
    }

    pub fn num_subcarriers(&self) -> usize {
        self.num_subcarriers
    }
}
