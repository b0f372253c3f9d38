#![allow(dead_code)]

use ofdmflex_core::{Complex, FrameGenerator, FrameListener, FrameStats, Real};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Route `log` output of the library through the test harness (`RUST_LOG=debug`).
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One listener callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub header: Vec<u8>,
    pub header_valid: bool,
    pub payload: Vec<u8>,
    pub payload_valid: bool,
    pub stats: FrameStats,
}

#[derive(Debug, Default)]
pub struct Collector {
    pub frames: Vec<Received>,
}

impl FrameListener for Collector {
    fn on_frame(&mut self, header: &[u8], header_valid: bool, payload: &[u8], payload_valid: bool, stats: &FrameStats) {
        self.frames.push(Received {
            header: header.to_vec(),
            header_valid,
            payload: payload.to_vec(),
            payload_valid,
            stats: stats.clone(),
        });
    }
}

/// Write every symbol of the assembled frame.
pub fn render<T: Real>(gen: &mut FrameGenerator<T>) -> Vec<Complex<T>> {
    let mut samples = Vec::new();
    let mut symbol = vec![Complex::default(); gen.symbol_len()];
    loop {
        let (n, last) = gen.write_symbol(&mut symbol).expect("frame is assembled");
        samples.extend_from_slice(&symbol[..n]);
        if last {
            return samples;
        }
    }
}

/// Complex white Gaussian noise of total power 10^(-snr_db/10) (signal power is 1).
pub fn noise(len: usize, snr_db: f32, rng: &mut StdRng) -> Vec<Complex<f32>> {
    let sigma = (10f32.powf(-snr_db / 10.0) / 2.0).sqrt();
    let normal = Normal::new(0.0, sigma).unwrap();
    (0..len)
        .map(|_| Complex::new(normal.sample(rng), normal.sample(rng)))
        .collect()
}

/// Apply a carrier offset of `cfo` rad/sample with a random starting phase,
/// then add noise.
pub fn impair(samples: &[Complex<f32>], cfo: f32, snr_db: f32, rng: &mut StdRng) -> Vec<Complex<f32>> {
    let phase0: f32 = rng.gen_range(0.0..std::f32::consts::TAU);
    let awgn = noise(samples.len(), snr_db, rng);
    samples
        .iter()
        .zip(awgn)
        .enumerate()
        .map(|(n, (&x, w))| x * Complex::from_polar(1.0, phase0 + cfo * n as f32) + w)
        .collect()
}

/// Half length of the interpolation filter used by [`fractional_delay`].
const DELAY_TAPS: isize = 24;

/// Delay `samples` by `delay` samples (any non-negative real) with a
/// Hann-windowed sinc interpolator. The output is long enough to hold the
/// whole delayed signal.
pub fn fractional_delay(samples: &[Complex<f32>], delay: f32) -> Vec<Complex<f32>> {
    use std::f32::consts::PI;
    let kernel = |t: f32| {
        if t.abs() >= (DELAY_TAPS + 1) as f32 {
            return 0.0;
        }
        let sinc = if t.abs() < 1e-6 { 1.0 } else { (PI * t).sin() / (PI * t) };
        sinc * 0.5 * (1.0 + (PI * t / (DELAY_TAPS + 1) as f32).cos())
    };
    let len = samples.len() + delay.ceil() as usize + DELAY_TAPS as usize;
    (0..len)
        .map(|n| {
            let center = n as f32 - delay;
            let first = (center.floor() as isize - DELAY_TAPS).max(0);
            let last = (center.ceil() as isize + DELAY_TAPS).min(samples.len() as isize - 1);
            (first..=last).fold(Complex::default(), |acc, j| {
                acc + samples[j as usize] * kernel(center - j as f32)
            })
        })
        .collect()
}
