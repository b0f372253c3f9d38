//! Frame synchronizer: detection, carrier recovery, channel estimation and
//! decoding of frames embedded in a continuous sample stream.
//!
//! Samples are consumed one at a time, so the outcome never depends on how the
//! caller chunks its input. Every detected frame whose header survives the
//! header stage is reported to a [`FrameListener`]; frames with an invalid
//! header are reported too, with `header_valid = false` and no payload.

use crate::bitpack::num_symbols;
use crate::channel::ChannelEstimate;
use crate::crc::CrcScheme;
use crate::error::{OfdmFrameError, Result};
use crate::fec::FecScheme;
use crate::framing::{FrameHeader, HeaderDecoder};
use crate::modem::Modulation;
use crate::ofdm_cp::OfdmDemodulatorCp;
use crate::packetizer::Packetizer;
use crate::sample::{cis, Real};
use crate::subcarrier::SubcarrierAllocation;
use crate::training::{PilotSequence, TrainingSequences};
use crate::{
    validate_dimensions, DEFAULT_DETECT_THRESHOLD, DEFAULT_LONG_TRAINING_THRESHOLD, DEFAULT_MAX_PAYLOAD_LEN,
    DEFAULT_PREAMBLE_SYMBOLS, HEADER_BITS, HEADER_BLOCK_LEN, HEADER_USER_LEN,
    MIN_PREAMBLE_SYMBOLS,
};
use log::{debug, trace};
use rustfft::num_complex::Complex;

/// Samples the long training peak is held before it is accepted.
const LONG_PEAK_HOLD: usize = 3;
/// Symbol windows start this many samples into the cyclic prefix.
const MAX_TIMING_BACKOFF: usize = 2;
/// Floor for power ratios before taking logarithms.
const MIN_EVM: f64 = 1e-12;

/// Receiver tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncConfig {
    /// Normalized lag-L autocorrelation needed to declare a detection.
    pub detect_threshold: f64,
    /// Normalized long-training correlation needed to lock symbol timing.
    pub long_threshold: f64,
    /// Must match the transmitter.
    pub num_preamble_symbols: usize,
    /// Headers announcing longer payloads are rejected.
    pub max_payload_len: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            detect_threshold: DEFAULT_DETECT_THRESHOLD,
            long_threshold: DEFAULT_LONG_TRAINING_THRESHOLD,
            num_preamble_symbols: DEFAULT_PREAMBLE_SYMBOLS,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("detect_threshold", self.detect_threshold),
            ("long_threshold", self.long_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(OfdmFrameError::Configuration(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.num_preamble_symbols < MIN_PREAMBLE_SYMBOLS {
            return Err(OfdmFrameError::Configuration(format!(
                "at least {} preamble symbols are required, got {}",
                MIN_PREAMBLE_SYMBOLS, self.num_preamble_symbols
            )));
        }
        Ok(())
    }
}

/// Measurements attached to a received frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    pub frame_detected: bool,
    pub header_valid: bool,
    pub payload_valid: bool,
    /// From the error vector magnitude of the header symbols.
    pub estimated_snr_db: f64,
    /// Received power of the long training symbol.
    pub rssi_db: f64,
    pub bytes_received: usize,
    /// Carrier frequency offset at the end of the frame, radians per sample.
    pub cfo: f64,
    /// Residual timing offset in samples.
    pub timing_offset: f64,
    // Payload configuration announced by a valid header
    pub modulation: Option<Modulation>,
    pub check: Option<CrcScheme>,
    pub fec_inner: Option<FecScheme>,
    pub fec_outer: Option<FecScheme>,
    pub num_header_symbols: usize,
    pub num_payload_symbols: usize,
}

/// Running totals since construction or the last `reset_data_stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameDataStats {
    pub num_frames_detected: usize,
    pub num_headers_valid: usize,
    pub num_payloads_valid: usize,
    pub num_bytes_received: usize,
}

/// Receives decoded frames. Any `FnMut(&[u8], bool, &[u8], bool, &FrameStats)`
/// closure is a listener.
pub trait FrameListener {
    /// `header` holds the 8 user bytes (best effort when `header_valid` is
    /// false); `payload` is empty unless the header was valid.
    fn on_frame(&mut self, header: &[u8], header_valid: bool, payload: &[u8], payload_valid: bool, stats: &FrameStats);
}

impl<F> FrameListener for F
where
    F: FnMut(&[u8], bool, &[u8], bool, &FrameStats),
{
    fn on_frame(&mut self, header: &[u8], header_valid: bool, payload: &[u8], payload_valid: bool, stats: &FrameStats) {
        self(header, header_valid, payload, payload_valid, stats)
    }
}

/// Receiver state. `elapsed` counts samples since detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    SeekPreamble,
    TrainingShort { elapsed: usize },
    TrainingLong { elapsed: usize },
    Header { symbol: usize },
    Payload { symbol: usize },
    /// Transient: frame state is cleared before the next sample.
    Reset,
}

pub struct FrameSynchronizer<L: FrameListener, T: Real> {
    num_subcarriers: usize,
    cp_len: usize,
    allocation: SubcarrierAllocation,
    config: SyncConfig,
    training: TrainingSequences<T>,
    demodulator: OfdmDemodulatorCp<T>,
    channel: ChannelEstimate<T>,
    pilots: PilotSequence,
    packetizer: Packetizer,
    listener: L,
    state: SyncState,

    // Sample history: raw input and carrier-derotated copies share one index
    raw: Vec<Complex<T>>,
    rx: Vec<Complex<T>>,
    pos: usize,
    sample_index: u64,
    window_energy: T,

    // Short training detector: running sums over the last M samples, split
    // into the newest M - L and the oldest M - L
    period: usize,
    lag_corr: Complex<T>,
    energy_now: T,
    energy_lagged: T,
    silent_run: usize,
    short_ref: Vec<Complex<T>>,
    timing_power: Vec<T>,

    // Long training search
    long_ref_energy: T,
    long_residue: usize,
    long_best: Option<T>,
    long_best_index: u64,
    long_hold: usize,
    backoff: usize,
    s1: Vec<Complex<T>>,

    // Symbol reception
    countdown: usize,
    freq: Vec<Complex<T>>,
    num_header_symbols: usize,
    header_soft: Vec<f32>,
    header_block: Vec<u8>,
    header_user: [u8; HEADER_USER_LEN],
    evm_sum: f64,
    evm_count: usize,
    header: Option<FrameHeader>,
    num_payload_symbols: usize,
    num_payload_mod_symbols: usize,
    payload_soft: Vec<f32>,
    payload: Vec<u8>,

    stats: FrameStats,
    data_stats: FrameDataStats,
}

impl<L: FrameListener, T: Real> FrameSynchronizer<L, T> {
    /// `allocation = None` selects the default allocation for `num_subcarriers`.
    pub fn new(
        num_subcarriers: usize,
        cp_len: usize,
        allocation: Option<SubcarrierAllocation>,
        listener: L,
    ) -> Result<Self> {
        Self::with_config(num_subcarriers, cp_len, allocation, listener, SyncConfig::default())
    }

    pub fn with_config(
        num_subcarriers: usize,
        cp_len: usize,
        allocation: Option<SubcarrierAllocation>,
        listener: L,
        config: SyncConfig,
    ) -> Result<Self> {
        validate_dimensions(num_subcarriers, cp_len)?;
        let allocation = match allocation {
            Some(a) => {
                SubcarrierAllocation::validate(a.roles(), num_subcarriers)?;
                a
            }
            None => SubcarrierAllocation::init_default(num_subcarriers)?,
        };
        config.validate()?;

        let training = TrainingSequences::new(&allocation)?;
        let short_ref: Vec<Complex<T>> = training.short_period_samples().iter().map(|s| s.conj()).collect();
        let long_ref_energy = energy(training.long_time());
        let period = training.period();
        let history = num_subcarriers + cp_len + MAX_TIMING_BACKOFF;

        Ok(Self {
            num_subcarriers,
            cp_len,
            num_header_symbols: HEADER_BITS.div_ceil(allocation.num_data()),
            allocation,
            config,
            training,
            demodulator: OfdmDemodulatorCp::new(num_subcarriers),
            channel: ChannelEstimate::new(num_subcarriers),
            pilots: PilotSequence::new(),
            packetizer: Packetizer::new(0, CrcScheme::None, FecScheme::None, FecScheme::None),
            listener,
            state: SyncState::SeekPreamble,
            raw: vec![Complex::default(); history],
            rx: vec![Complex::default(); history],
            pos: 0,
            sample_index: 0,
            window_energy: T::zero(),
            period,
            lag_corr: Complex::default(),
            energy_now: T::zero(),
            energy_lagged: T::zero(),
            silent_run: 0,
            short_ref,
            timing_power: vec![T::zero(); period],
            long_ref_energy,
            long_residue: 0,
            long_best: None,
            long_best_index: 0,
            long_hold: 0,
            backoff: cp_len.min(MAX_TIMING_BACKOFF),
            s1: vec![Complex::default(); num_subcarriers],
            countdown: 0,
            freq: vec![Complex::default(); num_subcarriers],
            header_soft: Vec::with_capacity(HEADER_BITS),
            header_block: Vec::with_capacity(HEADER_BLOCK_LEN),
            header_user: [0; HEADER_USER_LEN],
            evm_sum: 0.0,
            evm_count: 0,
            header: None,
            num_payload_symbols: 0,
            num_payload_mod_symbols: 0,
            payload_soft: Vec::new(),
            payload: Vec::new(),
            stats: FrameStats::default(),
            data_stats: FrameDataStats::default(),
        })
    }

    /// Process a block of samples. Frames completed inside the block are
    /// delivered to the listener before this returns.
    pub fn execute(&mut self, samples: &[Complex<T>]) {
        for &sample in samples {
            self.step(sample);
        }
    }

    /// Forget all history and any partially received frame.
    pub fn reset(&mut self) {
        self.reset_frame();
        self.raw.fill(Complex::default());
        self.rx.fill(Complex::default());
        self.pos = 0;
        self.sample_index = 0;
        self.clear_window_sums();
    }

    /// True between preamble detection and the end of the frame.
    pub fn is_frame_open(&self) -> bool {
        !matches!(self.state, SyncState::SeekPreamble | SyncState::Reset)
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn allocation(&self) -> &SubcarrierAllocation {
        &self.allocation
    }

    pub fn data_stats(&self) -> FrameDataStats {
        self.data_stats
    }

    pub fn reset_data_stats(&mut self) {
        self.data_stats = FrameDataStats::default();
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    pub fn into_listener(self) -> L {
        self.listener
    }

    fn symbol_len(&self) -> usize {
        self.num_subcarriers + self.cp_len
    }

    /// History index of the sample received `age` samples ago.
    #[inline]
    fn ring(&self, age: usize) -> usize {
        let len = self.raw.len();
        (self.pos + len - 1 - age) % len
    }

    fn step(&mut self, sample: Complex<T>) {
        self.push_sample(sample);

        let result = match self.state {
            SyncState::SeekPreamble => {
                self.seek_preamble();
                Ok(())
            }
            SyncState::TrainingShort { elapsed } => {
                self.training_short(elapsed + 1);
                Ok(())
            }
            SyncState::TrainingLong { elapsed } => self.training_long(elapsed + 1),
            SyncState::Header { symbol } => self.receive_header(symbol),
            SyncState::Payload { symbol } => self.receive_payload(symbol),
            SyncState::Reset => Ok(()),
        };
        if let Err(e) = result {
            debug!("dropping frame at sample {}: {}", self.sample_index, e);
            self.state = SyncState::Reset;
        }
        if self.state == SyncState::Reset {
            self.reset_frame();
        }
        self.sample_index += 1;
    }

    /// Store the sample and slide the detector sums by one sample.
    fn push_sample(&mut self, sample: Complex<T>) {
        self.raw[self.pos] = sample;
        self.rx[self.pos] = self.channel.derotate(sample);
        self.pos = (self.pos + 1) % self.raw.len();

        let m = self.num_subcarriers;
        if sample == Complex::default() {
            self.silent_run += 1;
        } else {
            self.silent_run = 0;
        }
        if self.silent_run >= m {
            // rounding residue must not outlive the signal
            self.clear_window_sums();
            return;
        }
        if (self.sample_index + 1) % m as u64 == 0 {
            // exact recomputation keeps rounding from accumulating
            self.recompute_window_sums();
            return;
        }

        let period = self.period;
        let span = m - period;
        let lagged = self.raw[self.ring(period)];
        let mid = self.raw[self.ring(span)];
        let oldest = self.raw[self.ring(m)];
        self.lag_corr = self.lag_corr + sample * lagged.conj() - mid * oldest.conj();
        self.energy_now = (self.energy_now + sample.norm_sqr() - mid.norm_sqr()).max(T::zero());
        self.energy_lagged = (self.energy_lagged + lagged.norm_sqr() - oldest.norm_sqr()).max(T::zero());
        self.window_energy = (self.window_energy + sample.norm_sqr() - oldest.norm_sqr()).max(T::zero());
    }

    fn recompute_window_sums(&mut self) {
        let m = self.num_subcarriers;
        let period = self.period;
        self.clear_window_sums();
        for age in 0..m {
            let x = self.raw[self.ring(age)];
            self.window_energy = self.window_energy + x.norm_sqr();
            if age < m - period {
                self.energy_now = self.energy_now + x.norm_sqr();
                self.lag_corr = self.lag_corr + x * self.raw[self.ring(age + period)].conj();
            }
            if age >= period {
                self.energy_lagged = self.energy_lagged + x.norm_sqr();
            }
        }
    }

    fn clear_window_sums(&mut self) {
        self.lag_corr = Complex::default();
        self.energy_now = T::zero();
        self.energy_lagged = T::zero();
        self.window_energy = T::zero();
    }

    /// Periodicity of the last M samples: squared lag-L autocorrelation over
    /// the energies of both halves of each product, in [0, 1]. Neither a
    /// carrier offset nor a fractional timing offset changes it.
    fn detection_metric(&self) -> T {
        let denom = self.energy_now * self.energy_lagged;
        if denom > T::zero() {
            (self.lag_corr.norm_sqr() / denom).min(T::one())
        } else {
            T::zero()
        }
    }

    fn seek_preamble(&mut self) {
        let metric = self.detection_metric();
        if metric.as_f64() <= self.config.detect_threshold {
            return;
        }
        trace!(
            "short training detected at sample {} (metric {:.3})",
            self.sample_index,
            metric.as_f64()
        );
        self.state = SyncState::TrainingShort { elapsed: 0 };
    }

    /// Wait until the autocorrelation window lies inside the short training,
    /// then take the carrier offset from its phase and the symbol timing from
    /// the matched filter.
    fn training_short(&mut self, elapsed: usize) {
        if elapsed < self.num_subcarriers {
            self.state = SyncState::TrainingShort { elapsed };
            return;
        }

        let period = self.period;
        let cfo = self.lag_corr.arg() / T::lit(period as f64);
        self.lock_carrier(cfo);

        let (best, delta) = self.short_timing();
        let peak = self.sample_index as f64 - best as f64 + delta;

        // the long training body starts a whole number of periods after the
        // sample following the peak
        let offset = 1 + (self.config.num_preamble_symbols - 1) * self.symbol_len();
        self.long_residue = ((peak.round() as i64) + offset as i64).rem_euclid(period as i64) as usize;

        debug!(
            "short training peak at {:.2}, cfo {:.5} rad/sample",
            peak,
            cfo.as_f64()
        );

        self.long_best = None;
        self.long_hold = 0;
        self.state = SyncState::TrainingLong { elapsed };
    }

    /// Matched filter against one short period, accumulated over the periods
    /// of the last M samples for each of the L possible alignments. Returns
    /// the age of the best alignment and its parabolic refinement in samples,
    /// positive meaning later.
    fn short_timing(&mut self) -> (usize, f64) {
        let period = self.period;
        let windows = self.num_subcarriers / period - 1;
        for shift in 0..period {
            let mut power = T::zero();
            for w in 0..windows {
                let end = shift + w * period;
                let q = self
                    .short_ref
                    .iter()
                    .enumerate()
                    .fold(Complex::<T>::default(), |acc, (n, r)| {
                        acc + self.rx[self.ring(end + period - 1 - n)] * *r
                    });
                power = power + q.norm_sqr();
            }
            self.timing_power[shift] = power;
        }

        let mut best = 0;
        for shift in 1..period {
            if self.timing_power[shift] > self.timing_power[best] {
                best = shift;
            }
        }
        // the alignments wrap around every period
        let earlier = self.timing_power[(best + 1) % period].as_f64();
        let y0 = self.timing_power[best].as_f64();
        let later = self.timing_power[(best + period - 1) % period].as_f64();
        let curvature = earlier - 2.0 * y0 + later;
        let delta = if curvature.abs() > 1e-12 {
            (0.5 * (earlier - later) / curvature).clamp(-0.5, 0.5)
        } else {
            0.0
        };
        (best, delta)
    }

    /// Start carrier derotation and rewrite the history as if it had been
    /// derotated all along.
    fn lock_carrier(&mut self, cfo: T) {
        self.channel.lock_cfo(cfo);
        for age in 0..self.raw.len() {
            let idx = self.ring(age);
            self.rx[idx] = self.raw[idx] * cis(cfo * T::lit(age as f64));
        }
    }

    /// Matched filter against the long training symbol, evaluated only where
    /// the short training timing predicts it.
    fn training_long(&mut self, elapsed: usize) -> Result<()> {
        let m = self.num_subcarriers;
        let n = self.symbol_len();
        if elapsed > (self.config.num_preamble_symbols + 2) * n {
            debug!("long training symbol not found, resuming search");
            self.state = SyncState::Reset;
            return Ok(());
        }

        let mut improved = false;
        if self.sample_index + 1 >= m as u64 {
            let period = self.period;
            let start = ((self.sample_index + 1 - m as u64) % period as u64) as usize;
            let diff = (start + period - self.long_residue) % period;
            if diff.min(period - diff) <= 1 {
                let rho = self.long_metric();
                if rho.as_f64() > self.config.long_threshold && self.long_best.map_or(true, |best| rho > best) {
                    self.long_best = Some(rho);
                    self.long_best_index = self.sample_index;
                    self.long_hold = LONG_PEAK_HOLD;
                    for k in 0..m {
                        self.s1[k] = self.rx[self.ring(m - 1 + self.backoff - k)];
                    }
                    improved = true;
                }
            }
        }

        if !improved && self.long_best.is_some() {
            self.long_hold -= 1;
            if self.long_hold == 0 {
                return self.latch_long_training();
            }
        }
        self.state = SyncState::TrainingLong { elapsed };
        Ok(())
    }

    fn long_metric(&self) -> T {
        let m = self.num_subcarriers;
        let long = self.training.long_time();
        let c = (0..m).fold(Complex::<T>::default(), |acc, k| {
            acc + self.rx[self.ring(m - 1 - k)] * long[k].conj()
        });
        let denom = self.window_energy * self.long_ref_energy;
        if denom > T::lit(1e-30) {
            c.norm_sqr() / denom
        } else {
            T::zero()
        }
    }

    /// Symbol timing is fixed: estimate the channel and start the header.
    fn latch_long_training(&mut self) -> Result<()> {
        let m = self.num_subcarriers;
        let rssi = energy(&self.s1).as_f64() / m as f64;

        self.freq.copy_from_slice(&self.s1);
        self.demodulator.demodulate(&mut self.freq)?;
        self.channel.estimate(&self.freq, self.training.long_freq(), &self.allocation);

        // the first header body ends one symbol after the long training body
        let end = self.long_best_index + (self.symbol_len() - self.backoff) as u64;
        self.countdown = (end - self.sample_index) as usize;

        debug!(
            "long training locked at sample {} (rho {:.3}, timing offset {:.2})",
            self.long_best_index,
            self.long_best.map_or(0.0, |r| r.as_f64()),
            self.channel.timing_offset().as_f64()
        );

        self.pilots.reset();
        self.header_soft.clear();
        self.evm_sum = 0.0;
        self.evm_count = 0;
        self.stats = FrameStats {
            frame_detected: true,
            rssi_db: 10.0 * rssi.max(MIN_EVM).log10(),
            num_header_symbols: self.num_header_symbols,
            ..FrameStats::default()
        };
        self.data_stats.num_frames_detected += 1;
        self.state = SyncState::Header { symbol: 0 };
        Ok(())
    }

    /// FFT the last M samples, equalize and remove the common phase error
    /// measured on the pilots. Returns that phase error.
    fn demodulate_symbol(&mut self) -> Result<T> {
        let m = self.num_subcarriers;
        for k in 0..m {
            self.freq[k] = self.rx[self.ring(m - 1 - k)];
        }
        self.demodulator.demodulate(&mut self.freq)?;
        self.channel.equalize(&mut self.freq);

        let pilots = &mut self.pilots;
        let theta = self
            .channel
            .pilot_phase(&self.freq, self.allocation.pilot_bins().map(|bin| (bin, pilots.next_pilot())));
        let rotation = cis(-theta);
        for value in self.freq.iter_mut() {
            *value = *value * rotation;
        }
        Ok(theta)
    }

    /// Counts down to the end of the next symbol body. True when it is complete.
    fn symbol_ready(&mut self) -> bool {
        self.countdown -= 1;
        if self.countdown > 0 {
            return false;
        }
        self.countdown = self.symbol_len();
        true
    }

    fn receive_header(&mut self, symbol: usize) -> Result<()> {
        if !self.symbol_ready() {
            return Ok(());
        }
        self.demodulate_symbol()?;

        for bin in self.allocation.data_bins() {
            if self.header_soft.len() == HEADER_BITS {
                break;
            }
            let z = self.freq[bin];
            let ideal: Complex<T> = Modulation::BPSK.modulate(Modulation::BPSK.demodulate(z));
            self.evm_sum += (z - ideal).norm_sqr().as_f64();
            self.evm_count += 1;
            let weight = self.channel.reliability(bin).as_f64() as f32;
            Modulation::BPSK.demodulate_soft(z, weight, &mut self.header_soft);
        }

        if symbol + 1 < self.num_header_symbols {
            self.state = SyncState::Header { symbol: symbol + 1 };
            return Ok(());
        }
        self.decode_header()
    }

    fn decode_header(&mut self) -> Result<()> {
        HeaderDecoder::recover_soft(&self.header_soft, &mut self.header_block)?;
        self.header_user.copy_from_slice(&self.header_block[..HEADER_USER_LEN]);

        let evm = self.evm_sum / self.evm_count.max(1) as f64;
        self.stats.estimated_snr_db = -10.0 * evm.max(MIN_EVM).log10();
        self.stats.cfo = self.channel.cfo().as_f64();
        self.stats.timing_offset = self.channel.timing_offset().as_f64();

        let header = match HeaderDecoder::decode_block(&self.header_block) {
            Ok(h) if h.payload_len as usize <= self.config.max_payload_len => h,
            Ok(h) => {
                debug!(
                    "header announces {} payload bytes, limit is {}",
                    h.payload_len, self.config.max_payload_len
                );
                return self.reject_header();
            }
            Err(e) => {
                debug!("header rejected: {}", e);
                return self.reject_header();
            }
        };

        let payload_len = header.payload_len as usize;
        self.packetizer
            .recreate(payload_len, header.check, header.fec_inner, header.fec_outer);
        self.num_payload_mod_symbols =
            num_symbols(self.packetizer.encoded_len(), header.modulation.bits_per_symbol());
        self.num_payload_symbols = self.num_payload_mod_symbols.div_ceil(self.allocation.num_data()).max(1);
        self.payload_soft.clear();

        self.stats.header_valid = true;
        self.stats.modulation = Some(header.modulation);
        self.stats.check = Some(header.check);
        self.stats.fec_inner = Some(header.fec_inner);
        self.stats.fec_outer = Some(header.fec_outer);
        self.stats.num_payload_symbols = self.num_payload_symbols;
        self.data_stats.num_headers_valid += 1;

        debug!(
            "header ok: {} bytes, {} / {} / {} / {}, {} payload symbols, snr {:.1} dB",
            payload_len,
            header.modulation,
            header.check,
            header.fec_inner,
            header.fec_outer,
            self.num_payload_symbols,
            self.stats.estimated_snr_db
        );
        self.header = Some(header);
        self.state = SyncState::Payload { symbol: 0 };
        Ok(())
    }

    fn reject_header(&mut self) -> Result<()> {
        self.stats.header_valid = false;
        self.listener
            .on_frame(&self.header_user, false, &[], false, &self.stats);
        self.state = SyncState::Reset;
        Ok(())
    }

    fn receive_payload(&mut self, symbol: usize) -> Result<()> {
        if !self.symbol_ready() {
            return Ok(());
        }
        let Some(header) = self.header else {
            self.state = SyncState::Reset;
            return Ok(());
        };
        let modulation = header.modulation;
        let theta = self.demodulate_symbol()?;
        self.channel.track(theta, self.symbol_len());

        let wanted = self.num_payload_mod_symbols * modulation.bits_per_symbol();
        for bin in self.allocation.data_bins() {
            if self.payload_soft.len() >= wanted {
                break;
            }
            let weight = self.channel.reliability(bin).as_f64() as f32;
            modulation.demodulate_soft(self.freq[bin], weight, &mut self.payload_soft);
        }

        if symbol + 1 < self.num_payload_symbols {
            self.state = SyncState::Payload { symbol: symbol + 1 };
            return Ok(());
        }
        self.decode_payload()
    }

    fn decode_payload(&mut self) -> Result<()> {
        // the last modem symbol may carry padding bits
        let bits = 8 * self.packetizer.encoded_len();
        let soft = self.payload_soft.get(..bits).ok_or(OfdmFrameError::InvalidInputSize)?;
        let valid = self.packetizer.decode_soft(soft, &mut self.payload)?;

        self.stats.payload_valid = valid;
        self.stats.bytes_received = self.payload.len();
        self.stats.cfo = self.channel.cfo().as_f64();
        if valid {
            self.data_stats.num_payloads_valid += 1;
            self.data_stats.num_bytes_received += self.payload.len();
        } else {
            debug!("payload check failed ({} bytes)", self.payload.len());
        }

        self.listener
            .on_frame(&self.header_user, true, &self.payload, valid, &self.stats);
        self.state = SyncState::Reset;
        Ok(())
    }

    /// Drop the frame in progress and go back to preamble search. Consumes
    /// no sample.
    fn reset_frame(&mut self) {
        self.channel.reset();
        self.pilots.reset();
        self.long_best = None;
        self.long_hold = 0;
        self.countdown = 0;
        self.header_soft.clear();
        self.header = None;
        self.payload_soft.clear();
        self.state = SyncState::SeekPreamble;
    }
}

fn energy<T: Real>(samples: &[Complex<T>]) -> T {
    samples.iter().fold(T::zero(), |acc, s| acc + s.norm_sqr())
}
