use crate::bitpack::{num_symbols, pack_symbols};
use crate::error::{OfdmFrameError, Result};
use crate::framing::{FrameHeader, FrameProperties, HeaderEncoder};
use crate::modem::Modulation;
use crate::ofdm_cp::OfdmModulatorCp;
use crate::packetizer::Packetizer;
use crate::sample::Real;
use crate::subcarrier::{SubcarrierAllocation, SubcarrierType};
use crate::training::{fill_sequence, Lfsr, PilotSequence, TrainingSequences};
use crate::{validate_dimensions, HEADER_BITS, HEADER_USER_LEN};
use log::debug;
use rustfft::num_complex::Complex;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GeneratorState {
    WritePreamble,
    WriteHeader,
    WritePayload,
    Done,
}

/// Builds the complex baseband waveform of one frame, one OFDM symbol at a time.
///
/// Frame layout: `num_preamble_symbols - 1` short training symbols, one long
/// training symbol, the header symbols, then the payload symbols. Every symbol
/// is `M + G` samples long.
pub struct FrameGenerator<T: Real> {
    num_subcarriers: usize,
    cp_len: usize,
    allocation: SubcarrierAllocation,
    properties: FrameProperties,
    training: TrainingSequences<T>,
    modulator: OfdmModulatorCp<T>,
    pilots: PilotSequence,
    fill: Lfsr,
    packetizer: Packetizer,

    state: GeneratorState,
    assembled: bool,
    symbol_counter: usize,

    header_block: Vec<u8>,
    header_encoded: Vec<u8>,
    header_symbols: Vec<u8>,
    payload_encoded: Vec<u8>,
    payload_symbols: Vec<u8>,
    payload_modulation: Modulation,
    payload_len: usize,
    num_header_symbols: usize,
    num_payload_symbols: usize,
    freq: Vec<Complex<T>>,
}

impl<T: Real> FrameGenerator<T> {
    /// `allocation = None` selects the default allocation for `num_subcarriers`.
    pub fn new(
        num_subcarriers: usize,
        cp_len: usize,
        allocation: Option<SubcarrierAllocation>,
        properties: FrameProperties,
    ) -> Result<Self> {
        validate_dimensions(num_subcarriers, cp_len)?;
        let allocation = match allocation {
            Some(a) => {
                SubcarrierAllocation::validate(a.roles(), num_subcarriers)?;
                a
            }
            None => SubcarrierAllocation::init_default(num_subcarriers)?,
        };
        properties.validate()?;

        let training = TrainingSequences::new(&allocation)?;
        let gain = T::one() / T::lit(allocation.num_enabled() as f64).sqrt();
        let modulator = OfdmModulatorCp::new(num_subcarriers, cp_len, gain)?;
        let num_header_symbols = HEADER_BITS.div_ceil(allocation.num_data());

        Ok(Self {
            num_subcarriers,
            cp_len,
            allocation,
            properties,
            training,
            modulator,
            pilots: PilotSequence::new(),
            fill: fill_sequence(),
            packetizer: Packetizer::new(0, properties.check, properties.fec_inner, properties.fec_outer),
            state: GeneratorState::WritePreamble,
            assembled: false,
            symbol_counter: 0,
            header_block: Vec::new(),
            header_encoded: Vec::new(),
            header_symbols: Vec::new(),
            payload_encoded: Vec::new(),
            payload_symbols: Vec::new(),
            payload_modulation: properties.modulation,
            payload_len: 0,
            num_header_symbols,
            num_payload_symbols: 0,
            freq: vec![Complex::default(); num_subcarriers],
        })
    }

    pub fn properties(&self) -> &FrameProperties {
        &self.properties
    }

    /// Replace the frame properties. Any assembled frame is discarded.
    pub fn set_properties(&mut self, properties: FrameProperties) -> Result<()> {
        properties.validate()?;
        self.properties = properties;
        self.reset();
        Ok(())
    }

    pub fn allocation(&self) -> &SubcarrierAllocation {
        &self.allocation
    }

    /// Samples per OFDM symbol (M + G).
    pub fn symbol_len(&self) -> usize {
        self.num_subcarriers + self.cp_len
    }

    pub fn num_header_symbols(&self) -> usize {
        self.num_header_symbols
    }

    /// Payload symbols of the assembled frame.
    pub fn num_payload_symbols(&self) -> usize {
        self.num_payload_symbols
    }

    /// OFDM symbols in the assembled frame (0 when nothing is assembled).
    pub fn frame_len(&self) -> usize {
        if !self.assembled {
            return 0;
        }
        self.properties.num_preamble_symbols + self.num_header_symbols + self.num_payload_symbols
    }

    /// True from `assemble` until the last symbol has been written.
    pub fn is_assembled(&self) -> bool {
        self.assembled
    }

    /// Drop the assembled frame.
    pub fn reset(&mut self) {
        self.assembled = false;
        self.state = GeneratorState::WritePreamble;
        self.symbol_counter = 0;
        self.num_payload_symbols = 0;
    }

    /// Encode the header and payload of the next frame.
    pub fn assemble(&mut self, header: &[u8; HEADER_USER_LEN], payload: &[u8]) -> Result<()> {
        if payload.len() > self.properties.payload_len {
            return Err(OfdmFrameError::PayloadTooLarge {
                len: payload.len(),
                max: self.properties.payload_len,
            });
        }

        let props = self.properties;
        let frame_header = FrameHeader {
            user: *header,
            payload_len: payload.len() as u16,
            modulation: props.modulation,
            check: props.check,
            fec_inner: props.fec_inner,
            fec_outer: props.fec_outer,
        };
        self.header_block = HeaderEncoder::encode_block(&frame_header);
        self.encode_header_symbols();

        self.packetizer
            .recreate(payload.len(), props.check, props.fec_inner, props.fec_outer);
        self.packetizer.encode(payload, &mut self.payload_encoded);
        let bps = props.modulation.bits_per_symbol();
        pack_symbols(&self.payload_encoded, bps, &mut self.payload_symbols);
        self.payload_modulation = props.modulation;
        self.payload_len = payload.len();

        let num_data = self.allocation.num_data();
        let num_mod_symbols = num_symbols(self.packetizer.encoded_len(), bps);
        self.num_payload_symbols = num_mod_symbols.div_ceil(num_data).max(1);

        self.pilots.reset();
        self.fill.reset();
        self.state = GeneratorState::WritePreamble;
        self.symbol_counter = 0;
        self.assembled = true;

        debug!(
            "assembled frame: {} payload bytes, {} encoded, {} header + {} payload symbols ({})",
            payload.len(),
            self.packetizer.encoded_len(),
            self.num_header_symbols,
            self.num_payload_symbols,
            props.modulation
        );
        Ok(())
    }

    fn encode_header_symbols(&mut self) {
        HeaderEncoder::protect(&self.header_block, &mut self.header_encoded);
        pack_symbols(&self.header_encoded, 1, &mut self.header_symbols);
    }

    /// Flip one bit of the CRC-protected header block before it is FEC encoded.
    #[cfg(test)]
    pub(crate) fn corrupt_header_block_bit(&mut self, bit: usize) {
        self.header_block[bit / 8] ^= 0x80 >> (bit % 8);
        self.encode_header_symbols();
    }

    /// Write the next OFDM symbol into `out` (at least M + G samples).
    ///
    /// Returns the number of samples written and whether this was the last
    /// symbol of the frame.
    pub fn write_symbol(&mut self, out: &mut [Complex<T>]) -> Result<(usize, bool)> {
        if !self.assembled || self.state == GeneratorState::Done {
            return Err(OfdmFrameError::NotAssembled);
        }
        let n = self.symbol_len();
        if out.len() < n {
            return Err(OfdmFrameError::InvalidInputSize);
        }

        let num_preamble = self.properties.num_preamble_symbols;
        let s = self.symbol_counter;
        let mut is_last = false;

        match self.state {
            GeneratorState::WritePreamble => {
                if s + 1 < num_preamble {
                    for (i, sample) in out[..n].iter_mut().enumerate() {
                        *sample = self.training.short_sample(s * n + i, self.cp_len);
                    }
                } else {
                    let long = self.training.long_time();
                    let m = self.num_subcarriers;
                    out[..self.cp_len].copy_from_slice(&long[m - self.cp_len..]);
                    out[self.cp_len..n].copy_from_slice(long);
                    self.state = GeneratorState::WriteHeader;
                }
            }
            GeneratorState::WriteHeader => {
                let h = s - num_preamble;
                let chunk = symbol_chunk(&self.header_symbols, h, self.allocation.num_data());
                load_symbol(
                    &mut self.freq,
                    &self.allocation,
                    chunk,
                    Modulation::BPSK,
                    &mut self.pilots,
                    &mut self.fill,
                );
                self.modulator.modulate(&self.freq, out)?;
                if h + 1 == self.num_header_symbols {
                    self.state = GeneratorState::WritePayload;
                }
            }
            GeneratorState::WritePayload => {
                let p = s - num_preamble - self.num_header_symbols;
                let chunk = symbol_chunk(&self.payload_symbols, p, self.allocation.num_data());
                load_symbol(
                    &mut self.freq,
                    &self.allocation,
                    chunk,
                    self.payload_modulation,
                    &mut self.pilots,
                    &mut self.fill,
                );
                self.modulator.modulate(&self.freq, out)?;
                if p + 1 == self.num_payload_symbols {
                    self.state = GeneratorState::Done;
                    self.assembled = false;
                    is_last = true;
                }
            }
            GeneratorState::Done => return Err(OfdmFrameError::NotAssembled),
        }

        self.symbol_counter += 1;
        Ok((n, is_last))
    }
}

/// Modem symbols carried by OFDM symbol `index` (may be short or empty for
/// the last one).
fn symbol_chunk(symbols: &[u8], index: usize, per_symbol: usize) -> &[u8] {
    let start = (index * per_symbol).min(symbols.len());
    let end = (start + per_symbol).min(symbols.len());
    &symbols[start..end]
}

/// Fill the frequency buffer: data bins in ascending order from `symbols`
/// (random filler once exhausted), pilot bins from the pilot sequence.
fn load_symbol<T: Real>(
    freq: &mut [Complex<T>],
    allocation: &SubcarrierAllocation,
    symbols: &[u8],
    modulation: Modulation,
    pilots: &mut PilotSequence,
    fill: &mut Lfsr,
) {
    let mut data = symbols.iter();
    for (bin, value) in freq.iter_mut().enumerate() {
        *value = match allocation.role(bin) {
            SubcarrierType::Null => Complex::default(),
            SubcarrierType::Pilot => pilots.next_pilot(),
            SubcarrierType::Data => match data.next() {
                Some(&sym) => modulation.modulate(sym),
                None => modulation.modulate(fill.next_bits(modulation.depth() as u32) as u8),
            },
        };
    }
}

impl<T: Real> fmt::Display for FrameGenerator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.properties;
        writeln!(f, "ofdmflex frame generator:")?;
        writeln!(
            f,
            "    subcarriers     : {} (null: {}, pilot: {}, data: {})",
            self.num_subcarriers,
            self.allocation.num_null(),
            self.allocation.num_pilot(),
            self.allocation.num_data()
        )?;
        writeln!(f, "    cyclic prefix   : {}", self.cp_len)?;
        writeln!(f, "    preamble        : {} symbols", p.num_preamble_symbols)?;
        writeln!(f, "    header          : {} symbols", self.num_header_symbols)?;
        writeln!(f, "    modulation      : {}", p.modulation)?;
        writeln!(f, "    check           : {}", p.check)?;
        writeln!(f, "    fec (inner)     : {}", p.fec_inner)?;
        writeln!(f, "    fec (outer)     : {}", p.fec_outer)?;
        if self.assembled {
            let samples = self.frame_len() * self.symbol_len();
            let efficiency = 8.0 * self.payload_len as f64 / samples as f64;
            writeln!(f, "    payload         : {} bytes, {} symbols", self.payload_len, self.num_payload_symbols)?;
            writeln!(f, "    frame           : {} symbols, {} samples", self.frame_len(), samples)?;
            write!(f, "    efficiency      : {:.3} b/s/Hz", efficiency)?;
        } else {
            write!(f, "    max payload     : {} bytes (not assembled)", p.payload_len)?;
        }
        Ok(())
    }
}
