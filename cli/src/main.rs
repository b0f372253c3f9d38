use clap::{Args, Parser, Subcommand};
use hound::{SampleFormat, WavSpec};
use ofdmflex_core::{
    Complex, CrcScheme, FecScheme, FrameGenerator, FrameListener, FrameProperties, FrameStats, FrameSynchronizer,
    Modulation, OfdmFrameError, SyncConfig, DEFAULT_CP_LEN, DEFAULT_NUM_SUBCARRIERS, DEFAULT_PREAMBLE_SYMBOLS,
    HEADER_USER_LEN,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use thiserror::Error;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_SAMPLE_RATE: u32 = 48_000;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Codec(#[from] OfdmFrameError),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Usage(String),
}

type Result<T> = std::result::Result<T, CliError>;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CliError + '_ {
    move |source| CliError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Parser)]
#[command(name = "ofdmflex")]
#[command(about = "OFDM flexible-frame codec for complex baseband (I/Q) WAV files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a payload file into one frame of I/Q samples
    Encode {
        /// Payload file
        #[arg(value_name = "PAYLOAD")]
        input: PathBuf,

        /// Output WAV file (2 channels, 32-bit float, I then Q)
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        /// Up to 8 header bytes as hex, zero padded
        #[arg(long, default_value = "")]
        header: String,

        /// Silence before and after the frame, in samples
        #[arg(long, default_value_t = 256)]
        pad: usize,

        #[command(flatten)]
        link: LinkArgs,

        #[command(flatten)]
        schemes: SchemeArgs,
    },

    /// Decode every frame in an I/Q WAV file, one JSON line per frame
    Decode {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Write each valid payload to DIR/frame-<n>.bin
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,

        /// Reject headers announcing more payload bytes than this
        #[arg(long, default_value_t = ofdmflex_core::DEFAULT_MAX_PAYLOAD_LEN)]
        max_payload_len: usize,

        #[command(flatten)]
        link: LinkArgs,
    },

    /// Loop frames through a noisy, frequency-offset channel and report the
    /// success rate
    Simulate {
        #[arg(long, default_value_t = 100)]
        frames: usize,

        #[arg(long, default_value_t = 15.0)]
        snr_db: f32,

        /// Carrier frequency offset in radians per sample
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        cfo: f32,

        #[arg(long, default_value_t = 1)]
        seed: u64,

        #[arg(long, default_value_t = 128)]
        payload_len: usize,

        #[command(flatten)]
        link: LinkArgs,

        #[command(flatten)]
        schemes: SchemeArgs,
    },
}

/// Frame geometry shared by both ends of a link.
#[derive(Args, Debug, Clone)]
struct LinkArgs {
    /// Number of subcarriers M
    #[arg(long, default_value_t = DEFAULT_NUM_SUBCARRIERS)]
    subcarriers: usize,

    /// Cyclic prefix length G
    #[arg(long, default_value_t = DEFAULT_CP_LEN)]
    cp_len: usize,

    #[arg(long, default_value_t = DEFAULT_PREAMBLE_SYMBOLS)]
    preamble_symbols: usize,

    /// JSON link file; fields present in it override the flags above
    #[arg(long, value_name = "LINK.JSON")]
    link_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LinkFile {
    subcarriers: Option<usize>,
    cp_len: Option<usize>,
    preamble_symbols: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct Link {
    subcarriers: usize,
    cp_len: usize,
    preamble_symbols: usize,
}

impl LinkArgs {
    fn resolve(&self) -> Result<Link> {
        let mut link = Link {
            subcarriers: self.subcarriers,
            cp_len: self.cp_len,
            preamble_symbols: self.preamble_symbols,
        };
        if let Some(path) = &self.link_file {
            let text = fs::read_to_string(path).map_err(io_error(path))?;
            let file: LinkFile = serde_json::from_str(&text)?;
            link.subcarriers = file.subcarriers.unwrap_or(link.subcarriers);
            link.cp_len = file.cp_len.unwrap_or(link.cp_len);
            link.preamble_symbols = file.preamble_symbols.unwrap_or(link.preamble_symbols);
            debug!(?link, "link file {} applied", path.display());
        }
        Ok(link)
    }
}

/// Payload protection and modulation (transmit side only: the receiver reads
/// them from each frame header).
#[derive(Args, Debug, Clone)]
struct SchemeArgs {
    /// bpsk, qpsk, psk8, psk16, qam4, qam16, qam64 or qam256
    #[arg(long, default_value = "qpsk")]
    modulation: Modulation,

    /// none, checksum, crc8, crc16, crc24 or crc32
    #[arg(long, default_value = "crc32")]
    check: CrcScheme,

    /// none, rep3, rep5, h74, h84, h128, g2412 or v27
    #[arg(long, default_value = "none")]
    fec_inner: FecScheme,

    #[arg(long, default_value = "none")]
    fec_outer: FecScheme,
}

impl SchemeArgs {
    fn properties(&self, link: &Link, payload_len: usize) -> FrameProperties {
        FrameProperties {
            num_preamble_symbols: link.preamble_symbols,
            check: self.check,
            fec_inner: self.fec_inner,
            fec_outer: self.fec_outer,
            modulation: self.modulation,
            payload_len,
        }
    }
}

/// One JSON line of `decode` output.
#[derive(Debug, Serialize)]
struct FrameReport {
    index: usize,
    header: String,
    header_valid: bool,
    payload_valid: bool,
    payload_len: usize,
    snr_db: f64,
    rssi_db: f64,
    cfo: f64,
    timing_offset: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    modulation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    check: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fec_inner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fec_outer: Option<String>,
    #[serde(skip)]
    payload: Vec<u8>,
}

#[derive(Default)]
struct ReportCollector {
    reports: Vec<FrameReport>,
}

impl FrameListener for ReportCollector {
    fn on_frame(&mut self, header: &[u8], header_valid: bool, payload: &[u8], payload_valid: bool, stats: &FrameStats) {
        self.reports.push(FrameReport {
            index: self.reports.len(),
            header: to_hex(header),
            header_valid,
            payload_valid,
            payload_len: payload.len(),
            snr_db: stats.estimated_snr_db,
            rssi_db: stats.rssi_db,
            cfo: stats.cfo,
            timing_offset: stats.timing_offset,
            modulation: stats.modulation.map(|m| m.to_string()),
            check: stats.check.map(|c| c.to_string()),
            fec_inner: stats.fec_inner.map(|f| f.to_string()),
            fec_outer: stats.fec_outer.map(|f| f.to_string()),
            payload: payload.to_vec(),
        });
    }
}

/// Totals printed by `simulate`.
#[derive(Debug, Serialize)]
struct SimulationReport {
    frames_sent: usize,
    frames_detected: usize,
    headers_valid: usize,
    payloads_valid: usize,
    bytes_received: usize,
    mean_snr_db: Option<f64>,
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn parse_header(hex: &str) -> Result<[u8; HEADER_USER_LEN]> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 || hex.len() > 2 * HEADER_USER_LEN {
        return Err(CliError::Usage(format!(
            "header must be at most {} hex-encoded bytes, got '{}'",
            HEADER_USER_LEN, hex
        )));
    }
    let mut header = [0u8; HEADER_USER_LEN];
    for (i, byte) in header.iter_mut().take(hex.len() / 2).enumerate() {
        *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16)
            .map_err(|_| CliError::Usage(format!("invalid hex in header '{}'", hex)))?;
    }
    Ok(header)
}

/// Samples of one frame, without padding.
fn render_frame(gen: &mut FrameGenerator<f32>, header: &[u8; HEADER_USER_LEN], payload: &[u8]) -> Result<Vec<Complex<f32>>> {
    gen.assemble(header, payload)?;
    let mut samples = Vec::with_capacity(gen.frame_len() * gen.symbol_len());
    let mut symbol = vec![Complex::default(); gen.symbol_len()];
    loop {
        let (n, last) = gen.write_symbol(&mut symbol)?;
        samples.extend_from_slice(&symbol[..n]);
        if last {
            return Ok(samples);
        }
    }
}

fn write_iq_wav(path: &Path, samples: &[Complex<f32>]) -> Result<()> {
    let spec = WavSpec {
        channels: 2,
        sample_rate: DEFAULT_SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let file = File::create(path).map_err(io_error(path))?;
    let mut writer = hound::WavWriter::new(BufWriter::new(file), spec)?;
    for s in samples {
        writer.write_sample(s.re)?;
        writer.write_sample(s.im)?;
    }
    writer.finalize()?;
    Ok(())
}

fn read_iq_wav(path: &Path) -> Result<Vec<Complex<f32>>> {
    let file = File::open(path).map_err(io_error(path))?;
    let mut reader = hound::WavReader::new(std::io::BufReader::new(file))?;
    let spec = reader.spec();
    if spec.channels != 2 {
        return Err(CliError::Usage(format!(
            "{} has {} channel(s); I/Q input needs 2",
            path.display(),
            spec.channels
        )));
    }

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<std::result::Result<_, _>>()?,
        (format, bits) => {
            return Err(CliError::Usage(format!(
                "unsupported WAV sample format {:?} with {} bits",
                format, bits
            )))
        }
    };
    debug!(
        "read {} I/Q samples at {} Hz from {}",
        interleaved.len() / 2,
        spec.sample_rate,
        path.display()
    );
    Ok(interleaved
        .chunks_exact(2)
        .map(|iq| Complex::new(iq[0], iq[1]))
        .collect())
}

fn encode_command(
    input: &Path,
    output: &Path,
    header: &str,
    pad: usize,
    link: &LinkArgs,
    schemes: &SchemeArgs,
) -> Result<()> {
    let link = link.resolve()?;
    let payload = fs::read(input).map_err(io_error(input))?;
    let header = parse_header(header)?;

    let props = schemes.properties(&link, payload.len());
    let mut gen = FrameGenerator::<f32>::new(link.subcarriers, link.cp_len, None, props)?;

    let mut samples = vec![Complex::default(); pad];
    samples.extend(render_frame(&mut gen, &header, &payload)?);
    samples.resize(samples.len() + pad, Complex::default());
    write_iq_wav(output, &samples)?;

    info!(
        "encoded {} bytes into {} symbols ({} samples) -> {}",
        payload.len(),
        gen.num_header_symbols() + gen.num_payload_symbols() + link.preamble_symbols,
        samples.len(),
        output.display()
    );
    Ok(())
}

fn decode_command(input: &Path, out_dir: Option<&Path>, max_payload_len: usize, link: &LinkArgs) -> Result<()> {
    let link = link.resolve()?;
    let samples = read_iq_wav(input)?;

    let config = SyncConfig {
        num_preamble_symbols: link.preamble_symbols,
        max_payload_len,
        ..SyncConfig::default()
    };
    let mut sync = FrameSynchronizer::<_, f32>::with_config(
        link.subcarriers,
        link.cp_len,
        None,
        ReportCollector::default(),
        config,
    )?;
    sync.execute(&samples);
    let totals = sync.data_stats();
    let reports = sync.into_listener().reports;

    if let Some(dir) = out_dir {
        fs::create_dir_all(dir).map_err(io_error(dir))?;
    }
    for report in &reports {
        println!("{}", serde_json::to_string(report)?);
        if let (Some(dir), true) = (out_dir, report.payload_valid) {
            let path = dir.join(format!("frame-{}.bin", report.index));
            fs::write(&path, &report.payload).map_err(io_error(&path))?;
        }
    }

    info!(
        "{} frame(s) detected, {} header(s) valid, {} payload(s) valid",
        totals.num_frames_detected, totals.num_headers_valid, totals.num_payloads_valid
    );
    if totals.num_frames_detected == 0 {
        warn!("no frame found in {}", input.display());
    }
    Ok(())
}

fn simulate_command(
    frames: usize,
    snr_db: f32,
    cfo: f32,
    seed: u64,
    payload_len: usize,
    link: &LinkArgs,
    schemes: &SchemeArgs,
) -> Result<()> {
    let link = link.resolve()?;
    let props = schemes.properties(&link, payload_len);
    let mut gen = FrameGenerator::<f32>::new(link.subcarriers, link.cp_len, None, props)?;
    let config = SyncConfig {
        num_preamble_symbols: link.preamble_symbols,
        max_payload_len: payload_len,
        ..SyncConfig::default()
    };
    let mut sync = FrameSynchronizer::<_, f32>::with_config(
        link.subcarriers,
        link.cp_len,
        None,
        ReportCollector::default(),
        config,
    )?;

    let mut rng = StdRng::seed_from_u64(seed);
    let sigma = (10f32.powf(-snr_db / 10.0) / 2.0).sqrt();
    let normal = Normal::new(0.0, sigma).map_err(|e| CliError::Usage(format!("invalid SNR {}: {}", snr_db, e)))?;
    let gap = 2 * gen.symbol_len();
    let mut phase = 0.0f32;

    let mut channel = |samples: &[Complex<f32>], rng: &mut StdRng| -> Vec<Complex<f32>> {
        samples
            .iter()
            .map(|&x| {
                let y = x * Complex::from_polar(1.0, phase) + Complex::new(normal.sample(rng), normal.sample(rng));
                phase = (phase + cfo) % std::f32::consts::TAU;
                y
            })
            .collect()
    };

    for n in 0..frames {
        let header = (n as u64).to_be_bytes();
        let payload: Vec<u8> = (0..payload_len).map(|_| rng.gen()).collect();
        let frame = render_frame(&mut gen, &header, &payload)?;

        let silence = vec![Complex::default(); gap];
        sync.execute(&channel(&silence, &mut rng));
        sync.execute(&channel(&frame, &mut rng));
    }
    let silence = vec![Complex::default(); gap];
    sync.execute(&channel(&silence, &mut rng));

    let totals = sync.data_stats();
    let reports = sync.into_listener().reports;
    let snrs: Vec<f64> = reports.iter().filter(|r| r.header_valid).map(|r| r.snr_db).collect();
    let summary = SimulationReport {
        frames_sent: frames,
        frames_detected: totals.num_frames_detected,
        headers_valid: totals.num_headers_valid,
        payloads_valid: totals.num_payloads_valid,
        bytes_received: totals.num_bytes_received,
        mean_snr_db: (!snrs.is_empty()).then(|| snrs.iter().sum::<f64>() / snrs.len() as f64),
    };
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Encode {
            input,
            output,
            header,
            pad,
            link,
            schemes,
        } => encode_command(&input, &output, &header, pad, &link, &schemes),
        Commands::Decode {
            input,
            out_dir,
            max_payload_len,
            link,
        } => decode_command(&input, out_dir.as_deref(), max_payload_len, &link),
        Commands::Simulate {
            frames,
            snr_db,
            cfo,
            seed,
            payload_len,
            link,
            schemes,
        } => simulate_command(frames, snr_db, cfo, seed, payload_len, &link, &schemes),
    }
}

fn main() -> ExitCode {
    // log records from the core library are forwarded to this subscriber
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
