mod common;

use common::{fractional_delay, init_logging, impair, noise, render, Collector};
use ofdmflex_core::{Complex, FecScheme, FrameGenerator, FrameProperties, FrameSynchronizer};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[test]
fn test_detection_and_header_rate_with_cfo_and_noise() {
    init_logging();
    const TRIALS: usize = 200;
    let mut rng = StdRng::seed_from_u64(0x0fd3);
    let props = FrameProperties {
        fec_inner: FecScheme::ConvR2K7,
        ..FrameProperties::default()
    };
    let mut gen = FrameGenerator::<f32>::new(64, 16, None, props).unwrap();
    let mut sync = FrameSynchronizer::<_, f32>::new(64, 16, None, Collector::default()).unwrap();

    for trial in 0..TRIALS {
        let header = (trial as u64).to_be_bytes();
        let payload: Vec<u8> = (0..48).map(|_| rng.gen()).collect();
        gen.assemble(&header, &payload).unwrap();
        let frame = render(&mut gen);

        let cfo: f32 = rng.gen_range(-0.1..=0.1);
        let gap = rng.gen_range(100..400);
        sync.execute(&noise(gap, 10.0, &mut rng));
        sync.execute(&impair(&frame, cfo, 10.0, &mut rng));
    }
    sync.execute(&noise(500, 10.0, &mut rng));

    let stats = sync.data_stats();
    let frames = &sync.listener().frames;
    let valid_headers = frames.iter().filter(|f| f.header_valid).count();
    assert!(frames.len() <= TRIALS, "{} callbacks for {} frames", frames.len(), TRIALS);
    assert!(
        valid_headers * 100 > TRIALS * 99,
        "{} of {} headers decoded",
        valid_headers,
        TRIALS
    );
    assert_eq!(stats.num_headers_valid, valid_headers);
    // every valid header must be the one that was sent
    for f in frames.iter().filter(|f| f.header_valid) {
        let index = u64::from_be_bytes(f.header.as_slice().try_into().unwrap());
        assert!(index < TRIALS as u64);
    }
}

#[test]
fn test_fractional_timing_offsets_decode() {
    init_logging();
    for (m, cp) in [(64, 16), (128, 32)] {
        let mut gen = FrameGenerator::<f32>::new(m, cp, None, FrameProperties::default()).unwrap();
        let payload: Vec<u8> = (0..90u8).map(|b| b.wrapping_mul(37)).collect();
        gen.assemble(b"between!", &payload).unwrap();
        let mut clean = vec![Complex::default(); 40];
        clean.extend(render(&mut gen));
        clean.extend(vec![Complex::default(); 200]);

        for delay in [0.25f32, 0.5, 0.75, 1.5] {
            let mut sync = FrameSynchronizer::<_, f32>::new(m, cp, None, Collector::default()).unwrap();
            sync.execute(&fractional_delay(&clean, delay));

            let frames = &sync.listener().frames;
            assert_eq!(frames.len(), 1, "M {} delay {}", m, delay);
            assert!(frames[0].header_valid, "M {} delay {}", m, delay);
            assert!(frames[0].payload_valid, "M {} delay {}", m, delay);
            assert_eq!(frames[0].header.as_slice(), b"between!");
            assert_eq!(frames[0].payload, payload);
        }
    }
}

#[test]
fn test_header_rate_with_fractional_timing_cfo_and_noise() {
    init_logging();
    const TRIALS: usize = 200;
    let mut rng = StdRng::seed_from_u64(0x5a17);
    let mut gen = FrameGenerator::<f32>::new(64, 16, None, FrameProperties::default()).unwrap();
    let mut sync = FrameSynchronizer::<_, f32>::new(64, 16, None, Collector::default()).unwrap();

    for trial in 0..TRIALS {
        let payload: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
        gen.assemble(&(trial as u64).to_be_bytes(), &payload).unwrap();
        let delay: f32 = rng.gen_range(0.0..1.0);
        let frame = fractional_delay(&render(&mut gen), delay);

        let cfo: f32 = rng.gen_range(-0.1..=0.1);
        let gap = rng.gen_range(100..400);
        sync.execute(&noise(gap, 10.0, &mut rng));
        sync.execute(&impair(&frame, cfo, 10.0, &mut rng));
    }
    sync.execute(&noise(500, 10.0, &mut rng));

    let frames = &sync.listener().frames;
    let valid_headers = frames.iter().filter(|f| f.header_valid).count();
    assert!(frames.len() <= TRIALS, "{} callbacks for {} frames", frames.len(), TRIALS);
    assert!(
        valid_headers * 100 >= TRIALS * 98,
        "{} of {} headers decoded",
        valid_headers,
        TRIALS
    );
}

#[test]
fn test_cfo_is_estimated() {
    init_logging();
    let mut gen = FrameGenerator::<f32>::new(64, 16, None, FrameProperties::default()).unwrap();
    gen.assemble(b"carrier!", &[0x33; 64]).unwrap();
    let mut clean = vec![Complex::default(); 50];
    clean.extend(render(&mut gen));
    clean.extend(vec![Complex::default(); 80]);

    for cfo in [-0.08f32, 0.0, 0.05] {
        let mut rng = StdRng::seed_from_u64(3);
        let samples = impair(&clean, cfo, 30.0, &mut rng);
        let mut sync = FrameSynchronizer::<_, f32>::new(64, 16, None, Collector::default()).unwrap();
        sync.execute(&samples);

        let frames = &sync.listener().frames;
        assert_eq!(frames.len(), 1, "cfo {}", cfo);
        assert!(frames[0].payload_valid);
        let estimated = frames[0].stats.cfo;
        assert!(
            (estimated - cfo as f64).abs() < 5e-3,
            "cfo {} estimated as {}",
            cfo,
            estimated
        );
    }
}

#[test]
fn test_snr_and_rssi_estimates() {
    let mut gen = FrameGenerator::<f32>::new(64, 16, None, FrameProperties::default()).unwrap();
    gen.assemble(b"measured", &[0x5a; 32]).unwrap();
    let frame = render(&mut gen);

    let mut rng = StdRng::seed_from_u64(99);
    let mut estimates = Vec::new();
    for snr_db in [12.0f32, 24.0] {
        let mut samples = noise(120, snr_db, &mut rng);
        samples.extend(impair(&frame, 0.01, snr_db, &mut rng));
        samples.extend(noise(120, snr_db, &mut rng));

        let mut sync = FrameSynchronizer::<_, f32>::new(64, 16, None, Collector::default()).unwrap();
        sync.execute(&samples);
        let frames = &sync.listener().frames;
        assert_eq!(frames.len(), 1);
        assert!(frames[0].header_valid);

        let stats = &frames[0].stats;
        assert!(
            (stats.estimated_snr_db - snr_db as f64).abs() < 5.0,
            "snr {} estimated as {}",
            snr_db,
            stats.estimated_snr_db
        );
        // unit signal power plus noise
        assert!(stats.rssi_db.abs() < 1.5, "rssi {}", stats.rssi_db);
        estimates.push(stats.estimated_snr_db);
    }
    assert!(estimates[1] > estimates[0] + 6.0);
}

#[test]
fn test_noise_alone_produces_no_frames() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut sync = FrameSynchronizer::<_, f32>::new(64, 16, None, Collector::default()).unwrap();
    for _ in 0..20 {
        sync.execute(&noise(5000, 0.0, &mut rng));
    }
    assert!(sync.listener().frames.is_empty());
    assert_eq!(sync.data_stats().num_frames_detected, 0);
}
