// Integration tests for the compress module.
//
// Full pipeline: DeltaEncoder -> VCDIFF stream -> DeltaDecoder, covering
// every matcher profile, streaming in odd-sized pieces, secondary
// compression (LZMA, Zlib, registered custom backends), application
// headers, interoperability with the xdelta3 C library and multi-window
// inputs.

use std::io::Cursor;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vcdelta::compress::decoder::{self, DecoderConfig, DeltaDecoder};
use vcdelta::compress::encoder::{self, DeltaEncoder, EncoderConfig};
use vcdelta::compress::secondary::{CompressBackend, SecondaryCompression};
use vcdelta::source::MemorySource;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn roundtrip(source: &[u8], target: &[u8], config: EncoderConfig) -> Vec<u8> {
    init_logging();
    let delta = encoder::encode_all(source, target, config).unwrap();
    let decoded = decoder::decode_all(source, &delta).unwrap();
    assert_eq!(
        decoded,
        target,
        "roundtrip mismatch (source={}, target={}, delta={})",
        source.len(),
        target.len(),
        delta.len()
    );
    delta
}

fn generate_data(size: usize, seed: u64) -> Vec<u8> {
    let mut data = vec![0u8; size];
    StdRng::seed_from_u64(seed).fill(&mut data[..]);
    data
}

fn mutate_data(source: &[u8], change_pct: f64, seed: u64) -> Vec<u8> {
    let mut target = source.to_vec();
    let mut rng = StdRng::seed_from_u64(seed);
    let changes = ((change_pct / 100.0) * source.len() as f64) as usize;
    for _ in 0..changes {
        let pos = rng.random_range(0..target.len());
        target[pos] = rng.random();
    }
    target
}

/// Word salad: compressible text with plenty of literal bytes.
fn text_data(total: usize, seed: u64) -> Vec<u8> {
    const WORDS: [&str; 12] = [
        "delta", "window", "source", "target", "copy", "run", "address", "cache", "block",
        "instruction", "checksum", "varint",
    ];
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(total + 16);
    while out.len() < total {
        out.extend_from_slice(WORDS[rng.random_range(0..WORDS.len())].as_bytes());
        out.push(if rng.random_ratio(1, 7) { b'\n' } else { b' ' });
    }
    out.truncate(total);
    out
}

fn repetitive_data(pattern: &[u8], total: usize) -> Vec<u8> {
    pattern.iter().copied().cycle().take(total).collect()
}

// ---------------------------------------------------------------------------
// Levels and profiles
// ---------------------------------------------------------------------------

#[test]
fn all_levels_1kb() {
    let source = generate_data(1024, 1);
    let target = mutate_data(&source, 5.0, 2);
    for level in 0..=9 {
        roundtrip(&source, &target, EncoderConfig::with_level(level));
    }
}

#[test]
fn all_levels_64kb() {
    let source = generate_data(64 * 1024, 3);
    let target = mutate_data(&source, 2.0, 4);
    for level in 0..=9 {
        let delta = roundtrip(&source, &target, EncoderConfig::with_level(level));
        assert!(delta.len() < target.len() * 3 / 4, "level {level}: {} bytes", delta.len());
    }
}

#[test]
fn output_is_deterministic() {
    let source = text_data(20_000, 5);
    let target = mutate_data(&source, 1.0, 6);
    let a = encoder::encode_all(&source, &target, EncoderConfig::default()).unwrap();
    let b = encoder::encode_all(&source, &target, EncoderConfig::default()).unwrap();
    assert_eq!(a, b);
}

// ---------------------------------------------------------------------------
// Streaming encode and decode
// ---------------------------------------------------------------------------

#[test]
fn streaming_encode_small_chunks() {
    let source = generate_data(10_000, 7);
    let target = mutate_data(&source, 3.0, 8);
    let config = EncoderConfig {
        window_size: 4096,
        ..EncoderConfig::default()
    };
    let whole = encoder::encode_all(&source, &target, config.clone()).unwrap();

    let mut enc = DeltaEncoder::new(Vec::new(), Some(MemorySource::new(&source)), config).unwrap();
    for chunk in target.chunks(333) {
        enc.write_target(chunk).unwrap();
    }
    let (delta, stats) = enc.finish().unwrap();
    assert_eq!(delta, whole);
    assert_eq!(stats.windows, 3);
    assert_eq!(stats.bytes_in, target.len() as u64);
    assert_eq!(stats.bytes_out, delta.len() as u64);
}

#[test]
fn streaming_encode_single_byte() {
    let target = b"abcabcabcabcabcabc".to_vec();
    let mut enc = DeltaEncoder::without_source(Vec::new(), EncoderConfig::default()).unwrap();
    for b in &target {
        enc.write_target(std::slice::from_ref(b)).unwrap();
    }
    let (delta, _) = enc.finish().unwrap();
    assert_eq!(decoder::decode_all(b"", &delta).unwrap(), target);
}

#[test]
fn streaming_decode_window_by_window() {
    let source = generate_data(50_000, 9);
    let target = mutate_data(&source, 1.0, 10);
    let config = EncoderConfig {
        window_size: 16 * 1024,
        ..EncoderConfig::default()
    };
    let delta = encoder::encode_all(&source, &target, config).unwrap();

    let mut dec = DeltaDecoder::new(
        Cursor::new(&delta),
        Some(MemorySource::new(&source)),
        DecoderConfig::default(),
    )
    .unwrap();
    let mut output = Vec::new();
    let mut windows = 0;
    while let Some(size) = dec.decode_window_to(&mut output).unwrap() {
        assert!(size <= 16 * 1024);
        windows += 1;
    }
    assert_eq!(windows, 4);
    assert_eq!(output, target);
    let stats = dec.stats();
    assert_eq!(stats.bytes_in, delta.len() as u64);
    assert_eq!(stats.bytes_out, target.len() as u64);
}

// ---------------------------------------------------------------------------
// Application header
// ---------------------------------------------------------------------------

#[test]
fn app_header_survives_roundtrip() {
    let config = EncoderConfig {
        app_header: Some(b"old.bin//new.bin/".to_vec()),
        ..EncoderConfig::default()
    };
    let delta = roundtrip(b"old contents here", b"new contents here", config);

    let mut dec = DeltaDecoder::new(
        Cursor::new(&delta),
        Some(MemorySource::new(b"old contents here")),
        DecoderConfig::default(),
    )
    .unwrap();
    assert_eq!(dec.app_header(), None);
    dec.decode_to(&mut Vec::new()).unwrap();
    assert_eq!(dec.app_header(), Some(&b"old.bin//new.bin/"[..]));
    let header = dec.session_mut().file_header().unwrap();
    assert_eq!(header.secondary_id, None);
}

// ---------------------------------------------------------------------------
// Secondary compression
// ---------------------------------------------------------------------------

#[cfg(feature = "lzma-secondary")]
#[test]
fn secondary_lzma_roundtrip() {
    let target = text_data(32 * 1024, 11);
    let config = EncoderConfig {
        secondary: SecondaryCompression::Lzma,
        ..EncoderConfig::default()
    };
    let packed = roundtrip(b"", &target, config);
    let plain = roundtrip(b"", &target, EncoderConfig::default());
    assert!(packed.len() < plain.len(), "lzma {} plain {}", packed.len(), plain.len());
}

#[cfg(feature = "zlib-secondary")]
#[test]
fn secondary_zlib_all_levels() {
    let source = repetitive_data(b"ABCDEFGHIJ", 4096);
    let mut target = text_data(8192, 12);
    target.extend_from_slice(&source);
    for level in [1, 6, 9] {
        let config = EncoderConfig {
            secondary: SecondaryCompression::Zlib { level },
            ..EncoderConfig::default()
        };
        roundtrip(&source, &target, config);
    }
}

#[cfg(feature = "zlib-secondary")]
#[test]
fn custom_backend_must_be_registered() {
    use vcdelta::compress::secondary::ZlibBackend;

    /// Zlib under a private compressor ID.
    struct Private(ZlibBackend);

    impl CompressBackend for Private {
        fn id(&self) -> u8 {
            200
        }
        fn compress(&self, data: &[u8]) -> vcdelta::Result<Vec<u8>> {
            self.0.compress(data)
        }
        fn decompress(&self, data: &[u8], raw_len: usize) -> vcdelta::Result<Vec<u8>> {
            self.0.decompress(data, raw_len)
        }
    }

    let backend: Arc<dyn CompressBackend> = Arc::new(Private(ZlibBackend::default()));
    let target = text_data(16 * 1024, 13);
    let config = EncoderConfig {
        secondary: SecondaryCompression::Custom(backend.clone()),
        ..EncoderConfig::default()
    };
    let delta = encoder::encode_all(b"", &target, config).unwrap();

    let err = decoder::decode_all(b"", &delta).unwrap_err();
    assert!(matches!(err, vcdelta::Error::InvalidInput(_)), "{err}");

    let mut dec = DeltaDecoder::without_source(Cursor::new(&delta), DecoderConfig::default()).unwrap();
    dec.session_mut().register_secondary(backend);
    let mut out = Vec::new();
    dec.decode_to(&mut out).unwrap();
    assert_eq!(out, target);
}

// ---------------------------------------------------------------------------
// Edge cases
// ---------------------------------------------------------------------------

#[test]
fn empty_source_empty_target() {
    roundtrip(b"", b"", EncoderConfig::default());
}

#[test]
fn empty_source() {
    roundtrip(b"", b"hello world", EncoderConfig::default());
}

#[test]
fn empty_target() {
    roundtrip(b"hello world", b"", EncoderConfig::default());
}

#[test]
fn identical_source_and_target() {
    let data = generate_data(10_000, 14);
    let delta = roundtrip(&data, &data, EncoderConfig::default());
    assert!(delta.len() < 40, "delta {} bytes", delta.len());
}

#[test]
fn single_byte_target() {
    roundtrip(b"x", b"y", EncoderConfig::default());
}

#[test]
fn all_zeros() {
    let data = vec![0u8; 100_000];
    let delta = roundtrip(b"", &data, EncoderConfig::default());
    assert!(delta.len() < 40);
}

#[test]
fn without_checksums() {
    let config = EncoderConfig {
        checksum: false,
        ..EncoderConfig::default()
    };
    let with = roundtrip(b"abc", b"abcabcabc", EncoderConfig::default());
    let without = roundtrip(b"abc", b"abcabcabc", config);
    assert_eq!(with.len(), without.len() + 4);
}

// ---------------------------------------------------------------------------
// Multi-window processing
// ---------------------------------------------------------------------------

#[test]
fn multi_window_large_data() {
    let source = generate_data(1 << 20, 15);
    let target = mutate_data(&source, 0.5, 16);
    let config = EncoderConfig {
        window_size: 64 * 1024,
        ..EncoderConfig::default()
    };
    let delta = roundtrip(&source, &target, config);
    assert!(delta.len() < target.len() / 4);
}

#[test]
fn inserted_prefix_shifts_every_window() {
    let source = generate_data(200_000, 17);
    let mut target = b"a short inserted prefix".to_vec();
    target.extend_from_slice(&source);
    let config = EncoderConfig {
        window_size: 32 * 1024,
        ..EncoderConfig::default()
    };
    let delta = roundtrip(&source, &target, config);
    assert!(delta.len() < 512, "delta {} bytes", delta.len());
}

// ---------------------------------------------------------------------------
// Interoperability with the xdelta3 C library
// ---------------------------------------------------------------------------

#[test]
fn xdelta3_decodes_our_output() {
    let source = generate_data(20_000, 18);
    let target = mutate_data(&source, 2.0, 19);
    let delta = encoder::encode_all(&source, &target, EncoderConfig::default()).unwrap();
    let decoded = xdelta3::decode(&delta, &source).expect("xdelta3 failed to decode");
    assert_eq!(decoded, target);
}

#[test]
fn we_decode_xdelta3_output() {
    let source = generate_data(20_000, 20);
    let target = mutate_data(&source, 2.0, 21);
    let delta = xdelta3::encode(&target, &source).expect("xdelta3 failed to encode");
    assert_eq!(decoder::decode_all(&source, &delta).unwrap(), target);
}
