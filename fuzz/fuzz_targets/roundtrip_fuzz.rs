#![no_main]
use libfuzzer_sys::fuzz_target;
use vcdelta::compress::decoder;
use vcdelta::compress::encoder::{self, EncoderConfig};

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    // Control bytes: level, window size, split point.
    let level = u32::from(data[0] % 10);
    let window_size = 16 + (data[1] as usize) * 64;
    let split = 3 + (data[2] as usize % (data.len() - 3));
    let source = &data[3..split];
    let target = &data[split..];

    let config = EncoderConfig {
        window_size,
        ..EncoderConfig::with_level(level)
    };
    let delta = encoder::encode_all(source, target, config).expect("encode");
    let decoded = decoder::decode_all(source, &delta).expect("decode");
    assert_eq!(decoded, target);
});
