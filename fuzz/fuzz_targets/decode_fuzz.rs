#![no_main]
use libfuzzer_sys::fuzz_target;
use vcdelta::Status;
use vcdelta::compress::decoder::{self, DecoderConfig};
use vcdelta::source::MemorySource;
use vcdelta::vcdiff::Decoder;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must only ever produce errors, never panics.
    let _ = decoder::decode_all(&[], data);

    if data.len() < 3 {
        return;
    }
    // First byte picks the delivery size, the rest splits into source and delta.
    let chunk = 1 + data[0] as usize % 16;
    let (source, delta) = data[1..].split_at((data.len() - 1) / 2);
    let _ = decoder::decode_all(source, delta);

    let config = DecoderConfig {
        max_window_size: 1 << 20,
        ..DecoderConfig::default()
    };
    let Ok(mut dec) = Decoder::new(config, Some(MemorySource::new(source))) else {
        return;
    };
    let mut buf = Vec::new();
    let mut fed = 0;
    loop {
        let Ok(p) = dec.decode(&buf) else { return };
        buf.drain(..p.consumed);
        match p.status {
            Status::NeedMoreInput => {
                if fed == delta.len() {
                    return;
                }
                let end = (fed + chunk).min(delta.len());
                buf.extend_from_slice(&delta[fed..end]);
                fed = end;
            }
            Status::NeedSourceBlock(_) => return,
            _ => {}
        }
    }
});
