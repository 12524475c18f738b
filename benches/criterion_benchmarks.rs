use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::Path;
use vcdelta::compress::decoder;
use vcdelta::compress::encoder::{self, EncoderConfig};
use vcdelta::compress::secondary::SecondaryCompression;
use vcdelta::hash::MatcherProfile;
use vcdelta::hash::rolling::{LargeHash, small_cksum};
use vcdelta::hash::table::SmallTable;
use vcdelta::source::MemorySource;
use vcdelta::vcdiff::Decoder;
use vcdelta::vcdiff::decoder::DecoderConfig;
use vcdelta::Status;

fn gen_data(size: usize, seed: u64) -> Vec<u8> {
    let mut out = vec![0u8; size];
    StdRng::seed_from_u64(seed).fill(&mut out[..]);
    out
}

fn mutate(base: &[u8], stride: usize) -> Vec<u8> {
    let mut out = base.to_vec();
    for i in (0..out.len()).step_by(stride.max(1)) {
        out[i] = out[i].wrapping_add(1);
    }
    out
}

fn encode_with(source: &[u8], target: &[u8], profile: MatcherProfile) -> Vec<u8> {
    let config = EncoderConfig {
        profile,
        ..EncoderConfig::default()
    };
    encoder::encode_all(source, target, config).unwrap()
}

const PROFILES: [MatcherProfile; 5] = [
    MatcherProfile::Fastest,
    MatcherProfile::Faster,
    MatcherProfile::Fast,
    MatcherProfile::Default,
    MatcherProfile::Slow,
];

fn write_ratio_snapshot() {
    let source = gen_data(2 * 1024 * 1024, 123);
    let target = mutate(&source, 4096);
    let mut csv = String::from("profile,delta_bytes,target_bytes,ratio\n");
    for profile in PROFILES {
        let delta = encode_with(&source, &target, profile);
        let ratio = delta.len() as f64 / target.len() as f64;
        csv.push_str(&format!("{},{},{},{ratio}\n", profile.name(), delta.len(), target.len()));
    }
    let out_dir = Path::new("target/criterion/custom_reports");
    let _ = fs::create_dir_all(out_dir);
    let _ = fs::write(out_dir.join("ratio_by_profile.csv"), csv);
}

fn bench_encode_by_profile(c: &mut Criterion) {
    write_ratio_snapshot();
    let mut g = c.benchmark_group("encode_by_profile");
    let source = gen_data(1024 * 1024, 1);
    let target = mutate(&source, 1024);
    g.throughput(Throughput::Bytes(target.len() as u64));
    for profile in PROFILES {
        g.bench_with_input(BenchmarkId::from_parameter(profile.name()), &profile, |b, profile| {
            b.iter(|| black_box(encode_with(black_box(&source), black_box(&target), *profile)));
        });
    }
    g.finish();
}

fn bench_encode_by_size(c: &mut Criterion) {
    let mut g = c.benchmark_group("encode_by_size");
    for size in [64 * 1024usize, 1024 * 1024, 8 * 1024 * 1024] {
        let source = gen_data(size, 2);
        let target = mutate(&source, 1024);
        g.throughput(Throughput::Bytes(size as u64));
        g.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(encode_with(&source, &target, MatcherProfile::Default)));
        });
    }
    g.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut g = c.benchmark_group("decode");
    for size in [64 * 1024usize, 1024 * 1024, 8 * 1024 * 1024] {
        let source = gen_data(size, 3);
        let target = mutate(&source, 2048);
        let delta = encode_with(&source, &target, MatcherProfile::Default);
        g.throughput(Throughput::Bytes(target.len() as u64));
        g.bench_with_input(BenchmarkId::new("whole", size), &size, |b, _| {
            b.iter(|| black_box(decoder::decode_all(black_box(&source), black_box(&delta)).unwrap()));
        });
        g.bench_with_input(BenchmarkId::new("4k_pieces", size), &size, |b, _| {
            b.iter(|| black_box(decode_in_pieces(&source, &delta, 4096)));
        });
    }
    g.finish();
}

/// Resumable decode with input handed over a piece at a time.
fn decode_in_pieces(source: &[u8], delta: &[u8], piece: usize) -> usize {
    let mut session = Decoder::new(DecoderConfig::default(), Some(MemorySource::new(source))).unwrap();
    let mut pending = Vec::new();
    let mut rest = delta;
    let mut total = 0;
    loop {
        let progress = session.decode(&pending).unwrap();
        pending.drain(..progress.consumed);
        match progress.status {
            Status::NeedMoreInput if rest.is_empty() => return total,
            Status::NeedMoreInput => {
                let n = piece.min(rest.len());
                pending.extend_from_slice(&rest[..n]);
                rest = &rest[n..];
            }
            Status::Output => total += session.output().len(),
            _ => {}
        }
    }
}

fn bench_secondary(c: &mut Criterion) {
    let mut g = c.benchmark_group("secondary_compression");
    let source = gen_data(1024 * 1024, 4);
    let mut target = mutate(&source, 512);
    target.extend(b"appended text that only exists in the target. ".repeat(2000));
    g.throughput(Throughput::Bytes(target.len() as u64));
    let modes = [
        ("none", SecondaryCompression::None),
        ("lzma", SecondaryCompression::Lzma),
        ("zlib", SecondaryCompression::Zlib { level: 6 }),
    ];
    for (name, secondary) in modes {
        let config = EncoderConfig {
            secondary,
            ..EncoderConfig::default()
        };
        g.bench_function(name, |b| {
            b.iter(|| black_box(encoder::encode_all(&source, &target, config.clone()).unwrap()));
        });
    }
    g.finish();
}

fn bench_rolling_hash(c: &mut Criterion) {
    let mut g = c.benchmark_group("rolling_hash");
    let data = gen_data(1024 * 1024, 5);
    g.throughput(Throughput::Bytes(data.len() as u64));
    g.bench_function("large_roll_9", |b| {
        let hash = LargeHash::new(9);
        b.iter(|| {
            let mut h = hash.checksum(&data);
            for pos in 0..data.len() - 9 {
                h = hash.update(h, &data[pos..]);
            }
            black_box(h)
        });
    });
    g.bench_function("small_cksum_4", |b| {
        b.iter(|| {
            let mut acc = 0u32;
            for pos in 0..data.len() - 4 {
                acc ^= small_cksum(&data[pos..]);
            }
            black_box(acc)
        });
    });
    g.finish();
}

fn bench_small_table(c: &mut Criterion) {
    let mut g = c.benchmark_group("small_table");
    for slots in [1usize << 14, 1 << 16, 1 << 18] {
        g.bench_with_input(BenchmarkId::from_parameter(slots), &slots, |b, slots| {
            b.iter(|| {
                let mut table = SmallTable::new(*slots, *slots / 2);
                for i in 0..(*slots / 2) {
                    table.insert((i as u32).wrapping_mul(2654435761), i as u64);
                }
                black_box(table.lookup(0x1234_5678))
            });
        });
    }
    g.finish();
}

fn bench_xdelta3_compare(c: &mut Criterion) {
    let mut g = c.benchmark_group("xdelta3_compare");
    let source = gen_data(1024 * 1024, 8);
    let target = mutate(&source, 1024);
    g.bench_function("vcdelta_encode", |b| {
        b.iter(|| black_box(encode_with(black_box(&source), black_box(&target), MatcherProfile::Default)));
    });
    g.bench_function("xdelta3_encode", |b| {
        b.iter(|| black_box(xdelta3::encode(black_box(&target), black_box(&source)).unwrap()));
    });
    g.finish();
}

criterion_group!(
    benches,
    bench_encode_by_profile,
    bench_encode_by_size,
    bench_decode,
    bench_secondary,
    bench_rolling_hash,
    bench_small_table,
    bench_xdelta3_compare
);
criterion_main!(benches);
