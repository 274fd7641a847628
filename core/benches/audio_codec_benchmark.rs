/// AudioCodec performance benchmarks using Criterion.
///
/// Run with: cargo bench --bench audio_codec_benchmark
///
/// Every call frame is 20ms of 8kHz mono audio (160 samples); a call that never
/// keeps up with real time backs up every downstream channel, so both directions
/// are benchmarked at frame scale and at a one-second batch.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use voice_stream_core::audio_codec::{decode, encode};

fn synthetic_frame(samples: usize) -> Vec<i16> {
    (0..samples)
        .map(|i| ((i as f32 * 0.2).sin() * 12_000.0) as i16)
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("audio_codec_encode");
    for frame_samples in [160usize, 8_000].iter() {
        let pcm = synthetic_frame(*frame_samples);
        group.throughput(Throughput::Elements(*frame_samples as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(frame_samples),
            &pcm,
            |b, pcm| {
                b.iter(|| black_box(encode(pcm)));
            },
        );
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("audio_codec_decode");
    for frame_samples in [160usize, 8_000].iter() {
        let payload = encode(&synthetic_frame(*frame_samples));
        group.throughput(Throughput::Elements(*frame_samples as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(frame_samples),
            &payload,
            |b, payload| {
                b.iter(|| black_box(decode(payload).unwrap()));
            },
        );
    }
    group.finish();
}

fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("audio_codec_round_trip");
    let pcm = synthetic_frame(160);
    group.bench_function("one_call_frame", |b| {
        b.iter(|| {
            let payload = encode(&pcm);
            black_box(decode(&payload).unwrap())
        });
    });
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_round_trip);
criterion_main!(benches);
