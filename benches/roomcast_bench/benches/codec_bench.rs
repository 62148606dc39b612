//! Wire framing benchmarks
//!
//! Measures marker framing of room payloads in both directions.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use roomcast_pubsub::codec::{decode, encode};
use roomcast_pubsub::Payload;

fn sizes() -> [(&'static str, usize); 4] {
    [("tiny", 8), ("small", 128), ("medium", 4096), ("large", 64 * 1024)]
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_encode");

    for (name, size) in sizes() {
        let text = Payload::text("x".repeat(size));
        let binary = Payload::binary(vec![0u8; size]);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("text", name), &text, |b, payload| {
            b.iter(|| encode(black_box(payload)))
        });
        group.bench_with_input(BenchmarkId::new("binary", name), &binary, |b, payload| {
            b.iter(|| encode(black_box(payload)))
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_decode");

    for (name, size) in sizes() {
        let text = encode(&Payload::text("x".repeat(size)));
        let binary = encode(&Payload::binary(vec![0u8; size]));
        group.throughput(Throughput::Bytes(size as u64));

        // Text frames pay for UTF-8 validation
        group.bench_with_input(BenchmarkId::new("text", name), &text, |b, frame| {
            b.iter(|| decode(black_box(frame.clone())))
        });
        group.bench_with_input(BenchmarkId::new("binary", name), &binary, |b, frame| {
            b.iter(|| decode(black_box(frame.clone())))
        });
    }

    group.bench_function("foreign_marker", |b| {
        let frame = Bytes::from_static(b"{\"not\":\"framed\"}");
        b.iter(|| decode(black_box(frame.clone())))
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
