//! Throughput benchmark for the shift transform
//!
//! Measures forward and inverse cost per frame for typical audio packet and
//! video frame sizes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use framerelay_core::{EncodedFrame, FrameTransform, FrameType, ShiftTransform};

fn frame_for(size: usize) -> EncodedFrame {
    let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    if size <= 200 {
        EncodedFrame::audio(payload)
    } else {
        EncodedFrame::video(FrameType::Delta, payload)
    }
}

fn bench_forward(c: &mut Criterion) {
    let transform = ShiftTransform::default();
    let mut group = c.benchmark_group("shift_forward");

    for size in [160usize, 1_200, 12_000, 120_000] {
        let frame = frame_for(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| black_box(transform.forward(frame.clone())))
        });
    }
    group.finish();
}

fn bench_round_trip(c: &mut Criterion) {
    let transform = ShiftTransform::default();
    let mut group = c.benchmark_group("shift_round_trip");

    for size in [160usize, 12_000] {
        let frame = frame_for(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| {
                let sent = transform.forward(frame.clone());
                black_box(transform.inverse(sent).unwrap())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_forward, bench_round_trip);
criterion_main!(benches);
