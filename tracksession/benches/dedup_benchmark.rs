//! Benchmarks for the fusion and dedup passes over a populated store

use boxtrack::Bbox;
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use tracksession::{
    deduplicate, fuse, Detection, LifecyclePolicy, SessionConfig, TrackStore, VideoMetadata,
};

fn video() -> VideoMetadata {
    VideoMetadata {
        width: 1920,
        height: 1080,
        frame_rate: 30.0,
        total_frames: None,
    }
}

fn random_boxes(rng: &mut StdRng, n: usize) -> Vec<(Bbox, f32)> {
    (0..n)
        .map(|_| {
            let x = rng.gen_range(0.0..1800.0);
            let y = rng.gen_range(0.0..1000.0);
            let w = rng.gen_range(20.0..120.0);
            let h = rng.gen_range(20.0..120.0);
            (Bbox::from_xywh(x, y, w, h), rng.gen_range(0.3..0.95))
        })
        .collect()
}

fn populated_store(config: &SessionConfig, n: usize) -> TrackStore {
    let mut rng = StdRng::seed_from_u64(n as u64);
    let mut store = TrackStore::new(LifecyclePolicy::new(config, &video()));
    for (bbox, confidence) in random_boxes(&mut rng, n) {
        store.create(bbox, confidence, 1);
    }
    store
}

fn bench_dedup(c: &mut Criterion) {
    let config = SessionConfig::default();
    let mut group = c.benchmark_group("dedup");

    for n in [10usize, 50, 150] {
        let store = populated_store(&config, n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &store, |b, store| {
            b.iter_batched(
                || store.clone(),
                |mut store| deduplicate(black_box(&mut store), 30, &config),
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_fusion(c: &mut Criterion) {
    let config = SessionConfig::default();
    let mut group = c.benchmark_group("fusion");

    for n in [10usize, 50] {
        let store = populated_store(&config, 30);
        let mut rng = StdRng::seed_from_u64(99);
        let detections: Vec<Detection> = random_boxes(&mut rng, n)
            .into_iter()
            .map(|(bbox, confidence)| Detection::new(bbox, confidence))
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(n), &detections, |b, detections| {
            b.iter_batched(
                || (store.clone(), detections.clone()),
                |(mut store, detections)| fuse(black_box(detections), 60, &mut store, &config),
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_dedup, bench_fusion);
criterion_main!(benches);
