use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use libetude_world::{F0Algorithm, WorldConfig, analyze};

fn sine(freq: f64, config: &WorldConfig, seconds: f64) -> Vec<f32> {
    let n = (config.sample_rate as f64 * seconds) as usize;
    (0..n)
        .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / config.sample_rate as f64).sin() as f32)
        .collect()
}

fn bench_analyze(c: &mut Criterion) {
    let mut group = c.benchmark_group("world/analyze");
    for seconds in [0.25, 0.5, 1.0] {
        let config = WorldConfig::new(16000);
        let signal = sine(150.0, &config, seconds);
        group.bench_with_input(BenchmarkId::new("dio", seconds), &signal, |b, signal| {
            b.iter(|| analyze(black_box(signal), black_box(&config), F0Algorithm::Dio).unwrap());
        });
    }
    group.finish();
}

fn bench_harvest_vs_dio(c: &mut Criterion) {
    let mut group = c.benchmark_group("world/f0_algorithm");
    let config = WorldConfig::new(16000);
    let signal = sine(150.0, &config, 0.5);
    group.bench_function("dio", |b| {
        b.iter(|| analyze(black_box(&signal), black_box(&config), F0Algorithm::Dio).unwrap());
    });
    group.bench_function("harvest", |b| {
        b.iter(|| analyze(black_box(&signal), black_box(&config), F0Algorithm::Harvest).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_analyze, bench_harvest_vs_dio);
criterion_main!(benches);
