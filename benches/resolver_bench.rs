use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use modloader::plugins::resolver::resolve;
use modloader::plugins::{PluginDescriptor, PluginId, PluginRegistry, StaticPluginSource};
use uuid::Uuid;

/// Layered graph: every plugin depends on up to three plugins of the previous layer
fn layered_graph(count: usize) -> Vec<PluginDescriptor> {
    (0..count)
        .map(|i| {
            let layer_start = i - i % 16;
            let deps = (1..=3)
                .filter_map(|k| layer_start.checked_sub(k * 5))
                .map(|d| Uuid::from_u128(d as u128));
            PluginDescriptor::new(Uuid::from_u128(i as u128), format!("plugin-{i}"))
                .with_dependencies(deps)
        })
        .collect()
}

/// Benchmark load order computation
fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");

    for count in &[16, 128, 1024] {
        let plugins = layered_graph(*count);
        let available: Vec<&PluginDescriptor> = plugins.iter().collect();
        let last: PluginId = Uuid::from_u128(*count as u128 - 1);
        let everything: &[PluginId] = &[];

        group.bench_with_input(BenchmarkId::new("everything", count), count, |b, _| {
            b.iter(|| resolve(black_box(everything), black_box(&available), &[]));
        });
        group.bench_with_input(BenchmarkId::new("single", count), count, |b, _| {
            b.iter(|| resolve(black_box(&[last]), black_box(&available), &[]));
        });
    }

    group.finish();
}

/// Benchmark a full load and unload cycle
fn bench_load_unload(c: &mut Criterion) {
    let mut group = c.benchmark_group("lifecycle");

    group.bench_function("load_unload_128", |b| {
        b.iter(|| {
            let mut registry = PluginRegistry::new().with_source(Box::new(
                StaticPluginSource::from_descriptors(layered_graph(128)),
            ));
            black_box(registry.load(&[]));
            registry.unload(&[]);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_resolve, bench_load_unload);
criterion_main!(benches);
