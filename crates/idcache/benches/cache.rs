use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use idcache::{CacheConfig, CacheKey, EntryType, EvictionPolicy, IdentityCache};

fn payload() -> Vec<u8> {
    vec![b'x'; 1024]
}

fn keys(n: usize) -> Vec<CacheKey> {
    (0..n)
        .map(|i| CacheKey::new(EntryType::Identity, format!("addr{}", i)))
        .collect()
}

fn bench_cached_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_get");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_1kb_hit", |b| {
        let cache = IdentityCache::new(CacheConfig::default().with_metrics(false));
        let keys = keys(100);
        for key in &keys {
            cache.set(key.clone(), payload(), None).unwrap();
        }

        let mut counter = 0;
        b.iter(|| {
            black_box(cache.get(&keys[counter % 100]));
            counter += 1;
        });
    });

    group.finish();
}

fn bench_mixed_50_50(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("50_read_50_write", |b| {
        let cache = IdentityCache::new(CacheConfig::default().with_metrics(false));
        let keys = keys(100);
        for key in &keys {
            cache.set(key.clone(), payload(), None).unwrap();
        }

        let mut counter = 0usize;
        b.iter(|| {
            let key = &keys[counter % 100];
            if counter % 2 == 0 {
                black_box(cache.get(key));
            } else {
                black_box(cache.set(key.clone(), payload(), None).ok());
            }
            counter += 1;
        });
    });

    group.finish();
}

fn bench_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("eviction");
    group.sample_size(20);
    group.throughput(Throughput::Elements(1));

    for policy in [EvictionPolicy::Lru, EvictionPolicy::Hybrid] {
        group.bench_function(format!("set_full_cache_{}", policy), |b| {
            let config = CacheConfig::default()
                .with_metrics(false)
                .with_max_entries(1000)
                .with_eviction_policy(policy);
            let cache = IdentityCache::new(config);
            let keys = keys(2000);

            let mut counter = 0;
            b.iter(|| {
                black_box(cache.set(keys[counter % 2000].clone(), payload(), None).ok());
                counter += 1;
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cached_get, bench_mixed_50_50, bench_eviction);
criterion_main!(benches);
