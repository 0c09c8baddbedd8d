use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use tokio::runtime::Runtime;

use blobstore::{InMemoryBlobService, MAX_LEASE_DURATION};
use cloudlock::CloudLock;

fn acquire_release_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let service = InMemoryBlobService::new();
    service.upload("bench", "0");
    let blob = Arc::new(service.blob("bench"));

    c.bench_function("uncontended acquire + release", |b| {
        b.to_async(&rt).iter(|| {
            let blob = blob.clone();
            async move {
                let mut lock = CloudLock::new(blob, None).unwrap();
                assert!(lock.try_acquire().await.unwrap());
                lock.release().await.unwrap();
            }
        })
    });

    c.bench_function("contended try_acquire", |b| {
        let mut holder = CloudLock::new(blob.clone(), Some(MAX_LEASE_DURATION)).unwrap();
        assert!(rt.block_on(holder.try_acquire()).unwrap());

        b.to_async(&rt).iter(|| {
            let blob = blob.clone();
            async move {
                let mut lock = CloudLock::new(blob, None).unwrap();
                assert!(!lock.try_acquire().await.unwrap());
            }
        });

        rt.block_on(holder.release()).unwrap();
    });
}

criterion_group!(benches, acquire_release_benchmark);
criterion_main!(benches);
