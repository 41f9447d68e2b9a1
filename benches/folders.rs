use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;

use docrepo::driver::{Driver, FileDriver, MemoryDriver};
use docrepo::folders::FolderStore;

/// Keys spread over `fanout` top folders, each two or three levels deep.
fn gen_keys(n: usize, fanout: u32, seed: u64) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let top = rng.gen_range(0..fanout);
            let mid = rng.gen_range(0..fanout);
            if rng.gen_bool(0.5) { format!("f{}/g{}/doc{}", top, mid, i) } else { format!("f{}/g{}/h{}/doc{}", top, mid, i % 7, i) }
        })
        .collect()
}

fn fill(driver: &dyn Driver, keys: &[String]) {
    for k in keys { driver.put(k, "{}").expect("put"); }
}

fn bench_listing(c: &mut Criterion) {
    let mut group = c.benchmark_group("folder_listing");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(20);

    for &n in &[1_000usize, 10_000usize] {
        let keys = gen_keys(n, 16, 0xF01D_E125);

        let mem: Arc<dyn Driver> = Arc::new(MemoryDriver::new("bench_folders"));
        fill(mem.as_ref(), &keys);
        let mem_store = FolderStore::new(mem);

        let tmp = tempfile::tempdir().expect("tempdir");
        let file: Arc<dyn Driver> = Arc::new(FileDriver::open(tmp.path().to_path_buf(), "bench").expect("file driver"));
        fill(file.as_ref(), &keys);
        let file_store = FolderStore::new(file);

        for (label, store) in [("memory", &mem_store), ("file", &file_store)] {
            group.bench_with_input(BenchmarkId::new(format!("children_root_{}", label), n), &n, |b, _| {
                b.iter(|| criterion::black_box(store.get_children("").expect("children")));
            });
            group.bench_with_input(BenchmarkId::new(format!("children_nested_{}", label), n), &n, |b, _| {
                b.iter(|| criterion::black_box(store.get_children("f3/g5").expect("children")));
            });
            group.bench_with_input(BenchmarkId::new(format!("list_depth2_{}", label), n), &n, |b, _| {
                b.iter(|| criterion::black_box(store.list_docs_by_prefix("f1", 2).expect("list")));
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_listing);
criterion_main!(benches);
