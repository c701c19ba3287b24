use std::fs;
use std::path::Path;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use streamarch::{create_archive, extract_archive, CreateConfig, ExtractConfig};

const FILES: usize = 200;
const FILE_SIZE: usize = 64 * 1024;

fn build_tree(root: &Path) {
    for d in 0..10 {
        let dir = root.join(format!("dir{d}"));
        fs::create_dir_all(&dir).unwrap();
        for f in 0..FILES / 10 {
            let content: Vec<u8> = (0..FILE_SIZE).map(|i| (i * 31 + f + d) as u8).collect();
            fs::write(dir.join(format!("file{f}.bin")), content).unwrap();
        }
    }
}

fn bench_create(c: &mut Criterion) {
    let work = tempfile::tempdir().unwrap();
    let root = work.path().join("tree");
    build_tree(&root);

    let mut group = c.benchmark_group("create");
    group.throughput(Throughput::Bytes((FILES * FILE_SIZE) as u64));
    group.sample_size(20);
    for readers in [1usize, 4, 16] {
        let config = CreateConfig { dir_readers: readers, file_readers: readers, ..Default::default() };
        group.bench_with_input(BenchmarkId::from_parameter(readers), &config, |b, config| {
            b.iter(|| {
                let mut out = Vec::with_capacity(FILES * FILE_SIZE + (1 << 20));
                create_archive(&[root.clone()], &mut out, black_box(config)).unwrap();
                out
            })
        });
    }
    group.finish();
}

fn bench_extract(c: &mut Criterion) {
    let work = tempfile::tempdir().unwrap();
    let root = work.path().join("tree");
    build_tree(&root);
    let mut archive = Vec::new();
    create_archive(&[root], &mut archive, &CreateConfig::default()).unwrap();

    let mut group = c.benchmark_group("extract");
    group.throughput(Throughput::Bytes((FILES * FILE_SIZE) as u64));
    group.sample_size(20);
    group.bench_function("fs", |b| {
        b.iter(|| {
            let out = tempfile::tempdir().unwrap();
            let config = ExtractConfig { target: out.path().to_path_buf(), ..Default::default() };
            extract_archive(black_box(&archive[..]), &config).unwrap();
        })
    });
    group.bench_function("list", |b| {
        b.iter(|| streamarch::list_archive(black_box(&archive[..])).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_create, bench_extract);
criterion_main!(benches);
