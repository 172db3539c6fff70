use criterion::{criterion_group, criterion_main, Criterion};
use lsm_core::{Batch, Config, SequenceNumberCounter};

fn commit(c: &mut Criterion) {
    let folder = tempfile::tempdir().unwrap();
    let engine = Config::new(
        &folder,
        SequenceNumberCounter::default(),
        SequenceNumberCounter::default(),
    )
    .open()
    .unwrap();

    c.bench_function("commit single", |b| {
        b.iter(|| {
            engine.insert("a", "b").unwrap();
        });
    });

    c.bench_function("commit batch of 100", |b| {
        b.iter(|| {
            let mut batch = Batch::new();
            for idx in 0..100u32 {
                batch.insert(idx.to_be_bytes(), "value");
            }
            engine.write(&mut batch).unwrap();
        });
    });

    c.bench_function("commit synced", |b| {
        b.iter(|| {
            let mut batch = Batch::new();
            batch.insert("a", "b");
            engine.write_opt(&mut batch, true).unwrap();
        });
    });

    for threads in [4, 16] {
        c.bench_function(&format!("commit {threads} threads"), |b| {
            b.iter(|| {
                std::thread::scope(|s| {
                    for _ in 0..threads {
                        s.spawn(|| {
                            for _ in 0..100 {
                                engine.insert("a", "b").unwrap();
                            }
                        });
                    }
                });
            });
        });
    }
}

criterion_group!(benches, commit);
criterion_main!(benches);
