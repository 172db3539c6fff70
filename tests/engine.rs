use lsm_core::{
    Batch, Config, Engine, MergeOperator, SequenceNumberCounter, UserValue, ValueType, WalReader,
};
use std::sync::Arc;
use test_log::test;

fn open(folder: &tempfile::TempDir) -> lsm_core::Result<Engine> {
    Config::new(
        folder,
        SequenceNumberCounter::default(),
        SequenceNumberCounter::default(),
    )
    .open()
}

fn keys(engine: &Engine, snapshot: Option<u64>) -> lsm_core::Result<Vec<String>> {
    Ok(engine
        .iter(snapshot)
        .collect_vec()?
        .into_iter()
        .map(|(k, _)| String::from_utf8_lossy(&k).into_owned())
        .collect())
}

#[test]
fn engine_snapshot_isolation() -> lsm_core::Result<()> {
    let folder = tempfile::tempdir()?;
    let engine = open(&folder)?;

    for key in ["a", "b", "c"] {
        engine.insert(key, "old")?;
    }

    let snapshot = engine.snapshot_seqno();
    assert_eq!(3, snapshot);

    engine.insert("a", "new")?;
    engine.insert("d", "new")?;
    engine.remove("b")?;
    engine.rotate_memtable();
    engine.remove_range("c", "z")?;

    assert_eq!(vec!["a", "b", "c"], keys(&engine, Some(snapshot))?);
    assert_eq!(Some("old".into()), engine.get("a", Some(snapshot))?);

    // The raw view never returns anything newer than the snapshot
    let mut iter = engine.merging_iter(Some(snapshot));
    let mut item = lsm_core::InternalIterator::first(&mut iter);
    while let Some(kv) = item {
        assert!(kv.key.seqno <= snapshot);
        item = lsm_core::InternalIterator::next(&mut iter);
    }

    assert_eq!(vec!["a"], keys(&engine, None)?);
    assert_eq!(Some("new".into()), engine.get("a", None)?);

    Ok(())
}

#[test]
fn engine_batch_later_write_wins() -> lsm_core::Result<()> {
    let folder = tempfile::tempdir()?;
    let engine = open(&folder)?;

    let mut batch = Batch::new();
    batch.insert("a", "1");
    batch.insert("a", "2");
    batch.remove("b");
    batch.insert("b", "3");
    engine.write(&mut batch)?;

    assert_eq!(1, batch.seqno());
    assert_eq!(4, engine.snapshot_seqno());

    assert_eq!(Some("2".into()), engine.get("a", None)?);
    assert_eq!(Some("3".into()), engine.get("b", None)?);
    assert_eq!(Some("1".into()), engine.get("a", Some(1))?);

    Ok(())
}

#[test]
fn engine_remove_range() -> lsm_core::Result<()> {
    let folder = tempfile::tempdir()?;
    let engine = open(&folder)?;

    for key in ["a", "b", "c", "d", "e"] {
        engine.insert(key, key)?;
    }
    engine.rotate_memtable();

    let seqno = engine.remove_range("b", "d")?;
    assert_eq!(vec!["a", "d", "e"], keys(&engine, None)?);

    // Writes after the range deletion are not affected by it
    engine.insert("c", "again")?;
    assert_eq!(vec!["a", "c", "d", "e"], keys(&engine, None)?);

    assert_eq!(vec!["a", "b", "c", "d", "e"], keys(&engine, Some(seqno - 1))?);

    // Backwards iteration honors the tombstone too
    let mut iter = engine.iter(None);
    let mut reversed = vec![];
    let mut item = iter.last();
    while let Some((k, _)) = item {
        reversed.push(String::from_utf8_lossy(&k).into_owned());
        item = iter.prev();
    }
    iter.close()?;
    assert_eq!(vec!["e", "d", "c", "a"], reversed);

    Ok(())
}

#[test]
fn engine_ingest() -> lsm_core::Result<()> {
    let folder = tempfile::tempdir()?;
    let engine = open(&folder)?;

    engine.insert("a", "memtable")?;
    engine.insert("c", "memtable")?;
    engine.insert("x", "memtable")?;

    let seqno = engine.ingest(
        vec![("a".into(), "run".into()), ("b".into(), "run".into())],
        vec![("w".into(), "y".into())],
    );
    assert_eq!(4, seqno);
    assert_eq!(1, engine.run_count());
    assert_eq!(1, engine.sealed_memtable_count());

    // The run shadows earlier writes
    assert_eq!(Some("run".into()), engine.get("a", None)?);
    assert_eq!(Some("run".into()), engine.get("b", None)?);
    assert_eq!(Some("memtable".into()), engine.get("c", None)?);
    assert_eq!(None, engine.get("x", None)?);

    // Later writes shadow the run
    engine.insert("b", "later")?;
    engine.insert("x", "later")?;
    assert_eq!(Some("later".into()), engine.get("b", None)?);
    assert_eq!(Some("later".into()), engine.get("x", None)?);

    assert_eq!(vec!["a", "b", "c", "x"], keys(&engine, None)?);
    assert_eq!(vec!["a", "c", "x"], keys(&engine, Some(seqno - 1))?);

    Ok(())
}

#[test]
fn engine_ingest_empty_memtable() -> lsm_core::Result<()> {
    let folder = tempfile::tempdir()?;
    let engine = open(&folder)?;

    let seqno = engine.ingest(vec![("a".into(), "run".into())], vec![]);
    assert_eq!(1, seqno);
    assert_eq!(0, engine.sealed_memtable_count());
    assert_eq!(1, engine.run_count());
    assert_eq!(Some("run".into()), engine.get("a", None)?);

    Ok(())
}

struct Counter;

impl MergeOperator for Counter {
    fn merge(&self, _: &[u8], base: Option<&[u8]>, operands: &[&[u8]]) -> UserValue {
        let parse = |v: &[u8]| -> u64 {
            std::str::from_utf8(v)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0)
        };

        let sum = base.map(parse).unwrap_or(0) + operands.iter().map(|op| parse(op)).sum::<u64>();
        sum.to_string().into()
    }
}

#[test]
fn engine_merge_operator() -> lsm_core::Result<()> {
    let folder = tempfile::tempdir()?;
    let engine = Config::new(
        &folder,
        SequenceNumberCounter::default(),
        SequenceNumberCounter::default(),
    )
    .merge_operator(Some(Arc::new(Counter)))
    .open()?;

    engine.insert("counter", "10")?;

    for _ in 0..5 {
        let mut batch = Batch::new();
        batch.merge("counter", "1");
        engine.write(&mut batch)?;
    }

    // Operands spread over sealed memtables are folded too
    engine.rotate_memtable();
    let mut batch = Batch::new();
    batch.merge("counter", "100");
    batch.merge("fresh", "7");
    engine.write(&mut batch)?;

    assert_eq!(Some("115".into()), engine.get("counter", None)?);
    assert_eq!(Some("7".into()), engine.get("fresh", None)?);
    assert_eq!(Some("12".into()), engine.get("counter", Some(3))?);

    engine.remove("counter")?;
    let mut batch = Batch::new();
    batch.merge("counter", "2");
    engine.write(&mut batch)?;
    assert_eq!(Some("2".into()), engine.get("counter", None)?);

    Ok(())
}

#[test]
fn engine_concurrent_writers() -> lsm_core::Result<()> {
    const THREADS: u32 = 8;
    const WRITES: u32 = 500;

    let folder = tempfile::tempdir()?;
    let engine = Config::new(
        &folder,
        SequenceNumberCounter::default(),
        SequenceNumberCounter::default(),
    )
    .max_memtable_size(4_096)
    .open()?;

    std::thread::scope(|s| {
        for t in 0..THREADS {
            let engine = engine.clone();

            s.spawn(move || {
                for i in 0..WRITES {
                    let key = format!("{t}-{i:04}");
                    engine.insert(&key, &key).unwrap();

                    // Own writes are visible once the commit returned
                    assert_eq!(Some(key.as_str().into()), engine.get(&key, None).unwrap());
                }
            });
        }

        s.spawn(|| {
            for _ in 0..20 {
                engine.rotate_memtable();
                std::thread::yield_now();
            }
        });
    });

    let total = u64::from(THREADS * WRITES);
    assert_eq!(total, engine.snapshot_seqno());
    assert_eq!(total, engine.log_seqno());
    assert!(engine.sealed_memtable_count() > 0);
    assert_eq!(total as usize, engine.iter(None).collect_vec()?.len());

    Ok(())
}

#[test]
fn engine_wal_contains_batches() -> lsm_core::Result<()> {
    let folder = tempfile::tempdir()?;

    {
        let engine = open(&folder)?;

        let mut batch = Batch::new();
        batch.insert("a", "1");
        batch.remove_range("b", "c");
        engine.write_opt(&mut batch, true)?;

        engine.remove("a")?;
    }

    let batches = WalReader::open(folder.path().join("wal.log"))?
        .collect::<lsm_core::Result<Vec<_>>>()?;
    assert_eq!(2, batches.len());

    let first = batches.first().unwrap();
    assert_eq!(1, first.seqno());
    assert_eq!(
        vec![ValueType::Value, ValueType::RangeTombstone],
        first.iter().map(|e| e.unwrap().value_type).collect::<Vec<_>>(),
    );

    let second = batches.get(1).unwrap();
    assert_eq!(3, second.seqno());
    assert_eq!(1, second.len());

    Ok(())
}

#[test]
fn engine_resumes_sequence_numbers() -> lsm_core::Result<()> {
    let folder = tempfile::tempdir()?;

    let engine = Config::new(
        &folder,
        SequenceNumberCounter::new(100),
        SequenceNumberCounter::new(100),
    )
    .open()?;

    assert_eq!(101, engine.insert("a", "1")?);
    assert_eq!(101, engine.snapshot_seqno());

    Ok(())
}

#[test]
fn engine_concurrent_range_deletes_and_rotation() -> lsm_core::Result<()> {
    const THREADS: u32 = 6;
    const WRITES: u32 = 300;

    let folder = tempfile::tempdir()?;
    let engine = Config::new(
        &folder,
        SequenceNumberCounter::default(),
        SequenceNumberCounter::default(),
    )
    .max_memtable_size(2_048)
    .open()?;

    let (written, deletions) = std::thread::scope(|s| {
        let writers = (0..THREADS)
            .map(|t| {
                let engine = &engine;

                s.spawn(move || {
                    let mut written = vec![];

                    for i in 0..WRITES {
                        let key = format!("{t}-{i:04}");
                        let seqno = engine.insert(&key, "v").unwrap();

                        // Every tombstone visible at our own seqno is older than our write
                        assert_eq!(
                            Some("v".into()),
                            engine.get(&key, Some(seqno)).unwrap(),
                            "{key}@{seqno} was deleted by an older range tombstone",
                        );

                        written.push((key, seqno));
                    }

                    written
                })
            })
            .collect::<Vec<_>>();

        let deleter = s.spawn(|| {
            (0..40)
                .map(|_| {
                    std::thread::yield_now();
                    engine.remove_range("0", "~").unwrap()
                })
                .collect::<Vec<_>>()
        });

        s.spawn(|| {
            for _ in 0..100 {
                engine.rotate_memtable();
                std::thread::yield_now();
            }
        });

        let written = writers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect::<Vec<_>>();

        (written, deleter.join().unwrap())
    });

    let last_deletion = deletions.into_iter().max().unwrap_or_default();

    let mut expected = written
        .into_iter()
        .filter(|(_, seqno)| *seqno > last_deletion)
        .map(|(key, _)| key)
        .collect::<Vec<_>>();
    expected.sort();

    assert_eq!(expected, keys(&engine, None)?);
    assert!(engine.sealed_memtable_count() > 0);

    Ok(())
}
