use std::sync::{Arc, Barrier};
use std::thread;

use tempfile::NamedTempFile;
use tracing_subscriber::EnvFilter;

use umbra::{
    BufferPool, BufferPoolOptions, ExtendibleHashTable, HashTableOptions, IntComparator,
    Transaction, Xxh3Hasher,
};

const NUM_THREADS: usize = 8;
const KEYS_PER_THREAD: i32 = 200;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

fn shared_table(
    bucket_capacity: usize,
) -> (
    NamedTempFile,
    Arc<BufferPool>,
    Arc<ExtendibleHashTable<i32, i32, IntComparator, Xxh3Hasher>>,
) {
    init_tracing();
    let tmp = NamedTempFile::new().unwrap();
    let pool = Arc::new(BufferPool::open(tmp.path(), BufferPoolOptions { pool_size: 64 }).unwrap());
    let table = Arc::new(
        ExtendibleHashTable::with_options(
            "concurrent_index",
            Arc::clone(&pool),
            IntComparator,
            Xxh3Hasher,
            HashTableOptions {
                bucket_capacity: Some(bucket_capacity),
            },
        )
        .unwrap(),
    );
    (tmp, pool, table)
}

#[test]
fn concurrent_writers_on_disjoint_keys() {
    let (_tmp, pool, table) = shared_table(32);
    let barrier = Arc::new(Barrier::new(NUM_THREADS));

    let mut handles = Vec::new();
    for thread_id in 0..NUM_THREADS {
        let table = Arc::clone(&table);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            let txn = Transaction::new(thread_id as u64);
            barrier.wait();
            let base = thread_id as i32 * KEYS_PER_THREAD;
            for i in 0..KEYS_PER_THREAD {
                let key = base + i;
                assert!(table.insert(&txn, &key, &(key * 7)).unwrap());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let txn = Transaction::default();
    for key in 0..(NUM_THREADS as i32 * KEYS_PER_THREAD) {
        assert_eq!(table.get_value(&txn, &key).unwrap(), vec![key * 7]);
    }
    table.verify_integrity().unwrap();
    assert_eq!(pool.pinned_frames(), 0);
}

#[test]
fn readers_see_stable_values_while_a_writer_churns() {
    let (_tmp, pool, table) = shared_table(16);
    let txn = Transaction::default();

    // Stable keys the readers watch; the writer works on a disjoint range.
    for key in 0..400 {
        assert!(table.insert(&txn, &key, &(key + 1)).unwrap());
    }

    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    let mut handles = Vec::new();
    for thread_id in 0..NUM_THREADS - 1 {
        let table = Arc::clone(&table);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            let txn = Transaction::new(thread_id as u64);
            barrier.wait();
            for round in 0..20 {
                for key in (0..400).step_by(NUM_THREADS - 1) {
                    let key = key + thread_id as i32;
                    if key < 400 {
                        let values = table.get_value(&txn, &key).unwrap();
                        assert_eq!(values, vec![key + 1], "round {round}");
                    }
                }
            }
        }));
    }
    {
        let table = Arc::clone(&table);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            let txn = Transaction::new(99);
            barrier.wait();
            for round in 0..10 {
                for key in 1_000..1_400 {
                    assert!(table.insert(&txn, &key, &round).unwrap());
                }
                for key in 1_000..1_400 {
                    assert!(table.remove(&txn, &key, &round).unwrap());
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for key in 0..400 {
        assert_eq!(table.get_value(&txn, &key).unwrap(), vec![key + 1]);
    }
    table.verify_integrity().unwrap();
    assert_eq!(pool.pinned_frames(), 0);
}

#[test]
fn interleaved_insert_and_remove_keeps_the_union() {
    let (_tmp, _pool, table) = shared_table(32);
    let barrier = Arc::new(Barrier::new(NUM_THREADS));

    let mut handles = Vec::new();
    for thread_id in 0..NUM_THREADS {
        let table = Arc::clone(&table);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            let txn = Transaction::new(thread_id as u64);
            barrier.wait();
            let base = thread_id as i32 * KEYS_PER_THREAD;
            for i in 0..KEYS_PER_THREAD {
                let key = base + i;
                assert!(table.insert(&txn, &key, &key).unwrap());
            }
            // Drop the odd half again; other threads keep working.
            for i in (1..KEYS_PER_THREAD).step_by(2) {
                let key = base + i;
                assert!(table.remove(&txn, &key, &key).unwrap());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let txn = Transaction::default();
    for thread_id in 0..NUM_THREADS {
        let base = thread_id as i32 * KEYS_PER_THREAD;
        for i in 0..KEYS_PER_THREAD {
            let key = base + i;
            let values = table.get_value(&txn, &key).unwrap();
            if i % 2 == 0 {
                assert_eq!(values, vec![key]);
            } else {
                assert!(values.is_empty());
            }
        }
    }
    table.verify_integrity().unwrap();
}
