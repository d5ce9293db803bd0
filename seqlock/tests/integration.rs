// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use rand::Rng;
use seqlock::{SeqLock, SeqLockCell};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc, Barrier, Mutex,
    },
    thread,
    time::Duration,
};
use stronghold_seqlock as seqlock;

#[cfg(test)]
#[ctor::ctor]
/// This function will be run before any of the tests
fn init_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

#[test]
fn test_multiple_readers_never_observe_torn_payload() {
    const WRITES: u64 = 10_000;

    // the invariant `b == a * 3` only survives a read that overlapped
    // no write, so any torn read trips the assertion
    let cell = Arc::new(SeqLockCell::new((0u64, 0u64)));

    let writer = {
        let cell = Arc::clone(&cell);
        thread::spawn(move || {
            for i in 1..=WRITES {
                cell.write((i, i.wrapping_mul(3)));
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                let mut last_seen = 0u64;
                for _ in 0..20_000 {
                    let (a, b) = cell.read();
                    assert_eq!(b, a.wrapping_mul(3), "torn read observed");
                    // committed generations are totally ordered
                    assert!(a >= last_seen);
                    last_seen = a;
                }
            })
        })
        .collect();

    writer.join().expect("Failed to join writer thread");
    for r in readers {
        r.join().expect("Failed to join reader thread");
    }

    assert_eq!(cell.read(), (WRITES, WRITES * 3));
    assert_eq!(cell.generation(), WRITES as u32);
}

#[test]
fn test_spin_writers_are_mutually_exclusive() {
    let lock = Arc::new(SeqLock::new());
    let announced = Arc::new(Mutex::new(Vec::new()));
    let inside = Arc::new(AtomicBool::new(false));

    let runs: u32 = rand::thread_rng().gen_range(0x100..0x1000);
    let pool = threadpool::ThreadPool::new(8);

    for _ in 0..runs {
        let lock = Arc::clone(&lock);
        let announced = Arc::clone(&announced);
        let inside = Arc::clone(&inside);
        pool.execute(move || {
            let guard = lock.write_lock_spin();
            assert!(!inside.swap(true, Ordering::SeqCst), "two writers inside");

            announced.lock().expect("Could not lock ledger").push(guard.announced());

            inside.store(false, Ordering::SeqCst);
            drop(guard);
        })
    }

    pool.join();

    assert_eq!(lock.sequence(), 2 * runs);

    // every odd value was taken exactly once
    let mut announced = announced.lock().expect("Could not lock ledger").clone();
    announced.sort_unstable();
    let expected: Vec<u32> = (0..runs).map(|n| 2 * n + 1).collect();
    assert_eq!(announced, expected);
}

#[test]
fn test_two_spin_writers_from_zero() {
    let lock = Arc::new(SeqLock::new());
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let guard = lock.write_lock_spin();
                let value = guard.announced();
                drop(guard);
                value
            })
        })
        .collect();

    let mut announced: Vec<u32> = handles
        .into_iter()
        .map(|h| h.join().expect("Failed to join writer thread"))
        .collect();
    announced.sort_unstable();

    // one CAS wins 0 -> 1, the loser re-baselines to 2 and wins 2 -> 3
    assert_eq!(announced, vec![1, 3]);
    assert_eq!(lock.sequence(), 4);
}

#[test]
fn test_reader_converges_after_writer_unlocks() {
    let lock = Arc::new(SeqLock::new());
    let payload = Arc::new(AtomicU64::new(0));
    let attempts = Arc::new(AtomicU32::new(0));

    let guard = lock.write_lock();
    payload.store(42, Ordering::Relaxed);

    let reader = {
        let lock = Arc::clone(&lock);
        let payload = Arc::clone(&payload);
        let attempts = Arc::clone(&attempts);
        thread::spawn(move || {
            lock.read(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                payload.load(Ordering::Relaxed)
            })
        })
    };

    // let the reader fail validation at least once against the held lock
    while attempts.load(Ordering::SeqCst) == 0 {
        thread::sleep(Duration::from_millis(1));
    }
    drop(guard);

    let value = reader.join().expect("Failed to join reader thread");
    assert_eq!(value, 42);
    assert!(attempts.load(Ordering::SeqCst) >= 2);
}

#[test]
fn test_unwinding_writer_still_unlocks() {
    let cell = Arc::new(SeqLockCell::new(0u32));

    let writer = {
        let cell = Arc::clone(&cell);
        thread::spawn(move || cell.update(|_| panic!("writer gave up mid-section")))
    };
    assert!(writer.join().is_err());

    // the guard closed the section on the unwind path
    assert!(!cell.is_write_locked());
    assert_eq!(cell.read(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_multiple_readers_single_write_async() {
    const EXPECTED: u64 = 15;

    let cell = Arc::new(SeqLockCell::new(6u64));

    let writer = {
        let cell = Arc::clone(&cell);
        tokio::spawn(async move {
            cell.update(|value| *value += 9);
        })
    };

    let mut readers = Vec::new();
    for _ in 0..100 {
        let cell = Arc::clone(&cell);
        readers.push(tokio::spawn(async move {
            loop {
                if cell.read() == EXPECTED {
                    break;
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    writer.await.expect("Failed to join writer task");
    for r in readers {
        r.await.expect("Failed to join reader task");
    }

    assert_eq!(cell.read(), EXPECTED);
}
