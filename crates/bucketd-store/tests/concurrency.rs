//! Transaction isolation and durability of the store under concurrent use.

use bucketd_store::{Store, StoreOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

fn open_store(dir: &std::path::Path) -> Store {
    let store = Store::open(StoreOptions::new(dir.join("concurrency.db"))).unwrap();
    store.ensure_namespace().unwrap();
    store
}

#[test]
fn many_concurrent_readers_complete() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open_store(dir.path()));
    store.put("shared", "value").unwrap();

    let readers = 32;
    let barrier = Arc::new(Barrier::new(readers));
    let started = Instant::now();
    let handles: Vec<_> = (0..readers)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..200 {
                    assert_eq!(store.get("shared").unwrap().as_deref(), Some("value"));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert!(
        started.elapsed() < Duration::from_secs(30),
        "readers should not serialize behind each other"
    );
}

#[test]
fn readers_never_observe_partial_writes() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open_store(dir.path()));

    let a = "a".repeat(4096);
    let b = "b".repeat(4096);
    store.put("doc", &a).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let writer = {
        let store = Arc::clone(&store);
        let stop = Arc::clone(&stop);
        let (a, b) = (a.clone(), b.clone());
        thread::spawn(move || {
            let mut flip = false;
            while !stop.load(Ordering::SeqCst) {
                store.put("doc", if flip { &a } else { &b }).unwrap();
                flip = !flip;
            }
        })
    };

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let (a, b) = (a.clone(), b.clone());
            thread::spawn(move || {
                for _ in 0..300 {
                    let seen = store.get("doc").unwrap().unwrap();
                    assert!(seen == a || seen == b, "torn read of {} bytes", seen.len());
                }
            })
        })
        .collect();

    for r in readers {
        r.join().unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    writer.join().unwrap();
}

#[test]
fn concurrent_writers_are_serialized_without_loss() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open_store(dir.path()));

    let writers = 8;
    let per_writer = 25;
    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..per_writer {
                    store.put(&format!("w{w}-k{i}"), &format!("{w}:{i}")).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.len().unwrap(), (writers * per_writer) as u64);
    assert_eq!(store.get("w3-k7").unwrap().as_deref(), Some("3:7"));
}

#[test]
fn last_writer_wins_on_same_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    for i in 0..10 {
        store.put("counter", &i.to_string()).unwrap();
    }
    assert_eq!(store.get("counter").unwrap().as_deref(), Some("9"));
}

#[test]
fn committed_writes_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open_store(dir.path());
        store.put("persist", "me").unwrap();
        store.put("gone", "soon").unwrap();
        store.delete("gone").unwrap();
        // Dropped without close(): committed data must still be on disk.
    }

    let store = open_store(dir.path());
    assert_eq!(store.get("persist").unwrap().as_deref(), Some("me"));
    assert_eq!(store.get("gone").unwrap(), None);
    assert_eq!(store.len().unwrap(), 1);
}
