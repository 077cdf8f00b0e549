// Concurrency tests for hashlog
// Serialized writers and lock-free readers sharing one map

use hashlog::{DurableMap, Options, StringDescriptor, U64Descriptor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

/// Concurrent writes on distinct keys are all retained
#[test]
fn test_concurrent_writers_distinct_keys() {
    let dir = TempDir::new().unwrap();
    let map: Arc<DurableMap<String, String>> = Arc::new(
        DurableMap::open(dir.path(), StringDescriptor, StringDescriptor, Options::default()).unwrap(),
    );

    let num_threads = 8;
    let keys_per_thread = 100;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..keys_per_thread {
                    map.put(&format!("t{}-k{}", t, i), &format!("v{}-{}", t, i)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(map.size(), num_threads * keys_per_thread);
    for t in 0..num_threads {
        for i in 0..keys_per_thread {
            assert_eq!(
                map.get(&format!("t{}-k{}", t, i)).unwrap(),
                Some(format!("v{}-{}", t, i)),
                "Lost update for t{}-k{}",
                t,
                i
            );
        }
    }
}

/// Writers racing on the same keys never leave duplicate bindings
#[test]
fn test_concurrent_writers_same_keys() {
    let dir = TempDir::new().unwrap();
    let map: Arc<DurableMap<u64, u64>> =
        Arc::new(DurableMap::open(dir.path(), U64Descriptor, U64Descriptor, Options::default()).unwrap());

    let num_threads = 4;
    let num_keys = 50u64;

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for round in 0..20u64 {
                    for key in 0..num_keys {
                        map.put(&key, &(round * 100 + t)).unwrap();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(map.size(), num_keys as usize);
    assert_eq!(map.entries().unwrap().len(), num_keys as usize);
    for key in 0..num_keys {
        let value = map.get(&key).unwrap().expect("key must be present");
        assert_eq!(value / 100, 19, "Final value must come from the last round");
    }
}

/// Readers running alongside a writer only ever see whole values
#[test]
fn test_readers_during_writes() {
    let dir = TempDir::new().unwrap();
    let map: Arc<DurableMap<String, String>> = Arc::new(
        DurableMap::open(dir.path(), StringDescriptor, StringDescriptor, Options::default()).unwrap(),
    );
    map.put(&"shared".to_string(), &"gen-0".to_string()).unwrap();

    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let map = Arc::clone(&map);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut reads = 0u64;
                while !done.load(Ordering::Acquire) {
                    let value = map.get(&"shared".to_string()).unwrap();
                    let value = value.expect("shared key is never removed");
                    assert!(value.starts_with("gen-"), "Torn value: {:?}", value);
                    reads += 1;
                }
                reads
            })
        })
        .collect();

    for i in 1..=500 {
        map.put(&"shared".to_string(), &format!("gen-{}", i)).unwrap();
        map.put(&format!("other-{}", i), &"x".to_string()).unwrap();
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    assert_eq!(map.get(&"shared".to_string()).unwrap(), Some("gen-500".to_string()));
}

/// Concurrent put/remove churn keeps size consistent with the contents
#[test]
fn test_concurrent_put_remove() {
    let dir = TempDir::new().unwrap();
    let map: Arc<DurableMap<u64, u64>> =
        Arc::new(DurableMap::open(dir.path(), U64Descriptor, U64Descriptor, Options::default()).unwrap());

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                let base = t * 1000;
                for i in 0..200 {
                    map.put(&(base + i), &i).unwrap();
                }
                for i in (0..200).filter(|i| i % 2 == 0) {
                    map.remove(&(base + i)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(map.size(), 4 * 100);
    for t in 0..4u64 {
        for i in 0..200u64 {
            let expected = if i % 2 == 0 { None } else { Some(i) };
            assert_eq!(map.get(&(t * 1000 + i)).unwrap(), expected);
        }
    }
}
