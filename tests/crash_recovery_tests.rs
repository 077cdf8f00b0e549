// Crash recovery tests for hashlog
// Simulate crashes by leaking the map so nothing is checkpointed on the way out

use hashlog::manifest::{generation_dir, MANIFEST_FILE};
use hashlog::{DurableMap, Options, StringDescriptor};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

type StringMap = DurableMap<String, String>;

fn open_map(dir: &TempDir) -> StringMap {
    DurableMap::open(dir.path(), StringDescriptor, StringDescriptor, Options::default()).unwrap()
}

fn s(value: &str) -> String {
    value.to_string()
}

fn log_path(dir: &TempDir) -> PathBuf {
    generation_dir(dir.path(), 0).join("entries.log")
}

fn index_path(dir: &TempDir) -> PathBuf {
    generation_dir(dir.path(), 0).join("index.snapshot")
}

/// Writes after the last checkpoint are replayed from the log
#[test]
fn test_recover_writes_after_checkpoint() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    {
        let map = open_map(&dir);
        map.put(&s("before"), &s("1")).unwrap();
        map.put(&s("changed"), &s("old")).unwrap();
        map.put(&s("removed"), &s("x")).unwrap();
        map.force().unwrap();

        map.put(&s("after"), &s("2")).unwrap();
        map.put(&s("changed"), &s("new")).unwrap();
        map.remove(&s("removed")).unwrap();

        // Crash: no close, no final checkpoint
        std::mem::forget(map);
    }

    let map = open_map(&dir);
    assert_eq!(map.get(&s("before")).unwrap(), Some(s("1")));
    assert_eq!(map.get(&s("after")).unwrap(), Some(s("2")));
    assert_eq!(map.get(&s("changed")).unwrap(), Some(s("new")));
    assert_eq!(map.get(&s("removed")).unwrap(), None);
    assert_eq!(map.size(), 3);
}

/// A crash before any checkpoint loses nothing that reached the log
#[test]
fn test_recover_without_any_checkpoint() {
    let dir = TempDir::new().unwrap();
    {
        let map = open_map(&dir);
        for i in 0..100 {
            map.put(&format!("key{}", i), &format!("value{}", i)).unwrap();
        }
        std::mem::forget(map);
    }
    assert!(!index_path(&dir).exists());

    let map = open_map(&dir);
    assert_eq!(map.size(), 100);
    assert_eq!(map.get(&s("key42")).unwrap(), Some(s("value42")));
}

/// A record cut short by a crash is dropped; everything before it survives
#[test]
fn test_torn_log_tail() {
    let dir = TempDir::new().unwrap();
    {
        let map = open_map(&dir);
        map.put(&s("k1"), &s("v1")).unwrap();
        map.put(&s("k2"), &s("v2")).unwrap();
        map.close().unwrap();
    }

    // Half-written frame: header promises more bytes than follow
    {
        let mut file = OpenOptions::new().append(true).open(log_path(&dir)).unwrap();
        file.write_all(&64u32.to_le_bytes()).unwrap();
        file.write_all(&0xdead_beefu32.to_le_bytes()).unwrap();
        file.write_all(b"short").unwrap();
    }

    let map = open_map(&dir);
    assert_eq!(map.get(&s("k1")).unwrap(), Some(s("v1")));
    assert_eq!(map.get(&s("k2")).unwrap(), Some(s("v2")));

    // Appends continue from the last good record
    map.put(&s("k3"), &s("v3")).unwrap();
    map.close().unwrap();

    let map = open_map(&dir);
    assert_eq!(map.get(&s("k3")).unwrap(), Some(s("v3")));
    assert_eq!(map.size(), 3);
}

/// A damaged index snapshot is rebuilt from the log
#[test]
fn test_corrupt_index_snapshot() {
    let dir = TempDir::new().unwrap();
    {
        let map = open_map(&dir);
        map.put(&s("a"), &s("1")).unwrap();
        map.put(&s("b"), &s("2")).unwrap();
        map.remove(&s("a")).unwrap();
        map.close().unwrap();
    }

    let mut snapshot = std::fs::read(index_path(&dir)).unwrap();
    let middle = snapshot.len() / 2;
    snapshot[middle] ^= 0xff;
    std::fs::write(index_path(&dir), &snapshot).unwrap();

    let map = open_map(&dir);
    assert_eq!(map.get(&s("a")).unwrap(), None);
    assert_eq!(map.get(&s("b")).unwrap(), Some(s("2")));
    assert_eq!(map.size(), 1);
}

/// A snapshot claiming more log than exists is discarded
#[test]
fn test_snapshot_ahead_of_log() {
    let dir = TempDir::new().unwrap();
    {
        let map = open_map(&dir);
        map.put(&s("keep"), &s("1")).unwrap();
        map.put(&s("lost"), &s("2")).unwrap();
        map.close().unwrap();
    }

    // Chop the last record off the log; the snapshot still indexes it
    let log = log_path(&dir);
    let len = std::fs::metadata(&log).unwrap().len();
    let file = OpenOptions::new().write(true).open(&log).unwrap();
    file.set_len(len - 3).unwrap();
    drop(file);

    let map = open_map(&dir);
    assert_eq!(map.get(&s("keep")).unwrap(), Some(s("1")));
    assert_eq!(map.get(&s("lost")).unwrap(), None);
    assert_eq!(map.size(), 1);
}

/// Repeated crash/reopen cycles converge on the latest state
#[test]
fn test_repeated_crashes() {
    let dir = TempDir::new().unwrap();
    for round in 0..5 {
        let map = open_map(&dir);
        if round > 0 {
            assert_eq!(map.get(&s("counter")).unwrap(), Some(format!("{}", round - 1)));
        }
        map.put(&s("counter"), &format!("{}", round)).unwrap();
        map.put(&format!("round{}", round), &s("done")).unwrap();
        if round % 2 == 0 {
            map.force().unwrap();
        }
        std::mem::forget(map);
    }

    let map = open_map(&dir);
    assert_eq!(map.get(&s("counter")).unwrap(), Some(s("4")));
    assert_eq!(map.size(), 6);
}

/// A new map lays out its manifest and generation files
#[test]
fn test_manifest_written_on_create() {
    let dir = TempDir::new().unwrap();
    let map = open_map(&dir);
    map.put(&s("k"), &s("v")).unwrap();
    map.close().unwrap();
    assert!(dir.path().join(MANIFEST_FILE).exists());
    assert!(log_path(&dir).exists());
    assert!(index_path(&dir).exists());
}
