//! Snapshot streaming and restore-over-rename behaviour.

use conuredb::{Database, StoreError};
use tempfile::tempdir;

fn kind_of(err: &eyre::Report) -> Option<StoreError> {
    err.downcast_ref::<StoreError>().copied()
}

fn populated_db(path: &std::path::Path) -> Database {
    let db = Database::open(path).unwrap();
    let value = vec![b'x'; 50];
    for i in 1..=600u32 {
        db.put(format!("{i:03}").as_bytes(), &value).unwrap();
    }
    db
}

#[test]
fn snapshot_feeds_a_second_engine() {
    let dir = tempdir().unwrap();
    let source = populated_db(&dir.path().join("source.db"));

    let mut snapshot = Vec::new();
    source.snapshot(&mut snapshot).unwrap();

    let target = Database::open(dir.path().join("target.db")).unwrap();
    target.restore(&mut snapshot.as_slice()).unwrap();

    // spot-check a spread of keys on the restored engine
    let value = vec![b'x'; 50];
    for i in 0..200u32 {
        let key = (i * 379) % 600 + 1;
        assert_eq!(
            target.get(format!("{key:03}").as_bytes()).unwrap(),
            value,
            "key {key} after restore"
        );
    }
    assert!(target.depth().unwrap() >= 2);
}

#[test]
fn restore_is_byte_identical() {
    let dir = tempdir().unwrap();
    let db = populated_db(&dir.path().join("byte.db"));

    let mut snapshot = Vec::new();
    db.snapshot(&mut snapshot).unwrap();
    db.restore(&mut snapshot.as_slice()).unwrap();

    let on_disk = std::fs::read(db.path()).unwrap();
    assert_eq!(on_disk, snapshot);
}

#[test]
fn snapshot_starts_with_the_header_page() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("hdr.db")).unwrap();
    db.put(b"k", b"v").unwrap();

    let mut snapshot = Vec::new();
    db.snapshot(&mut snapshot).unwrap();

    // magic "CONU" and version 1, little-endian, at offset zero
    assert_eq!(&snapshot[0..4], &0x434F_4E55u32.to_le_bytes());
    assert_eq!(&snapshot[4..8], &1u32.to_le_bytes());
    assert_eq!(snapshot.len() % 4096, 0);
}

#[test]
fn restored_engine_remains_writable() {
    let dir = tempdir().unwrap();
    let source = Database::open(dir.path().join("source.db")).unwrap();
    source.put(b"base", b"1").unwrap();

    let mut snapshot = Vec::new();
    source.snapshot(&mut snapshot).unwrap();

    let target = Database::open(dir.path().join("target.db")).unwrap();
    target.restore(&mut snapshot.as_slice()).unwrap();
    target.put(b"extra", b"2").unwrap();
    target.delete(b"base").unwrap();

    assert_eq!(target.get(b"extra").unwrap(), b"2");
    assert_eq!(
        kind_of(&target.get(b"base").unwrap_err()),
        Some(StoreError::KeyNotFound)
    );
    // the source engine is untouched
    assert_eq!(source.get(b"base").unwrap(), b"1");
}

#[test]
fn garbage_snapshot_is_rejected_on_reopen() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("garbage.db")).unwrap();
    db.put(b"k", b"v").unwrap();

    let junk = vec![0xABu8; 8192];
    let result = db.restore(&mut junk.as_slice());

    // the stream itself copies fine, but the reopened header is invalid
    assert!(result.is_err());
}
