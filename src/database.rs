//! High-level database API.
//!
//! `Database` wraps the tree in the process-wide concurrency contract:
//! many readers or one writer, arbitrated by a reader-writer lock. `get`
//! takes the shared side; every mutating or administrative operation
//! (`put`, `delete`, `sync`, `reload`, `snapshot`, `restore`, `close`)
//! takes the exclusive side. A successful `put` or `delete` is durable
//! before the call returns and visible to every later `get`.
//!
//! ## Snapshot and restore
//!
//! Because the store is a single self-describing file, a snapshot is just
//! the file: `snapshot` fsyncs and streams the bytes from offset zero.
//! `restore` goes the other way, writing the incoming stream to a sibling
//! temporary file, fsyncing it, and renaming it over the database file
//! before reopening. The rename is the switch-over point; a failure before
//! it leaves the original file and the running engine untouched.
//!
//! Handles are closed explicitly with [`Database::close`]; every call after
//! that fails with [`StoreError::DatabaseClosed`].

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use parking_lot::RwLock;

use crate::btree::BTree;
use crate::errors::StoreError;

const RESTORE_TMP_NAME: &str = ".conuredb.restore.tmp";

/// A single-file key-value database, safe to share across threads.
#[derive(Debug)]
pub struct Database {
    inner: RwLock<DbInner>,
}

#[derive(Debug)]
struct DbInner {
    /// `None` once the handle is closed.
    tree: Option<BTree>,
    path: PathBuf,
}

impl DbInner {
    fn tree(&self) -> Result<&BTree> {
        self.tree
            .as_ref()
            .ok_or_else(|| StoreError::DatabaseClosed.into())
    }
}

impl Database {
    /// Opens the database at `path`, creating the file if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tree = BTree::open(&path)?;
        Ok(Self {
            inner: RwLock::new(DbInner {
                tree: Some(tree),
                path,
            }),
        })
    }

    /// Closes the handle. Later calls, including a second `close`, fail
    /// with [`StoreError::DatabaseClosed`].
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.tree.take().is_none() {
            return Err(StoreError::DatabaseClosed.into());
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().tree.is_none()
    }

    pub fn path(&self) -> PathBuf {
        self.inner.read().path.clone()
    }

    /// Reads the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let inner = self.inner.read();
        inner.tree()?.get(key)
    }

    /// Writes a key-value pair; overwrites an existing key.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let inner = self.inner.write();
        inner.tree()?.put(key, value)
    }

    /// Removes a key.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let inner = self.inner.write();
        inner.tree()?.delete(key)
    }

    /// Forces all written data to stable storage.
    pub fn sync(&self) -> Result<()> {
        let inner = self.inner.write();
        inner.tree()?.sync()
    }

    /// Rereads on-disk metadata. Intended for a read-only handle observing
    /// a file another process writes; two concurrent writers on one file
    /// remain unsupported.
    pub fn reload(&self) -> Result<()> {
        let inner = self.inner.write();
        inner.tree()?.reload()
    }

    /// Current tree depth. Mostly useful in tests and tooling.
    pub fn depth(&self) -> Result<usize> {
        let inner = self.inner.read();
        inner.tree()?.depth()
    }

    /// Number of pages the tree currently occupies. Companion gauge to
    /// [`Database::depth`].
    pub fn node_count(&self) -> Result<usize> {
        let inner = self.inner.read();
        inner.tree()?.node_count()
    }

    /// Streams a consistent copy of the whole database file into `out`.
    /// Writers are blocked for the duration.
    pub fn snapshot<W: Write>(&self, out: &mut W) -> Result<()> {
        let inner = self.inner.write();
        inner.tree()?.sync()?;

        let mut file = File::open(&inner.path)
            .wrap_err_with(|| format!("failed to reopen {} for snapshot", inner.path.display()))?;
        let bytes = io::copy(&mut file, out)?;
        tracing::debug!(bytes, "streamed snapshot");
        Ok(())
    }

    /// Replaces the database contents with a snapshot stream. The incoming
    /// bytes land in a temporary file that is fsynced and atomically
    /// renamed over the database file, then the tree is reopened. If
    /// anything fails before the rename, the previous state stays in
    /// place and the engine reopens on it.
    pub fn restore<R: Read>(&self, input: &mut R) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.tree.is_none() {
            return Err(StoreError::DatabaseClosed.into());
        }

        // release the file handle before replacing the file under it
        inner.tree = None;

        let dir = inner
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let tmp_path = dir.join(RESTORE_TMP_NAME);

        let result = write_and_rename(input, &tmp_path, &inner.path);
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        }

        // reopen regardless: on the restored file, or on the original one
        // when the swap never happened
        inner.tree = Some(BTree::open(&inner.path)?);
        match result {
            Ok(bytes) => {
                tracing::info!(bytes, path = %inner.path.display(), "restored from snapshot");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn write_and_rename<R: Read>(input: &mut R, tmp_path: &Path, dst: &Path) -> Result<u64> {
    let mut tmp = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(tmp_path)
        .wrap_err_with(|| format!("failed to create restore file {}", tmp_path.display()))?;
    let bytes = io::copy(input, &mut tmp)?;
    tmp.sync_all()?;
    drop(tmp);

    std::fs::rename(tmp_path, dst)
        .wrap_err_with(|| format!("failed to move restored file over {}", dst.display()))?;
    Ok(bytes)
}
