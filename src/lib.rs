//! # conuredb
//!
//! A durable, single-file, ordered key-value store built on a
//! copy-on-write B-tree. The engine turns point operations (put, get,
//! delete) into crash-safe on-disk state transitions: a write that
//! returns success has been fsynced and survives restart, and no
//! partially applied write is ever observable.
//!
//! ## Quick Start
//!
//! ```ignore
//! use conuredb::Database;
//!
//! let db = Database::open("./conure.db")?;
//! db.put(b"user:1", b"alice")?;
//! assert_eq!(db.get(b"user:1")?, b"alice");
//! db.delete(b"user:1")?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-------------------------------------+
//! |        Public API (Database)        |   RwLock: many readers / 1 writer
//! +-------------------------------------+
//! |         B-tree (search/CoW)         |   path copy, split, rebalance
//! +-------------------------------------+
//! |    Pager (cache + transactions)     |   dirty pages -> header -> fsync
//! +-------------------------------------+
//! |  Header codec | Page id allocator   |
//! +-------------------------------------+
//! |        One file, 4 KiB pages        |
//! +-------------------------------------+
//! ```
//!
//! Every mutation runs as a transaction: the touched root-to-leaf path is
//! cloned to fresh pages, edited, and committed by writing the dirty
//! pages, rewriting the header to name the new root, and fsyncing. The
//! header rewrite is the single atomic commit point, so a crash at any
//! moment leaves either the old tree or the new one, never a mix.
//!
//! ## Snapshots
//!
//! The whole store is one self-describing file, so
//! [`Database::snapshot`] streams a consistent byte-for-byte copy and
//! [`Database::restore`] swaps one in atomically via a temp file and
//! rename. This is the mechanism an external replicator uses for
//! catch-up.
//!
//! ## Module Overview
//!
//! - [`database`]: the concurrent facade ([`Database`])
//! - [`btree`]: node model, page codec, and tree algorithms
//! - [`storage`]: file layout, header, allocator, pager transactions
//! - [`errors`]: typed error kinds callers can match on

pub mod btree;
pub mod database;
pub mod errors;
pub mod storage;

pub use btree::BTree;
pub use database::Database;
pub use errors::StoreError;

/// Crate version, straight from the manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
