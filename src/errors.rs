//! User-distinguishable error kinds.
//!
//! Most failures in this crate are reported as plain [`eyre::Report`]s with
//! descriptive messages (corrupt headers, short reads, transaction misuse).
//! The four kinds below are the ones callers legitimately branch on, so they
//! are a typed enum carried inside the report; recover them with
//! [`eyre::Report::downcast_ref`]:
//!
//! ```ignore
//! match db.get(b"missing") {
//!     Err(e) if e.downcast_ref::<StoreError>() == Some(&StoreError::KeyNotFound) => { ... }
//!     other => { ... }
//! }
//! ```

use thiserror::Error;

/// Error kinds surfaced through the public key-value API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The key does not exist in the tree.
    #[error("key not found")]
    KeyNotFound,

    /// The key exceeds the maximum key size.
    #[error("key too large")]
    KeyTooLarge,

    /// The value exceeds the maximum value size.
    #[error("value too large")]
    ValueTooLarge,

    /// The database handle has been closed.
    #[error("database closed")]
    DatabaseClosed,
}
