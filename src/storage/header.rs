//! Header page codec.
//!
//! The first page of a database file identifies the format and anchors the
//! whole tree: whatever root id the header names is the committed state.
//! Rewriting the header is therefore the commit point of every transaction.
//!
//! ## Layout
//!
//! ```text
//! Offset  Size  Description
//! ------  ----  -------------------------------------
//! 0       4     magic: 0x434F4E55 ("CONU")
//! 4       4     format version (1)
//! 8       8     root page id
//! 16      8     next page id to allocate
//! 24      4     free-list length
//! 28      8*N   free page ids
//! ...           zero padding up to HEADER_SIZE
//! ```
//!
//! All fields are little-endian. The free list is bounded by the space left
//! in the page: ids beyond [`MAX_FREE_IDS`] are dropped when the header is
//! written (they leak, harmlessly) and a persisted count larger than the
//! bound is capped on read rather than rejected.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::{PageId, HEADER_SIZE};

pub const MAGIC: u32 = 0x434F_4E55;
pub const FORMAT_VERSION: u32 = 1;

pub const HEADER_FIXED_SIZE: usize = 28;
pub const MAX_FREE_IDS: usize = (HEADER_SIZE - HEADER_FIXED_SIZE) / 8;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct HeaderFields {
    magic: U32,
    version: U32,
    root: U64,
    next_id: U64,
    free_count: U32,
}

const _: () = assert!(std::mem::size_of::<HeaderFields>() == HEADER_FIXED_SIZE);

/// Decoded header-page contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub root: PageId,
    pub next_id: PageId,
    pub free_ids: Vec<PageId>,
}

impl Header {
    pub fn decode(page: &[u8]) -> Result<Self> {
        ensure!(
            page.len() == HEADER_SIZE,
            "invalid header page length: {} (expected {})",
            page.len(),
            HEADER_SIZE
        );

        let fields = HeaderFields::ref_from_bytes(&page[..HEADER_FIXED_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse header fields: {:?}", e))?;

        ensure!(
            fields.magic.get() == MAGIC,
            "invalid magic number {:#010x}",
            fields.magic.get()
        );
        ensure!(
            fields.version.get() == FORMAT_VERSION,
            "unsupported format version: {} (expected {})",
            fields.version.get(),
            FORMAT_VERSION
        );

        let free_count = (fields.free_count.get() as usize).min(MAX_FREE_IDS);
        let mut free_ids = Vec::with_capacity(free_count);
        for i in 0..free_count {
            let offset = HEADER_FIXED_SIZE + i * 8;
            let id = u64::from_le_bytes(page[offset..offset + 8].try_into().expect("8-byte slice"));
            free_ids.push(id);
        }

        Ok(Self {
            root: fields.root.get(),
            next_id: fields.next_id.get(),
            free_ids,
        })
    }

    /// Encodes a full header page, truncating the free list to what fits.
    pub fn encode(&self) -> Vec<u8> {
        let free_count = self.free_ids.len().min(MAX_FREE_IDS);
        if free_count < self.free_ids.len() {
            tracing::debug!(
                dropped = self.free_ids.len() - free_count,
                "free list exceeds header capacity, dropping overflow ids"
            );
        }

        let fields = HeaderFields {
            magic: U32::new(MAGIC),
            version: U32::new(FORMAT_VERSION),
            root: U64::new(self.root),
            next_id: U64::new(self.next_id),
            free_count: U32::new(free_count as u32),
        };

        let mut page = vec![0u8; HEADER_SIZE];
        page[..HEADER_FIXED_SIZE].copy_from_slice(fields.as_bytes());
        for (i, id) in self.free_ids[..free_count].iter().enumerate() {
            let offset = HEADER_FIXED_SIZE + i * 8;
            page[offset..offset + 8].copy_from_slice(&id.to_le_bytes());
        }
        page
    }
}
