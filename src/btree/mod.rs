//! # Copy-on-Write B-Tree
//!
//! The ordered index at the heart of the store. Keys live in leaf items;
//! internal nodes carry separator keys and child pointers. All leaves sit
//! at the same depth.
//!
//! ## Copy-on-write discipline
//!
//! No committed page is ever edited. A mutating operation walks from the
//! root to its target and clones every node on the way under fresh page
//! ids, rewiring child pointers as it goes; the edit lands on the clones
//! and the transaction ends by publishing the new root. Until the header
//! names that root, readers of the old tree are untouched, which is what
//! makes commit atomic without any log.
//!
//! ## Splits and rebalancing
//!
//! Inserts check up front whether the target node can absorb the edit
//! (both the page-size estimate and the item cap). If not, the node is
//! split at its midpoint first and the edit goes to the half whose key
//! range contains it; the promoted separator propagates upward, splitting
//! parents by the same rule, and a root split grows the tree by one level.
//!
//! Deletes that leave a node under the minimum item count rebalance
//! against a sibling: borrow from the left sibling if it can spare an
//! item, else from the right, else merge (left-preferring). Merges pull
//! the parent separator down between internal nodes, can cascade upward,
//! and collapse the root when it runs out of separators, shrinking the
//! tree by one level and freeing the old root page.
//!
//! Because splits are driven by the byte-size estimate as well as the item
//! cap, nodes holding large values run far below [`MIN_ITEMS`]; the
//! rebalancer treats the minimum as a target, not an obligation, and skips
//! any borrow or merge that would overflow a page.

pub mod node;
mod tree;

pub use node::{Item, Node, NodeKind, MAX_KEY_SIZE, MAX_VALUE_SIZE, NODE_HEADER_SIZE};
pub use tree::BTree;

/// Item-count cap per node. The byte-size estimate usually bites first;
/// this cap only matters for very small items.
pub const MAX_ITEMS: usize = 255;

/// Occupancy floor for non-root nodes, below which deletes rebalance.
pub const MIN_ITEMS: usize = MAX_ITEMS / 2;
