//! B-tree operations over the pager.
//!
//! Search walks the committed tree read-only. Mutations are bracketed in a
//! pager transaction and follow the path-copy rule: the descent clones
//! every node from the root to the target under fresh page ids, pointing
//! each cloned parent at its cloned child and each clone's parent field at
//! the clone above, so by the time the edit happens the whole path is
//! private to the transaction. The unwind persists the frames and installs
//! the cloned root; commit then makes it durable.
//!
//! ## Insert
//!
//! The leaf either already holds the key (the clone's value is replaced)
//! or must absorb a new item. If the item does not fit, the leaf is split
//! at its midpoint before inserting and the first key of the right half is
//! promoted. Parents absorb promoted separators the same way, splitting
//! first when the separator and child pointer would not fit, and a split
//! that escapes the root allocates a new internal root one level up.
//!
//! ## Delete
//!
//! The key is removed from the cloned leaf. A node left below the
//! occupancy floor rebalances against a sibling under its (cloned)
//! parent, in fixed preference order: borrow from the left sibling,
//! borrow from the right, merge left, merge right. Merges remove a
//! separator from the parent and can cascade; an internal root left
//! without separators is collapsed, handing the tree to its only child
//! and freeing the old root page. Any step that would overflow a page is
//! skipped, leaving the node under-occupied rather than unserializable.
//!
//! ## Locking
//!
//! The tree holds the pager behind a reader-writer lock: lookups and the
//! other read-only walks take the shared side and genuinely run in
//! parallel, while `put`, `delete`, `sync`, and `reload` take the
//! exclusive side, which is what makes each transaction's begin/commit
//! bracket atomic with respect to readers. Below that, the pager guards
//! its own cache and allocator with a short-section mutex so concurrent
//! lookups can populate the shared cache safely.

use std::path::Path;

use eyre::{ensure, Result};
use parking_lot::RwLock;
use smallvec::SmallVec;

use super::node::{Item, Node, MAX_KEY_SIZE, MAX_VALUE_SIZE, NODE_HEADER_SIZE};
use super::{MAX_ITEMS, MIN_ITEMS};
use crate::errors::StoreError;
use crate::storage::{PageId, Pager, PAGE_SIZE};

/// One level of the cloned root-to-target path: the cloned node and the
/// child slot the walk descended through.
struct PathFrame {
    node: Node,
    idx: usize,
}

type Ancestors = SmallVec<[PathFrame; 4]>;

/// An ordered key-value index backed by a single file.
///
/// Lookups take the tree's read lock and run concurrently; mutations take
/// the write lock, so a transaction never overlaps a reader. The database
/// facade layers the same contract over administrative operations.
#[derive(Debug)]
pub struct BTree {
    pager: RwLock<Pager>,
}

impl BTree {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let pager = Pager::open(path.as_ref())?;
        Ok(Self {
            pager: RwLock::new(pager),
        })
    }

    /// Looks up a key. Fails with [`StoreError::KeyNotFound`] if absent.
    /// Concurrent lookups share the tree and proceed in parallel.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        check_key(key)?;

        let pager = self.pager.read();
        let mut node = pager.root_node()?;
        loop {
            if node.is_leaf() {
                return match node.find_key(key) {
                    Ok(pos) => Ok(node.items[pos].value.clone()),
                    Err(_) => Err(StoreError::KeyNotFound.into()),
                };
            }
            let child = node.children[node.child_index(key)];
            node = pager.node(child)?;
        }
    }

    /// Inserts or overwrites a key. Durable once this returns.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        check_key(key)?;
        if value.len() > MAX_VALUE_SIZE {
            return Err(StoreError::ValueTooLarge.into());
        }

        let pager = self.pager.write();
        pager.begin()?;
        match put_tx(&pager, key, value) {
            Ok(()) => pager.commit(),
            Err(e) => {
                pager.abort();
                Err(e)
            }
        }
    }

    /// Removes a key. Fails with [`StoreError::KeyNotFound`] if absent.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        check_key(key)?;

        let pager = self.pager.write();
        pager.begin()?;
        match delete_tx(&pager, key) {
            Ok(()) => pager.commit(),
            Err(e) => {
                pager.abort();
                Err(e)
            }
        }
    }

    pub fn sync(&self) -> Result<()> {
        self.pager.write().sync()
    }

    /// Rereads the header so externally committed state becomes visible.
    pub fn reload(&self) -> Result<()> {
        self.pager.write().reload_header()
    }

    /// Number of levels from the root to the leaves (1 for a lone leaf).
    pub fn depth(&self) -> Result<usize> {
        let pager = self.pager.read();
        let mut node = pager.root_node()?;
        let mut depth = 1;
        while !node.is_leaf() {
            node = pager.node(node.children[0])?;
            depth += 1;
        }
        Ok(depth)
    }

    /// Number of pages the committed tree currently occupies.
    pub fn node_count(&self) -> Result<usize> {
        let pager = self.pager.read();
        let root = pager.root_node()?;
        count_nodes(&pager, &root)
    }

    /// Walks the committed tree and checks its structural invariants:
    /// sorted unique keys, separator bounds, uniform leaf depth, child
    /// counts, and page-size fit. Debugging and test aid.
    pub fn verify(&self) -> Result<()> {
        let pager = self.pager.read();
        let root = pager.root_node()?;
        let mut state = VerifyState {
            leaf_depth: None,
            last_key: None,
        };
        verify_node(&pager, &root, 1, None, None, &mut state)
    }
}

fn count_nodes(pager: &Pager, node: &Node) -> Result<usize> {
    if node.is_leaf() {
        return Ok(1);
    }
    let mut count = 1;
    for &child_id in &node.children {
        let child = pager.node(child_id)?;
        count += count_nodes(pager, &child)?;
    }
    Ok(count)
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.len() > MAX_KEY_SIZE {
        return Err(StoreError::KeyTooLarge.into());
    }
    Ok(())
}

/// Clones the path from the root down to the leaf responsible for `key`,
/// wiring each cloned parent to its cloned child. Returns the leaf clone
/// and the stack of ancestor frames, root first.
fn descend(pager: &Pager, key: &[u8]) -> Result<(Node, Ancestors)> {
    let root = pager.root_node()?;
    let mut node = pager.clone_node(&root)?;
    let mut ancestors = Ancestors::new();

    while !node.is_leaf() {
        let idx = node.child_index(key);
        let child = pager.node(node.children[idx])?;
        let mut clone = pager.clone_node(&child)?;
        clone.parent = node.id;
        node.children[idx] = clone.id;
        ancestors.push(PathFrame { node, idx });
        node = clone;
    }

    Ok((node, ancestors))
}

fn put_tx(pager: &Pager, key: &[u8], value: &[u8]) -> Result<()> {
    let (mut node, mut ancestors) = descend(pager, key)?;

    let mut pending: Option<(Vec<u8>, PageId)> = None;
    match node.find_key(key) {
        Ok(pos) => node.items[pos].value = value.to_vec(),
        Err(_) => {
            let item = Item::new(key.to_vec(), value.to_vec());
            if node.can_insert(&item, false) {
                node.insert_item(item);
            } else {
                pending = Some(split_leaf(pager, &mut node, item)?);
            }
        }
    }
    pager.put_node(node.clone())?;

    while let Some(PathFrame {
        node: mut parent,
        idx,
    }) = ancestors.pop()
    {
        if let Some((sep, right_id)) = pending.take() {
            let sep = Item::separator(sep);
            if parent.can_insert(&sep, true) {
                parent.items.insert(idx, sep);
                parent.children.insert(idx + 1, right_id);
                reparent(pager, right_id, parent.id)?;
            } else {
                pending = Some(split_internal(pager, &mut parent, sep, right_id)?);
            }
        }
        pager.put_node(parent.clone())?;
        node = parent;
    }

    if let Some((sep, right_id)) = pending {
        // the root itself split: grow the tree by one level
        let root_id = pager.allocate_id();
        let mut root = Node::new_internal(root_id);
        root.items.push(Item::separator(sep));
        root.children.push(node.id);
        root.children.push(right_id);
        reparent(pager, node.id, root_id)?;
        reparent(pager, right_id, root_id)?;
        pager.set_root(root)?;
    } else {
        pager.set_root(node)?;
    }
    Ok(())
}

/// Splits `left` at its midpoint, inserts `item` into the half whose key
/// range contains it, and returns the promoted separator and the new
/// sibling's id. The sibling is persisted; `left` is the caller's to put.
fn split_leaf(pager: &Pager, left: &mut Node, item: Item) -> Result<(Vec<u8>, PageId)> {
    let right_id = pager.allocate_id();
    let mut right = Node::new_leaf(right_id);
    right.parent = left.parent;

    let mid = left.items.len() / 2;
    right.items = left.items.split_off(mid);
    let sep = right.items[0].key.clone();

    if item.key < sep {
        left.insert_item(item);
    } else {
        right.insert_item(item);
    }

    pager.put_node(right)?;
    Ok((sep, right_id))
}

/// Splits an internal node that cannot absorb `(sep, child)`. The midpoint
/// separator moves up rather than into either half; children moved to the
/// new sibling are re-pointed at it, then the pending separator and child
/// land in whichever half covers them.
fn split_internal(
    pager: &Pager,
    left: &mut Node,
    sep: Item,
    child: PageId,
) -> Result<(Vec<u8>, PageId)> {
    let right_id = pager.allocate_id();
    let mut right = Node::new_internal(right_id);
    right.parent = left.parent;

    let mid = left.items.len() / 2;
    right.items = left.items.split_off(mid + 1);
    let promoted = left
        .items
        .pop()
        .ok_or_else(|| eyre::eyre!("split of internal node {} with no items", left.id))?
        .key;
    right.children = left.children.split_off(mid + 1);
    for i in 0..right.children.len() {
        right.children[i] = reparent(pager, right.children[i], right_id)?;
    }

    if sep.key < promoted {
        let pos = left.child_index(&sep.key);
        left.items.insert(pos, sep);
        left.children.insert(pos + 1, child);
        left.children[pos + 1] = reparent(pager, child, left.id)?;
    } else {
        let pos = right.child_index(&sep.key);
        right.items.insert(pos, sep);
        right.children.insert(pos + 1, child);
        right.children[pos + 1] = reparent(pager, child, right_id)?;
    }

    pager.put_node(right)?;
    Ok((promoted, right_id))
}

fn delete_tx(pager: &Pager, key: &[u8]) -> Result<()> {
    let (mut node, mut ancestors) = descend(pager, key)?;

    let pos = match node.find_key(key) {
        Ok(pos) => pos,
        Err(_) => return Err(StoreError::KeyNotFound.into()),
    };
    node.items.remove(pos);
    pager.put_node(node.clone())?;

    // walk back up while nodes sit below the occupancy floor
    while node.items.len() < MIN_ITEMS {
        let Some(PathFrame {
            node: mut parent,
            idx,
        }) = ancestors.pop()
        else {
            break;
        };
        rebalance(pager, &mut node, &mut parent, idx)?;
        pager.put_node(parent.clone())?;
        node = parent;
    }

    // persist ancestors the rebalancing never reached
    while let Some(PathFrame { node: parent, .. }) = ancestors.pop() {
        pager.put_node(parent.clone())?;
        node = parent;
    }

    if !node.is_leaf() && node.items.is_empty() {
        // the root ran out of separators: its only child becomes the root
        let mut child = pager.node(node.children[0])?;
        child.parent = 0;
        pager.put_node(child.clone())?;
        pager.delete_node(node.id);
        pager.set_root(child)?;
    } else {
        pager.set_root(node)?;
    }
    Ok(())
}

/// Restores occupancy of `node` (child `idx` of `parent`) after a delete.
/// Preference order: borrow left, borrow right, merge left, merge right.
/// Steps that would overflow a page are skipped.
fn rebalance(pager: &Pager, node: &mut Node, parent: &mut Node, idx: usize) -> Result<()> {
    let is_internal = !node.is_leaf();

    // borrow the left sibling's rightmost item
    if idx > 0 {
        let sibling = pager.node(parent.children[idx - 1])?;
        if sibling.items.len() > MIN_ITEMS {
            let incoming = if is_internal {
                Item::separator(parent.items[idx - 1].key.clone())
            } else {
                sibling.items[sibling.items.len() - 1].clone()
            };
            if node.can_insert(&incoming, is_internal) {
                let mut sibling = pager.clone_node(&sibling)?;
                sibling.parent = parent.id;
                parent.children[idx - 1] = sibling.id;
                if is_internal {
                    // parent separator comes down, sibling's last key goes up,
                    // and its rightmost child moves over
                    node.items.insert(0, incoming);
                    if let Some(promoted) = sibling.items.pop() {
                        parent.items[idx - 1].key = promoted.key;
                    }
                    if let Some(moved) = sibling.children.pop() {
                        let moved = reparent(pager, moved, node.id)?;
                        node.children.insert(0, moved);
                    }
                } else {
                    if let Some(item) = sibling.items.pop() {
                        node.items.insert(0, item);
                    }
                    parent.items[idx - 1].key = node.items[0].key.clone();
                }
                pager.put_node(sibling)?;
                pager.put_node(node.clone())?;
                return Ok(());
            }
        }
    }

    // borrow the right sibling's leftmost item
    if idx + 1 < parent.children.len() {
        let sibling = pager.node(parent.children[idx + 1])?;
        if sibling.items.len() > MIN_ITEMS {
            let incoming = if is_internal {
                Item::separator(parent.items[idx].key.clone())
            } else {
                sibling.items[0].clone()
            };
            if node.can_insert(&incoming, is_internal) {
                let mut sibling = pager.clone_node(&sibling)?;
                sibling.parent = parent.id;
                parent.children[idx + 1] = sibling.id;
                if is_internal {
                    node.items.push(incoming);
                    let demoted = sibling.items.remove(0);
                    parent.items[idx].key = demoted.key;
                    let moved = sibling.children.remove(0);
                    let moved = reparent(pager, moved, node.id)?;
                    node.children.push(moved);
                } else {
                    node.items.push(sibling.items.remove(0));
                    parent.items[idx].key = sibling.items[0].key.clone();
                }
                pager.put_node(sibling)?;
                pager.put_node(node.clone())?;
                return Ok(());
            }
        }
    }

    // merge into the left sibling
    if idx > 0 {
        let sibling = pager.node(parent.children[idx - 1])?;
        let bridge = is_internal.then(|| Item::separator(parent.items[idx - 1].key.clone()));
        if merge_fits(&sibling, node, bridge.as_ref()) {
            let mut left = pager.clone_node(&sibling)?;
            left.parent = parent.id;
            parent.children[idx - 1] = left.id;
            if let Some(bridge) = bridge {
                left.items.push(bridge);
            }
            left.items.append(&mut node.items);
            if is_internal {
                for child in std::mem::take(&mut node.children) {
                    let child = reparent(pager, child, left.id)?;
                    left.children.push(child);
                }
            }
            parent.items.remove(idx - 1);
            parent.children.remove(idx);
            pager.put_node(left)?;
            pager.delete_node(node.id);
            return Ok(());
        }
    }

    // merge the right sibling into this node
    if idx + 1 < parent.children.len() {
        let sibling = pager.node(parent.children[idx + 1])?;
        let bridge = is_internal.then(|| Item::separator(parent.items[idx].key.clone()));
        if merge_fits(node, &sibling, bridge.as_ref()) {
            if let Some(bridge) = bridge {
                node.items.push(bridge);
            }
            node.items.extend(sibling.items.iter().cloned());
            if is_internal {
                for &child in &sibling.children {
                    let child = reparent(pager, child, node.id)?;
                    node.children.push(child);
                }
            }
            parent.items.remove(idx);
            parent.children.remove(idx + 1);
            pager.put_node(node.clone())?;
            pager.delete_node(sibling.id());
            return Ok(());
        }
    }

    // neither borrowing nor merging fits a page; the node stays sparse
    Ok(())
}

/// Whether two siblings (plus the demoted parent separator for internal
/// merges) would fit a single page after merging.
fn merge_fits(left: &Node, right: &Node, bridge: Option<&Item>) -> bool {
    let count = left.items.len() + right.items.len() + bridge.map_or(0, |_| 1);
    if count > MAX_ITEMS {
        return false;
    }
    let mut size = left.encoded_size() + right.encoded_size() - NODE_HEADER_SIZE;
    if let Some(bridge) = bridge {
        size += bridge.encoded_size();
    }
    size <= PAGE_SIZE
}

/// Points a child's parent field at `parent_id`. A node already private to
/// the transaction is edited in place; a committed node is cloned first and
/// the clone's id is returned for the caller to store in its child array.
fn reparent(pager: &Pager, child_id: PageId, parent_id: PageId) -> Result<PageId> {
    let mut child = pager.node(child_id)?;
    if pager.is_dirty(child_id) {
        child.parent = parent_id;
        pager.put_node(child)?;
        Ok(child_id)
    } else {
        let mut clone = pager.clone_node(&child)?;
        clone.parent = parent_id;
        let id = clone.id;
        pager.put_node(clone)?;
        Ok(id)
    }
}

struct VerifyState {
    leaf_depth: Option<usize>,
    last_key: Option<Vec<u8>>,
}

fn verify_node(
    pager: &Pager,
    node: &Node,
    depth: usize,
    lower: Option<&[u8]>,
    upper: Option<&[u8]>,
    state: &mut VerifyState,
) -> Result<()> {
    ensure!(
        node.items.len() <= MAX_ITEMS,
        "node {} holds {} items, over the {} cap",
        node.id,
        node.items.len(),
        MAX_ITEMS
    );
    ensure!(
        node.encoded_size() <= PAGE_SIZE,
        "node {} does not fit a page",
        node.id
    );
    for pair in node.items.windows(2) {
        ensure!(
            pair[0].key < pair[1].key,
            "node {} keys out of order",
            node.id
        );
    }
    if let (Some(lower), Some(first)) = (lower, node.items.first()) {
        ensure!(
            first.key.as_slice() >= lower,
            "node {} underruns its lower bound",
            node.id
        );
    }
    if let (Some(upper), Some(last)) = (upper, node.items.last()) {
        ensure!(
            last.key.as_slice() < upper,
            "node {} overruns its upper bound",
            node.id
        );
    }

    if node.is_leaf() {
        ensure!(node.children.is_empty(), "leaf {} has children", node.id);
        match state.leaf_depth {
            None => state.leaf_depth = Some(depth),
            Some(expected) => ensure!(
                depth == expected,
                "leaf {} at depth {} (expected {})",
                node.id,
                depth,
                expected
            ),
        }
        for item in &node.items {
            if let Some(last) = &state.last_key {
                ensure!(item.key > *last, "duplicate or misplaced key in leaf {}", node.id);
            }
            state.last_key = Some(item.key.clone());
        }
        return Ok(());
    }

    ensure!(
        node.children.len() == node.items.len() + 1,
        "internal node {} has {} children for {} items",
        node.id,
        node.children.len(),
        node.items.len()
    );
    for i in 0..node.children.len() {
        let child = pager.node(node.children[i])?;
        let child_lower = if i == 0 {
            lower
        } else {
            Some(node.items[i - 1].key.as_slice())
        };
        let child_upper = if i == node.items.len() {
            upper
        } else {
            Some(node.items[i].key.as_slice())
        };
        verify_node(pager, &child, depth + 1, child_lower, child_upper, state)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_tree(dir: &tempfile::TempDir) -> BTree {
        BTree::open(dir.path().join("test.db")).unwrap()
    }

    fn kind_of(err: &eyre::Report) -> Option<StoreError> {
        err.downcast_ref::<StoreError>().copied()
    }

    #[test]
    fn get_on_empty_tree_reports_key_not_found() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        let err = tree.get(b"missing").unwrap_err();
        assert_eq!(kind_of(&err), Some(StoreError::KeyNotFound));
    }

    #[test]
    fn put_then_get_single_key() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        tree.put(b"hello", b"world").unwrap();

        assert_eq!(tree.get(b"hello").unwrap(), b"world");
    }

    #[test]
    fn put_then_get_multiple_keys() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        tree.put(b"charlie", b"3").unwrap();
        tree.put(b"alpha", b"1").unwrap();
        tree.put(b"bravo", b"2").unwrap();

        assert_eq!(tree.get(b"alpha").unwrap(), b"1");
        assert_eq!(tree.get(b"bravo").unwrap(), b"2");
        assert_eq!(tree.get(b"charlie").unwrap(), b"3");
        assert_eq!(
            kind_of(&tree.get(b"delta").unwrap_err()),
            Some(StoreError::KeyNotFound)
        );
    }

    #[test]
    fn put_overwrites_existing_value() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        tree.put(b"k", b"v1").unwrap();
        tree.put(b"k", b"v2").unwrap();

        assert_eq!(tree.get(b"k").unwrap(), b"v2");
        tree.verify().unwrap();
    }

    #[test]
    fn repeated_identical_put_is_idempotent() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        tree.put(b"k", b"v").unwrap();
        tree.put(b"k", b"v").unwrap();

        assert_eq!(tree.get(b"k").unwrap(), b"v");
        assert_eq!(tree.depth().unwrap(), 1);
        tree.verify().unwrap();
    }

    #[test]
    fn oversized_key_and_value_are_rejected() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        let err = tree.put(&[b'k'; MAX_KEY_SIZE + 1], b"v").unwrap_err();
        assert_eq!(kind_of(&err), Some(StoreError::KeyTooLarge));

        let err = tree.put(b"k", &vec![b'v'; MAX_VALUE_SIZE + 1]).unwrap_err();
        assert_eq!(kind_of(&err), Some(StoreError::ValueTooLarge));

        let err = tree.get(&[b'k'; MAX_KEY_SIZE + 1]).unwrap_err();
        assert_eq!(kind_of(&err), Some(StoreError::KeyTooLarge));

        let err = tree.delete(&[b'k'; MAX_KEY_SIZE + 1]).unwrap_err();
        assert_eq!(kind_of(&err), Some(StoreError::KeyTooLarge));

        // nothing was committed
        assert_eq!(
            kind_of(&tree.get(b"k").unwrap_err()),
            Some(StoreError::KeyNotFound)
        );
    }

    #[test]
    fn boundary_sized_key_and_value_are_accepted() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        let key = vec![b'k'; MAX_KEY_SIZE];
        let value = vec![b'v'; MAX_VALUE_SIZE];
        tree.put(&key, &value).unwrap();

        assert_eq!(tree.get(&key).unwrap(), value);
    }

    #[test]
    fn delete_removes_key() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        tree.put(b"key1", b"value1").unwrap();
        tree.put(b"key2", b"value2").unwrap();
        tree.delete(b"key1").unwrap();

        assert_eq!(
            kind_of(&tree.get(b"key1").unwrap_err()),
            Some(StoreError::KeyNotFound)
        );
        assert_eq!(tree.get(b"key2").unwrap(), b"value2");
    }

    #[test]
    fn delete_missing_key_fails_without_state_change() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        tree.put(b"k", b"v").unwrap();
        let err = tree.delete(b"missing").unwrap_err();

        assert_eq!(kind_of(&err), Some(StoreError::KeyNotFound));
        assert_eq!(tree.get(b"k").unwrap(), b"v");
    }

    #[test]
    fn deleting_last_key_leaves_empty_root_leaf() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        tree.put(b"only", b"1").unwrap();
        tree.delete(b"only").unwrap();

        assert_eq!(tree.depth().unwrap(), 1);
        assert_eq!(
            kind_of(&tree.get(b"only").unwrap_err()),
            Some(StoreError::KeyNotFound)
        );
        tree.verify().unwrap();
    }

    #[test]
    fn large_values_force_leaf_split() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        let value = vec![b'v'; 1000];
        for i in 1..=6 {
            let key = format!("k{i:02}");
            tree.put(key.as_bytes(), &value).unwrap();
        }

        assert_eq!(tree.depth().unwrap(), 2);
        assert_eq!(tree.node_count().unwrap(), 3);
        assert_eq!(tree.get(b"k03").unwrap(), value);
        tree.verify().unwrap();
    }

    #[test]
    fn node_count_tracks_growth_and_collapse() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        assert_eq!(tree.node_count().unwrap(), 1);

        let value = vec![b'x'; 50];
        for i in 1..=200u32 {
            tree.put(format!("{i:03}").as_bytes(), &value).unwrap();
        }
        let populated = tree.node_count().unwrap();
        assert!(populated > 1);

        for i in 1..=200u32 {
            tree.delete(format!("{i:03}").as_bytes()).unwrap();
        }
        assert_eq!(tree.node_count().unwrap(), 1);
    }

    #[test]
    fn concurrent_gets_share_the_read_lock() {
        use std::sync::Arc;

        let dir = tempdir().unwrap();
        let tree = Arc::new(open_tree(&dir));
        for i in 0..200u32 {
            tree.put(format!("key{i:04}").as_bytes(), format!("value{i}").as_bytes())
                .unwrap();
        }

        let mut handles = Vec::new();
        for t in 0..8u32 {
            let tree = Arc::clone(&tree);
            handles.push(std::thread::spawn(move || {
                for round in 0..200u32 {
                    let i = (t * 31 + round * 7) % 200;
                    let value = tree.get(format!("key{i:04}").as_bytes()).unwrap();
                    assert_eq!(value, format!("value{i}").into_bytes());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn sequential_inserts_stay_retrievable_across_splits() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        let value = vec![b'x'; 50];
        for i in 1..=600u32 {
            tree.put(format!("{i:03}").as_bytes(), &value).unwrap();
        }

        assert!(tree.depth().unwrap() >= 2);
        tree.verify().unwrap();
        for i in 1..=600u32 {
            assert_eq!(tree.get(format!("{i:03}").as_bytes()).unwrap(), value);
        }
    }

    #[test]
    fn reverse_inserts_stay_retrievable_across_splits() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        for i in (0..300u32).rev() {
            tree.put(format!("key{i:05}").as_bytes(), format!("val{i:05}").as_bytes())
                .unwrap();
        }

        tree.verify().unwrap();
        for i in 0..300u32 {
            assert_eq!(
                tree.get(format!("key{i:05}").as_bytes()).unwrap(),
                format!("val{i:05}").into_bytes()
            );
        }
    }

    #[test]
    fn interleaved_deletes_after_splits() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        for i in 0..300u32 {
            tree.put(format!("key{i:05}").as_bytes(), format!("value{i:05}").as_bytes())
                .unwrap();
        }
        for i in (0..300u32).step_by(2) {
            tree.delete(format!("key{i:05}").as_bytes()).unwrap();
        }

        tree.verify().unwrap();
        for i in 0..300u32 {
            let result = tree.get(format!("key{i:05}").as_bytes());
            if i % 2 == 0 {
                assert_eq!(kind_of(&result.unwrap_err()), Some(StoreError::KeyNotFound));
            } else {
                assert_eq!(result.unwrap(), format!("value{i:05}").into_bytes());
            }
        }
    }

    #[test]
    fn draining_the_tree_collapses_it_to_one_leaf() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        let value = vec![b'x'; 50];
        for i in 1..=600u32 {
            tree.put(format!("{i:03}").as_bytes(), &value).unwrap();
        }
        assert!(tree.depth().unwrap() >= 2);

        for i in (1..=600u32).rev() {
            tree.delete(format!("{i:03}").as_bytes()).unwrap();
            if i % 25 == 1 {
                tree.verify().unwrap();
            }
        }

        assert_eq!(tree.depth().unwrap(), 1);
        tree.verify().unwrap();
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let tree = BTree::open(&path).unwrap();
            tree.put(b"k", b"v2").unwrap();
        }

        let tree = BTree::open(&path).unwrap();
        assert_eq!(tree.get(b"k").unwrap(), b"v2");
    }

    #[test]
    fn split_tree_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let value = vec![b'x'; 50];
        {
            let tree = BTree::open(&path).unwrap();
            for i in 1..=600u32 {
                tree.put(format!("{i:03}").as_bytes(), &value).unwrap();
            }
        }

        let tree = BTree::open(&path).unwrap();
        tree.verify().unwrap();
        for i in 1..=600u32 {
            assert_eq!(tree.get(format!("{i:03}").as_bytes()).unwrap(), value);
        }
    }
}
