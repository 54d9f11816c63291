//! File-backed page store with a node cache and a single-writer
//! transaction protocol.
//!
//! The pager owns the backing file and is the only component that performs
//! I/O. Pages are addressed by id: page `n` lives at byte offset
//! `HEADER_SIZE + (n - 1) * PAGE_SIZE`, with the header page at offset 0.
//! Reads and writes go through positioned syscalls (`pread`/`pwrite`), so
//! no seek state is shared and the header rewrite is a single write at
//! offset zero.
//!
//! ## Transactions
//!
//! A transaction brackets a set of copy-on-write edits:
//!
//! 1. `begin` records the current root id and clears the dirty set.
//! 2. `clone_node` / `put_node` / `set_root` stage nodes in the cache and
//!    mark them dirty; nothing touches the file.
//! 3. `commit` writes every dirty page, rewrites the header (new root,
//!    allocator state, free list), then fsyncs. The header write is the
//!    atomic commit point: a crash before it leaves the previous root
//!    intact, a crash after it leaves the new one.
//! 4. `abort` restores the recorded root and discards the dirty set. Ids
//!    allocated by the aborted transaction are not returned to the pool;
//!    they leak, bounded by the size of the abandoned path.
//!
//! Outside a transaction, `put_node` and `clone_node` write through
//! immediately and `set_root` persists the header on the spot.
//!
//! ## Cache
//!
//! The node cache maps page ids to decoded nodes. It is a read cache and
//! the write-back staging area for dirty nodes; it is never authoritative
//! across restarts and is unbounded (datasets served by this store are
//! small). `reload_header` drops it wholesale because free-list recycling
//! means a page id's bytes can change across another writer's commits.
//!
//! ## Synchronization
//!
//! The mutable state (cache, allocator, root, transaction fields) sits
//! behind one internal mutex, taken per call and released before the next,
//! so concurrent readers can fetch nodes in parallel: a cache miss drops
//! the lock, reads the page from disk, and relocks only to insert. Two
//! readers racing on the same miss both decode the same committed bytes,
//! so the duplicate insert is harmless. The transaction protocol itself is
//! single-writer; callers serialize mutations against each other and
//! against readers with a reader-writer lock above (see the tree layer).

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use eyre::{bail, ensure, Result, WrapErr};
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;

use super::header::Header;
use super::pool::PagePool;
use super::{PageId, HEADER_SIZE, PAGE_SIZE};
use crate::btree::Node;

#[derive(Debug)]
pub struct Pager {
    file: File,
    state: Mutex<PagerState>,
}

#[derive(Debug)]
struct PagerState {
    cache: HashMap<PageId, Node>,
    pool: PagePool,
    root: PageId,
    in_txn: bool,
    original_root: PageId,
    dirty: HashSet<PageId>,
}

impl Pager {
    /// Opens (or creates) the backing file. An empty file is bootstrapped
    /// with a header and an empty leaf root; a non-empty file must start
    /// with a valid header page.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open database file {}", path.display()))?;

        let mut state = PagerState {
            cache: HashMap::new(),
            pool: PagePool::new(),
            root: 0,
            in_txn: false,
            original_root: 0,
            dirty: HashSet::new(),
        };

        let len = file.metadata()?.len();
        if len == 0 {
            bootstrap(&file, &mut state)?;
            tracing::info!(path = %path.display(), "initialized new database file");
        } else {
            read_header(&file, &mut state)?;
            tracing::debug!(path = %path.display(), root = state.root, "opened database file");
        }

        Ok(Self {
            file,
            state: Mutex::new(state),
        })
    }

    /// Rereads the header and discards the cache, so a reader sharing the
    /// file with another writer observes that writer's last commit.
    pub fn reload_header(&self) -> Result<()> {
        let mut state = self.state.lock();
        ensure!(!state.in_txn, "cannot reload during a transaction");
        read_header(&self.file, &mut state)?;
        state.cache.clear();
        tracing::debug!(root = state.root, "reloaded header");
        Ok(())
    }

    pub fn root_id(&self) -> PageId {
        self.state.lock().root
    }

    /// Fetches a node, populating the cache on miss. The returned node is a
    /// detached copy; changes to it are not visible until `put_node`.
    pub fn node(&self, id: PageId) -> Result<Node> {
        ensure!(id != 0, "page id 0 is reserved");

        if let Some(node) = self.state.lock().cache.get(&id) {
            return Ok(node.clone());
        }

        // miss: read without holding the lock, relock only to insert
        let node = read_node(&self.file, id)?;
        self.state.lock().cache.insert(id, node.clone());
        Ok(node)
    }

    pub fn root_node(&self) -> Result<Node> {
        let id = self.root_id();
        self.node(id)
    }

    /// Stages a node: inside a transaction it is cached and marked dirty,
    /// outside one it is written through immediately.
    pub fn put_node(&self, node: Node) -> Result<()> {
        let mut state = self.state.lock();
        if state.in_txn {
            state.dirty.insert(node.id());
        } else {
            write_node(&self.file, &node)?;
        }
        state.cache.insert(node.id(), node);
        Ok(())
    }

    /// Copy-on-write: duplicates `src` under a freshly allocated id. The
    /// copy keeps the source's parent pointer and contents.
    pub fn clone_node(&self, src: &Node) -> Result<Node> {
        let id = self.state.lock().pool.allocate();
        let node = src.with_id(id);
        self.put_node(node.clone())?;
        Ok(node)
    }

    /// Drops a node from the cache and returns its id to the pool. The page
    /// bytes on disk are left as-is; nothing reachable points at them.
    pub fn delete_node(&self, id: PageId) {
        let mut state = self.state.lock();
        state.cache.remove(&id);
        state.dirty.remove(&id);
        state.pool.free(id);
    }

    /// Allocates a fresh id without creating a node. Used when building a
    /// split sibling or a new root.
    pub fn allocate_id(&self) -> PageId {
        self.state.lock().pool.allocate()
    }

    pub fn is_dirty(&self, id: PageId) -> bool {
        self.state.lock().dirty.contains(&id)
    }

    /// Publishes `node` as the new root. Header persistence is deferred to
    /// commit inside a transaction, immediate otherwise.
    pub fn set_root(&self, node: Node) -> Result<()> {
        let mut state = self.state.lock();
        state.root = node.id();
        if state.in_txn {
            state.dirty.insert(node.id());
            state.cache.insert(node.id(), node);
            return Ok(());
        }
        write_node(&self.file, &node)?;
        state.cache.insert(node.id(), node);
        write_header(&self.file, &state)
    }

    pub fn begin(&self) -> Result<()> {
        let mut state = self.state.lock();
        ensure!(!state.in_txn, "transaction already in progress");
        state.in_txn = true;
        state.original_root = state.root;
        state.dirty.clear();
        Ok(())
    }

    /// Writes all dirty pages, then the header, then fsyncs. On return the
    /// new root is durable.
    pub fn commit(&self) -> Result<()> {
        let mut state = self.state.lock();
        ensure!(state.in_txn, "no transaction in progress");

        let ids: Vec<PageId> = state.dirty.iter().copied().collect();
        for id in &ids {
            let Some(node) = state.cache.get(id) else {
                bail!("dirty page {id} missing from cache");
            };
            write_node(&self.file, node)?;
        }

        write_header(&self.file, &state)?;
        self.file.sync_all()?;

        state.in_txn = false;
        state.dirty.clear();
        tracing::debug!(pages = ids.len(), root = state.root, "committed transaction");
        Ok(())
    }

    /// Restores the root observed at `begin` and discards staged work.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        if !state.in_txn {
            return;
        }
        state.root = state.original_root;
        state.in_txn = false;
        state.dirty.clear();
    }

    pub fn in_transaction(&self) -> bool {
        self.state.lock().in_txn
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_all().map_err(Into::into)
    }
}

/// Writes an initial header, allocates the root leaf, then rewrites the
/// header to point at it. No fsync here; the first commit provides one.
fn bootstrap(file: &File, state: &mut PagerState) -> Result<()> {
    write_header(file, state)?;

    let root_id = state.pool.allocate();
    let root = Node::new_leaf(root_id);
    state.root = root_id;
    write_node(file, &root)?;
    state.cache.insert(root_id, root);

    write_header(file, state)
}

fn read_header(file: &File, state: &mut PagerState) -> Result<()> {
    let mut page = vec![0u8; HEADER_SIZE];
    file.read_exact_at(&mut page, 0)
        .wrap_err("short read for header page")?;

    let header = Header::decode(&page)?;
    state.root = header.root;
    state.pool = PagePool::from_header(header.next_id, header.free_ids);
    Ok(())
}

fn write_header(file: &File, state: &PagerState) -> Result<()> {
    let (next_id, _) = state.pool.stats();
    let header = Header {
        root: state.root,
        next_id,
        free_ids: state.pool.free_ids().to_vec(),
    };
    file.write_all_at(&header.encode(), 0)
        .wrap_err("short write for header page")
}

fn page_offset(id: PageId) -> u64 {
    HEADER_SIZE as u64 + (id - 1) * PAGE_SIZE as u64
}

fn read_node(file: &File, id: PageId) -> Result<Node> {
    let mut page = vec![0u8; PAGE_SIZE];
    file.read_exact_at(&mut page, page_offset(id))
        .wrap_err_with(|| format!("short read for page {id}"))?;
    Node::decode(&page)
}

fn write_node(file: &File, node: &Node) -> Result<()> {
    let page = node.encode()?;
    file.write_all_at(&page, page_offset(node.id()))
        .wrap_err_with(|| format!("short write for page {}", node.id()))
}
