//! Block-based slab allocation for object nodes.
//!
//! Nodes are carved out of fixed-capacity blocks of [`BLOCK_CAPACITY`]
//! entries. A block's buffer is never reallocated, so a node never moves
//! once allocated, and nodes are never freed individually: the only way to
//! release memory is to drop the whole allocator.

use std::fmt;
use std::mem;
use std::ops::{Index, IndexMut};

use odb_types::{ObjectId, ObjectKind};

use crate::object::{Object, ObjectHandle};

/// Entries per block.
pub const BLOCK_CAPACITY: usize = 1024;

/// Position of an entry within a [`Slab`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlabIndex(u32);

impl SlabIndex {
    pub fn get(self) -> usize {
        self.0 as usize
    }
}

/// Append-only arena of `T` in fixed-size blocks.
#[derive(Debug)]
pub struct Slab<T> {
    blocks: Vec<Vec<T>>,
    count: usize,
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self {
            blocks: Vec::new(),
            count: 0,
        }
    }
}

impl<T> Slab<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, opening a new block when the current one is full.
    pub fn alloc(&mut self, value: T) -> SlabIndex {
        let full = self
            .blocks
            .last()
            .map_or(true, |block| block.len() == BLOCK_CAPACITY);
        if full {
            self.blocks.push(Vec::with_capacity(BLOCK_CAPACITY));
            tracing::trace!(
                blocks = self.blocks.len(),
                entry_size = mem::size_of::<T>(),
                "slab block allocated"
            );
        }
        let index = self.count;
        self.blocks[index / BLOCK_CAPACITY].push(value);
        self.count += 1;
        SlabIndex(index as u32)
    }

    pub fn get(&self, index: SlabIndex) -> Option<&T> {
        let i = index.get();
        self.blocks.get(i / BLOCK_CAPACITY)?.get(i % BLOCK_CAPACITY)
    }

    pub fn get_mut(&mut self, index: SlabIndex) -> Option<&mut T> {
        let i = index.get();
        self.blocks
            .get_mut(i / BLOCK_CAPACITY)?
            .get_mut(i % BLOCK_CAPACITY)
    }

    /// Entries allocated so far.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Blocks obtained so far.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Times the slab had to grow past its first block.
    pub fn growth_events(&self) -> usize {
        self.blocks.len().saturating_sub(1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlabIndex, &T)> {
        self.blocks
            .iter()
            .flatten()
            .enumerate()
            .map(|(i, v)| (SlabIndex(i as u32), v))
    }
}

impl<T> Index<SlabIndex> for Slab<T> {
    type Output = T;

    fn index(&self, index: SlabIndex) -> &T {
        let i = index.get();
        &self.blocks[i / BLOCK_CAPACITY][i % BLOCK_CAPACITY]
    }
}

impl<T> IndexMut<SlabIndex> for Slab<T> {
    fn index_mut(&mut self, index: SlabIndex) -> &mut T {
        let i = index.get();
        &mut self.blocks[i / BLOCK_CAPACITY][i % BLOCK_CAPACITY]
    }
}

/// The pool a node is allocated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PoolKind {
    Blob,
    Tree,
    Commit,
    Tag,
    /// Nodes created before their kind was known.
    Unknown,
}

impl PoolKind {
    /// Report order.
    pub const ALL: [PoolKind; 5] = [
        Self::Blob,
        Self::Tree,
        Self::Commit,
        Self::Tag,
        Self::Unknown,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
            Self::Unknown => "object",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl From<ObjectKind> for PoolKind {
    fn from(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Blob => Self::Blob,
            ObjectKind::Tree => Self::Tree,
            ObjectKind::Commit => Self::Commit,
            ObjectKind::Tag => Self::Tag,
        }
    }
}

/// Per-kind node pools plus the commit sequence counter.
#[derive(Debug, Default)]
pub struct ObjectAllocator {
    pools: [Slab<Object>; 5],
    commit_count: u32,
}

impl ObjectAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a node for `id` in the pool for `pool`.
    ///
    /// Commit nodes receive the next commit index.
    pub fn allocate(&mut self, pool: PoolKind, id: ObjectId) -> ObjectHandle {
        let kind = match pool {
            PoolKind::Blob => Some(ObjectKind::Blob),
            PoolKind::Tree => Some(ObjectKind::Tree),
            PoolKind::Commit => Some(ObjectKind::Commit),
            PoolKind::Tag => Some(ObjectKind::Tag),
            PoolKind::Unknown => None,
        };
        let mut node = Object::new(id, kind);
        if pool == PoolKind::Commit {
            let index = self.next_commit_index();
            node.set_kind(ObjectKind::Commit, Some(index));
        }
        let index = self.pools[pool.slot()].alloc(node);
        ObjectHandle { pool, index }
    }

    /// Draw the next commit index.
    pub fn next_commit_index(&mut self) -> u32 {
        let index = self.commit_count;
        self.commit_count += 1;
        index
    }

    /// Commit indices handed out so far.
    pub fn commit_count(&self) -> u32 {
        self.commit_count
    }

    pub fn pool(&self, pool: PoolKind) -> &Slab<Object> {
        &self.pools[pool.slot()]
    }

    pub fn get(&self, handle: ObjectHandle) -> Option<&Object> {
        self.pools[handle.pool.slot()].get(handle.index)
    }

    pub fn get_mut(&mut self, handle: ObjectHandle) -> Option<&mut Object> {
        self.pools[handle.pool.slot()].get_mut(handle.index)
    }

    /// Nodes allocated across all pools.
    pub fn total(&self) -> usize {
        self.pools.iter().map(Slab::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectHandle, &Object)> {
        PoolKind::ALL.into_iter().flat_map(move |pool| {
            self.pools[pool.slot()]
                .iter()
                .map(move |(index, obj)| (ObjectHandle { pool, index }, obj))
        })
    }

    /// Per-pool allocation statistics.
    pub fn report(&self) -> AllocReport {
        let node_size = mem::size_of::<Object>();
        let lines = PoolKind::ALL
            .into_iter()
            .map(|pool| {
                let slab = self.pool(pool);
                AllocReportLine {
                    name: pool.name(),
                    count: slab.len(),
                    blocks: slab.block_count(),
                    kilobytes: (slab.len() * node_size) >> 10,
                }
            })
            .collect();
        AllocReport { lines }
    }
}

impl Index<ObjectHandle> for ObjectAllocator {
    type Output = Object;

    fn index(&self, handle: ObjectHandle) -> &Object {
        &self.pools[handle.pool.slot()][handle.index]
    }
}

impl IndexMut<ObjectHandle> for ObjectAllocator {
    fn index_mut(&mut self, handle: ObjectHandle) -> &mut Object {
        &mut self.pools[handle.pool.slot()][handle.index]
    }
}

/// One pool's line in an [`AllocReport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocReportLine {
    pub name: &'static str,
    pub count: usize,
    pub blocks: usize,
    pub kilobytes: usize,
}

/// Allocation statistics, one line per pool.
///
/// Displays as lines of the form `    commit:     2050 (288 kB)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocReport {
    pub lines: Vec<AllocReportLine>,
}

impl AllocReport {
    pub fn line(&self, name: &str) -> Option<&AllocReportLine> {
        self.lines.iter().find(|l| l.name == name)
    }
}

impl fmt::Display for AllocReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(
                f,
                "{:>10}: {:>8} ({} kB)",
                line.name, line.count, line.kilobytes
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odb_types::HashAlgorithm;

    fn id(n: u32) -> ObjectId {
        HashAlgorithm::Sha1.hash_object(ObjectKind::Blob, &n.to_be_bytes())
    }

    #[test]
    fn slab_grows_in_blocks() {
        let mut slab = Slab::new();
        assert_eq!(slab.block_count(), 0);
        for i in 0..2050u32 {
            slab.alloc(i);
        }
        assert_eq!(slab.len(), 2050);
        assert_eq!(slab.block_count(), 3);
        assert_eq!(slab.growth_events(), 2);
        assert_eq!(slab[SlabIndex(1024)], 1024);
        assert_eq!(slab.get(SlabIndex(2049)), Some(&2049));
        assert_eq!(slab.get(SlabIndex(2050)), None);
    }

    #[test]
    fn entries_do_not_move() {
        let mut slab = Slab::new();
        let first = slab.alloc(7u64);
        let addr = &slab[first] as *const u64;
        for i in 1..BLOCK_CAPACITY as u64 {
            slab.alloc(i);
        }
        assert_eq!(addr, &slab[first] as *const u64);
    }

    #[test]
    fn commit_indices_are_sequential() {
        let mut alloc = ObjectAllocator::new();
        let a = alloc.allocate(PoolKind::Commit, id(1));
        let _blob = alloc.allocate(PoolKind::Blob, id(2));
        let b = alloc.allocate(PoolKind::Commit, id(3));
        assert_eq!(alloc[a].commit_index(), Some(0));
        assert_eq!(alloc[b].commit_index(), Some(1));
        assert_eq!(alloc.commit_count(), 2);
    }

    #[test]
    fn typed_pools_set_kind() {
        let mut alloc = ObjectAllocator::new();
        let t = alloc.allocate(PoolKind::Tree, id(1));
        let u = alloc.allocate(PoolKind::Unknown, id(2));
        assert_eq!(alloc[t].kind(), Some(ObjectKind::Tree));
        assert_eq!(alloc[u].kind(), None);
        assert_eq!(alloc.total(), 2);
    }

    #[test]
    fn report_after_2050_commits() {
        let mut alloc = ObjectAllocator::new();
        for i in 0..2050 {
            alloc.allocate(PoolKind::Commit, id(i));
        }
        let report = alloc.report();
        let commit = report.line("commit").unwrap();
        assert_eq!(commit.count, 2050);
        assert_eq!(commit.blocks, 3);
        assert_eq!(
            commit.kilobytes,
            (2050 * mem::size_of::<Object>()) >> 10
        );
        assert_eq!(report.line("blob").unwrap().count, 0);

        let text = report.to_string();
        let expected = format!("    commit:     2050 ({} kB)", commit.kilobytes);
        assert!(text.lines().any(|l| l == expected), "{text}");
        assert_eq!(text.lines().count(), 5);
        assert!(text.lines().last().unwrap().starts_with("    object:"));
    }
}
