//! In-memory object nodes.
//!
//! Every object the process has heard of is represented by exactly one
//! [`Object`] node, allocated from a slab and addressed by an
//! [`ObjectHandle`]. A node starts life with just an id. Its kind may be
//! unknown until someone looks it up as a specific kind or parses it, and
//! its payload is filled in at most once by parsing.

use std::fmt;

use odb_types::{ObjectId, ObjectKind};

use crate::alloc::{PoolKind, SlabIndex};

/// Number of caller-owned flag bits carried by each node.
pub const FLAG_BITS: u32 = 27;

bitflags::bitflags! {
    /// Caller-owned traversal marks.
    ///
    /// The store never interprets these bits; walkers allocate them among
    /// themselves. Only the low [`FLAG_BITS`] bits are stored.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ObjectFlags: u32 {
        const _ = (1 << FLAG_BITS) - 1;
    }
}

impl ObjectFlags {
    /// A single flag bit.
    ///
    /// # Panics
    ///
    /// Panics if `n >= FLAG_BITS`.
    pub fn bit(n: u32) -> Self {
        assert!(n < FLAG_BITS, "flag bit {n} out of range");
        Self::from_bits_retain(1 << n)
    }
}

/// Stable reference to a node in an [`ObjectRegistry`](crate::ObjectRegistry).
///
/// Handles stay valid for the lifetime of the registry that issued them;
/// they are invalidated only by clearing the whole registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    pub(crate) pool: PoolKind,
    pub(crate) index: SlabIndex,
}

impl ObjectHandle {
    /// The pool the node was allocated from.
    pub fn pool(&self) -> PoolKind {
        self.pool
    }
}

/// The type of a stored object, including types the store does not know.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Known(ObjectKind),
    /// A syntactically valid but unrecognized type name.
    Unknown(String),
}

impl ObjectType {
    pub fn known(&self) -> Option<ObjectKind> {
        match self {
            Self::Known(kind) => Some(*kind),
            Self::Unknown(_) => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Known(kind) => kind.as_str(),
            Self::Unknown(name) => name,
        }
    }
}

impl From<ObjectKind> for ObjectType {
    fn from(kind: ObjectKind) -> Self {
        Self::Known(kind)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of a parsed tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    /// Octal file mode as written in the tree (e.g. `0o100644`, `0o40000`).
    pub mode: u32,
    /// Entry name; not necessarily UTF-8.
    pub name: Vec<u8>,
    pub id: ObjectId,
}

impl TreeEntry {
    pub fn is_tree(&self) -> bool {
        self.mode & 0o170000 == 0o040000
    }

    pub fn name_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }
}

/// Parsed commit payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitData {
    pub tree: ObjectHandle,
    pub parents: Vec<ObjectHandle>,
    /// Committer timestamp in seconds since the epoch; 0 when absent.
    pub date: i64,
}

/// Parsed tag payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagData {
    pub tagged: ObjectHandle,
    pub tagged_kind: ObjectKind,
    pub name: String,
    /// Tagger timestamp; 0 when the tag has no tagger line.
    pub date: i64,
}

/// Kind-specific payload of a node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Payload {
    #[default]
    Unparsed,
    Blob,
    Tree(Vec<TreeEntry>),
    Commit(CommitData),
    Tag(TagData),
}

/// The node for one object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Object {
    id: ObjectId,
    kind: Option<ObjectKind>,
    parsed: bool,
    flags: ObjectFlags,
    size: Option<u64>,
    commit_index: Option<u32>,
    payload: Payload,
}

impl Object {
    pub(crate) fn new(id: ObjectId, kind: Option<ObjectKind>) -> Self {
        Self {
            id,
            kind,
            parsed: false,
            flags: ObjectFlags::empty(),
            size: None,
            commit_index: None,
            payload: Payload::Unparsed,
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    /// The kind, or `None` while the node is still of unknown kind.
    pub fn kind(&self) -> Option<ObjectKind> {
        self.kind
    }

    pub fn is_parsed(&self) -> bool {
        self.parsed
    }

    /// Content size, known once parsed.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Process-wide sequence number, assigned when a node becomes a commit.
    pub fn commit_index(&self) -> Option<u32> {
        self.commit_index
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn as_commit(&self) -> Option<&CommitData> {
        match &self.payload {
            Payload::Commit(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&[TreeEntry]> {
        match &self.payload {
            Payload::Tree(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_tag(&self) -> Option<&TagData> {
        match &self.payload {
            Payload::Tag(t) => Some(t),
            _ => None,
        }
    }

    pub fn flags(&self) -> ObjectFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: ObjectFlags) {
        self.flags |= flags;
    }

    pub fn clear_flags(&mut self, flags: ObjectFlags) {
        self.flags &= !flags;
    }

    pub fn has_flags(&self, flags: ObjectFlags) -> bool {
        self.flags.contains(flags)
    }

    pub(crate) fn set_kind(&mut self, kind: ObjectKind, commit_index: Option<u32>) {
        self.kind = Some(kind);
        if commit_index.is_some() {
            self.commit_index = commit_index;
        }
    }

    pub(crate) fn fill(&mut self, size: u64, payload: Payload) {
        self.parsed = true;
        self.size = Some(size);
        self.payload = payload;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odb_types::HashAlgorithm;

    #[test]
    fn flag_bits_are_masked_to_width() {
        let all = ObjectFlags::all();
        assert_eq!(all.bits(), (1 << 27) - 1);
        let truncated = ObjectFlags::from_bits_truncate(u32::MAX);
        assert_eq!(truncated, all);
    }

    #[test]
    #[should_panic]
    fn flag_bit_out_of_range() {
        let _ = ObjectFlags::bit(FLAG_BITS);
    }

    #[test]
    fn set_and_clear_flags() {
        let mut obj = Object::new(HashAlgorithm::Sha1.null_id(), None);
        let seen = ObjectFlags::bit(0);
        let shown = ObjectFlags::bit(3);
        obj.set_flags(seen | shown);
        assert!(obj.has_flags(seen));
        obj.clear_flags(seen);
        assert!(!obj.has_flags(seen));
        assert!(obj.has_flags(shown));
    }

    #[test]
    fn tree_entry_mode_detection() {
        let id = HashAlgorithm::Sha1.null_id();
        let dir = TreeEntry {
            mode: 0o40000,
            name: b"src".to_vec(),
            id,
        };
        let file = TreeEntry {
            mode: 0o100644,
            name: b"main.rs".to_vec(),
            id,
        };
        assert!(dir.is_tree());
        assert!(!file.is_tree());
    }

    #[test]
    fn object_type_display() {
        assert_eq!(ObjectType::from(ObjectKind::Tag).to_string(), "tag");
        assert_eq!(ObjectType::Unknown("bogus".into()).to_string(), "bogus");
        assert_eq!(ObjectType::Unknown("x".into()).known(), None);
    }
}
