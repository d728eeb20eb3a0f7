//! The object registry: one node per id.
//!
//! Lookups by id return the same [`ObjectHandle`] for the life of the
//! registry. A node created without a kind can later be claimed as exactly
//! one kind; after that, asking for it as any other kind is an error.

use std::collections::HashMap;

use odb_types::{ObjectId, ObjectKind};

use crate::alloc::{AllocReport, ObjectAllocator, PoolKind};
use crate::error::{StoreError, StoreResult};
use crate::object::{Object, ObjectFlags, ObjectHandle, Payload};

/// Identity map from object id to node.
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    alloc: ObjectAllocator,
    table: HashMap<ObjectId, ObjectHandle>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find an existing node.
    pub fn lookup(&self, id: &ObjectId) -> Option<ObjectHandle> {
        self.table.get(id).copied()
    }

    /// Find the node for `id`, creating an unknown-kind node if needed.
    pub fn lookup_or_create(&mut self, id: ObjectId) -> ObjectHandle {
        if let Some(handle) = self.lookup(&id) {
            return handle;
        }
        let handle = self.alloc.allocate(PoolKind::Unknown, id);
        self.table.insert(id, handle);
        handle
    }

    /// Find or create the node for `id` as `kind`.
    ///
    /// An unknown-kind node is claimed as `kind` in place, keeping its
    /// handle. A node already of another kind yields
    /// [`StoreError::KindMismatch`].
    pub fn lookup_kind(&mut self, id: ObjectId, kind: ObjectKind) -> StoreResult<ObjectHandle> {
        match self.lookup(&id) {
            Some(handle) => {
                self.claim(handle, kind)?;
                Ok(handle)
            }
            None => {
                let handle = self.alloc.allocate(PoolKind::from(kind), id);
                self.table.insert(id, handle);
                Ok(handle)
            }
        }
    }

    pub fn lookup_blob(&mut self, id: ObjectId) -> StoreResult<ObjectHandle> {
        self.lookup_kind(id, ObjectKind::Blob)
    }

    pub fn lookup_tree(&mut self, id: ObjectId) -> StoreResult<ObjectHandle> {
        self.lookup_kind(id, ObjectKind::Tree)
    }

    pub fn lookup_commit(&mut self, id: ObjectId) -> StoreResult<ObjectHandle> {
        self.lookup_kind(id, ObjectKind::Commit)
    }

    pub fn lookup_tag(&mut self, id: ObjectId) -> StoreResult<ObjectHandle> {
        self.lookup_kind(id, ObjectKind::Tag)
    }

    fn claim(&mut self, handle: ObjectHandle, kind: ObjectKind) -> StoreResult<()> {
        let (id, current) = {
            let node = &self.alloc[handle];
            (*node.id(), node.kind())
        };
        match current {
            Some(actual) if actual == kind => Ok(()),
            Some(actual) => Err(StoreError::KindMismatch {
                id,
                expected: kind,
                actual,
            }),
            None => {
                let commit_index =
                    (kind == ObjectKind::Commit).then(|| self.alloc.next_commit_index());
                self.alloc[handle].set_kind(kind, commit_index);
                Ok(())
            }
        }
    }

    /// Record a node's payload. A node is filled at most once.
    pub fn mark_parsed(
        &mut self,
        handle: ObjectHandle,
        kind: ObjectKind,
        size: u64,
        payload: Payload,
    ) -> StoreResult<()> {
        if self.alloc[handle].is_parsed() {
            return Err(StoreError::AlreadyParsed(*self.alloc[handle].id()));
        }
        self.claim(handle, kind)?;
        self.alloc[handle].fill(size, payload);
        Ok(())
    }

    /// The node behind `handle`.
    ///
    /// # Panics
    ///
    /// Panics if `handle` was issued by a different registry.
    pub fn get(&self, handle: ObjectHandle) -> &Object {
        &self.alloc[handle]
    }

    /// Mutable access for flag manipulation.
    ///
    /// # Panics
    ///
    /// Panics if `handle` was issued by a different registry.
    pub fn get_mut(&mut self, handle: ObjectHandle) -> &mut Object {
        &mut self.alloc[handle]
    }

    /// The node for `id`, if registered.
    pub fn object(&self, id: &ObjectId) -> Option<&Object> {
        self.lookup(id).map(|h| self.get(h))
    }

    /// Clear `mask` on every registered node.
    pub fn clear_flags(&mut self, mask: ObjectFlags) {
        let handles: Vec<ObjectHandle> = self.table.values().copied().collect();
        for handle in handles {
            self.alloc[handle].clear_flags(mask);
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectHandle, &Object)> {
        self.alloc.iter()
    }

    pub fn allocator(&self) -> &ObjectAllocator {
        &self.alloc
    }

    pub fn report(&self) -> AllocReport {
        self.alloc.report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odb_types::HashAlgorithm;
    use proptest::prelude::*;

    fn id(seed: &[u8]) -> ObjectId {
        HashAlgorithm::Sha1.hash_object(ObjectKind::Blob, seed)
    }

    #[test]
    fn lookup_or_create_is_idempotent() {
        let mut reg = ObjectRegistry::new();
        let a = reg.lookup_or_create(id(b"a"));
        let b = reg.lookup_or_create(id(b"a"));
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(a).kind(), None);
        assert!(!reg.get(a).is_parsed());
    }

    #[test]
    fn unknown_node_is_claimed_in_place() {
        let mut reg = ObjectRegistry::new();
        let unknown = reg.lookup_or_create(id(b"c"));
        let commit = reg.lookup_commit(id(b"c")).unwrap();
        assert_eq!(unknown, commit);
        assert_eq!(reg.get(commit).kind(), Some(ObjectKind::Commit));
        assert_eq!(reg.get(commit).commit_index(), Some(0));
        assert_eq!(reg.lookup_commit(id(b"c")).unwrap(), commit);
        assert_eq!(reg.allocator().commit_count(), 1);
    }

    #[test]
    fn kind_conflict_is_rejected() {
        let mut reg = ObjectRegistry::new();
        reg.lookup_tree(id(b"t")).unwrap();
        let err = reg.lookup_blob(id(b"t")).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            StoreError::KindMismatch {
                expected: ObjectKind::Blob,
                actual: ObjectKind::Tree,
                ..
            }
        ));
    }

    #[test]
    fn mark_parsed_only_once() {
        let mut reg = ObjectRegistry::new();
        let h = reg.lookup_or_create(id(b"blob"));
        reg.mark_parsed(h, ObjectKind::Blob, 4, Payload::Blob).unwrap();
        assert!(reg.get(h).is_parsed());
        assert_eq!(reg.get(h).size(), Some(4));
        assert_eq!(reg.get(h).kind(), Some(ObjectKind::Blob));

        let err = reg.mark_parsed(h, ObjectKind::Blob, 4, Payload::Blob).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyParsed(_)));
    }

    #[test]
    fn clear_flags_touches_every_node() {
        let mut reg = ObjectRegistry::new();
        let mark = ObjectFlags::bit(1) | ObjectFlags::bit(2);
        let handles: Vec<_> = (0..3u8).map(|i| reg.lookup_or_create(id(&[i]))).collect();
        for h in &handles {
            reg.get_mut(*h).set_flags(mark);
        }
        reg.clear_flags(ObjectFlags::bit(1));
        for h in handles {
            assert_eq!(reg.get(h).flags(), ObjectFlags::bit(2));
        }
    }

    proptest! {
        #[test]
        fn one_node_per_id(seeds in proptest::collection::vec(0u8..32, 1..200)) {
            let mut reg = ObjectRegistry::new();
            let mut distinct = std::collections::HashSet::new();
            for s in &seeds {
                let h = reg.lookup_or_create(id(&[*s]));
                prop_assert_eq!(reg.get(h).id(), &id(&[*s]));
                distinct.insert(*s);
            }
            prop_assert_eq!(reg.len(), distinct.len());
            prop_assert_eq!(reg.allocator().total(), distinct.len());
        }
    }
}
