//! Replace-object indirection.
//!
//! A ref `refs/replace/<hex>` pointing at object B makes reads of object
//! `<hex>` return B instead. Mappings are kept in an array sorted by original
//! id and found by binary search. Chains are followed up to
//! [`MAX_REPLACE_DEPTH`] hops.

use odb_refs::{Ref, RefStore};
use odb_types::{HashAlgorithm, ObjectId};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::packs::Lifecycle;

/// Longest replacement chain that is followed.
pub const MAX_REPLACE_DEPTH: usize = 5;

/// One mapping from an original object to its replacement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplaceObject {
    pub original: ObjectId,
    pub replacement: ObjectId,
}

/// What to do when registering an original that already has a mapping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Replace the existing mapping.
    #[default]
    Overwrite,
    /// Keep the existing mapping.
    Ignore,
}

/// Sorted table of replacements, loaded lazily from refs.
#[derive(Clone, Debug, Default)]
pub struct ReplaceMap {
    state: Lifecycle,
    items: Vec<ReplaceObject>,
}

impl ReplaceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    fn position(&self, original: &ObjectId) -> Result<usize, usize> {
        self.items
            .binary_search_by(|item| item.original.cmp(original))
    }

    /// Add a mapping. Returns whether `original` was already mapped.
    pub fn register(
        &mut self,
        original: ObjectId,
        replacement: ObjectId,
        policy: DuplicatePolicy,
    ) -> bool {
        match self.position(&original) {
            Ok(pos) => {
                if policy == DuplicatePolicy::Overwrite {
                    self.items[pos].replacement = replacement;
                }
                true
            }
            Err(pos) => {
                self.items.insert(
                    pos,
                    ReplaceObject {
                        original,
                        replacement,
                    },
                );
                false
            }
        }
    }

    /// Populate from refs under `base` on first use.
    ///
    /// The last path component of each ref name must be a full hex id;
    /// anything else is skipped with a warning. When two refs name the same
    /// original, the first one listed wins.
    pub fn ensure_ready(
        &mut self,
        refs: &dyn RefStore,
        base: &str,
        algo: HashAlgorithm,
    ) -> StoreResult<()> {
        if self.state == Lifecycle::Ready {
            return Ok(());
        }
        for (name, reference) in refs.list_refs(base)? {
            let last = name.rsplit('/').next().unwrap_or(&name);
            let original = match ObjectId::from_hex_with(last, algo) {
                Ok(id) => id,
                Err(_) => {
                    warn!(%name, "bad replace ref name");
                    continue;
                }
            };
            let replacement = match reference {
                Ref::Direct(id) => id,
                Ref::Symbolic(_) => match refs.resolve(&name)? {
                    Some(id) => id,
                    None => {
                        warn!(%name, "replace ref does not resolve");
                        continue;
                    }
                },
            };
            if self.register(original, replacement, DuplicatePolicy::Ignore) {
                warn!(%name, %original, "duplicate replace ref, keeping the first");
            }
        }
        self.state = Lifecycle::Ready;
        debug!(count = self.items.len(), "replace refs prepared");
        Ok(())
    }

    /// Direct replacement of `original`, without following chains.
    pub fn get(&self, original: &ObjectId) -> Option<&ObjectId> {
        self.position(original)
            .ok()
            .map(|pos| &self.items[pos].replacement)
    }

    /// Follow replacements from `id` to the object finally read.
    ///
    /// An unmapped id resolves to itself. A chain needing more than
    /// [`MAX_REPLACE_DEPTH`] hops, including any cycle, is an error.
    pub fn resolve(&self, id: &ObjectId) -> StoreResult<ObjectId> {
        let mut current = *id;
        for _ in 0..MAX_REPLACE_DEPTH {
            match self.get(&current) {
                Some(next) => current = *next,
                None => return Ok(current),
            }
        }
        if self.get(&current).is_some() {
            return Err(StoreError::ReplaceDepthExceeded(*id));
        }
        Ok(current)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReplaceObject> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop all mappings. The next use reloads from refs.
    pub fn clear(&mut self) {
        self.items.clear();
        self.state = Lifecycle::Uninitialized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odb_refs::InMemoryRefStore;
    use odb_types::ObjectKind;
    use proptest::prelude::*;

    const ALGO: HashAlgorithm = HashAlgorithm::Sha1;

    fn id(n: u8) -> ObjectId {
        ALGO.hash_object(ObjectKind::Blob, &[n])
    }

    fn chain(len: u8) -> ReplaceMap {
        let mut map = ReplaceMap::new();
        for n in 0..len {
            map.register(id(n), id(n + 1), DuplicatePolicy::Overwrite);
        }
        map
    }

    #[test]
    fn unmapped_resolves_to_itself() {
        let map = ReplaceMap::new();
        assert_eq!(map.resolve(&id(1)).unwrap(), id(1));
    }

    #[test]
    fn follows_chain_up_to_limit() {
        let map = chain(5);
        assert_eq!(map.resolve(&id(0)).unwrap(), id(5));
        assert_eq!(map.resolve(&id(3)).unwrap(), id(5));
    }

    #[test]
    fn six_hops_is_too_deep() {
        let map = chain(6);
        let err = map.resolve(&id(0)).unwrap_err();
        assert!(matches!(err, StoreError::ReplaceDepthExceeded(o) if o == id(0)));
        assert!(err.is_fatal());
        assert_eq!(map.resolve(&id(1)).unwrap(), id(6));
    }

    #[test]
    fn cycle_is_too_deep() {
        let mut map = ReplaceMap::new();
        map.register(id(1), id(2), DuplicatePolicy::Overwrite);
        map.register(id(2), id(1), DuplicatePolicy::Overwrite);
        assert!(map.resolve(&id(1)).is_err());
    }

    #[test]
    fn duplicate_policies() {
        let mut map = ReplaceMap::new();
        assert!(!map.register(id(1), id(2), DuplicatePolicy::Overwrite));
        assert!(map.register(id(1), id(3), DuplicatePolicy::Ignore));
        assert_eq!(map.get(&id(1)), Some(&id(2)));
        assert!(map.register(id(1), id(4), DuplicatePolicy::Overwrite));
        assert_eq!(map.get(&id(1)), Some(&id(4)));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn load_from_refs() {
        let refs = InMemoryRefStore::new();
        refs.write_ref(&format!("refs/replace/{}", id(1)), &Ref::Direct(id(2)))
            .unwrap();
        refs.write_ref("refs/replace/not-a-hash", &Ref::Direct(id(9)))
            .unwrap();
        refs.write_ref(&format!("refs/heads/{}", id(3)), &Ref::Direct(id(4)))
            .unwrap();

        let mut map = ReplaceMap::new();
        assert_eq!(map.state(), Lifecycle::Uninitialized);
        map.ensure_ready(&refs, "refs/replace/", ALGO).unwrap();
        assert_eq!(map.state(), Lifecycle::Ready);
        assert_eq!(map.len(), 1);
        assert_eq!(map.resolve(&id(1)).unwrap(), id(2));
        assert_eq!(map.resolve(&id(3)).unwrap(), id(3));

        refs.write_ref(&format!("refs/replace/{}", id(5)), &Ref::Direct(id(6)))
            .unwrap();
        map.ensure_ready(&refs, "refs/replace/", ALGO).unwrap();
        assert_eq!(map.len(), 1);
        map.clear();
        map.ensure_ready(&refs, "refs/replace/", ALGO).unwrap();
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn nested_ref_names_use_last_component() {
        let refs = InMemoryRefStore::new();
        refs.write_ref(&format!("refs/replace/team/{}", id(1)), &Ref::Direct(id(2)))
            .unwrap();
        refs.write_ref(&format!("refs/replace/{}", id(1)), &Ref::Direct(id(3)))
            .unwrap();
        let mut map = ReplaceMap::new();
        map.ensure_ready(&refs, "refs/replace/", ALGO).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&id(1)), Some(&id(3)));
    }

    proptest! {
        #[test]
        fn table_stays_sorted(pairs in proptest::collection::vec((0u8..40, 0u8..40), 0..100)) {
            let mut map = ReplaceMap::new();
            for (a, b) in &pairs {
                map.register(id(*a), id(*b), DuplicatePolicy::Overwrite);
            }
            let originals: Vec<_> = map.iter().map(|r| r.original).collect();
            prop_assert!(originals.windows(2).all(|w| w[0] < w[1]));
            for (a, _) in &pairs {
                prop_assert!(map.get(&id(*a)).is_some());
            }
        }
    }
}
