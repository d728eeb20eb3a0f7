//! The per-repository object store.
//!
//! [`RepositoryObjectStore`] owns every piece of object-layer state for one
//! repository: the node registry, the local pack list, the alternates chain,
//! the replacement table and the in-memory object cache. Each piece is built
//! on first use, so opening a store does no I/O beyond checking that the
//! object directory exists.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use odb_refs::{FileRefStore, RefStore};
use odb_types::{HashAlgorithm, ObjectId, ObjectKind};
use tracing::{debug, info};

use crate::alloc::AllocReport;
use crate::alternates::Alternates;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::loose::{self, write_loose_object};
use crate::object::{Object, ObjectFlags, ObjectHandle};
use crate::object_info::{CachedObject, InfoRequest, ObjectInfo, ObjectInfoFlags};
use crate::packs::PackList;
use crate::parse::parse_object_buffer;
use crate::registry::ObjectRegistry;
use crate::replace::{DuplicatePolicy, ReplaceMap};

/// Object storage for one repository.
pub struct RepositoryObjectStore {
    config: StoreConfig,
    pub(crate) objects_dir: PathBuf,
    pub(crate) registry: ObjectRegistry,
    pub(crate) packs: PackList,
    pub(crate) alternates: Alternates,
    replacements: ReplaceMap,
    refs: Box<dyn RefStore>,
    pub(crate) cached: HashMap<ObjectId, CachedObject>,
    approximate_count: Option<u64>,
}

impl std::fmt::Debug for RepositoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryObjectStore")
            .field("objects_dir", &self.objects_dir)
            .field("objects", &self.registry.len())
            .field("packs", &self.packs.len())
            .field("alternates", &self.alternates.len())
            .finish_non_exhaustive()
    }
}

impl RepositoryObjectStore {
    /// Open an existing repository.
    ///
    /// Refs are read from the repository directory.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        let refs = FileRefStore::new(config.git_dir.clone(), config.hash_algorithm);
        Self::open_with_refs(config, Box::new(refs))
    }

    /// Open with a caller-supplied ref store.
    pub fn open_with_refs(config: StoreConfig, refs: Box<dyn RefStore>) -> StoreResult<Self> {
        let objects_dir = config.objects_dir();
        if !objects_dir.is_dir() {
            return Err(StoreError::InvalidRepository(objects_dir));
        }
        debug!(objects = %objects_dir.display(), "opening object store");
        let mut store = Self {
            registry: ObjectRegistry::new(),
            packs: PackList::new(&objects_dir, true),
            alternates: Alternates::new(&objects_dir, config.alternates.clone()),
            replacements: ReplaceMap::new(),
            cached: HashMap::new(),
            approximate_count: None,
            objects_dir,
            refs,
            config,
        };
        store.seed_cache();
        Ok(store)
    }

    /// Create the directory layout for a new repository, then open it.
    pub fn init(config: StoreConfig) -> StoreResult<Self> {
        let objects_dir = config.objects_dir();
        fs::create_dir_all(objects_dir.join("info"))?;
        fs::create_dir_all(objects_dir.join("pack"))?;
        fs::create_dir_all(config.git_dir.join("refs"))?;
        info!(path = %config.git_dir.display(), "initialized repository");
        Self::open(config)
    }

    fn seed_cache(&mut self) {
        let empty_tree = self.algorithm().empty_tree_id();
        self.cached.insert(
            empty_tree,
            CachedObject {
                kind: ObjectKind::Tree,
                data: Vec::new(),
            },
        );
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.config.hash_algorithm
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    pub fn refs(&self) -> &dyn RefStore {
        self.refs.as_ref()
    }

    // --- writing ---

    /// Store `data` as a loose object and return its id.
    pub fn write_object(&mut self, kind: ObjectKind, data: &[u8]) -> StoreResult<ObjectId> {
        write_loose_object(&self.objects_dir, self.algorithm(), kind, data)
    }

    /// Make an object visible to lookups without writing it anywhere.
    ///
    /// Objects that already exist are left alone.
    pub fn pretend_object(&mut self, kind: ObjectKind, data: &[u8]) -> StoreResult<ObjectId> {
        let id = self.algorithm().hash_object(kind, data);
        if !self.has_object(&id)? {
            self.cached.insert(
                id,
                CachedObject {
                    kind,
                    data: data.to_vec(),
                },
            );
        }
        Ok(id)
    }

    // --- reading ---

    /// Whether `id` exists in any tier. Replacements are not applied.
    pub fn has_object(&mut self, id: &ObjectId) -> StoreResult<bool> {
        match self.locate(id, ObjectInfoFlags::empty(), InfoRequest::HEADER) {
            Ok(_) => Ok(true),
            Err(e) if e.is_missing() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Kind and content of `id`, after replacement.
    pub fn read_object(&mut self, id: &ObjectId) -> StoreResult<(ObjectKind, Vec<u8>)> {
        let info = self.locate(id, ObjectInfoFlags::LOOKUP_REPLACE, InfoRequest::CONTENT)?;
        let kind = info.kind.known().ok_or_else(|| {
            StoreError::corrupt(info.id, format!("unknown object type {}", info.kind))
        })?;
        let content = info
            .content
            .ok_or_else(|| StoreError::corrupt(info.id, "no content returned"))?;
        Ok((kind, content))
    }

    /// Kind and size of `id` without reading its content.
    pub fn object_header(&mut self, id: &ObjectId) -> StoreResult<ObjectInfo> {
        self.locate(id, ObjectInfoFlags::LOOKUP_REPLACE, InfoRequest::HEADER)
    }

    // --- replacements ---

    /// The object finally read for `id`, following replace refs.
    pub fn lookup_replace_object(&mut self, id: &ObjectId) -> StoreResult<ObjectId> {
        if !self.config.replace_objects {
            return Ok(*id);
        }
        self.replacements.ensure_ready(
            self.refs.as_ref(),
            &self.config.replace_ref_base,
            self.config.hash_algorithm,
        )?;
        self.replacements.resolve(id)
    }

    /// Register a replacement in memory only. Returns whether `original`
    /// was already mapped.
    pub fn register_replace_object(
        &mut self,
        original: ObjectId,
        replacement: ObjectId,
        policy: DuplicatePolicy,
    ) -> StoreResult<bool> {
        self.replacements.ensure_ready(
            self.refs.as_ref(),
            &self.config.replace_ref_base,
            self.config.hash_algorithm,
        )?;
        Ok(self.replacements.register(original, replacement, policy))
    }

    pub fn replacements(&self) -> &ReplaceMap {
        &self.replacements
    }

    // --- node registry ---

    pub fn lookup_object(&self, id: &ObjectId) -> Option<ObjectHandle> {
        self.registry.lookup(id)
    }

    pub fn lookup_unknown_object(&mut self, id: ObjectId) -> ObjectHandle {
        self.registry.lookup_or_create(id)
    }

    pub fn lookup_blob(&mut self, id: ObjectId) -> StoreResult<ObjectHandle> {
        self.registry.lookup_blob(id)
    }

    pub fn lookup_tree(&mut self, id: ObjectId) -> StoreResult<ObjectHandle> {
        self.registry.lookup_tree(id)
    }

    pub fn lookup_commit(&mut self, id: ObjectId) -> StoreResult<ObjectHandle> {
        self.registry.lookup_commit(id)
    }

    pub fn lookup_tag(&mut self, id: ObjectId) -> StoreResult<ObjectHandle> {
        self.registry.lookup_tag(id)
    }

    /// The node behind `handle`.
    ///
    /// # Panics
    ///
    /// Panics if `handle` was issued by another store.
    pub fn object(&self, handle: ObjectHandle) -> &Object {
        self.registry.get(handle)
    }

    pub fn object_mut(&mut self, handle: ObjectHandle) -> &mut Object {
        self.registry.get_mut(handle)
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    /// Read and parse `id` into its node.
    ///
    /// The node is keyed by `id` even when a replacement supplies the
    /// content. Content is checked against the id it was read under.
    pub fn parse_object(&mut self, id: &ObjectId) -> StoreResult<ObjectHandle> {
        if let Some(handle) = self.registry.lookup(id) {
            if self.registry.get(handle).is_parsed() {
                return Ok(handle);
            }
        }
        let info = self.locate(id, ObjectInfoFlags::LOOKUP_REPLACE, InfoRequest::CONTENT)?;
        let kind = info.kind.known().ok_or_else(|| {
            StoreError::corrupt(info.id, format!("unknown object type {}", info.kind))
        })?;
        let content = info
            .content
            .ok_or_else(|| StoreError::corrupt(info.id, "no content returned"))?;
        let computed = self.algorithm().hash_object(kind, &content);
        if computed != info.id {
            return Err(StoreError::HashMismatch {
                id: info.id,
                computed,
            });
        }
        parse_object_buffer(&mut self.registry, self.config.hash_algorithm, *id, kind, &content)
    }

    /// Clear `mask` on every node.
    pub fn clear_object_flags(&mut self, mask: ObjectFlags) {
        self.registry.clear_flags(mask);
    }

    /// Per-pool allocation statistics.
    pub fn alloc_report(&self) -> AllocReport {
        self.registry.report()
    }

    // --- packs and alternates ---

    pub fn packs(&mut self) -> &PackList {
        self.packs.ensure_ready();
        &self.packs
    }

    pub fn alternates(&mut self) -> &Alternates {
        self.alternates.ensure_ready();
        &self.alternates
    }

    /// Rescan local and alternate pack directories for new packs.
    pub fn reprepare_packs(&mut self) {
        self.packs.reprepare();
        self.alternates.ensure_ready();
        for alt in self.alternates.iter_mut() {
            alt.packs_mut().reprepare();
        }
        self.approximate_count = None;
    }

    /// Packed object count across local and alternate packs, computed once.
    pub fn approximate_object_count(&mut self) -> u64 {
        if let Some(count) = self.approximate_count {
            return count;
        }
        self.packs.ensure_ready();
        self.alternates.ensure_ready();
        let mut count = self.packs.object_count();
        for alt in self.alternates.iter_mut() {
            alt.packs_mut().ensure_ready();
            count += alt.packs().object_count();
        }
        self.approximate_count = Some(count);
        count
    }

    pub fn add_to_alternates_memory(&mut self, dir: &Path) -> bool {
        self.alternates.add_to_alternates_memory(dir)
    }

    pub fn add_to_alternates_file(&mut self, dir: &Path) -> StoreResult<()> {
        self.alternates.add_to_alternates_file(dir)
    }

    /// Loose objects in the local object directory, in id order.
    pub fn loose_objects(&self) -> StoreResult<Vec<ObjectId>> {
        let mut ids = Vec::new();
        loose::for_each_loose_object(&self.objects_dir, self.algorithm(), |entry| {
            if let loose::LooseEntry::Object(id) = entry {
                ids.push(id);
            }
        })?;
        Ok(ids)
    }

    /// Drop all in-memory state. Every handle issued so far becomes invalid.
    pub fn clear(&mut self) {
        self.registry = ObjectRegistry::new();
        self.packs.clear();
        self.alternates.clear();
        self.replacements.clear();
        self.cached.clear();
        self.approximate_count = None;
        self.seed_cache();
        debug!(objects = %self.objects_dir.display(), "object store cleared");
    }
}
