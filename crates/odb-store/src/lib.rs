//! Object database core.
//!
//! Stores and retrieves immutable, content-addressed objects (blobs, trees,
//! commits and tags) for a repository, and keeps exactly one in-memory node
//! per object the process has touched.
//!
//! # Architecture
//!
//! - **Allocation** ([`alloc`]): slab pools of nodes, one per object kind
//! - **Registry** ([`registry`]): id to node identity map with late kind binding
//! - **Loose objects** ([`loose`]): one zlib file per object under `xx/yyyy...`
//! - **Packs** ([`packs`]): lazily scanned pack list with most-recently-used order
//! - **Alternates** ([`alternates`]): recursively linked borrowed object directories
//! - **Replacements** ([`replace`]): `refs/replace/` indirection with a depth limit
//! - **Lookup** ([`object_info`]): the tiered resolver tying the above together
//! - **Store** ([`repository`]): [`RepositoryObjectStore`], owner of all of it
//!
//! # Example
//!
//! ```no_run
//! use odb_store::{RepositoryObjectStore, StoreConfig};
//! use odb_types::ObjectKind;
//!
//! let mut store = RepositoryObjectStore::init(StoreConfig::new("/tmp/repo.git"))?;
//! let id = store.write_object(ObjectKind::Blob, b"hello\n")?;
//! let (kind, data) = store.read_object(&id)?;
//! assert_eq!(kind, ObjectKind::Blob);
//! assert_eq!(data, b"hello\n");
//! # Ok::<(), odb_store::StoreError>(())
//! ```

pub mod alloc;
pub mod alternates;
pub mod config;
pub mod error;
pub mod loose;
pub mod object;
pub mod object_info;
pub mod packs;
pub mod parse;
pub mod registry;
pub mod replace;
pub mod repository;

pub use alloc::{AllocReport, AllocReportLine, ObjectAllocator, PoolKind, Slab, BLOCK_CAPACITY};
pub use alternates::{AlternateOdb, Alternates};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use object::{
    CommitData, Object, ObjectFlags, ObjectHandle, ObjectType, Payload, TagData, TreeEntry,
    FLAG_BITS,
};
pub use object_info::{InfoRequest, ObjectInfo, ObjectInfoFlags, Tier};
pub use packs::{Lifecycle, Pack, PackId, PackList};
pub use registry::ObjectRegistry;
pub use replace::{DuplicatePolicy, ReplaceMap, ReplaceObject, MAX_REPLACE_DEPTH};
pub use repository::RepositoryObjectStore;
