//! Reference storage for the object database.
//!
//! References are named pointers to objects. The object store reads one
//! namespace of them, `refs/replace/`, to populate its replacement table;
//! everything else about refs belongs to callers.
//!
//! # Modules
//!
//! - [`error`] — Error types for ref operations
//! - [`types`] — The [`Ref`] type (direct or symbolic)
//! - [`traits`] — The [`RefStore`] trait defining the storage interface
//! - [`names`] — Ref name validation
//! - [`memory`] — In-memory [`InMemoryRefStore`] for tests
//! - [`files`] — [`FileRefStore`] over loose ref files and `packed-refs`

pub mod error;
pub mod files;
pub mod memory;
pub mod names;
pub mod traits;
pub mod types;

pub use error::{RefError, Result};
pub use files::FileRefStore;
pub use memory::InMemoryRefStore;
pub use names::validate_ref_name;
pub use traits::{RefStore, SYMREF_MAX_DEPTH};
pub use types::Ref;
