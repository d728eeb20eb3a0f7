//! The [`RefStore`] trait defining the reference storage interface.

use odb_types::ObjectId;

use crate::error::{RefError, Result};
use crate::types::Ref;

/// Symbolic refs are followed at most this many times.
pub const SYMREF_MAX_DEPTH: usize = 5;

/// Storage backend for named references.
///
/// Implementations must be thread-safe (`Send + Sync`). The namespace is
/// hierarchical:
///
/// - `refs/heads/*` for branches
/// - `refs/tags/*` for tags
/// - `refs/replace/*` for object replacements
pub trait RefStore: Send + Sync {
    /// Read a ref by its full name (e.g. "refs/heads/main").
    ///
    /// Returns `Ok(None)` if the ref does not exist.
    fn read_ref(&self, name: &str) -> Result<Option<Ref>>;

    /// Write (create or update) a ref.
    fn write_ref(&self, name: &str, reference: &Ref) -> Result<()>;

    /// Delete a ref. Returns `Ok(true)` if it existed.
    fn delete_ref(&self, name: &str) -> Result<bool>;

    /// List all refs whose full name starts with `prefix`, sorted by name.
    fn list_refs(&self, prefix: &str) -> Result<Vec<(String, Ref)>>;

    /// Resolve a ref to an object id, following symbolic refs.
    ///
    /// Returns `Ok(None)` if the ref, or any ref it points through, is missing.
    fn resolve(&self, name: &str) -> Result<Option<ObjectId>> {
        let mut current = name.to_string();
        for _ in 0..=SYMREF_MAX_DEPTH {
            match self.read_ref(&current)? {
                None => return Ok(None),
                Some(Ref::Direct(id)) => return Ok(Some(id)),
                Some(Ref::Symbolic(target)) => current = target,
            }
        }
        Err(RefError::SymrefTooDeep {
            name: name.to_string(),
        })
    }
}
