use std::path::PathBuf;

use odb_pack::PackError;
use odb_refs::RefError;
use odb_types::{ObjectId, ObjectKind, TypeError};

/// Errors from object store operations.
///
/// Lookups distinguish three outcomes so that callers such as history walks
/// can skip a missing optional object while treating corruption as a hard
/// stop: see [`StoreError::is_missing`], [`StoreError::is_corrupt`] and
/// [`StoreError::is_fatal`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The object was not found in any tier.
    #[error("object not found: {0}")]
    Missing(ObjectId),

    /// Recomputed hash does not match the requested id.
    #[error("hash mismatch for {id}: computed {computed}")]
    HashMismatch { id: ObjectId, computed: ObjectId },

    /// The object data is malformed or cannot be decoded.
    #[error("corrupt object {id}: {reason}")]
    Corrupt { id: ObjectId, reason: String },

    /// A replacement chain is longer than the allowed number of hops, or loops.
    #[error("replace depth too high for object {0}")]
    ReplaceDepthExceeded(ObjectId),

    /// An object's payload was materialized twice.
    #[error("object {0} is already parsed")]
    AlreadyParsed(ObjectId),

    /// An object was requested as one kind but is known to be another.
    #[error("object {id} is a {actual}, not a {expected}")]
    KindMismatch {
        id: ObjectId,
        expected: ObjectKind,
        actual: ObjectKind,
    },

    /// The path does not hold an object directory.
    #[error("not an object directory: {}", .0.display())]
    InvalidRepository(PathBuf),

    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(String),

    #[error("pack error: {0}")]
    Pack(#[from] PackError),

    #[error("ref error: {0}")]
    Ref(#[from] RefError),

    #[error(transparent)]
    Type(#[from] TypeError),

    /// I/O error from the underlying storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// The object is absent from every tier. Not fatal by itself.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing(_))
    }

    /// Stored data failed verification.
    pub fn is_corrupt(&self) -> bool {
        match self {
            Self::HashMismatch { .. } | Self::Corrupt { .. } => true,
            Self::Pack(e) => e.is_corruption(),
            _ => false,
        }
    }

    /// A misconfiguration or programming error; the operation must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ReplaceDepthExceeded(_) | Self::AlreadyParsed(_) | Self::KindMismatch { .. }
        )
    }

    pub(crate) fn corrupt(id: ObjectId, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            id,
            reason: reason.into(),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use odb_types::HashAlgorithm;

    #[test]
    fn classification_is_disjoint() {
        let id = HashAlgorithm::Sha1.null_id();
        let missing = StoreError::Missing(id);
        let corrupt = StoreError::corrupt(id, "bad header");
        let fatal = StoreError::ReplaceDepthExceeded(id);

        assert!(missing.is_missing() && !missing.is_corrupt() && !missing.is_fatal());
        assert!(corrupt.is_corrupt() && !corrupt.is_missing() && !corrupt.is_fatal());
        assert!(fatal.is_fatal() && !fatal.is_missing() && !fatal.is_corrupt());
    }

    #[test]
    fn pack_corruption_counts_as_corrupt() {
        let err = StoreError::from(PackError::ChecksumMismatch);
        assert!(err.is_corrupt());
        let io = StoreError::from(PackError::Io(std::io::Error::other("disk")));
        assert!(!io.is_corrupt());
    }
}
