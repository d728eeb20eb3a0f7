//! Foundation types for the object database.
//!
//! Every other `odb` crate depends on `odb-types`. The types here carry no
//! storage behaviour of their own; they name objects and describe how their
//! identifiers are computed.
//!
//! # Key Types
//!
//! - [`ObjectId`] — Content-addressed identifier (20-byte SHA-1 or 32-byte SHA-256)
//! - [`HashAlgorithm`] — Digest used to compute identifiers for a repository
//! - [`ObjectKind`] — The four immutable object kinds: blob, tree, commit, tag

pub mod error;
pub mod kind;
pub mod object;

pub use error::TypeError;
pub use kind::ObjectKind;
pub use object::{object_header, HashAlgorithm, ObjectId, MAX_RAW_LEN};
