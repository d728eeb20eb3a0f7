//! Pack archives for the object database.
//!
//! A pack bundles many objects into one file with a companion index for
//! offset lookup. The object store treats packs as an opaque provider: it
//! decides which packs exist and in what order they are tried, while this
//! crate answers "is this id in the pack" and "give me its bytes".
//!
//! # Architecture
//!
//! - **Pack file** (`.pack`): concatenated zstd-compressed objects with a BLAKE3 trailer
//! - **Pack index** (`.idx`): fan-out table + sorted IDs for O(log n) lookups
//! - **PackWriter**: builds packs from in-memory objects
//! - **PackReader**: random-access reading over a read-only memory mapping

pub mod entry;
pub mod error;
pub mod index;
pub mod reader;
pub mod writer;

pub use entry::{PackEntry, PackedObject, PackedObjectHeader};
pub use error::{PackError, PackResult};
pub use index::PackIndex;
pub use reader::PackReader;
pub use writer::{PackFile, PackWriter};
