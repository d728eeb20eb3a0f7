//! Core reference types.

use std::fmt;

use odb_types::{HashAlgorithm, ObjectId};

use crate::error::{RefError, Result};

/// A named reference: either a direct pointer to an object, or a symbolic
/// pointer naming another ref.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ref {
    /// Points directly at an object.
    Direct(ObjectId),
    /// Names another ref (e.g. `HEAD` -> `refs/heads/main`).
    Symbolic(String),
}

impl Ref {
    /// The object id, if this is a direct ref.
    pub fn target_id(&self) -> Option<&ObjectId> {
        match self {
            Ref::Direct(id) => Some(id),
            Ref::Symbolic(_) => None,
        }
    }

    /// Returns `true` if this is a symbolic ref.
    pub fn is_symbolic(&self) -> bool {
        matches!(self, Ref::Symbolic(_))
    }

    /// Parse the contents of a loose ref file.
    pub fn parse(name: &str, contents: &str, algo: HashAlgorithm) -> Result<Self> {
        let line = contents.trim_end();
        if let Some(target) = line.strip_prefix("ref:") {
            return Ok(Ref::Symbolic(target.trim().to_string()));
        }
        ObjectId::from_hex_with(line, algo)
            .map(Ref::Direct)
            .map_err(|e| RefError::Malformed {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }

    /// Serialize to the loose ref file format.
    pub fn to_file_contents(&self) -> String {
        match self {
            Ref::Direct(id) => format!("{id}\n"),
            Ref::Symbolic(target) => format!("ref: {target}\n"),
        }
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ref::Direct(id) => write!(f, "{id}"),
            Ref::Symbolic(target) => write!(f, "ref: {target}"),
        }
    }
}
