use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::error::TypeError;
use crate::kind::ObjectKind;

/// Width of the largest supported digest.
pub const MAX_RAW_LEN: usize = 32;

/// Digest used to compute object identifiers for a repository.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// 20-byte SHA-1 identifiers.
    #[default]
    Sha1,
    /// 32-byte SHA-256 identifiers.
    Sha256,
}

impl HashAlgorithm {
    /// Raw digest length in bytes.
    pub const fn raw_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    /// Length of the hex representation.
    pub const fn hex_len(&self) -> usize {
        self.raw_len() * 2
    }

    /// Configuration name of the algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    /// Infer the algorithm from a raw digest length.
    pub fn from_raw_len(len: usize) -> Option<Self> {
        match len {
            20 => Some(Self::Sha1),
            32 => Some(Self::Sha256),
            _ => None,
        }
    }

    /// The null identifier for this algorithm.
    pub fn null_id(&self) -> ObjectId {
        ObjectId {
            bytes: [0u8; MAX_RAW_LEN],
            len: self.raw_len() as u8,
        }
    }

    /// Hash raw bytes with no object header.
    pub fn digest(&self, data: &[u8]) -> ObjectId {
        match self {
            Self::Sha1 => ObjectId::from_digest(Sha1::digest(data).as_slice()),
            Self::Sha256 => ObjectId::from_digest(Sha256::digest(data).as_slice()),
        }
    }

    /// Compute the identifier of an object: the digest of
    /// `"<kind> <len>\0"` followed by the content.
    pub fn hash_object(&self, kind: ObjectKind, data: &[u8]) -> ObjectId {
        let header = object_header(kind.as_str(), data.len());
        match self {
            Self::Sha1 => hash_with::<Sha1>(&header, data),
            Self::Sha256 => hash_with::<Sha256>(&header, data),
        }
    }

    /// Identifier of the empty tree, which every repository implicitly has.
    pub fn empty_tree_id(&self) -> ObjectId {
        self.hash_object(ObjectKind::Tree, b"")
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            other => Err(TypeError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Build the `"<type> <len>\0"` header that prefixes hashed object content.
pub fn object_header(type_name: &str, len: usize) -> Vec<u8> {
    format!("{type_name} {len}\0").into_bytes()
}

fn hash_with<D: Digest>(header: &[u8], data: &[u8]) -> ObjectId {
    let mut hasher = D::new();
    hasher.update(header);
    hasher.update(data);
    ObjectId::from_digest(hasher.finalize().as_slice())
}

/// Content-addressed identifier for any stored object.
///
/// An `ObjectId` is the digest of an object's header and content. Its width
/// depends on the repository's [`HashAlgorithm`]; ids of the same width
/// order bytewise.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    bytes: [u8; MAX_RAW_LEN],
    len: u8,
}

impl ObjectId {
    /// Create an `ObjectId` from a raw digest of a supported width.
    pub fn from_raw(raw: &[u8]) -> Result<Self, TypeError> {
        if HashAlgorithm::from_raw_len(raw.len()).is_none() {
            return Err(TypeError::InvalidLength {
                expected: 20,
                actual: raw.len(),
            });
        }
        Ok(Self::from_digest(raw))
    }

    fn from_digest(raw: &[u8]) -> Self {
        let mut bytes = [0u8; MAX_RAW_LEN];
        bytes[..raw.len()].copy_from_slice(raw);
        Self {
            bytes,
            len: raw.len() as u8,
        }
    }

    /// Returns `true` if this is the null object ID.
    pub fn is_null(&self) -> bool {
        self.as_bytes().iter().all(|b| *b == 0)
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// The algorithm this id was produced with, inferred from its width.
    pub fn algorithm(&self) -> HashAlgorithm {
        if self.len as usize == HashAlgorithm::Sha256.raw_len() {
            HashAlgorithm::Sha256
        } else {
            HashAlgorithm::Sha1
        }
    }

    /// First byte of the digest, used for fan-out tables and loose subdirectories.
    pub fn first_byte(&self) -> u8 {
        self.bytes[0]
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.bytes[..4])
    }

    /// Parse from a 40- or 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Self::from_raw(&bytes)
    }

    /// Parse a hex string that must match the given algorithm's width.
    pub fn from_hex_with(s: &str, algo: HashAlgorithm) -> Result<Self, TypeError> {
        if s.len() != algo.hex_len() {
            return Err(TypeError::InvalidLength {
                expected: algo.hex_len(),
                actual: s.len(),
            });
        }
        Self::from_hex(s)
    }

    /// Loose object path components: the two-hex-digit fan-out directory
    /// and the remaining hex digits.
    pub fn loose_path_parts(&self) -> (String, String) {
        let hex = self.to_hex();
        let (dir, file) = hex.split_at(2);
        (dir.to_string(), file.to_string())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.short_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
