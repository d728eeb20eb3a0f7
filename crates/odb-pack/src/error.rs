use odb_types::ObjectId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("invalid pack magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported pack version: {0}")]
    UnsupportedVersion(u32),

    #[error("pack checksum mismatch")]
    ChecksumMismatch,

    #[error("corrupt pack entry at offset {offset}: {reason}")]
    CorruptEntry { offset: u64, reason: String },

    #[error("CRC32 mismatch for object {id}")]
    CrcMismatch { id: ObjectId },

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index corrupted: {0}")]
    IndexCorrupted(String),
}

impl PackError {
    /// Whether the error describes damaged pack content (as opposed to an
    /// I/O failure reaching it).
    pub fn is_corruption(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

pub type PackResult<T> = Result<T, PackError>;
