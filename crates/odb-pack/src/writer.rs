use std::path::{Path, PathBuf};

use odb_types::{HashAlgorithm, ObjectId, ObjectKind};

use crate::entry::{type_byte, PackEntry};
use crate::error::{PackError, PackResult};
use crate::index::PackIndex;

pub(crate) const PACK_MAGIC: &[u8; 4] = b"ODBP";
pub(crate) const PACK_VERSION: u32 = 1;

/// Result of writing a pack file.
#[derive(Clone, Debug)]
pub struct PackFile {
    pub pack_path: PathBuf,
    pub index_path: PathBuf,
    pub object_count: usize,
    pub checksum: [u8; 32],
}

/// Builds a pack file from a collection of objects.
pub struct PackWriter {
    path: PathBuf,
    algorithm: HashAlgorithm,
    entries: Vec<PackEntry>,
}

impl PackWriter {
    /// Create a new PackWriter targeting the given base path.
    pub fn new(path: &Path, algorithm: HashAlgorithm) -> Self {
        Self {
            path: path.to_path_buf(),
            algorithm,
            entries: Vec::new(),
        }
    }

    /// Add an object under an explicit id.
    ///
    /// The id is trusted; [`PackWriter::add`] computes it instead.
    pub fn add_object(&mut self, id: ObjectId, kind: ObjectKind, data: &[u8]) {
        self.entries.push(PackEntry {
            id,
            kind,
            data: data.to_vec(),
        });
    }

    /// Add an object, computing its id. Returns the id.
    pub fn add(&mut self, kind: ObjectKind, data: &[u8]) -> ObjectId {
        let id = self.algorithm.hash_object(kind, data);
        self.add_object(id, kind, data);
        id
    }

    /// Number of objects queued.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the pack and index to disk.
    ///
    /// The index is written last so a reader never sees an index without its pack.
    pub fn finish(self) -> PackResult<PackFile> {
        let pack_path = self.path.with_extension("pack");
        let index_path = self.path.with_extension("idx");

        let (pack_data, index) = self.build_pack_bytes()?;

        std::fs::write(&pack_path, &pack_data)?;
        std::fs::write(&index_path, index.to_bytes())?;

        tracing::debug!(
            pack = %pack_path.display(),
            objects = index.object_count(),
            "wrote pack"
        );

        Ok(PackFile {
            pack_path,
            index_path,
            object_count: index.object_count(),
            checksum: index.pack_checksum,
        })
    }

    /// Build pack bytes and index in memory (no disk I/O).
    pub fn finish_to_bytes(self) -> PackResult<(Vec<u8>, PackIndex)> {
        self.build_pack_bytes()
    }

    fn build_pack_bytes(self) -> PackResult<(Vec<u8>, PackIndex)> {
        let mut pack_data = Vec::new();
        let mut index_entries = Vec::new();

        // Header: magic + version + object count
        pack_data.extend_from_slice(PACK_MAGIC);
        pack_data.extend_from_slice(&PACK_VERSION.to_be_bytes());
        pack_data.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());

        for entry in &self.entries {
            let offset = pack_data.len() as u64;

            pack_data.push(type_byte(entry.kind));

            let compressed = zstd::encode_all(entry.data.as_slice(), 3)
                .map_err(|e| PackError::CompressionFailed(e.to_string()))?;

            encode_varint(&mut pack_data, entry.data.len() as u64);
            encode_varint(&mut pack_data, compressed.len() as u64);

            let crc = crc32fast::hash(&compressed);
            pack_data.extend_from_slice(&compressed);

            index_entries.push((entry.id, crc, offset));
        }

        // Pack trailer: BLAKE3 checksum of everything so far
        let checksum = *blake3::hash(&pack_data).as_bytes();
        pack_data.extend_from_slice(&checksum);

        let index = PackIndex::build(self.algorithm, index_entries, checksum);
        Ok((pack_data, index))
    }
}

/// Encode a u64 as a variable-length integer.
pub(crate) fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a variable-length integer. Returns (value, bytes_consumed).
pub(crate) fn decode_varint(data: &[u8]) -> PackResult<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.iter().enumerate() {
        value |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        if shift >= 64 {
            return Err(PackError::CorruptEntry {
                offset: 0,
                reason: "varint overflow".into(),
            });
        }
    }
    Err(PackError::CorruptEntry {
        offset: 0,
        reason: "truncated varint".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_small_values_take_one_byte() {
        let mut buf = Vec::new();
        encode_varint(&mut buf, 42);
        assert_eq!(buf, vec![42]);
        assert_eq!(decode_varint(&buf).unwrap(), (42, 1));
    }

    #[test]
    fn varint_max_u64() {
        let mut buf = Vec::new();
        encode_varint(&mut buf, u64::MAX);
        let (val, consumed) = decode_varint(&buf).unwrap();
        assert_eq!(val, u64::MAX);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn decode_varint_truncated() {
        let err = decode_varint(&[0x80]).unwrap_err();
        assert!(matches!(err, PackError::CorruptEntry { .. }));
    }

    #[test]
    fn add_computes_object_ids() {
        let mut writer = PackWriter::new(Path::new("/tmp/unused"), HashAlgorithm::Sha1);
        let id = writer.add(ObjectKind::Blob, b"");
        assert_eq!(id.to_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
        assert_eq!(writer.len(), 1);
    }
}
