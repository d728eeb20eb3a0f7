use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;
use odb_types::ObjectId;

use crate::entry::{kind_from_type_byte, PackedObject, PackedObjectHeader};
use crate::error::{PackError, PackResult};
use crate::index::PackIndex;
use crate::writer::{decode_varint, PACK_MAGIC, PACK_VERSION};

/// Backing bytes of a pack: a read-only mapping for packs on disk, or an
/// owned buffer for packs built in memory.
enum PackData {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for PackData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(map) => &map[..],
            Self::Owned(buf) => &buf[..],
        }
    }
}

impl std::fmt::Debug for PackData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mapped(map) => write!(f, "Mapped({} bytes)", map.len()),
            Self::Owned(buf) => write!(f, "Owned({} bytes)", buf.len()),
        }
    }
}

/// Reads objects from a pack file using an index for random access.
///
/// Once constructed the reader is immutable, so it can be shared between
/// concurrent readers.
#[derive(Debug)]
pub struct PackReader {
    pack_data: PackData,
    index: PackIndex,
}

impl PackReader {
    /// Open from raw bytes.
    pub fn from_bytes(pack_data: Vec<u8>, index: PackIndex) -> PackResult<Self> {
        Self::from_data(PackData::Owned(pack_data), index)
    }

    fn from_data(pack_data: PackData, index: PackIndex) -> PackResult<Self> {
        if pack_data.len() < 12 {
            return Err(PackError::CorruptEntry {
                offset: 0,
                reason: "pack data too short".into(),
            });
        }
        if &pack_data[0..4] != PACK_MAGIC {
            return Err(PackError::InvalidMagic {
                expected: "ODBP".into(),
                actual: String::from_utf8_lossy(&pack_data[0..4]).into(),
            });
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&pack_data[4..8]);
        let version = u32::from_be_bytes(raw);
        if version != PACK_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }
        Ok(Self { pack_data, index })
    }

    /// Open a `.pack` file and its sibling `.idx`, mapping both read-only.
    pub fn open(pack_path: &Path) -> PackResult<Self> {
        let index_path = pack_path.with_extension("idx");
        let index_file = File::open(&index_path)?;
        // SAFETY: pack files are never modified in place once written.
        let index_map = unsafe { Mmap::map(&index_file)? };
        let index = PackIndex::from_bytes(&index_map)?;

        let pack_file = File::open(pack_path)?;
        // SAFETY: as above.
        let pack_map = unsafe { Mmap::map(&pack_file)? };
        Self::from_data(PackData::Mapped(pack_map), index)
    }

    /// Read an object by ID.
    pub fn read_object(&self, id: &ObjectId) -> PackResult<Option<PackedObject>> {
        let (offset, expected_crc) = match self.index.lookup(id) {
            Some(v) => v,
            None => return Ok(None),
        };
        self.read_at_offset(id, offset, expected_crc).map(Some)
    }

    /// Read an object's kind and sizes without inflating it.
    pub fn read_header(&self, id: &ObjectId) -> PackResult<Option<PackedObjectHeader>> {
        match self.index.lookup(id) {
            Some((offset, _)) => {
                let (header, _) = self.entry_at(offset)?;
                Ok(Some(header))
            }
            None => Ok(None),
        }
    }

    /// Check containment.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.index.contains(id)
    }

    /// Object count.
    pub fn object_count(&self) -> usize {
        self.index.object_count()
    }

    /// Access the index.
    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    /// List all object IDs.
    pub fn object_ids(&self) -> &[ObjectId] {
        &self.index.object_ids
    }

    /// Verify the pack trailer against the checksum recorded in the index.
    pub fn verify_checksum(&self) -> PackResult<()> {
        let data = &self.pack_data;
        if data.len() < 32 {
            return Err(PackError::ChecksumMismatch);
        }
        let (body, trailer) = data.split_at(data.len() - 32);
        let computed = blake3::hash(body);
        if computed.as_bytes() != trailer || trailer != self.index.pack_checksum {
            return Err(PackError::ChecksumMismatch);
        }
        Ok(())
    }

    /// Decode the entry header at `offset`. Returns the header and the range of
    /// the compressed payload.
    fn entry_at(&self, offset: u64) -> PackResult<(PackedObjectHeader, std::ops::Range<usize>)> {
        let data = &self.pack_data;
        let mut pos = offset as usize;

        if pos >= data.len() {
            return Err(PackError::CorruptEntry {
                offset,
                reason: "offset beyond pack data".into(),
            });
        }

        let type_byte = data[pos];
        pos += 1;

        let kind = kind_from_type_byte(type_byte).ok_or_else(|| PackError::CorruptEntry {
            offset,
            reason: format!("unknown type byte: {type_byte}"),
        })?;

        let (size, consumed) = decode_varint(&data[pos..])?;
        pos += consumed;

        let (compressed_size, consumed) = decode_varint(&data[pos..])?;
        pos += consumed;

        let end = pos + compressed_size as usize;
        if end > data.len() {
            return Err(PackError::CorruptEntry {
                offset,
                reason: "compressed data extends beyond pack".into(),
            });
        }

        let header = PackedObjectHeader {
            kind,
            size,
            disk_size: end as u64 - offset,
            offset,
        };
        Ok((header, pos..end))
    }

    fn read_at_offset(&self, id: &ObjectId, offset: u64, expected_crc: u32) -> PackResult<PackedObject> {
        let (header, range) = self.entry_at(offset)?;
        let compressed = &self.pack_data[range];

        if crc32fast::hash(compressed) != expected_crc {
            return Err(PackError::CrcMismatch { id: *id });
        }

        let decompressed = zstd::decode_all(compressed)
            .map_err(|e| PackError::DecompressionFailed(e.to_string()))?;

        if decompressed.len() as u64 != header.size {
            return Err(PackError::CorruptEntry {
                offset,
                reason: format!(
                    "size mismatch: expected {}, got {}",
                    header.size,
                    decompressed.len()
                ),
            });
        }

        Ok(PackedObject {
            kind: header.kind,
            data: decompressed,
        })
    }
}
