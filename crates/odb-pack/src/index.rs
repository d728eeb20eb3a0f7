use odb_types::{HashAlgorithm, ObjectId};

use crate::error::{PackError, PackResult};

const INDEX_MAGIC: &[u8; 4] = b"ODBI";
const INDEX_VERSION: u32 = 1;

/// Pack index for fast random-access lookups.
///
/// Layout:
/// - Magic, version, id width
/// - Fan-out table: 256 entries counting objects with first byte <= index
/// - Sorted ObjectId array
/// - CRC32 array (parallel)
/// - Offset array (parallel)
/// - Pack checksum
#[derive(Clone, Debug)]
pub struct PackIndex {
    pub algorithm: HashAlgorithm,
    pub fan_out: [u32; 256],
    pub object_ids: Vec<ObjectId>,
    pub crc32s: Vec<u32>,
    pub offsets: Vec<u64>,
    pub pack_checksum: [u8; 32],
}

impl PackIndex {
    /// Build an index from (id, crc32, offset) entries and a pack checksum.
    pub fn build(
        algorithm: HashAlgorithm,
        mut entries: Vec<(ObjectId, u32, u64)>,
        pack_checksum: [u8; 32],
    ) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut fan_out = [0u32; 256];
        let mut object_ids = Vec::with_capacity(entries.len());
        let mut crc32s = Vec::with_capacity(entries.len());
        let mut offsets = Vec::with_capacity(entries.len());

        for (id, crc, offset) in &entries {
            object_ids.push(*id);
            crc32s.push(*crc);
            offsets.push(*offset);
        }

        for id in &object_ids {
            fan_out[id.first_byte() as usize] += 1;
        }
        for i in 1..256 {
            fan_out[i] += fan_out[i - 1];
        }

        Self {
            algorithm,
            fan_out,
            object_ids,
            crc32s,
            offsets,
            pack_checksum,
        }
    }

    /// Position of an object in the sorted id table.
    pub fn position(&self, id: &ObjectId) -> Option<usize> {
        let first_byte = id.first_byte() as usize;
        let start = if first_byte == 0 {
            0
        } else {
            self.fan_out[first_byte - 1] as usize
        };
        let end = self.fan_out[first_byte] as usize;

        self.object_ids[start..end]
            .binary_search(id)
            .ok()
            .map(|pos| start + pos)
    }

    /// Look up an object's (offset, crc32) by ID.
    pub fn lookup(&self, id: &ObjectId) -> Option<(u64, u32)> {
        self.position(id)
            .map(|idx| (self.offsets[idx], self.crc32s[idx]))
    }

    /// Total object count.
    pub fn object_count(&self) -> usize {
        self.object_ids.len()
    }

    /// Check if an object exists.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.position(id).is_some()
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(INDEX_MAGIC);
        buf.extend_from_slice(&INDEX_VERSION.to_be_bytes());
        buf.extend_from_slice(&(self.algorithm.raw_len() as u32).to_be_bytes());
        for &count in &self.fan_out {
            buf.extend_from_slice(&count.to_be_bytes());
        }
        for id in &self.object_ids {
            buf.extend_from_slice(id.as_bytes());
        }
        for &crc in &self.crc32s {
            buf.extend_from_slice(&crc.to_be_bytes());
        }
        for &offset in &self.offsets {
            buf.extend_from_slice(&offset.to_be_bytes());
        }
        buf.extend_from_slice(&self.pack_checksum);
        buf
    }

    /// Deserialize from bytes.
    pub fn from_bytes(data: &[u8]) -> PackResult<Self> {
        if data.len() < 12 {
            return Err(PackError::IndexCorrupted("too short".into()));
        }
        if &data[0..4] != INDEX_MAGIC {
            return Err(PackError::InvalidMagic {
                expected: "ODBI".into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let version = read_u32(data, 4);
        if version != INDEX_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }
        let width = read_u32(data, 8) as usize;
        let algorithm = HashAlgorithm::from_raw_len(width)
            .ok_or_else(|| PackError::IndexCorrupted(format!("unsupported id width {width}")))?;

        let mut pos = 12;
        if data.len() < pos + 256 * 4 {
            return Err(PackError::IndexCorrupted("fan-out truncated".into()));
        }
        let mut fan_out = [0u32; 256];
        for entry in &mut fan_out {
            *entry = read_u32(data, pos);
            pos += 4;
        }
        if fan_out.windows(2).any(|w| w[0] > w[1]) {
            return Err(PackError::IndexCorrupted("fan-out not monotonic".into()));
        }

        let count = fan_out[255] as usize;
        let needed = pos + count * (width + 4 + 8) + 32;
        if data.len() < needed {
            return Err(PackError::IndexCorrupted("data truncated".into()));
        }

        let mut object_ids = Vec::with_capacity(count);
        for _ in 0..count {
            let id = ObjectId::from_raw(&data[pos..pos + width])
                .map_err(|e| PackError::IndexCorrupted(e.to_string()))?;
            object_ids.push(id);
            pos += width;
        }

        let mut crc32s = Vec::with_capacity(count);
        for _ in 0..count {
            crc32s.push(read_u32(data, pos));
            pos += 4;
        }

        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&data[pos..pos + 8]);
            offsets.push(u64::from_be_bytes(raw));
            pos += 8;
        }

        let mut pack_checksum = [0u8; 32];
        pack_checksum.copy_from_slice(&data[pos..pos + 32]);

        Ok(Self {
            algorithm,
            fan_out,
            object_ids,
            crc32s,
            offsets,
            pack_checksum,
        })
    }
}

fn read_u32(data: &[u8], pos: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[pos..pos + 4]);
    u32::from_be_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use odb_types::ObjectKind;

    fn make_ids(n: usize) -> Vec<ObjectId> {
        (0..n)
            .map(|i| {
                let mut data = [0u8; 20];
                data[0] = (i % 256) as u8;
                data[1] = (i / 256) as u8;
                ObjectId::from_raw(&data).unwrap()
            })
            .collect()
    }

    fn blob_id(content: &[u8]) -> ObjectId {
        HashAlgorithm::Sha1.hash_object(ObjectKind::Blob, content)
    }

    #[test]
    fn build_empty_index() {
        let idx = PackIndex::build(HashAlgorithm::Sha1, vec![], [0u8; 32]);
        assert_eq!(idx.object_count(), 0);
        assert!(idx.fan_out.iter().all(|&c| c == 0));
    }

    #[test]
    fn build_and_lookup_single() {
        let id = blob_id(b"hello world test data");
        let idx = PackIndex::build(HashAlgorithm::Sha1, vec![(id, 42, 100)], [0u8; 32]);
        assert_eq!(idx.object_count(), 1);
        assert_eq!(idx.lookup(&id), Some((100, 42)));
    }

    #[test]
    fn lookup_missing_returns_none() {
        let id = blob_id(b"present");
        let idx = PackIndex::build(HashAlgorithm::Sha1, vec![(id, 1, 10)], [0u8; 32]);
        assert!(idx.lookup(&blob_id(b"missing")).is_none());
    }

    #[test]
    fn fan_out_counts_cumulatively() {
        let ids = make_ids(300);
        let entries: Vec<_> = ids.iter().map(|id| (*id, 0, 0)).collect();
        let idx = PackIndex::build(HashAlgorithm::Sha1, entries, [0u8; 32]);
        assert_eq!(idx.fan_out[0], 2);
        assert_eq!(idx.fan_out[43], 88);
        assert_eq!(idx.fan_out[255], 300);
        for id in &ids {
            assert!(idx.contains(id));
        }
    }

    #[test]
    fn serialization_roundtrip() {
        let ids = make_ids(5);
        let entries: Vec<_> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, (i * 7) as u32, (i * 50) as u64))
            .collect();
        let checksum = [0xAB; 32];
        let idx = PackIndex::build(HashAlgorithm::Sha1, entries, checksum);

        let idx2 = PackIndex::from_bytes(&idx.to_bytes()).unwrap();

        assert_eq!(idx2.algorithm, HashAlgorithm::Sha1);
        assert_eq!(idx2.object_count(), idx.object_count());
        assert_eq!(idx2.pack_checksum, checksum);
        for id in &ids {
            assert_eq!(idx.lookup(id), idx2.lookup(id));
        }
    }

    #[test]
    fn sha256_ids_roundtrip() {
        let id = HashAlgorithm::Sha256.hash_object(ObjectKind::Blob, b"wide");
        let idx = PackIndex::build(HashAlgorithm::Sha256, vec![(id, 9, 12)], [1u8; 32]);
        let idx2 = PackIndex::from_bytes(&idx.to_bytes()).unwrap();
        assert_eq!(idx2.algorithm, HashAlgorithm::Sha256);
        assert_eq!(idx2.lookup(&id), Some((12, 9)));
    }

    #[test]
    fn from_bytes_bad_magic() {
        let err = PackIndex::from_bytes(b"BADMxxxxxxxx").unwrap_err();
        assert!(matches!(err, PackError::InvalidMagic { .. }));
    }

    #[test]
    fn from_bytes_bad_version() {
        let mut data = Vec::new();
        data.extend_from_slice(b"ODBI");
        data.extend_from_slice(&99u32.to_be_bytes());
        data.extend_from_slice(&20u32.to_be_bytes());
        let err = PackIndex::from_bytes(&data).unwrap_err();
        assert!(matches!(err, PackError::UnsupportedVersion(99)));
    }

    #[test]
    fn from_bytes_truncated() {
        let err = PackIndex::from_bytes(b"ODBI").unwrap_err();
        assert!(matches!(err, PackError::IndexCorrupted(_)));
    }
}
