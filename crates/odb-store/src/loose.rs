//! Loose objects: one zlib-compressed file per object.
//!
//! An object with hex id `xxyyyy...` lives at `<objdir>/xx/yyyy...`. The file
//! holds the deflated bytes of `"<type> <size>\0"` followed by the content,
//! and the id is the digest of exactly those bytes.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use odb_types::{object_header, HashAlgorithm, ObjectId, ObjectKind};

use crate::error::{StoreError, StoreResult};
use crate::object::ObjectType;

/// Upper bound on the header length, type name and size included.
const MAX_HEADER_LEN: usize = 64;

/// A loose object read back from disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LooseObject {
    pub kind: ObjectType,
    pub size: u64,
    /// Compressed size on disk.
    pub disk_size: u64,
    /// Content, or `None` when only the header was read.
    pub data: Option<Vec<u8>>,
}

/// Path of the loose file for `id`.
pub fn loose_object_path(objdir: &Path, id: &ObjectId) -> PathBuf {
    let (dir, file) = id.loose_path_parts();
    objdir.join(dir).join(file)
}

/// Whether a loose file exists for `id`. Content is not checked.
pub fn has_loose_object(objdir: &Path, id: &ObjectId) -> bool {
    loose_object_path(objdir, id).is_file()
}

/// Read the loose object for `id`, verifying its header and hash.
///
/// Returns `Ok(None)` if there is no file. The whole stream is inflated and
/// checked even when `want_content` is false; the content is then dropped.
/// Unknown type names are reported as corruption unless `allow_unknown` is
/// set.
pub fn read_loose_object(
    objdir: &Path,
    id: &ObjectId,
    want_content: bool,
    allow_unknown: bool,
) -> StoreResult<Option<LooseObject>> {
    read_loose_object_at(&loose_object_path(objdir, id), id, want_content, allow_unknown)
}

/// Like [`read_loose_object`], with the file path already built.
pub fn read_loose_object_at(
    path: &Path,
    id: &ObjectId,
    want_content: bool,
    allow_unknown: bool,
) -> StoreResult<Option<LooseObject>> {
    let compressed = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let disk_size = compressed.len() as u64;

    let mut inflated = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .read_to_end(&mut inflated)
        .map_err(|e| StoreError::corrupt(*id, format!("unable to inflate: {e}")))?;

    let (kind, size, body_start) = parse_header(id, &inflated, allow_unknown)?;
    let body_len = (inflated.len() - body_start) as u64;
    if body_len != size {
        return Err(StoreError::corrupt(
            *id,
            format!("size mismatch: header says {size}, found {body_len}"),
        ));
    }
    let computed = id.algorithm().digest(&inflated);
    if computed != *id {
        return Err(StoreError::HashMismatch { id: *id, computed });
    }

    let data = want_content.then(|| inflated.split_off(body_start));
    Ok(Some(LooseObject {
        kind,
        size,
        disk_size,
        data,
    }))
}

fn parse_header(
    id: &ObjectId,
    inflated: &[u8],
    allow_unknown: bool,
) -> StoreResult<(ObjectType, u64, usize)> {
    let nul = inflated
        .iter()
        .take(MAX_HEADER_LEN)
        .position(|&b| b == 0)
        .ok_or_else(|| StoreError::corrupt(*id, "header not terminated"))?;
    let header = std::str::from_utf8(&inflated[..nul])
        .map_err(|_| StoreError::corrupt(*id, "header is not text"))?;
    let (type_name, size) = header
        .split_once(' ')
        .ok_or_else(|| StoreError::corrupt(*id, "header without size"))?;
    let size: u64 = size
        .parse()
        .map_err(|_| StoreError::corrupt(*id, format!("bad size in header: {size:?}")))?;
    let kind = match ObjectKind::from_name(type_name.as_bytes()) {
        Some(kind) => ObjectType::Known(kind),
        None if allow_unknown && !type_name.is_empty() => {
            ObjectType::Unknown(type_name.to_string())
        }
        None => {
            return Err(StoreError::corrupt(
                *id,
                format!("unknown object type {type_name:?}"),
            ))
        }
    };
    Ok((kind, size, nul + 1))
}

/// Write `data` as a loose object and return its id.
///
/// Writing an object that already exists is a no-op. The file is written to
/// a temporary name and renamed into place, so readers never see a partial
/// object.
pub fn write_loose_object(
    objdir: &Path,
    algo: HashAlgorithm,
    kind: ObjectKind,
    data: &[u8],
) -> StoreResult<ObjectId> {
    let id = algo.hash_object(kind, data);
    let path = loose_object_path(objdir, &id);
    if path.is_file() {
        return Ok(id);
    }
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::InvalidRepository(objdir.to_path_buf()))?;
    fs::create_dir_all(dir)?;

    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    let mut encoder = ZlibEncoder::new(tmp, Compression::default());
    encoder.write_all(&object_header(kind.as_str(), data.len()))?;
    encoder.write_all(data)?;
    let tmp = encoder.finish()?;
    tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;

    tracing::debug!(%id, %kind, size = data.len(), "wrote loose object");
    Ok(id)
}

/// An entry found while scanning an object directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LooseEntry {
    Object(ObjectId),
    /// A file in a fan-out directory whose name is not an object id.
    Cruft(PathBuf),
}

/// Visit the files in one fan-out directory (`00` through `ff`).
pub fn for_each_file_in_subdir<F>(
    objdir: &Path,
    subdir: u8,
    algo: HashAlgorithm,
    mut visit: F,
) -> StoreResult<()>
where
    F: FnMut(LooseEntry),
{
    let prefix = format!("{subdir:02x}");
    let dir = objdir.join(&prefix);
    let read_dir = match fs::read_dir(&dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let mut names: Vec<_> = read_dir
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name())
        .collect();
    names.sort();

    for name in names {
        let name_str = name.to_string_lossy();
        let hex = format!("{prefix}{name_str}");
        match ObjectId::from_hex_with(&hex, algo) {
            Ok(id) => visit(LooseEntry::Object(id)),
            Err(_) => visit(LooseEntry::Cruft(dir.join(&name))),
        }
    }
    Ok(())
}

/// Visit every loose object in `objdir`, in id order.
pub fn for_each_loose_object<F>(objdir: &Path, algo: HashAlgorithm, mut visit: F) -> StoreResult<()>
where
    F: FnMut(LooseEntry),
{
    for subdir in 0..=u8::MAX {
        for_each_file_in_subdir(objdir, subdir, algo, &mut visit)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALGO: HashAlgorithm = HashAlgorithm::Sha1;

    fn write_raw(objdir: &Path, id: &ObjectId, inflated: &[u8]) {
        let path = loose_object_path(objdir, id);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(inflated).unwrap();
        fs::write(path, enc.finish().unwrap()).unwrap();
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let id = write_loose_object(dir.path(), ALGO, ObjectKind::Blob, b"hello\n").unwrap();
        assert_eq!(id.to_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");
        assert!(has_loose_object(dir.path(), &id));
        assert!(dir.path().join("ce").join("013625030ba8dba906f756967f9e9ca394464a").is_file());

        let obj = read_loose_object(dir.path(), &id, true, false).unwrap().unwrap();
        assert_eq!(obj.kind, ObjectType::Known(ObjectKind::Blob));
        assert_eq!(obj.size, 6);
        assert_eq!(obj.data.as_deref(), Some(&b"hello\n"[..]));
        assert!(obj.disk_size > 0);
    }

    #[test]
    fn write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_loose_object(dir.path(), ALGO, ObjectKind::Blob, b"x").unwrap();
        let b = write_loose_object(dir.path(), ALGO, ObjectKind::Blob, b"x").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let id = ALGO.hash_object(ObjectKind::Blob, b"nope");
        assert!(read_loose_object(dir.path(), &id, true, false).unwrap().is_none());
    }

    #[test]
    fn header_only_read() {
        let dir = tempfile::tempdir().unwrap();
        let content = vec![b'z'; 10_000];
        let id = write_loose_object(dir.path(), ALGO, ObjectKind::Blob, &content).unwrap();
        let obj = read_loose_object(dir.path(), &id, false, false).unwrap().unwrap();
        assert_eq!(obj.size, 10_000);
        assert!(obj.data.is_none());
    }

    #[test]
    fn header_only_read_still_checks_hash() {
        let dir = tempfile::tempdir().unwrap();
        let claimed = ALGO.hash_object(ObjectKind::Blob, b"original");
        write_raw(dir.path(), &claimed, b"blob 8\0tampered");
        let err = read_loose_object(dir.path(), &claimed, false, false).unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { .. }));

        let short = ALGO.hash_object(ObjectKind::Blob, b"abc");
        write_raw(dir.path(), &short, b"blob 99\0abc");
        assert!(read_loose_object(dir.path(), &short, false, false).unwrap_err().is_corrupt());
    }

    #[test]
    fn detects_hash_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let claimed = ALGO.hash_object(ObjectKind::Blob, b"original");
        write_raw(dir.path(), &claimed, b"blob 8\0tampered");
        let err = read_loose_object(dir.path(), &claimed, true, false).unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { .. }));
        assert!(err.is_corrupt());
    }

    #[test]
    fn detects_size_mismatch_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let id = ALGO.hash_object(ObjectKind::Blob, b"abc");
        write_raw(dir.path(), &id, b"blob 99\0abc");
        assert!(read_loose_object(dir.path(), &id, true, false).unwrap_err().is_corrupt());

        let other = ALGO.hash_object(ObjectKind::Blob, b"def");
        let path = loose_object_path(dir.path(), &other);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not zlib at all").unwrap();
        assert!(read_loose_object(dir.path(), &other, true, false).unwrap_err().is_corrupt());
    }

    #[test]
    fn unknown_type_needs_permission() {
        let dir = tempfile::tempdir().unwrap();
        let inflated = b"widget 3\0abc";
        let id = ALGO.digest(inflated);
        write_raw(dir.path(), &id, inflated);

        assert!(read_loose_object(dir.path(), &id, true, false).unwrap_err().is_corrupt());
        let obj = read_loose_object(dir.path(), &id, true, true).unwrap().unwrap();
        assert_eq!(obj.kind, ObjectType::Unknown("widget".into()));
        assert_eq!(obj.size, 3);
    }

    #[test]
    fn scan_reports_objects_and_cruft() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_loose_object(dir.path(), ALGO, ObjectKind::Blob, b"a").unwrap();
        let b = write_loose_object(dir.path(), ALGO, ObjectKind::Blob, b"b").unwrap();
        let (sub, _) = a.loose_path_parts();
        fs::write(dir.path().join(&sub).join("tmp_obj_garbage"), b"").unwrap();

        let mut objects = Vec::new();
        let mut cruft = Vec::new();
        for_each_loose_object(dir.path(), ALGO, |entry| match entry {
            LooseEntry::Object(id) => objects.push(id),
            LooseEntry::Cruft(path) => cruft.push(path),
        })
        .unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(objects, expected);
        assert_eq!(cruft.len(), 1);
    }
}
