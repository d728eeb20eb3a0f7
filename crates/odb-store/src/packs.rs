//! The set of packs known for one object directory.
//!
//! Packs are discovered lazily by scanning `<objdir>/pack/` for `*.pack`
//! files with a sibling `.idx`. Lookups walk the packs most-recently-hit
//! first, so repeated reads from the same pack stay cheap.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use odb_pack::{PackError, PackReader, PackedObject, PackedObjectHeader};
use odb_types::ObjectId;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Initialization state of a lazily-built structure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Lifecycle {
    #[default]
    Uninitialized,
    Ready,
}

/// Stable index of a pack within its [`PackList`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PackId(usize);

/// One opened pack.
#[derive(Debug)]
pub struct Pack {
    path: PathBuf,
    reader: PackReader,
    local: bool,
    keep: bool,
    promisor: bool,
    bad_objects: Vec<ObjectId>,
}

impl Pack {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reader(&self) -> &PackReader {
        &self.reader
    }

    /// The pack belongs to the repository's own object directory.
    pub fn is_local(&self) -> bool {
        self.local
    }

    /// A `.keep` file protects the pack from repacking.
    pub fn is_keep(&self) -> bool {
        self.keep
    }

    /// A `.promisor` file marks the pack as fetched from a promisor remote.
    pub fn is_promisor(&self) -> bool {
        self.promisor
    }

    pub fn object_count(&self) -> usize {
        self.reader.object_count()
    }

    /// Objects whose entries in this pack failed to read.
    pub fn bad_objects(&self) -> &[ObjectId] {
        &self.bad_objects
    }

    pub fn is_bad(&self, id: &ObjectId) -> bool {
        self.bad_objects.contains(id)
    }

    /// Contains `id` with an entry not known to be bad.
    pub fn has_usable(&self, id: &ObjectId) -> bool {
        !self.is_bad(id) && self.reader.contains(id)
    }
}

/// What a pack lookup produced.
#[derive(Debug)]
pub enum PackLookup {
    Found {
        pack: PackId,
        header: PackedObjectHeader,
        object: Option<PackedObject>,
    },
    /// No pack had a readable entry; `corruption` describes the first bad
    /// entry seen, if any.
    NotFound { corruption: Option<PackError> },
}

/// Packs of one object directory, in most-recently-used order.
#[derive(Debug)]
pub struct PackList {
    dir: PathBuf,
    local: bool,
    state: Lifecycle,
    packs: Vec<Pack>,
    mru: Vec<PackId>,
}

impl PackList {
    /// A list for the packs under `<objdir>/pack`. Nothing is scanned yet.
    pub fn new(objdir: &Path, local: bool) -> Self {
        Self {
            dir: objdir.join("pack"),
            local,
            state: Lifecycle::Uninitialized,
            packs: Vec::new(),
            mru: Vec::new(),
        }
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    /// Scan the pack directory on first use.
    pub fn ensure_ready(&mut self) {
        if self.state == Lifecycle::Uninitialized {
            self.scan();
            self.state = Lifecycle::Ready;
        }
    }

    /// Rescan for packs added since the last scan. Known packs keep their
    /// order; new ones go to the back.
    pub fn reprepare(&mut self) {
        self.scan();
        self.state = Lifecycle::Ready;
    }

    fn scan(&mut self) {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "unable to read pack directory");
                return;
            }
        };
        let mut found: Vec<PathBuf> = read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "pack"))
            .filter(|path| !self.packs.iter().any(|p| &p.path == path))
            .collect();
        found.sort();

        for path in found {
            if !path.with_extension("idx").is_file() {
                debug!(pack = %path.display(), "skipping pack without index");
                continue;
            }
            match PackReader::open(&path) {
                Ok(reader) => self.add_pack(path, reader),
                Err(e) => warn!(pack = %path.display(), error = %e, "skipping unreadable pack"),
            }
        }
    }

    fn add_pack(&mut self, path: PathBuf, reader: PackReader) {
        let pack = Pack {
            keep: path.with_extension("keep").exists(),
            promisor: path.with_extension("promisor").exists(),
            local: self.local,
            reader,
            path,
            bad_objects: Vec::new(),
        };
        debug!(
            pack = %pack.path.display(),
            objects = pack.object_count(),
            local = pack.local,
            "registered pack"
        );
        let id = PackId(self.packs.len());
        self.packs.push(pack);
        self.mru.push(id);
    }

    /// Packs from most to least recently hit.
    pub fn packs_in_search_order(&self) -> impl Iterator<Item = (PackId, &Pack)> {
        self.mru.iter().map(move |&id| (id, &self.packs[id.0]))
    }

    /// Move `pack` to the front of the search order.
    pub fn note_pack_hit(&mut self, pack: PackId) {
        if let Some(pos) = self.mru.iter().position(|&p| p == pack) {
            if pos != 0 {
                self.mru.remove(pos);
                self.mru.insert(0, pack);
            }
        }
    }

    pub fn mark_bad_object(&mut self, pack: PackId, id: ObjectId) {
        if let Some(p) = self.packs.get_mut(pack.0) {
            if !p.bad_objects.contains(&id) {
                warn!(pack = %p.path.display(), %id, "marking packed object as bad");
                p.bad_objects.push(id);
            }
        }
    }

    pub fn get(&self, pack: PackId) -> Option<&Pack> {
        self.packs.get(pack.0)
    }

    pub fn len(&self) -> usize {
        self.packs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }

    /// Sum of the object counts of all packs. Duplicates across packs are
    /// counted once per pack.
    pub fn object_count(&self) -> u64 {
        self.packs.iter().map(|p| p.object_count() as u64).sum()
    }

    /// Whether any usable entry for `id` exists.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.packs.iter().any(|p| p.has_usable(id))
    }

    /// Find `id`, reading its content when `want_content` is set.
    ///
    /// Entries that fail to read are marked bad and skipped. The pack that
    /// answers moves to the front of the search order.
    pub fn find(&mut self, id: &ObjectId, want_content: bool) -> StoreResult<PackLookup> {
        self.ensure_ready();
        let mut corruption = None;
        let mut hit = None;
        let mut failed = Vec::new();

        for (pack_id, pack) in self.packs_in_search_order() {
            if !pack.has_usable(id) {
                continue;
            }
            match read_entry(pack.reader(), id, want_content) {
                Ok(Some((header, object))) => {
                    hit = Some((pack_id, header, object));
                    break;
                }
                Ok(None) => {}
                Err(e) if e.is_corruption() => {
                    failed.push(pack_id);
                    corruption.get_or_insert(e);
                }
                Err(e) => return Err(StoreError::Pack(e)),
            }
        }

        for pack_id in failed {
            self.mark_bad_object(pack_id, *id);
        }
        match hit {
            Some((pack, header, object)) => {
                self.note_pack_hit(pack);
                Ok(PackLookup::Found {
                    pack,
                    header,
                    object,
                })
            }
            None => Ok(PackLookup::NotFound { corruption }),
        }
    }

    /// Forget all packs. The next use rescans.
    pub fn clear(&mut self) {
        self.packs.clear();
        self.mru.clear();
        self.state = Lifecycle::Uninitialized;
    }
}

type Entry = (PackedObjectHeader, Option<PackedObject>);

fn read_entry(
    reader: &PackReader,
    id: &ObjectId,
    want_content: bool,
) -> Result<Option<Entry>, PackError> {
    let header = match reader.read_header(id)? {
        Some(h) => h,
        None => return Ok(None),
    };
    let object = if want_content {
        match reader.read_object(id)? {
            Some(obj) => Some(obj),
            None => return Ok(None),
        }
    } else {
        None
    };
    Ok(Some((header, object)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use odb_pack::PackWriter;
    use odb_types::{HashAlgorithm, ObjectKind};

    const ALGO: HashAlgorithm = HashAlgorithm::Sha1;

    fn write_pack(objdir: &Path, name: &str, blobs: &[&[u8]]) -> Vec<ObjectId> {
        let dir = objdir.join("pack");
        fs::create_dir_all(&dir).unwrap();
        let mut writer = PackWriter::new(&dir.join(name), ALGO);
        let ids = blobs.iter().map(|b| writer.add(ObjectKind::Blob, b)).collect();
        writer.finish().unwrap();
        ids
    }

    fn order(list: &PackList) -> Vec<String> {
        list.packs_in_search_order()
            .map(|(_, p)| p.path().file_stem().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn lazy_scan() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(dir.path(), "pack-a", &[b"one"]);
        let mut list = PackList::new(dir.path(), true);
        assert_eq!(list.state(), Lifecycle::Uninitialized);
        assert!(list.is_empty());
        list.ensure_ready();
        assert_eq!(list.state(), Lifecycle::Ready);
        assert_eq!(list.len(), 1);
        assert!(list.get(PackId(0)).unwrap().is_local());
    }

    #[test]
    fn missing_pack_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut list = PackList::new(&dir.path().join("nowhere"), false);
        list.ensure_ready();
        assert!(list.is_empty());
    }

    #[test]
    fn pack_without_index_or_unreadable_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(dir.path(), "pack-good", &[b"g"]);
        let pack_dir = dir.path().join("pack");
        fs::write(pack_dir.join("pack-noidx.pack"), b"ODBP").unwrap();
        fs::write(pack_dir.join("pack-junk.pack"), b"junk").unwrap();
        fs::write(pack_dir.join("pack-junk.idx"), b"junk").unwrap();

        let mut list = PackList::new(dir.path(), true);
        list.ensure_ready();
        assert_eq!(order(&list), vec!["pack-good"]);
    }

    #[test]
    fn keep_and_promisor_flags() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(dir.path(), "pack-k", &[b"k"]);
        fs::write(dir.path().join("pack/pack-k.keep"), b"").unwrap();
        fs::write(dir.path().join("pack/pack-k.promisor"), b"").unwrap();
        let mut list = PackList::new(dir.path(), false);
        list.ensure_ready();
        let pack = list.get(PackId(0)).unwrap();
        assert!(pack.is_keep());
        assert!(pack.is_promisor());
        assert!(!pack.is_local());
    }

    #[test]
    fn hit_moves_pack_to_front() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(dir.path(), "pack-a", &[b"a"]);
        let ids_b = write_pack(dir.path(), "pack-b", &[b"b"]);
        write_pack(dir.path(), "pack-c", &[b"c"]);

        let mut list = PackList::new(dir.path(), true);
        list.ensure_ready();
        assert_eq!(order(&list), vec!["pack-a", "pack-b", "pack-c"]);

        match list.find(&ids_b[0], true).unwrap() {
            PackLookup::Found { object, header, .. } => {
                assert_eq!(object.unwrap().data, b"b");
                assert_eq!(header.size, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(order(&list), vec!["pack-b", "pack-a", "pack-c"]);
    }

    #[test]
    fn distinct_hits_give_most_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_pack(dir.path(), "pack-a", &[b"a"]);
        let b = write_pack(dir.path(), "pack-b", &[b"b"]);
        let c = write_pack(dir.path(), "pack-c", &[b"c"]);

        let mut list = PackList::new(dir.path(), true);
        for id in [&c[0], &a[0], &b[0]] {
            assert!(matches!(list.find(id, false).unwrap(), PackLookup::Found { .. }));
        }
        assert_eq!(order(&list), vec!["pack-b", "pack-a", "pack-c"]);
    }

    #[test]
    fn reprepare_appends_new_packs() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(dir.path(), "pack-b", &[b"b"]);
        let mut list = PackList::new(dir.path(), true);
        list.ensure_ready();

        let ids = write_pack(dir.path(), "pack-a", &[b"late"]);
        assert!(!list.contains(&ids[0]));
        list.reprepare();
        assert_eq!(order(&list), vec!["pack-b", "pack-a"]);
        assert!(list.contains(&ids[0]));
        assert_eq!(list.object_count(), 2);
    }

    #[test]
    fn corrupt_entry_is_marked_bad() {
        let dir = tempfile::tempdir().unwrap();
        let ids = write_pack(dir.path(), "pack-x", &[b"payload that will be damaged"]);
        let pack_path = dir.path().join("pack/pack-x.pack");
        let mut bytes = fs::read(&pack_path).unwrap();
        let last_payload_byte = bytes.len() - 33;
        bytes[last_payload_byte] ^= 0xff;
        fs::write(&pack_path, bytes).unwrap();

        let mut list = PackList::new(dir.path(), true);
        match list.find(&ids[0], true).unwrap() {
            PackLookup::NotFound { corruption } => assert!(corruption.is_some()),
            other => panic!("unexpected {other:?}"),
        }
        assert!(list.get(PackId(0)).unwrap().is_bad(&ids[0]));
        assert!(!list.contains(&ids[0]));
        match list.find(&ids[0], true).unwrap() {
            PackLookup::NotFound { corruption } => assert!(corruption.is_none()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
