//! Filesystem reference store: loose ref files plus a `packed-refs` file.
//!
//! Loose refs live at `<git_dir>/<refname>` and contain either a hex object
//! id or `ref: <target>`. The `packed-refs` file holds `<hex> <refname>`
//! lines; comment lines (`#`) and peeled lines (`^`) are skipped. A loose ref
//! shadows a packed ref of the same name.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use odb_types::HashAlgorithm;
use walkdir::WalkDir;

use crate::error::{RefError, Result};
use crate::names::validate_ref_name;
use crate::traits::RefStore;
use crate::types::Ref;

const PACKED_REFS: &str = "packed-refs";

/// Reference store backed by a repository directory.
#[derive(Clone, Debug)]
pub struct FileRefStore {
    git_dir: PathBuf,
    algorithm: HashAlgorithm,
}

impl FileRefStore {
    /// Create a store rooted at `git_dir`.
    pub fn new(git_dir: impl Into<PathBuf>, algorithm: HashAlgorithm) -> Self {
        Self {
            git_dir: git_dir.into(),
            algorithm,
        }
    }

    /// The repository directory.
    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn loose_path(&self, name: &str) -> PathBuf {
        self.git_dir.join(name)
    }

    fn read_loose(&self, name: &str) -> Result<Option<Ref>> {
        let path = self.loose_path(name);
        if !path.is_file() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        Ref::parse(name, &contents, self.algorithm).map(Some)
    }

    fn read_packed(&self) -> Result<BTreeMap<String, Ref>> {
        let path = self.git_dir.join(PACKED_REFS);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        parse_packed_refs(&contents, self.algorithm)
    }

    fn write_packed(&self, refs: &BTreeMap<String, Ref>) -> Result<()> {
        let mut out = String::from("# pack-refs with: sorted\n");
        for (name, r) in refs {
            if let Ref::Direct(id) = r {
                out.push_str(&format!("{id} {name}\n"));
            }
        }
        write_atomic(&self.git_dir.join(PACKED_REFS), out.as_bytes())
    }

    fn list_loose(&self, prefix: &str) -> Result<Vec<(String, Ref)>> {
        let refs_root = self.git_dir.join("refs");
        if !refs_root.is_dir() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for entry in WalkDir::new(&refs_root).sort_by_file_name() {
            let entry = entry.map_err(|e| RefError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&self.git_dir) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let name = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !name.starts_with(prefix) || name.ends_with(".lock") {
                continue;
            }
            match self.read_loose(&name) {
                Ok(Some(r)) => found.push((name, r)),
                Ok(None) => {}
                Err(RefError::Malformed { name, reason }) => {
                    tracing::warn!(%name, %reason, "ignoring broken ref");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(found)
    }
}

/// Parse the contents of a `packed-refs` file.
pub fn parse_packed_refs(contents: &str, algo: HashAlgorithm) -> Result<BTreeMap<String, Ref>> {
    let mut refs = BTreeMap::new();
    for line in contents.lines() {
        if line.is_empty() || line.starts_with('#') || line.starts_with('^') {
            continue;
        }
        let (hex, name) = line.split_once(' ').ok_or_else(|| RefError::Malformed {
            name: PACKED_REFS.into(),
            reason: format!("unparseable line: {line:?}"),
        })?;
        let r = Ref::parse(name, hex, algo)?;
        refs.insert(name.to_string(), r);
    }
    Ok(refs)
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.persist(path).map_err(|e| RefError::Io(e.error))?;
    Ok(())
}

impl RefStore for FileRefStore {
    fn read_ref(&self, name: &str) -> Result<Option<Ref>> {
        if let Some(r) = self.read_loose(name)? {
            return Ok(Some(r));
        }
        Ok(self.read_packed()?.remove(name))
    }

    fn write_ref(&self, name: &str, reference: &Ref) -> Result<()> {
        validate_ref_name(name)?;
        write_atomic(
            &self.loose_path(name),
            reference.to_file_contents().as_bytes(),
        )
    }

    fn delete_ref(&self, name: &str) -> Result<bool> {
        let mut existed = false;
        let path = self.loose_path(name);
        if path.is_file() {
            fs::remove_file(&path)?;
            existed = true;
        }
        let mut packed = self.read_packed()?;
        if packed.remove(name).is_some() {
            self.write_packed(&packed)?;
            existed = true;
        }
        Ok(existed)
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<(String, Ref)>> {
        let mut merged: BTreeMap<String, Ref> = self
            .read_packed()?
            .into_iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .collect();
        for (name, r) in self.list_loose(prefix)? {
            merged.insert(name, r);
        }
        Ok(merged.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odb_types::{ObjectId, ObjectKind};

    fn id(seed: &[u8]) -> ObjectId {
        HashAlgorithm::Sha1.hash_object(ObjectKind::Blob, seed)
    }

    fn store() -> (tempfile::TempDir, FileRefStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRefStore::new(dir.path(), HashAlgorithm::Sha1);
        (dir, store)
    }

    #[test]
    fn loose_write_and_read() {
        let (dir, store) = store();
        store.write_ref("refs/heads/main", &Ref::Direct(id(b"a"))).unwrap();
        let on_disk = fs::read_to_string(dir.path().join("refs/heads/main")).unwrap();
        assert_eq!(on_disk, format!("{}\n", id(b"a")));
        assert_eq!(
            store.read_ref("refs/heads/main").unwrap(),
            Some(Ref::Direct(id(b"a")))
        );
    }

    #[test]
    fn packed_refs_are_read_and_shadowed() {
        let (dir, store) = store();
        let packed = format!(
            "# pack-refs with: peeled\n{} refs/tags/v1\n^{}\n{} refs/heads/main\n",
            id(b"tag"),
            id(b"peeled"),
            id(b"old-main")
        );
        fs::write(dir.path().join(PACKED_REFS), packed).unwrap();
        store.write_ref("refs/heads/main", &Ref::Direct(id(b"new-main"))).unwrap();

        assert_eq!(store.resolve("refs/tags/v1").unwrap(), Some(id(b"tag")));
        assert_eq!(store.resolve("refs/heads/main").unwrap(), Some(id(b"new-main")));

        let all = store.list_refs("refs/").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, "refs/heads/main");
        assert_eq!(all[0].1, Ref::Direct(id(b"new-main")));
    }

    #[test]
    fn list_nested_refs_by_prefix() {
        let (_dir, store) = store();
        store.write_ref("refs/replace/aa", &Ref::Direct(id(b"1"))).unwrap();
        store.write_ref("refs/replace/sub/bb", &Ref::Direct(id(b"2"))).unwrap();
        store.write_ref("refs/heads/main", &Ref::Direct(id(b"3"))).unwrap();

        let names: Vec<_> = store
            .list_refs("refs/replace/")
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["refs/replace/aa", "refs/replace/sub/bb"]);
    }

    #[test]
    fn broken_loose_refs_are_skipped_when_listing() {
        let (dir, store) = store();
        fs::create_dir_all(dir.path().join("refs/replace")).unwrap();
        fs::write(dir.path().join("refs/replace/junk"), "not a hash\n").unwrap();
        store.write_ref("refs/replace/ok", &Ref::Direct(id(b"ok"))).unwrap();
        assert_eq!(store.list_refs("refs/replace/").unwrap().len(), 1);
    }

    #[test]
    fn delete_removes_loose_and_packed() {
        let (dir, store) = store();
        fs::write(
            dir.path().join(PACKED_REFS),
            format!("{} refs/tags/v1\n", id(b"t")),
        )
        .unwrap();
        store.write_ref("refs/tags/v1", &Ref::Direct(id(b"loose"))).unwrap();

        assert!(store.delete_ref("refs/tags/v1").unwrap());
        assert!(store.read_ref("refs/tags/v1").unwrap().is_none());
        assert!(!store.delete_ref("refs/tags/v1").unwrap());
    }

    #[test]
    fn symbolic_head() {
        let (_dir, store) = store();
        store.write_ref("refs/heads/main", &Ref::Direct(id(b"m"))).unwrap();
        store.write_ref("HEAD", &Ref::Symbolic("refs/heads/main".into())).unwrap();
        assert_eq!(store.resolve("HEAD").unwrap(), Some(id(b"m")));
    }

    #[test]
    fn malformed_packed_line_is_an_error() {
        let err = parse_packed_refs("garbage\n", HashAlgorithm::Sha1).unwrap_err();
        assert!(matches!(err, RefError::Malformed { .. }));
    }
}
