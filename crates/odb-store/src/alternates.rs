//! Alternate object directories.
//!
//! A repository may borrow objects from other object directories listed in
//! `<objdir>/info/alternates`, one path per line. Alternates can list their
//! own alternates; the resolver follows them recursively and keeps each
//! distinct directory once, so mutually-referencing alternates terminate.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use odb_types::{HashAlgorithm, ObjectId};
use tracing::{debug, warn};

use crate::error::StoreResult;
use crate::loose::{for_each_file_in_subdir, LooseEntry};
use crate::packs::{Lifecycle, PackList};

/// Path of the alternates file relative to an object directory.
pub const ALTERNATES_FILE: &str = "info/alternates";

/// Paths listed in an alternates file: blank lines and `#` comments are skipped.
pub fn parse_alternates(contents: &str) -> impl Iterator<Item = &str> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// One alternate object directory.
#[derive(Debug)]
pub struct AlternateOdb {
    path: PathBuf,
    scratch: PathBuf,
    loose_subdir_seen: [u64; 4],
    loose_cache: Vec<ObjectId>,
    packs: PackList,
}

impl AlternateOdb {
    fn new(path: PathBuf) -> Self {
        Self {
            packs: PackList::new(&path, false),
            scratch: PathBuf::new(),
            loose_subdir_seen: [0; 4],
            loose_cache: Vec::new(),
            path,
        }
    }

    /// Canonical path of the object directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A reusable buffer preset to the directory path, for building object paths.
    pub fn scratch_buf(&mut self) -> &mut PathBuf {
        self.scratch.clear();
        self.scratch.push(&self.path);
        &mut self.scratch
    }

    /// Path of the loose file for `id`, built in the scratch buffer.
    pub fn loose_object_path(&mut self, id: &ObjectId) -> &Path {
        let (dir, file) = id.loose_path_parts();
        let buf = self.scratch_buf();
        buf.push(dir);
        buf.push(file);
        buf
    }

    pub fn packs(&self) -> &PackList {
        &self.packs
    }

    pub fn packs_mut(&mut self) -> &mut PackList {
        &mut self.packs
    }

    fn subdir_seen(&self, subdir: u8) -> bool {
        self.loose_subdir_seen[(subdir >> 6) as usize] & (1 << (subdir & 63)) != 0
    }

    /// Loose ids in fan-out directory `subdir`, scanning it on first request.
    ///
    /// The cache is not invalidated when objects are added afterwards.
    pub fn loose_cache(&mut self, subdir: u8, algo: HashAlgorithm) -> StoreResult<&[ObjectId]> {
        if !self.subdir_seen(subdir) {
            let cache = &mut self.loose_cache;
            for_each_file_in_subdir(&self.path, subdir, algo, |entry| {
                if let LooseEntry::Object(id) = entry {
                    cache.push(id);
                }
            })?;
            self.loose_cache.sort();
            self.loose_subdir_seen[(subdir >> 6) as usize] |= 1 << (subdir & 63);
        }
        let start = self.loose_cache.partition_point(|id| id.first_byte() < subdir);
        let end = self.loose_cache.partition_point(|id| id.first_byte() <= subdir);
        Ok(&self.loose_cache[start..end])
    }

    /// Drop the loose-object cache.
    pub fn clear_loose_cache(&mut self) {
        self.loose_cache.clear();
        self.loose_subdir_seen = [0; 4];
    }
}

/// The chain of alternates reachable from a local object directory.
#[derive(Debug)]
pub struct Alternates {
    objdir: PathBuf,
    local_canonical: PathBuf,
    extra: Vec<PathBuf>,
    state: Lifecycle,
    chain: Vec<AlternateOdb>,
}

impl Alternates {
    /// A resolver for `objdir`. `extra` entries are linked after the
    /// alternates file, relative to the working directory.
    pub fn new(objdir: &Path, extra: Vec<PathBuf>) -> Self {
        Self {
            local_canonical: fs::canonicalize(objdir).unwrap_or_else(|_| objdir.to_path_buf()),
            objdir: objdir.to_path_buf(),
            extra,
            state: Lifecycle::Uninitialized,
            chain: Vec::new(),
        }
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    /// Read the alternates file and configured extras on first use.
    pub fn ensure_ready(&mut self) {
        if self.state == Lifecycle::Ready {
            return;
        }
        self.state = Lifecycle::Ready;
        let objdir = self.objdir.clone();
        self.read_alternates_file(&objdir);
        let extra = self.extra.clone();
        self.expand(&extra);
        debug!(count = self.chain.len(), "alternates prepared");
    }

    /// Link each of `dirs`, then everything they reference, and return the
    /// whole chain. Duplicates and unusable directories are skipped.
    pub fn expand<P: AsRef<Path>>(&mut self, dirs: &[P]) -> &[AlternateOdb] {
        for dir in dirs {
            self.link(dir.as_ref(), None);
        }
        &self.chain
    }

    /// Alternates in link order.
    pub fn iter(&self) -> impl Iterator<Item = &AlternateOdb> {
        self.chain.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut AlternateOdb> {
        self.chain.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    fn read_alternates_file(&mut self, objdir: &Path) {
        let path = objdir.join(ALTERNATES_FILE);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "unable to read alternates file");
                return;
            }
        };
        for line in parse_alternates(&contents) {
            self.link(Path::new(line), Some(objdir));
        }
    }

    /// Add one directory to the chain, then its own alternates.
    ///
    /// Relative entries resolve against `relative_to` when given. Returns
    /// whether the directory was added.
    fn link(&mut self, entry: &Path, relative_to: Option<&Path>) -> bool {
        let joined = match relative_to {
            Some(base) if entry.is_relative() => base.join(entry),
            _ => entry.to_path_buf(),
        };
        let canonical = match fs::canonicalize(&joined) {
            Ok(path) if path.is_dir() => path,
            Ok(path) => {
                warn!(path = %path.display(), "object directory is not a directory, skipping");
                return false;
            }
            Err(e) => {
                warn!(
                    path = %joined.display(),
                    error = %e,
                    "object directory does not exist, skipping"
                );
                return false;
            }
        };
        if canonical == self.local_canonical || self.chain.iter().any(|a| a.path == canonical) {
            debug!(path = %canonical.display(), "ignoring duplicate alternate");
            return false;
        }
        debug!(path = %canonical.display(), "linked alternate");
        self.chain.push(AlternateOdb::new(canonical.clone()));
        self.read_alternates_file(&canonical);
        true
    }

    /// Link `dir` into the in-memory chain for this process only.
    pub fn add_to_alternates_memory(&mut self, dir: &Path) -> bool {
        self.ensure_ready();
        self.link(dir, None)
    }

    /// Append `dir` to the alternates file.
    ///
    /// The file is rewritten atomically. If the chain has already been
    /// prepared the new entry is linked in memory too.
    pub fn add_to_alternates_file(&mut self, dir: &Path) -> StoreResult<()> {
        let path = self.objdir.join(ALTERNATES_FILE);
        let existing = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let line = dir.to_string_lossy();
        if parse_alternates(&existing).any(|l| l == line) {
            return Ok(());
        }

        let parent = path.parent().unwrap_or(&self.objdir);
        fs::create_dir_all(parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(existing.as_bytes())?;
        if !existing.is_empty() && !existing.ends_with('\n') {
            tmp.write_all(b"\n")?;
        }
        writeln!(tmp, "{line}")?;
        tmp.persist(&path).map_err(|e| e.error)?;

        if self.state == Lifecycle::Ready {
            let objdir = self.objdir.clone();
            self.link(dir, Some(&objdir));
        }
        Ok(())
    }

    /// Forget the chain. The next use re-reads the alternates file.
    pub fn clear(&mut self) {
        self.chain.clear();
        self.state = Lifecycle::Uninitialized;
    }
}
