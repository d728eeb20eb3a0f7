//! Store configuration.
//!
//! A [`StoreConfig`] names the repository directory and the knobs that the
//! object store consults lazily: the hash algorithm, whether replacements
//! apply, the ref namespace replacements come from, and extra alternates.
//! It can be loaded from TOML and then adjusted from the environment.

use std::path::{Path, PathBuf};

use odb_types::HashAlgorithm;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Overrides the object directory.
pub const ENV_OBJECT_DIRECTORY: &str = "ODB_OBJECT_DIRECTORY";
/// Colon-separated list of extra alternate object directories.
pub const ENV_ALTERNATE_OBJECT_DIRECTORIES: &str = "ODB_ALTERNATE_OBJECT_DIRECTORIES";
/// When set (to any value), disables replace-object indirection.
pub const ENV_NO_REPLACE_OBJECTS: &str = "ODB_NO_REPLACE_OBJECTS";
/// Overrides the ref namespace replacements are read from.
pub const ENV_REPLACE_REF_BASE: &str = "ODB_REPLACE_REF_BASE";

/// Default namespace for replacement refs.
pub const DEFAULT_REPLACE_REF_BASE: &str = "refs/replace/";

/// Configuration for a [`RepositoryObjectStore`](crate::RepositoryObjectStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Repository directory holding `objects/` and `refs/`.
    pub git_dir: PathBuf,
    /// Object directory; defaults to `<git_dir>/objects`.
    pub object_dir: Option<PathBuf>,
    /// Hash algorithm for object ids.
    pub hash_algorithm: HashAlgorithm,
    /// Whether replacement refs are honored.
    pub replace_objects: bool,
    /// Ref prefix that replacement refs live under.
    pub replace_ref_base: String,
    /// Extra alternate object directories, consulted after `info/alternates`.
    pub alternates: Vec<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            git_dir: PathBuf::from(".git"),
            object_dir: None,
            hash_algorithm: HashAlgorithm::default(),
            replace_objects: true,
            replace_ref_base: DEFAULT_REPLACE_REF_BASE.to_string(),
            alternates: Vec::new(),
        }
    }
}

impl StoreConfig {
    /// Default configuration for the repository at `git_dir`.
    pub fn new(git_dir: impl Into<PathBuf>) -> Self {
        Self {
            git_dir: git_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    pub fn with_replace_objects(mut self, enabled: bool) -> Self {
        self.replace_objects = enabled;
        self
    }

    /// The effective object directory.
    pub fn objects_dir(&self) -> PathBuf {
        self.object_dir
            .clone()
            .unwrap_or_else(|| self.git_dir.join("objects"))
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// Parse a TOML document.
    ///
    /// ```
    /// use odb_store::StoreConfig;
    ///
    /// let config = StoreConfig::from_toml_str(r#"
    ///     git_dir = "/srv/repo.git"
    ///     replace_objects = false
    /// "#).unwrap();
    /// assert!(!config.replace_objects);
    /// assert_eq!(config.replace_ref_base, "refs/replace/");
    /// ```
    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        toml::from_str(s).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Read a TOML config file.
    pub fn from_toml_file(path: &Path) -> StoreResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_OBJECT_DIRECTORY).filter(|v| !v.is_empty()) {
            self.object_dir = Some(PathBuf::from(dir));
        }
        if let Some(list) = lookup(ENV_ALTERNATE_OBJECT_DIRECTORIES) {
            self.alternates.extend(
                list.split(':')
                    .filter(|entry| !entry.is_empty())
                    .map(PathBuf::from),
            );
        }
        if lookup(ENV_NO_REPLACE_OBJECTS).is_some() {
            self.replace_objects = false;
        }
        if let Some(base) = lookup(ENV_REPLACE_REF_BASE).filter(|v| !v.is_empty()) {
            self.replace_ref_base = base;
        }
        self
    }
}
