//! Key-value record storage backing the profile store
//!
//! One record per key. The file backend keeps each record as `<key>.json`
//! inside a single directory.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

const RECORD_EXTENSION: &str = "json";

/// Storage namespace for profile records
pub trait RecordStore: Send + Sync {
    /// All keys currently stored. A missing namespace is an empty one.
    fn keys(&self) -> io::Result<Vec<String>>;

    /// Record contents, `None` if absent
    fn read(&self, key: &str) -> io::Result<Option<String>>;

    /// Replace the record for `key` with `contents` in one step
    fn write(&self, key: &str, contents: &str) -> io::Result<()>;

    /// Remove the record for `key`
    fn remove(&self, key: &str) -> io::Result<()>;

    /// Human-readable location of a record, for messages
    fn location(&self, key: &str) -> PathBuf;
}

/// Directory of JSON files, one per key
#[derive(Debug, Clone)]
pub struct FsRecords {
    dir: PathBuf,
}

impl FsRecords {
    /// Use `dir` as the namespace, creating it if possible
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            tracing::warn!("Could not create profile directory {}: {}", dir.display(), e);
        }
        Self { dir }
    }

    /// Backing directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{RECORD_EXTENSION}"))
    }
}

impl RecordStore for FsRecords {
    fn keys(&self) -> io::Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_record = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(RECORD_EXTENSION));
            if !is_record || !path.is_file() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        Ok(keys)
    }

    fn read(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, key: &str, contents: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let target = self.path(key);
        let staging = self.dir.join(format!(".{key}.{RECORD_EXTENSION}.tmp"));
        fs::write(&staging, contents)?;
        if let Err(e) = fs::rename(&staging, &target) {
            let _ = fs::remove_file(&staging);
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        fs::remove_file(self.path(key))
    }

    fn location(&self, key: &str) -> PathBuf {
        self.path(key)
    }
}
