//! Command profile persistence
//!
//! Profiles are stored one record per profile, keyed by a sanitized form of
//! the profile name. Every value returned by [`ProfileStore`] is a detached
//! copy: edit it, then [`ProfileStore::save`] it back (last writer wins).

mod model;
mod records;

pub use model::{CatalogError, CommandItem, Profile, Sections};
pub use records::{FsRecords, RecordStore};

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

/// Key used when a name sanitizes to nothing
pub const FALLBACK_KEY: &str = "profile";

/// Name of the profile seeded into an empty store
pub const DEFAULT_PROFILE: &str = "Default";

/// Profile store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backing storage could not be read or written
    #[error("Profile storage unavailable ({path}): {source}")]
    IoUnavailable {
        /// Record or directory involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Record exists but does not match the profile schema
    #[error("Malformed profile record {path}: {detail}")]
    MalformedRecord {
        /// Record involved
        path: PathBuf,
        /// Parse failure
        detail: String,
    },

    /// A profile with this name is already listed
    #[error("Profile already exists: {0}")]
    ProfileExists(String),

    /// No record is listed under this name
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// Catalog edit rejected
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Result of a rename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameOutcome {
    /// The profile as saved under its new name
    pub profile: Profile,
    /// Old record left behind because it could not be deleted
    pub stale_record: Option<PathBuf>,
}

/// Map a profile name to its storage key.
///
/// Keeps alphanumerics, `-`, `_` and spaces, then trims. Distinct names can
/// collide (`"Test!"` and `"Test?"` both map to `"Test"`).
pub fn sanitize_key(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ' '))
        .collect();
    let key = kept.trim();
    if key.is_empty() {
        FALLBACK_KEY.to_string()
    } else {
        key.to_string()
    }
}

#[derive(Deserialize)]
struct RawProfile {
    #[serde(default)]
    sections: indexmap::IndexMap<String, Vec<Value>>,
}

/// Accepts `{label, text}` objects and legacy bare entries
fn coerce_command(entry: Value) -> CommandItem {
    fn field(map: &serde_json::Map<String, Value>, name: &str) -> String {
        match map.get(name) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    match entry {
        Value::Object(map) => CommandItem::new(field(&map, "label"), field(&map, "text")),
        Value::String(s) => CommandItem::new(s.clone(), s),
        other => {
            let s = other.to_string();
            CommandItem::new(s.clone(), s)
        }
    }
}

/// Parse a stored record. The requested `name` wins over any stored name.
pub fn parse_record(name: &str, contents: &str) -> Result<Profile, serde_json::Error> {
    let raw: RawProfile = serde_json::from_str(contents)?;
    let sections = raw
        .sections
        .into_iter()
        .map(|(section, entries)| (section, entries.into_iter().map(coerce_command).collect()))
        .collect();
    Ok(Profile {
        name: name.to_string(),
        sections,
    })
}

/// Repository of command profiles
pub struct ProfileStore<R: RecordStore = FsRecords> {
    records: R,
    /// Keys whose record outlived a rename; hidden from the API
    retired: Mutex<HashSet<String>>,
}

impl ProfileStore<FsRecords> {
    /// Store profiles as JSON files in `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self::with_records(FsRecords::new(dir))
    }

    /// Store profiles in the platform profile directory
    pub fn open_default() -> Self {
        Self::open(crate::config::profiles_dir())
    }
}

impl<R: RecordStore> ProfileStore<R> {
    /// Build a store over any record backend
    pub fn with_records(records: R) -> Self {
        Self {
            records,
            retired: Mutex::new(HashSet::new()),
        }
    }

    /// Record backend
    pub fn records(&self) -> &R {
        &self.records
    }

    fn io_error(&self, key: &str, source: std::io::Error) -> StoreError {
        StoreError::IoUnavailable {
            path: self.records.location(key),
            source,
        }
    }

    /// Profile names, case-insensitively sorted
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let keys = self.records.keys().map_err(|e| self.io_error("", e))?;
        let retired = self.retired.lock();
        let mut names: Vec<String> = keys.into_iter().filter(|k| !retired.contains(k)).collect();
        names.sort_by_key(|n| n.to_lowercase());
        names.dedup();
        Ok(names)
    }

    /// True when `name` resolves to a listed record
    pub fn exists(&self, name: &str) -> Result<bool, StoreError> {
        let key = sanitize_key(name);
        Ok(self.list()?.contains(&key))
    }

    /// Load a profile. A missing record yields an empty profile.
    pub fn load(&self, name: &str) -> Result<Profile, StoreError> {
        let key = sanitize_key(name);
        if self.retired.lock().contains(&key) {
            return Ok(Profile::new(name));
        }
        let Some(contents) = self.records.read(&key).map_err(|e| self.io_error(&key, e))? else {
            return Ok(Profile::new(name));
        };
        parse_record(name, &contents).map_err(|e| StoreError::MalformedRecord {
            path: self.records.location(&key),
            detail: e.to_string(),
        })
    }

    /// Overwrite the record for `profile.name`
    pub fn save(&self, profile: &Profile) -> Result<(), StoreError> {
        let key = sanitize_key(&profile.name);
        let contents = serde_json::to_string_pretty(profile).map_err(|e| StoreError::MalformedRecord {
            path: self.records.location(&key),
            detail: e.to_string(),
        })?;
        self.records
            .write(&key, &contents)
            .map_err(|e| self.io_error(&key, e))?;
        self.retired.lock().remove(&key);
        tracing::debug!("Saved profile '{}' ({} sections)", profile.name, profile.sections.len());
        Ok(())
    }

    /// Load, edit and save a profile in one step
    pub fn update<F>(&self, name: &str, edit: F) -> Result<Profile, StoreError>
    where
        F: FnOnce(&mut Profile) -> Result<(), CatalogError>,
    {
        let mut profile = self.load(name)?;
        edit(&mut profile)?;
        self.save(&profile)?;
        Ok(profile)
    }

    /// Create a new empty profile
    pub fn create(&self, name: &str) -> Result<Profile, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CatalogError::EmptyName.into());
        }
        if self.list()?.iter().any(|n| n == name) {
            return Err(StoreError::ProfileExists(name.to_string()));
        }
        let profile = Profile::new(name);
        self.save(&profile)?;
        tracing::info!("Created profile '{}'", name);
        Ok(profile)
    }

    /// Rename a profile: save under the new key, then delete the old record.
    ///
    /// The rename succeeds once the new record is written. If the old record
    /// cannot be deleted it is hidden from [`list`](Self::list) and reported
    /// in [`RenameOutcome::stale_record`].
    pub fn rename(&self, old: &str, new: &str) -> Result<RenameOutcome, StoreError> {
        let new = new.trim();
        if new.is_empty() {
            return Err(CatalogError::EmptyName.into());
        }
        if !self.exists(old)? {
            return Err(StoreError::ProfileNotFound(old.to_string()));
        }
        let mut profile = self.load(old)?;
        if new == old {
            return Ok(RenameOutcome {
                profile,
                stale_record: None,
            });
        }
        if self.list()?.iter().any(|n| n == new) {
            return Err(StoreError::ProfileExists(new.to_string()));
        }

        profile.name = new.to_string();
        self.save(&profile)?;

        let old_key = sanitize_key(old);
        if old_key == sanitize_key(new) {
            return Ok(RenameOutcome {
                profile,
                stale_record: None,
            });
        }

        let stale_record = match self.records.remove(&old_key) {
            Ok(()) => None,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                let path = self.records.location(&old_key);
                tracing::warn!("Renamed '{}' to '{}' but could not delete {}: {}", old, new, path.display(), e);
                self.retired.lock().insert(old_key);
                Some(path)
            }
        };
        tracing::info!("Renamed profile '{}' to '{}'", old, new);
        Ok(RenameOutcome { profile, stale_record })
    }

    /// Delete a profile record
    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        let key = sanitize_key(name);
        let was_retired = self.retired.lock().remove(&key);
        match self.records.remove(&key) {
            Ok(()) => {}
            Err(e) if was_retired && e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                if was_retired {
                    self.retired.lock().insert(key.clone());
                }
                return Err(self.io_error(&key, e));
            }
        }
        tracing::info!("Deleted profile '{}'", name);
        Ok(())
    }

    /// Seed the default profile when the store is empty; returns the listing
    pub fn ensure_default(&self) -> Result<Vec<String>, StoreError> {
        let names = self.list()?;
        if !names.is_empty() {
            return Ok(names);
        }
        let profile = Profile::new(DEFAULT_PROFILE).with_section(
            "Quick",
            vec![CommandItem::new("AT", "AT"), CommandItem::new("Reset", "reset")],
        );
        self.save(&profile)?;
        tracing::info!("Seeded default profile");
        self.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("My/Profile!"), "MyProfile");
        assert_eq!(sanitize_key("***"), FALLBACK_KEY);
        assert_eq!(sanitize_key("  lab bench-2_a  "), "lab bench-2_a");
        assert_eq!(sanitize_key("Test!"), sanitize_key("Test?"));
    }

    #[test]
    fn test_parse_record_legacy_entries() {
        let json = r#"{
            "name": "Stored name",
            "sections": {
                "Old": ["AT", "ATI"],
                "New": [{"label": "Ver", "text": "ver"}, {"text": "x"}],
                "Empty": []
            }
        }"#;
        let p = parse_record("Bench", json).unwrap();
        assert_eq!(p.name, "Bench");
        assert_eq!(p.commands("Old").unwrap()[1], CommandItem::new("ATI", "ATI"));
        assert_eq!(p.commands("New").unwrap()[0], CommandItem::new("Ver", "ver"));
        assert_eq!(p.commands("New").unwrap()[1], CommandItem::new("", "x"));
        assert!(p.commands("Empty").unwrap().is_empty());
        let order: Vec<_> = p.section_names().collect();
        assert_eq!(order, ["Old", "New", "Empty"]);
    }

    #[test]
    fn test_parse_record_rejects_bad_schema() {
        assert!(parse_record("x", "not json").is_err());
        assert!(parse_record("x", r#"{"sections": {"A": "AT"}}"#).is_err());
        assert!(parse_record("x", "42").is_err());
        assert!(parse_record("x", "{}").unwrap().sections.is_empty());
    }
}
