//! Named sets of interface → address mappings

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{SpoofError, SpoofResult};
use crate::history::write_json_atomic;
use crate::mac::MacAddress;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileEntry {
    pub interface: String,
    pub mac: MacAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub entries: Vec<ProfileEntry>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(name: impl Into<String>, entries: Vec<ProfileEntry>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: String::new(),
            entries,
            tags: Vec::new(),
            created_at: now,
            modified_at: now,
        }
    }

    /// Mappings in stored order, ready for `spoof_batch`
    pub fn mappings(&self) -> Vec<(String, MacAddress)> {
        self.entries
            .iter()
            .map(|e| (e.interface.clone(), e.mac))
            .collect()
    }

    fn validate(&self) -> SpoofResult<()> {
        if self.name.trim().is_empty() {
            return Err(SpoofError::InvalidInput("profile name is empty".to_string()));
        }
        if self.entries.is_empty() {
            return Err(SpoofError::InvalidInput(format!(
                "profile {} has no entries",
                self.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for entry in &self.entries {
            if !seen.insert(entry.interface.as_str()) {
                return Err(SpoofError::InvalidInput(format!(
                    "profile {} lists {} more than once",
                    self.name, entry.interface
                )));
            }
        }
        Ok(())
    }
}

/// Profiles persisted as a JSON array
#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
    max_profiles: usize,
    write_lock: Mutex<()>,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>, max_profiles: usize) -> Self {
        Self {
            path: path.into(),
            max_profiles,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> SpoofResult<Vec<Profile>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(Vec::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Create or replace by name. A replaced profile keeps its creation time.
    pub fn save(&self, mut profile: Profile) -> SpoofResult<Profile> {
        profile.validate()?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut profiles = self.load()?;

        profile.modified_at = Utc::now();
        match profiles.iter_mut().find(|p| p.name == profile.name) {
            Some(existing) => {
                profile.created_at = existing.created_at;
                *existing = profile.clone();
            }
            None => {
                if profiles.len() >= self.max_profiles {
                    return Err(SpoofError::InvalidInput(format!(
                        "profile limit of {} reached",
                        self.max_profiles
                    )));
                }
                profiles.push(profile.clone());
            }
        }

        write_json_atomic(&self.path, &profiles)?;
        info!(profile = %profile.name, entries = profile.entries.len(), "profile saved");
        Ok(profile)
    }

    pub fn get(&self, name: &str) -> SpoofResult<Option<Profile>> {
        Ok(self.load()?.into_iter().find(|p| p.name == name))
    }

    pub fn list(&self) -> SpoofResult<Vec<Profile>> {
        let mut profiles = self.load()?;
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(profiles)
    }

    pub fn delete(&self, name: &str) -> SpoofResult<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut profiles = self.load()?;
        let before = profiles.len();
        profiles.retain(|p| p.name != name);
        if profiles.len() == before {
            return Ok(false);
        }
        write_json_atomic(&self.path, &profiles)?;
        Ok(true)
    }

    /// Copy `source` under a new name. Fails if `dest` already exists.
    pub fn clone_profile(&self, source: &str, dest: &str) -> SpoofResult<Profile> {
        let original = self.get(source)?.ok_or_else(|| missing(source))?;
        let mut copy = Profile::new(dest, original.entries);
        copy.description = format!("Clone of {}", source);
        copy.tags = original.tags;
        self.insert_new(copy)
    }

    /// Write one profile to `path` as a JSON object
    pub fn export(&self, name: &str, path: &Path) -> SpoofResult<()> {
        let profile = self.get(name)?.ok_or_else(|| missing(name))?;
        write_json_atomic(path, &profile)?;
        info!(profile = %name, path = %path.display(), "profile exported");
        Ok(())
    }

    /// Add a profile from an exported file, optionally renaming it.
    /// An existing profile of the same name is never overwritten.
    pub fn import(&self, path: &Path, name: Option<&str>) -> SpoofResult<Profile> {
        let text = std::fs::read_to_string(path)?;
        let mut profile: Profile = serde_json::from_str(&text)?;
        if let Some(name) = name {
            profile.name = name.to_string();
        }
        self.insert_new(profile)
    }

    fn insert_new(&self, mut profile: Profile) -> SpoofResult<Profile> {
        profile.validate()?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut profiles = self.load()?;
        if profiles.iter().any(|p| p.name == profile.name) {
            return Err(SpoofError::InvalidInput(format!(
                "profile {} already exists",
                profile.name
            )));
        }
        if profiles.len() >= self.max_profiles {
            return Err(SpoofError::InvalidInput(format!(
                "profile limit of {} reached",
                self.max_profiles
            )));
        }
        profile.modified_at = Utc::now();
        profiles.push(profile.clone());
        write_json_atomic(&self.path, &profiles)?;
        info!(profile = %profile.name, entries = profile.entries.len(), "profile added");
        Ok(profile)
    }

    /// Case-insensitive match on name, description or tags
    pub fn search(&self, keyword: &str) -> SpoofResult<Vec<Profile>> {
        let keyword = keyword.to_lowercase();
        Ok(self
            .list()?
            .into_iter()
            .filter(|p| {
                p.name.to_lowercase().contains(&keyword)
                    || p.description.to_lowercase().contains(&keyword)
                    || p.tags.iter().any(|t| t.to_lowercase().contains(&keyword))
            })
            .collect())
    }
}

fn missing(name: &str) -> SpoofError {
    SpoofError::InvalidInput(format!("no profile named '{}'", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(interface: &str, mac: &str) -> ProfileEntry {
        ProfileEntry {
            interface: interface.into(),
            mac: mac.parse().unwrap(),
        }
    }

    fn temp_store(max: usize) -> (tempfile::TempDir, ProfileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profiles.json"), max);
        (dir, store)
    }

    #[test]
    fn test_save_get_replace() {
        let (_dir, store) = temp_store(10);
        let saved = store
            .save(Profile::new("lab", vec![entry("eth0", "02:00:00:00:00:01")]))
            .unwrap();

        let mut updated = Profile::new("lab", vec![entry("eth0", "02:00:00:00:00:02")]);
        updated.description = "second".into();
        let replaced = store.save(updated).unwrap();

        assert_eq!(replaced.created_at, saved.created_at);
        let loaded = store.get("lab").unwrap().unwrap();
        assert_eq!(loaded.entries[0].mac.to_string(), "02:00:00:00:00:02");
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_limit_and_validation() {
        let (_dir, store) = temp_store(1);
        store
            .save(Profile::new("a", vec![entry("eth0", "02:00:00:00:00:01")]))
            .unwrap();
        assert!(store
            .save(Profile::new("b", vec![entry("eth0", "02:00:00:00:00:01")]))
            .is_err());
        assert!(store.save(Profile::new("c", vec![])).is_err());

        let (_other, store) = temp_store(10);
        let dup = Profile::new(
            "dup",
            vec![entry("eth0", "02:00:00:00:00:01"), entry("eth0", "02:00:00:00:00:02")],
        );
        assert!(matches!(store.save(dup), Err(SpoofError::InvalidInput(_))));
    }

    #[test]
    fn test_delete_and_search() {
        let (_dir, store) = temp_store(10);
        let mut home = Profile::new("home", vec![entry("wlan0", "3c:97:0e:00:00:01")]);
        home.tags = vec!["wifi".into()];
        store.save(home).unwrap();
        store
            .save(Profile::new("office", vec![entry("eth0", "00:1b:21:00:00:01")]))
            .unwrap();

        assert_eq!(store.search("WIFI").unwrap().len(), 1);
        assert!(store.delete("home").unwrap());
        assert!(!store.delete("home").unwrap());
        assert_eq!(store.list().unwrap()[0].name, "office");
    }

    #[test]
    fn test_clone_copies_entries_and_tags() {
        let (_dir, store) = temp_store(10);
        let mut home = Profile::new("home", vec![entry("wlan0", "3c:97:0e:00:00:01")]);
        home.tags = vec!["wifi".into()];
        store.save(home).unwrap();

        let copy = store.clone_profile("home", "home-2").unwrap();
        assert_eq!(copy.description, "Clone of home");
        assert_eq!(copy.tags, vec!["wifi".to_string()]);
        assert_eq!(copy.entries, store.get("home").unwrap().unwrap().entries);

        assert!(store.clone_profile("missing", "x").is_err());
        assert!(store.get("x").unwrap().is_none());
        assert!(matches!(
            store.clone_profile("home", "home-2"),
            Err(SpoofError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_export_import_between_stores() {
        let (dir, store) = temp_store(10);
        store
            .save(Profile::new("lab", vec![entry("eth0", "02:00:00:00:00:01")]))
            .unwrap();
        let file = dir.path().join("lab.json");
        store.export("lab", &file).unwrap();
        assert!(store.export("missing", &file).is_err());

        assert!(store.import(&file, None).is_err());
        let renamed = store.import(&file, Some("lab-copy")).unwrap();
        assert_eq!(renamed.entries[0].mac.to_string(), "02:00:00:00:00:01");

        let (_other, fresh) = temp_store(1);
        fresh.import(&file, None).unwrap();
        assert!(fresh.import(&file, Some("again")).is_err());
        assert_eq!(fresh.list().unwrap()[0].name, "lab");
    }

    #[test]
    fn test_mappings_keep_order() {
        let profile = Profile::new(
            "p",
            vec![entry("wlan0", "02:00:00:00:00:02"), entry("eth0", "02:00:00:00:00:01")],
        );
        let names: Vec<String> = profile.mappings().into_iter().map(|(i, _)| i).collect();
        assert_eq!(names, vec!["wlan0", "eth0"]);
    }
}
