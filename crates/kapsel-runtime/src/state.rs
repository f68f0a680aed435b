//! Persistent container records.
//!
//! Each container owns `<root>/containers/<id>/config.json`. There is no
//! daemon and no index file: listing walks the directory.

use std::io::ErrorKind;
use std::path::PathBuf;

use kapsel_common::config::RuntimeConfig;
use kapsel_common::error::{KapselError, Result};

use crate::container::ContainerRecord;

/// Reads and writes container records under one root.
#[derive(Debug, Clone)]
pub struct ContainerStore {
    config: RuntimeConfig,
}

impl ContainerStore {
    /// Creates a store over the containers directory of `config`.
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Metadata directory of `id`.
    #[must_use]
    pub fn dir(&self, id: &str) -> PathBuf {
        self.config.container_dir(id)
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.config.container_record(id)
    }

    /// Writes `record`, creating its metadata directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, record: &ContainerRecord) -> Result<()> {
        let dir = self.dir(record.id.as_str());
        std::fs::create_dir_all(&dir).map_err(|e| KapselError::io(&dir, e))?;
        let path = self.record_path(record.id.as_str());
        let json = serde_json::to_string(record)?;
        std::fs::write(&path, json).map_err(|e| KapselError::io(&path, e))?;
        tracing::debug!(id = %record.id, status = %record.status, "container record saved");
        Ok(())
    }

    /// Loads the record of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`KapselError::NotFound`] if there is no such container, or
    /// an error if the record cannot be parsed.
    pub fn load(&self, id: &str) -> Result<ContainerRecord> {
        let path = self.record_path(id);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(KapselError::NotFound {
                kind: "container",
                id: id.to_string(),
            }),
            Err(e) => Err(KapselError::io(&path, e)),
        }
    }

    /// Finds a container by id, falling back to a name match.
    ///
    /// # Errors
    ///
    /// Returns [`KapselError::NotFound`] if neither matches.
    pub fn resolve(&self, id_or_name: &str) -> Result<ContainerRecord> {
        match self.load(id_or_name) {
            Err(KapselError::NotFound { .. }) => self
                .list()?
                .into_iter()
                .find(|r| r.name == id_or_name)
                .ok_or_else(|| KapselError::NotFound {
                    kind: "container",
                    id: id_or_name.to_string(),
                }),
            other => other,
        }
    }

    /// Lists every readable record, oldest first. Unreadable entries are
    /// logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the containers directory exists but cannot be
    /// read.
    pub fn list(&self) -> Result<Vec<ContainerRecord>> {
        let containers_dir = self.config.containers_dir();
        let entries = match std::fs::read_dir(&containers_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(KapselError::io(&containers_dir, e)),
        };

        let mut records = Vec::new();
        for entry in entries.flatten() {
            let id = entry.file_name().to_string_lossy().into_owned();
            match self.load(&id) {
                Ok(record) => records.push(record),
                Err(e) => tracing::error!(id = %id, error = %e, "skipping unreadable container record"),
            }
        }
        records.sort_by(|a, b| {
            a.create_time
                .cmp(&b.create_time)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        Ok(records)
    }

    /// Deletes the metadata directory of `id`, log file included.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn delete(&self, id: &str) -> Result<()> {
        let dir = self.dir(id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(KapselError::io(&dir, e)),
        }
        tracing::debug!(id, "container record deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use kapsel_common::constants::CONFIG_NAME;
    use kapsel_common::types::{ContainerId, ContainerStatus};

    use super::*;

    fn store() -> (tempfile::TempDir, ContainerStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ContainerStore::new(&RuntimeConfig::with_root(dir.path()));
        (dir, store)
    }

    fn record(id: &str, name: Option<&str>) -> ContainerRecord {
        ContainerRecord::running(ContainerId::new(id), name, 100, &["sleep".into(), "60".into()])
    }

    #[test]
    fn save_then_load() {
        let (_dir, store) = store();
        let rec = record("aaa", None);
        store.save(&rec).unwrap();
        assert_eq!(store.load("aaa").unwrap(), rec);
    }

    #[test]
    fn load_missing_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(
            store.load("nope"),
            Err(KapselError::NotFound { kind: "container", .. })
        ));
    }

    #[test]
    fn resolve_by_name() {
        let (_dir, store) = store();
        store.save(&record("aaa", Some("web"))).unwrap();
        assert_eq!(store.resolve("web").unwrap().id.as_str(), "aaa");
        assert_eq!(store.resolve("aaa").unwrap().name, "web");
        assert!(store.resolve("db").is_err());
    }

    #[test]
    fn list_skips_garbage() {
        let (_dir, store) = store();
        let mut first = record("aaa", None);
        first.create_time = "2024-01-01 00:00:00".into();
        let mut second = record("bbb", None);
        second.create_time = "2024-01-02 00:00:00".into();
        second.status = ContainerStatus::Stopped;
        store.save(&second).unwrap();
        store.save(&first).unwrap();

        std::fs::create_dir_all(store.dir("broken")).unwrap();
        std::fs::write(store.dir("broken").join(CONFIG_NAME), "{not json").unwrap();
        std::fs::create_dir_all(store.dir("empty")).unwrap();

        let ids: Vec<_> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(ids, ["aaa", "bbb"]);
    }

    #[test]
    fn list_without_directory_is_empty() {
        let (_dir, store) = store();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn delete_removes_directory_and_is_idempotent() {
        let (_dir, store) = store();
        store.save(&record("aaa", None)).unwrap();
        std::fs::write(store.dir("aaa").join("aaa-json.log"), "hi").unwrap();
        store.delete("aaa").unwrap();
        assert!(!store.dir("aaa").exists());
        store.delete("aaa").unwrap();
    }
}
