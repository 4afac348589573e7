// Persistent key/value configuration, grouped in sections
//
// Survives resets. The runtime reads it once at boot and writes the radio
// frequency when a configuration frame is accepted.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

/// Error types for the configuration store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

type Sections = BTreeMap<String, BTreeMap<String, String>>;

pub trait ConfigStore: Send {
    fn read(&self, section: &str, key: &str) -> Option<String>;
    fn write(&mut self, section: &str, key: &str, value: &str) -> Result<()>;
}

/// JSON file: `{ "section": { "key": "value" } }`
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    sections: Sections,
}

impl JsonFileStore {
    /// Load the file, starting empty if it does not exist yet
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let sections = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Sections::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config store at {}, starting empty", path.display());
                Sections::new()
            }
            Err(e) => return Err(e.into()),
        };
        debug!("Loaded config store {} ({} sections)", path.display(), sections.len());
        Ok(Self { path, sections })
    }

    fn persist(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.sections)?;
        // readers see either the old file or the new one, never half of it
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ConfigStore for JsonFileStore {
    fn read(&self, section: &str, key: &str) -> Option<String> {
        self.sections.get(section)?.get(key).cloned()
    }

    fn write(&mut self, section: &str, key: &str, value: &str) -> Result<()> {
        let previous = self
            .sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist() {
            warn!("Failed to persist [{}] {}: {}", section, key, e);
            // keep memory in step with disk
            let entries = self.sections.entry(section.to_string()).or_default();
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}

/// In-memory store. Clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore(Arc<Mutex<Sections>>);

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryStore {
    fn read(&self, section: &str, key: &str) -> Option<String> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(section)?
            .get(key)
            .cloned()
    }

    fn write(&mut self, section: &str, key: &str, value: &str) -> Result<()> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KEY_FREQUENCY, SECTION_NRF};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("omnibot-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_memory_store_shared_between_clones() {
        let mut store = MemoryStore::new();
        let view = store.clone();
        assert_eq!(view.read(SECTION_NRF, KEY_FREQUENCY), None);
        assert!(store.write(SECTION_NRF, KEY_FREQUENCY, "2450").is_ok());
        assert_eq!(view.read(SECTION_NRF, KEY_FREQUENCY).as_deref(), Some("2450"));
    }

    #[test]
    fn test_json_store_survives_reopen() {
        let path = temp_path("reopen");
        let _ = fs::remove_file(&path);

        let mut store = JsonFileStore::open(&path).expect("open");
        assert_eq!(store.read(SECTION_NRF, KEY_FREQUENCY), None);
        store.write(SECTION_NRF, KEY_FREQUENCY, "2436").expect("write");
        store.write("robot", "id", "3").expect("write");
        drop(store);

        let reopened = JsonFileStore::open(&path).expect("reopen");
        assert_eq!(reopened.read(SECTION_NRF, KEY_FREQUENCY).as_deref(), Some("2436"));
        assert_eq!(reopened.read("robot", "id").as_deref(), Some("3"));
        assert_eq!(reopened.read("robot", "missing"), None);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_json_store_overwrites_value() {
        let path = temp_path("overwrite");
        let _ = fs::remove_file(&path);

        let mut store = JsonFileStore::open(&path).expect("open");
        store.write(SECTION_NRF, KEY_FREQUENCY, "2436").expect("write");
        store.write(SECTION_NRF, KEY_FREQUENCY, "2500").expect("write");
        assert_eq!(store.read(SECTION_NRF, KEY_FREQUENCY).as_deref(), Some("2500"));
        assert!(!path.with_extension("tmp").exists());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let path = temp_path("corrupt");
        fs::write(&path, "{ not json").expect("seed");
        assert!(matches!(JsonFileStore::open(&path), Err(StoreError::Json(_))));
        let _ = fs::remove_file(&path);
    }
}
