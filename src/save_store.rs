use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::StoreError;

pub trait SaveStore {
    fn read(&self, character: &str, slot: u32) -> Result<Option<String>, StoreError>;
    fn write(&mut self, character: &str, slot: u32, contents: &str) -> Result<(), StoreError>;
}

/// Stores each blob at `<root>/<character>/slot_<n>.txt`.
pub struct FileSaveStore {
    root: PathBuf,
}

impl FileSaveStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn path_for(&self, character: &str, slot: u32) -> PathBuf {
        self.root.join(character).join(format!("slot_{slot}.txt"))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl SaveStore for FileSaveStore {
    fn read(&self, character: &str, slot: u32) -> Result<Option<String>, StoreError> {
        let path = self.path_for(character, slot);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no save file yet");
                Ok(None)
            }
            Err(error) => Err(io_error(&path, error)),
        }
    }

    fn write(&mut self, character: &str, slot: u32, contents: &str) -> Result<(), StoreError> {
        let path = self.path_for(character, slot);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|error| io_error(parent, error))?;
        }
        fs::write(&path, contents).map_err(|error| io_error(&path, error))
    }
}

#[derive(Default)]
pub struct MemorySaveStore {
    blobs: HashMap<(String, u32), String>,
}

impl MemorySaveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl SaveStore for MemorySaveStore {
    fn read(&self, character: &str, slot: u32) -> Result<Option<String>, StoreError> {
        Ok(self.blobs.get(&(character.to_string(), slot)).cloned())
    }

    fn write(&mut self, character: &str, slot: u32, contents: &str) -> Result<(), StoreError> {
        self.blobs
            .insert((character.to_string(), slot), contents.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_root(name: &str) -> PathBuf {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let unique = format!(
            "{}-{}-{}",
            name,
            std::process::id(),
            now_ms.saturating_add(rand::random::<u32>() as u64)
        );
        std::env::temp_dir().join(unique)
    }

    #[test]
    fn file_store_round_trips_and_creates_directories() {
        let root = temp_root("save-store-round-trip");
        let mut store = FileSaveStore::new(root.clone());
        assert_eq!(store.read("The Saint", 0).expect("read missing"), None);

        store.write("The Saint", 0, "host<chr.x<a:1,>").expect("write");
        store.write("The Saint", 1, "other").expect("write second slot");
        assert_eq!(
            store.read("The Saint", 0).expect("read"),
            Some("host<chr.x<a:1,>".to_string())
        );
        assert!(store.path_for("The Saint", 1).exists());

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn file_store_reports_unreadable_paths() {
        let root = temp_root("save-store-unreadable");
        fs::create_dir_all(root.join("Monk").join("slot_0.txt")).expect("create blocking dir");
        let store = FileSaveStore::new(root.clone());
        let result = store.read("Monk", 0);
        assert!(matches!(result, Err(StoreError::Io { .. })));

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn memory_store_keys_by_character_and_slot() {
        let mut store = MemorySaveStore::new();
        store.write("A", 0, "zero").expect("write");
        store.write("A", 1, "one").expect("write");
        store.write("B", 0, "other").expect("write");
        assert_eq!(store.len(), 3);
        assert_eq!(store.read("A", 1).expect("read"), Some("one".to_string()));
        assert_eq!(store.read("C", 0).expect("read"), None);
    }
}
