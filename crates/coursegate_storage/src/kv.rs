#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::StorageError;

/// String key-value storage that outlives the process (or a page reload, for the client).
pub trait DurableKv: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: String) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct InMemoryKv {
    entries: Mutex<BTreeMap<String, String>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableKv for InMemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::LockPoisoned)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::LockPoisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// Single JSON object file holding every key. Writes go through a sibling temp file and a
/// rename so a crash mid-write never leaves a truncated store behind.
#[derive(Debug)]
pub struct JsonFileKv {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileKv {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| io_error(parent, err))?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(io_error(&self.path, err)),
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|err| {
            StorageError::Decode(format!(
                "kv file '{}' is not a JSON object of strings: {}",
                self.path.display(),
                err
            ))
        })
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(entries)
            .map_err(|err| StorageError::Encode(err.to_string()))?;
        let tmp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path).map_err(|err| io_error(&tmp_path, err))?;
        file.write_all(json.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|err| io_error(&tmp_path, err))?;
        fs::rename(&tmp_path, &self.path).map_err(|err| io_error(&self.path, err))
    }

    fn update<F>(&self, mutate: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let _guard = self.write_lock.lock().map_err(|_| StorageError::LockPoisoned)?;
        // A corrupt file is replaced rather than blocking every future write.
        let mut entries = match self.read_all() {
            Ok(entries) => entries,
            Err(StorageError::Decode(message)) => {
                tracing::warn!(path = %self.path.display(), %message, "discarding corrupt kv file");
                BTreeMap::new()
            }
            Err(err) => return Err(err),
        };
        mutate(&mut entries);
        self.write_all(&entries)
    }
}

impl DurableKv for JsonFileKv {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value);
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

fn io_error(path: &Path, err: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(label: &str) -> PathBuf {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock must be >= unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!("coursegate_kv_{label}_{seed}.json"))
    }

    #[test]
    fn at_kv_01_in_memory_roundtrip_and_remove() {
        let kv = InMemoryKv::new();
        assert_eq!(kv.get("a").unwrap(), None);
        kv.set("a", "1".to_string()).unwrap();
        assert_eq!(kv.get("a").unwrap().as_deref(), Some("1"));
        kv.remove("a").unwrap();
        assert_eq!(kv.get("a").unwrap(), None);
    }

    #[test]
    fn at_kv_02_file_survives_reopen() {
        let path = temp_path("reopen");
        {
            let kv = JsonFileKv::open(&path).unwrap();
            kv.set("pending-order:1", "{}".to_string()).unwrap();
        }
        let reopened = JsonFileKv::open(&path).unwrap();
        assert_eq!(
            reopened.get("pending-order:1").unwrap().as_deref(),
            Some("{}")
        );
        let _ = fs::remove_file(path);
    }

    #[test]
    fn at_kv_03_corrupt_file_reads_fail_and_writes_recover() {
        let path = temp_path("corrupt");
        fs::write(&path, "not json at all").unwrap();
        let kv = JsonFileKv::open(&path).unwrap();
        assert!(matches!(kv.get("x"), Err(StorageError::Decode(_))));
        kv.set("x", "y".to_string()).unwrap();
        assert_eq!(kv.get("x").unwrap().as_deref(), Some("y"));
        let _ = fs::remove_file(path);
    }
}
