//! Settings and result persistence
//!
//! Two external stores sit behind traits: a string key-value store for the
//! model selection, and an append-only record sink for completed results.
//! In-memory and file-backed implementations are provided.

use crate::{
    error::{BgRemovalError, Result},
    models::ModelId,
    services::ImageIOService,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

/// Directory name used under the platform config dir
const APP_DIR_NAME: &str = "bgremove-worker";

/// String key-value store
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `Ok(None)` when the key was never set
    ///
    /// # Errors
    /// - Backing storage unreadable
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one
    ///
    /// # Errors
    /// - Backing storage unwritable
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Append-only sink for completed results
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Append one record to `table`
    ///
    /// # Errors
    /// - Backing storage unwritable
    async fn append(&self, table: &str, record: PersistedRecord) -> Result<()>;
}

/// A completed result as written to the record sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub name: String,
    pub model: ModelId,
    /// Base64 of the submitted image
    pub input: String,
    /// Base64 of the PNG output
    pub output: String,
    /// RFC 3339 / ISO-8601 UTC timestamp
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

impl PersistedRecord {
    /// Build a record stamped with the current time
    #[must_use]
    pub fn new(name: impl Into<String>, model: ModelId, input: &[u8], output: &[u8]) -> Self {
        Self {
            name: name.into(),
            model,
            input: ImageIOService::to_base64(input),
            output: ImageIOService::to_base64(output),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Decode the stored input image bytes
    ///
    /// # Errors
    /// - Field is not valid base64
    pub fn decode_input(&self) -> Result<Vec<u8>> {
        ImageIOService::from_base64(&self.input)
    }

    /// Decode the stored PNG output bytes
    ///
    /// # Errors
    /// - Field is not valid base64
    pub fn decode_output(&self) -> Result<Vec<u8>> {
        ImageIOService::from_base64(&self.output)
    }
}

/// Key-value store kept in memory
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|_| BgRemovalError::storage("Key-value store lock poisoned"))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| BgRemovalError::storage("Key-value store lock poisoned"))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Key-value store persisted as a single JSON object file
#[derive(Debug)]
pub struct JsonFileKeyValueStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileKeyValueStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store at `<config dir>/bgremove-worker/settings.json`
    ///
    /// # Errors
    /// - No config directory for the current platform
    pub fn with_default_path() -> Result<Self> {
        Ok(Self::new(Self::default_path()?))
    }

    /// Default settings file location
    ///
    /// # Errors
    /// - No config directory for the current platform
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR_NAME).join("settings.json"))
            .ok_or_else(|| BgRemovalError::storage("Cannot determine config directory"))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(BgRemovalError::file_io_error("read settings", &self.path, &e)),
        }
    }
}

impl KeyValueStore for JsonFileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| BgRemovalError::storage("Settings file lock poisoned"))?;
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| BgRemovalError::storage("Settings file lock poisoned"))?;

        let mut values = self.read_all()?;
        values.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BgRemovalError::file_io_error("create settings directory", parent, &e)
            })?;
        }
        let contents = serde_json::to_string_pretty(&values)?;
        std::fs::write(&self.path, contents)
            .map_err(|e| BgRemovalError::file_io_error("write settings", &self.path, &e))?;
        log::debug!("Persisted setting '{}' to {}", key, self.path.display());
        Ok(())
    }
}

/// Record sink kept in memory
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    tables: Mutex<HashMap<String, Vec<PersistedRecord>>>,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records appended to `table` so far
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<PersistedRecord> {
        self.tables
            .lock()
            .ok()
            .and_then(|tables| tables.get(table).cloned())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordSink for MemoryRecordStore {
    async fn append(&self, table: &str, record: PersistedRecord) -> Result<()> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| BgRemovalError::storage("Record store lock poisoned"))?;
        tables.entry(table.to_string()).or_default().push(record);
        Ok(())
    }
}

/// Record sink writing one JSON line per record to `<dir>/<table>.jsonl`
#[derive(Debug)]
pub struct JsonLinesRecordStore {
    dir: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonLinesRecordStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// File backing `table`
    ///
    /// # Errors
    /// - Table name is empty or contains path separators
    pub fn table_path(&self, table: &str) -> Result<PathBuf> {
        if table.is_empty() || table.contains(['/', '\\']) || table.starts_with('.') {
            return Err(BgRemovalError::storage(format!(
                "Invalid table name '{}'",
                table
            )));
        }
        Ok(self.dir.join(format!("{}.jsonl", table)))
    }

    /// Read every record of `table` back, oldest first
    ///
    /// # Errors
    /// - File unreadable or a line is not a valid record
    pub async fn read_table(&self, table: &str) -> Result<Vec<PersistedRecord>> {
        let path = self.table_path(table)?;
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BgRemovalError::file_io_error("read records", &path, &e)),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(BgRemovalError::from))
            .collect()
    }
}

#[async_trait]
impl RecordSink for JsonLinesRecordStore {
    async fn append(&self, table: &str, record: PersistedRecord) -> Result<()> {
        let path = self.table_path(table)?;
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| BgRemovalError::file_io_error("create records directory", &self.dir, &e))?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| BgRemovalError::file_io_error("open records", &path, &e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| BgRemovalError::file_io_error("append record", &path, &e))?;
        file.flush()
            .await
            .map_err(|e| BgRemovalError::file_io_error("flush records", &path, &e))?;

        tracing::debug!(table, path = %path.display(), "Record appended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_encodes_buffers_and_timestamp() {
        let record = PersistedRecord::new("cat.png", ModelId::Rmbg14, &[1, 2, 3], &[255, 0]);
        assert_eq!(record.input, "AQID");
        assert_eq!(record.decode_input().unwrap(), vec![1, 2, 3]);
        assert_eq!(record.decode_output().unwrap(), vec![255, 0]);
        assert!(chrono::DateTime::parse_from_rfc3339(&record.created_at).is_ok());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["model"], "briaai/RMBG-1.4");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("created_at").is_none());
    }

    #[test]
    fn test_memory_key_value_store() {
        let store = MemoryKeyValueStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v1").unwrap();
        store.set("k", "v2").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn test_json_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let store = JsonFileKeyValueStore::new(&path);
        assert_eq!(store.get("model").unwrap(), None);
        store.set("model", "Xenova/modnet").unwrap();
        store.set("other", "x").unwrap();

        let reopened = JsonFileKeyValueStore::new(&path);
        assert_eq!(reopened.get("model").unwrap().as_deref(), Some("Xenova/modnet"));
        assert_eq!(reopened.get("other").unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn test_json_file_store_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = JsonFileKeyValueStore::new(&path);
        assert!(matches!(
            store.get("model"),
            Err(BgRemovalError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_record_store_appends_per_table() {
        let store = MemoryRecordStore::new();
        let record = PersistedRecord::new("a.png", ModelId::Rmbg20, b"in", b"out");
        store.append("images", record.clone()).await.unwrap();
        store.append("images", record.clone()).await.unwrap();

        assert_eq!(store.rows("images"), vec![record.clone(), record]);
        assert!(store.rows("other").is_empty());
    }

    #[tokio::test]
    async fn test_json_lines_store_appends() {
        let dir = TempDir::new().unwrap();
        let store = JsonLinesRecordStore::new(dir.path().join("records"));

        let first = PersistedRecord::new("a.png", ModelId::Rmbg20, b"a", b"A");
        let second = PersistedRecord::new("b.png", ModelId::Modnet, b"b", b"B");
        store.append("images", first.clone()).await.unwrap();
        store.append("images", second.clone()).await.unwrap();

        assert_eq!(store.read_table("images").await.unwrap(), vec![first, second]);
        assert!(dir.path().join("records").join("images.jsonl").exists());
        assert!(store.read_table("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_lines_store_rejects_bad_table_names() {
        let dir = TempDir::new().unwrap();
        let store = JsonLinesRecordStore::new(dir.path());
        let record = PersistedRecord::new("a.png", ModelId::Rmbg20, b"a", b"A");

        for table in ["", "../escape", ".hidden", "a\\b"] {
            assert!(matches!(
                store.append(table, record.clone()).await,
                Err(BgRemovalError::Storage(_))
            ));
        }
    }
}
