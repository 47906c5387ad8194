use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::error::HistoryStoreError;
use crate::schema::{HistoryDocument, HistoryRecord};

/// Persistence for completed exchanges, most recent first.
pub trait HistoryStore: Send + Sync {
    /// Insert `record` ahead of every existing record.
    fn append(&self, record: HistoryRecord) -> Result<(), HistoryStoreError>;

    fn list(&self) -> Result<Vec<HistoryRecord>, HistoryStoreError>;

    fn clear(&self) -> Result<(), HistoryStoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    records: Mutex<Vec<HistoryRecord>>,
}

impl InMemoryHistoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn append(&self, record: HistoryRecord) -> Result<(), HistoryStoreError> {
        lock_unpoisoned(&self.records).insert(0, record);
        Ok(())
    }

    fn list(&self) -> Result<Vec<HistoryRecord>, HistoryStoreError> {
        Ok(lock_unpoisoned(&self.records).clone())
    }

    fn clear(&self) -> Result<(), HistoryStoreError> {
        lock_unpoisoned(&self.records).clear();
        Ok(())
    }
}

/// History kept as a single `{"items": [...]}` JSON document.
///
/// Every write replaces the whole file through a sibling temp file and a
/// rename, so readers never observe a half-written document. A missing file
/// is an empty history.
#[derive(Debug)]
pub struct JsonFileHistoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileHistoryStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<HistoryDocument, HistoryStoreError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(source) if source.kind() == ErrorKind::NotFound => {
                return Ok(HistoryDocument::default());
            }
            Err(source) => {
                return Err(HistoryStoreError::io(
                    "reading history file",
                    &self.path,
                    source,
                ));
            }
        };

        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(HistoryDocument::default());
        }

        serde_json::from_slice(&raw)
            .map_err(|source| HistoryStoreError::json_parse(&self.path, source))
    }

    fn write_document(&self, document: &HistoryDocument) -> Result<(), HistoryStoreError> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| {
                HistoryStoreError::io("creating history directory", parent, source)
            })?;
        }

        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|source| HistoryStoreError::json_serialize(&self.path, source))?;

        let temp_path = self.temp_path();
        fs::write(&temp_path, bytes).map_err(|source| {
            HistoryStoreError::io("writing temporary history file", &temp_path, source)
        })?;
        fs::rename(&temp_path, &self.path).map_err(|source| {
            let _ = fs::remove_file(&temp_path);
            HistoryStoreError::io("replacing history file", &self.path, source)
        })?;

        debug!(path = %self.path.display(), items = document.items.len(), "history file written");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl HistoryStore for JsonFileHistoryStore {
    fn append(&self, record: HistoryRecord) -> Result<(), HistoryStoreError> {
        let _guard = lock_unpoisoned(&self.write_lock);
        let mut document = self.read_document()?;
        document.items.insert(0, record);
        self.write_document(&document)
    }

    fn list(&self) -> Result<Vec<HistoryRecord>, HistoryStoreError> {
        Ok(self.read_document()?.items)
    }

    fn clear(&self) -> Result<(), HistoryStoreError> {
        let _guard = lock_unpoisoned(&self.write_lock);
        self.write_document(&HistoryDocument::default())
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
