//! Persisted watcher state.
//!
//! A [`StateStore`] is a plain key/value store. [`WatchState`] maps onto three
//! independent keys per monitored entity (snapshot, validator, last notice),
//! so a cycle that only learned a new etag rewrites only the etag.

use crate::changes::CanonicalIndex;
use crate::error::{Result, WatchError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Key/value persistence used by the poll cycle.
pub trait StateStore: Send + Sync {
    /// Read a value; `Ok(None)` when the key was never written.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Overwrite a value.
    fn put(&self, key: &str, value: &str) -> Result<()>;
}

/// The three independently persisted pieces of state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSlot {
    Snapshot,
    Validator,
    LastNotice,
}

impl StateSlot {
    /// Store key of this slot for a monitored entity.
    pub fn key(self, entity: &str) -> String {
        match self {
            Self::Snapshot => format!("quiz_assignment_overrides_{entity}.json"),
            Self::Validator => format!("quiz_assignment_overrides_{entity}.etag"),
            Self::LastNotice => format!("quiz_assignment_overrides_{entity}.notice"),
        }
    }
}

/// One file per key under a directory.
///
/// Writes go to a temporary sibling first and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Store rooted at `dir`; the directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(WatchError::Store(format!("invalid state key `{key}`")));
        }
        Ok(self.dir.join(key))
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(WatchError::Store(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            WatchError::Store(format!("cannot create {}: {e}", self.dir.display()))
        })?;
        let tmp = self.dir.join(format!(".{key}.tmp"));
        std::fs::write(&tmp, value)
            .map_err(|e| WatchError::Store(format!("cannot write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            WatchError::Store(format!("cannot replace {}: {e}", path.display()))
        })?;
        Ok(())
    }
}

/// In-process store for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|_| WatchError::Store("memory store lock poisoned".into()))?;
        Ok(values.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| WatchError::Store("memory store lock poisoned".into()))?;
        values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// Last observed state of one monitored entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchState {
    /// Canonical index from the last cycle that saw real changes (or the first run).
    pub snapshot: CanonicalIndex,
    /// Caching validator (etag) from the last successful data response.
    pub validator: Option<String>,
    /// When the no-change cooldown was last armed.
    pub last_notice_at: Option<DateTime<Utc>>,
}

impl WatchState {
    /// Load state for `entity`.
    ///
    /// A corrupt snapshot or timestamp is treated as absent and logged, so a
    /// damaged file never wedges the watcher.
    ///
    /// # Errors
    ///
    /// Returns store read errors.
    pub fn load(store: &dyn StateStore, entity: &str) -> Result<Self> {
        let snapshot = match store.get(&StateSlot::Snapshot.key(entity))? {
            Some(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(entity, "discarding unreadable snapshot: {e}");
                CanonicalIndex::new()
            }),
            None => CanonicalIndex::new(),
        };

        let validator = store
            .get(&StateSlot::Validator.key(entity))?
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty());

        let last_notice_at = store
            .get(&StateSlot::LastNotice.key(entity))?
            .and_then(|v| match DateTime::parse_from_rfc3339(v.trim()) {
                Ok(ts) => Some(ts.with_timezone(&Utc)),
                Err(e) => {
                    warn!(entity, "discarding unreadable notice timestamp: {e}");
                    None
                }
            });

        debug!(
            entity,
            quizzes = snapshot.len(),
            has_validator = validator.is_some(),
            "loaded watch state"
        );

        Ok(Self {
            snapshot,
            validator,
            last_notice_at,
        })
    }

    /// Write the slots that differ between `self` and `previous`.
    ///
    /// Returns the slots written. The snapshot is written before the
    /// validator: if the validator write fails, the old etag stays next to
    /// the new snapshot, which costs one full fetch but never pairs a new
    /// etag with a stale snapshot.
    ///
    /// # Errors
    ///
    /// Returns the first store write error; earlier slots stay written.
    pub fn persist_changes(
        &self,
        previous: &WatchState,
        store: &dyn StateStore,
        entity: &str,
    ) -> Result<Vec<StateSlot>> {
        let mut written = Vec::new();

        if self.snapshot != previous.snapshot {
            let json = serde_json::to_string_pretty(&self.snapshot)
                .map_err(|e| WatchError::Store(format!("cannot serialize snapshot: {e}")))?;
            store.put(&StateSlot::Snapshot.key(entity), &json)?;
            written.push(StateSlot::Snapshot);
        }

        if self.validator != previous.validator {
            if let Some(validator) = &self.validator {
                store.put(&StateSlot::Validator.key(entity), validator)?;
                written.push(StateSlot::Validator);
            }
        }

        if self.last_notice_at != previous.last_notice_at {
            if let Some(ts) = self.last_notice_at {
                store.put(&StateSlot::LastNotice.key(entity), &ts.to_rfc3339())?;
                written.push(StateSlot::LastNotice);
            }
        }

        Ok(written)
    }
}
