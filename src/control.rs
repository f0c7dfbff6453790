use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::domain::{Claim, ControlRow, DownloadStatus};
use crate::error::SyncError;

/// Per-version download state, keyed by (dataset id, last_modified).
///
/// Rows move absent -> processing -> completed | failed, and failed ->
/// processing on retry. Rows are never deleted. Implementations must be safe
/// to share between worker threads.
pub trait ControlStore: Send + Sync {
    fn status(&self, id: &str, last_modified: &str) -> Result<Option<DownloadStatus>, SyncError>;

    /// Greatest completed `last_modified` for `id`, by string ordering.
    fn latest_completed(&self, id: &str) -> Result<Option<String>, SyncError>;

    /// Fails with `DuplicateControlRow` when the key already exists.
    fn insert(
        &self,
        id: &str,
        last_modified: &str,
        status: DownloadStatus,
    ) -> Result<(), SyncError>;

    /// Fails with `MissingControlRow` when the key does not exist.
    fn update(
        &self,
        id: &str,
        last_modified: &str,
        status: DownloadStatus,
    ) -> Result<(), SyncError>;

    /// Atomically moves absent or failed to processing.
    fn claim(&self, id: &str, last_modified: &str) -> Result<Claim, SyncError>;

    /// Moves the row to `to` only if it is currently `from`.
    fn transition(
        &self,
        id: &str,
        last_modified: &str,
        from: DownloadStatus,
        to: DownloadStatus,
    ) -> Result<bool, SyncError>;

    fn rows(&self) -> Result<Vec<ControlRow>, SyncError>;
}

/// Decides what a claim does given the row's current status.
pub(crate) fn claim_for(current: Option<DownloadStatus>) -> Claim {
    match current {
        None => Claim::Inserted,
        Some(DownloadStatus::Failed) => Claim::Retried,
        Some(status) => Claim::Busy(status),
    }
}

type Key = (String, String);

#[derive(Debug, Default)]
pub struct MemoryControlStore {
    rows: Mutex<BTreeMap<Key, DownloadStatus>>,
}

impl MemoryControlStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<Key, DownloadStatus>>, SyncError> {
        self.rows
            .lock()
            .map_err(|_| SyncError::Control("control table lock poisoned".to_string()))
    }
}

fn key(id: &str, last_modified: &str) -> Key {
    (id.to_string(), last_modified.to_string())
}

impl ControlStore for MemoryControlStore {
    fn status(&self, id: &str, last_modified: &str) -> Result<Option<DownloadStatus>, SyncError> {
        Ok(self.lock()?.get(&key(id, last_modified)).copied())
    }

    fn latest_completed(&self, id: &str) -> Result<Option<String>, SyncError> {
        let rows = self.lock()?;
        Ok(rows
            .iter()
            .filter(|((row_id, _), status)| {
                row_id == id && **status == DownloadStatus::Completed
            })
            .map(|((_, last_modified), _)| last_modified)
            .max()
            .cloned())
    }

    fn insert(
        &self,
        id: &str,
        last_modified: &str,
        status: DownloadStatus,
    ) -> Result<(), SyncError> {
        let mut rows = self.lock()?;
        let key = key(id, last_modified);
        if rows.contains_key(&key) {
            return Err(SyncError::DuplicateControlRow {
                id: id.to_string(),
                last_modified: last_modified.to_string(),
            });
        }
        rows.insert(key, status);
        Ok(())
    }

    fn update(
        &self,
        id: &str,
        last_modified: &str,
        status: DownloadStatus,
    ) -> Result<(), SyncError> {
        let mut rows = self.lock()?;
        match rows.get_mut(&key(id, last_modified)) {
            Some(current) => {
                *current = status;
                Ok(())
            }
            None => Err(SyncError::MissingControlRow {
                id: id.to_string(),
                last_modified: last_modified.to_string(),
            }),
        }
    }

    fn claim(&self, id: &str, last_modified: &str) -> Result<Claim, SyncError> {
        let mut rows = self.lock()?;
        let key = key(id, last_modified);
        let claim = claim_for(rows.get(&key).copied());
        if !matches!(claim, Claim::Busy(_)) {
            rows.insert(key, DownloadStatus::Processing);
        }
        Ok(claim)
    }

    fn transition(
        &self,
        id: &str,
        last_modified: &str,
        from: DownloadStatus,
        to: DownloadStatus,
    ) -> Result<bool, SyncError> {
        let mut rows = self.lock()?;
        match rows.get_mut(&key(id, last_modified)) {
            Some(current) if *current == from => {
                *current = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn rows(&self) -> Result<Vec<ControlRow>, SyncError> {
        Ok(self
            .lock()?
            .iter()
            .map(|((id, last_modified), status)| ControlRow {
                id: id.clone(),
                last_modified: last_modified.clone(),
                status: *status,
            })
            .collect())
    }
}
