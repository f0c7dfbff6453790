use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};

use crate::control::{ControlStore, claim_for};
use crate::domain::{Claim, ControlRow, DownloadStatus};
use crate::error::SyncError;

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS control (
    id TEXT NOT NULL,
    status TEXT NOT NULL,
    last_modified TEXT NOT NULL,
    PRIMARY KEY (id, last_modified)
)";

/// `control` table in a single SQLite file.
///
/// Every operation opens its own connection, so worker threads never share a
/// handle. Writers are serialized by SQLite's file lock; the busy timeout
/// waits out contention instead of failing.
#[derive(Debug, Clone)]
pub struct SqliteControlStore {
    path: Utf8PathBuf,
    busy_timeout: Duration,
}

impl SqliteControlStore {
    pub fn open(path: impl Into<Utf8PathBuf>) -> Result<Self, SyncError> {
        let store = Self {
            path: path.into(),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        };
        if let Some(parent) = store.path.parent()
            && !parent.as_str().is_empty()
        {
            std::fs::create_dir_all(parent.as_std_path())
                .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        }
        let conn = store.connect()?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
        conn.execute_batch(SCHEMA)?;
        Ok(store)
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, SyncError> {
        let conn = Connection::open(self.path.as_std_path())?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }
}

fn read_status(
    conn: &Connection,
    id: &str,
    last_modified: &str,
) -> Result<Option<DownloadStatus>, SyncError> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM control WHERE id = ?1 AND last_modified = ?2",
            params![id, last_modified],
            |row| row.get(0),
        )
        .optional()?;
    status.map(|value| value.parse()).transpose()
}

impl ControlStore for SqliteControlStore {
    fn status(&self, id: &str, last_modified: &str) -> Result<Option<DownloadStatus>, SyncError> {
        let conn = self.connect()?;
        read_status(&conn, id, last_modified)
    }

    fn latest_completed(&self, id: &str) -> Result<Option<String>, SyncError> {
        let conn = self.connect()?;
        let latest: Option<String> = conn.query_row(
            "SELECT MAX(last_modified) FROM control WHERE id = ?1 AND status = ?2",
            params![id, DownloadStatus::Completed.as_str()],
            |row| row.get(0),
        )?;
        Ok(latest)
    }

    fn insert(
        &self,
        id: &str,
        last_modified: &str,
        status: DownloadStatus,
    ) -> Result<(), SyncError> {
        let conn = self.connect()?;
        let result = conn.execute(
            "INSERT INTO control (id, status, last_modified) VALUES (?1, ?2, ?3)",
            params![id, status.as_str(), last_modified],
        );
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                Err(SyncError::DuplicateControlRow {
                    id: id.to_string(),
                    last_modified: last_modified.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn update(
        &self,
        id: &str,
        last_modified: &str,
        status: DownloadStatus,
    ) -> Result<(), SyncError> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE control SET status = ?1 WHERE id = ?2 AND last_modified = ?3",
            params![status.as_str(), id, last_modified],
        )?;
        if changed == 0 {
            return Err(SyncError::MissingControlRow {
                id: id.to_string(),
                last_modified: last_modified.to_string(),
            });
        }
        Ok(())
    }

    fn claim(&self, id: &str, last_modified: &str) -> Result<Claim, SyncError> {
        let mut conn = self.connect()?;
        // IMMEDIATE takes the write lock up front, so the read below cannot go
        // stale before the write.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let claim = claim_for(read_status(&tx, id, last_modified)?);
        match claim {
            Claim::Inserted => {
                tx.execute(
                    "INSERT INTO control (id, status, last_modified) VALUES (?1, ?2, ?3)",
                    params![id, DownloadStatus::Processing.as_str(), last_modified],
                )?;
            }
            Claim::Retried => {
                tx.execute(
                    "UPDATE control SET status = ?1 WHERE id = ?2 AND last_modified = ?3",
                    params![DownloadStatus::Processing.as_str(), id, last_modified],
                )?;
            }
            Claim::Busy(_) => {}
        }
        tx.commit()?;
        Ok(claim)
    }

    fn transition(
        &self,
        id: &str,
        last_modified: &str,
        from: DownloadStatus,
        to: DownloadStatus,
    ) -> Result<bool, SyncError> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE control SET status = ?1 WHERE id = ?2 AND last_modified = ?3 AND status = ?4",
            params![to.as_str(), id, last_modified, from.as_str()],
        )?;
        Ok(changed == 1)
    }

    fn rows(&self) -> Result<Vec<ControlRow>, SyncError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, last_modified, status FROM control ORDER BY id ASC, last_modified ASC",
        )?;
        let raw = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let last_modified: String = row.get(1)?;
                let status: String = row.get(2)?;
                Ok((id, last_modified, status))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(id, last_modified, status)| -> Result<ControlRow, SyncError> {
                Ok(ControlRow {
                    id,
                    last_modified,
                    status: status.parse()?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_parent_dir_and_schema() {
        let temp = tempfile::tempdir().unwrap();
        let path =
            Utf8PathBuf::from_path_buf(temp.path().join("state").join("control.db")).unwrap();
        let store = SqliteControlStore::open(path.clone()).unwrap();
        assert_eq!(store.path(), path.as_path());
        assert!(path.as_std_path().exists());
        assert!(store.rows().unwrap().is_empty());

        // Reopening an existing database keeps its rows.
        store
            .insert("a", "2024-01-01", DownloadStatus::Completed)
            .unwrap();
        let reopened = SqliteControlStore::open(path).unwrap();
        assert_eq!(reopened.rows().unwrap().len(), 1);
    }

    #[test]
    fn claim_gives_up_after_busy_timeout() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("control.db")).unwrap();
        let store = SqliteControlStore::open(path.clone())
            .unwrap()
            .with_busy_timeout(Duration::from_millis(50));

        let holder = Connection::open(path.as_std_path()).unwrap();
        holder.execute_batch("BEGIN IMMEDIATE").unwrap();
        assert!(matches!(
            store.claim("a", "2024-01-01"),
            Err(SyncError::Control(_))
        ));

        holder.execute_batch("COMMIT").unwrap();
        assert_eq!(store.claim("a", "2024-01-01").unwrap(), Claim::Inserted);
    }
}
