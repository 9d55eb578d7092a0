//! Persistent per-`(source, relative_path)` byte offset store, surviving
//! client restart.
//!
//! Backed by `redb`, an embedded single-file ACID key-value store. Deleted
//! paths are recorded by overwriting their offset with the `-1` tombstone
//! value rather than removing the key, so a restart that reopens this store
//! mid-deletion can still tell "never seen" apart from "seen, then
//! deleted."

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};

const TABLE: TableDefinition<&str, i64> = TableDefinition::new("resume_offsets");

/// Marks a tombstoned (deleted) path.
pub const TOMBSTONE: i64 = -1;

#[derive(Debug, thiserror::Error)]
#[error("resume store error: {0}")]
pub struct ResumeError(String);

impl ResumeError {
    fn new(err: impl std::fmt::Display) -> Self {
        Self(err.to_string())
    }
}

/// The client-side resume store, keyed by `(source_name, relative_path)`.
pub struct ResumeStore {
    db: Database,
}

impl ResumeStore {
    /// Opens (creating if absent) the on-disk store at `path`.
    pub fn open(path: &Path) -> Result<Self, ResumeError> {
        let db = Database::create(path).map_err(ResumeError::new)?;
        let txn = db.begin_write().map_err(ResumeError::new)?;
        txn.open_table(TABLE).map_err(ResumeError::new)?;
        txn.commit().map_err(ResumeError::new)?;
        Ok(Self { db })
    }

    fn key(source: &str, relative_path: &str) -> String {
        format!("{source}\u{0}{relative_path}")
    }

    /// Reads the stored offset for `(source, relative_path)`, or `None` if
    /// never recorded.
    pub fn get(&self, source: &str, relative_path: &str) -> Result<Option<i64>, ResumeError> {
        let txn = self.db.begin_read().map_err(ResumeError::new)?;
        let table = txn.open_table(TABLE).map_err(ResumeError::new)?;
        let key = Self::key(source, relative_path);
        Ok(table
            .get(key.as_str())
            .map_err(ResumeError::new)?
            .map(|value| value.value()))
    }

    /// Records `offset` for `(source, relative_path)`.
    pub fn set(&self, source: &str, relative_path: &str, offset: i64) -> Result<(), ResumeError> {
        let key = Self::key(source, relative_path);
        let txn = self.db.begin_write().map_err(ResumeError::new)?;
        {
            let mut table = txn.open_table(TABLE).map_err(ResumeError::new)?;
            table
                .insert(key.as_str(), offset)
                .map_err(ResumeError::new)?;
        }
        txn.commit().map_err(ResumeError::new)?;
        Ok(())
    }

    /// Marks `(source, relative_path)` deleted by writing the tombstone
    /// value, never by removing the key.
    pub fn tombstone(&self, source: &str, relative_path: &str) -> Result<(), ResumeError> {
        self.set(source, relative_path, TOMBSTONE)
    }

    /// True if the path has been recorded and that record is a tombstone.
    pub fn is_tombstoned(&self, source: &str, relative_path: &str) -> Result<bool, ResumeError> {
        Ok(self
            .get(source, relative_path)?
            .is_some_and(|offset| offset < 0))
    }
}
