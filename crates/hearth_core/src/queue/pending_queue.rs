//! Durable pending-write queue.
//!
//! # Responsibility
//! - Keep writes that failed to reach the document store across restarts.
//! - Hand them back in submission order for replay.
//!
//! # Invariants
//! - `load` returns writes in the order they were appended.
//! - Entries are removed by sequence number only, so a replay never drops
//!   writes appended while it was running.

use crate::db::DbError;
use crate::model::event::RawRecord;
use log::info;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("invalid pending write: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("pending queue lock poisoned")]
    Poisoned,
}

impl From<rusqlite::Error> for QueueError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Which coordinator operation a queued write replays through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingOp {
    #[default]
    Add,
    Update {
        #[serde(rename = "targetId")]
        target_id: String,
    },
}

/// One queued write.
///
/// For `Add` the `event` bag is the raw submission; for `Update` it is the
/// patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWrite {
    #[serde(default)]
    pub op: PendingOp,
    pub event: RawRecord,
    /// Epoch milliseconds when the write was queued.
    pub timestamp: i64,
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<String>,
}

/// A queued write with its position in the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedWrite {
    /// Monotonic per store; never reused.
    pub seq: i64,
    pub write: PendingWrite,
}

/// Storage for the pending-write queue.
pub trait PendingWriteStore: Send + Sync {
    fn append(&self, write: &PendingWrite) -> QueueResult<()>;
    /// Queued writes, oldest first.
    fn entries(&self) -> QueueResult<Vec<QueuedWrite>>;
    /// Removes exactly the given entries; anything appended since the caller
    /// read the queue stays. Unknown sequence numbers are ignored.
    fn remove(&self, seqs: &[i64]) -> QueueResult<()>;
    fn clear(&self) -> QueueResult<()>;

    fn load(&self) -> QueueResult<Vec<PendingWrite>> {
        Ok(self
            .entries()?
            .into_iter()
            .map(|entry| entry.write)
            .collect())
    }
}

/// SQLite-backed queue in the `pending_writes` table.
pub struct SqlitePendingWriteStore {
    conn: Mutex<Connection>,
}

impl SqlitePendingWriteStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> QueueResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| QueueError::Poisoned)
    }
}

impl PendingWriteStore for SqlitePendingWriteStore {
    fn append(&self, write: &PendingWrite) -> QueueResult<()> {
        let body = serde_json::to_string(write)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO pending_writes (body, queued_at) VALUES (?1, ?2);",
            params![body, write.timestamp],
        )?;
        info!(
            "event=pending_append module=queue status=ok seq={} owner_id={}",
            conn.last_insert_rowid(),
            write.owner_id
        );
        Ok(())
    }

    fn entries(&self) -> QueueResult<Vec<QueuedWrite>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT seq, body FROM pending_writes ORDER BY seq ASC;")?;
        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let seq: i64 = row.get(0)?;
            let body: String = row.get(1)?;
            entries.push(QueuedWrite {
                seq,
                write: serde_json::from_str(&body)?,
            });
        }
        Ok(entries)
    }

    fn remove(&self, seqs: &[i64]) -> QueueResult<()> {
        if seqs.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM pending_writes WHERE seq = ?1;")?;
            for seq in seqs {
                stmt.execute(params![seq])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn clear(&self) -> QueueResult<()> {
        self.lock()?.execute("DELETE FROM pending_writes;", [])?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryQueue {
    last_seq: i64,
    entries: Vec<QueuedWrite>,
}

/// Process-local queue; does not survive restarts.
#[derive(Debug, Default)]
pub struct MemoryPendingWriteStore {
    queue: Mutex<MemoryQueue>,
}

impl MemoryPendingWriteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> QueueResult<MutexGuard<'_, MemoryQueue>> {
        self.queue.lock().map_err(|_| QueueError::Poisoned)
    }
}

impl PendingWriteStore for MemoryPendingWriteStore {
    fn append(&self, write: &PendingWrite) -> QueueResult<()> {
        let mut queue = self.lock()?;
        queue.last_seq += 1;
        let seq = queue.last_seq;
        queue.entries.push(QueuedWrite {
            seq,
            write: write.clone(),
        });
        Ok(())
    }

    fn entries(&self) -> QueueResult<Vec<QueuedWrite>> {
        Ok(self.lock()?.entries.clone())
    }

    fn remove(&self, seqs: &[i64]) -> QueueResult<()> {
        self.lock()?
            .entries
            .retain(|entry| !seqs.contains(&entry.seq));
        Ok(())
    }

    fn clear(&self) -> QueueResult<()> {
        self.lock()?.entries.clear();
        Ok(())
    }
}
