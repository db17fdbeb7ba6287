//! SQLite-backed document store.
//!
//! # Responsibility
//! - Persist untyped event documents as JSON bodies with a few indexed
//!   columns (`owner_id`, `family_id`, `signature`).
//! - Stand in for the remote document store in local/offline deployments.
//!
//! # Invariants
//! - Indexed columns are always rewritten from the merged body, so they never
//!   drift from the JSON.
//! - Bodies that are not JSON objects are reported as `InvalidData`.

use super::event_repo::{EventRepository, RepoError, RepoResult};
use crate::model::event::{Document, OwnerScope, RawRecord};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const DOCUMENT_SELECT_SQL: &str = "SELECT id, body FROM event_documents";

pub struct SqliteEventRepository {
    conn: Mutex<Connection>,
}

impl SqliteEventRepository {
    /// Wraps a connection returned by `db::open_db*` (migrations applied).
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> RepoResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RepoError::Unavailable("sqlite connection lock poisoned".to_string()))
    }

    fn load(conn: &Connection, id: &str) -> RepoResult<Option<Document>> {
        let row = conn
            .query_row(
                &format!("{DOCUMENT_SELECT_SQL} WHERE id = ?1;"),
                [id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        row.map(|(id, body)| parse_document(id, &body)).transpose()
    }
}

#[async_trait]
impl EventRepository for SqliteEventRepository {
    async fn query_by_owner(&self, scope: &OwnerScope, limit: u32) -> RepoResult<Vec<Document>> {
        let (column, value) = scope_column(scope);
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{DOCUMENT_SELECT_SQL}
             WHERE {column} = ?1
             ORDER BY created_at ASC, id ASC
             LIMIT ?2;"
        ))?;
        let mut rows = stmt.query(params![value, i64::from(limit)])?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let body: String = row.get(1)?;
            documents.push(parse_document(id, &body)?);
        }
        Ok(documents)
    }

    async fn query_by_signature(
        &self,
        signature: &str,
        scope: &OwnerScope,
    ) -> RepoResult<Option<Document>> {
        let (column, value) = scope_column(scope);
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "{DOCUMENT_SELECT_SQL}
                     WHERE signature = ?1 AND {column} = ?2
                     ORDER BY created_at ASC, id ASC
                     LIMIT 1;"
                ),
                params![signature, value],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        row.map(|(id, body)| parse_document(id, &body)).transpose()
    }

    async fn get_by_id(&self, id: &str) -> RepoResult<Option<Document>> {
        let conn = self.lock()?;
        Self::load(&conn, id)
    }

    async fn insert(&self, record: RawRecord) -> RepoResult<String> {
        let id = Uuid::new_v4().to_string();
        let body = serde_json::to_string(&record)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO event_documents (
                id, owner_id, family_id, signature, body, created_at, updated_at
             ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                (strftime('%s', 'now') * 1000),
                (strftime('%s', 'now') * 1000)
             );",
            params![
                id,
                text(&record, "ownerId"),
                text(&record, "familyId"),
                text(&record, "signature"),
                body,
            ],
        )?;
        Ok(id)
    }

    async fn merge(&self, id: &str, patch: RawRecord) -> RepoResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut document =
            Self::load(&tx, id)?.ok_or_else(|| RepoError::NotFound(id.to_string()))?;
        document.data.extend(patch);
        let body = serde_json::to_string(&document.data)?;
        tx.execute(
            "UPDATE event_documents
             SET
                owner_id = ?1,
                family_id = ?2,
                signature = ?3,
                body = ?4,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?5;",
            params![
                text(&document.data, "ownerId"),
                text(&document.data, "familyId"),
                text(&document.data, "signature"),
                body,
                id,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> RepoResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM event_documents WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

fn scope_column(scope: &OwnerScope) -> (&'static str, &str) {
    match scope {
        OwnerScope::Family(id) => ("family_id", id.as_str()),
        OwnerScope::Owner(id) => ("owner_id", id.as_str()),
    }
}

fn text<'a>(record: &'a RawRecord, key: &str) -> Option<&'a str> {
    record.get(key).and_then(Value::as_str)
}

fn parse_document(id: String, body: &str) -> RepoResult<Document> {
    match serde_json::from_str::<Value>(body)? {
        Value::Object(data) => Ok(Document { id, data }),
        other => Err(RepoError::InvalidData(format!(
            "document `{id}` body is not an object: {other}"
        ))),
    }
}
