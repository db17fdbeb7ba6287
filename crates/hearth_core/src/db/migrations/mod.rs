//! Schema migrations for the local document store and pending queue.
//!
//! # Invariants
//! - Versions start at 1 and increase by exactly one.
//! - All pending steps share one transaction; a failing step leaves the
//!   database at its previous `PRAGMA user_version`.
//!
//! # Steps
//! - 1 `event_documents`: local stand-in for the remote document store.
//! - 2 `pending_writes`: durable fallback queue.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::{Connection, Transaction};

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "event_documents",
        sql: include_str!("0001_init.sql"),
    },
    Migration {
        version: 2,
        name: "pending_writes",
        sql: include_str!("0002_pending_writes.sql"),
    },
];

/// Schema version this build writes.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Brings `conn` up to [`latest_version`].
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let from = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    let latest = latest_version();
    if from > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from,
            latest_supported: latest,
        });
    }
    if from == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    run_steps(&tx, MIGRATIONS, from)?;
    tx.commit()?;
    info!("event=db_migrate module=db status=ok from={from} to={latest}");
    Ok(())
}

fn run_steps(tx: &Transaction<'_>, steps: &[Migration], from: u32) -> DbResult<()> {
    for step in steps.iter().filter(|step| step.version > from) {
        tx.execute_batch(step.sql)
            .and_then(|()| tx.pragma_update(None, "user_version", step.version))
            .map_err(|source| DbError::Migration {
                version: step.version,
                name: step.name,
                source,
            })?;
        info!(
            "event=db_migrate_step module=db status=ok version={} name={}",
            step.version, step.name
        );
    }
    Ok(())
}
