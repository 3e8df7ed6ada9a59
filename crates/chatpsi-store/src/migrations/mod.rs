//! Schema migrations, applied in order when the database is opened.
//!
//! `PRAGMA user_version` holds the number of migrations already applied.

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Migration = fn(&Connection) -> rusqlite::Result<()>;

/// Append only.  Position `n` becomes schema version `n + 1`.
const MIGRATIONS: &[(&str, Migration)] = &[("v001_initial", v001_initial::up)];

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let applied: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    tracing::debug!(applied, available = MIGRATIONS.len(), "checking schema version");

    for (index, (name, up)) in MIGRATIONS.iter().enumerate() {
        let version = index as u32 + 1;
        if applied >= version {
            continue;
        }
        tracing::info!(version, name, "applying schema migration");
        up(conn).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        conn.pragma_update(None, "user_version", version)?;
    }

    Ok(())
}
