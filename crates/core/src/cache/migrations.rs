//! Schema migrations for the result store.
//!
//! Applied versions are recorded in `_migrations`; each run applies every
//! newer entry of [`MIGRATIONS`] in order inside one transaction.

use super::Error;
use tokio_rusqlite::{Connection, params, rusqlite};

/// `(version, name, SQL)`, ascending by version.
const MIGRATIONS: &[(i64, &str, &str)] =
    &[(1, "result_entries", include_str!("../../migrations/001_result_entries.sql"))];

/// Highest version this build knows how to apply.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map_or(0, |(version, _, _)| *version)
}

fn applied_version(conn: &rusqlite::Connection) -> Result<i64, Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )?;
    Ok(conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?)
}

/// Bring the schema up to [`latest_version`].
///
/// A database written by a newer build is refused rather than downgraded.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> {
        let current = applied_version(conn)?;
        if current > latest_version() {
            return Err(Error::MigrationFailed(format!(
                "database schema {current} is newer than supported {}",
                latest_version()
            )));
        }

        let tx = conn.transaction()?;
        for (version, name, sql) in MIGRATIONS.iter().filter(|(v, _, _)| *v > current) {
            tx.execute_batch(sql)
                .map_err(|e| Error::MigrationFailed(format!("{version} ({name}): {e}")))?;
            tx.execute(
                "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
                params![version, chrono::Utc::now().to_rfc3339()],
            )?;
            tracing::info!(version, name, "Applied result store migration");
        }
        tx.commit()?;
        Ok(())
    })
    .await
    .map_err(Error::from)
}

/// Version recorded in `_migrations`, 0 for a fresh database.
pub async fn current_version(conn: &Connection) -> Result<i64, Error> {
    conn.call(|conn| applied_version(conn)).await.map_err(Error::from)
}
