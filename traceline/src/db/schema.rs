//! SQLite schema, versioned through `PRAGMA user_version`

use rusqlite::Connection;

/// Schema version this build writes
pub const SCHEMA_VERSION: i32 = 1;

/// Migrations in order; index + 1 is the version they produce
const MIGRATIONS: &[&str] = &[
    // Version 1: session identity + failure queue
    r#"
    -- Session identity: string-valued key/value pairs
    CREATE TABLE IF NOT EXISTS session_state (
        key              TEXT PRIMARY KEY,
        value            TEXT NOT NULL
    );

    -- Records that failed transport, replayed by the retry sweep.
    -- FIFO within a kind follows the autoincrement id.
    CREATE TABLE IF NOT EXISTS failed_records (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        kind             TEXT NOT NULL,
        payload          JSON NOT NULL,
        queued_at        DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_failed_records_kind ON failed_records(kind, id);
    "#,
];

/// Apply every migration newer than the database's recorded version
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Schema version recorded in the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["session_state", "failed_records"] {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }
}
