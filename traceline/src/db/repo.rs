//! SQLite-backed implementation of the storage contracts

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::{FailureQueue, IdentityStore, PersistedIdentity, QueuedRecord};
use crate::error::Result;
use crate::record::RecordKind;

/// Key for the persisted session id
pub const SESSION_ID_KEY: &str = "session_id";

/// Key for the persisted last-activity timestamp (epoch millis as text)
pub const LAST_ACTIVITY_KEY: &str = "last_activity_at";

/// Database handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database file, creating it (and its directory) on first use
    pub fn open(path: &PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database: tests, and the fallback when the data directory
    /// is unavailable
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Bring the schema up to date
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    fn get_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM session_state WHERE key = ?",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_value(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO session_state (key, value)
            VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![key, value],
        )?;
        Ok(())
    }
}

impl IdentityStore for Database {
    fn load(&self) -> Result<PersistedIdentity> {
        let session_id = self.get_value(SESSION_ID_KEY)?;
        let last_activity_at = self
            .get_value(LAST_ACTIVITY_KEY)?
            .and_then(|raw| raw.parse::<i64>().ok());

        Ok(PersistedIdentity {
            session_id,
            last_activity_at,
        })
    }

    fn set_session_id(&self, id: &str) -> Result<()> {
        self.set_value(SESSION_ID_KEY, id)
    }

    fn set_last_activity(&self, at_ms: i64) -> Result<()> {
        self.set_value(LAST_ACTIVITY_KEY, &at_ms.to_string())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM session_state WHERE key IN (?1, ?2)",
            params![SESSION_ID_KEY, LAST_ACTIVITY_KEY],
        )?;
        Ok(())
    }
}

impl FailureQueue for Database {
    fn append(&self, kind: RecordKind, payload: &Value) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO failed_records (kind, payload, queued_at) VALUES (?1, ?2, ?3)",
            params![
                kind.as_str(),
                payload.to_string(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn list_all(&self, kind: RecordKind) -> Result<Vec<QueuedRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id, payload FROM failed_records WHERE kind = ? ORDER BY id ASC")?;

        let rows = stmt.query_map([kind.as_str()], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, raw) = row?;
            let payload: Value = serde_json::from_str(&raw)?;
            records.push(QueuedRecord { id, payload });
        }

        Ok(records)
    }

    fn delete(&self, kind: RecordKind, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM failed_records WHERE kind = ?1 AND id = ?2",
            params![kind.as_str(), id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_identity_roundtrip() {
        let db = open_db();

        let identity = db.load().unwrap();
        assert!(identity.session_id.is_none());
        assert!(identity.last_activity_at.is_none());

        db.set_session_id("abc123").unwrap();
        db.set_last_activity(1_700_000_000_000).unwrap();

        let identity = db.load().unwrap();
        assert_eq!(identity.session_id.as_deref(), Some("abc123"));
        assert_eq!(identity.last_activity_at, Some(1_700_000_000_000));
    }

    #[test]
    fn test_identity_overwrite_and_clear() {
        let db = open_db();

        db.set_session_id("first").unwrap();
        db.set_session_id("second").unwrap();
        db.set_last_activity(1).unwrap();

        let identity = db.load().unwrap();
        assert_eq!(identity.session_id.as_deref(), Some("second"));

        db.clear().unwrap();
        let identity = db.load().unwrap();
        assert!(identity.session_id.is_none());
        assert!(identity.last_activity_at.is_none());
    }

    #[test]
    fn test_unparseable_timestamp_ignored() {
        let db = open_db();
        db.set_value(LAST_ACTIVITY_KEY, "not-a-number").unwrap();

        let identity = db.load().unwrap();
        assert!(identity.last_activity_at.is_none());
    }

    #[test]
    fn test_queue_fifo_within_kind() {
        let db = open_db();

        db.append(RecordKind::Event, &json!({ "name": "first" }))
            .unwrap();
        db.append(RecordKind::Event, &json!({ "name": "second" }))
            .unwrap();
        db.append(RecordKind::Error, &json!({ "title": "boom" }))
            .unwrap();

        let events = db.list_all(RecordKind::Event).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].payload["name"], "first");
        assert_eq!(events[1].payload["name"], "second");
        assert!(events[0].id < events[1].id);

        let errors = db.list_all(RecordKind::Error).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].payload["title"], "boom");
    }

    #[test]
    fn test_queue_delete() {
        let db = open_db();

        let id = db
            .append(RecordKind::Event, &json!({ "name": "only" }))
            .unwrap();
        assert_eq!(db.list_all(RecordKind::Event).unwrap().len(), 1);

        db.delete(RecordKind::Event, id).unwrap();
        assert!(db.list_all(RecordKind::Event).unwrap().is_empty());

        // Deleting an id under the wrong kind must not touch other records
        let id = db
            .append(RecordKind::Error, &json!({ "title": "kept" }))
            .unwrap();
        db.delete(RecordKind::Event, id).unwrap();
        assert_eq!(db.list_all(RecordKind::Error).unwrap().len(), 1);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/stores/traceline.db");

        let db = Database::open(&path).unwrap();
        db.migrate().unwrap();
        db.set_session_id("persisted").unwrap();
        drop(db);

        let db = Database::open(&path).unwrap();
        db.migrate().unwrap();
        assert_eq!(db.load().unwrap().session_id.as_deref(), Some("persisted"));
    }
}
