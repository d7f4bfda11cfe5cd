//! Durable storage layer for traceline
//!
//! Two narrow contracts back the engine:
//! - [`IdentityStore`]: the persisted session id and last-activity timestamp
//! - [`FailureQueue`]: append/list/delete of records that failed transport
//!
//! The default backend is SQLite with schema migrations; hosts may supply
//! their own implementations of either trait.

pub mod repo;
pub mod schema;

pub use repo::Database;

use serde_json::Value;

use crate::error::Result;
use crate::record::RecordKind;

/// Persisted session identity, as read at startup
///
/// Both fields are stored as string values; expiry is logical (the timeout
/// check), never enforced by the storage layer.
#[derive(Debug, Clone, Default)]
pub struct PersistedIdentity {
    pub session_id: Option<String>,
    /// Epoch milliseconds of the most recent activity
    pub last_activity_at: Option<i64>,
}

/// Persisted session id + last-activity timestamp
pub trait IdentityStore: Send + Sync {
    fn load(&self) -> Result<PersistedIdentity>;

    fn set_session_id(&self, id: &str) -> Result<()>;

    fn set_last_activity(&self, at_ms: i64) -> Result<()>;

    /// Remove both keys
    fn clear(&self) -> Result<()>;
}

/// A failed-send record with its store-assigned id
#[derive(Debug, Clone)]
pub struct QueuedRecord {
    pub id: i64,
    /// The serialized outbound record exactly as it failed to send
    pub payload: Value,
}

/// Append-only store of records awaiting resend
///
/// Records are never mutated in place: appended on transport failure,
/// deleted only after a confirmed successful resend.
pub trait FailureQueue: Send + Sync {
    /// Returns the store-assigned id of the new record
    fn append(&self, kind: RecordKind, payload: &Value) -> Result<i64>;

    /// All queued records of `kind`, oldest first
    fn list_all(&self, kind: RecordKind) -> Result<Vec<QueuedRecord>>;

    fn delete(&self, kind: RecordKind, id: i64) -> Result<()>;
}
