//! # traceline
//!
//! Client-side telemetry SDK: capture usage events and errors in a host
//! application and relay them to a remote collection endpoint, with a
//! persistent session identity and durable retry on failed sends.
//!
//! This library provides:
//! - A session lifecycle engine: identity persisted across restarts,
//!   inactivity/day-rollover rotation, pre-init buffering
//! - Encrypted delivery to the collection endpoint with a SQLite-backed
//!   failure queue replayed on connectivity
//! - Narrow collaborator traits (transport, cipher, stores, host
//!   environment, frame resolver) so every piece can be swapped or stubbed
//!
//! ## Example
//!
//! ```rust,no_run
//! use traceline::{Tracker, TrackerConfig};
//!
//! # async fn run() -> traceline::Result<()> {
//! let mut config = TrackerConfig::new("tl_live_xxxxxxxxxxxx");
//! config.version = Some("2.4.1".to_string());
//!
//! let tracker = Tracker::builder(config).start().await?;
//!
//! tracker.track("checkout.completed", None).await;
//! tracker.error("payment provider unreachable", None).await;
//! tracker.terminate().await;
//! # Ok(())
//! # }
//! ```
//!
//! Failures the SDK is designed to tolerate (offline, storage trouble,
//! malformed error values) never surface to the caller; every submission
//! resolves to a [`DeliveryOutcome`] and diagnostics go to `tracing`.

pub use config::{Environment, LoggingConfig, TrackerConfig};
pub use context::{EnvironmentSnapshot, HostEnvironment, StaticEnvironment};
pub use crypto::{AesGcmCipher, Cipher, DEFAULT_ENCRYPTION_KEY};
pub use db::{Database, FailureQueue, IdentityStore, PersistedIdentity, QueuedRecord};
pub use engine::{
    generate_session_id, DeliveryOutcome, DeliveryStats, RETRY_SWEEP_INTERVAL,
    SESSION_CHECK_WINDOW, SESSION_ID_LEN,
};
pub use error::{Error, Result};
pub use record::{ErrorInput, RecordKind, StackFrame};
pub use sourcemap::{FrameResolver, PassthroughResolver, SourceMapUrlFn};
pub use tracker::{Tracker, TrackerBuilder};
pub use transport::{HttpTransport, Transport};

pub mod config;
pub mod context;
pub mod crypto;
pub mod db;
pub mod debounce;
pub mod error;
pub mod logging;
pub mod record;
pub mod sourcemap;
pub mod transport;

mod engine;
mod tracker;
