//! Public tracker facade
//!
//! A [`Tracker`] is the host-facing handle over the session engine. It is an
//! explicit context object: build one per application, clone the handle
//! freely, pass it to whatever needs to report. Hosts wire their own global
//! hooks (error handlers, page-leave, connectivity) to the `notify_*` /
//! `handle_uncaught` methods; nothing here touches global state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::config::TrackerConfig;
use crate::context::{HostEnvironment, StaticEnvironment};
use crate::crypto::{AesGcmCipher, Cipher, DEFAULT_ENCRYPTION_KEY};
use crate::db::{Database, FailureQueue, IdentityStore};
use crate::debounce::Debouncer;
use crate::engine::{
    DeliveryOutcome, DeliveryStats, OnTrack, SessionEngine, RETRY_SWEEP_INTERVAL,
    SESSION_CHECK_WINDOW,
};
use crate::error::Result;
use crate::record::ErrorInput;
use crate::sourcemap::{default_source_map_url, FrameResolver, PassthroughResolver, SourceMapUrlFn};
use crate::transport::{HttpTransport, Transport};

/// Handle to a session engine instance
#[derive(Clone)]
pub struct Tracker {
    engine: Arc<SessionEngine>,
    debouncer: Arc<Debouncer>,
    timers_started: Arc<AtomicBool>,
}

impl Tracker {
    /// Start building a tracker for the given configuration
    pub fn builder(config: TrackerConfig) -> TrackerBuilder {
        TrackerBuilder {
            config,
            transport: None,
            cipher: None,
            identity: None,
            queue: None,
            environment: None,
            resolver: None,
            on_track: None,
            source_map_url: None,
        }
    }

    /// Resolve the session identity, drain anything buffered so far and
    /// start the background timers. Calling again on a live session emits
    /// `app.reload` and keeps the session id.
    pub async fn init(&self) {
        self.engine.init().await;
        self.spawn_timers();
    }

    /// Track a named event. Never fails; the outcome says what happened.
    pub async fn track(&self, name: &str, data: Option<Value>) -> DeliveryOutcome {
        self.debouncer.trigger();
        self.engine.track(name, data).await
    }

    /// Capture an error. Accepts anything error-shaped: `&str`, `String` or
    /// a hand-built [`ErrorInput`] (use [`ErrorInput::from_error`] for
    /// `std::error::Error` values).
    pub async fn error(
        &self,
        input: impl Into<ErrorInput>,
        data: Option<Value>,
    ) -> DeliveryOutcome {
        self.debouncer.trigger();
        self.engine.error(input.into(), data).await
    }

    /// Capture an error that reached a global handler rather than an
    /// explicit call site
    pub async fn uncaught_error(
        &self,
        input: impl Into<ErrorInput>,
        data: Option<Value>,
    ) -> DeliveryOutcome {
        self.debouncer.trigger();
        self.engine.uncaught_error(input.into(), data).await
    }

    /// Capture a warning. Dropped when warning tracking is disabled.
    pub async fn warning(&self, input: impl Into<ErrorInput>) -> DeliveryOutcome {
        self.debouncer.trigger();
        self.engine.warning(input.into()).await
    }

    /// End the current session and clear the persisted identity. A new
    /// session starts only on the next [`Tracker::init`].
    pub async fn terminate(&self) -> DeliveryOutcome {
        self.engine.terminate().await
    }

    /// Wiring point for the host's global error/rejection listeners.
    /// Honors the `capture_uncaught_errors` toggle.
    pub async fn handle_uncaught(
        &self,
        input: impl Into<ErrorInput>,
        data: Option<Value>,
    ) -> DeliveryOutcome {
        if !self.engine.config().capture_uncaught_errors {
            return DeliveryOutcome::Dropped("uncaught capture disabled".to_string());
        }
        self.uncaught_error(input, data).await
    }

    /// Wiring point for the host's page-leave hook; emits `app.closed`
    pub async fn notify_page_close(&self) -> DeliveryOutcome {
        if !self.engine.config().capture_page_close {
            return DeliveryOutcome::Dropped("page-close capture disabled".to_string());
        }
        self.track("app.closed", None).await
    }

    /// Wiring point for the host's navigation hook; emits `page.changed`
    pub async fn notify_navigation(&self, to: &str) -> DeliveryOutcome {
        if !self.engine.config().capture_navigation {
            return DeliveryOutcome::Dropped("navigation capture disabled".to_string());
        }
        self.track("page.changed", Some(json!({ "url": to }))).await
    }

    /// Wiring point for the host's connectivity hook: replays the durable
    /// failure queue immediately
    pub async fn notify_online(&self) {
        self.engine.retry_sweep().await;
    }

    /// Force a retry sweep (same path the periodic timer takes)
    pub async fn retry_sweep(&self) {
        self.engine.retry_sweep().await;
    }

    /// Evaluate session expiry as of `now`. The background timer calls this
    /// with the wall clock; exposed for hosts that drive time themselves.
    pub async fn check_session_timeout_at(&self, now: DateTime<Utc>) {
        self.engine.check_session_timeout_at(now).await;
    }

    /// Current in-memory session id
    pub fn session_id(&self) -> Option<String> {
        self.engine.session_id()
    }

    /// Delivery counters since construction
    pub fn stats(&self) -> DeliveryStats {
        self.engine.stats()
    }

    fn spawn_timers(&self) {
        if self.timers_started.swap(true, Ordering::SeqCst) {
            return;
        }

        // Coalesced timeout check: activity and the recurring trigger below
        // both feed the same debouncer.
        let debouncer = self.debouncer.clone();
        let engine = Arc::downgrade(&self.engine);
        tokio::spawn(async move {
            loop {
                debouncer.tick().await;
                match engine.upgrade() {
                    Some(engine) => engine.check_session_timeout().await,
                    None => break,
                }
            }
        });

        // Recurring trigger so idle sessions still get checked
        let debouncer = self.debouncer.clone();
        let engine = Arc::downgrade(&self.engine);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_CHECK_WINDOW);
            loop {
                interval.tick().await;
                if engine.upgrade().is_none() {
                    break;
                }
                debouncer.trigger();
            }
        });

        // Periodic replay of the durable failure queue
        let engine = Arc::downgrade(&self.engine);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(RETRY_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                match engine.upgrade() {
                    Some(engine) => engine.retry_sweep().await,
                    None => break,
                }
            }
        });
    }
}

/// Builder wiring a [`Tracker`] with optional collaborator overrides
///
/// Defaults: reqwest transport against `config.api_url`, AES-GCM payload
/// encryption, the SQLite store at the XDG data path (shared by identity and
/// failure queue), a static environment and the passthrough frame resolver.
pub struct TrackerBuilder {
    config: TrackerConfig,
    transport: Option<Arc<dyn Transport>>,
    cipher: Option<Arc<dyn Cipher>>,
    identity: Option<Arc<dyn IdentityStore>>,
    queue: Option<Arc<dyn FailureQueue>>,
    environment: Option<Arc<dyn HostEnvironment>>,
    resolver: Option<Arc<dyn FrameResolver>>,
    on_track: Option<OnTrack>,
    source_map_url: Option<SourceMapUrlFn>,
}

impl TrackerBuilder {
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn with_identity_store(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.identity = Some(store);
        self
    }

    pub fn with_failure_queue(mut self, queue: Arc<dyn FailureQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_environment(mut self, environment: Arc<dyn HostEnvironment>) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn with_frame_resolver(mut self, resolver: Arc<dyn FrameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Observe every event tracked while ready, before it is sent
    pub fn on_track(mut self, callback: impl Fn(&str, Option<&Value>) + Send + Sync + 'static) -> Self {
        self.on_track = Some(Arc::new(callback));
        self
    }

    /// Override how source-map URLs are derived from script file names
    pub fn source_map_url(mut self, derive: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.source_map_url = Some(Arc::new(derive));
        self
    }

    /// Validate the configuration and assemble the tracker. The engine stays
    /// uninitialized until [`Tracker::init`]; calls before that buffer.
    pub fn build(self) -> Result<Tracker> {
        self.config.validate()?;

        let (identity, queue): (Arc<dyn IdentityStore>, Arc<dyn FailureQueue>) =
            match (self.identity, self.queue) {
                (Some(identity), Some(queue)) => (identity, queue),
                (identity, queue) => {
                    let db = match Database::open(&TrackerConfig::database_path()) {
                        Ok(db) => db,
                        Err(e) => {
                            tracing::warn!(error = %e, "durable store unavailable, falling back to in-memory storage");
                            Database::open_in_memory()?
                        }
                    };
                    db.migrate()?;
                    let db = Arc::new(db);
                    (
                        identity.unwrap_or_else(|| db.clone()),
                        queue.unwrap_or_else(|| db),
                    )
                }
            };

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(
                &self.config.api_url,
                Duration::from_secs(self.config.request_timeout_secs),
            )?),
        };

        let cipher: Arc<dyn Cipher> = match self.cipher {
            Some(cipher) => cipher,
            None => Arc::new(AesGcmCipher::new(
                self.config
                    .encryption_key
                    .as_deref()
                    .unwrap_or(DEFAULT_ENCRYPTION_KEY),
            )),
        };

        let environment = self
            .environment
            .unwrap_or_else(|| Arc::new(StaticEnvironment::default()));
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(PassthroughResolver));
        let source_map_url = self.source_map_url.unwrap_or_else(default_source_map_url);

        let engine = Arc::new(SessionEngine::new(
            self.config,
            transport,
            cipher,
            identity,
            queue,
            environment,
            resolver,
            source_map_url,
            self.on_track,
        ));

        Ok(Tracker {
            engine,
            debouncer: Arc::new(Debouncer::new(SESSION_CHECK_WINDOW)),
            timers_started: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Build and immediately initialize
    pub async fn start(self) -> Result<Tracker> {
        let tracker = self.build()?;
        tracker.init().await;
        Ok(tracker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory_db() -> Arc<Database> {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        Arc::new(db)
    }

    #[test]
    fn test_build_requires_api_key() {
        let result = Tracker::builder(TrackerConfig::new("")).build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_calls_before_init_are_buffered() {
        let db = in_memory_db();
        let tracker = Tracker::builder(TrackerConfig::new("tl_live_test"))
            .with_identity_store(db.clone())
            .with_failure_queue(db)
            .build()
            .unwrap();

        assert!(tracker.session_id().is_none());
        let outcome = tracker.track("early", None).await;
        assert_eq!(outcome, DeliveryOutcome::Buffered);
        assert_eq!(tracker.stats().buffered, 1);
    }
}
