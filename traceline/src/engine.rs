//! Session & delivery lifecycle engine
//!
//! The engine owns the session identity, the pre-init buffer and the
//! send-vs-queue decision. Lifecycle:
//!
//! ```text
//! Uninitialized --init--> Initializing --identity resolved--> Ready
//!                                                               |
//!                                                          terminate
//!                                                               v
//!                                                          Terminated
//! ```
//!
//! Records submitted before `Ready` wait in an in-memory FIFO and are
//! drained through the normal send path once the session identity is
//! resolved. A record that fails transport moves to the durable failure
//! queue and is replayed by [`SessionEngine::retry_sweep`]. Nothing in here
//! surfaces runtime failures to the caller; every entry point resolves to a
//! [`DeliveryOutcome`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde_json::{json, Value};

use crate::config::TrackerConfig;
use crate::context::{self, HostEnvironment};
use crate::crypto::Cipher;
use crate::db::{FailureQueue, IdentityStore};
use crate::error::Result;
use crate::record::{
    Envelope, ErrorBody, ErrorInput, EventBody, OutboundRecord, RecordBody, RecordKind,
};
use crate::sourcemap::{FrameResolver, SourceMapUrlFn};
use crate::transport::Transport;

/// Length of generated session id tokens
pub const SESSION_ID_LEN: usize = 64;

/// Window for the coalesced session-timeout check
pub const SESSION_CHECK_WINDOW: Duration = Duration::from_secs(10);

/// Interval between retry sweeps over the durable failure queue
pub const RETRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Observer invoked synchronously for every event tracked while ready
pub type OnTrack = Arc<dyn Fn(&str, Option<&Value>) + Send + Sync>;

/// What happened to a submitted record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Accepted by the collection endpoint
    Delivered,
    /// Held in the pre-init buffer, sent when the engine reaches ready
    Buffered,
    /// Transport failed; persisted to the failure queue for the next sweep
    Queued,
    /// Not sent and not recoverable, with the reason
    Dropped(String),
}

/// Counters over everything the engine has handled
#[derive(Debug, Default, Clone, Copy)]
pub struct DeliveryStats {
    pub delivered: usize,
    pub buffered: usize,
    pub queued: usize,
    pub dropped: usize,
    /// Records confirmed and removed by the retry sweep
    pub replayed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Initializing,
    Ready,
    Terminated,
}

impl Phase {
    /// Terminated still sends: identity is cleared but stray calls must not
    /// land back in the pre-init buffer.
    fn accepts_live_sends(self) -> bool {
        matches!(self, Phase::Ready | Phase::Terminated)
    }
}

struct PendingRecord {
    kind: RecordKind,
    body: RecordBody,
}

struct EngineState {
    phase: Phase,
    session_id: Option<String>,
    last_activity_at: Option<i64>,
    pending: VecDeque<PendingRecord>,
}

/// The core engine. One per host application; construct through
/// [`Tracker`](crate::Tracker).
pub(crate) struct SessionEngine {
    config: TrackerConfig,
    transport: Arc<dyn Transport>,
    cipher: Arc<dyn Cipher>,
    store: Arc<dyn IdentityStore>,
    queue: Arc<dyn FailureQueue>,
    env: Arc<dyn HostEnvironment>,
    resolver: Arc<dyn FrameResolver>,
    source_map_url: SourceMapUrlFn,
    on_track: Option<OnTrack>,
    state: Mutex<EngineState>,
    stats: Mutex<DeliveryStats>,
    /// Serializes sweeps so an online burst cannot replay the queue twice
    sweep_gate: tokio::sync::Mutex<()>,
}

/// Generate a fresh session token: 64 random alphanumeric characters.
/// Uniqueness-sensitive only, not a secret.
pub fn generate_session_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

impl SessionEngine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: TrackerConfig,
        transport: Arc<dyn Transport>,
        cipher: Arc<dyn Cipher>,
        store: Arc<dyn IdentityStore>,
        queue: Arc<dyn FailureQueue>,
        env: Arc<dyn HostEnvironment>,
        resolver: Arc<dyn FrameResolver>,
        source_map_url: SourceMapUrlFn,
        on_track: Option<OnTrack>,
    ) -> Self {
        Self {
            config,
            transport,
            cipher,
            store,
            queue,
            env,
            resolver,
            source_map_url,
            on_track,
            state: Mutex::new(EngineState {
                phase: Phase::Uninitialized,
                session_id: None,
                last_activity_at: None,
                pending: VecDeque::new(),
            }),
            stats: Mutex::new(DeliveryStats::default()),
            sweep_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub(crate) fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Resolve the session identity and reach ready
    ///
    /// With no persisted identity a new session is created and
    /// `session.started` goes through the normal track path (so it queues
    /// behind anything buffered earlier). With a surviving identity the
    /// buffer is drained first, then `app.reload` is emitted live.
    pub(crate) async fn init(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.phase == Phase::Initializing {
                return;
            }
            state.phase = Phase::Initializing;
        }

        let persisted = match self.store.load() {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(error = %e, "identity store unavailable, starting in-memory session");
                Default::default()
            }
        };

        match persisted.session_id {
            Some(id) => {
                tracing::debug!(session_id = %id, "resuming persisted session");
                {
                    let mut state = self.state.lock().unwrap();
                    state.session_id = Some(id);
                    state.last_activity_at = persisted.last_activity_at;
                    state.phase = Phase::Ready;
                }
                if persisted.last_activity_at.is_none() {
                    // a persisted id never goes without a timestamp
                    self.touch_activity();
                }
                self.drain_pending().await;
                self.track("app.reload", None).await;
            }
            None => {
                self.rotate_session().await;
                self.state.lock().unwrap().phase = Phase::Ready;
                self.drain_pending().await;
            }
        }
    }

    /// Track a named event
    pub(crate) async fn track(&self, name: &str, data: Option<Value>) -> DeliveryOutcome {
        {
            let mut state = self.state.lock().unwrap();
            if !state.phase.accepts_live_sends() {
                state.pending.push_back(PendingRecord {
                    kind: RecordKind::Event,
                    body: RecordBody::Event(EventBody {
                        name: name.to_string(),
                        data,
                    }),
                });
                return self.note(DeliveryOutcome::Buffered);
            }
        }

        self.touch_activity();

        if let Some(on_track) = &self.on_track {
            on_track(name, data.as_ref());
        }

        let body = RecordBody::Event(EventBody {
            name: name.to_string(),
            data,
        });
        let outcome = self.dispatch(RecordKind::Event, body).await;
        self.note(outcome)
    }

    /// Capture an explicitly reported error
    pub(crate) async fn error(&self, input: ErrorInput, data: Option<Value>) -> DeliveryOutcome {
        self.report(input, data, None, false).await
    }

    /// Capture an error that reached the host's global handlers
    pub(crate) async fn uncaught_error(
        &self,
        input: ErrorInput,
        data: Option<Value>,
    ) -> DeliveryOutcome {
        self.report(input, data, None, true).await
    }

    /// Capture a warning-severity error
    pub(crate) async fn warning(&self, input: ErrorInput) -> DeliveryOutcome {
        if !self.config.track_warnings {
            return self.note(DeliveryOutcome::Dropped(
                "warning tracking disabled".to_string(),
            ));
        }
        self.report(input, None, Some("warning"), false).await
    }

    async fn report(
        &self,
        input: ErrorInput,
        data: Option<Value>,
        severity: Option<&str>,
        uncaught: bool,
    ) -> DeliveryOutcome {
        let body = match self.build_error_body(input, data, severity, uncaught).await {
            Ok(body) => body,
            Err(e) => {
                // Last-resort path: ship the construction failure itself,
                // the original detail is gone.
                tracing::warn!(error = %e, "error record construction failed, sending minimal record");
                ErrorBody {
                    title: e.to_string(),
                    trace: None,
                    stack: None,
                    severity: severity.map(str::to_string),
                    uncaught: uncaught.then_some(true),
                    data: None,
                }
            }
        };

        {
            let mut state = self.state.lock().unwrap();
            if !state.phase.accepts_live_sends() {
                state.pending.push_back(PendingRecord {
                    kind: RecordKind::Error,
                    body: RecordBody::Error(body),
                });
                return self.note(DeliveryOutcome::Buffered);
            }
        }

        self.touch_activity();

        let outcome = self.dispatch(RecordKind::Error, RecordBody::Error(body)).await;
        self.note(outcome)
    }

    async fn build_error_body(
        &self,
        input: ErrorInput,
        data: Option<Value>,
        severity: Option<&str>,
        uncaught: bool,
    ) -> Result<ErrorBody> {
        let ErrorInput {
            title,
            trace,
            frames,
        } = input;

        let stack = match (self.config.sourcemap, frames) {
            (true, Some(frames)) => Some(self.resolver.resolve(frames, &self.source_map_url).await?),
            (_, frames) => frames,
        };

        Ok(ErrorBody {
            title,
            trace,
            stack,
            severity: severity.map(str::to_string),
            uncaught: uncaught.then_some(true),
            data,
        })
    }

    /// End the current session: emit `session.ended` and clear the persisted
    /// identity. No-op unless ready.
    pub(crate) async fn terminate(&self) -> DeliveryOutcome {
        {
            let mut state = self.state.lock().unwrap();
            if state.phase != Phase::Ready {
                return DeliveryOutcome::Dropped("not initialized".to_string());
            }
            state.phase = Phase::Terminated;
        }

        let outcome = self.track("session.ended", None).await;

        self.state.lock().unwrap().last_activity_at = None;
        if let Err(e) = self.store.clear() {
            tracing::warn!(error = %e, "failed to clear persisted session");
        }

        outcome
    }

    /// Evaluate session expiry against the wall clock
    pub(crate) async fn check_session_timeout(&self) {
        self.check_session_timeout_at(Utc::now()).await;
    }

    /// Evaluate session expiry as of `now`
    ///
    /// Rotates at most once per evaluation, whether the trigger was elapsed
    /// inactivity or a local-day boundary.
    pub(crate) async fn check_session_timeout_at(&self, now: DateTime<Utc>) {
        let last_activity = {
            let state = self.state.lock().unwrap();
            if state.phase != Phase::Ready {
                return;
            }
            match state.last_activity_at {
                Some(at) => at,
                None => return,
            }
        };

        let timeout_ms = self.config.session_timeout_secs as i64 * 1000;
        let expired = now.timestamp_millis() - last_activity > timeout_ms;
        let day_rolled =
            self.config.new_day_new_session && local_day(last_activity) != local_day(now.timestamp_millis());

        if !(expired || day_rolled) {
            return;
        }

        tracing::info!(expired, day_rolled, "session expired, rotating identity");
        self.track("session.timeout", None).await;
        self.rotate_session().await;
    }

    /// Mint a new session id, persist it and announce `session.started`
    async fn rotate_session(&self) {
        let id = generate_session_id();

        self.state.lock().unwrap().session_id = Some(id.clone());
        if let Err(e) = self.store.set_session_id(&id) {
            tracing::warn!(error = %e, "failed to persist session id");
        }
        self.touch_activity();

        self.track("session.started", None).await;
    }

    /// Replay the durable failure queue through the transmit path
    ///
    /// Runs on the periodic sweep timer and on the host's online hook.
    /// Successful records are deleted; failures stay queued for the next
    /// sweep. FIFO within a kind, no ordering across kinds.
    pub(crate) async fn retry_sweep(&self) {
        if !self.env.is_online() {
            return;
        }

        let _gate = match self.sweep_gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => return,
        };

        for kind in [RecordKind::Event, RecordKind::Error] {
            let records = match self.queue.list_all(kind) {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(kind = kind.as_str(), error = %e, "failed to list queued records");
                    continue;
                }
            };

            for record in records {
                match self.transmit(kind, &record.payload).await {
                    Ok(()) => {
                        if let Err(e) = self.queue.delete(kind, record.id) {
                            tracing::warn!(kind = kind.as_str(), id = record.id, error = %e,
                                "replayed record could not be deleted, it may be resent");
                        } else {
                            self.stats.lock().unwrap().replayed += 1;
                            tracing::debug!(kind = kind.as_str(), id = record.id, "replayed queued record");
                        }
                    }
                    Err(e) => {
                        tracing::debug!(kind = kind.as_str(), id = record.id, error = %e,
                            "resend failed, record stays queued");
                    }
                }
            }
        }
    }

    /// Current session id, if a session exists in memory
    pub(crate) fn session_id(&self) -> Option<String> {
        self.state.lock().unwrap().session_id.clone()
    }

    pub(crate) fn stats(&self) -> DeliveryStats {
        *self.stats.lock().unwrap()
    }

    /// Deliver everything buffered before ready, strictly FIFO. Each item is
    /// attempted exactly once; failures follow the normal queue-on-failure
    /// path and never block later items.
    async fn drain_pending(&self) {
        loop {
            let next = self.state.lock().unwrap().pending.pop_front();
            let Some(PendingRecord { kind, body }) = next else {
                break;
            };

            let outcome = self.dispatch(kind, body).await;
            if let DeliveryOutcome::Dropped(reason) = &outcome {
                tracing::warn!(kind = kind.as_str(), reason = %reason, "buffered record dropped during drain");
            }
            self.note(outcome);
        }
    }

    /// Build the envelope + body, then send or queue
    async fn dispatch(&self, kind: RecordKind, body: RecordBody) -> DeliveryOutcome {
        let outbound = OutboundRecord {
            envelope: self.envelope(),
            body,
        };

        let payload = match serde_json::to_value(&outbound) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize record");
                return DeliveryOutcome::Dropped(format!("serialize: {}", e));
            }
        };

        match self.transmit(kind, &payload).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => {
                tracing::warn!(kind = kind.as_str(), error = %e, "send failed, persisting record for retry");
                match self.queue.append(kind, &payload) {
                    Ok(id) => {
                        tracing::debug!(kind = kind.as_str(), id, "record queued for retry");
                        DeliveryOutcome::Queued
                    }
                    Err(store_err) => {
                        tracing::error!(error = %store_err, "failure queue unavailable, dropping record");
                        DeliveryOutcome::Dropped(format!("queue append: {}", store_err))
                    }
                }
            }
        }
    }

    /// Seal and POST a prepared record. Used by live sends and the sweep;
    /// never appends to the queue itself.
    async fn transmit(&self, kind: RecordKind, payload: &Value) -> Result<()> {
        let plaintext = serde_json::to_string(payload)?;
        let sealed = self.cipher.seal(plaintext.as_bytes())?;
        self.transport
            .send(kind.collect_path(), &json!({ "p": sealed }))
            .await
    }

    /// Envelope snapshot at send time
    fn envelope(&self) -> Envelope {
        let session_id = self
            .state
            .lock()
            .unwrap()
            .session_id
            .clone()
            .unwrap_or_default();
        let snapshot = self.env.snapshot();

        Envelope {
            session_id,
            api_key: self.config.api_key.clone(),
            version: self.config.version.clone(),
            timestamp: Utc::now().timestamp_millis(),
            environment: self.config.environment,
            user: self.config.user.clone(),
            browser: context::browser_info(&snapshot.user_agent),
            language: snapshot.language.clone(),
            os: context::os_info(&snapshot.user_agent),
            ui: context::ui_info(&snapshot),
            request: context::request_info(&snapshot),
        }
    }

    fn touch_activity(&self) {
        let now = Utc::now().timestamp_millis();
        self.state.lock().unwrap().last_activity_at = Some(now);
        if let Err(e) = self.store.set_last_activity(now) {
            tracing::warn!(error = %e, "failed to persist activity timestamp");
        }
    }

    fn note(&self, outcome: DeliveryOutcome) -> DeliveryOutcome {
        {
            let mut stats = self.stats.lock().unwrap();
            match &outcome {
                DeliveryOutcome::Delivered => stats.delivered += 1,
                DeliveryOutcome::Buffered => stats.buffered += 1,
                DeliveryOutcome::Queued => stats.queued += 1,
                DeliveryOutcome::Dropped(_) => stats.dropped += 1,
            }
        }
        outcome
    }
}

/// Local calendar date of an epoch-millisecond timestamp
fn local_day(at_ms: i64) -> Option<NaiveDate> {
    Utc.timestamp_millis_opt(at_ms)
        .single()
        .map(|t| t.with_timezone(&Local).date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_64_alphanumeric() {
        let id = generate_session_id();
        assert_eq!(id.len(), SESSION_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(generate_session_id(), generate_session_id());
    }

    #[test]
    fn test_local_day_of_same_instant_matches() {
        let now = Utc::now().timestamp_millis();
        assert_eq!(local_day(now), local_day(now + 1));
    }

    #[test]
    fn test_phase_send_acceptance() {
        assert!(!Phase::Uninitialized.accepts_live_sends());
        assert!(!Phase::Initializing.accepts_live_sends());
        assert!(Phase::Ready.accepts_live_sends());
        assert!(Phase::Terminated.accepts_live_sends());
    }
}
