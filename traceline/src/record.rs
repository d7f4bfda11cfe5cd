//! Outbound record model
//!
//! Every tracked event or captured error is shipped as an [`OutboundRecord`]:
//! a common envelope (session, app and host descriptors, snapshotted at send
//! time) flattened together with a kind-specific body. Field names follow the
//! collection endpoint's camelCase wire schema.

use serde::Serialize;
use serde_json::Value;

use crate::config::Environment;
use crate::context::{BrowserInfo, OsInfo, RequestInfo, UiInfo};

/// The two record kinds, each with its own collect path and failure-queue
/// partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Event,
    Error,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Event => "event",
            RecordKind::Error => "error",
        }
    }

    /// Endpoint path records of this kind are POSTed to
    pub fn collect_path(&self) -> &'static str {
        match self {
            RecordKind::Event => "/events/collect",
            RecordKind::Error => "/errors/collect",
        }
    }
}

/// Common contextual fields attached to every outbound record
///
/// The envelope is built fresh for each delivery attempt of a live or
/// drained record; records replayed from the durable failure queue keep the
/// envelope of the attempt that originally failed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub session_id: String,
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Epoch milliseconds at envelope-snapshot time
    pub timestamp: i64,
    pub environment: Environment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
    pub browser: BrowserInfo,
    pub language: String,
    pub os: OsInfo,
    pub ui: UiInfo,
    pub request: RequestInfo,
}

/// A single parsed stack frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
}

/// Kind-specific part of an outbound record
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RecordBody {
    Event(EventBody),
    Error(ErrorBody),
}

/// Body of a tracked event
#[derive(Debug, Clone, Serialize)]
pub struct EventBody {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Body of a captured error or warning
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<StackFrame>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uncaught: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A fully prepared record: envelope plus body, flattened on the wire
#[derive(Debug, Clone, Serialize)]
pub struct OutboundRecord {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(flatten)]
    pub body: RecordBody,
}

/// Normalized error input accepted by the capture entry points
///
/// Anything error-shaped converts into this: proper `std::error::Error`
/// values (the source chain becomes the trace), plain strings, or a
/// hand-built value with pre-parsed frames.
#[derive(Debug, Clone, Default)]
pub struct ErrorInput {
    /// Human-readable message; becomes the record `title`
    pub title: String,
    /// Raw stack/trace text, if any
    pub trace: Option<String>,
    /// Structured stack frames, if the host parsed them
    pub frames: Option<Vec<StackFrame>>,
}

impl ErrorInput {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            trace: None,
            frames: None,
        }
    }

    /// Build from a `std::error::Error`, folding its source chain into the
    /// trace
    pub fn from_error(err: &dyn std::error::Error) -> Self {
        let mut trace = String::new();
        let mut source = err.source();
        while let Some(cause) = source {
            trace.push_str(&format!("caused by: {}\n", cause));
            source = cause.source();
        }

        ErrorInput {
            title: err.to_string(),
            trace: (!trace.is_empty()).then(|| trace.trim_end().to_string()),
            frames: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    pub fn with_frames(mut self, frames: Vec<StackFrame>) -> Self {
        self.frames = Some(frames);
        self
    }
}

impl From<&str> for ErrorInput {
    fn from(message: &str) -> Self {
        ErrorInput::new(message)
    }
}

impl From<String> for ErrorInput {
    fn from(message: String) -> Self {
        ErrorInput::new(message)
    }
}
