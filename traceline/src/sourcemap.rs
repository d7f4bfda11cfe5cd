//! Pluggable stack-frame resolution
//!
//! When the `sourcemap` option is on, error stack frames are passed through a
//! [`FrameResolver`] before the record is built, so minified locations can be
//! rewritten to original sources. The SDK ships only the passthrough
//! implementation; a host that wants real symbolication registers its own
//! resolver on the builder.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::record::StackFrame;

/// Derives the source-map URL for a script file name
pub type SourceMapUrlFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Default derivation: the script URL suffixed with `.map`
pub fn default_source_map_url() -> SourceMapUrlFn {
    Arc::new(|file| format!("{}.map", file))
}

/// Rewrites stack frames using an external mapping resource
///
/// A resolver error counts as a record-construction failure: the engine
/// falls back to a minimal error record rather than surfacing anything to
/// the caller.
#[async_trait]
pub trait FrameResolver: Send + Sync {
    async fn resolve(
        &self,
        frames: Vec<StackFrame>,
        source_map_url: &SourceMapUrlFn,
    ) -> Result<Vec<StackFrame>>;
}

/// Resolver that leaves frames untouched
pub struct PassthroughResolver;

#[async_trait]
impl FrameResolver for PassthroughResolver {
    async fn resolve(
        &self,
        frames: Vec<StackFrame>,
        _source_map_url: &SourceMapUrlFn,
    ) -> Result<Vec<StackFrame>> {
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_source_map_url() {
        let derive = default_source_map_url();
        assert_eq!(derive("https://cdn.example.com/app.js"), "https://cdn.example.com/app.js.map");
    }

    #[tokio::test]
    async fn test_passthrough_keeps_frames() {
        let frames = vec![StackFrame {
            function_name: Some("main".to_string()),
            file_name: Some("app.js".to_string()),
            line_number: Some(1),
            column_number: Some(1),
        }];

        let resolved = PassthroughResolver
            .resolve(frames.clone(), &default_source_map_url())
            .await
            .unwrap();

        assert_eq!(resolved, frames);
    }
}
