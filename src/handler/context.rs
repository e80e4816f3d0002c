//! Per-call metadata and context.
//!
//! [`CallContext`] is handed to every handler invocation. It carries the
//! call's [`CallMetadata`], the peer address, the negotiated content types and
//! an optional deadline. Cancellation is cooperative: the context reports
//! cancellation once the deadline passes or the call completes, and handlers
//! that may block for long should observe it.
//!
//! # Example
//!
//! ```ignore
//! async fn slow(ctx: CallContext, req: Job) -> Result<JobResult, HandlerError> {
//!     match ctx.run_until_cancelled(do_work(req)).await {
//!         Some(result) => result,
//!         None => Err(HandlerError::business(408, "deadline exceeded")),
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::transport::IncomingMetadata;

/// Metadata key carrying the call timeout in nanoseconds.
pub const TIMEOUT_KEY: &str = "timeout";
/// Metadata key for the protocol content type.
pub const X_CONTENT_TYPE_KEY: &str = "x-content-type";
/// Metadata key for the payload content type.
pub const CONTENT_TYPE_KEY: &str = "content-type";
/// Metadata key the dispatcher fills with the peer address.
pub const REMOTE_KEY: &str = "Remote";

/// Single-valued call metadata with case-sensitive keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallMetadata(HashMap<String, String>);

impl CallMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flatten transport metadata; multiple values are joined with `", "`.
    pub fn from_incoming(incoming: &IncomingMetadata) -> Self {
        incoming
            .iter()
            .map(|(k, values)| (k.to_string(), values.join(", ")))
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CallMetadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

struct Inner {
    method: String,
    metadata: CallMetadata,
    peer: Option<SocketAddr>,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

/// Context passed to handlers for the lifetime of one call.
///
/// `CallContext` is `Clone`; clones share the same metadata, deadline and
/// cancellation state.
#[derive(Clone)]
pub struct CallContext {
    inner: Arc<Inner>,
}

impl CallContext {
    /// Build a context for `method` (routing key, e.g. `Echo.Say`).
    pub fn new(method: impl Into<String>, metadata: CallMetadata) -> Self {
        Self::build(method.into(), metadata, None, None)
    }

    pub(crate) fn build(
        method: String,
        metadata: CallMetadata,
        peer: Option<SocketAddr>,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                method,
                metadata,
                peer,
                deadline,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Same context with a deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let inner = match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            Err(shared) => Inner {
                method: shared.method.clone(),
                metadata: shared.metadata.clone(),
                peer: shared.peer,
                deadline: shared.deadline,
                cancel: shared.cancel.clone(),
            },
        };
        Self {
            inner: Arc::new(Inner {
                deadline: Some(Instant::now() + timeout),
                ..inner
            }),
        }
    }

    /// Routing key of the call.
    #[inline]
    pub fn method(&self) -> &str {
        &self.inner.method
    }

    #[inline]
    pub fn metadata(&self) -> &CallMetadata {
        &self.inner.metadata
    }

    /// Metadata value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.metadata.get(key)
    }

    /// Protocol content type (`x-content-type` after negotiation).
    pub fn content_type(&self) -> Option<&str> {
        self.get(X_CONTENT_TYPE_KEY)
    }

    /// Payload content type (`content-type` after negotiation).
    pub fn payload_content_type(&self) -> Option<&str> {
        self.get(CONTENT_TYPE_KEY)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the deadline; `None` without a deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Whether the call is over: deadline passed or call completed.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
            || self.inner.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.inner.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.inner.cancel.cancelled().await,
        }
    }

    /// Run `fut` unless the context is cancelled first.
    pub async fn run_until_cancelled<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Cancel the context now.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    /// Guard that cancels the context when dropped.
    pub(crate) fn cancel_on_drop(&self) -> DropGuard {
        self.inner.cancel.clone().drop_guard()
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("method", &self.inner.method)
            .field("metadata", &self.inner.metadata)
            .field("peer", &self.inner.peer)
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_joins_multi_values() {
        let incoming: IncomingMetadata = [("accept", "a"), ("accept", "b"), ("x-id", "7")]
            .into_iter()
            .collect();

        let md = CallMetadata::from_incoming(&incoming);
        assert_eq!(md.get("accept"), Some("a, b"));
        assert_eq!(md.get("x-id"), Some("7"));
        assert_eq!(md.len(), 2);
    }

    #[test]
    fn test_metadata_keys_case_sensitive() {
        let mut md = CallMetadata::new();
        md.insert("Remote", "1.2.3.4:5");
        assert!(md.contains_key("Remote"));
        assert!(!md.contains_key("remote"));
    }

    #[test]
    fn test_context_without_deadline() {
        let ctx = CallContext::new("Echo.Say", CallMetadata::new());
        assert_eq!(ctx.method(), "Echo.Say");
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_context_clone_shares_cancellation() {
        let ctx = CallContext::new("Echo.Say", CallMetadata::new());
        let clone = ctx.clone();
        ctx.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_drop_guard_cancels() {
        let ctx = CallContext::new("Echo.Say", CallMetadata::new());
        {
            let _guard = ctx.cancel_on_drop();
            assert!(!ctx.is_cancelled());
        }
        assert!(ctx.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_context() {
        let ctx = CallContext::new("Echo.Say", CallMetadata::new())
            .with_timeout(Duration::from_millis(1));
        assert!(!ctx.is_cancelled());

        ctx.cancelled().await;
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_cancelled() {
        let ctx = CallContext::new("Echo.Say", CallMetadata::new())
            .with_timeout(Duration::from_millis(5));

        let quick = ctx.run_until_cancelled(async { 1 }).await;
        assert_eq!(quick, Some(1));

        let slow = ctx
            .run_until_cancelled(tokio::time::sleep(Duration::from_secs(1)))
            .await;
        assert!(slow.is_none());
    }
}
