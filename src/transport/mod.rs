//! Transport boundary.
//!
//! Framing, connection multiplexing and TLS belong to the transport. The
//! dispatcher only needs what [`ServerStream`] exposes for one call: the call
//! identity, incoming metadata, the peer address, and raw message payloads in
//! both directions. [`Acceptor`] hands new calls to the serve loop.
//!
//! [`StreamHandle`] wraps a call's stream with the negotiated codec and the
//! configured size limits; it is what stream handlers read and write through.
//!
//! - [`mem`] - in-process transport over tokio channels

pub mod mem;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::Codec;
use crate::error::{Result, RpcError};
use crate::status::Status;

/// One inbound call as exposed by the transport.
///
/// Implementations are shared between the dispatcher and stream handlers,
/// so every method takes `&self`; a transport that needs exclusive access
/// to its halves synchronizes internally.
pub trait ServerStream: Send + Sync + 'static {
    /// Full method name as sent by the caller, e.g. `/pkg.Echo/Say`.
    fn full_method(&self) -> Option<&str>;

    /// Metadata sent with the call.
    fn metadata(&self) -> &IncomingMetadata;

    /// Network address of the caller, if known.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Receive the next message payload.
    ///
    /// Returns `Ok(None)` once the caller has closed its sending side.
    fn recv_msg(&self) -> BoxFuture<'_, Result<Option<Bytes>>>;

    /// Send one message payload to the caller.
    fn send_msg(&self, payload: Bytes) -> BoxFuture<'_, Result<()>>;

    /// Report the terminal outcome of the call.
    fn finish(&self, outcome: std::result::Result<(), Status>);
}

/// Source of inbound calls for [`crate::Server::serve`].
pub trait Acceptor: Send {
    /// Wait for the next call. `None` means no more calls will arrive.
    fn accept(&mut self) -> BoxFuture<'_, Option<Arc<dyn ServerStream>>>;
}

/// Multi-valued metadata as received from the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingMetadata {
    entries: HashMap<String, Vec<String>>,
}

impl IncomingMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value for `key`.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.entry(key.into()).or_default().push(value.into());
    }

    /// All values sent for `key`, in arrival order.
    pub fn get_all(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for IncomingMetadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut md = Self::new();
        for (k, v) in iter {
            md.append(k, v);
        }
        md
    }
}

/// Live message channel of one call, bound to the negotiated codec.
///
/// Cheap to clone; clones share the underlying stream.
#[derive(Clone)]
pub struct StreamHandle {
    inner: Arc<dyn ServerStream>,
    codec: Codec,
    max_recv_msg_size: usize,
    max_send_msg_size: usize,
}

impl StreamHandle {
    pub(crate) fn new(
        inner: Arc<dyn ServerStream>,
        codec: Codec,
        max_recv_msg_size: usize,
        max_send_msg_size: usize,
    ) -> Self {
        Self {
            inner,
            codec,
            max_recv_msg_size,
            max_send_msg_size,
        }
    }

    /// Codec negotiated for this call.
    #[inline]
    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr()
    }

    /// Receive and decode the next message.
    ///
    /// Returns `Ok(None)` once the caller has closed its sending side.
    pub async fn recv<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.recv_raw().await? {
            Some(payload) => Ok(Some(self.codec.decode(&payload)?)),
            None => Ok(None),
        }
    }

    /// Receive the next raw payload, enforcing the inbound size limit.
    pub async fn recv_raw(&self) -> Result<Option<Bytes>> {
        let payload = self.inner.recv_msg().await?;
        if let Some(ref p) = payload {
            if p.len() > self.max_recv_msg_size {
                return Err(RpcError::MessageTooLarge {
                    len: p.len(),
                    max: self.max_recv_msg_size,
                });
            }
        }
        Ok(payload)
    }

    /// Encode and send a message.
    pub async fn send<T: Serialize>(&self, msg: &T) -> Result<()> {
        let data = self.codec.encode(msg)?;
        self.send_raw(Bytes::from(data)).await
    }

    /// Send a raw payload, enforcing the outbound size limit.
    pub async fn send_raw(&self, payload: Bytes) -> Result<()> {
        if payload.len() > self.max_send_msg_size {
            return Err(RpcError::MessageTooLarge {
                len: payload.len(),
                max: self.max_send_msg_size,
            });
        }
        self.inner.send_msg(payload).await
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("method", &self.inner.full_method())
            .field("codec", &self.codec)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mem::{self, CallRequest};

    #[test]
    fn test_metadata_multi_values() {
        let md: IncomingMetadata = [("accept", "a"), ("accept", "b"), ("x-id", "7")]
            .into_iter()
            .collect();

        assert_eq!(md.len(), 2);
        assert_eq!(md.get_all("accept"), Some(&["a".to_string(), "b".to_string()][..]));
        assert_eq!(md.get_all("missing"), None);
    }

    #[tokio::test]
    async fn test_handle_enforces_recv_limit() {
        let (server, client) = mem::pair(CallRequest::new("/Echo/Say"));
        let handle = StreamHandle::new(server, Codec::MsgPack, 4, 1024);

        client.send_raw(Bytes::from_static(b"too long")).await.unwrap();
        let err = handle.recv_raw().await.unwrap_err();
        assert!(matches!(err, RpcError::MessageTooLarge { len: 8, max: 4 }));
    }

    #[tokio::test]
    async fn test_handle_enforces_send_limit() {
        let (server, _client) = mem::pair(CallRequest::new("/Echo/Say"));
        let handle = StreamHandle::new(server, Codec::MsgPack, 1024, 2);

        let err = handle.send(&"hello").await.unwrap_err();
        assert!(matches!(err, RpcError::MessageTooLarge { max: 2, .. }));
    }

    #[tokio::test]
    async fn test_handle_typed_roundtrip() {
        let (server, mut client) =
            mem::pair(CallRequest::new("/Echo/Say").content_type("application/json"));
        let handle = StreamHandle::new(server, Codec::Json, 1024, 1024);

        client.send(&"ping").await.unwrap();
        let got: Option<String> = handle.recv().await.unwrap();
        assert_eq!(got.as_deref(), Some("ping"));

        handle.send(&"pong").await.unwrap();
        let reply: Option<String> = client.recv().await.unwrap();
        assert_eq!(reply.as_deref(), Some("pong"));
    }
}
