//! In-process transport over tokio channels.
//!
//! Each call is a pair of bounded mpsc channels (one per direction) plus a
//! oneshot carrying the terminal status. [`pair`] builds a single call for
//! driving a [`Dispatcher`](crate::Dispatcher) directly; [`listener`] builds a
//! connector/acceptor pair for [`Server::serve`](crate::Server::serve).
//!
//! # Example
//!
//! ```ignore
//! use rpcmux::transport::mem::{self, CallRequest};
//!
//! let (connector, listener) = mem::listener();
//! tokio::spawn(async move { server.serve(listener, shutdown).await });
//!
//! let reply: EchoResponse = connector
//!     .open(CallRequest::new("/Echo/Say"))
//!     .await?
//!     .unary(&EchoRequest { text: "hi".into() })
//!     .await?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::{Acceptor, IncomingMetadata, ServerStream};
use crate::codec::{Codec, DEFAULT_CONTENT_TYPE};
use crate::error::{Result, RpcError};
use crate::status::Status;

/// Messages buffered per direction before senders wait.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Calls buffered by [`listener`] before `open` waits.
pub const DEFAULT_BACKLOG: usize = 128;

/// Description of a call to open: identity, metadata and peer.
#[derive(Debug, Clone, Default)]
pub struct CallRequest {
    method: Option<String>,
    metadata: IncomingMetadata,
    peer: Option<SocketAddr>,
}

impl CallRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: Some(method.into()),
            ..Self::default()
        }
    }

    /// A call whose transport exposes no method identity.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.append(key, value);
        self
    }

    pub fn content_type(self, content_type: impl Into<String>) -> Self {
        self.metadata("content-type", content_type)
    }

    /// Set the `timeout` metadata (nanoseconds).
    pub fn timeout(self, timeout: std::time::Duration) -> Self {
        self.metadata("timeout", timeout.as_nanos().to_string())
    }

    pub fn peer(mut self, addr: SocketAddr) -> Self {
        self.peer = Some(addr);
        self
    }

    /// Codec a client should use, following the server's negotiation order.
    fn codec(&self) -> Codec {
        let first = |key: &str| {
            self.metadata
                .get_all(key)
                .and_then(|v| v.first())
                .map(String::as_str)
        };
        let content_type = first("content-type")
            .or_else(|| first("x-content-type"))
            .unwrap_or(DEFAULT_CONTENT_TYPE);
        Codec::resolve(content_type).unwrap_or_default()
    }
}

/// Server side of an in-memory call.
pub struct MemServerStream {
    method: Option<String>,
    metadata: IncomingMetadata,
    peer: Option<SocketAddr>,
    inbound: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
    outbound: mpsc::Sender<Bytes>,
    status: parking_lot::Mutex<Option<oneshot::Sender<std::result::Result<(), Status>>>>,
}

impl ServerStream for MemServerStream {
    fn full_method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    fn metadata(&self) -> &IncomingMetadata {
        &self.metadata
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn recv_msg(&self) -> BoxFuture<'_, Result<Option<Bytes>>> {
        Box::pin(async move { Ok(self.inbound.lock().await.recv().await) })
    }

    fn send_msg(&self, payload: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.outbound
                .send(payload)
                .await
                .map_err(|_| RpcError::StreamClosed)
        })
    }

    fn finish(&self, outcome: std::result::Result<(), Status>) {
        match self.status.lock().take() {
            Some(tx) => {
                // Caller may have gone away already.
                let _ = tx.send(outcome);
            }
            None => tracing::warn!(method = ?self.method, "call finished twice"),
        }
    }
}

/// Client side of an in-memory call.
pub struct MemClientStream {
    codec: Codec,
    tx: Option<mpsc::Sender<Bytes>>,
    rx: mpsc::Receiver<Bytes>,
    status: Option<oneshot::Receiver<std::result::Result<(), Status>>>,
}

impl MemClientStream {
    /// Codec this client encodes and decodes with.
    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub async fn send<T: Serialize>(&self, msg: &T) -> Result<()> {
        let data = self.codec.encode(msg)?;
        self.send_raw(Bytes::from(data)).await
    }

    pub async fn send_raw(&self, payload: Bytes) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(RpcError::StreamClosed)?;
        tx.send(payload).await.map_err(|_| RpcError::StreamClosed)
    }

    /// Close the sending side; the server sees end-of-stream.
    pub fn close_send(&mut self) {
        self.tx = None;
    }

    /// Wait for the next message from the server.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.rx.recv().await {
            Some(payload) => Ok(Some(self.codec.decode(&payload)?)),
            None => Ok(None),
        }
    }

    pub async fn recv_raw(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Take an already delivered message without waiting.
    pub fn try_recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.rx.try_recv() {
            Ok(payload) => Ok(Some(self.codec.decode(&payload)?)),
            Err(_) => Ok(None),
        }
    }

    /// Wait for the terminal status reported through
    /// [`ServerStream::finish`].
    pub async fn status(&mut self) -> std::result::Result<(), Status> {
        let rx = self
            .status
            .take()
            .ok_or_else(|| Status::transport("status already taken"))?;
        rx.await
            .unwrap_or_else(|_| Err(Status::transport("call dropped without status")))
    }

    /// Send one request, close the sending side, and wait for the reply.
    pub async fn unary<Req: Serialize, Resp: DeserializeOwned>(
        mut self,
        request: &Req,
    ) -> std::result::Result<Resp, Status> {
        self.send(request).await.map_err(transport_status)?;
        self.close_send();
        self.status().await?;
        match self.try_recv() {
            Ok(Some(resp)) => Ok(resp),
            Ok(None) => Err(Status::transport("no response received")),
            Err(e) => Err(transport_status(e)),
        }
    }
}

fn transport_status(err: RpcError) -> Status {
    Status::transport(err.to_string())
}

/// Build one connected call.
pub fn pair(request: CallRequest) -> (Arc<MemServerStream>, MemClientStream) {
    let codec = request.codec();
    let (in_tx, in_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
    let (out_tx, out_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
    let (status_tx, status_rx) = oneshot::channel();

    let server = MemServerStream {
        method: request.method,
        metadata: request.metadata,
        peer: request.peer,
        inbound: tokio::sync::Mutex::new(in_rx),
        outbound: out_tx,
        status: parking_lot::Mutex::new(Some(status_tx)),
    };
    let client = MemClientStream {
        codec,
        tx: Some(in_tx),
        rx: out_rx,
        status: Some(status_rx),
    };
    (Arc::new(server), client)
}

/// Opens calls against a [`MemListener`].
#[derive(Clone)]
pub struct MemConnector {
    tx: mpsc::Sender<Arc<MemServerStream>>,
}

impl MemConnector {
    /// Open a call; fails once the listener is gone.
    pub async fn open(&self, request: CallRequest) -> Result<MemClientStream> {
        let (server, client) = pair(request);
        self.tx
            .send(server)
            .await
            .map_err(|_| RpcError::Protocol("listener closed".into()))?;
        Ok(client)
    }
}

/// Accepts calls opened through a [`MemConnector`].
pub struct MemListener {
    rx: mpsc::Receiver<Arc<MemServerStream>>,
}

impl Acceptor for MemListener {
    fn accept(&mut self) -> BoxFuture<'_, Option<Arc<dyn ServerStream>>> {
        Box::pin(async move {
            let stream = self.rx.recv().await?;
            Some(stream as Arc<dyn ServerStream>)
        })
    }
}

/// Build a connected connector/listener pair.
pub fn listener() -> (MemConnector, MemListener) {
    let (tx, rx) = mpsc::channel(DEFAULT_BACKLOG);
    (MemConnector { tx }, MemListener { rx })
}
