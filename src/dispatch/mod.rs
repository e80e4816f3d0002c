//! Per-call orchestration.
//!
//! [`Dispatcher::dispatch`] is the single entry point the transport calls for
//! every inbound call, known or not:
//!
//! 1. resolve the routing key from the full method name
//! 2. flatten metadata and negotiate the protocol and payload content types
//! 3. build the [`CallContext`] (peer address, optional deadline)
//! 4. look the key up in the [`Registry`]
//! 5. route to the unary or stream invoker by the descriptor's stream flags
//!
//! The whole call runs under `catch_unwind`; a panic anywhere in it becomes
//! a bad-request error for that call only.

mod panic;
pub(crate) mod stream;
pub(crate) mod unary;

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;

use crate::codec::Codec;
use crate::config::ServerConfig;
use crate::error::{Result, RpcError};
use crate::handler::{
    CallContext, CallMetadata, HandlerDescriptor, Registry, CONTENT_TYPE_KEY, REMOTE_KEY,
    TIMEOUT_KEY, X_CONTENT_TYPE_KEY,
};
use crate::status::DispatchError;
use crate::transport::{ServerStream, StreamHandle};

use self::stream::StreamInvoke;
use self::unary::UnaryInvoke;

/// Invoker bound to a registered method; its variant matches the method's
/// shape.
pub(crate) enum Invoker {
    Unary(Box<dyn UnaryInvoke>),
    Stream(Box<dyn StreamInvoke>),
}

/// Split a full method name into service and method.
///
/// Accepts `/pkg.Service/Method` (package prefix dropped) and
/// `Service.Method`.
///
/// ```
/// use rpcmux::dispatch::service_method;
///
/// assert_eq!(service_method("/helloworld.Greeter/SayHello").unwrap(), ("Greeter", "SayHello"));
/// assert_eq!(service_method("Greeter.SayHello").unwrap(), ("Greeter", "SayHello"));
/// assert!(service_method("Greeter").is_err());
/// ```
pub fn service_method(full_method: &str) -> Result<(&str, &str)> {
    let malformed = || RpcError::Protocol(format!("malformed method name: {full_method:?}"));

    if let Some(rest) = full_method.strip_prefix('/') {
        let mut parts = rest.split('/');
        let (Some(service), Some(method), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };
        if service.is_empty() || method.is_empty() {
            return Err(malformed());
        }
        let service = service.rsplit('.').next().unwrap_or(service);
        if service.is_empty() {
            return Err(malformed());
        }
        return Ok((service, method));
    }

    let mut parts = full_method.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(service), Some(method), None) if !service.is_empty() && !method.is_empty() => {
            Ok((service, method))
        }
        _ => Err(malformed()),
    }
}

/// Negotiated content types of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ContentTypes {
    /// `x-content-type`, else `content-type`, else the default.
    protocol: String,
    /// `content-type`, else the protocol content type.
    payload: String,
}

fn negotiate(md: &CallMetadata, default: &str) -> ContentTypes {
    let protocol = md
        .get(X_CONTENT_TYPE_KEY)
        .or_else(|| md.get(CONTENT_TYPE_KEY))
        .unwrap_or(default)
        .to_string();
    let payload = md
        .get(CONTENT_TYPE_KEY)
        .map(str::to_string)
        .unwrap_or_else(|| protocol.clone());
    ContentTypes { protocol, payload }
}

/// Parse `timeout` nanoseconds; anything but a plain run of decimal digits
/// is ignored.
fn parse_timeout(value: Option<&str>) -> Option<Duration> {
    let value = value?;
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse::<u64>().ok().map(Duration::from_nanos)
}

/// Routes inbound calls to registered handlers.
pub struct Dispatcher {
    registry: Arc<Registry>,
    config: ServerConfig,
}

impl Dispatcher {
    /// Create a dispatcher over `registry`.
    ///
    /// The first dispatcher created in a process installs a panic hook that
    /// records backtraces for recovered handler panics. The hook is
    /// process-wide, is installed only once, and forwards every panic to the
    /// hook that was in place before it, so an application hook keeps
    /// running.
    pub fn new(registry: Arc<Registry>, config: ServerConfig) -> Self {
        panic::install_hook();
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle one call to completion.
    ///
    /// Every failure is mapped to a [`DispatchError`]; panics are recovered
    /// and reported as [`DispatchError::BadRequest`].
    pub async fn dispatch(
        &self,
        stream: Arc<dyn ServerStream>,
    ) -> std::result::Result<(), DispatchError> {
        let full_method = stream.full_method().unwrap_or_default().to_string();

        let result = match AssertUnwindSafe(self.dispatch_call(stream)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message =
                    format!("panic recovered: {}", panic::panic_message(payload.as_ref()));
                let backtrace = panic::take_backtrace()
                    .map(|b| b.to_string())
                    .unwrap_or_default();
                tracing::error!(method = %full_method, %backtrace, "{message}");
                return Err(DispatchError::BadRequest(message));
            }
        };

        if let Err(ref e) = result {
            tracing::error!(method = %full_method, code = e.code(), error = %e, "call failed");
        }
        result
    }

    async fn dispatch_call(
        &self,
        stream: Arc<dyn ServerStream>,
    ) -> std::result::Result<(), DispatchError> {
        let Some(full_method) = stream.full_method() else {
            return Err(DispatchError::NotFound("method does not exist in context".into()));
        };
        let (key, descriptor) = self.route(full_method)?;

        let mut md = CallMetadata::from_incoming(stream.metadata());
        let content_types = negotiate(&md, &self.config.default_content_type);
        md.insert(X_CONTENT_TYPE_KEY, content_types.protocol.as_str());
        md.insert(CONTENT_TYPE_KEY, content_types.payload.as_str());
        let timeout = parse_timeout(md.remove(TIMEOUT_KEY).as_deref());

        let peer: Option<SocketAddr> = stream.peer_addr();
        if let Some(addr) = peer {
            md.insert(REMOTE_KEY, addr.to_string());
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let ctx = CallContext::build(key, md, peer, deadline);
        let _cancel = ctx.cancel_on_drop();

        let codec = Codec::try_resolve(&content_types.payload)
            .map_err(|e| DispatchError::BadRequest(e.to_string()))?;
        let handle = StreamHandle::new(
            stream,
            codec,
            self.config.max_recv_msg_size,
            self.config.max_send_msg_size,
        );

        tracing::debug!(
            method = %ctx.method(),
            codec = codec.name(),
            content_type = %content_types.protocol,
            stream = descriptor.is_stream(),
            "dispatching call"
        );

        if descriptor.is_stream() {
            invoke_stream(&descriptor, ctx, handle).await
        } else {
            invoke_unary(&descriptor, ctx, handle).await
        }
    }

    /// Find the handler for a full method name.
    ///
    /// The name is reduced to `Service.Method` first. A key registered
    /// verbatim (an endpoint URL or alias) is only consulted when that key
    /// is unknown or the name does not parse.
    fn route(
        &self,
        full_method: &str,
    ) -> std::result::Result<(String, Arc<HandlerDescriptor>), DispatchError> {
        match service_method(full_method) {
            Ok((service, method)) => {
                let key = format!("{service}.{method}");
                if let Some(descriptor) = self.registry.get(&key) {
                    return Ok((key, descriptor));
                }
                self.registry
                    .get(full_method)
                    .map(|descriptor| (full_method.to_string(), descriptor))
                    .ok_or_else(|| DispatchError::NotFound(format!("unknown method {key}")))
            }
            Err(e) => self
                .registry
                .get(full_method)
                .map(|descriptor| (full_method.to_string(), descriptor))
                .ok_or_else(|| DispatchError::NotFound(format!("ServiceMethod err: {e}"))),
        }
    }
}

async fn invoke_unary(
    descriptor: &HandlerDescriptor,
    ctx: CallContext,
    stream: StreamHandle,
) -> std::result::Result<(), DispatchError> {
    match &descriptor.invoker {
        Invoker::Unary(invoker) => invoker.invoke(ctx, stream).await,
        Invoker::Stream(_) => Err(DispatchError::BadRequest(format!(
            "{} is registered as a stream method",
            ctx.method()
        ))),
    }
}

async fn invoke_stream(
    descriptor: &HandlerDescriptor,
    ctx: CallContext,
    stream: StreamHandle,
) -> std::result::Result<(), DispatchError> {
    match &descriptor.invoker {
        Invoker::Stream(invoker) => invoker.invoke(ctx, stream).await,
        Invoker::Unary(_) => Err(DispatchError::BadRequest(format!(
            "{} is registered as a unary method",
            ctx.method()
        ))),
    }
}
