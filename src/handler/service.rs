//! Typed method tables.
//!
//! A handler type implements [`Service`] and lists its callable methods in
//! [`Service::methods`]. Each entry fixes the method's shape at compile time:
//!
//! | Builder | Handler signature | Default flags |
//! |---|---|---|
//! | [`MethodTable::unary`] | `(svc, ctx, req) -> Result<Resp>` | none |
//! | [`MethodTable::unary_empty`] | `(svc, ctx) -> Result<Resp>` | none |
//! | [`MethodTable::stream`] | `(svc, ctx, req, resp) -> Result<()>` | client + server |
//! | [`MethodTable::stream_empty`] | `(svc, ctx, resp) -> Result<()>` | server |
//!
//! # Example
//!
//! ```ignore
//! impl Service for Echo {
//!     const NAME: &'static str = "Echo";
//!
//!     fn methods(table: &mut MethodTable<Self>) {
//!         table
//!             .unary("Say", |svc, ctx, req: SayRequest| async move { svc.say(ctx, req).await })
//!             .stream("Chat", |svc, ctx, first: ChatMessage, resp: ChatStream| async move {
//!                 svc.chat(ctx, first, resp).await
//!             });
//!     }
//! }
//! ```

use std::any::type_name;
use std::future::Future;
use std::sync::Arc;

use crate::dispatch::stream::{StreamFn, StreamFuture, StreamMethod};
use crate::dispatch::unary::{UnaryFn, UnaryFuture, UnaryMethod};
use crate::dispatch::Invoker;
use crate::handler::{CallContext, Message};
use crate::status::HandlerError;

/// A handler object whose methods can be registered.
pub trait Service: Send + Sync + Sized + 'static {
    /// Type name used in default routing keys (`NAME.Method`).
    const NAME: &'static str;

    /// List the callable methods.
    fn methods(table: &mut MethodTable<Self>);
}

/// One method listed by a [`Service`].
pub(crate) struct MethodEntry {
    pub(crate) name: &'static str,
    pub(crate) request_type: Option<&'static str>,
    pub(crate) response_type: &'static str,
    pub(crate) client_stream: bool,
    pub(crate) server_stream: bool,
    pub(crate) invoker: Invoker,
}

impl MethodEntry {
    pub(crate) fn is_stream(&self) -> bool {
        self.client_stream || self.server_stream
    }
}

/// Method listing for one handler instance.
pub struct MethodTable<S> {
    service: Arc<S>,
    entries: Vec<MethodEntry>,
}

impl<S: Service> MethodTable<S> {
    pub(crate) fn new(service: Arc<S>) -> Self {
        Self {
            service,
            entries: Vec::new(),
        }
    }

    pub(crate) fn into_entries(self) -> Vec<MethodEntry> {
        self.entries
    }

    /// Request/response method.
    pub fn unary<Req, Resp, F, Fut>(&mut self, name: &'static str, f: F) -> &mut Self
    where
        Req: Message,
        Resp: Message + Default,
        F: Fn(Arc<S>, CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, HandlerError>> + Send + 'static,
    {
        let service = self.service.clone();
        let handler: UnaryFn<Req, Resp> = UnaryFn::Request(Box::new(
            move |ctx: CallContext, req: Req| -> UnaryFuture<Resp> {
                Box::pin(f(service.clone(), ctx, req))
            },
        ));
        self.push(MethodEntry {
            name,
            request_type: Some(type_name::<Req>()),
            response_type: type_name::<Resp>(),
            client_stream: false,
            server_stream: false,
            invoker: Invoker::Unary(Box::new(UnaryMethod::new(handler))),
        })
    }

    /// Method without a request type.
    pub fn unary_empty<Resp, F, Fut>(&mut self, name: &'static str, f: F) -> &mut Self
    where
        Resp: Message + Default,
        F: Fn(Arc<S>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, HandlerError>> + Send + 'static,
    {
        let service = self.service.clone();
        let handler: UnaryFn<(), Resp> = UnaryFn::Empty(Box::new(
            move |ctx: CallContext| -> UnaryFuture<Resp> {
                Box::pin(f(service.clone(), ctx))
            },
        ));
        self.push(MethodEntry {
            name,
            request_type: None,
            response_type: type_name::<Resp>(),
            client_stream: false,
            server_stream: false,
            invoker: Invoker::Unary(Box::new(UnaryMethod::new(handler))),
        })
    }

    /// Stream method primed with the first inbound message.
    pub fn stream<Req, Resp, F, Fut>(&mut self, name: &'static str, f: F) -> &mut Self
    where
        Req: Message,
        Resp: Message + Default,
        F: Fn(Arc<S>, CallContext, Req, Resp) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let service = self.service.clone();
        let handler: StreamFn<Req, Resp> = StreamFn::Request(Box::new(
            move |ctx: CallContext, req: Req, resp: Resp| -> StreamFuture {
                Box::pin(f(service.clone(), ctx, req, resp))
            },
        ));
        self.push(MethodEntry {
            name,
            request_type: Some(type_name::<Req>()),
            response_type: type_name::<Resp>(),
            client_stream: true,
            server_stream: true,
            invoker: Invoker::Stream(Box::new(StreamMethod::new(handler))),
        })
    }

    /// Stream method without a request type (server stream).
    pub fn stream_empty<Resp, F, Fut>(&mut self, name: &'static str, f: F) -> &mut Self
    where
        Resp: Message + Default,
        F: Fn(Arc<S>, CallContext, Resp) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let service = self.service.clone();
        let handler: StreamFn<(), Resp> = StreamFn::Empty(Box::new(
            move |ctx: CallContext, resp: Resp| -> StreamFuture {
                Box::pin(f(service.clone(), ctx, resp))
            },
        ));
        self.push(MethodEntry {
            name,
            request_type: None,
            response_type: type_name::<Resp>(),
            client_stream: false,
            server_stream: true,
            invoker: Invoker::Stream(Box::new(StreamMethod::new(handler))),
        })
    }

    fn push(&mut self, entry: MethodEntry) -> &mut Self {
        self.entries.push(entry);
        self
    }
}
