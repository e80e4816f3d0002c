//! Stream invoker.
//!
//! The response placeholder is bound to the live stream, the first inbound
//! message is read when the method takes a request, and the handler is
//! invoked exactly once. Everything after that happens through the bound
//! [`StreamHandle`]; the handler's error comes back unchanged.

use std::marker::PhantomData;

use futures::future::BoxFuture;

use crate::error::RpcError;
use crate::handler::{CallContext, Message};
use crate::status::{DispatchError, HandlerError};
use crate::transport::StreamHandle;

pub(crate) type StreamFuture = BoxFuture<'static, Result<(), HandlerError>>;

/// Type-erased stream method.
pub(crate) trait StreamInvoke: Send + Sync + 'static {
    fn invoke<'a>(
        &'a self,
        ctx: CallContext,
        stream: StreamHandle,
    ) -> BoxFuture<'a, Result<(), DispatchError>>;
}

pub(crate) enum StreamFn<Req, Resp> {
    Request(Box<dyn Fn(CallContext, Req, Resp) -> StreamFuture + Send + Sync>),
    Empty(Box<dyn Fn(CallContext, Resp) -> StreamFuture + Send + Sync>),
}

pub(crate) struct StreamMethod<Req, Resp> {
    handler: StreamFn<Req, Resp>,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> StreamMethod<Req, Resp> {
    pub(crate) fn new(handler: StreamFn<Req, Resp>) -> Self {
        Self {
            handler,
            _types: PhantomData,
        }
    }
}

impl<Req, Resp> StreamInvoke for StreamMethod<Req, Resp>
where
    Req: Message,
    Resp: Message + Default,
{
    fn invoke<'a>(
        &'a self,
        ctx: CallContext,
        stream: StreamHandle,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            let mut response = Resp::default();
            if let Some(bindable) = response.as_stream_bindable() {
                bindable.bind_stream(stream.clone());
            }

            let outcome = match &self.handler {
                StreamFn::Request(f) => {
                    let first: Req = stream.recv().await?.ok_or(RpcError::StreamClosed)?;
                    f(ctx, first, response).await
                }
                StreamFn::Empty(f) => f(ctx, response).await,
            };

            outcome.map_err(DispatchError::Stream)
        })
    }
}
