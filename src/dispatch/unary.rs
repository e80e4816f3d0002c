//! Unary invoker: decode → validate → invoke → encode → send.

use std::marker::PhantomData;

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::Serialize;

use crate::handler::{CallContext, Message};
use crate::status::{code, map_handler_error, DispatchError, HandlerError};
use crate::transport::StreamHandle;

pub(crate) type UnaryFuture<Resp> = BoxFuture<'static, Result<Resp, HandlerError>>;

/// Type-erased unary method.
pub(crate) trait UnaryInvoke: Send + Sync + 'static {
    fn invoke<'a>(
        &'a self,
        ctx: CallContext,
        stream: StreamHandle,
    ) -> BoxFuture<'a, Result<(), DispatchError>>;
}

pub(crate) enum UnaryFn<Req, Resp> {
    Request(Box<dyn Fn(CallContext, Req) -> UnaryFuture<Resp> + Send + Sync>),
    Empty(Box<dyn Fn(CallContext) -> UnaryFuture<Resp> + Send + Sync>),
}

pub(crate) struct UnaryMethod<Req, Resp> {
    handler: UnaryFn<Req, Resp>,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> UnaryMethod<Req, Resp> {
    pub(crate) fn new(handler: UnaryFn<Req, Resp>) -> Self {
        Self {
            handler,
            _types: PhantomData,
        }
    }
}

impl<Req, Resp> UnaryInvoke for UnaryMethod<Req, Resp>
where
    Req: Message,
    Resp: Message + Default,
{
    fn invoke<'a>(
        &'a self,
        ctx: CallContext,
        stream: StreamHandle,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(self.run(ctx, stream))
    }
}

impl<Req, Resp> UnaryMethod<Req, Resp>
where
    Req: Message,
    Resp: Message + Default,
{
    async fn run(&self, ctx: CallContext, stream: StreamHandle) -> Result<(), DispatchError> {
        let method = ctx.method().to_string();

        let (request_log, outcome) = match &self.handler {
            UnaryFn::Request(f) => {
                let request: Req = decode_request(&stream).await?;
                validate(&request)?;
                let request_log = log_json(&request);
                (request_log, f(ctx, request).await)
            }
            UnaryFn::Empty(f) => (log_json(&()), f(ctx).await),
        };

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                map_handler_error(err)?;
                Resp::default()
            }
        };

        let payload = stream
            .codec()
            .encode(&response)
            .map_err(|e| DispatchError::business(code::SEND_FAILED, format!("encode error: {e}")))?;
        stream
            .send_raw(Bytes::from(payload))
            .await
            .map_err(|e| DispatchError::business(code::SEND_FAILED, format!("send error: {e}")))?;

        tracing::info!(
            method = %method,
            request = %request_log,
            response = %log_json(&response),
            "handler success"
        );
        Ok(())
    }
}

async fn decode_request<Req: Message>(stream: &StreamHandle) -> Result<Req, DispatchError> {
    let payload = match stream.recv_raw().await {
        Ok(Some(payload)) => payload,
        Ok(None) => {
            return Err(DispatchError::BadRequest(
                "RecvMsg error: stream closed before request".into(),
            ))
        }
        Err(e) => return Err(DispatchError::BadRequest(format!("RecvMsg error: {e}"))),
    };

    stream
        .codec()
        .decode(&payload)
        .map_err(|e| DispatchError::BadRequest(format!("Unmarshal error: {e}")))
}

fn validate<Req: Message>(request: &Req) -> Result<(), DispatchError> {
    if let Some(v) = request.as_validatable() {
        if let Err(e) = v.validate() {
            return Err(DispatchError::business(
                code::VALIDATION,
                format!("param error: {e}"),
            ));
        }
    }
    Ok(())
}

/// JSON rendering for the success log; never fails the call.
fn log_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}
