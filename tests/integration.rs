//! Integration tests for rpcmux.
//!
//! These tests drive a full [`Server`] through the in-memory transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rpcmux::status::{code, BoxError};
use rpcmux::transport::mem::{self, CallRequest, MemConnector};
use rpcmux::{
    message, BusinessError, CallContext, HandlerError, MethodTable, Server, Service,
    StreamBindable, StreamHandle, Validatable,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct SayRequest {
    text: String,
}

impl Validatable for SayRequest {
    fn validate(&self) -> Result<(), BoxError> {
        if self.text.is_empty() {
            return Err("text must not be empty".into());
        }
        Ok(())
    }
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct SayResponse {
    text: String,
}

#[derive(Default, Serialize, Deserialize)]
struct ChatStream {
    #[serde(skip)]
    stream: Option<StreamHandle>,
}

impl StreamBindable for ChatStream {
    fn bind_stream(&mut self, stream: StreamHandle) {
        self.stream = Some(stream);
    }
}

message!(SayRequest: validate);
message!(SayResponse);
message!(ChatStream: bind_stream);

#[derive(Default)]
struct Echo {
    calls: AtomicUsize,
}

impl Echo {
    async fn say(&self, req: SayRequest) -> Result<SayResponse, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SayResponse { text: req.text })
    }

    async fn chat(&self, first: SayRequest, resp: ChatStream) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stream = resp
            .stream
            .ok_or_else(|| HandlerError::other("stream not bound"))?;

        let mut line = Some(first);
        while let Some(req) = line {
            stream
                .send(&SayResponse {
                    text: req.text.to_uppercase(),
                })
                .await?;
            line = stream.recv().await?;
        }
        Ok(())
    }
}

impl Service for Echo {
    const NAME: &'static str = "Echo";

    fn methods(table: &mut MethodTable<Self>) {
        table
            .unary("Say", |svc, _ctx: CallContext, req: SayRequest| async move {
                svc.say(req).await
            })
            .unary("Crash", |svc, _ctx: CallContext, req: SayRequest| async move {
                svc.calls.fetch_add(1, Ordering::SeqCst);
                if req.text == "now" {
                    panic!("handler crashed");
                }
                Ok::<_, HandlerError>(SayResponse::default())
            })
            .unary("Noop", |_svc, _ctx: CallContext, _req: SayRequest| async move {
                Err::<SayResponse, _>(HandlerError::from(BusinessError::new(code::OK, "")))
            })
            .unary("Lookup", |_svc, _ctx: CallContext, req: SayRequest| async move {
                Err::<SayResponse, _>(HandlerError::business(
                    404,
                    format!("user {} not found", req.text),
                ))
            })
            .unary("Wait", |_svc, ctx: CallContext, _req: SayRequest| async move {
                ctx.cancelled().await;
                Ok::<_, HandlerError>(SayResponse {
                    text: "cancelled".into(),
                })
            })
            .stream(
                "Chat",
                |svc, _ctx: CallContext, first: SayRequest, resp: ChatStream| async move {
                    svc.chat(first, resp).await
                },
            );
    }
}

struct Harness {
    echo: Arc<Echo>,
    connector: MemConnector,
    shutdown: CancellationToken,
    serve: JoinHandle<rpcmux::Result<()>>,
}

impl Harness {
    fn start() -> Self {
        let echo = Arc::new(Echo::default());
        let server = Server::builder().register(echo.clone()).unwrap().build();
        let (connector, listener) = mem::listener();
        let shutdown = CancellationToken::new();
        let serve = tokio::spawn(server.serve_owned(listener, shutdown.clone()));
        Self {
            echo,
            connector,
            shutdown,
            serve,
        }
    }

    async fn say(&self, method: &str, text: &str) -> Result<SayResponse, rpcmux::Status> {
        self.connector
            .open(CallRequest::new(method))
            .await
            .unwrap()
            .unary(&SayRequest { text: text.into() })
            .await
    }

    fn calls(&self) -> usize {
        self.echo.calls.load(Ordering::SeqCst)
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.serve.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_echo_say() {
    let h = Harness::start();

    let resp = h.say("/Echo/Say", "hi").await.unwrap();
    assert_eq!(resp.text, "hi");
    assert_eq!(h.calls(), 1);

    h.stop().await;
}

#[tokio::test]
async fn test_package_qualified_method() {
    let h = Harness::start();

    let resp = h.say("/demo.v1.Echo/Say", "qualified").await.unwrap();
    assert_eq!(resp.text, "qualified");

    h.stop().await;
}

#[tokio::test]
async fn test_unknown_method_not_found() {
    let h = Harness::start();

    let status = h.say("/Echo/Missing", "hi").await.unwrap_err();
    assert!(status.is_not_found());
    assert_eq!(h.calls(), 0);

    h.stop().await;
}

#[tokio::test]
async fn test_business_404_is_not_routing_not_found() {
    let h = Harness::start();

    let status = h.say("/Echo/Lookup", "ada").await.unwrap_err();
    assert_eq!(status.code, 404);
    assert_eq!(status.message, "user ada not found");
    assert!(status.is_business());
    assert!(!status.is_not_found());

    let status = h.say("/Echo/Missing", "ada").await.unwrap_err();
    assert_eq!(status.code, 404);
    assert!(status.is_not_found());
    assert!(!status.is_business());

    h.stop().await;
}

#[tokio::test]
async fn test_validation_failure_skips_handler() {
    let h = Harness::start();

    let status = h.say("/Echo/Say", "").await.unwrap_err();
    assert_eq!(status.code, code::VALIDATION);
    assert_eq!(status.message, "param error: text must not be empty");
    assert_eq!(h.calls(), 0);

    h.stop().await;
}

#[tokio::test]
async fn test_undecodable_payload_bad_request() {
    let h = Harness::start();

    let mut client = h.connector.open(CallRequest::new("/Echo/Say")).await.unwrap();
    client
        .send_raw(Bytes::from_static(b"\xc1 not msgpack"))
        .await
        .unwrap();
    client.close_send();

    let status = client.status().await.unwrap_err();
    assert!(status.is_bad_request());
    assert!(client.try_recv::<SayResponse>().unwrap().is_none());
    assert_eq!(h.calls(), 0);

    h.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panic_isolated_from_concurrent_call() {
    let h = Arc::new(Harness::start());

    let crash = tokio::spawn({
        let h = h.clone();
        async move { h.say("/Echo/Crash", "now").await }
    });
    let healthy = tokio::spawn({
        let h = h.clone();
        async move { h.say("/Echo/Say", "still here").await }
    });

    let status = crash.await.unwrap().unwrap_err();
    assert!(status.is_bad_request());
    assert!(status.message.contains("panic recovered: handler crashed"));
    assert_eq!(healthy.await.unwrap().unwrap().text, "still here");

    // Server keeps serving after the panic.
    assert_eq!(h.say("/Echo/Say", "again").await.unwrap().text, "again");

    h.shutdown.cancel();
}

#[tokio::test]
async fn test_business_code_zero_is_success() {
    let h = Harness::start();

    let resp = h.say("/Echo/Noop", "x").await.unwrap();
    assert_eq!(resp, SayResponse::default());

    h.stop().await;
}

#[tokio::test]
async fn test_timeout_cancels_context() {
    let h = Harness::start();

    let resp: SayResponse = h
        .connector
        .open(CallRequest::new("/Echo/Wait").metadata("timeout", "1000000"))
        .await
        .unwrap()
        .unary(&SayRequest { text: "x".into() })
        .await
        .unwrap();
    assert_eq!(resp.text, "cancelled");

    h.stop().await;
}

#[tokio::test]
async fn test_json_payload() {
    let h = Harness::start();

    let client = h
        .connector
        .open(CallRequest::new("/Echo/Say").content_type("application/json"))
        .await
        .unwrap();
    let resp: SayResponse = client
        .unary(&SayRequest { text: "json".into() })
        .await
        .unwrap();
    assert_eq!(resp.text, "json");

    h.stop().await;
}

#[tokio::test]
async fn test_stream_chat() {
    let h = Harness::start();

    let mut client = h.connector.open(CallRequest::new("/Echo/Chat")).await.unwrap();
    for word in ["one", "two", "three"] {
        client.send(&SayRequest { text: word.into() }).await.unwrap();
        let reply: SayResponse = client.recv().await.unwrap().unwrap();
        assert_eq!(reply.text, word.to_uppercase());
    }
    client.close_send();

    client.status().await.unwrap();
    assert_eq!(h.calls(), 1);

    h.stop().await;
}

#[tokio::test]
async fn test_shutdown_with_idle_server() {
    let h = Harness::start();
    tokio::time::timeout(Duration::from_secs(5), h.stop())
        .await
        .unwrap();
}
