//! Echo server - unary request/response example.
//!
//! This example demonstrates:
//! - Declaring request/response messages, one with validation
//! - Registering a service through its method table
//! - Serving calls over the in-memory transport
//! - Business errors and not-found routing as seen by the caller
//!
//! ```text
//! RUST_LOG=rpcmux=debug cargo run --example echo
//! ```

use std::sync::Arc;

use rpcmux::status::BoxError;
use rpcmux::transport::mem::{self, CallRequest};
use rpcmux::{message, CallContext, HandlerError, MethodTable, Server, Service, Validatable};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default, Serialize, Deserialize)]
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

#[derive(Debug, Default, Serialize, Deserialize)]
struct SayResponse {
    text: String,
    peer: Option<String>,
}

message!(SayRequest: validate);
message!(SayResponse);

struct Echo {
    banned: Vec<String>,
}

impl Echo {
    async fn say(&self, ctx: CallContext, req: SayRequest) -> Result<SayResponse, HandlerError> {
        if self.banned.iter().any(|w| req.text.contains(w.as_str())) {
            return Err(HandlerError::business(1001, "word not allowed"));
        }
        Ok(SayResponse {
            text: req.text,
            peer: ctx.peer_addr().map(|a| a.to_string()),
        })
    }
}

impl Service for Echo {
    const NAME: &'static str = "Echo";

    fn methods(table: &mut MethodTable<Self>) {
        table.unary("Say", |svc, ctx, req: SayRequest| async move {
            svc.say(ctx, req).await
        });
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let echo = Echo {
        banned: vec!["spam".into()],
    };
    let server = Server::builder().register(Arc::new(echo))?.build();

    let (connector, listener) = mem::listener();
    let shutdown = CancellationToken::new();
    let serve = tokio::spawn(server.serve_owned(listener, shutdown.clone()));

    let calls = [
        ("/demo.v1.Echo/Say", "hello"),
        ("Echo.Say", "spam and eggs"),
        ("/Echo/Say", ""),
        ("/Echo/Shout", "hello"),
    ];
    for (method, text) in calls {
        let call = CallRequest::new(method).peer("127.0.0.1:40000".parse()?);
        let result = connector
            .open(call)
            .await?
            .unary::<_, SayResponse>(&SayRequest { text: text.into() })
            .await;
        match result {
            Ok(resp) => println!("{method} {text:?} -> {resp:?}"),
            Err(status) => println!("{method} {text:?} -> {status}"),
        }
    }

    shutdown.cancel();
    serve.await??;
    Ok(())
}
