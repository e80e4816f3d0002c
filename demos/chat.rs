//! Chat server - bidirectional stream example.
//!
//! The handler receives the first message as its request, then keeps
//! reading from and writing to the bound stream until the caller closes its
//! sending side. The caller talks JSON; the server follows its content type.
//!
//! ```text
//! cargo run --example chat
//! ```

use std::sync::Arc;

use rpcmux::transport::mem::{self, CallRequest};
use rpcmux::{
    message, CallContext, HandlerError, MethodTable, Server, Service, StreamBindable,
    StreamHandle,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Line {
    from: String,
    text: String,
}

/// Response side of the chat; the stream is bound before the handler runs.
#[derive(Default, Serialize, Deserialize)]
struct Room {
    #[serde(skip)]
    stream: Option<StreamHandle>,
}

impl StreamBindable for Room {
    fn bind_stream(&mut self, stream: StreamHandle) {
        self.stream = Some(stream);
    }
}

message!(Line);
message!(Room: bind_stream);

struct Chat;

impl Chat {
    async fn talk(&self, ctx: CallContext, first: Line, room: Room) -> Result<(), HandlerError> {
        let stream = room
            .stream
            .ok_or_else(|| HandlerError::other("stream not bound"))?;
        tracing::info!(codec = stream.codec().name(), from = %first.from, "chat opened");

        let mut seen = 0usize;
        let mut next = Some(first);
        while let Some(line) = next {
            if ctx.is_cancelled() {
                return Err(HandlerError::business(408, "chat timed out"));
            }
            seen += 1;
            let reply = Line {
                from: "server".into(),
                text: format!("#{seen} {} said {:?}", line.from, line.text),
            };
            stream.send(&reply).await?;
            next = stream.recv().await?;
        }

        tracing::info!(lines = seen, "chat closed");
        Ok(())
    }
}

impl Service for Chat {
    const NAME: &'static str = "Chat";

    fn methods(table: &mut MethodTable<Self>) {
        table.stream("Talk", |svc, ctx, first: Line, room: Room| async move {
            svc.talk(ctx, first, room).await
        });
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let server = Server::builder().register(Arc::new(Chat))?.build();
    let (connector, listener) = mem::listener();
    let shutdown = CancellationToken::new();
    let serve = tokio::spawn(server.serve_owned(listener, shutdown.clone()));

    let mut client = connector
        .open(CallRequest::new("/demo.Chat/Talk").content_type("application/json"))
        .await?;

    for text in ["hi", "how are you?", "bye"] {
        client
            .send(&Line {
                from: "alice".into(),
                text: text.into(),
            })
            .await?;
        if let Some(reply) = client.recv::<Line>().await? {
            println!("{}: {}", reply.from, reply.text);
        }
    }
    client.close_send();
    client.status().await?;

    shutdown.cancel();
    serve.await??;
    Ok(())
}
