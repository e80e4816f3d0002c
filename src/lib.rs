//! # rpcmux
//!
//! Dynamic method dispatch for RPC servers.
//!
//! `rpcmux` sits between an established RPC transport and a set of handler
//! objects registered at startup. For every inbound call it resolves the
//! handler from the full method name, negotiates the payload codec, applies
//! the caller's timeout, runs the unary or stream invocation path, and maps
//! the outcome to a small set of status codes.
//!
//! ## Architecture
//!
//! - **Registry**: routing key (`Service.Method`, endpoint URL or alias) →
//!   [`HandlerDescriptor`]
//! - **Dispatcher**: one call at a time; panics are recovered per call
//! - **Transport**: anything implementing [`ServerStream`]; an in-memory
//!   transport lives in [`transport::mem`]
//! - **Codecs**: MsgPack by default, JSON for `application/json` and
//!   `application/grpc+json`
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use rpcmux::{message, CallContext, HandlerError, MethodTable, Server, Service};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Default)]
//! struct SayRequest { text: String }
//!
//! message!(SayRequest);
//!
//! struct Echo;
//!
//! impl Service for Echo {
//!     const NAME: &'static str = "Echo";
//!
//!     fn methods(table: &mut MethodTable<Self>) {
//!         table.unary("Say", |_svc, _ctx: CallContext, req: SayRequest| async move {
//!             Ok::<_, HandlerError>(req)
//!         });
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder().register(Arc::new(Echo))?.build();
//!     let (connector, listener) = rpcmux::transport::mem::listener();
//!     server.serve(listener, Default::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod status;
pub mod transport;

mod server;

pub use codec::Codec;
pub use config::ServerConfig;
pub use dispatch::{service_method, Dispatcher};
pub use error::{Result, RpcError};
pub use handler::{
    CallContext, CallMetadata, EndpointDescriptor, Endpoints, HandlerDescriptor, Message,
    MethodTable, Registry, RegistryError, Service, StreamBindable, Validatable,
};
pub use server::{Server, ServerBuilder};
pub use status::{BusinessError, DispatchError, HandlerError, Status, StatusKind};
pub use transport::{Acceptor, ServerStream, StreamHandle};
