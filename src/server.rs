//! Server builder and serve loop.
//!
//! The [`ServerBuilder`] registers handler objects and sets limits. The
//! [`Server`] accepts calls from an [`Acceptor`], runs each one on its own
//! task through the [`Dispatcher`], and reports the terminal status back to
//! the transport.
//!
//! # Example
//!
//! ```ignore
//! use rpcmux::transport::mem;
//! use rpcmux::Server;
//! use tokio_util::sync::CancellationToken;
//!
//! let server = Server::builder()
//!     .register(Arc::new(Echo))?
//!     .max_concurrent_calls(64)
//!     .build();
//!
//! let (connector, listener) = mem::listener();
//! let shutdown = CancellationToken::new();
//! tokio::spawn(server.clone().serve_owned(listener, shutdown.clone()));
//! ```

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::error::{Result, RpcError};
use crate::handler::{Endpoints, Registry, RegistryError, Service};
use crate::transport::{Acceptor, ServerStream};

/// Builder for configuring and creating a [`Server`].
pub struct ServerBuilder {
    registry: Arc<Registry>,
    config: ServerConfig,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            config: ServerConfig::default(),
        }
    }

    /// Register every method of `service` under `Service.Method`.
    pub fn register<S: Service>(
        self,
        service: Arc<S>,
    ) -> std::result::Result<Self, RegistryError> {
        self.registry.register(service)?;
        Ok(self)
    }

    /// Register the methods of `service` listed in `endpoints`.
    pub fn register_with_endpoints<S: Service>(
        self,
        service: Arc<S>,
        endpoints: &Endpoints,
    ) -> std::result::Result<Self, RegistryError> {
        self.registry.register_with_endpoints(service, endpoints)?;
        Ok(self)
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Content type assumed when the caller declares none.
    ///
    /// Default: `application/grpc`
    pub fn default_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.config.default_content_type = content_type.into();
        self
    }

    /// Default: 16 MiB
    pub fn max_recv_msg_size(mut self, limit: usize) -> Self {
        self.config.max_recv_msg_size = limit;
        self
    }

    /// Default: 16 MiB
    pub fn max_send_msg_size(mut self, limit: usize) -> Self {
        self.config.max_send_msg_size = limit;
        self
    }

    /// Set the maximum number of calls handled at once.
    ///
    /// Calls beyond the limit stay with the acceptor until a running call
    /// finishes.
    /// Default: 256
    pub fn max_concurrent_calls(mut self, limit: usize) -> Self {
        self.config.max_concurrent_calls = limit;
        self
    }

    /// Finish configuration.
    ///
    /// Building the first server installs the process-wide panic hook
    /// described on [`Dispatcher::new`].
    pub fn build(self) -> Server {
        let max_calls = self.config.max_concurrent_calls.clamp(1, u32::MAX as usize);
        Server {
            dispatcher: Arc::new(Dispatcher::new(self.registry, self.config)),
            calls: Arc::new(Semaphore::new(max_calls)),
            max_calls,
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured server. Clones share the dispatcher and the call limit.
#[derive(Clone)]
pub struct Server {
    dispatcher: Arc<Dispatcher>,
    calls: Arc<Semaphore>,
    max_calls: usize,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.dispatcher.registry()
    }

    /// Dispatch one call and report its outcome on the stream.
    pub async fn handle(&self, stream: Arc<dyn ServerStream>) {
        let outcome = self
            .dispatcher
            .dispatch(stream.clone())
            .await
            .map_err(|e| e.status());
        stream.finish(outcome);
    }

    /// Accept and handle calls until `shutdown` fires or the acceptor is
    /// exhausted, then wait for in-flight calls to finish.
    pub async fn serve<A: Acceptor>(
        &self,
        mut acceptor: A,
        shutdown: CancellationToken,
    ) -> Result<()> {
        tracing::info!(
            methods = self.registry().len(),
            max_concurrent_calls = self.max_calls,
            "server started"
        );

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = self.calls.clone().acquire_owned() => permit
                    .map_err(|_| RpcError::Protocol("call limiter closed".into()))?,
            };

            let stream = tokio::select! {
                _ = shutdown.cancelled() => break,
                stream = acceptor.accept() => match stream {
                    Some(stream) => stream,
                    None => {
                        tracing::debug!("acceptor exhausted");
                        break;
                    }
                },
            };

            let server = self.clone();
            tokio::spawn(async move {
                // Held until the call is finished.
                let _permit = permit;
                server.handle(stream).await;
            });
        }

        tracing::info!("server stopping, draining in-flight calls");
        let _drained = self
            .calls
            .acquire_many(self.max_calls as u32)
            .await
            .map_err(|_| RpcError::Protocol("call limiter closed".into()))?;
        tracing::info!("server stopped");
        Ok(())
    }

    /// [`serve`](Self::serve) taking ownership, for `tokio::spawn`.
    pub async fn serve_owned<A: Acceptor>(
        self,
        acceptor: A,
        shutdown: CancellationToken,
    ) -> Result<()> {
        self.serve(acceptor, shutdown).await
    }
}
