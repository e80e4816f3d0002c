//! Handler registry mapping routing keys to method descriptors.
//!
//! Routing keys are `Service.Method` by default. An [`Endpoints`] table
//! restricts registration to the methods it lists and indexes each one under
//! the endpoint's URL, plus its alias when one is given. One descriptor can
//! therefore sit under several keys; the last registration for a key wins.
//!
//! Registration takes the write lock once per handler; dispatch lookups take
//! the read lock.
//!
//! # Example
//!
//! ```ignore
//! use rpcmux::handler::{EndpointDescriptor, Endpoints, Registry};
//!
//! let registry = Registry::new();
//! registry.register(Arc::new(Echo))?;
//!
//! let endpoints: Endpoints = [
//!     EndpointDescriptor::new("Chat.Talk", "chat.v1.Talk").streaming(true, true),
//! ]
//! .into_iter()
//! .collect();
//! registry.register_with_endpoints(Arc::new(Chat), &endpoints)?;
//!
//! assert!(registry.get("Echo.Say").is_some());
//! assert!(registry.get("chat.v1.Talk").is_some());
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::service::{MethodEntry, MethodTable, Service};
use crate::dispatch::Invoker;

/// Registration failures. These are programming errors and are reported
/// before any key is inserted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A method name appears twice in one method table.
    #[error("duplicate method {service}.{method}")]
    DuplicateMethod {
        service: &'static str,
        method: &'static str,
    },

    /// Endpoint stream flags disagree with the method's shape.
    #[error("endpoint {key} declares stream={declared} but the method is {actual}")]
    ShapeMismatch {
        key: String,
        declared: bool,
        actual: &'static str,
    },

    /// Endpoint with an empty URL.
    #[error("endpoint for {0} has an empty url")]
    EmptyUrl(String),
}

/// Explicit routing for one method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// Logical method key, `Service.Method`.
    pub method: String,
    /// External routing key.
    pub url: String,
    /// Additional routing key.
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub client_stream: bool,
    #[serde(default)]
    pub server_stream: bool,
}

impl EndpointDescriptor {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            alias: None,
            client_stream: false,
            server_stream: false,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn streaming(mut self, client_stream: bool, server_stream: bool) -> Self {
        self.client_stream = client_stream;
        self.server_stream = server_stream;
        self
    }

    fn is_stream(&self) -> bool {
        self.client_stream || self.server_stream
    }
}

/// Endpoint table keyed by logical method, built once and shared across
/// registrations.
#[derive(Debug, Clone, Default)]
pub struct Endpoints(HashMap<String, EndpointDescriptor>);

impl Endpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, endpoint: EndpointDescriptor) {
        self.0.insert(endpoint.method.clone(), endpoint);
    }

    pub fn get(&self, method: &str) -> Option<&EndpointDescriptor> {
        self.0.get(method)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<EndpointDescriptor> for Endpoints {
    fn from_iter<I: IntoIterator<Item = EndpointDescriptor>>(iter: I) -> Self {
        let mut endpoints = Self::new();
        for endpoint in iter {
            endpoints.insert(endpoint);
        }
        endpoints
    }
}

/// Registered method. Immutable once built.
pub struct HandlerDescriptor {
    service: &'static str,
    method: &'static str,
    request_type: Option<&'static str>,
    response_type: &'static str,
    client_stream: bool,
    server_stream: bool,
    pub(crate) invoker: Invoker,
}

impl HandlerDescriptor {
    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    /// Request type name; `None` for methods without a request.
    pub fn request_type(&self) -> Option<&'static str> {
        self.request_type
    }

    pub fn response_type(&self) -> &'static str {
        self.response_type
    }

    pub fn client_stream(&self) -> bool {
        self.client_stream
    }

    pub fn server_stream(&self) -> bool {
        self.server_stream
    }

    /// Whether calls route to the stream invoker.
    #[inline]
    pub fn is_stream(&self) -> bool {
        self.client_stream || self.server_stream
    }
}

impl std::fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("service", &self.service)
            .field("method", &self.method)
            .field("request_type", &self.request_type)
            .field("response_type", &self.response_type)
            .field("client_stream", &self.client_stream)
            .field("server_stream", &self.server_stream)
            .finish()
    }
}

/// Registry mapping routing keys to handlers.
#[derive(Default)]
pub struct Registry {
    handlers: RwLock<HashMap<String, Arc<HandlerDescriptor>>>,
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every method of `service` under `Service.Method`.
    ///
    /// Returns the number of keys inserted.
    pub fn register<S: Service>(&self, service: Arc<S>) -> Result<usize, RegistryError> {
        self.register_inner(service, None)
    }

    /// Register the methods of `service` listed in `endpoints`.
    ///
    /// Methods absent from `endpoints` are skipped. Returns the number of
    /// keys inserted.
    pub fn register_with_endpoints<S: Service>(
        &self,
        service: Arc<S>,
        endpoints: &Endpoints,
    ) -> Result<usize, RegistryError> {
        self.register_inner(service, Some(endpoints))
    }

    fn register_inner<S: Service>(
        &self,
        service: Arc<S>,
        endpoints: Option<&Endpoints>,
    ) -> Result<usize, RegistryError> {
        let mut table = MethodTable::new(service);
        S::methods(&mut table);
        let entries = table.into_entries();

        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.name) {
                return Err(RegistryError::DuplicateMethod {
                    service: S::NAME,
                    method: entry.name,
                });
            }
        }

        let mut routes: Vec<(Vec<String>, Arc<HandlerDescriptor>)> = Vec::new();
        for entry in entries {
            let key = format!("{}.{}", S::NAME, entry.name);
            let (keys, client_stream, server_stream) = match endpoints {
                None => (vec![key], entry.client_stream, entry.server_stream),
                Some(endpoints) => {
                    let Some(endpoint) = endpoints.get(&key) else {
                        continue;
                    };
                    check_endpoint(&key, endpoint, &entry)?;
                    let mut keys = vec![endpoint.url.clone()];
                    if let Some(alias) = endpoint.alias.as_ref().filter(|a| !a.is_empty()) {
                        if alias != &endpoint.url {
                            keys.push(alias.clone());
                        }
                    }
                    (keys, endpoint.client_stream, endpoint.server_stream)
                }
            };

            let descriptor = Arc::new(HandlerDescriptor {
                service: S::NAME,
                method: entry.name,
                request_type: entry.request_type,
                response_type: entry.response_type,
                client_stream,
                server_stream,
                invoker: entry.invoker,
            });
            routes.push((keys, descriptor));
        }

        let mut handlers = self.handlers.write();
        let mut inserted = 0;
        for (keys, descriptor) in routes {
            for key in keys {
                tracing::info!(
                    key = %key,
                    method = %format_args!("{}.{}", descriptor.service, descriptor.method),
                    client_stream = descriptor.client_stream,
                    server_stream = descriptor.server_stream,
                    "registered handler"
                );
                handlers.insert(key, descriptor.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Look up the descriptor for a routing key.
    pub fn get(&self, key: &str) -> Option<Arc<HandlerDescriptor>> {
        self.handlers.read().get(key).cloned()
    }

    /// All routing keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handlers.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

fn check_endpoint(
    key: &str,
    endpoint: &EndpointDescriptor,
    entry: &MethodEntry,
) -> Result<(), RegistryError> {
    if endpoint.url.is_empty() {
        return Err(RegistryError::EmptyUrl(key.to_string()));
    }
    if endpoint.is_stream() != entry.is_stream() {
        return Err(RegistryError::ShapeMismatch {
            key: key.to_string(),
            declared: endpoint.is_stream(),
            actual: if entry.is_stream() { "streaming" } else { "unary" },
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{CallContext, StreamBindable};
    use crate::status::HandlerError;
    use crate::transport::StreamHandle;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Default)]
    struct Text {
        text: String,
    }

    #[derive(Serialize, Deserialize, Default)]
    struct Feed {
        #[serde(skip)]
        stream: Option<StreamHandle>,
    }

    impl StreamBindable for Feed {
        fn bind_stream(&mut self, stream: StreamHandle) {
            self.stream = Some(stream);
        }
    }

    crate::message!(Text);
    crate::message!(Feed: bind_stream);

    struct Echo;

    impl Service for Echo {
        const NAME: &'static str = "Echo";

        fn methods(table: &mut MethodTable<Self>) {
            table
                .unary("Say", |_svc, _ctx: CallContext, req: Text| async move {
                    Ok::<_, HandlerError>(req)
                })
                .unary_empty("Ping", |_svc, _ctx: CallContext| async move {
                    Ok::<_, HandlerError>(Text::default())
                })
                .stream_empty("Watch", |_svc, _ctx: CallContext, _resp: Feed| async move {
                    Ok::<_, HandlerError>(())
                });
        }
    }

    struct Twice;

    impl Service for Twice {
        const NAME: &'static str = "Twice";

        fn methods(table: &mut MethodTable<Self>) {
            table
                .unary_empty("A", |_svc, _ctx: CallContext| async move {
                    Ok::<_, HandlerError>(Text::default())
                })
                .unary_empty("A", |_svc, _ctx: CallContext| async move {
                    Ok::<_, HandlerError>(Text::default())
                });
        }
    }

    #[test]
    fn test_register_default_keys() {
        let registry = Registry::new();
        let inserted = registry.register(Arc::new(Echo)).unwrap();

        assert_eq!(inserted, 3);
        assert_eq!(registry.keys(), vec!["Echo.Ping", "Echo.Say", "Echo.Watch"]);

        let say = registry.get("Echo.Say").unwrap();
        assert_eq!(say.service(), "Echo");
        assert_eq!(say.method(), "Say");
        assert!(say.request_type().is_some());
        assert!(!say.is_stream());

        let ping = registry.get("Echo.Ping").unwrap();
        assert!(ping.request_type().is_none());

        let watch = registry.get("Echo.Watch").unwrap();
        assert!(watch.is_stream());
        assert!(!watch.client_stream());
        assert!(watch.server_stream());
    }

    #[test]
    fn test_register_with_endpoints_filters_and_aliases() {
        let registry = Registry::new();
        let endpoints: Endpoints = [
            EndpointDescriptor::new("Echo.Say", "/api/echo/say").alias("echo.say"),
            EndpointDescriptor::new("Echo.Watch", "/api/echo/watch").streaming(false, true),
        ]
        .into_iter()
        .collect();

        let inserted = registry
            .register_with_endpoints(Arc::new(Echo), &endpoints)
            .unwrap();

        assert_eq!(inserted, 3);
        assert!(registry.get("Echo.Say").is_none());
        assert!(registry.get("Echo.Ping").is_none());

        let by_url = registry.get("/api/echo/say").unwrap();
        let by_alias = registry.get("echo.say").unwrap();
        assert!(Arc::ptr_eq(&by_url, &by_alias));
        assert!(registry.get("/api/echo/watch").unwrap().server_stream());
    }

    #[test]
    fn test_endpoint_shape_mismatch() {
        let registry = Registry::new();
        let endpoints: Endpoints = [EndpointDescriptor::new("Echo.Say", "say").streaming(true, true)]
            .into_iter()
            .collect();

        let err = registry
            .register_with_endpoints(Arc::new(Echo), &endpoints)
            .unwrap_err();
        assert!(matches!(err, RegistryError::ShapeMismatch { declared: true, .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_endpoint_empty_url() {
        let registry = Registry::new();
        let endpoints: Endpoints = [EndpointDescriptor::new("Echo.Say", "")].into_iter().collect();

        let err = registry
            .register_with_endpoints(Arc::new(Echo), &endpoints)
            .unwrap_err();
        assert_eq!(err, RegistryError::EmptyUrl("Echo.Say".into()));
    }

    #[test]
    fn test_duplicate_method_rejected() {
        let registry = Registry::new();
        let err = registry.register(Arc::new(Twice)).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateMethod {
                service: "Twice",
                method: "A"
            }
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = Registry::new();
        registry.register(Arc::new(Echo)).unwrap();
        let first = registry.get("Echo.Say").unwrap();

        registry.register(Arc::new(Echo)).unwrap();
        let second = registry.get("Echo.Say").unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_endpoints_from_json() {
        let list: Vec<EndpointDescriptor> = serde_json::from_str(
            r#"[{"method":"Echo.Say","url":"/echo/say"},
                {"method":"Echo.Watch","url":"/echo/watch","server_stream":true}]"#,
        )
        .unwrap();
        let endpoints: Endpoints = list.into_iter().collect();

        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints.get("Echo.Say").unwrap().alias, None);
        assert!(endpoints.get("Echo.Watch").unwrap().server_stream);
    }
}
