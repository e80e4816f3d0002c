//! Handler module - registration and per-call context.
//!
//! Provides:
//! - [`Service`] / [`MethodTable`] - typed listing of a handler's methods
//! - [`Registry`] - maps routing keys to [`HandlerDescriptor`]s
//! - [`EndpointDescriptor`] / [`Endpoints`] - explicit routing tables
//! - [`CallContext`] / [`CallMetadata`] - what a handler sees of its call
//! - [`Message`], [`Validatable`], [`StreamBindable`] - payload capabilities

mod context;
mod message;
mod registry;
mod service;

pub use context::{
    CallContext, CallMetadata, CONTENT_TYPE_KEY, REMOTE_KEY, TIMEOUT_KEY, X_CONTENT_TYPE_KEY,
};
pub use message::{Message, StreamBindable, Validatable};
pub use registry::{EndpointDescriptor, Endpoints, HandlerDescriptor, Registry, RegistryError};
pub use service::{MethodTable, Service};
