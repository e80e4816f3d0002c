//! Request/response message types and their optional capabilities.
//!
//! Every request and response type implements [`Message`]. A type opts into
//! a capability by answering the matching query with `Some(self)`:
//!
//! - [`Validatable`] on requests: checked after decoding, before the handler runs
//! - [`StreamBindable`] on responses: receives the live stream of a stream call
//!
//! The [`message!`](crate::message) macro writes these impls.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::status::BoxError;
use crate::transport::StreamHandle;

/// A type that can travel as a request or response payload.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Validation capability, if this type has one.
    fn as_validatable(&self) -> Option<&dyn Validatable> {
        None
    }

    /// Stream binding capability, if this type has one.
    fn as_stream_bindable(&mut self) -> Option<&mut dyn StreamBindable> {
        None
    }
}

/// Request-side check run before the handler is invoked.
pub trait Validatable {
    fn validate(&self) -> Result<(), BoxError>;
}

/// Response-side hook that receives the call's stream.
///
/// Stream handlers read and write through the bound handle for the rest of
/// the call.
pub trait StreamBindable {
    fn bind_stream(&mut self, stream: StreamHandle);
}

impl Message for () {}

/// Implement [`Message`] for a type, optionally wiring its capabilities.
///
/// ```
/// use rpcmux::{message, Validatable};
/// use rpcmux::status::BoxError;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize, Default)]
/// struct SayRequest { text: String }
///
/// impl Validatable for SayRequest {
///     fn validate(&self) -> Result<(), BoxError> {
///         if self.text.is_empty() {
///             return Err("text is empty".into());
///         }
///         Ok(())
///     }
/// }
///
/// message!(SayRequest: validate);
/// ```
#[macro_export]
macro_rules! message {
    ($ty:ty: validate, bind_stream) => {
        impl $crate::Message for $ty {
            fn as_validatable(&self) -> Option<&dyn $crate::Validatable> {
                Some(self)
            }

            fn as_stream_bindable(&mut self) -> Option<&mut dyn $crate::StreamBindable> {
                Some(self)
            }
        }
    };
    ($ty:ty: validate) => {
        impl $crate::Message for $ty {
            fn as_validatable(&self) -> Option<&dyn $crate::Validatable> {
                Some(self)
            }
        }
    };
    ($ty:ty: bind_stream) => {
        impl $crate::Message for $ty {
            fn as_stream_bindable(&mut self) -> Option<&mut dyn $crate::StreamBindable> {
                Some(self)
            }
        }
    };
    ($($ty:ty),+ $(,)?) => {
        $(impl $crate::Message for $ty {})+
    };
}
