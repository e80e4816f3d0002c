//! Codec module - payload serialization selected by content type.
//!
//! - [`MsgPackCodec`] - compact binary default (`rmp-serde`)
//! - [`JsonCodec`] - JSON fallback (`serde_json`)
//! - [`Codec`] - the codec resolved for one call
//!
//! # Example
//!
//! ```
//! use rpcmux::codec::Codec;
//!
//! let codec = Codec::resolve("application/grpc+json; charset=utf-8").unwrap();
//! assert_eq!(codec, Codec::Json);
//!
//! let bytes = codec.encode(&"hello").unwrap();
//! let decoded: String = codec.decode(&bytes).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use crate::error::{Result, RpcError};

/// Default content type when the caller negotiates none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/grpc";

/// Payload codec for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    MsgPack,
    Json,
}

impl Codec {
    /// Select the codec for a content type.
    ///
    /// Parameters after `;` are ignored and matching is case-insensitive.
    /// Returns `None` for content types with no registered codec.
    pub fn resolve(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "application/grpc"
            | "application/grpc+proto"
            | "application/grpc+msgpack"
            | "application/msgpack"
            | "application/x-msgpack"
            | "application/octet-stream" => Some(Self::MsgPack),
            "application/grpc+json" | "application/json" | "text/json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Like [`Codec::resolve`], but reports the unknown content type as an error.
    pub fn try_resolve(content_type: &str) -> Result<Self> {
        Self::resolve(content_type)
            .ok_or_else(|| RpcError::UnsupportedContentType(content_type.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MsgPack => MsgPackCodec::NAME,
            Self::Json => JsonCodec::NAME,
        }
    }

    pub fn encode<T: serde::Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Self::MsgPack => MsgPackCodec::encode(value),
            Self::Json => JsonCodec::encode(value),
        }
    }

    pub fn decode<T: serde::de::DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Self::MsgPack => MsgPackCodec::decode(bytes),
            Self::Json => JsonCodec::decode(bytes),
        }
    }
}
