//! Error types for transport and codec operations.
//!
//! Caller-visible outcomes of a dispatched call live in [`crate::status`];
//! this module covers the lower-level failures those outcomes are built from.

use thiserror::Error;

/// Main error type for transport and codec operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error reported by the transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// No codec is registered for the negotiated content type.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// Message exceeds the configured size limit.
    #[error("message of {len} bytes exceeds limit of {max} bytes")]
    MessageTooLarge { len: usize, max: usize },

    /// Peer closed its side before the expected message arrived.
    #[error("stream closed")]
    StreamClosed,

    /// Protocol error (malformed method name, call already finished, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
