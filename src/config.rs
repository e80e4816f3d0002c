//! Server configuration.

use serde::Deserialize;

use crate::codec::DEFAULT_CONTENT_TYPE;

/// Default maximum inbound message size (16 MiB).
pub const DEFAULT_MAX_RECV_MSG_SIZE: usize = 16 * 1024 * 1024;

/// Default maximum outbound message size (16 MiB).
pub const DEFAULT_MAX_SEND_MSG_SIZE: usize = 16 * 1024 * 1024;

/// Default maximum number of calls handled at once.
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 256;

/// Configuration for the dispatcher and the serve loop.
///
/// Missing fields take their defaults when deserialized, so a partial
/// config file is enough:
///
/// ```
/// use rpcmux::config::ServerConfig;
///
/// let config: ServerConfig = serde_json::from_str(r#"{"max_concurrent_calls": 8}"#).unwrap();
/// assert_eq!(config.max_concurrent_calls, 8);
/// assert_eq!(config.default_content_type, "application/grpc");
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Content type assumed when the caller sends neither
    /// `x-content-type` nor `content-type`.
    pub default_content_type: String,
    /// Largest inbound message accepted, in bytes.
    pub max_recv_msg_size: usize,
    /// Largest outbound message sent, in bytes.
    pub max_send_msg_size: usize,
    /// Calls beyond this limit wait for a running call to finish.
    pub max_concurrent_calls: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_content_type: DEFAULT_CONTENT_TYPE.to_string(),
            max_recv_msg_size: DEFAULT_MAX_RECV_MSG_SIZE,
            max_send_msg_size: DEFAULT_MAX_SEND_MSG_SIZE,
            max_concurrent_calls: DEFAULT_MAX_CONCURRENT_CALLS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.default_content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(config.max_recv_msg_size, 16 * 1024 * 1024);
        assert_eq!(config.max_send_msg_size, 16 * 1024 * 1024);
        assert_eq!(config.max_concurrent_calls, 256);
    }

    #[test]
    fn test_partial_deserialize() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"default_content_type":"application/json"}"#).unwrap();
        assert_eq!(config.default_content_type, "application/json");
        assert_eq!(config.max_recv_msg_size, DEFAULT_MAX_RECV_MSG_SIZE);
    }
}
