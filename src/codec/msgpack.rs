//! Default codec: MessagePack via `rmp-serde`.
//!
//! Structs travel as maps keyed by field name (`to_vec_named`), so a peer
//! that adds, drops or reorders fields still decodes what it knows.

use crate::error::Result;

/// MessagePack payload codec.
pub struct MsgPackCodec;

impl MsgPackCodec {
    pub const NAME: &'static str = "msgpack";

    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
