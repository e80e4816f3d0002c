//! JSON codec using `serde_json`.
//!
//! Decoding goes through a generic [`serde_json::Value`] first and converts it
//! into the typed request afterwards, so a payload that is not JSON at all is
//! told apart from JSON that does not match the request shape.

use serde_json::Value;

use crate::error::Result;

/// JSON codec for structured data.
pub struct JsonCodec;

impl JsonCodec {
    /// Codec name as reported in logs.
    pub const NAME: &'static str = "json";

    /// Encode a value to JSON bytes.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode JSON bytes to a value.
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        let raw: Value = serde_json::from_slice(bytes)?;
        Ok(serde_json::from_value(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
    struct Req {
        text: String,
        #[serde(default)]
        count: u32,
    }

    #[test]
    fn test_decode_object() {
        let decoded: Req = JsonCodec::decode(br#"{"text":"hi","count":2}"#).unwrap();
        assert_eq!(
            decoded,
            Req {
                text: "hi".into(),
                count: 2
            }
        );
    }

    #[test]
    fn test_decode_missing_default_field() {
        let decoded: Req = JsonCodec::decode(br#"{"text":"hi"}"#).unwrap();
        assert_eq!(decoded.count, 0);
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        assert!(JsonCodec::decode::<Req>(b"{text:").is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        assert!(JsonCodec::decode::<Req>(br#"[1,2,3]"#).is_err());
    }

    #[test]
    fn test_encode_is_plain_json() {
        let encoded = JsonCodec::encode(&Req {
            text: "a".into(),
            count: 1,
        })
        .unwrap();
        assert_eq!(encoded, br#"{"text":"a","count":1}"#);
    }
}
