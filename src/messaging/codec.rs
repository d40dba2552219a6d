//! Payload encoding used by the Kafka backend

use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;

/// Encoding or decoding failure
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct CodecError(String);

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError(err.to_string())
    }
}

/// Converts payloads to and from record bytes
pub trait PayloadCodec<T>: Send + Sync {
    fn encode(&self, payload: &T) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec backed by serde_json
pub struct JsonCodec<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned> PayloadCodec<T> for JsonCodec<T> {
    fn encode(&self, payload: &T) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(payload)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Dummy {
        value: String,
    }

    #[test]
    fn test_json_codec_encodes_fields() {
        let codec = JsonCodec::<Dummy>::new();
        let bytes = codec
            .encode(&Dummy {
                value: "hello".into(),
            })
            .unwrap();
        assert_eq!(bytes, br#"{"value":"hello"}"#);
    }

    #[test]
    fn test_json_codec_rejects_malformed() {
        let codec = JsonCodec::<Dummy>::new();
        assert!(codec.decode(b"{not json").is_err());
        assert!(codec.decode(br#"{"other":1}"#).is_err());
    }
}
