//! Opaque byte <-> typed value codec, injectable per `HandlerRegistry` entry.
//!
//! The store and manager never look inside a payload; only the codec
//! paired with a given handler knows how to turn bytes into the handler's
//! argument type and back.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::JobError;

pub trait Serializer: Send + Sync {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, JobError>;
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, JobError>;
}

/// JSON codec, the default for payloads and results.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, JobError> {
        serde_json::to_vec(value).map_err(|e| JobError::DeserializationError(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, JobError> {
        serde_json::from_slice(bytes).map_err(|e| JobError::DeserializationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Echo {
        v: String,
    }

    #[test]
    fn json_roundtrips() {
        let codec = JsonSerializer;
        let bytes = codec.serialize(&Echo { v: "hi".into() }).unwrap();
        let back: Echo = codec.deserialize(&bytes).unwrap();
        assert_eq!(back, Echo { v: "hi".into() });
    }

    #[test]
    fn malformed_payload_is_deserialization_error() {
        let codec = JsonSerializer;
        let err = codec.deserialize::<Echo>(b"not json").unwrap_err();
        assert_eq!(err.code(), "DESERIALIZATION_ERROR");
    }
}
