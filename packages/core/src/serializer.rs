//! Encoding of payload mappings to queue blobs.

use serde_json::{Map, Value};

use crate::error::SerializerError;

/// Two-way conversion between a mapping and its stored form.
pub trait Serializer: Send + Sync + 'static {
    fn serialize(&self, payload: &Map<String, Value>) -> Result<String, SerializerError>;

    fn unserialize(&self, encoded: &str) -> Result<Map<String, Value>, SerializerError>;
}

/// Compact JSON. Slashes and non-ASCII text are written unescaped and floats
/// keep their fractional part (`1.0` stays `1.0`).
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, payload: &Map<String, Value>) -> Result<String, SerializerError> {
        Ok(serde_json::to_string(payload)?)
    }

    fn unserialize(&self, encoded: &str) -> Result<Map<String, Value>, SerializerError> {
        match serde_json::from_str(encoded)? {
            Value::Object(map) => Ok(map),
            _ => Err(SerializerError::NotAMapping),
        }
    }
}
