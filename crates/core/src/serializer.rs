//! Response body decoding

use crate::descriptor::ResponseSerializerType;
use crate::error::SerializationError;
use bytes::Bytes;

/// Decoded response body
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseObject {
    /// Undecoded bytes
    Raw(Bytes),
    /// Parsed JSON
    Json(serde_json::Value),
    /// XML document text, checked to be well-formed UTF-8 markup
    Xml(String),
}

impl ResponseObject {
    /// The JSON value, if this is a JSON body
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Turns body bytes into a [`ResponseObject`]
pub trait Serializer: Send + Sync + std::fmt::Debug {
    /// Decode `bytes` as `kind`
    fn parse(
        &self,
        bytes: &Bytes,
        kind: ResponseSerializerType,
    ) -> Result<ResponseObject, SerializationError>;
}

/// `serde_json` for JSON, pass-through for raw bodies, a UTF-8 and root
/// element check for XML.
///
/// An empty JSON body decodes to `null` so that `204 No Content` succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSerializer;

impl Serializer for DefaultSerializer {
    fn parse(
        &self,
        bytes: &Bytes,
        kind: ResponseSerializerType,
    ) -> Result<ResponseObject, SerializationError> {
        let fail = |message: String| SerializationError {
            kind: kind.to_string(),
            message,
        };
        match kind {
            ResponseSerializerType::Http => Ok(ResponseObject::Raw(bytes.clone())),
            ResponseSerializerType::Json => {
                if bytes.iter().all(u8::is_ascii_whitespace) {
                    return Ok(ResponseObject::Json(serde_json::Value::Null));
                }
                serde_json::from_slice(bytes)
                    .map(ResponseObject::Json)
                    .map_err(|e| fail(e.to_string()))
            }
            ResponseSerializerType::Xml => {
                let text = std::str::from_utf8(bytes).map_err(|e| fail(e.to_string()))?;
                let trimmed = text.trim_start_matches('\u{feff}').trim();
                if trimmed.starts_with('<') && trimmed.ends_with('>') {
                    Ok(ResponseObject::Xml(text.to_string()))
                } else {
                    Err(fail("document has no root element".to_string()))
                }
            }
        }
    }
}
