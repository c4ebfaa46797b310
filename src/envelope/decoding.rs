//! Turning raw message bodies into structured values.
use crate::envelope::Envelope;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub const TEXT_CONTENT_TYPE: &str = "text/plain";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// The structured view of a message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// The body was empty.
    Empty,
    /// No (or an unrecognised) content type: the raw bytes are handed over untouched.
    Bytes(Vec<u8>),
    Text(String),
    /// A JSON document: a scalar, a record or a sequence.
    Json(Value),
}

impl Decoded {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Json(Value::String(text)) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Deserialize the decoded body into a strongly-typed value.
    ///
    /// Text bodies are treated as JSON strings, raw bytes are parsed as a JSON document and
    /// an empty body is treated as `null` (so that `Option<T>` and `()` can be extracted).
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        match self {
            Self::Empty => serde_json::from_value(Value::Null),
            Self::Bytes(bytes) => serde_json::from_slice(bytes),
            Self::Text(text) => serde_json::from_value(Value::String(text.clone())),
            Self::Json(value) => T::deserialize(value),
        }
        .map_err(DecodeError::Schema)
    }
}

impl From<&str> for Decoded {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Value> for Decoded {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("The message body is not valid UTF-8 text")]
    InvalidText(#[source] std::string::FromUtf8Error),
    #[error("The message body is not a valid JSON document")]
    InvalidJson(#[source] serde_json::Error),
    #[error("The message body does not match the expected shape")]
    Schema(#[source] serde_json::Error),
    #[error("Failed to decode the message body")]
    Custom(#[source] anyhow::Error),
}

/// Decode a body according to its content type.
///
/// JSON content types are parsed as JSON, `text/*` content types as UTF-8 text.
/// Bodies without a content type, or with one we do not recognise, are left as raw bytes.
pub fn decode_body(body: &[u8], content_type: Option<&str>) -> Result<Decoded, DecodeError> {
    if body.is_empty() {
        return Ok(Decoded::Empty);
    }
    match content_type {
        Some(content_type) if content_type.contains("json") => serde_json::from_slice(body)
            .map(Decoded::Json)
            .map_err(DecodeError::InvalidJson),
        Some(content_type) if content_type.starts_with("text/") => String::from_utf8(body.to_vec())
            .map(Decoded::Text)
            .map_err(DecodeError::InvalidText),
        _ => Ok(Decoded::Bytes(body.to_vec())),
    }
}

/// Custom body decoding, attached to a single registered call.
#[async_trait::async_trait]
pub trait Decoder: Send + Sync + 'static {
    async fn decode(&self, envelope: &Envelope) -> Result<Decoded, DecodeError>;
}

/// Decodes bodies with [`decode_body`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecoder;

#[async_trait::async_trait]
impl Decoder for DefaultDecoder {
    async fn decode(&self, envelope: &Envelope) -> Result<Decoded, DecodeError> {
        decode_body(&envelope.body, envelope.content_type.as_deref())
    }
}

/// Wraps a synchronous decoding function. See [`MessageHandlerBuilder::decoder`].
///
/// [`MessageHandlerBuilder::decoder`]: crate::consumers::MessageHandlerBuilder::decoder
pub struct DecoderFn<F>(pub F);

#[async_trait::async_trait]
impl<F> Decoder for DecoderFn<F>
where
    F: Fn(&Envelope) -> Result<Decoded, DecodeError> + Send + Sync + 'static,
{
    async fn decode(&self, envelope: &Envelope) -> Result<Decoded, DecodeError> {
        (self.0)(envelope)
    }
}
