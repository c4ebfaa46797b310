use crate::envelope::decoding::{decode_body, DecodeError, Decoded, JSON_CONTENT_TYPE, TEXT_CONTENT_TYPE};
use crate::envelope::Headers;
use serde::Serialize;

/// An outgoing message body, together with the metadata needed to decode it on the other side.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Payload {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub headers: Headers,
}

impl Payload {
    /// Raw bytes, without a content type.
    pub fn bytes(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            body: text.into().into_bytes(),
            content_type: Some(TEXT_CONTENT_TYPE.into()),
            headers: Headers::new(),
        }
    }

    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            body: serde_json::to_vec(value)?,
            content_type: Some(JSON_CONTENT_TYPE.into()),
            headers: Headers::new(),
        })
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Decode the payload the same way an inbound message with this body would be decoded.
    pub fn decode(&self) -> Result<Decoded, DecodeError> {
        decode_body(&self.body, self.content_type.as_deref())
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(body: Vec<u8>) -> Self {
        Self::bytes(body)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self {
            body: value.to_string().into_bytes(),
            content_type: Some(JSON_CONTENT_TYPE.into()),
            headers: Headers::new(),
        }
    }
}

/// What a handler gives back: `None` means there is nothing to reply or publish.
pub type Reply = Option<Payload>;

/// Conversion of handler return values into a [`Reply`].
pub trait IntoReply {
    fn into_reply(self) -> Reply;
}

impl IntoReply for () {
    fn into_reply(self) -> Reply {
        None
    }
}

impl IntoReply for Payload {
    fn into_reply(self) -> Reply {
        Some(self)
    }
}

impl IntoReply for Option<Payload> {
    fn into_reply(self) -> Reply {
        self
    }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> Reply {
        Some(self.into())
    }
}

impl IntoReply for String {
    fn into_reply(self) -> Reply {
        Some(self.into())
    }
}

impl IntoReply for Vec<u8> {
    fn into_reply(self) -> Reply {
        Some(self.into())
    }
}

impl IntoReply for serde_json::Value {
    fn into_reply(self) -> Reply {
        Some(self.into())
    }
}

#[cfg(test)]
mod tests {
    use super::{IntoReply, Payload};
    use crate::envelope::Decoded;
    use serde_json::json;

    #[test]
    fn payloads_decode_like_inbound_messages() {
        assert_eq!(Payload::text("pong").decode().unwrap(), Decoded::Text("pong".into()));
        assert_eq!(
            Payload::json(&json!({"a": [1, 2]})).unwrap().decode().unwrap(),
            Decoded::Json(json!({"a": [1, 2]}))
        );
        assert_eq!(Payload::bytes(vec![1]).decode().unwrap(), Decoded::Bytes(vec![1]));
    }

    #[test]
    fn unit_means_no_reply() {
        assert_eq!(().into_reply(), None);
        assert_eq!("pong".into_reply(), Some(Payload::text("pong")));
    }
}
