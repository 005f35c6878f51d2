//! Message codecs used by byte-oriented transports.
//!
//! The in-memory transport moves [`Message`] values directly and never needs
//! a codec; the stream transport encodes each message with the [`Encoding`]
//! it was built with.

use std::fmt;

use serde::{Serialize, de::DeserializeOwned};

use crate::{DecodeError, EncodeError, Message};

/// Encoding format identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encoding {
    /// Postcard: compact binary format.
    #[default]
    Postcard = 1,
    /// JSON: human-readable format (for debugging/tooling).
    Json = 2,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Postcard => write!(f, "postcard"),
            Encoding::Json => write!(f, "json"),
        }
    }
}

/// Codec trait for message serialization.
pub trait Codec {
    const ENCODING: Encoding;

    type EncodeError: std::error::Error;
    type DecodeError: std::error::Error;

    fn encode<T: Serialize>(val: &T) -> Result<Vec<u8>, Self::EncodeError>;

    fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T, Self::DecodeError>;
}

/// Postcard codec: compact binary format using postcard serialization.
pub struct PostcardCodec;

impl Codec for PostcardCodec {
    const ENCODING: Encoding = Encoding::Postcard;
    type EncodeError = postcard::Error;
    type DecodeError = postcard::Error;

    fn encode<T: Serialize>(val: &T) -> Result<Vec<u8>, Self::EncodeError> {
        postcard::to_allocvec(val)
    }

    fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T, Self::DecodeError> {
        postcard::from_bytes(buf)
    }
}

/// JSON codec: human-readable format using serde_json.
pub struct JsonCodec;

impl Codec for JsonCodec {
    const ENCODING: Encoding = Encoding::Json;
    type EncodeError = serde_json::Error;
    type DecodeError = serde_json::Error;

    fn encode<T: Serialize>(val: &T) -> Result<Vec<u8>, Self::EncodeError> {
        serde_json::to_vec(val)
    }

    fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T, Self::DecodeError> {
        serde_json::from_slice(buf)
    }
}

impl Encoding {
    pub fn encode_message(self, message: &Message) -> Result<Vec<u8>, EncodeError> {
        match self {
            Encoding::Postcard => PostcardCodec::encode(message)
                .map_err(|e| EncodeError::Serialize(e.to_string())),
            Encoding::Json => {
                JsonCodec::encode(message).map_err(|e| EncodeError::Serialize(e.to_string()))
            }
        }
    }

    pub fn decode_message(self, buf: &[u8]) -> Result<Message, DecodeError> {
        match self {
            Encoding::Postcard => {
                PostcardCodec::decode(buf).map_err(|e| DecodeError::Deserialize(e.to_string()))
            }
            Encoding::Json => {
                JsonCodec::decode(buf).map_err(|e| DecodeError::Deserialize(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message::new("greeting/hello")
            .with_stream_id(9)
            .with_header("client-send-time", "1700000000000")
            .with_payload(&b"joe"[..])
    }

    #[test]
    fn message_survives_both_encodings() {
        for encoding in [Encoding::Postcard, Encoding::Json] {
            let bytes = encoding.encode_message(&sample()).unwrap();
            let decoded = encoding.decode_message(&bytes).unwrap();
            assert_eq!(decoded, sample(), "{encoding}");
        }
    }

    #[test]
    fn json_is_human_readable() {
        let bytes = Encoding::Json.encode_message(&sample()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("greeting/hello"));
        assert!(text.contains("sid"));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            Encoding::Json.decode_message(b"not valid json {"),
            Err(DecodeError::Deserialize(_))
        ));
        assert!(Encoding::Postcard.decode_message(&[0xFF, 0xFF, 0xFF]).is_err());
    }

    #[test]
    fn postcard_is_more_compact_than_json() {
        let postcard = Encoding::Postcard.encode_message(&sample()).unwrap();
        let json = Encoding::Json.encode_message(&sample()).unwrap();
        assert!(postcard.len() < json.len());
    }
}
