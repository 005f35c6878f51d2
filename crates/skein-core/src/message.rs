//! The message envelope and the headers the transport manages itself.
//!
//! A [`Message`] is immutable once built: every `with_*` method consumes the
//! message and returns a derived copy. The transport injects the stream id,
//! the signal and the client timestamps; it never looks at the payload.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Header carrying the per-connection stream id.
pub const STREAM_ID: &str = "sid";
/// Header carrying a [`Signal`] code. Absent on payload frames.
pub const SIGNAL: &str = "sig";
/// Milliseconds since the Unix epoch when the client handed the frame to the transport.
pub const CLIENT_SEND_TIME: &str = "client-send-time";
/// Milliseconds since the Unix epoch when the client received the frame.
pub const CLIENT_RECV_TIME: &str = "client-recv-time";
/// Error code on an [`Signal::Error`] frame.
pub const ERROR_CODE: &str = "error-code";
/// Human-readable error on an [`Signal::Error`] frame.
pub const ERROR_MESSAGE: &str = "error-message";

/// Terminal and control signals carried in the [`SIGNAL`] header.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signal {
    /// The stream finished normally.
    Complete = 1,
    /// The stream failed; see [`ERROR_CODE`] / [`ERROR_MESSAGE`].
    Error = 2,
    /// The sender is no longer interested in this stream.
    Cancel = 3,
}

impl Signal {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Signal::Complete),
            2 => Some(Signal::Error),
            3 => Some(Signal::Cancel),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Complete => write!(f, "complete"),
            Signal::Error => write!(f, "error"),
            Signal::Cancel => write!(f, "cancel"),
        }
    }
}

/// Service request or response envelope.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    qualifier: String,
    /// Insertion-ordered; setting an existing key replaces it in place.
    headers: Vec<(String, String)>,
    payload: Bytes,
}

impl Message {
    pub fn new(qualifier: impl Into<String>) -> Self {
        Self {
            qualifier: qualifier.into(),
            headers: Vec::new(),
            payload: Bytes::new(),
        }
    }

    /// A bare frame addressed to `stream_id`, used for signals.
    pub fn signal(stream_id: u64, signal: Signal) -> Self {
        Message::default()
            .with_stream_id(stream_id)
            .with_header(SIGNAL, signal.code().to_string())
    }

    /// An error frame for `stream_id`.
    pub fn error(stream_id: u64, code: i32, message: impl Into<String>) -> Self {
        Message::signal(stream_id, Signal::Error)
            .with_header(ERROR_CODE, code.to_string())
            .with_header(ERROR_MESSAGE, message)
    }

    pub fn qualifier(&self) -> &str {
        &self.qualifier
    }

    /// The service part of a `service/method` qualifier.
    pub fn service_name(&self) -> &str {
        service_name(&self.qualifier)
    }

    /// The method part of a `service/method` qualifier, if there is one.
    pub fn method_name(&self) -> Option<&str> {
        self.qualifier.split_once('/').map(|(_, method)| method)
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn has_payload(&self) -> bool {
        !self.payload.is_empty()
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.headers.push((key, value)),
        }
        self
    }

    pub fn without_header(mut self, key: &str) -> Self {
        self.headers.retain(|(k, _)| k != key);
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_stream_id(self, stream_id: u64) -> Self {
        self.with_header(STREAM_ID, stream_id.to_string())
    }

    /// The stream id header, if present and well-formed.
    pub fn stream_id(&self) -> Option<u64> {
        self.header(STREAM_ID)?.parse().ok()
    }

    /// The signal header, if present and known.
    pub fn signal_kind(&self) -> Option<Signal> {
        Signal::from_code(self.header(SIGNAL)?.parse().ok()?)
    }

    /// Error code and message of an error frame.
    pub fn error_data(&self) -> Option<(i32, &str)> {
        if self.signal_kind() != Some(Signal::Error) {
            return None;
        }
        let code = self
            .header(ERROR_CODE)
            .and_then(|c| c.parse().ok())
            .unwrap_or(ERROR_CODE_INTERNAL);
        Some((code, self.header(ERROR_MESSAGE).unwrap_or_default()))
    }

    pub(crate) fn stamped(self, header: &'static str) -> Self {
        self.with_header(header, now_millis().to_string())
    }
}

/// Error code used when an error frame carries none.
pub const ERROR_CODE_INTERNAL: i32 = 500;

pub fn service_name(qualifier: &str) -> &str {
    qualifier
        .split_once('/')
        .map_or(qualifier, |(service, _)| service)
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_override_keeps_position() {
        let msg = Message::new("greeting/hello")
            .with_header("a", "1")
            .with_header("b", "2")
            .with_header("a", "3");
        let headers: Vec<_> = msg.headers().collect();
        assert_eq!(headers, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn derived_message_leaves_original_untouched() {
        let original = Message::new("greeting/hello").with_payload("joe");
        let derived = original.clone().with_stream_id(7);
        assert_eq!(original.stream_id(), None);
        assert_eq!(derived.stream_id(), Some(7));
        assert_eq!(derived.payload(), original.payload());
    }

    #[test]
    fn qualifier_parts() {
        let msg = Message::new("quotes/onlyOneAndThenNever");
        assert_eq!(msg.service_name(), "quotes");
        assert_eq!(msg.method_name(), Some("onlyOneAndThenNever"));
        assert_eq!(Message::new("bare").service_name(), "bare");
    }

    #[test]
    fn cancel_frame_carries_stream_id_and_signal() {
        let cancel = Message::signal(42, Signal::Cancel);
        assert_eq!(cancel.stream_id(), Some(42));
        assert_eq!(cancel.signal_kind(), Some(Signal::Cancel));
        assert_eq!(cancel.header(SIGNAL), Some("3"));
        assert!(!cancel.has_payload());
    }

    #[test]
    fn error_frame_round_trips_message() {
        let err = Message::error(3, 400, "GreetingRequest{name='joe'}");
        assert_eq!(err.error_data(), Some((400, "GreetingRequest{name='joe'}")));
        assert_eq!(Message::signal(3, Signal::Complete).error_data(), None);
    }
}
