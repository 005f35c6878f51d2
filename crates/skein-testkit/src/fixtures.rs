//! Greeting and quote services used across the integration tests.
//!
//! Payloads are JSON so failures are readable in logs.

use std::fmt;
use std::time::Duration;

use futures_util::future;
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use skein_core::{Codec, JsonCodec, Message};
use tokio_stream::wrappers::IntervalStream;

use crate::{ServiceError, ServiceRegistry};

pub const GREETING: &str = "greeting";
pub const QUOTES: &str = "quotes";

/// Gap between elements of the ticking streams.
pub const TICK: Duration = Duration::from_millis(5);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetingRequest {
    pub name: String,
    /// How long the slow handler waits before answering.
    #[serde(default)]
    pub delay_ms: u64,
}

impl GreetingRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay_ms: 0,
        }
    }

    pub fn delayed(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay_ms: delay.as_millis() as u64,
        }
    }
}

impl fmt::Display for GreetingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GreetingRequest{{name='{}'}}", self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetingResponse {
    pub result: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyGreetingResponse {}

/// A `service/method` request carrying `data` as its JSON payload.
pub fn request<T: Serialize>(qualifier: &str, data: &T) -> Result<Message, ServiceError> {
    Ok(Message::new(qualifier).with_payload(encode(data)?))
}

/// Decode the JSON payload of `message`.
pub fn data<T: DeserializeOwned>(message: &Message) -> Result<T, ServiceError> {
    JsonCodec::decode(message.payload())
        .map_err(|e| ServiceError::new(400, format!("bad payload: {e}")))
}

fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>, ServiceError> {
    JsonCodec::encode(data).map_err(|e| ServiceError::internal(format!("cannot encode: {e}")))
}

fn respond<T: Serialize>(data: &T) -> Result<Message, ServiceError> {
    Ok(Message::default().with_payload(encode(data)?))
}

fn hello(name: &str) -> String {
    format!(" hello to: {name}")
}

/// The greeting service.
///
/// | method                  | pattern      | behaviour                                   |
/// |-------------------------|--------------|---------------------------------------------|
/// | `greeting`              | request_one  | `" hello to: <name>"` for a JSON string     |
/// | `greetingNoParams`      | request_one  | `"hello unknown"`                           |
/// | `greetingRequest`       | request_one  | [`GreetingResponse`] for a [`GreetingRequest`] |
/// | `greetingRequestTimeout`| request_one  | same, after the request's `delay_ms`        |
/// | `greetingNever`         | request_one  | never answers                               |
/// | `emptyGreeting`         | request_one  | an empty JSON object                        |
/// | `failingGreeting`       | request_one  | fails with the request's `Display`          |
/// | `greetingVoid`          | one_way      | succeeds                                    |
/// | `failingVoid`           | one_way      | fails with the request's `Display`          |
/// | `greetingVoidNever`     | one_way      | never acknowledges                          |
/// | `manyStream`            | request_many | `0..n` for a JSON number `n`, one per tick  |
pub fn greeting_service() -> ServiceRegistry {
    let q = |method: &str| format!("{GREETING}/{method}");

    ServiceRegistry::new()
        .request_one(q("greeting"), |request| async move {
            let name: String = data(&request)?;
            respond(&hello(&name))
        })
        .request_one(q("greetingNoParams"), |_| async move {
            respond(&"hello unknown")
        })
        .request_one(q("greetingRequest"), |request| async move {
            let greeting: GreetingRequest = data(&request)?;
            respond(&GreetingResponse {
                result: hello(&greeting.name),
            })
        })
        .request_one(q("greetingRequestTimeout"), |request| async move {
            let greeting: GreetingRequest = data(&request)?;
            tokio::time::sleep(Duration::from_millis(greeting.delay_ms)).await;
            respond(&GreetingResponse {
                result: hello(&greeting.name),
            })
        })
        .request_one(q("greetingNever"), |_| future::pending())
        .request_one(q("emptyGreeting"), |_| async move {
            respond(&EmptyGreetingResponse {})
        })
        .request_one(q("failingGreeting"), |request| async move {
            let greeting: GreetingRequest = data(&request)?;
            Err::<Message, _>(ServiceError::internal(greeting.to_string()))
        })
        .one_way(q("greetingVoid"), |request| async move {
            let greeting: GreetingRequest = data(&request)?;
            tracing::debug!(name = %greeting.name, "void greeting");
            Ok::<_, ServiceError>(())
        })
        .one_way(q("failingVoid"), |request| async move {
            let greeting: GreetingRequest = data(&request)?;
            Err::<(), _>(ServiceError::new(400, greeting.to_string()))
        })
        .one_way(q("greetingVoidNever"), |_| future::pending())
        .request_many(q("manyStream"), |request| {
            let count: Result<u64, ServiceError> = data(&request);
            match count {
                Ok(count) => ticks()
                    .take(count as usize)
                    .map(|n| respond(&n))
                    .boxed(),
                Err(e) => stream::once(future::ready(Err(e))).boxed(),
            }
        })
}

/// The quote service.
///
/// `onlyOneAndThenNever` sends one quote and then stays open forever;
/// `quotes` ticks forever.
pub fn quote_service() -> ServiceRegistry {
    ServiceRegistry::new()
        .request_many(format!("{QUOTES}/onlyOneAndThenNever"), |_| {
            stream::once(future::ready(respond(&"only first"))).chain(stream::pending())
        })
        .request_many(format!("{QUOTES}/quotes"), |_| {
            ticks().map(|n| respond(&format!("quote : {n}")))
        })
}

/// `0, 1, 2, ...`, one per [`TICK`], the first immediately.
fn ticks() -> impl Stream<Item = u64> + Send + 'static {
    IntervalStream::new(tokio::time::interval(TICK))
        .enumerate()
        .map(|(n, _)| n as u64)
}
