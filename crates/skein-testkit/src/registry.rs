//! Qualifier → handler table for the remote side of a test.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{BoxStream, Stream, StreamExt};
use skein_core::{ERROR_CODE_INTERNAL, Message};

/// An application failure raised by a handler.
///
/// Travels back to the caller as an ERROR frame; the caller sees `message`
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    pub code: i32,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// A failure with the generic internal error code.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ERROR_CODE_INTERNAL, message)
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for ServiceError {}

type OneWayFn = dyn Fn(Message) -> BoxFuture<'static, Result<(), ServiceError>> + Send + Sync;
type RequestOneFn = dyn Fn(Message) -> BoxFuture<'static, Result<Message, ServiceError>> + Send + Sync;
type RequestManyFn =
    dyn Fn(Message) -> BoxStream<'static, Result<Message, ServiceError>> + Send + Sync;

/// How a qualifier is answered. The wire carries no call pattern, so the
/// registered handler decides which frames go back.
#[derive(Clone)]
pub enum Handler {
    /// COMPLETE on success, ERROR on failure.
    OneWay(Arc<OneWayFn>),
    /// One payload frame then COMPLETE, or ERROR.
    RequestOne(Arc<RequestOneFn>),
    /// A payload frame per item, then COMPLETE; ERROR ends the stream.
    RequestMany(Arc<RequestManyFn>),
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Handler::OneWay(_) => "OneWay",
            Handler::RequestOne(_) => "RequestOne",
            Handler::RequestMany(_) => "RequestMany",
        };
        f.write_str(kind)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ServiceRegistry {
    handlers: HashMap<String, Handler>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn one_way<F, Fut>(mut self, qualifier: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ServiceError>> + Send + 'static,
    {
        let handler = Handler::OneWay(Arc::new(move |request| handler(request).boxed()));
        self.handlers.insert(qualifier.into(), handler);
        self
    }

    pub fn request_one<F, Fut>(mut self, qualifier: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Message, ServiceError>> + Send + 'static,
    {
        let handler = Handler::RequestOne(Arc::new(move |request| handler(request).boxed()));
        self.handlers.insert(qualifier.into(), handler);
        self
    }

    pub fn request_many<F, S>(mut self, qualifier: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Message) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<Message, ServiceError>> + Send + 'static,
    {
        let handler = Handler::RequestMany(Arc::new(move |request| handler(request).boxed()));
        self.handlers.insert(qualifier.into(), handler);
        self
    }

    /// Merge `other` into this registry; its handlers win on conflict.
    pub fn merge(mut self, other: ServiceRegistry) -> Self {
        self.handlers.extend(other.handlers);
        self
    }

    pub fn get(&self, qualifier: &str) -> Option<&Handler> {
        self.handlers.get(qualifier)
    }

    /// Distinct service names, sorted.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .keys()
            .map(|q| skein_core::service_name(q).to_string())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}
