//! Caller-facing entry point: `one_way`, `request_one`, `request_many`.
//!
//! Nothing happens when a call is built. Resolution, connect and send run in
//! that order only once the returned future is awaited or the returned
//! stream is polled, so a call may be built before its service exists.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_stream::try_stream;
use futures_core::Stream;

use crate::{CallError, ConnectionManager, Message, Resolver, Session};

/// Dispatches calls to whatever address the resolver names at consume time.
#[derive(Clone)]
pub struct ServiceCall {
    resolver: Arc<dyn Resolver>,
    connections: ConnectionManager,
    timeout: Option<Duration>,
}

impl fmt::Debug for ServiceCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCall")
            .field("connections", &self.connections)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ServiceCall {
    pub fn new(resolver: impl Resolver, connections: ConnectionManager) -> Self {
        Self {
            resolver: Arc::new(resolver),
            connections,
            timeout: None,
        }
    }

    /// A copy that fails calls with [`CallError::Timeout`] when no terminal
    /// frame arrives within `timeout`. For `request_many` the limit applies
    /// to resolving and connecting, then to each next element. The
    /// abandoned call is cancelled on the wire.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self.clone()
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Send `request`; succeed on the remote's acknowledgement, fail with its error.
    pub async fn one_way(&self, request: Message) -> Result<(), CallError> {
        self.within_deadline(async {
            let session = self.session_for(request.qualifier()).await?;
            session.one_way(request).await
        })
        .await
    }

    /// Send `request` and return the first response.
    pub async fn request_one(&self, request: Message) -> Result<Message, CallError> {
        self.within_deadline(async {
            let session = self.session_for(request.qualifier()).await?;
            session.request_one(request).await
        })
        .await
    }

    /// A cold stream of every response to `request`.
    ///
    /// The first poll resolves, connects and sends. The stream ends on the
    /// remote's completion or after yielding one error. Dropping it before
    /// then cancels the call.
    pub fn request_many(&self, request: Message) -> ResponseStream {
        ResponseStream {
            inner: Box::pin(responses(self.clone(), request)),
        }
    }

    async fn session_for(&self, qualifier: &str) -> Result<Arc<Session>, CallError> {
        let address = self.resolver.resolve(qualifier).await?;
        tracing::debug!(qualifier, %address, "dispatching call");
        self.connections.get(&address).await
    }

    async fn within_deadline<T>(
        &self,
        call: impl Future<Output = Result<T, CallError>>,
    ) -> Result<T, CallError> {
        let Some(limit) = self.timeout else {
            return call.await;
        };
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(timeout_ms = limit.as_millis() as u64, "call timed out");
                Err(CallError::Timeout(limit))
            }
        }
    }
}

fn responses(
    call: ServiceCall,
    request: Message,
) -> impl Stream<Item = Result<Message, CallError>> + Send {
    try_stream! {
        let qualifier = request.qualifier().to_string();
        let session = call.within_deadline(call.session_for(&qualifier)).await?;
        let mut responses = session.request_many(request)?;
        loop {
            let next = match call.timeout {
                Some(limit) => tokio::time::timeout(limit, responses.recv())
                    .await
                    .map_err(|_| {
                        tracing::debug!(
                            qualifier = %qualifier,
                            stream_id = responses.stream_id(),
                            "no next response before deadline"
                        );
                        CallError::Timeout(limit)
                    })?,
                None => responses.recv().await,
            };
            match next {
                Some(response) => yield response?,
                None => break,
            }
        }
    }
}

/// Responses of one [`ServiceCall::request_many`] call.
pub struct ResponseStream {
    inner: Pin<Box<dyn Stream<Item = Result<Message, CallError>> + Send>>,
}

impl ResponseStream {
    /// Stop consuming. Dropping the stream is what sends CANCEL.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Stream for ResponseStream {
    type Item = Result<Message, CallError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream").finish_non_exhaustive()
    }
}
