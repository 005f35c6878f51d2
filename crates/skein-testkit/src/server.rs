//! Server loop answering calls from a [`ServiceRegistry`].
//!
//! Every request gets its own task keyed by stream id. A CANCEL frame for
//! that id aborts the task, so nothing more is sent for it.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use skein_core::{Message, Signal, Transport};
use tokio::sync::{Notify, mpsc};
use tokio::task::AbortHandle;

use crate::{Handler, ServiceError, ServiceRegistry};

/// Error code for a qualifier with no registered handler.
pub const ERROR_CODE_NOT_FOUND: i32 = 404;

/// What a server saw, shared across every connection it accepted.
#[derive(Clone, Debug, Default)]
pub struct ServerObserver {
    inner: Arc<ObserverInner>,
}

#[derive(Debug, Default)]
struct ObserverInner {
    connections: Mutex<usize>,
    requests: Mutex<Vec<(u64, String)>>,
    cancels: Mutex<Vec<u64>>,
    changed: Notify,
}

impl ServerObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        *self.inner.connections.lock()
    }

    /// `(stream id, qualifier)` of every request, in arrival order.
    pub fn requests(&self) -> Vec<(u64, String)> {
        self.inner.requests.lock().clone()
    }

    /// Stream ids of every CANCEL frame, in arrival order.
    pub fn cancels(&self) -> Vec<u64> {
        self.inner.cancels.lock().clone()
    }

    /// Wait until a CANCEL for `stream_id` has arrived.
    pub async fn cancelled(&self, stream_id: u64) {
        self.wait_until(|inner| inner.cancels.lock().contains(&stream_id))
            .await;
    }

    /// Wait until at least `count` requests have arrived.
    pub async fn requests_at_least(&self, count: usize) {
        self.wait_until(|inner| inner.requests.lock().len() >= count)
            .await;
    }

    async fn wait_until(&self, done: impl Fn(&ObserverInner) -> bool) {
        loop {
            let changed = self.inner.changed.notified();
            if done(&self.inner) {
                return;
            }
            changed.await;
        }
    }

    fn connection_accepted(&self) {
        *self.inner.connections.lock() += 1;
        self.inner.changed.notify_waiters();
    }

    fn request(&self, stream_id: u64, qualifier: &str) {
        self.inner
            .requests
            .lock()
            .push((stream_id, qualifier.to_string()));
        self.inner.changed.notify_waiters();
    }

    fn cancel(&self, stream_id: u64) {
        self.inner.cancels.lock().push(stream_id);
        self.inner.changed.notify_waiters();
    }
}

/// Answer calls arriving on `transport` until the peer goes away.
pub async fn serve(transport: Transport, registry: Arc<ServiceRegistry>, observer: ServerObserver) {
    observer.connection_accepted();
    let (replies, mut outbound) = mpsc::unbounded_channel::<Message>();

    let writer = {
        let transport = transport.clone();
        tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                if transport.send(frame).await.is_err() {
                    break;
                }
            }
        })
    };

    let mut calls: HashMap<u64, AbortHandle> = HashMap::new();
    while let Ok(frame) = transport.recv().await {
        let Some(stream_id) = frame.stream_id() else {
            tracing::warn!(qualifier = frame.qualifier(), "request without stream id");
            continue;
        };

        match frame.signal_kind() {
            Some(Signal::Cancel) => {
                observer.cancel(stream_id);
                if let Some(call) = calls.remove(&stream_id) {
                    call.abort();
                    tracing::debug!(stream_id, "call aborted by CANCEL");
                }
            }
            Some(signal) => {
                tracing::debug!(stream_id, %signal, "ignoring client signal");
            }
            None => {
                observer.request(stream_id, frame.qualifier());
                calls.retain(|_, call| !call.is_finished());
                let task = tokio::spawn(answer(
                    registry.clone(),
                    frame,
                    stream_id,
                    replies.clone(),
                ));
                calls.insert(stream_id, task.abort_handle());
            }
        }
    }

    for call in calls.into_values() {
        call.abort();
    }
    writer.abort();
    transport.close().await;
    tracing::debug!("server connection finished");
}

async fn answer(
    registry: Arc<ServiceRegistry>,
    request: Message,
    stream_id: u64,
    replies: mpsc::UnboundedSender<Message>,
) {
    let qualifier = request.qualifier().to_string();
    let Some(handler) = registry.get(&qualifier).cloned() else {
        tracing::warn!(stream_id, qualifier = %qualifier, "no handler");
        let _ = replies.send(Message::error(
            stream_id,
            ERROR_CODE_NOT_FOUND,
            format!("no handler for {qualifier}"),
        ));
        return;
    };

    let reply = |response: Message| {
        response
            .with_qualifier(qualifier.as_str())
            .with_stream_id(stream_id)
    };
    let fail = |e: ServiceError| Message::error(stream_id, e.code, e.message);
    let complete = || Message::signal(stream_id, Signal::Complete);

    match handler {
        Handler::OneWay(handler) => {
            let frame = match handler(request).await {
                Ok(()) => complete(),
                Err(e) => fail(e),
            };
            let _ = replies.send(frame);
        }
        Handler::RequestOne(handler) => match handler(request).await {
            Ok(response) => {
                let _ = replies.send(reply(response));
                let _ = replies.send(complete());
            }
            Err(e) => {
                let _ = replies.send(fail(e));
            }
        },
        Handler::RequestMany(handler) => {
            let mut responses = handler(request);
            while let Some(item) = responses.next().await {
                let frame = match item {
                    Ok(response) => reply(response),
                    Err(e) => {
                        let _ = replies.send(fail(e));
                        return;
                    }
                };
                if replies.send(frame).is_err() {
                    return;
                }
            }
            let _ = replies.send(complete());
        }
    }
}
