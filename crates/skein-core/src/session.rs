//! Session: one physical connection multiplexing many logical calls.
//!
//! # Architecture
//!
//! ```text
//!   callers ──register──▶ pending: HashMap<stream_id, Sink>
//!      │                        ▲
//!      └──outbound queue──▶ writer task ──▶ transport ──▶ peer
//!                               │
//!   peer ──▶ transport ──▶ reader task ──route by `sid`──┘
//! ```
//!
//! Only the reader task calls `transport.recv()`; only the writer task calls
//! `transport.send()`. Callers never touch the transport directly, so a
//! dropped call can enqueue its CANCEL frame synchronously from `Drop`.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures_core::Stream;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    Address, CLIENT_RECV_TIME, CLIENT_SEND_TIME, CallError, ClientConfig, Message, Signal,
    Transport, TransportError,
};

/// Where inbound frames for one stream id go.
enum Sink {
    /// `one_way`: a single acknowledgement or error.
    Ack(oneshot::Sender<Result<(), CallError>>),
    /// `request_one`: the first payload or an error.
    One(oneshot::Sender<Result<Message, CallError>>),
    /// `request_many`: every payload until COMPLETE or ERROR.
    Many(mpsc::UnboundedSender<Result<Message, CallError>>),
}

impl Sink {
    fn fail(self, err: CallError) {
        match self {
            Sink::Ack(tx) => drop(tx.send(Err(err))),
            Sink::One(tx) => drop(tx.send(Err(err))),
            Sink::Many(tx) => drop(tx.send(Err(err))),
        }
    }

    fn complete(self) {
        match self {
            Sink::Ack(tx) => drop(tx.send(Ok(()))),
            Sink::One(tx) => drop(tx.send(Err(CallError::EmptyResponse))),
            Sink::Many(_) => {}
        }
    }
}

pub struct Session {
    address: Address,
    transport: Transport,
    outbound: mpsc::UnboundedSender<Message>,
    /// The demux table: stream id → sink awaiting that call's frames.
    pending: Mutex<HashMap<u64, Sink>>,
    next_stream_id: AtomicU64,
    max_pending: usize,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Wrap an established transport and spawn its reader and writer tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(address: Address, transport: Transport, config: &ClientConfig) -> Arc<Self> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            address,
            transport,
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_stream_id: AtomicU64::new(1),
            max_pending: config.max_pending(),
            closed: AtomicBool::new(false),
            shutdown: watch::Sender::new(false),
        });

        tokio::spawn(session.clone().write_loop(outbound_rx));
        tokio::spawn(session.clone().read_loop());
        tracing::debug!(address = %session.address, "session started");
        session
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once the session has shut down, for whatever reason.
    pub async fn closed(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let _ = shutdown.wait_for(|closed| *closed).await;
    }

    /// Close the connection. Every pending call fails with [`CallError::Closed`].
    pub async fn close(&self) {
        self.shutdown_with(CallError::Closed).await;
    }

    /// Stream ids of calls still awaiting frames, sorted (for diagnostics).
    pub fn pending_stream_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.pending.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Send `message` and wait for a single acknowledgement or error.
    pub async fn one_way(self: &Arc<Self>, message: Message) -> Result<(), CallError> {
        let (tx, rx) = oneshot::channel();
        let stream_id = self.register(Sink::Ack(tx))?;
        let mut guard = CallGuard::new(self.clone(), stream_id);
        self.transmit(stream_id, message)?;
        let result = rx.await.unwrap_or(Err(CallError::Closed));
        guard.disarm();
        result
    }

    /// Send `message` and wait for its first payload frame.
    pub async fn request_one(self: &Arc<Self>, message: Message) -> Result<Message, CallError> {
        let (tx, rx) = oneshot::channel();
        let stream_id = self.register(Sink::One(tx))?;
        let mut guard = CallGuard::new(self.clone(), stream_id);
        self.transmit(stream_id, message)?;
        let result = rx.await.unwrap_or(Err(CallError::Closed));
        guard.disarm();
        result
    }

    /// Send `message` and return the stream of its payload frames.
    pub fn request_many(self: &Arc<Self>, message: Message) -> Result<ResponseReceiver, CallError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream_id = self.register(Sink::Many(tx))?;
        let guard = CallGuard::new(self.clone(), stream_id);
        self.transmit(stream_id, message)?;
        Ok(ResponseReceiver {
            rx,
            guard,
            done: false,
        })
    }

    /// Abandon `stream_id`: drop its table entry and send a CANCEL frame.
    ///
    /// Returns `false` when the call had already reached a terminal frame,
    /// in which case nothing is sent.
    pub fn cancel(&self, stream_id: u64) -> bool {
        if self.pending.lock().remove(&stream_id).is_none() {
            return false;
        }
        tracing::debug!(address = %self.address, stream_id, "call abandoned; sending CANCEL");
        if self
            .outbound
            .send(Message::signal(stream_id, Signal::Cancel))
            .is_err()
        {
            tracing::debug!(stream_id, "session writer gone; CANCEL not sent");
        }
        true
    }

    fn register(&self, sink: Sink) -> Result<u64, CallError> {
        let mut pending = self.pending.lock();
        if self.is_closed() {
            return Err(CallError::Closed);
        }
        let pending_len = pending.len();
        if pending_len >= self.max_pending {
            tracing::warn!(
                address = %self.address,
                pending_len,
                max_pending = self.max_pending,
                "too many pending calls; refusing new call"
            );
            return Err(CallError::ResourceExhausted {
                pending: pending_len,
                max: self.max_pending,
            });
        }

        let stream_id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        pending.insert(stream_id, sink);
        tracing::debug!(stream_id, pending_len = pending_len + 1, "registered pending call");
        Ok(stream_id)
    }

    fn transmit(&self, stream_id: u64, message: Message) -> Result<(), CallError> {
        let frame = message
            .with_stream_id(stream_id)
            .stamped(CLIENT_SEND_TIME);
        if self.outbound.send(frame).is_err() {
            self.pending.lock().remove(&stream_id);
            return Err(CallError::Closed);
        }
        Ok(())
    }

    fn route(&self, message: Message) {
        let Some(stream_id) = message.stream_id() else {
            tracing::warn!(
                qualifier = message.qualifier(),
                "dropping inbound frame without stream id"
            );
            return;
        };
        let message = message.stamped(CLIENT_RECV_TIME);
        let signal = message.signal_kind();

        let mut pending = self.pending.lock();
        let Entry::Occupied(entry) = pending.entry(stream_id) else {
            tracing::debug!(stream_id, ?signal, "dropping frame for unknown stream");
            return;
        };

        match signal {
            Some(Signal::Error) => {
                let (code, text) = message
                    .error_data()
                    .map(|(code, text)| (code, text.to_string()))
                    .unwrap_or_default();
                tracing::debug!(stream_id, code, "remote error");
                entry.remove().fail(CallError::Remote {
                    code,
                    message: text,
                });
            }
            Some(Signal::Complete) | Some(Signal::Cancel) => {
                tracing::debug!(stream_id, ?signal, "stream finished");
                entry.remove().complete();
            }
            None => match entry.get() {
                Sink::Many(tx) => {
                    if tx.send(Ok(message)).is_err() {
                        entry.remove();
                    }
                }
                Sink::One(_) => {
                    if let Sink::One(tx) = entry.remove() {
                        let _ = tx.send(Ok(message));
                    }
                }
                Sink::Ack(_) => entry.remove().complete(),
            },
        }
    }

    async fn write_loop(self: Arc<Self>, mut outbound: mpsc::UnboundedReceiver<Message>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.wait_for(|closed| *closed) => return,
                message = outbound.recv() => match message {
                    Some(message) => message,
                    None => return,
                },
            };
            // A peer that stops reading must not keep the writer from seeing shutdown.
            let sent = tokio::select! {
                biased;
                _ = shutdown.wait_for(|closed| *closed) => return,
                sent = self.transport.send(message) => sent,
            };
            if let Err(e) = sent {
                tracing::warn!(address = %self.address, error = %e, "session write failed");
                self.shutdown_with(e.into()).await;
                return;
            }
        }
    }

    async fn read_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let err = loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.wait_for(|closed| *closed) => return,
                received = self.transport.recv() => received,
            };
            match received {
                Ok(message) => self.route(message),
                Err(TransportError::Closed) => {
                    tracing::debug!(address = %self.address, "transport closed by peer");
                    break CallError::Closed;
                }
                Err(e) => {
                    tracing::error!(address = %self.address, error = %e, "session read failed");
                    break CallError::Transport(e);
                }
            }
        };
        self.shutdown_with(err).await;
    }

    async fn shutdown_with(&self, err: CallError) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<(u64, Sink)> = self.pending.lock().drain().collect();
        let failed = drained.len();
        for (_, sink) in drained {
            sink.fail(err.clone());
        }
        self.shutdown.send_replace(true);
        self.transport.close().await;
        tracing::info!(address = %self.address, failed, reason = %err, "session closed");
    }
}

/// Cancels its stream on drop unless disarmed by a terminal frame.
struct CallGuard {
    session: Arc<Session>,
    stream_id: u64,
    armed: bool,
}

impl CallGuard {
    fn new(session: Arc<Session>, stream_id: u64) -> Self {
        Self {
            session,
            stream_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if self.armed {
            self.session.cancel(self.stream_id);
        }
    }
}

/// Payload frames of one `request_many` call, in the order the peer sent them.
///
/// Ends after COMPLETE, or after yielding one error. Dropping it early
/// cancels the call.
pub struct ResponseReceiver {
    rx: mpsc::UnboundedReceiver<Result<Message, CallError>>,
    guard: CallGuard,
    done: bool,
}

impl ResponseReceiver {
    pub fn stream_id(&self) -> u64 {
        self.guard.stream_id
    }

    pub async fn recv(&mut self) -> Option<Result<Message, CallError>> {
        std::future::poll_fn(|cx| Pin::new(&mut *self).poll_next(cx)).await
    }
}

impl Stream for ResponseReceiver {
    type Item = Result<Message, CallError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(message))) => Poll::Ready(Some(Ok(message))),
            Poll::Ready(Some(Err(e))) => {
                self.done = true;
                self.guard.disarm();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.done = true;
                self.guard.disarm();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for ResponseReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseReceiver")
            .field("stream_id", &self.guard.stream_id)
            .field("done", &self.done)
            .finish()
    }
}
