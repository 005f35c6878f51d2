//! In-process transport and address space.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::{Address, Connector, Message, TransportError};

use super::{Transport, TransportBackend};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub struct MemTransport {
    inner: Arc<MemInner>,
}

#[derive(Debug)]
struct MemInner {
    /// Taken on close so the peer's receiver drains and then ends.
    tx: Mutex<Option<mpsc::Sender<Message>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl MemInner {
    fn new(tx: mpsc::Sender<Message>, rx: mpsc::Receiver<Message>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            closed: AtomicBool::new(false),
            closed_tx: watch::Sender::new(false),
        }
    }
}

impl MemTransport {
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_CAPACITY);

        (
            Self {
                inner: Arc::new(MemInner::new(tx_b, rx_a)),
            },
            Self {
                inner: Arc::new(MemInner::new(tx_a, rx_b)),
            },
        )
    }

    fn is_closed_inner(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl TransportBackend for MemTransport {
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        if self.is_closed_inner() {
            return Err(TransportError::Closed);
        }

        let tx = self.inner.tx.lock().clone().ok_or(TransportError::Closed)?;
        tx.send(message).await.map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Result<Message, TransportError> {
        if self.is_closed_inner() {
            return Err(TransportError::Closed);
        }

        let mut closed = self.inner.closed_tx.subscribe();
        let mut rx = self.inner.rx.lock().await;
        tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => {}
            message = rx.recv() => return message.ok_or(TransportError::Closed),
        }
        rx.close();
        Err(TransportError::Closed)
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.tx.lock().take();
        self.inner.closed_tx.send_replace(true);
        if let Ok(mut rx) = self.inner.rx.try_lock() {
            rx.close();
        }
    }

    fn is_closed(&self) -> bool {
        self.is_closed_inner()
    }
}

/// An in-process address space.
///
/// Servers [`listen`](MemNetwork::listen) on an [`Address`]; clients connect
/// through the [`Connector`] impl and get one half of a fresh
/// [`MemTransport`] pair while the listener receives the other.
#[derive(Clone, Debug, Default)]
pub struct MemNetwork {
    listeners: Arc<Mutex<HashMap<Address, mpsc::UnboundedSender<Transport>>>>,
}

impl MemNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen on `address`, replacing any previous listener there.
    pub fn listen(&self, address: Address) -> MemListener {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().insert(address.clone(), tx.clone());
        tracing::debug!(%address, "mem listener bound");
        MemListener {
            address,
            tx,
            rx,
            network: self.clone(),
        }
    }

    fn dial(&self, address: &Address) -> Result<Transport, TransportError> {
        let listener = self.listeners.lock().get(address).cloned();
        let refused = || {
            TransportError::from(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("nothing listening on {address}"),
            ))
        };
        let listener = listener.ok_or_else(refused)?;
        let (client, server) = Transport::mem_pair();
        listener.send(server).map_err(|_| refused())?;
        Ok(client)
    }
}

impl Connector for MemNetwork {
    fn connect(&self, address: &Address) -> BoxFuture<'static, Result<Transport, TransportError>> {
        future::ready(self.dial(address)).boxed()
    }
}

/// Accepting side of a [`MemNetwork`] address. Unbinds on drop.
#[derive(Debug)]
pub struct MemListener {
    address: Address,
    tx: mpsc::UnboundedSender<Transport>,
    rx: mpsc::UnboundedReceiver<Transport>,
    network: MemNetwork,
}

impl MemListener {
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub async fn accept(&mut self) -> Option<Transport> {
        self.rx.recv().await
    }
}

impl Drop for MemListener {
    fn drop(&mut self) {
        let mut listeners = self.network.listeners.lock();
        if listeners
            .get(&self.address)
            .is_some_and(|tx| tx.same_channel(&self.tx))
        {
            listeners.remove(&self.address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_moves_messages_both_ways() {
        let (a, b) = Transport::mem_pair();
        a.send(Message::new("ping")).await.unwrap();
        assert_eq!(b.recv().await.unwrap().qualifier(), "ping");
        b.send(Message::new("pong")).await.unwrap();
        assert_eq!(a.recv().await.unwrap().qualifier(), "pong");
    }

    #[tokio::test]
    async fn close_is_observed_by_peer() {
        let (a, b) = Transport::mem_pair();
        a.send(Message::new("last")).await.unwrap();
        a.close().await;
        assert!(a.is_closed());
        assert_eq!(b.recv().await.unwrap().qualifier(), "last");
        assert_eq!(b.recv().await, Err(TransportError::Closed));
        assert_eq!(a.send(Message::new("x")).await, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn close_wakes_local_receiver() {
        let (a, _b) = Transport::mem_pair();
        let reader = a.clone();
        let pending = tokio::spawn(async move { reader.recv().await });
        tokio::task::yield_now().await;
        a.close().await;
        assert_eq!(pending.await.unwrap(), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn dial_without_listener_is_refused() {
        let network = MemNetwork::new();
        let err = network
            .connect(&Address::new("nowhere", 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Io(ref io) if io.kind == std::io::ErrorKind::ConnectionRefused
        ));
    }

    #[tokio::test]
    async fn listener_accepts_and_unbinds_on_drop() {
        let network = MemNetwork::new();
        let address = Address::new("provider", 4801);
        let mut listener = network.listen(address.clone());

        let client = network.connect(&address).await.unwrap();
        let server = listener.accept().await.unwrap();
        client.send(Message::new("hello")).await.unwrap();
        assert_eq!(server.recv().await.unwrap().qualifier(), "hello");

        drop(listener);
        assert!(network.connect(&address).await.is_err());
    }
}
