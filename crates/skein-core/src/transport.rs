//! Transport enum and internal backend trait.
//!
//! A transport moves whole [`Message`] frames between two peers. It knows
//! nothing about stream ids or call patterns; the session layer above does
//! all correlation. Each backend lives in its own module under `transport/`
//! and implements the internal [`TransportBackend`] trait; `enum_dispatch`
//! forwards the enum's calls to it.

use enum_dispatch::enum_dispatch;

use crate::{Message, TransportError};

#[cfg(not(any(feature = "mem", feature = "stream")))]
compile_error!("skein-core needs at least one of the `mem` or `stream` features");

#[enum_dispatch]
pub(crate) trait TransportBackend: Send + Sync + Clone + 'static {
    async fn send(&self, message: Message) -> Result<(), TransportError>;
    async fn recv(&self) -> Result<Message, TransportError>;
    async fn close(&self);
    fn is_closed(&self) -> bool;
}

#[enum_dispatch(TransportBackend)]
#[derive(Clone, Debug)]
pub enum Transport {
    #[cfg(feature = "mem")]
    Mem(mem::MemTransport),
    #[cfg(feature = "stream")]
    Stream(stream::StreamTransport),
}

impl Transport {
    pub async fn send(&self, message: Message) -> Result<(), TransportError> {
        TransportBackend::send(self, message).await
    }

    /// Receive the next frame. Only one task should call this at a time.
    pub async fn recv(&self) -> Result<Message, TransportError> {
        TransportBackend::recv(self).await
    }

    /// Close this end. The peer observes [`TransportError::Closed`] once it
    /// has drained whatever was already in flight.
    pub async fn close(&self) {
        TransportBackend::close(self).await
    }

    pub fn is_closed(&self) -> bool {
        TransportBackend::is_closed(self)
    }

    #[cfg(feature = "mem")]
    pub fn mem_pair() -> (Self, Self) {
        let (a, b) = mem::MemTransport::pair();
        (Transport::Mem(a), Transport::Mem(b))
    }
}

#[cfg(feature = "mem")]
pub mod mem;
#[cfg(feature = "stream")]
pub mod stream;
