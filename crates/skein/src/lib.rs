#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

#[doc(hidden)]
pub extern crate skein_core;

// Re-export core types
pub use skein_core::{
    // Addressing
    Address,
    // Blocking façade
    BlockingServiceCall,
    // Errors
    CallError,
    // Configuration
    ClientConfig,
    ConfigError,
    ConnectionManager,
    Connector,
    DecodeError,
    EncodeError,
    Encoding,
    IoError,
    // Messages and wire headers
    Message,
    Resolver,
    ResponseReceiver,
    ResponseStream,
    ServiceCall,
    Session,
    Signal,
    StaticResolver,
    Transport,
    TransportError,
};

/// Header names and reserved values carried on every frame.
pub mod headers {
    pub use skein_core::{
        CLIENT_RECV_TIME, CLIENT_SEND_TIME, ERROR_CODE, ERROR_CODE_INTERNAL, ERROR_MESSAGE,
        SIGNAL, STREAM_ID,
    };
}

/// Codecs used by byte-stream transports.
pub mod codec {
    pub use skein_core::{Codec, Encoding, JsonCodec, PostcardCodec};
}

/// Transport implementations.
///
/// Each transport is behind a feature flag. Enable the ones you need:
///
/// ```toml
/// [dependencies]
/// skein = { version = "0.1", default-features = false, features = ["stream"] }
/// ```
pub mod transport {
    #[cfg(feature = "mem")]
    pub use skein_core::{MemListener, MemNetwork, MemTransport};

    #[cfg(feature = "stream")]
    pub use skein_core::{MAX_FRAME_SIZE, StreamTransport, TcpConnector};
}

#[cfg(feature = "mem")]
pub use transport::{MemListener, MemNetwork};

#[cfg(feature = "stream")]
pub use transport::TcpConnector;

/// Build a [`ServiceCall`] over a fresh connection cache.
///
/// Nothing is resolved or connected until the first call is awaited.
pub fn client(
    resolver: impl Resolver,
    connector: impl Connector,
    config: ClientConfig,
) -> ServiceCall {
    tracing::debug!(
        connect_timeout_ms = config.connect_timeout().as_millis() as u64,
        max_pending = config.max_pending(),
        "skein client created"
    );
    ServiceCall::new(resolver, ConnectionManager::new(connector, config))
}

/// Prelude module for convenient imports.
///
/// ```ignore
/// use skein::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Address, CallError, ClientConfig, ConnectionManager, Message, Resolver, ServiceCall,
        Signal, StaticResolver, client,
    };

    #[cfg(feature = "mem")]
    pub use crate::MemNetwork;

    #[cfg(feature = "stream")]
    pub use crate::TcpConnector;

    pub use std::time::Duration;
}
