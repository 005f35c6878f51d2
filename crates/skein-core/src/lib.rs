#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod address;
mod blocking;
mod codec;
mod config;
mod connection;
mod connector;
mod dispatcher;
mod error;
mod message;
mod resolver;
mod session;
mod transport;

pub use address::*;
pub use blocking::*;
pub use codec::*;
pub use config::*;
pub use connection::*;
pub use connector::*;
pub use dispatcher::*;
pub use error::*;
pub use message::*;
pub use resolver::*;
pub use session::*;
pub use transport::*;

#[cfg(feature = "mem")]
pub use transport::mem::{MemListener, MemNetwork, MemTransport};
#[cfg(feature = "stream")]
pub use transport::stream::{MAX_FRAME_SIZE, StreamTransport, TcpConnector};
