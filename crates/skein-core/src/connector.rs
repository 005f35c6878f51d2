use futures_util::future::BoxFuture;

use crate::{Address, Transport, TransportError};

/// Opens physical connections.
///
/// Called by the [`ConnectionManager`](crate::ConnectionManager) at most once
/// per address at a time; the returned future is driven on a spawned task.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, address: &Address) -> BoxFuture<'static, Result<Transport, TransportError>>;
}

impl<C: Connector + ?Sized> Connector for std::sync::Arc<C> {
    fn connect(&self, address: &Address) -> BoxFuture<'static, Result<Transport, TransportError>> {
        (**self).connect(address)
    }
}
