//! Qualifier to address resolution.
//!
//! Discovery proper lives outside this crate; the dispatcher only needs
//! something implementing [`Resolver`]. It calls it lazily, once per
//! subscription, never when a call object is built.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::RwLock;

use crate::{Address, CallError, message::service_name};

pub trait Resolver: Send + Sync + 'static {
    fn resolve(&self, qualifier: &str) -> BoxFuture<'static, Result<Address, CallError>>;
}

impl<R: Resolver + ?Sized> Resolver for Arc<R> {
    fn resolve(&self, qualifier: &str) -> BoxFuture<'static, Result<Address, CallError>> {
        (**self).resolve(qualifier)
    }
}

/// A shared, mutable routing table.
///
/// Entries are keyed either by a full `service/method` qualifier or by the
/// bare service name; an exact qualifier entry wins. Clones share the table.
#[derive(Clone, Debug, Default)]
pub struct StaticResolver {
    routes: Arc<RwLock<HashMap<String, Address>>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, service_or_qualifier: impl Into<String>, address: Address) {
        let key = service_or_qualifier.into();
        tracing::debug!(route = %key, %address, "route registered");
        self.routes.write().insert(key, address);
    }

    pub fn deregister(&self, service_or_qualifier: &str) -> Option<Address> {
        self.routes.write().remove(service_or_qualifier)
    }

    pub fn lookup(&self, qualifier: &str) -> Option<Address> {
        let routes = self.routes.read();
        routes
            .get(qualifier)
            .or_else(|| routes.get(service_name(qualifier)))
            .cloned()
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, qualifier: &str) -> BoxFuture<'static, Result<Address, CallError>> {
        let result = self.lookup(qualifier).ok_or_else(|| CallError::Resolve {
            qualifier: qualifier.to_string(),
            message: "service not found".to_string(),
        });
        future::ready(result).boxed()
    }
}
