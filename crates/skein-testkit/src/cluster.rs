//! In-process cluster: providers listening on a [`MemNetwork`], a shared
//! [`StaticResolver`] standing in for discovery, and clients built on both.

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};

use futures_util::future::BoxFuture;
use skein_core::{
    Address, ClientConfig, ConnectionManager, Connector, MemNetwork, ServiceCall, StaticResolver,
    Transport, TransportError,
};
use tokio::task::JoinHandle;

use crate::{ServerObserver, ServiceRegistry, serve};

const FIRST_PORT: u16 = 4801;

#[derive(Debug)]
pub struct TestCluster {
    network: MemNetwork,
    resolver: StaticResolver,
    next_port: AtomicU16,
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl TestCluster {
    pub fn new() -> Self {
        Self {
            network: MemNetwork::new(),
            resolver: StaticResolver::new(),
            next_port: AtomicU16::new(FIRST_PORT),
        }
    }

    pub fn network(&self) -> &MemNetwork {
        &self.network
    }

    pub fn resolver(&self) -> &StaticResolver {
        &self.resolver
    }

    /// Start serving `registry` on a fresh address, without announcing it.
    pub fn start_provider(&self, registry: ServiceRegistry) -> Provider {
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        let address = Address::new("provider", port);
        let mut listener = self.network.listen(address.clone());
        let services = registry.service_names();
        let registry = Arc::new(registry);
        let observer = ServerObserver::new();

        let accept = {
            let observer = observer.clone();
            tokio::spawn(async move {
                while let Some(transport) = listener.accept().await {
                    tokio::spawn(serve(transport, registry.clone(), observer.clone()));
                }
            })
        };
        tracing::debug!(%address, ?services, "provider started");

        Provider {
            address,
            services,
            observer,
            accept,
        }
    }

    /// Make every service of `provider` resolvable.
    pub fn announce(&self, provider: &Provider) {
        for service in &provider.services {
            self.resolver.register(service.clone(), provider.address.clone());
        }
    }

    /// Start a provider and announce it.
    pub fn provider(&self, registry: ServiceRegistry) -> Provider {
        let provider = self.start_provider(registry);
        self.announce(&provider);
        provider
    }

    /// A client with its own connection cache.
    pub fn client(&self) -> ServiceCall {
        self.client_with(self.network.clone(), ClientConfig::default())
    }

    pub fn client_with(&self, connector: impl Connector, config: ClientConfig) -> ServiceCall {
        ServiceCall::new(
            self.resolver.clone(),
            ConnectionManager::new(connector, config),
        )
    }

    /// A connector over this cluster's network that counts connect attempts.
    pub fn counting_connector(&self) -> CountingConnector<MemNetwork> {
        CountingConnector::new(self.network.clone())
    }
}

/// A running provider. Stops accepting new connections when dropped.
#[derive(Debug)]
pub struct Provider {
    address: Address,
    services: Vec<String>,
    observer: ServerObserver,
    accept: JoinHandle<()>,
}

impl Provider {
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn observer(&self) -> &ServerObserver {
        &self.observer
    }
}

impl Drop for Provider {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

/// Wraps a connector and counts physical connect attempts.
#[derive(Clone, Debug)]
pub struct CountingConnector<C> {
    inner: C,
    attempts: Arc<AtomicUsize>,
}

impl<C: Connector> CountingConnector<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl<C: Connector> Connector for CountingConnector<C> {
    fn connect(&self, address: &Address) -> BoxFuture<'static, Result<Transport, TransportError>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(%address, attempt, "physical connect");
        self.inner.connect(address)
    }
}
