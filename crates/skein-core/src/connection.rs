//! Connect-once cache of sessions, keyed by address.
//!
//! Each address owns a slot that is empty, connecting, or connected. The
//! first caller for an empty slot spawns the connect task and installs a
//! shared future; everyone arriving meanwhile awaits that same future. The
//! slot lock is never held across an await.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::{Address, CallError, ClientConfig, Connector, Session, TransportError};

type ConnectFuture = Shared<BoxFuture<'static, Result<Arc<Session>, CallError>>>;

enum Slot {
    Connecting { attempt: u64, future: ConnectFuture },
    Connected(Arc<Session>),
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: ClientConfig,
    slots: Mutex<HashMap<Address, Slot>>,
    next_attempt: AtomicU64,
}

/// Owns the address → [`Session`] cache. Clones share it.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.inner.config)
            .field("slots", &self.inner.slots.lock().len())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(connector: impl Connector, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector: Arc::new(connector),
                config,
                slots: Mutex::new(HashMap::new()),
                next_attempt: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Return the live session for `address`, connecting if there is none.
    ///
    /// Concurrent callers for the same address share one connect attempt and
    /// observe the same outcome. A failed or closed connection leaves the
    /// slot empty, so the next call starts fresh.
    pub async fn get(&self, address: &Address) -> Result<Arc<Session>, CallError> {
        let future = {
            let mut slots = self.inner.slots.lock();
            match slots.get(address) {
                Some(Slot::Connected(session)) if !session.is_closed() => {
                    return Ok(session.clone());
                }
                Some(Slot::Connecting { future, .. }) => future.clone(),
                _ => {
                    let attempt = self.inner.next_attempt.fetch_add(1, Ordering::Relaxed);
                    let future = spawn_connect(self.inner.clone(), address.clone(), attempt);
                    slots.insert(
                        address.clone(),
                        Slot::Connecting {
                            attempt,
                            future: future.clone(),
                        },
                    );
                    future
                }
            }
        };
        future.await
    }

    /// The cached live session for `address`, without connecting.
    pub fn cached(&self, address: &Address) -> Option<Arc<Session>> {
        match self.inner.slots.lock().get(address) {
            Some(Slot::Connected(session)) if !session.is_closed() => Some(session.clone()),
            _ => None,
        }
    }

    /// Drop the slot for `address` and close its session, if any.
    ///
    /// An in-flight connect for it completes with [`CallError::Closed`].
    pub async fn close(&self, address: &Address) {
        let slot = self.inner.slots.lock().remove(address);
        if let Some(Slot::Connected(session)) = slot {
            session.close().await;
        }
    }

    pub async fn close_all(&self) {
        let slots: Vec<Slot> = self.inner.slots.lock().drain().map(|(_, s)| s).collect();
        for slot in slots {
            if let Slot::Connected(session) = slot {
                session.close().await;
            }
        }
    }
}

fn spawn_connect(inner: Arc<Inner>, address: Address, attempt: u64) -> ConnectFuture {
    let failed_address = address.clone();
    let handle = tokio::spawn(establish(inner, address, attempt));
    async move {
        handle.await.unwrap_or_else(|e| {
            Err(CallError::Connect {
                address: failed_address,
                source: io::Error::other(format!("connect task failed: {e}")).into(),
            })
        })
    }
    .boxed()
    .shared()
}

async fn establish(
    inner: Arc<Inner>,
    address: Address,
    attempt: u64,
) -> Result<Arc<Session>, CallError> {
    tracing::debug!(%address, attempt, "connecting");
    let timeout = inner.config.connect_timeout();
    let connected = match tokio::time::timeout(timeout, inner.connector.connect(&address)).await
    {
        Ok(result) => result,
        Err(_) => Err(TransportError::from(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connect timed out after {}ms", timeout.as_millis()),
        ))),
    };

    let transport = match connected {
        Ok(transport) => transport,
        Err(source) => {
            tracing::warn!(%address, attempt, error = %source, "connect failed");
            let mut slots = inner.slots.lock();
            if is_current_attempt(&slots, &address, attempt) {
                slots.remove(&address);
            }
            return Err(CallError::Connect { address, source });
        }
    };

    let session = Session::start(address.clone(), transport, &inner.config);
    let installed = {
        let mut slots = inner.slots.lock();
        if is_current_attempt(&slots, &address, attempt) {
            slots.insert(address.clone(), Slot::Connected(session.clone()));
            true
        } else {
            false
        }
    };
    if !installed {
        tracing::debug!(%address, attempt, "connect superseded by close; dropping session");
        session.close().await;
        return Err(CallError::Closed);
    }

    tracing::info!(%address, attempt, "connected");
    tokio::spawn(evict_on_close(Arc::downgrade(&inner), session.clone()));
    Ok(session)
}

fn is_current_attempt(slots: &HashMap<Address, Slot>, address: &Address, attempt: u64) -> bool {
    matches!(
        slots.get(address),
        Some(Slot::Connecting { attempt: current, .. }) if *current == attempt
    )
}

/// Clear the slot once its session shuts down, unless it was already replaced.
async fn evict_on_close(inner: Weak<Inner>, session: Arc<Session>) {
    session.closed().await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut slots = inner.slots.lock();
    let address = session.address();
    if matches!(slots.get(address), Some(Slot::Connected(cached)) if Arc::ptr_eq(cached, &session))
    {
        slots.remove(address);
        tracing::debug!(%address, "closed session evicted from cache");
    }
}
