//! Remote-side fixtures for exercising skein clients in-process.
//!
//! A [`TestCluster`] hosts providers on a [`MemNetwork`](skein_core::MemNetwork):
//! each one serves a [`ServiceRegistry`] through [`serve`], answering with
//! payload, COMPLETE and ERROR frames and honouring CANCEL. A
//! [`ServerObserver`] records the stream ids of every request and cancel it
//! saw, which is how tests check what actually crossed the wire.

mod cluster;
pub mod fixtures;
mod registry;
mod server;

pub use cluster::*;
pub use registry::*;
pub use server::*;

/// Install a `fmt` subscriber filtered by `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
