use std::time::Duration;

use futures_util::StreamExt;
use tokio::runtime::Handle;

use crate::{CallError, Message, ServiceCall};

/// Synchronous façade over [`ServiceCall`] for threads outside the runtime.
///
/// Every method blocks the calling thread on `handle`, so it must not be
/// called from within an async context. Use a multi-thread runtime: a
/// current-thread runtime's timers only run inside its own `block_on`.
#[derive(Clone, Debug)]
pub struct BlockingServiceCall {
    call: ServiceCall,
    handle: Handle,
}

impl BlockingServiceCall {
    pub fn new(call: ServiceCall, handle: Handle) -> Self {
        Self { call, handle }
    }

    /// Bound every call by `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            call: self.call.with_timeout(timeout),
            handle: self.handle.clone(),
        }
    }

    pub fn one_way(&self, request: Message) -> Result<(), CallError> {
        self.handle.block_on(self.call.one_way(request))
    }

    pub fn request_one(&self, request: Message) -> Result<Message, CallError> {
        self.handle.block_on(self.call.request_one(request))
    }

    /// First response of a `request_many` call that satisfies `predicate`.
    ///
    /// The call is cancelled as soon as the match arrives. A stream that
    /// completes without a match yields [`CallError::EmptyResponse`].
    pub fn request_many_first(
        &self,
        request: Message,
        mut predicate: impl FnMut(&Message) -> bool,
    ) -> Result<Message, CallError> {
        self.handle.block_on(async {
            let mut responses = self.call.request_many(request);
            while let Some(response) = responses.next().await {
                let response = response?;
                if predicate(&response) {
                    return Ok(response);
                }
            }
            Err(CallError::EmptyResponse)
        })
    }
}
