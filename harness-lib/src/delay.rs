use std::{sync::Arc, time::Duration};

use arc_swap::ArcSwap;

/// Shared artificial response delay.
///
/// Owned by the scenario runner and injected into the interception proxy at
/// construction. The proxy reads the value once per response, immediately
/// before flushing it, so an update also applies to requests that are already
/// in flight but not yet answered. Single writer, many readers.
#[derive(Debug, Clone, Default)]
pub struct ResponseDelay {
    delay: Arc<ArcSwap<Duration>>,
}

impl ResponseDelay {
    pub fn new(initial: Duration) -> Self {
        Self {
            delay: Arc::new(ArcSwap::new(Arc::new(initial))),
        }
    }

    /// Replace the shared delay, effective for any response not yet flushed.
    pub fn set(&self, delay: Duration) {
        self.delay.store(Arc::new(delay));
    }

    /// The delay to apply right now. Lock-free.
    pub fn current(&self) -> Duration {
        **self.delay.load()
    }
}
