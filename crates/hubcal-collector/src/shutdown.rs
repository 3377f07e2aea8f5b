//! Cooperative cancellation for collection runs.

use tokio::sync::watch;

/// A read-only view of a shutdown flag, checked between feeds and pages.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl StopSignal {
    /// A signal that is never raised.
    pub fn never() -> Self {
        Self::default()
    }

    /// Wraps the receiving side of a shutdown channel.
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }

    /// Returns true once shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }
}
