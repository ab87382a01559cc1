use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio_util::sync::CancellationToken;

/// Process-wide termination signal.
///
/// Fires at most once and never resets. Clones observe the same signal.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal. Returns `true` only for the call that fired it.
    pub fn trigger(&self) -> bool {
        let first = !self.fired.swap(true, Ordering::AcqRel);
        self.token.cancel();
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the signal has fired.
    pub async fn triggered(&self) {
        self.token.cancelled().await
    }

    /// Sleeps for `duration`, cut short by the signal. Returns `true` if the signal fired.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            () = self.triggered() => true,
            () = tokio::time::sleep(duration) => false,
        }
    }
}
