//! Cooperative cancellation.
//!
//! A `CancelHandle` requests cancellation; any number of `CancelSignal`
//! clones observe it. In-flight steps are expected to watch the signal
//! and stop promptly.

use tokio::sync::watch;

/// Requests cancellation of a run
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Observes cancellation of a run
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

/// Create a linked handle/signal pair
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx: Some(rx) })
}

impl CancelHandle {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Another signal observing this handle
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: Some(self.tx.subscribe()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl CancelSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves once cancellation has been requested. Pends forever if
    /// the handle is dropped without cancelling.
    pub async fn cancelled(&self) {
        let Some(mut rx) = self.rx.clone() else {
            return std::future::pending().await;
        };
        if rx.wait_for(|c| *c).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_observes_cancel() {
        let (handle, signal) = cancel_pair();
        assert!(!signal.is_cancelled());

        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.cancelled().await }
        });

        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_cancelled());
        assert!(handle.signal().is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_handle_never_fires() {
        let (handle, signal) = cancel_pair();
        drop(handle);

        let res = tokio::time::timeout(Duration::from_millis(50), signal.cancelled()).await;
        assert!(res.is_err());
        assert!(!signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_never_signal() {
        let signal = CancelSignal::never();
        let res = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(res.is_err());
    }
}
