//! Cooperative cancellation for reservation runs.

use std::sync::Arc;

use tokio::sync::watch;

/// Signals a run to stop at its next checkpoint. Cheap to clone and safe to
/// trigger from any task, any number of times.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    /// A handle that has not been triggered.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Request cancellation. Calls already sent to the platform still complete.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Receiving side for the run loop.
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Observer half held by a run.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancellation is requested; never resolves otherwise.
    pub async fn cancelled(&mut self) {
        if self.receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn signal_observes_cancel_from_clone() {
        let handle = CancelHandle::new();
        let mut signal = handle.signal();
        assert!(!signal.is_cancelled());

        let remote = handle.clone();
        tokio::spawn(async move { remote.cancel() });
        tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .expect("cancellation observed");
        assert!(signal.is_cancelled());
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn signal_taken_after_cancel_is_already_cancelled() {
        let handle = CancelHandle::new();
        handle.cancel();
        handle.cancel();
        let mut signal = handle.signal();
        assert!(signal.is_cancelled());
        signal.cancelled().await;
    }
}
