use super::DialError;
use std::future::{pending, Future};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Deadline and cancellation signal shared by every step of a dial
///
/// Cloning is cheap; clones observe the same cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct DialContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Cancels every context created from it
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl DialContext {
    /// A context with no deadline that is never cancelled
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: None,
        }
    }

    /// Attach a fresh cancellation signal, returning the handle that fires it
    pub fn cancellable(mut self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        self.cancel = Some(rx);
        (self, CancelHandle { tx })
    }

    /// Observe an existing shutdown signal (`true` means cancelled)
    pub fn cancel_on(mut self, signal: watch::Receiver<bool>) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if there is one
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// A child context expiring after `timeout` or at this context's
    /// deadline, whichever comes first. Cancellation is shared.
    pub fn limited(&self, timeout: Duration) -> Self {
        let bound = Instant::now() + timeout;
        Self {
            deadline: Some(self.deadline.map_or(bound, |deadline| deadline.min(bound))),
            cancel: self.cancel.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Drive `fut` until it completes, the deadline passes or the context
    /// is cancelled. The future is dropped on timeout or cancellation, which
    /// aborts any read or write it has in flight.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, DialError>
    where
        F: Future<Output = Result<T, DialError>>,
    {
        if self.is_cancelled() {
            return Err(DialError::Cancelled);
        }

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = wait_cancelled(self.cancel.clone()) => Err(DialError::Cancelled),
            _ = deadline => Err(DialError::Timeout),
            result = fut => result,
        }
    }
}

async fn wait_cancelled(signal: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = signal else {
        return pending().await;
    };

    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: nobody can cancel any more
            return pending().await;
        }
    }
}
