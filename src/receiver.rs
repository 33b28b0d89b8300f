//! One-shot completion tokens used by asynchronous operations.
//!
//! Every long-running operation in this crate completes by invoking a
//! [`ReceiverHandle`] exactly once with its result values. The owning side
//! holds the matching [`Receiver`] and awaits it, or, in non-async call sites
//! (CLI tools, tests, the TVFS sync wrappers), spins on it with a timeout via
//! [`Receiver::receive_sync`].
//!
//! A pending receive can be marked aborted, in which case the result is
//! discarded and the awaiting side observes [`ReceiveError::Aborted`] instead
//! of the continuation running. This is what the `ABOR` command hooks into.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;

/// Why a pending receive did not produce a value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReceiveError {
    /// The operation was aborted before completion.
    #[error("operation aborted")]
    Aborted,
    /// The producing side went away without completing.
    #[error("producer dropped without completing")]
    Cancelled,
    /// A synchronous receive timed out.
    #[error("timed out waiting for completion")]
    Timeout,
}

/// The move-only, one-shot token the producing side completes.
#[derive(Debug)]
pub struct ReceiverHandle<T> {
    tx: oneshot::Sender<T>,
    aborted: Arc<AtomicBool>,
}

impl<T> ReceiverHandle<T> {
    /// Completes the operation. Consumes the handle: a continuation fires at
    /// most once. Returns the value back if the receiving side is gone.
    pub fn complete(self, value: T) -> Result<(), T> {
        if self.aborted.load(Ordering::Acquire) {
            // The value is intentionally dropped; the receiver sees Aborted.
            return Ok(());
        }
        self.tx.send(value)
    }

    /// Tells whether the receiving side has already aborted or dropped.
    pub fn is_dead(&self) -> bool {
        self.aborted.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

/// The awaiting side of a one-shot operation.
#[derive(Debug)]
pub struct Receiver<T> {
    rx: oneshot::Receiver<T>,
    aborted: Arc<AtomicBool>,
}

impl<T> Receiver<T> {
    /// Awaits the completion value.
    pub async fn receive(self) -> Result<T, ReceiveError> {
        match self.rx.await {
            Ok(v) => Ok(v),
            Err(_) if self.aborted.load(Ordering::Acquire) => Err(ReceiveError::Aborted),
            Err(_) => Err(ReceiveError::Cancelled),
        }
    }

    /// Awaits the completion value, giving up after `timeout`.
    pub async fn receive_timeout(self, timeout: Duration) -> Result<T, ReceiveError> {
        let aborted = self.aborted.clone();
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(_)) if aborted.load(Ordering::Acquire) => Err(ReceiveError::Aborted),
            Ok(Err(_)) => Err(ReceiveError::Cancelled),
            Err(_) => Err(ReceiveError::Timeout),
        }
    }

    /// Spins until completion or timeout. For call sites that are not
    /// themselves async; must not be called from an async task.
    pub fn receive_sync(mut self, timeout: Duration) -> Result<T, ReceiveError> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            match self.rx.try_recv() {
                Ok(v) => return Ok(v),
                Err(oneshot::error::TryRecvError::Empty) => {
                    if std::time::Instant::now() >= deadline {
                        return Err(ReceiveError::Timeout);
                    }
                    std::thread::sleep(Duration::from_millis(2));
                }
                Err(oneshot::error::TryRecvError::Closed) => {
                    return if self.aborted.load(Ordering::Acquire) {
                        Err(ReceiveError::Aborted)
                    } else {
                        Err(ReceiveError::Cancelled)
                    };
                }
            }
        }
    }

    /// Returns an [`AbortHandle`] that can later invalidate this receive.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            aborted: self.aborted.clone(),
        }
    }
}

/// Cancels a pending receive from the outside.
///
/// After [`AbortHandle::abort`], a completion posted by the producer becomes a
/// no-op and the awaiting side observes [`ReceiveError::Aborted`].
#[derive(Debug, Clone)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Marks the pending receive aborted.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    /// Tells whether the receive has been aborted.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

/// Creates a connected receiver/handle pair.
pub fn receiver<T>() -> (Receiver<T>, ReceiverHandle<T>) {
    let (tx, rx) = oneshot::channel();
    let aborted = Arc::new(AtomicBool::new(false));
    (
        Receiver {
            rx,
            aborted: aborted.clone(),
        },
        ReceiverHandle { tx, aborted },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn completes_once() {
        let (rx, tx) = receiver::<u32>();
        tx.complete(42).unwrap();
        assert_eq!(rx.receive().await, Ok(42));
    }

    #[tokio::test]
    async fn dropped_producer_is_cancelled() {
        let (rx, tx) = receiver::<u32>();
        drop(tx);
        assert_eq!(rx.receive().await, Err(ReceiveError::Cancelled));
    }

    #[tokio::test]
    async fn aborted_receive_discards_result() {
        let (rx, tx) = receiver::<u32>();
        rx.abort_handle().abort();
        // The completion is swallowed, not an error for the producer.
        tx.complete(42).unwrap();
        assert_eq!(rx.receive().await, Err(ReceiveError::Aborted));
    }

    #[tokio::test]
    async fn timeout_fires() {
        let (rx, _tx) = receiver::<u32>();
        let err = rx.receive_timeout(Duration::from_millis(10)).await.unwrap_err();
        assert_eq!(err, ReceiveError::Timeout);
    }
}
