//! Graceful shutdown signalling.
//!
//! A [`Notifier`] is shared between the embedder and the server. Calling
//! [`Notifier::notify`] makes the accept loop stop taking connections and
//! every control loop answer `421` and close; [`Notifier::linger`] then waits
//! until the last session has actually wound down.

use std::fmt::Debug;

use tokio::sync::{broadcast, mpsc, Mutex, RwLock};

/// Lets other tasks know that we're shutting down.
#[derive(Debug)]
pub struct Notifier {
    shutdown_tx: RwLock<Option<broadcast::Sender<()>>>,
    shutdown_complete_tx: RwLock<Option<mpsc::Sender<()>>>,
    shutdown_complete_rx: Mutex<mpsc::Receiver<()>>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    /// Creates a new shutdown notifier.
    pub fn new() -> Notifier {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);
        Notifier {
            shutdown_tx: RwLock::new(Some(shutdown_tx)),
            shutdown_complete_tx: RwLock::new(Some(shutdown_complete_tx)),
            shutdown_complete_rx: Mutex::new(shutdown_complete_rx),
        }
    }

    /// Notifies shutdown listeners that shutdown is commencing. Listeners
    /// then need to wind down and signal that they are done by simply letting
    /// the [`Listener`] instance they hold go out of scope.
    pub async fn notify(&self) {
        // When the sender is dropped, all tasks which have `subscribe`d will
        // receive the shutdown signal and can exit.
        drop(self.shutdown_tx.write().await.take());
        // Drop the final completion `Sender` so `linger()` can complete.
        drop(self.shutdown_complete_tx.write().await.take());
    }

    /// Waits for tasks holding shutdown listeners to finish.
    pub async fn linger(&self) {
        // The only remaining completion `Sender` clones are held by session
        // tasks; when the last one drops, `recv()` returns `None`.
        let _ = self.shutdown_complete_rx.lock().await.recv().await;
    }

    /// Subscribes to the shutdown signal.
    pub async fn subscribe(&self) -> Listener {
        let sender_opt = self.shutdown_tx.read().await;
        let complete_sender_opt = self.shutdown_complete_tx.read().await;
        Listener {
            shutdown: sender_opt.is_none(),
            shutdown_rx: sender_opt.as_ref().map(|tx| tx.subscribe()),
            _shutdown_complete_tx: complete_sender_opt.clone(),
        }
    }
}

/// Listens for the shutdown notification. Holding a listener also marks its
/// task as "still winding down" for [`Notifier::linger`].
#[derive(Debug)]
pub struct Listener {
    shutdown: bool,
    shutdown_rx: Option<broadcast::Receiver<()>>,
    _shutdown_complete_tx: Option<mpsc::Sender<()>>,
}

impl Listener {
    /// Tells whether the shutdown signal has been received.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Receives the shutdown notice, waiting if necessary.
    pub async fn listen(&mut self) {
        if self.shutdown {
            return;
        }

        match self.shutdown_rx.as_mut() {
            // Cannot receive a "lag error" as only one value is ever sent.
            Some(rx) => {
                let _ = rx.recv().await;
            }
            None => return,
        }

        self.shutdown = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_wakes_subscribers_and_linger_waits_for_them() {
        let notifier = std::sync::Arc::new(Notifier::new());

        let mut listener = notifier.subscribe().await;
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            listener.listen().await;
            assert!(listener.is_shutdown());
            drop(listener); // releases the linger gate
            let _ = done_tx.send(());
        });

        notifier.notify().await;
        notifier.linger().await;
        done_rx.await.unwrap();
    }

    #[tokio::test]
    async fn late_subscribers_see_shutdown_immediately() {
        let notifier = Notifier::new();
        notifier.notify().await;
        let mut listener = notifier.subscribe().await;
        assert!(listener.is_shutdown());
        // Resolves without blocking.
        listener.listen().await;
    }
}
