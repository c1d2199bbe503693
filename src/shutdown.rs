use std::sync::Arc;
use tokio::sync::watch;

/// Stops the background tasks an upload session spawns (network watcher,
/// analytics forwarder) when the manager goes away.
///
/// Usage:
/// ```no_run
/// use verifydesk_uploads::shutdown::ShutdownCoordinator;
/// use tokio::sync::mpsc;
///
/// # async fn example() {
/// let coordinator = ShutdownCoordinator::new();
/// let mut signal = coordinator.signal();
/// let (_tx, mut event_rx) = mpsc::channel::<String>(10);
///
/// tokio::spawn(async move {
///     loop {
///         tokio::select! {
///             _ = event_rx.recv() => { /* handle event */ }
///             _ = signal.triggered() => break,
///         }
///     }
/// });
///
/// coordinator.shutdown();
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct ShutdownCoordinator {
    tx: Arc<watch::Sender<bool>>,
}

/// One task's view of the shutdown flag
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// A signal taken after shutdown resolves immediately
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Idempotent
    pub fn shutdown(&self) {
        self.tx.send_if_modified(|triggered| !std::mem::replace(triggered, true));
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    /// Resolves once shutdown has been requested. Also resolves if every
    /// coordinator handle is dropped, since nothing could trigger it anymore.
    pub async fn triggered(&mut self) {
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}
