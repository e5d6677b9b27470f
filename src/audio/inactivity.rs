use parking_lot::Mutex;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::debug;

/// Temporizador re-armable que pide el teardown de la sesión tras inactividad.
///
/// Every `arm` bumps a generation counter and aborts the previous countdown.
/// When a countdown elapses it hands its generation to the fire callback,
/// which must check [`InactivityMonitor::is_current`] under the session lock
/// before acting. A fire whose generation was superseded is never acted on,
/// even if it raced past the abort.
#[derive(Debug)]
pub struct InactivityMonitor {
    timeout: Duration,
    generation: Arc<AtomicU64>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl InactivityMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            generation: Arc::new(AtomicU64::new(0)),
            pending: Mutex::new(None),
        }
    }

    /// Cancela cualquier disparo pendiente y programa uno nuevo.
    pub fn arm<F, Fut>(&self, on_fire: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = self.generation.clone();
        let timeout = self.timeout;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if current.load(Ordering::SeqCst) == generation {
                on_fire(generation).await;
            }
        });

        if let Some(previous) = self.pending.lock().replace(handle) {
            previous.abort();
        }
        debug!("⏲️ Inactividad armada ({}s, generación {})", timeout.as_secs(), generation);
        generation
    }

    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(pending) = self.pending.lock().take() {
            pending.abort();
            debug!("⏲️ Inactividad cancelada");
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Drop for InactivityMonitor {
    fn drop(&mut self) {
        self.cancel();
    }
}
