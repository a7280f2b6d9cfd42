//! Dedicated worker thread.
//!
//! Drains the pending verification queue and the retry queue on a fixed
//! tick. When a verification batch was truncated (more locks queued than
//! the batch limit), the loop re-runs immediately instead of sleeping.
//! The tick sleep doubles as the stop signal via a crossbeam channel.

use crate::manager::InstantSendManager;
use crossbeam::channel::{bounded, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::info;

/// Handle to the running worker thread. Stops (and joins) on drop.
pub struct Worker {
    thread: Option<JoinHandle<()>>,
    stop_tx: Sender<()>,
}

impl Worker {
    /// Spawn the worker loop for a manager.
    pub fn spawn(manager: Arc<InstantSendManager>) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let interval = manager.config().worker_interval();

        let thread = std::thread::Builder::new()
            .name("islock-worker".into())
            .spawn(move || {
                info!("lock worker started");
                loop {
                    let more_work = manager.process_pending_locks();
                    manager.process_pending_retries();

                    if more_work {
                        // Reschedule immediately, but stay interruptible.
                        match stop_rx.try_recv() {
                            Ok(()) | Err(TryRecvError::Disconnected) => break,
                            Err(TryRecvError::Empty) => {}
                        }
                    } else {
                        match stop_rx.recv_timeout(interval) {
                            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                            Err(RecvTimeoutError::Timeout) => {}
                        }
                    }
                }
                info!("lock worker stopped");
            })
            .expect("failed to spawn lock worker");

        Self {
            thread: Some(thread),
            stop_tx,
        }
    }

    /// Stop the worker and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
