//! Cooperative cancellation.
//!
//! The orchestrator checks the token once per loop iteration; nothing is
//! interrupted mid-stage. Signal handlers, the interactive key watcher and the
//! preview all cancel through the same token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};

#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Cancel on Ctrl-C / SIGTERM. Can only be installed once per process.
    pub fn install_signal_handler(&self) -> Result<()> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            if token.is_cancelled() {
                log::warn!("second termination signal received; shutdown already in progress");
            } else {
                log::info!("termination signal received, finishing current frame");
            }
            token.cancel();
        })
        .context("install termination signal handler")
    }
}
