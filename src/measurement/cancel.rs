//! Cooperative cancellation for long-running scans.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::error::{AppError, AppResult};

/// Shared flag checked by the orchestrator before every move and every sample.
///
/// Clones observe the same flag, so one clone can be handed to a signal handler
/// or another thread while the scan holds the other.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> AppResult<()> {
        if self.is_cancelled() {
            Err(AppError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Cancel this token on Ctrl-C.
    ///
    /// The process can hold only one interrupt handler; a second call fails.
    pub fn cancel_on_interrupt(&self) -> AppResult<()> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            warn!("interrupt received, cancelling the measurement");
            token.cancel();
        })
        .map_err(|e| AppError::Configuration(format!("cannot install the interrupt handler: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::new();
        let handle = token.clone();
        assert!(token.check().is_ok());

        std::thread::spawn(move || handle.cancel()).join().unwrap();

        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(AppError::Cancelled)));
    }
}
