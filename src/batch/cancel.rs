//! Cooperative cancellation.

use std::ffi::c_int;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;

use crate::error::{TransferError, TransferResult};

/// Shared flag checked between chunks of long operations.
///
/// Clones observe the same flag, so one can be handed to a Ctrl-C handler
/// while the operation polls another.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sets the flag on Ctrl-C or SIGTERM.
    ///
    /// The running operation stops at its next chunk boundary. A second
    /// interrupt while the flag is already set exits immediately with
    /// status 130.
    pub fn cancel_on_interrupt(&self) -> io::Result<()> {
        self.cancel_on(&[SIGINT, SIGTERM])
    }

    fn cancel_on(&self, signals: &[c_int]) -> io::Result<()> {
        for &signal in signals {
            // Registered first so it sees the flag before this interrupt sets it
            flag::register_conditional_shutdown(signal, 130, Arc::clone(&self.0))?;
            flag::register(signal, Arc::clone(&self.0))?;
        }
        Ok(())
    }

    /// Returns [`TransferError::Cancelled`] if cancellation was requested.
    pub fn check(&self, stage: &str) -> TransferResult<()> {
        if self.is_cancelled() {
            return Err(TransferError::Cancelled {
                stage: stage.to_string(),
            });
        }
        Ok(())
    }
}
