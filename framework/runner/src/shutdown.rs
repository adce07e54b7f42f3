use surge_core::prelude::{ShutdownHandle, ShutdownReason};
use tokio::signal;

/// Stop the run when the process receives Ctrl-C.
pub(crate) fn start_shutdown_listener(runtime: &tokio::runtime::Runtime, handle: ShutdownHandle) {
    runtime.spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            log::error!(
                "Failed to listen for Ctrl-C, the run can only be stopped by its scenarios: {e}"
            );
            return;
        }

        if handle.shutdown(ShutdownReason::Interrupted) {
            println!("Received shutdown signal, shutting down...");
        }
    });
}

/// Returned by [crate::executor::Executor::execute_in_place] when the run is interrupted while
/// the future is still running.
#[derive(derive_more::Display, derive_more::Error, Debug, Clone)]
#[display("shutdown signal received: {reason}")]
pub struct ShutdownSignalError {
    reason: ShutdownReason,
}

impl ShutdownSignalError {
    pub(crate) fn new(reason: ShutdownReason) -> Self {
        Self { reason }
    }

    pub fn reason(&self) -> &ShutdownReason {
        &self.reason
    }
}
