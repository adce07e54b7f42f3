use std::sync::Arc;

use tokio::sync::watch::{self, Receiver, Sender};

/// Why a run was told to stop early.
#[derive(derive_more::Display, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The process received an interrupt, usually Ctrl-C.
    #[display("interrupted")]
    Interrupted,
    /// A threshold with `abort_on_fail` was breached during a periodic check.
    #[display("threshold breached: {_0}")]
    ThresholdBreached(String),
    /// A behaviour or hook asked for the run to stop.
    #[display("stop requested")]
    Requested,
    /// All scenarios finished. Only used to stop background tasks.
    #[display("completed")]
    Completed,
}

/// Broadcasts a one-time shutdown signal to every listener.
///
/// The first reason given wins. Listeners created after the signal was sent still observe it.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<Sender<Option<ShutdownReason>>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            sender: Arc::new(watch::channel(None).0),
        }
    }

    /// Send the shutdown signal. Returns `false` if a signal had already been sent, in which case
    /// the original reason is kept.
    pub fn shutdown(&self, reason: ShutdownReason) -> bool {
        let sent = self.sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }

            *current = Some(reason.clone());
            true
        });

        if sent {
            log::debug!("Shutdown signal sent: {reason}");
        } else {
            log::trace!("Ignoring shutdown signal [{reason}], already shutting down");
        }

        sent
    }

    /// The reason the signal was sent with, if it has been sent.
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.sender.borrow().clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender.borrow().is_some()
    }

    pub fn new_listener(&self) -> DelegatedShutdownListener {
        DelegatedShutdownListener::new(self.sender.subscribe())
    }
}

#[derive(Clone, Debug)]
pub struct DelegatedShutdownListener {
    receiver: Receiver<Option<ShutdownReason>>,
}

impl DelegatedShutdownListener {
    pub(crate) fn new(receiver: Receiver<Option<ShutdownReason>>) -> Self {
        Self { receiver }
    }

    /// Point in time check if the shutdown signal has been sent. If this returns true then no new
    /// work should be started.
    pub fn should_shutdown(&self) -> bool {
        self.receiver.borrow().is_some()
    }

    /// Wait for the shutdown signal. It is safe to race this with another future so that the
    /// signal can be used to cancel waiting.
    ///
    /// If every [ShutdownHandle] has been dropped without a signal, this never resolves.
    pub async fn wait_for_shutdown(&mut self) -> ShutdownReason {
        let reason = match self.receiver.wait_for(|reason| reason.is_some()).await {
            Ok(reason) => reason.clone(),
            Err(_) => None,
        };

        match reason {
            Some(reason) => reason,
            None => std::future::pending().await,
        }
    }
}
