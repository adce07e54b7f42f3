use std::future::Future;

use surge_core::prelude::{ShutdownHandle, ShutdownReason};

use crate::shutdown::ShutdownSignalError;

#[derive(Debug)]
pub struct Executor {
    runtime: tokio::runtime::Handle,
    shutdown_handle: ShutdownHandle,
}

impl Executor {
    pub(crate) fn new(runtime: tokio::runtime::Handle, shutdown_handle: ShutdownHandle) -> Self {
        Self {
            runtime,
            shutdown_handle,
        }
    }

    /// Run async code in place, blocking until it completes.
    ///
    /// This is for the setup and teardown hooks, which are synchronous. It must not be called from
    /// a behaviour, which is already async and should `.await` directly.
    ///
    /// The future will be cancelled if the run is interrupted, in which case a
    /// [ShutdownSignalError] is returned. Other reasons for stopping the run, such as a breached
    /// threshold, let the future complete so that teardown can still clean up.
    pub fn execute_in_place<T>(
        &self,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        let mut shutdown_listener = self.shutdown_handle.new_listener();
        self.runtime.block_on(async move {
            let interrupted = async {
                match shutdown_listener.wait_for_shutdown().await {
                    ShutdownReason::Interrupted => ShutdownReason::Interrupted,
                    _ => std::future::pending().await,
                }
            };

            tokio::select! {
                result = fut => result,
                reason = interrupted => {
                    Err(anyhow::anyhow!(ShutdownSignalError::new(reason)))
                },
            }
        })
    }

    /// Submit async code to be run in the background.
    ///
    /// Note that the future will not be cancelled if the run is shut down. It is also not
    /// guaranteed that the runner will wait for the future to complete before exiting.
    pub fn spawn(&self, fut: impl Future<Output = ()> + Send + 'static) {
        self.runtime.spawn(fut);
    }

    pub fn handle(&self) -> &tokio::runtime::Handle {
        &self.runtime
    }
}
