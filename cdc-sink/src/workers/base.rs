use std::future::Future;

use crate::error::SinkResult;

/// Handle for monitoring and controlling a running worker.
///
/// The handle stays valid after the worker completes, so its state can still be inspected.
/// The generic parameter `S` is the type of state exposed through the handle.
pub trait WorkerHandle<S> {
    /// Returns the current state of the worker.
    ///
    /// The state is a shared view, holding it does not keep the worker alive.
    fn state(&self) -> S;

    /// Waits for the worker to complete and returns its result.
    ///
    /// Panics and cancellations of the worker task are turned into errors.
    fn wait(self) -> impl Future<Output = SinkResult<()>> + Send;
}
