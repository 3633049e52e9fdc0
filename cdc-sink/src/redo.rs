//! Redo log capability held by table sink workers.

/// Manager of the redo log written alongside table sinks.
///
/// Workers only need to know whether redo logging is active, persisting the log happens
/// elsewhere.
pub trait RedoLogManager {
    /// Returns `true` if redo logging is enabled for the changefeed.
    fn enabled(&self) -> bool;
}

/// Redo log manager used when redo logging is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRedoLogManager;

impl RedoLogManager for NoopRedoLogManager {
    fn enabled(&self) -> bool {
        false
    }
}
