//! Testing utilities for table sink workers.
//!
//! - [`event`] builds events and transactions with fixed sizes.
//! - [`failpoints`] configures fail points for the duration of a test.
//! - [`sort_engine`] wraps a sort engine to count reads and closes and to inject failures.
//! - [`test_table_sink_wrapper`] wraps a table sink to record every call in order.
//! - [`notify`] waits for conditions with a timeout so tests fail instead of hanging.
//! - [`worker`] builds configurations and quotas sized for tests.

pub mod event;
pub mod failpoints;
pub mod notify;
pub mod sort_engine;
pub mod test_table_sink_wrapper;
pub mod worker;
