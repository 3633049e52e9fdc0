//! Data types flowing through the table sink delivery core.
//!
//! Covers table identity, positions in a table's commit-ordered stream, resolved timestamp
//! watermarks and the row change events exchanged with the sort engine and table sinks.

mod event;
mod position;
mod resolved_ts;
mod sized;
mod table_id;

pub use event::*;
pub use position::*;
pub use resolved_ts::*;
pub use sized::*;
pub use table_id::*;
