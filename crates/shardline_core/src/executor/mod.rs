//! Handle pool and concurrent fan-out over execution units.

pub mod fanout;
pub mod pool;

pub use fanout::{ExecuteOutcome, FanoutExecutor, UpdateOutcome};
pub use pool::{BackendHandle, HandlePool};
