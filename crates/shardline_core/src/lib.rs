//! Routing, rewriting, fan-out execution and result merging for one logical
//! statement handle.

pub mod backend;
pub mod context;
pub mod executor;
pub mod merge;
pub mod rewrite;
pub mod route;
pub mod rule;

#[cfg(test)]
mod test_support;

pub use backend::{
    BackendStatement, DataSource, PhysicalConnection, ResultCursor, RowsCursor, StatementOptions,
};
pub use context::ShardingContext;
pub use executor::fanout::FanoutExecutor;
pub use executor::pool::{BackendHandle, HandlePool};
pub use merge::ResultMerger;
pub use route::{ExecutionUnit, GeneratedKeyDescriptor, RouteResult, RouteUnit};
pub use rule::{EncryptRule, ShardingRule};
