//! Logical connection and statement API over the sharding core.

pub mod connection;
pub mod generated_keys;
pub mod memory;
pub mod statement;

pub use connection::ShardingConnection;
pub use generated_keys::GeneratedKeysCursor;
pub use memory::{ExecutedStatement, MemoryDataSource};
pub use statement::ShardingStatement;
