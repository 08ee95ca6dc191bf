pub mod config;
pub mod error;
pub mod types;
pub mod value;

pub use error::{ShardlineError, ShardlineResult};
pub use value::{Row, Value};
