//! Read-only rule views compiled from configuration.

pub mod encrypt;
pub mod sharding;

pub use encrypt::{AssistedQueryEncryptor, EncryptRule, Sha256AssistedEncryptor};
pub use sharding::{DataNode, ShardingRule, TableRule};
