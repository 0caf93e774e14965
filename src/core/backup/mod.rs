pub mod model;
pub mod store;

pub use model::{BackupEntry, BackupTrigger, EnvVarSnapshot};
pub use store::BackupStore;
