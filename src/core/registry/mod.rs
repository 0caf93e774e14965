pub mod manager;
pub mod model;

pub use manager::VersionRegistry;
pub use model::{JdkInstallation, Origin};
