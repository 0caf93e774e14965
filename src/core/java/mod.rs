pub mod paths;
pub mod runtime;

pub use paths::AppPaths;
pub use runtime::has_java_executable;
pub use runtime::inspect_jdk_home;
pub use runtime::JdkMetadata;
pub use runtime::java_binary;
pub use runtime::JdkVersion;
