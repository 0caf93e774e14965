// ─── jvman core ───
// JDK version-switch engine: one stable link, managed environment variables.
//
// Architecture:
//   core/
//     java/      JDK home inspection + data directory layout
//     registry/  Catalog of known installations
//     platform/  Link + persistent env store per OS
//     link/      Current-link swap state machine
//     env/       JAVA_HOME / PATH / CLASSPATH derivation and apply
//     backup/    Environment snapshots with bounded retention
//     state/     CurrentState, settings, transaction owner

pub mod backup;
pub mod env;
pub mod error;
pub mod java;
pub mod link;
pub mod platform;
pub mod registry;
pub mod state;
pub mod storage;
