// Library module for kclient
// Re-exports modules for use in integration tests and external crates

pub mod config;
pub mod error;
pub mod exec;
pub mod k8s;
pub mod sync;
pub mod watch;

pub use config::{KclientConfig, SyncConfig, WatchConfig};
pub use error::{DeploymentNotFound, SyncError, WatchError};
pub use exec::{CommandExecutor, ExecIo, ExecTarget, PodExecutor};
pub use k8s::K8sClient;
pub use sync::{ArchiveBuilder, FileSync, PathFilter, SyncRequest};
pub use watch::{ConditionWatcher, WaitOutcome, WatchSubscription};
