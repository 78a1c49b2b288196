//! Dockhand - container-based development loop for the manager appliance
//!
//! Dockhand automates iterating on a containerized application manager:
//! build a base image, inject SSH credentials, bootstrap the manager inside
//! the container, then watch the source checkout and restart the affected
//! in-container services as code changes.

pub mod config;
pub mod deploy;
pub mod docker;
pub mod error;
pub mod ssh;
pub mod watcher;
pub mod workdir;

// Re-exports for convenience
pub use config::Config;
pub use docker::{DockerCli, RunSpec};
pub use error::{DockhandError, DockhandResult};
pub use watcher::{
    ChangeTracker, DockerRestarter, RestartExecutor, ServiceMap, WatchEvent, WatchOptions,
    WatchSession,
};
pub use workdir::Workdir;
