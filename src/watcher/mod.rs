//! Watch-driven incremental service restarts
//!
//! Implements the `watch` command:
//! - one recursive filesystem subscription per configured package
//! - directory-modification events mark that package's services pending
//! - a fixed-interval batch loop drains the pending set and restarts each
//!   service once, continuing past individual failures
//! - graceful Ctrl+C shutdown, NDJSON event output for scripting

mod event;
mod executor;
mod map;
mod tracker;
mod watch;
#[cfg(test)]
mod tests;

pub use event::{WatchEvent, WatchOptions};
pub use executor::{DockerRestarter, RestartExecutor};
pub use map::ServiceMap;
pub use tracker::ChangeTracker;
pub use watch::WatchSession;
