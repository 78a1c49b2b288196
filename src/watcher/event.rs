//! Watch event types and options

use std::time::Duration;

/// Options for one watch session
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Time between restart batches
    pub interval: Duration,
    /// Rebuild the agent package when the agent pseudo-service is pending
    pub rebuild_agent: bool,
    /// Name of the agent pseudo-service
    pub agent_service: String,
}

/// Watch event types for NDJSON output
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchEvent {
    WatchStarted {
        packages: usize,
        interval_secs: u64,
    },
    /// A package's source path could not be subscribed; session continues
    PackageSkipped {
        package: String,
        path: String,
        message: String,
    },
    /// A directory modification was mapped to a package's services
    ChangeDetected {
        package: String,
    },
    ServiceRestarted {
        service: String,
    },
    RestartFailed {
        service: String,
        message: String,
    },
    AgentRebuilt,
    AgentRebuildFailed {
        message: String,
    },
    BatchComplete {
        restarted: usize,
        failed: usize,
    },
    Shutdown,
}

impl WatchEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
