//! Error types for Dockhand
//!
//! Uses `thiserror` for library errors; `anyhow` is confined to `main`.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Dockhand operations
pub type DockhandResult<T> = Result<T, DockhandError>;

/// Main error type for Dockhand operations
#[derive(Error, Debug)]
pub enum DockhandError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// The OS-level filesystem observer could not be started
    #[error("failed to start filesystem watcher: {0}")]
    Watcher(#[from] notify::Error),

    /// No configuration file on disk yet
    #[error("not initialized - run 'dockhand init' first")]
    NotInitialized,

    /// `init` refused to clobber an existing configuration
    #[error("already initialized at {path} - run 'dockhand init --reset' to overwrite")]
    AlreadyInitialized { path: PathBuf },

    /// A file the command needs does not exist
    #[error("required file not found: {path} - {hint}")]
    MissingFile { path: PathBuf, hint: String },

    /// An external command exited non-zero
    #[error("command failed ({status}): {command}")]
    CommandFailed { command: String, status: String },

    /// No `last_container_id` marker in the work directory
    #[error("no container recorded - run 'dockhand run' first or pass --container-id")]
    NoContainer,

    /// Package id not present in the configured service map
    #[error("unknown package '{name}' in configuration")]
    UnknownPackage { name: String },

    /// `cp` needs exactly one side prefixed with ':'
    #[error("either source or target must be prefixed with ':' to denote the container side")]
    InvalidCpSpec,

    /// Home directory could not be resolved
    #[error("could not determine home directory")]
    HomeNotFound,
}
