//! Work directory state
//!
//! Small plain-text marker files recording the most recently started
//! container, so commands can default to it when no id is passed.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{DockhandError, DockhandResult};

/// Container coordinates optionally written out for external tooling
#[derive(Debug, Clone, Serialize)]
pub struct ContainerDetails {
    pub id: String,
    pub ip: String,
}

impl ContainerDetails {
    pub fn write(&self, path: &Path) -> DockhandResult<()> {
        fs::write(path, serde_yaml_ng::to_string(self)?)?;
        Ok(())
    }
}

/// Handle on the per-user work directory
#[derive(Debug, Clone)]
pub struct Workdir {
    dir: PathBuf,
}

impl Workdir {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Create the directory if it does not exist yet
    pub fn init(&self) -> DockhandResult<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Id of the most recently started container
    pub fn last_container_id(&self) -> DockhandResult<String> {
        self.read_marker("last_container_id")
    }

    /// IP of the most recently started container
    pub fn last_container_ip(&self) -> DockhandResult<String> {
        self.read_marker("last_container_ip")
    }

    /// Record the container a later command should default to
    pub fn save_last_container(&self, container_id: &str, container_ip: &str) -> DockhandResult<()> {
        self.init()?;
        fs::write(self.dir.join("last_container_id"), container_id)?;
        fs::write(self.dir.join("last_container_ip"), container_ip)?;
        Ok(())
    }

    fn read_marker(&self, name: &str) -> DockhandResult<String> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Err(DockhandError::NoContainer);
        }
        Ok(fs::read_to_string(path)?.trim().to_string())
    }
}
