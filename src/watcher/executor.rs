//! Restart side effects
//!
//! The batch loop talks to this trait so tests can record restarts instead
//! of shelling out to the container runtime.

use crate::docker::DockerCli;
use crate::error::DockhandResult;

/// Performs the per-service restart action for one drained batch entry
pub trait RestartExecutor {
    /// Restart one named service inside the target container
    fn restart(&self, service: &str) -> DockhandResult<()>;

    /// Rebuild the agent package instead of restarting a service
    fn rebuild_agent(&self) -> DockhandResult<()>;
}

/// Production executor: `systemctl restart` / agent re-tar via `docker exec`
#[derive(Debug, Clone)]
pub struct DockerRestarter {
    docker: DockerCli,
    container_id: String,
    agent_package_path: String,
    agent_template_dir: String,
}

impl DockerRestarter {
    pub fn new(
        docker: DockerCli,
        container_id: impl Into<String>,
        agent_package_path: impl Into<String>,
        agent_template_dir: impl Into<String>,
    ) -> Self {
        Self {
            docker,
            container_id: container_id.into(),
            agent_package_path: agent_package_path.into(),
            agent_template_dir: agent_template_dir.into(),
        }
    }
}

impl RestartExecutor for DockerRestarter {
    fn restart(&self, service: &str) -> DockhandResult<()> {
        self.docker.restart_service(&self.container_id, service)
    }

    fn rebuild_agent(&self) -> DockhandResult<()> {
        self.docker.build_agent_package(
            &self.container_id,
            &self.agent_package_path,
            &self.agent_template_dir,
        )
    }
}
