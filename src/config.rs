//! Configuration for Dockhand
//!
//! A single YAML file at `~/.dockhand/config.yaml`, written by `dockhand init`
//! and loaded once per invocation. The loaded value is passed explicitly into
//! whatever needs it - there is no global configuration state.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DockhandError, DockhandResult};

/// Default docker host the `docker` client is pointed at
pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// Default SSH key injected into managed containers
pub const DEFAULT_SSH_KEY: &str = "~/.ssh/id_rsa";

/// Default source checkout root the watcher maps packages under
pub const DEFAULT_SOURCE_ROOT: &str = "~/dev/manager";

/// Image tag for the clean (pre-bootstrap) base image
pub const DEFAULT_CLEAN_IMAGE_TAG: &str = "dockhand/clean:latest";

/// Image tag a bootstrapped container is committed to
pub const DEFAULT_MANAGER_IMAGE_TAG: &str = "dockhand/manager:latest";

/// Container-level settings used by `prepare` and `run`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,

    #[serde(default = "default_expose")]
    pub expose: Vec<u16>,

    #[serde(default)]
    pub publish: Vec<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            expose: default_expose(),
            publish: Vec::new(),
        }
    }
}

fn default_hostname() -> String {
    "manager".to_string()
}

fn default_expose() -> Vec<u16> {
    vec![22, 80, 443, 5671]
}

/// Settings for the `watch` command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Seconds between restart batches
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Pseudo-service name that stands for the agent package
    #[serde(default = "default_agent_service")]
    pub agent_service: String,

    /// In-container path the agent package is written to
    #[serde(default = "default_agent_package_path")]
    pub agent_package_path: String,

    /// In-container directory the agent package is built from
    #[serde(default = "default_agent_template_dir")]
    pub agent_template_dir: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            agent_service: default_agent_service(),
            agent_package_path: default_agent_package_path(),
            agent_template_dir: default_agent_template_dir(),
        }
    }
}

fn default_interval() -> u64 {
    2
}

fn default_agent_service() -> String {
    "agent".to_string()
}

fn default_agent_package_path() -> String {
    "/opt/manager/resources/packages/agents/centos-agent.tar.gz".to_string()
}

fn default_agent_template_dir() -> String {
    "/opt/agent-template".to_string()
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub docker_host: String,
    pub ssh_key_path: PathBuf,
    pub manager_blueprint_path: PathBuf,
    pub source_root: PathBuf,
    pub workdir: PathBuf,

    #[serde(default = "default_clean_image_tag")]
    pub clean_image_tag: String,

    #[serde(default = "default_manager_image_tag")]
    pub manager_image_tag: String,

    #[serde(default)]
    pub container: ContainerConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    /// Services restarted by `restart-services`
    #[serde(default = "default_services")]
    pub services: Vec<String>,

    /// Package id -> directory relative to the source root
    #[serde(default = "default_package_dir")]
    pub package_dir: BTreeMap<String, String>,

    /// Package id -> services restarted when that package changes
    #[serde(default = "default_package_services")]
    pub package_services: BTreeMap<String, BTreeSet<String>>,

    /// In-container environment -> packages mounted into it by `run --mount`
    #[serde(default = "default_env_packages")]
    pub env_packages: BTreeMap<String, Vec<String>>,
}

fn default_clean_image_tag() -> String {
    DEFAULT_CLEAN_IMAGE_TAG.to_string()
}

fn default_manager_image_tag() -> String {
    DEFAULT_MANAGER_IMAGE_TAG.to_string()
}

fn default_services() -> Vec<String> {
    vec![
        "restservice".to_string(),
        "mgmtworker".to_string(),
        "queueworker".to_string(),
    ]
}

fn default_package_dir() -> BTreeMap<String, String> {
    [
        ("common", "manager-common"),
        ("rest_service", "manager/rest-service"),
        ("system_workflows", "manager/workflows"),
        ("dsl_parser", "manager-dsl-parser"),
        ("agent", "manager-agent"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_package_services() -> BTreeMap<String, BTreeSet<String>> {
    fn set(services: &[&str]) -> BTreeSet<String> {
        services.iter().map(|s| s.to_string()).collect()
    }
    [
        ("common", set(&["restservice", "mgmtworker"])),
        ("rest_service", set(&["restservice"])),
        ("system_workflows", set(&["mgmtworker"])),
        ("dsl_parser", set(&["restservice", "mgmtworker"])),
        ("agent", set(&["restservice", "mgmtworker", "agent"])),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn default_env_packages() -> BTreeMap<String, Vec<String>> {
    fn list(packages: &[&str]) -> Vec<String> {
        packages.iter().map(|s| s.to_string()).collect()
    }
    [
        (
            "manager",
            list(&["common", "rest_service", "dsl_parser", "agent"]),
        ),
        (
            "mgmtworker",
            list(&["common", "system_workflows", "dsl_parser", "agent"]),
        ),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Non-fatal configuration warning surfaced to CLI users
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub key: String,
    pub file: PathBuf,
}

impl Config {
    /// Directory holding the configuration file (`~/.dockhand`)
    pub fn conf_dir() -> DockhandResult<PathBuf> {
        let home = dirs::home_dir().ok_or(DockhandError::HomeNotFound)?;
        Ok(home.join(".dockhand"))
    }

    /// Path to the configuration file itself
    pub fn conf_path() -> DockhandResult<PathBuf> {
        Ok(Self::conf_dir()?.join("config.yaml"))
    }

    /// Load the persisted configuration, failing if `init` never ran
    pub fn load() -> DockhandResult<Self> {
        let path = Self::conf_path()?;
        if !path.exists() {
            return Err(DockhandError::NotInitialized);
        }
        let (config, _warnings) = Self::load_with_warnings(&path)?;
        Ok(config)
    }

    /// Load from an explicit path and collect unknown-key warnings
    pub fn load_with_warnings(path: &Path) -> DockhandResult<(Self, Vec<ConfigWarning>)> {
        let content = fs::read_to_string(path)?;

        let mut unknown_paths: Vec<String> = Vec::new();
        let deserializer = serde_yaml_ng::Deserializer::from_str(&content);
        let config: Self = serde_ignored::deserialize(deserializer, |path| {
            unknown_paths.push(path.to_string());
        })?;

        let warnings = unknown_paths
            .into_iter()
            .map(|key| ConfigWarning {
                key,
                file: path.to_path_buf(),
            })
            .collect();

        Ok((config, warnings))
    }

    /// Persist the configuration, refusing to clobber unless `reset`
    pub fn save(&self, reset: bool) -> DockhandResult<PathBuf> {
        let dir = Self::conf_dir()?;
        fs::create_dir_all(&dir)?;
        let path = dir.join("config.yaml");
        if path.exists() && !reset {
            return Err(DockhandError::AlreadyInitialized { path });
        }
        fs::write(&path, serde_yaml_ng::to_string(self)?)?;
        Ok(path)
    }

    /// Source root with a leading `~` expanded
    pub fn source_root(&self) -> PathBuf {
        expand_home(&self.source_root)
    }

    /// SSH key path with a leading `~` expanded
    pub fn ssh_key_path(&self) -> PathBuf {
        expand_home(&self.ssh_key_path)
    }

    /// Work directory with a leading `~` expanded
    pub fn workdir(&self) -> PathBuf {
        expand_home(&self.workdir)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            docker_host: DEFAULT_DOCKER_HOST.to_string(),
            ssh_key_path: PathBuf::from(DEFAULT_SSH_KEY),
            manager_blueprint_path: PathBuf::new(),
            source_root: PathBuf::from(DEFAULT_SOURCE_ROOT),
            workdir: PathBuf::from("~/.dockhand/work"),
            clean_image_tag: default_clean_image_tag(),
            manager_image_tag: default_manager_image_tag(),
            container: ContainerConfig::default(),
            watch: WatchConfig::default(),
            services: default_services(),
            package_dir: default_package_dir(),
            package_services: default_package_services(),
            env_packages: default_env_packages(),
        }
    }
}

/// Expand a leading `~` to the user's home directory
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}
