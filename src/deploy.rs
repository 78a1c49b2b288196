//! Deployment CLI wrapper
//!
//! Thin shell-outs to the external `cfy` binary plus the bootstrap inputs
//! file handed to it. Blueprint semantics live entirely on the other side of
//! this boundary.

use std::fs;
use std::path::Path;
use std::process::Command;

use serde::Serialize;

use crate::error::{DockhandError, DockhandResult};

/// Inputs the deployment CLI needs to reach the container
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapInputs {
    pub public_ip: String,
    pub private_ip: String,
    pub ssh_user: String,
    pub ssh_key_filename: String,
    pub dsl_resources: Vec<String>,
}

impl BootstrapInputs {
    pub fn for_container(container_ip: &str, ssh_key_path: &Path) -> Self {
        Self {
            public_ip: container_ip.to_string(),
            private_ip: container_ip.to_string(),
            ssh_user: "root".to_string(),
            ssh_key_filename: ssh_key_path.display().to_string(),
            dsl_resources: Vec::new(),
        }
    }

    pub fn write(&self, path: &Path) -> DockhandResult<()> {
        fs::write(path, serde_yaml_ng::to_string(self)?)?;
        Ok(())
    }
}

/// `cfy init -r`
pub fn init_profile() -> DockhandResult<()> {
    run_cfy(&["init".to_string(), "-r".to_string()])
}

/// `cfy use <ip>` - point the deployment CLI at the container
pub fn use_manager(container_ip: &str) -> DockhandResult<()> {
    run_cfy(&["use".to_string(), container_ip.to_string()])
}

/// `cfy bootstrap <blueprint> --inputs=... [extra args]`
pub fn bootstrap(blueprint_path: &Path, inputs: &[String], extra_args: &[String]) -> DockhandResult<()> {
    let mut args = vec!["bootstrap".to_string(), blueprint_path.display().to_string()];
    args.extend(inputs.iter().map(|i| format!("--inputs={}", i)));
    args.extend(extra_args.iter().cloned());
    run_cfy(&args)
}

fn run_cfy(args: &[String]) -> DockhandResult<()> {
    let status = Command::new("cfy").args(args).status()?;
    if !status.success() {
        return Err(DockhandError::CommandFailed {
            command: format!("cfy {}", args.join(" ")),
            status: status.to_string(),
        });
    }
    Ok(())
}
