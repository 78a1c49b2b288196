//! Container runtime wrapper
//!
//! All container interaction shells out to the `docker` client binary against
//! the configured docker host. Loud operations stream output to the terminal,
//! quiet ones capture stdout for parsing.

use std::fs::File;
use std::io::{Error, ErrorKind};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{DockhandError, DockhandResult};

/// Options for starting a container
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub image_tag: String,
    pub hostname: String,
    pub expose: Vec<u16>,
    pub publish: Vec<String>,
    /// `src:dst:mode` bind mounts
    pub volumes: Vec<String>,
    pub labels: Vec<String>,
}

impl RunSpec {
    /// Argv passed to `docker run`, container id printed on stdout
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--privileged".to_string(),
            "--detach".to_string(),
            format!("--hostname={}", self.hostname),
        ];
        args.extend(self.expose.iter().map(|p| format!("--expose={}", p)));
        args.extend(self.publish.iter().map(|p| format!("--publish={}", p)));
        args.extend(self.volumes.iter().map(|v| format!("--volume={}", v)));
        args.extend(self.labels.iter().map(|l| format!("--label={}", l)));
        args.push(self.image_tag.clone());
        args
    }
}

/// Thin wrapper over the `docker` client binary
#[derive(Debug, Clone)]
pub struct DockerCli {
    host: String,
}

impl DockerCli {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("docker");
        cmd.arg("-H").arg(&self.host);
        cmd
    }

    fn describe(&self, args: &[String]) -> String {
        format!("docker -H {} {}", self.host, args.join(" "))
    }

    /// Run docker streaming output to the terminal
    pub fn run_loud(&self, args: &[String]) -> DockhandResult<()> {
        let status = self
            .command()
            .args(args)
            .stdin(Stdio::null())
            .status()?;
        if !status.success() {
            return Err(DockhandError::CommandFailed {
                command: self.describe(args),
                status: status.to_string(),
            });
        }
        Ok(())
    }

    /// Run docker capturing stdout, trimmed
    pub fn output(&self, args: &[String]) -> DockhandResult<String> {
        let output = self.command().args(args).stdin(Stdio::null()).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut status = output.status.to_string();
            if let Some(line) = stderr.lines().next() {
                status = format!("{}: {}", status, line.trim());
            }
            return Err(DockhandError::CommandFailed {
                command: self.describe(args),
                status,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// `docker build -t <tag> <context>`
    pub fn build(&self, tag: &str, context: &Path) -> DockhandResult<()> {
        self.run_loud(&[
            "build".to_string(),
            "-t".to_string(),
            tag.to_string(),
            context.display().to_string(),
        ])
    }

    /// Start a container, returning its id
    pub fn run_detached(&self, spec: &RunSpec) -> DockhandResult<String> {
        self.output(&spec.to_args())
    }

    /// `docker exec`, streaming output
    pub fn exec(&self, container_id: &str, argv: &[String]) -> DockhandResult<()> {
        let mut args = vec!["exec".to_string(), container_id.to_string()];
        args.extend(argv.iter().cloned());
        self.run_loud(&args)
    }

    /// `docker exec`, captured output
    pub fn exec_quiet(&self, container_id: &str, argv: &[String]) -> DockhandResult<String> {
        let mut args = vec!["exec".to_string(), container_id.to_string()];
        args.extend(argv.iter().cloned());
        self.output(&args)
    }

    /// `docker cp` between host and container
    pub fn cp(&self, source: &str, target: &str) -> DockhandResult<()> {
        self.output(&["cp".to_string(), source.to_string(), target.to_string()])?;
        Ok(())
    }

    /// Container IP from the network settings
    pub fn inspect_ip(&self, container_id: &str) -> DockhandResult<String> {
        self.output(&[
            "inspect".to_string(),
            "--format={{range .NetworkSettings.Networks}}{{.IPAddress}}{{end}}".to_string(),
            container_id.to_string(),
        ])
    }

    /// Immediate restart of the whole container
    pub fn restart(&self, container_id: &str) -> DockhandResult<()> {
        self.output(&[
            "restart".to_string(),
            "-t".to_string(),
            "0".to_string(),
            container_id.to_string(),
        ])?;
        Ok(())
    }

    pub fn stop(&self, container_id: &str) -> DockhandResult<()> {
        self.output(&["stop".to_string(), container_id.to_string()])?;
        Ok(())
    }

    pub fn commit(&self, container_id: &str, tag: &str) -> DockhandResult<()> {
        self.output(&[
            "commit".to_string(),
            container_id.to_string(),
            tag.to_string(),
        ])?;
        Ok(())
    }

    pub fn rm_force(&self, container_id: &str) -> DockhandResult<()> {
        self.output(&[
            "rm".to_string(),
            "-f".to_string(),
            container_id.to_string(),
        ])?;
        Ok(())
    }

    /// `docker save <tag>` piped through gzip into `output_file`
    pub fn save_image_to(&self, tag: &str, output_file: &Path) -> DockhandResult<()> {
        let mut save = self
            .command()
            .args(["save", tag])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()?;
        let save_stdout = save
            .stdout
            .take()
            .ok_or_else(|| Error::new(ErrorKind::BrokenPipe, "docker save produced no stdout"))?;

        let gzip_status = Command::new("gzip")
            .arg("-c")
            .stdin(Stdio::from(save_stdout))
            .stdout(Stdio::from(File::create(output_file)?))
            .status()?;
        let save_status = save.wait()?;

        if !save_status.success() {
            return Err(DockhandError::CommandFailed {
                command: self.describe(&["save".to_string(), tag.to_string()]),
                status: save_status.to_string(),
            });
        }
        if !gzip_status.success() {
            return Err(DockhandError::CommandFailed {
                command: format!("gzip -c > {}", output_file.display()),
                status: gzip_status.to_string(),
            });
        }
        Ok(())
    }

    pub fn rmi(&self, tag: &str) -> DockhandResult<()> {
        self.output(&["rmi".to_string(), tag.to_string()])?;
        Ok(())
    }

    /// Container ids matching the given `--filter` expressions
    pub fn ps_ids(&self, filters: &[String]) -> DockhandResult<Vec<String>> {
        let mut args = vec!["ps".to_string(), "-aq".to_string()];
        for filter in filters {
            args.push("--filter".to_string());
            args.push(filter.clone());
        }
        let out = self.output(&args)?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Restart one named service inside the container
    pub fn restart_service(&self, container_id: &str, service: &str) -> DockhandResult<()> {
        self.exec_quiet(
            container_id,
            &[
                "systemctl".to_string(),
                "restart".to_string(),
                service.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Re-tar the agent template directory into the agent package path
    pub fn build_agent_package(
        &self,
        container_id: &str,
        package_path: &str,
        template_dir: &str,
    ) -> DockhandResult<()> {
        let template = Path::new(template_dir);
        let parent = template
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "/".to_string());
        let name = template
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| template_dir.to_string());
        self.exec_quiet(
            container_id,
            &[
                "tar".to_string(),
                "czf".to_string(),
                package_path.to_string(),
                "-C".to_string(),
                parent,
                name,
            ],
        )?;
        Ok(())
    }
}

/// Resolve a `cp` source/target pair, expanding the `:`-prefixed container side
pub fn resolve_cp_spec(
    source: &str,
    target: &str,
    container_id: &str,
) -> DockhandResult<(String, String)> {
    match (source.strip_prefix(':'), target.strip_prefix(':')) {
        (Some(container_path), None) => Ok((
            format!("{}:{}", container_id, container_path),
            target.to_string(),
        )),
        (None, Some(container_path)) => Ok((
            source.to_string(),
            format!("{}:{}", container_id, container_path),
        )),
        _ => Err(DockhandError::InvalidCpSpec),
    }
}
