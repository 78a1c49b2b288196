//! Dockhand CLI - container-based development loop for the manager appliance
//!
//! Usage: dockhand <COMMAND>
//!
//! Commands:
//!   init              Save configuration and create the work directory
//!   prepare           Build and start a clean base container with SSH access
//!   bootstrap         Prepare a container and bootstrap the manager in it
//!   run               Start a container from the manager image
//!   watch             Watch the source tree and restart affected services

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use dockhand::config::{self, Config, DEFAULT_DOCKER_HOST, DEFAULT_SOURCE_ROOT, DEFAULT_SSH_KEY};
use dockhand::docker::{resolve_cp_spec, DockerCli, RunSpec};
use dockhand::error::{DockhandError, DockhandResult};
use dockhand::workdir::{ContainerDetails, Workdir};
use dockhand::{deploy, ssh};

/// Dockhand - container-based development loop for the manager appliance
#[derive(Parser, Debug)]
#[command(name = "dockhand")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Output NDJSON events instead of human messages (watch only)
    #[arg(long, default_value = "false")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Save configuration and create the work directory
    Init {
        /// Path to the manager blueprint handed to the deployment CLI
        #[arg(long)]
        manager_blueprint_path: PathBuf,

        /// Docker host the docker client talks to
        #[arg(long, default_value = DEFAULT_DOCKER_HOST)]
        docker_host: String,

        /// Private SSH key injected into managed containers
        #[arg(long, default_value = DEFAULT_SSH_KEY)]
        ssh_key_path: PathBuf,

        /// Source checkout root the watcher maps packages under
        #[arg(long, default_value = DEFAULT_SOURCE_ROOT)]
        source_root: PathBuf,

        /// Override the clean base image tag
        #[arg(long)]
        clean_image_tag: Option<String>,

        /// Override the manager image tag
        #[arg(long)]
        manager_image_tag: Option<String>,

        /// Override the work directory location
        #[arg(long)]
        workdir: Option<PathBuf>,

        /// Overwrite an existing configuration
        #[arg(long)]
        reset: bool,
    },

    /// Build and start a clean base container with SSH access
    Prepare {
        /// Where the bootstrap inputs file is written
        #[arg(long, default_value = "inputs.yaml")]
        inputs_output: PathBuf,

        /// Directory with the base image build context; skip the build if omitted
        #[arg(long)]
        build_context: Option<PathBuf>,

        /// Write the started container's id and ip as YAML to this path
        #[arg(long)]
        details_path: Option<PathBuf>,

        /// Labels applied to the container
        #[arg(short, long)]
        label: Vec<String>,

        /// Image tag to start from instead of the configured clean tag
        #[arg(short, long)]
        tag: Option<String>,
    },

    /// Prepare a container and bootstrap the manager in it
    Bootstrap {
        /// Inputs files passed to the deployment CLI
        #[arg(short, long)]
        inputs: Vec<String>,

        /// Write the started container's id and ip as YAML to this path
        #[arg(long)]
        details_path: Option<PathBuf>,

        /// Labels applied to the container
        #[arg(short, long)]
        label: Vec<String>,

        /// Image tag to start from instead of the configured clean tag
        #[arg(short, long)]
        tag: Option<String>,

        /// Bootstrap into an already running container
        #[arg(short, long)]
        container_id: Option<String>,

        /// Extra whitespace-separated arguments appended to the bootstrap call
        #[arg(long)]
        cfy_args: Option<String>,
    },

    /// Start a container from the manager image
    Run {
        /// Bind-mount configured source packages into the container
        #[arg(short, long)]
        mount: bool,

        /// Write the started container's id and ip as YAML to this path
        #[arg(long)]
        details_path: Option<PathBuf>,

        /// Labels applied to the container
        #[arg(short, long)]
        label: Vec<String>,

        /// Image tag to start from instead of the configured manager tag
        #[arg(short, long)]
        tag: Option<String>,
    },

    /// Remove containers started from the configured images
    Clean {
        /// Only remove containers carrying these labels
        #[arg(short, long)]
        label: Vec<String>,
    },

    /// Commit a container to the manager image and remove it
    SaveImage {
        #[arg(short, long)]
        container_id: Option<String>,

        /// Tag to commit to instead of the configured manager tag
        #[arg(short, long)]
        tag: Option<String>,

        /// Also export the committed image as a gzipped tarball
        #[arg(short, long)]
        output_file: Option<PathBuf>,
    },

    /// Remove an image by tag
    RemoveImage {
        #[arg(short, long)]
        tag: String,
    },

    /// Immediately restart the whole container
    RestartContainer {
        #[arg(short, long)]
        container_id: Option<String>,
    },

    /// Restart every configured service in the container
    RestartServices {
        #[arg(short, long)]
        container_id: Option<String>,
    },

    /// Rebuild the in-container agent package
    BuildAgent {
        #[arg(short, long)]
        container_id: Option<String>,
    },

    /// Interactive SSH into the container as root
    Ssh {
        #[arg(short, long)]
        container_id: Option<String>,
    },

    /// Run a command inside the container
    Exec {
        #[arg(short, long)]
        container_id: Option<String>,

        /// Command and arguments to run
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Copy between host and container; prefix the container side with ':'
    Cp {
        source: String,
        target: String,

        #[arg(short, long)]
        container_id: Option<String>,
    },

    /// Watch the source tree and restart affected services
    Watch {
        #[arg(short, long)]
        container_id: Option<String>,

        /// Also rebuild the agent package when its pseudo-service is pending
        #[arg(long)]
        rebuild_agent: bool,

        /// Seconds between restart batches (overrides the configured value)
        #[arg(short, long)]
        interval: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            manager_blueprint_path,
            docker_host,
            ssh_key_path,
            source_root,
            clean_image_tag,
            manager_image_tag,
            workdir,
            reset,
        } => cmd_init(
            manager_blueprint_path,
            docker_host,
            ssh_key_path,
            source_root,
            clean_image_tag,
            manager_image_tag,
            workdir,
            reset,
        ),
        Commands::Prepare {
            inputs_output,
            build_context,
            details_path,
            label,
            tag,
        } => cmd_prepare(
            &inputs_output,
            build_context.as_deref(),
            details_path.as_deref(),
            &label,
            tag.as_deref(),
        ),
        Commands::Bootstrap {
            inputs,
            details_path,
            label,
            tag,
            container_id,
            cfy_args,
        } => cmd_bootstrap(
            inputs,
            details_path.as_deref(),
            &label,
            tag.as_deref(),
            container_id,
            cfy_args,
        ),
        Commands::Run {
            mount,
            details_path,
            label,
            tag,
        } => cmd_run(mount, details_path.as_deref(), &label, tag.as_deref()),
        Commands::Clean { label } => cmd_clean(&label),
        Commands::SaveImage {
            container_id,
            tag,
            output_file,
        } => cmd_save_image(container_id, tag.as_deref(), output_file.as_deref()),
        Commands::RemoveImage { tag } => cmd_remove_image(&tag),
        Commands::RestartContainer { container_id } => cmd_restart_container(container_id),
        Commands::RestartServices { container_id } => cmd_restart_services(container_id),
        Commands::BuildAgent { container_id } => cmd_build_agent(container_id),
        Commands::Ssh { container_id } => cmd_ssh(container_id),
        Commands::Exec {
            container_id,
            command,
        } => cmd_exec(container_id, &command),
        Commands::Cp {
            source,
            target,
            container_id,
        } => cmd_cp(&source, &target, container_id),
        Commands::Watch {
            container_id,
            rebuild_agent,
            interval,
        } => cmd_watch(container_id, rebuild_agent, interval, cli.json),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_init(
    manager_blueprint_path: PathBuf,
    docker_host: String,
    ssh_key_path: PathBuf,
    source_root: PathBuf,
    clean_image_tag: Option<String>,
    manager_image_tag: Option<String>,
    workdir: Option<PathBuf>,
    reset: bool,
) -> Result<()> {
    let ssh_key_path = config::expand_home(&ssh_key_path);
    let manager_blueprint_path = config::expand_home(&manager_blueprint_path);

    if !ssh_key_path.is_file() {
        return Err(DockhandError::MissingFile {
            path: ssh_key_path,
            hint: "create a key first (see man ssh-keygen)".to_string(),
        }
        .into());
    }
    if !manager_blueprint_path.is_file() {
        return Err(DockhandError::MissingFile {
            path: manager_blueprint_path,
            hint: "pass a path to a manager blueprint".to_string(),
        }
        .into());
    }

    let mut config = Config {
        docker_host,
        ssh_key_path,
        manager_blueprint_path,
        source_root,
        ..Config::default()
    };
    if let Some(tag) = clean_image_tag {
        config.clean_image_tag = tag;
    }
    if let Some(tag) = manager_image_tag {
        config.manager_image_tag = tag;
    }
    if let Some(dir) = workdir {
        config.workdir = dir;
    }

    let path = config.save(reset)?;
    Workdir::new(config.workdir()).init()?;
    println!(
        "Configuration saved to {}. Feel free to change it to your liking.",
        path.display()
    );
    Ok(())
}

fn cmd_prepare(
    inputs_output: &std::path::Path,
    build_context: Option<&std::path::Path>,
    details_path: Option<&std::path::Path>,
    labels: &[String],
    tag: Option<&str>,
) -> Result<()> {
    let config = Config::load()?;
    let docker = DockerCli::new(config.docker_host.clone());

    if let Some(context) = build_context {
        println!("🔨 Building base image {}", config.clean_image_tag);
        docker.build(&config.clean_image_tag, context)?;
    } else {
        println!(
            "No build context given, starting from existing image {}",
            config.clean_image_tag
        );
    }

    let image_tag = tag.unwrap_or(&config.clean_image_tag);
    let (container_id, container_ip) =
        start_container(&config, &docker, image_tag, Vec::new(), labels, details_path)?;
    println!("Container {} started on ip {}", container_id, container_ip);

    // dbus must be up before systemd units can be managed over exec
    docker.exec_quiet(&container_id, &to_args(&["systemctl", "start", "dbus"]))?;

    println!("Applying SSH configuration to manager container");
    ssh::apply_container_ssh(&docker, &container_id, &container_ip, &config.ssh_key_path())?;

    deploy::BootstrapInputs::for_container(&container_ip, &config.ssh_key_path())
        .write(inputs_output)?;
    println!("Bootstrap inputs written to {}", inputs_output.display());
    Ok(())
}

fn cmd_bootstrap(
    mut inputs: Vec<String>,
    details_path: Option<&std::path::Path>,
    labels: &[String],
    tag: Option<&str>,
    container_id: Option<String>,
    cfy_args: Option<String>,
) -> Result<()> {
    let config = Config::load()?;

    // Keep the temp inputs file alive until bootstrap finishes
    let mut _prepared_inputs = None;
    if container_id.is_none() {
        let file = tempfile::NamedTempFile::new()?;
        cmd_prepare(file.path(), None, details_path, labels, tag)?;
        inputs.insert(0, file.path().display().to_string());
        _prepared_inputs = Some(file);
    }

    let extra_args: Vec<String> = cfy_args
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    deploy::init_profile()?;
    deploy::bootstrap(&config.manager_blueprint_path, &inputs, &extra_args)?;
    Ok(())
}

fn cmd_run(
    mount: bool,
    details_path: Option<&std::path::Path>,
    labels: &[String],
    tag: Option<&str>,
) -> Result<()> {
    let config = Config::load()?;
    let docker = DockerCli::new(config.docker_host.clone());

    let volumes = if mount {
        build_volumes(&config)
    } else {
        Vec::new()
    };

    let image_tag = tag.unwrap_or(&config.manager_image_tag);
    let (container_id, container_ip) =
        start_container(&config, &docker, image_tag, volumes, labels, details_path)?;
    println!("Container {} started on ip {}", container_id, container_ip);

    println!("Applying SSH configuration to manager container");
    ssh::apply_container_ssh(&docker, &container_id, &container_ip, &config.ssh_key_path())?;

    deploy::use_manager(&container_ip)?;
    Ok(())
}

fn cmd_clean(labels: &[String]) -> Result<()> {
    let config = Config::load()?;
    let docker = DockerCli::new(config.docker_host.clone());

    let mut filters = vec![
        format!("ancestor={}", config.clean_image_tag),
        format!("ancestor={}", config.manager_image_tag),
    ];
    filters.extend(labels.iter().map(|l| format!("label={}", l)));

    let containers = docker.ps_ids(&filters)?;
    if containers.is_empty() {
        println!("Nothing to remove");
        return Ok(());
    }
    println!("Removing {} container(s)", containers.len());
    for container in containers {
        docker.rm_force(&container)?;
    }
    Ok(())
}

fn cmd_save_image(
    container_id: Option<String>,
    tag: Option<&str>,
    output_file: Option<&std::path::Path>,
) -> Result<()> {
    let config = Config::load()?;
    let docker = DockerCli::new(config.docker_host.clone());
    let workdir = Workdir::new(config.workdir());
    let container_id = resolve_container_id(&workdir, container_id)?;
    let tag = tag.unwrap_or(&config.manager_image_tag);

    println!("Saving manager container to image {}", tag);
    docker.stop(&container_id)?;
    docker.commit(&container_id, tag)?;
    println!("Removing container. Run 'dockhand run' to start it again");
    docker.rm_force(&container_id)?;

    if let Some(output_file) = output_file {
        println!(
            "Exporting image to {}. This may take a while",
            output_file.display()
        );
        docker.save_image_to(tag, output_file)?;
    }
    Ok(())
}

fn cmd_remove_image(tag: &str) -> Result<()> {
    let config = Config::load()?;
    let docker = DockerCli::new(config.docker_host.clone());
    println!("Removing image {}", tag);
    docker.rmi(tag)?;
    Ok(())
}

fn cmd_restart_container(container_id: Option<String>) -> Result<()> {
    let config = Config::load()?;
    let docker = DockerCli::new(config.docker_host.clone());
    let workdir = Workdir::new(config.workdir());
    let container_id = resolve_container_id(&workdir, container_id)?;
    docker.restart(&container_id)?;
    Ok(())
}

fn cmd_restart_services(container_id: Option<String>) -> Result<()> {
    let config = Config::load()?;
    let docker = DockerCli::new(config.docker_host.clone());
    let workdir = Workdir::new(config.workdir());
    let container_id = resolve_container_id(&workdir, container_id)?;

    for service in &config.services {
        println!("Restarting {}", service);
        docker.restart_service(&container_id, service)?;
    }
    Ok(())
}

fn cmd_build_agent(container_id: Option<String>) -> Result<()> {
    let config = Config::load()?;
    let docker = DockerCli::new(config.docker_host.clone());
    let workdir = Workdir::new(config.workdir());
    let container_id = resolve_container_id(&workdir, container_id)?;

    println!("Rebuilding agent package");
    docker.build_agent_package(
        &container_id,
        &config.watch.agent_package_path,
        &config.watch.agent_template_dir,
    )?;
    Ok(())
}

fn cmd_ssh(container_id: Option<String>) -> Result<()> {
    let config = Config::load()?;
    let docker = DockerCli::new(config.docker_host.clone());
    let workdir = Workdir::new(config.workdir());

    let container_ip = match container_id {
        Some(id) => docker.inspect_ip(&id)?,
        None => workdir.last_container_ip()?,
    };
    ssh::interactive_ssh(&container_ip, &config.ssh_key_path())?;
    Ok(())
}

fn cmd_exec(container_id: Option<String>, command: &[String]) -> Result<()> {
    let config = Config::load()?;
    let docker = DockerCli::new(config.docker_host.clone());
    let workdir = Workdir::new(config.workdir());
    let container_id = resolve_container_id(&workdir, container_id)?;
    docker.exec(&container_id, command)?;
    Ok(())
}

fn cmd_cp(source: &str, target: &str, container_id: Option<String>) -> Result<()> {
    let config = Config::load()?;
    let docker = DockerCli::new(config.docker_host.clone());
    let workdir = Workdir::new(config.workdir());
    let container_id = resolve_container_id(&workdir, container_id)?;

    let (source, target) = resolve_cp_spec(source, target, &container_id)?;
    docker.cp(&source, &target)?;
    Ok(())
}

fn cmd_watch(
    container_id: Option<String>,
    rebuild_agent: bool,
    interval: Option<u64>,
    json: bool,
) -> Result<()> {
    use dockhand::watcher::{
        DockerRestarter, ServiceMap, WatchEvent, WatchOptions, WatchSession,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    let config = Config::load()?;
    let docker = DockerCli::new(config.docker_host.clone());
    let workdir = Workdir::new(config.workdir());
    let container_id = resolve_container_id(&workdir, container_id)?;

    let map = ServiceMap::from_config(&config);
    let options = WatchOptions {
        interval: Duration::from_secs(interval.unwrap_or(config.watch.interval_secs)),
        rebuild_agent,
        agent_service: config.watch.agent_service.clone(),
    };
    let executor = DockerRestarter::new(
        docker,
        container_id,
        config.watch.agent_package_path.clone(),
        config.watch.agent_template_dir.clone(),
    );
    let session = WatchSession::new(map, options, executor);

    // Graceful Ctrl+C shutdown: flip the flag, let the loop wind down
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");

    session.run(running, |event| {
        if json {
            println!("{}", event.to_json());
        } else {
            match event {
                WatchEvent::WatchStarted {
                    packages,
                    interval_secs,
                } => {
                    println!(
                        "👀 Filesystem watch started: {} package(s), batch interval {}s",
                        packages, interval_secs
                    );
                    if rebuild_agent {
                        println!(
                            "Relevant services will be restarted and the agent \
                             package rebuilt on code changes."
                        );
                    } else {
                        println!(
                            "Relevant services will be restarted on code changes. \
                             Use --rebuild-agent to also rebuild the agent package."
                        );
                    }
                    println!("Press Ctrl+C to stop\n");
                }
                WatchEvent::PackageSkipped {
                    package,
                    path,
                    message,
                } => {
                    eprintln!("⚠ Skipping {} ({}): {}", package, path, message);
                }
                WatchEvent::ChangeDetected { package } => {
                    println!("📝 Change in {}", package);
                }
                WatchEvent::ServiceRestarted { service } => {
                    println!("🔄 Restarted {}", service);
                }
                WatchEvent::RestartFailed { service, message } => {
                    eprintln!("✗ Failed to restart {}: {}", service, message);
                }
                WatchEvent::AgentRebuilt => {
                    println!("🔧 Agent package rebuilt");
                }
                WatchEvent::AgentRebuildFailed { message } => {
                    eprintln!("✗ Failed to rebuild agent package: {}", message);
                }
                WatchEvent::BatchComplete { .. } => {}
                WatchEvent::Shutdown => {
                    println!("\n👋 Shutting down...");
                }
            }
        }
    })?;

    Ok(())
}

/// Start a container and record it as the session default
fn start_container(
    config: &Config,
    docker: &DockerCli,
    image_tag: &str,
    volumes: Vec<String>,
    labels: &[String],
    details_path: Option<&std::path::Path>,
) -> DockhandResult<(String, String)> {
    let spec = RunSpec {
        image_tag: image_tag.to_string(),
        hostname: config.container.hostname.clone(),
        expose: config.container.expose.clone(),
        publish: config.container.publish.clone(),
        volumes,
        labels: labels.to_vec(),
    };
    let container_id = docker.run_detached(&spec)?;
    let container_ip = docker.inspect_ip(&container_id)?;

    let workdir = Workdir::new(config.workdir());
    workdir.save_last_container(&container_id, &container_ip)?;

    if let Some(path) = details_path {
        ContainerDetails {
            id: container_id.clone(),
            ip: container_ip.clone(),
        }
        .write(path)?;
    }
    Ok((container_id, container_ip))
}

/// Read-only bind mounts placing each configured package inside its
/// in-container environment. Keyed by destination so a package shared by
/// several environments is mounted once per destination.
fn build_volumes(config: &Config) -> Vec<String> {
    let source_root = config.source_root();
    let mut volumes: BTreeMap<String, String> = BTreeMap::new();
    for (env, packages) in &config.env_packages {
        for package in packages {
            let Some(dir) = config.package_dir.get(package) else {
                continue;
            };
            let src = source_root.join(dir);
            let dst = format!("/opt/{}/env/lib/{}", env, package);
            volumes.insert(dst.clone(), format!("{}:{}:ro", src.display(), dst));
        }
    }
    volumes.into_values().collect()
}

fn resolve_container_id(workdir: &Workdir, container_id: Option<String>) -> DockhandResult<String> {
    match container_id {
        Some(id) => Ok(id),
        None => workdir.last_container_id(),
    }
}

fn to_args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}
