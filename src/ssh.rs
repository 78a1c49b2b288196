//! SSH setup for managed containers
//!
//! Injects the configured public key into a running container and keeps the
//! local known_hosts entry for the container IP fresh, so `dockhand ssh` and
//! the deployment CLI connect without prompts.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::docker::DockerCli;
use crate::error::{DockhandError, DockhandResult};

/// How long to keep scanning for the container's host key before giving up
const KEYSCAN_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause between scan attempts while sshd comes up
const KEYSCAN_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Inject the public half of `ssh_key_path` as root's authorized key
pub fn apply_container_ssh(
    docker: &DockerCli,
    container_id: &str,
    container_ip: &str,
    ssh_key_path: &Path,
) -> DockhandResult<()> {
    // known_hosts upkeep is best effort - a missing ssh toolchain or an
    // unreachable IP should not fail container setup
    if let Err(err) = refresh_known_hosts(container_ip) {
        eprintln!("warning: could not refresh known_hosts: {}", err);
    }

    docker.exec_quiet(
        container_id,
        &[
            "mkdir".to_string(),
            "-p".to_string(),
            "/root/.ssh".to_string(),
        ],
    )?;

    let public_key = derive_public_key(ssh_key_path)?;
    let mut key_file = tempfile::NamedTempFile::new()?;
    key_file.write_all(public_key.as_bytes())?;
    key_file.write_all(b"\n")?;
    key_file.flush()?;

    docker.cp(
        &key_file.path().display().to_string(),
        &format!("{}:/root/.ssh/authorized_keys", container_id),
    )?;
    Ok(())
}

/// Interactive SSH into the container as root
pub fn interactive_ssh(container_ip: &str, ssh_key_path: &Path) -> DockhandResult<()> {
    let status = Command::new("ssh")
        .arg("-i")
        .arg(ssh_key_path)
        .arg(format!("root@{}", container_ip))
        .status()?;
    if !status.success() {
        return Err(DockhandError::CommandFailed {
            command: format!("ssh root@{}", container_ip),
            status: status.to_string(),
        });
    }
    Ok(())
}

/// `ssh-keygen -y` on the private key
fn derive_public_key(ssh_key_path: &Path) -> DockhandResult<String> {
    run_tool(
        "ssh-keygen",
        &["-y".to_string(), "-f".to_string(), ssh_key_path.display().to_string()],
    )
}

/// Drop any stale known_hosts entry for the IP and append the current one
fn refresh_known_hosts(container_ip: &str) -> DockhandResult<()> {
    // Stale entry removal - the file may not exist yet, failure is fine
    let _ = run_tool("ssh-keygen", &["-R".to_string(), container_ip.to_string()]);

    let deadline = Instant::now() + KEYSCAN_TIMEOUT;
    let Some(fingerprint) = scan_until(
        || {
            run_tool("ssh-keyscan", &[container_ip.to_string()])
                .ok()
                .and_then(|out| {
                    out.lines()
                        .find(|l| !l.trim().is_empty())
                        .map(|l| l.trim().to_string())
                })
        },
        deadline,
        KEYSCAN_RETRY_DELAY,
    ) else {
        eprintln!(
            "warning: no host key scanned for {} within {:?}, leaving known_hosts alone",
            container_ip, KEYSCAN_TIMEOUT
        );
        return Ok(());
    };

    let known_hosts = crate::config::expand_home(Path::new("~/.ssh/known_hosts"));
    if known_hosts.exists() {
        let current = fs::read_to_string(&known_hosts)?;
        fs::write(&known_hosts, append_fingerprint(&current, &fingerprint))?;
    }
    Ok(())
}

/// Retry `scan` until it yields a value or the deadline passes.
///
/// Always runs at least one attempt, so a deadline already in the past still
/// gets a single shot.
fn scan_until<F>(mut scan: F, deadline: Instant, retry_delay: Duration) -> Option<String>
where
    F: FnMut() -> Option<String>,
{
    loop {
        if let Some(found) = scan() {
            return Some(found);
        }
        if Instant::now() >= deadline {
            return None;
        }
        // sshd inside the container may still be coming up
        thread::sleep(retry_delay);
    }
}

/// Append a fingerprint line, keeping the file newline-terminated
fn append_fingerprint(current: &str, fingerprint: &str) -> String {
    if current.is_empty() || current.ends_with('\n') {
        format!("{}{}\n", current, fingerprint)
    } else {
        format!("{}\n{}\n", current, fingerprint)
    }
}

fn run_tool(program: &str, args: &[String]) -> DockhandResult<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()?;
    if !output.status.success() {
        return Err(DockhandError::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            status: output.status.to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
