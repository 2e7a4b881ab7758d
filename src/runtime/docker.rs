//! Docker implementation of the container runtime surface, shelling out
//! to the `docker` CLI.

use crate::config::types::{Result, VetboxError};
use crate::runtime::{ContainerRuntime, ContainerSpec, ContainerState, ExecOutput, InspectInfo};
use log::{debug, warn};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// Seconds docker waits before force-killing a container on stop.
const STOP_GRACE_SECS: u32 = 2;

/// Timeout for a single readiness probe connection attempt.
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Container runtime client backed by the `docker` command line tool.
pub struct DockerCli {
    host: String,
}

impl DockerCli {
    /// Connect to the local docker daemon and verify it is reachable.
    pub fn new() -> Result<Self> {
        let client = Self {
            host: docker_host(),
        };
        client.run(&["version", "--format", "{{.Server.Version}}"])?;
        Ok(client)
    }

    /// Run a docker subcommand, returning trimmed stdout.
    fn run(&self, args: &[&str]) -> Result<String> {
        debug!("docker {}", args.join(" "));
        let output = Command::new("docker")
            .args(args)
            .output()
            .map_err(|e| VetboxError::Runtime(format!("could not invoke docker: {}", e)))?;
        if !output.status.success() {
            return Err(VetboxError::Runtime(format!(
                "docker {} failed: {}",
                args.first().copied().unwrap_or(""),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Hostname container ports are published on. Honors a tcp:// DOCKER_HOST;
/// unix-socket daemons publish on localhost.
fn docker_host() -> String {
    if let Ok(value) = std::env::var("DOCKER_HOST") {
        if let Some(rest) = value.strip_prefix("tcp://") {
            if let Some(host) = rest.split(':').next() {
                if !host.is_empty() {
                    return host.to_string();
                }
            }
        }
    }
    "localhost".to_string()
}

impl ContainerRuntime for DockerCli {
    fn build_image(&self, context_dir: &Path, tag: &str, nocache: bool) -> Result<String> {
        let dir = context_dir.to_string_lossy().to_string();
        let mut args = vec!["build", "-t", tag];
        if nocache {
            args.push("--no-cache");
        }
        args.push(&dir);
        self.run(&args)
            .map_err(|e| VetboxError::Build(e.to_string()))?;
        Ok(tag.to_string())
    }

    fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut args: Vec<String> = vec!["create".into(), "--name".into(), spec.name.clone()];
        for (key, value) in &spec.env {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }
        if let Some(peer) = &spec.network_container {
            args.push("--network".into());
            args.push(format!("container:{}", peer));
        } else {
            for (host_port, container_port) in &spec.published_ports {
                args.push("-p".into());
                args.push(format!("{}:{}", host_port, container_port));
            }
        }
        args.push(spec.image.clone());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&arg_refs)
    }

    fn start_container(&self, id: &str) -> Result<()> {
        self.run(&["start", id]).map(|_| ())
    }

    fn stop_container(&self, id: &str) -> Result<()> {
        let grace = STOP_GRACE_SECS.to_string();
        self.run(&["stop", "-t", &grace, id]).map(|_| ())
    }

    fn remove_container(&self, id: &str) -> Result<()> {
        self.run(&["rm", "-f", id]).map(|_| ())
    }

    fn inspect(&self, id: &str) -> Result<InspectInfo> {
        let out = match self.run(&[
            "inspect",
            "-f",
            "{{.State.Status}} {{.State.ExitCode}}",
            id,
        ]) {
            Ok(out) => out,
            // Inspect on a removed container is not an error to callers.
            Err(_) => {
                return Ok(InspectInfo {
                    state: ContainerState::Removed,
                    exit_code: None,
                })
            }
        };
        let mut parts = out.split_whitespace();
        let status = parts.next().unwrap_or("");
        let exit_code = parts.next().and_then(|c| c.parse::<i32>().ok());
        let state = match status {
            "running" | "restarting" => ContainerState::Running,
            "created" => ContainerState::Created,
            _ => ContainerState::Exited,
        };
        Ok(InspectInfo {
            state,
            exit_code: if state == ContainerState::Exited {
                exit_code
            } else {
                None
            },
        })
    }

    fn exec(&self, id: &str, cmd: &[&str]) -> Result<ExecOutput> {
        let mut args = vec!["exec", id];
        args.extend_from_slice(cmd);
        debug!("docker {}", args.join(" "));
        let output = Command::new("docker")
            .args(&args)
            .output()
            .map_err(|e| VetboxError::Runtime(format!("could not invoke docker: {}", e)))?;
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn logs(&self, id: &str) -> Result<String> {
        self.run(&["logs", id])
    }

    fn probe(&self, host: &str, port: u16) -> bool {
        let target = format!("{}:{}", host, port);
        let addrs = match target.to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                warn!("could not resolve {}: {}", target, e);
                return false;
            }
        };
        for addr in addrs {
            if TcpStream::connect_timeout(&addr, PROBE_CONNECT_TIMEOUT).is_ok() {
                return true;
            }
        }
        false
    }

    fn host(&self) -> &str {
        &self.host
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docker_host_defaults_to_localhost() {
        // DOCKER_HOST is unset in the test environment.
        if std::env::var("DOCKER_HOST").is_err() {
            assert_eq!(docker_host(), "localhost");
        }
    }

    #[test]
    fn test_probe_refused_port_is_false() {
        let client = DockerCli {
            host: "localhost".to_string(),
        };
        // Port 1 is essentially never listening on a test host.
        assert!(!client.probe("localhost", 1));
    }
}
