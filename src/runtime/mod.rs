//! Container runtime abstraction.
//!
//! The sandbox only needs a narrow capability surface from the runtime:
//! build images, create/start/stop/remove containers, inspect state,
//! execute commands, collect logs, and probe a published TCP port.
//! [`docker::DockerCli`] is the production implementation; tests run
//! against the scripted fake in [`crate::testing`].

pub mod docker;

use crate::config::types::Result;

/// Runtime-side view of a container's state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Exited,
    Removed,
}

/// Snapshot returned by [`ContainerRuntime::inspect`].
#[derive(Clone, Debug)]
pub struct InspectInfo {
    pub state: ContainerState,
    pub exit_code: Option<i32>,
}

impl InspectInfo {
    pub fn running(&self) -> bool {
        self.state == ContainerState::Running
    }
}

/// Everything needed to create one container.
#[derive(Clone, Debug, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<(String, String)>,
    /// `Some(id)` puts the container on another container's network
    /// stack (`container:<id>` mode); `None` gives it its own.
    pub network_container: Option<String>,
    /// (host_port, container_port) publications. Ignored when the
    /// container joins another network stack.
    pub published_ports: Vec<(u16, u16)>,
}

/// Output of a command executed inside a container.
#[derive(Clone, Debug)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Capability surface the sandbox requires from a container runtime.
///
/// Implementations must make `stop_container` and `remove_container`
/// tolerant of already-stopped and already-removed targets; the sandbox
/// teardown path retries them unconditionally.
pub trait ContainerRuntime: Send + Sync {
    /// Build an image from a directory containing a Dockerfile.
    /// Returns the tag the image was built under.
    fn build_image(&self, context_dir: &std::path::Path, tag: &str, nocache: bool)
        -> Result<String>;

    /// Create a container. Returns the runtime-assigned container id.
    fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    fn start_container(&self, id: &str) -> Result<()>;

    fn stop_container(&self, id: &str) -> Result<()>;

    fn remove_container(&self, id: &str) -> Result<()>;

    fn inspect(&self, id: &str) -> Result<InspectInfo>;

    /// Execute a command inside a running container.
    fn exec(&self, id: &str, cmd: &[&str]) -> Result<ExecOutput>;

    /// Collect the container's accumulated stdout/stderr.
    fn logs(&self, id: &str) -> Result<String>;

    /// Whether a TCP connection to `host:port` currently succeeds.
    /// Used by the readiness poll against the published application port.
    fn probe(&self, host: &str, port: u16) -> bool;

    /// Hostname the runtime publishes container ports on.
    fn host(&self) -> &str;
}
