//! Handle for one container owned by the sandbox.

use crate::config::types::{Result, VetboxError};
use crate::runtime::{ContainerRuntime, ContainerSpec, ContainerState, ExecOutput};
use log::{debug, info, warn};
use std::sync::Arc;

/// A container created and exclusively owned by the sandbox.
///
/// The handle tracks the runtime-assigned id; `stop` and `remove` are
/// idempotent so the teardown path can retry them on any exit path.
pub struct Container {
    runtime: Arc<dyn ContainerRuntime>,
    id: Option<String>,
    name: String,
    image: String,
    host: String,
    /// Logs captured just before removal, for clauses that run after
    /// the container is gone.
    final_logs: Option<String>,
    final_exit_code: Option<i32>,
}

impl Container {
    /// Create the container in the runtime. The id is recorded before
    /// this returns, so a created container can always be removed.
    pub fn create(runtime: Arc<dyn ContainerRuntime>, spec: ContainerSpec) -> Result<Self> {
        let host = runtime.host().to_string();
        let id = runtime.create_container(&spec)?;
        debug!("created container {} ({})", spec.name, id);
        Ok(Self {
            runtime,
            id: Some(id),
            name: spec.name,
            image: spec.image,
            host,
            final_logs: None,
            final_exit_code: None,
        })
    }

    pub fn start(&self) -> Result<()> {
        let id = self.require_id()?;
        self.runtime.start_container(id)?;
        info!("Starting container: {}", self.name);
        Ok(())
    }

    /// Send the runtime's stop signal. Silent no-op once removed.
    pub fn stop(&self) {
        if let Some(id) = &self.id {
            info!("Stopping {}", self.name);
            if let Err(e) = self.runtime.stop_container(id) {
                warn!("failed to stop {}: {}", self.name, e);
            }
        }
    }

    /// Remove the container from the runtime. Best-effort and
    /// idempotent; the id is cleared regardless so a retry never
    /// touches a recycled id.
    pub fn remove(&mut self) {
        if let Some(id) = self.id.take() {
            info!("Removing {}", self.name);
            if let Err(e) = self.runtime.remove_container(&id) {
                warn!("failed to remove {}: {}", self.name, e);
            }
        }
    }

    /// Whether the runtime reports the container as running.
    pub fn running(&self) -> bool {
        match &self.id {
            Some(id) => self
                .runtime
                .inspect(id)
                .map(|info| info.running())
                .unwrap_or(false),
            None => false,
        }
    }

    /// Exit code, once the container has exited.
    pub fn exit_code(&self) -> Option<i32> {
        let id = self.id.as_ref()?;
        let info = self.runtime.inspect(id).ok()?;
        if info.state == ContainerState::Exited {
            info.exit_code
        } else {
            None
        }
    }

    /// Execute a command inside the running container.
    pub fn exec(&self, cmd: &[&str]) -> Result<ExecOutput> {
        let id = self.require_id()?;
        self.runtime.exec(id, cmd)
    }

    /// Capture the container's logs and exit code so they survive
    /// removal.
    pub fn capture_logs(&mut self) {
        if let Some(id) = &self.id {
            match self.runtime.logs(id) {
                Ok(logs) => self.final_logs = Some(logs),
                Err(e) => warn!("failed to collect logs for {}: {}", self.name, e),
            }
            if let Ok(info) = self.runtime.inspect(id) {
                if info.state == ContainerState::Exited {
                    self.final_exit_code = info.exit_code;
                }
            }
        }
    }

    /// Logs captured by [`Container::capture_logs`], if any.
    pub fn captured_logs(&self) -> Option<&str> {
        self.final_logs.as_deref()
    }

    /// Exit code captured by [`Container::capture_logs`], if the
    /// container had exited by then.
    pub fn captured_exit_code(&self) -> Option<i32> {
        self.final_exit_code
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Hostname the container's published ports are reachable on.
    pub fn host(&self) -> &str {
        &self.host
    }

    fn require_id(&self) -> Result<&str> {
        self.id
            .as_deref()
            .ok_or_else(|| VetboxError::Runtime(format!("container {} was removed", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: "test:latest".to_string(),
            ..ContainerSpec::default()
        }
    }

    #[test]
    fn test_create_start_stop_remove_round_trip() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut container = Container::create(runtime.clone(), spec("c1")).unwrap();
        assert!(container.id().is_some());
        assert!(!container.running());

        container.start().unwrap();
        assert!(container.running());

        container.stop();
        assert!(!container.running());
        container.remove();
        assert!(container.id().is_none());
        assert!(runtime.all_removed());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut container = Container::create(runtime.clone(), spec("c1")).unwrap();
        container.remove();
        container.remove();
        assert_eq!(runtime.op_count("remove"), 1);
    }

    #[test]
    fn test_exec_after_remove_is_an_error() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut container = Container::create(runtime, spec("c1")).unwrap();
        container.remove();
        assert!(container.exec(&["/bin/hostname"]).is_err());
    }

    #[test]
    fn test_captured_logs_survive_removal() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_logs("app log line");
        let mut container = Container::create(runtime, spec("c1")).unwrap();
        container.start().unwrap();
        container.capture_logs();
        container.remove();
        assert_eq!(container.captured_logs(), Some("app log line"));
    }
}
