//! Testing infrastructure
//!
//! A scripted in-memory container runtime standing in for docker, so
//! the sandbox and scheduler paths can be exercised hermetically.

use crate::config::types::{Result, VetboxError};
use crate::runtime::{ContainerRuntime, ContainerSpec, ContainerState, ExecOutput, InspectInfo};
use std::path::Path;
use std::sync::Mutex;

struct FakeContainer {
    id: String,
    name: String,
    env: Vec<(String, String)>,
    network_container: Option<String>,
    state: ContainerState,
    exit_code: Option<i32>,
}

#[derive(Default)]
struct Inner {
    containers: Vec<FakeContainer>,
    /// Operation journal: "<verb> <subject>", with run-unique name
    /// suffixes stripped so assertions stay stable.
    ops: Vec<String>,
    next_id: u32,
    probe_calls: u32,
    ready_after: Option<u32>,
    fail_builds: bool,
    exit_after_start: Option<String>,
    logs: String,
}

/// Scripted [`ContainerRuntime`] for tests. All scripting methods take
/// `&self`; state lives behind a mutex so the fake can be shared
/// through an `Arc` like the real runtime.
pub struct FakeRuntime {
    inner: Mutex<Inner>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Make the readiness probe succeed from its `n`-th call on. By
    /// default the probe never succeeds.
    pub fn set_ready_after(&self, n: u32) {
        self.lock().ready_after = Some(n);
    }

    /// Make every image build fail.
    pub fn fail_builds(&self) {
        self.lock().fail_builds = true;
    }

    /// Containers whose name starts with `prefix` exit immediately
    /// after being started.
    pub fn exit_container_after_start(&self, prefix: &str) {
        self.lock().exit_after_start = Some(prefix.to_string());
    }

    /// Canned log output returned for every container.
    pub fn set_logs(&self, logs: &str) {
        self.lock().logs = logs.to_string();
    }

    /// The operation journal, in call order.
    pub fn ops(&self) -> Vec<String> {
        self.lock().ops.clone()
    }

    /// Number of journal entries for one verb.
    pub fn op_count(&self, verb: &str) -> usize {
        self.lock()
            .ops
            .iter()
            .filter(|op| op.split_whitespace().next() == Some(verb))
            .count()
    }

    /// Whether every container ever created has been removed.
    pub fn all_removed(&self) -> bool {
        self.lock()
            .containers
            .iter()
            .all(|c| c.state == ContainerState::Removed)
    }

    /// Environment of the container whose name starts with `prefix`.
    pub fn env_of(&self, prefix: &str) -> Vec<(String, String)> {
        self.lock()
            .containers
            .iter()
            .find(|c| c.name.starts_with(prefix))
            .map(|c| c.env.clone())
            .unwrap_or_default()
    }

    /// Network-stack container id of the container whose name starts
    /// with `prefix`, if it joined one.
    pub fn network_of(&self, prefix: &str) -> Option<String> {
        self.lock()
            .containers
            .iter()
            .find(|c| c.name.starts_with(prefix))
            .and_then(|c| c.network_container.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// `vetbox-api.3fa9...` journals as `vetbox-api`.
fn short(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

impl Inner {
    fn container_mut(&mut self, id: &str) -> Result<&mut FakeContainer> {
        self.containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| VetboxError::Runtime(format!("no such container: {id}")))
    }
}

impl ContainerRuntime for FakeRuntime {
    fn build_image(&self, _context_dir: &Path, tag: &str, _nocache: bool) -> Result<String> {
        let mut inner = self.lock();
        if inner.fail_builds {
            return Err(VetboxError::Build(format!("build of {tag} failed")));
        }
        let op = format!("build {}", short(tag));
        inner.ops.push(op);
        Ok(tag.to_string())
    }

    fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = format!("fake-{}", inner.next_id);
        let op = format!("create {}", short(&spec.name));
        inner.ops.push(op);
        inner.containers.push(FakeContainer {
            id: id.clone(),
            name: spec.name.clone(),
            env: spec.env.clone(),
            network_container: spec.network_container.clone(),
            state: ContainerState::Created,
            exit_code: None,
        });
        Ok(id)
    }

    fn start_container(&self, id: &str) -> Result<()> {
        let mut inner = self.lock();
        let exit_prefix = inner.exit_after_start.clone();
        let container = inner.container_mut(id)?;
        let dies = exit_prefix
            .map(|p| container.name.starts_with(&p))
            .unwrap_or(false);
        if dies {
            container.state = ContainerState::Exited;
            container.exit_code = Some(1);
        } else {
            container.state = ContainerState::Running;
        }
        let op = format!("start {}", short(&container.name));
        inner.ops.push(op);
        Ok(())
    }

    fn stop_container(&self, id: &str) -> Result<()> {
        let mut inner = self.lock();
        let container = inner.container_mut(id)?;
        if container.state == ContainerState::Running
            || container.state == ContainerState::Created
        {
            container.state = ContainerState::Exited;
            container.exit_code = Some(0);
        }
        let op = format!("stop {}", short(&container.name));
        inner.ops.push(op);
        Ok(())
    }

    fn remove_container(&self, id: &str) -> Result<()> {
        let mut inner = self.lock();
        let container = inner.container_mut(id)?;
        container.state = ContainerState::Removed;
        let op = format!("remove {}", short(&container.name));
        inner.ops.push(op);
        Ok(())
    }

    fn inspect(&self, id: &str) -> Result<InspectInfo> {
        let mut inner = self.lock();
        let container = inner.container_mut(id)?;
        Ok(InspectInfo {
            state: container.state,
            exit_code: container.exit_code,
        })
    }

    fn exec(&self, id: &str, cmd: &[&str]) -> Result<ExecOutput> {
        let mut inner = self.lock();
        let container = inner.container_mut(id)?;
        let op = format!(
            "exec {} {}",
            short(&container.name),
            cmd.first().unwrap_or(&"")
        );
        inner.ops.push(op);
        Ok(ExecOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    fn logs(&self, id: &str) -> Result<String> {
        let mut inner = self.lock();
        inner.container_mut(id)?;
        Ok(inner.logs.clone())
    }

    fn probe(&self, _host: &str, _port: u16) -> bool {
        let mut inner = self.lock();
        inner.probe_calls += 1;
        match inner.ready_after {
            Some(n) => inner.probe_calls >= n,
            None => false,
        }
    }

    fn host(&self) -> &str {
        "localhost"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_strips_run_suffixes() {
        let fake = FakeRuntime::new();
        let id = fake
            .create_container(&ContainerSpec {
                name: "vetbox-api.3fa9".to_string(),
                image: "api:latest".to_string(),
                ..ContainerSpec::default()
            })
            .unwrap();
        fake.start_container(&id).unwrap();
        assert_eq!(fake.ops(), ["create vetbox-api", "start vetbox-api"]);
    }

    #[test]
    fn test_probe_readiness_script() {
        let fake = FakeRuntime::new();
        assert!(!fake.probe("localhost", 8080));
        fake.set_ready_after(3);
        assert!(!fake.probe("localhost", 8080));
        assert!(fake.probe("localhost", 8080));
    }

    #[test]
    fn test_stop_records_a_clean_exit() {
        let fake = FakeRuntime::new();
        let id = fake
            .create_container(&ContainerSpec {
                name: "c1".to_string(),
                image: "app:latest".to_string(),
                ..ContainerSpec::default()
            })
            .unwrap();
        fake.start_container(&id).unwrap();
        fake.stop_container(&id).unwrap();
        let info = fake.inspect(&id).unwrap();
        assert_eq!(info.state, ContainerState::Exited);
        assert_eq!(info.exit_code, Some(0));
    }
}
