//! A ContainerSandbox manages the application and API-emulation containers.
//!
//! This includes their creation, startup ordering, readiness polling,
//! and guaranteed destruction. The sandbox is the sole owner of both
//! containers for the run's duration: no other component starts, stops,
//! or removes them. `stop()` is idempotent and runs on every exit path;
//! `Drop` repeats the teardown as a last resort so an abandoned sandbox
//! never leaks containers.

use crate::config::types::{Result, SandboxConfig, VetboxError, APPLICATION_CONTAINER_PORT};
use crate::runtime::{ContainerRuntime, ContainerSpec};
use crate::sandbox::container::Container;
use crate::sandbox::{CancelFlag, SandboxState};
use log::{debug, info, warn};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Interval between readiness probes of the application port.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Placeholder configuration baked into the API image when the run was
/// invoked against a bare image reference.
const PLACEHOLDER_CONFIG: &str = "runtime: custom\napi_version: 1\n";

pub struct ContainerSandbox {
    runtime: Arc<dyn ContainerRuntime>,
    config: SandboxConfig,
    run_id: String,
    state: SandboxState,
    api_container: Option<Container>,
    app_container: Option<Container>,
    app_image: Option<String>,
    api_image: Option<String>,
    cancel: CancelFlag,
    poll_interval: Duration,
}

impl ContainerSandbox {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: SandboxConfig) -> Result<Self> {
        Self::with_cancel(runtime, config, CancelFlag::new())
    }

    pub fn with_cancel(
        runtime: Arc<dyn ContainerRuntime>,
        config: SandboxConfig,
        cancel: CancelFlag,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            runtime,
            config,
            run_id: uuid::Uuid::new_v4().simple().to_string(),
            state: SandboxState::Created,
            api_container: None,
            app_container: None,
            app_image: None,
            api_image: None,
            cancel,
            poll_interval: POLL_INTERVAL,
        })
    }

    /// Shorten the readiness poll interval. Intended for tests that
    /// exercise the timeout path without real-time sleeps.
    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// The application container, once `start` has created it.
    pub fn app_container(&self) -> Option<&Container> {
        self.app_container.as_ref()
    }

    /// The API-emulation container, once `start` has created it.
    pub fn api_container(&self) -> Option<&Container> {
        self.api_container.as_ref()
    }

    /// Hostname the application's published port is reachable on.
    pub fn application_host(&self) -> &str {
        self.runtime.host()
    }

    pub fn application_port(&self) -> u16 {
        self.config.application_port
    }

    /// Build or reuse the application image, and derive the API
    /// container image by overlaying the base image with the
    /// application's configuration artifacts.
    pub fn prepare(&mut self) -> Result<()> {
        let result = self.build_images();
        if result.is_err() {
            self.state = SandboxState::Failed;
        }
        result
    }

    fn build_images(&mut self) -> Result<()> {
        let app_image = match &self.config.image {
            Some(image) => image.clone(),
            None => {
                let app_dir = self.config.app_directory().ok_or_else(|| {
                    VetboxError::Build("cannot locate application directory".to_string())
                })?;
                let tag = format!("vetbox-app.{}", self.run_id);
                info!("Building application image {}", tag);
                self.runtime
                    .build_image(&app_dir, &tag, self.config.nocache)?
            }
        };

        let api_tag = format!("vetbox-api.{}", self.run_id);
        let context = self.write_api_build_context()?;
        info!("Building API image {}", api_tag);
        let built = self
            .runtime
            .build_image(&context, &api_tag, self.config.nocache);
        if let Err(e) = fs::remove_dir_all(&context) {
            debug!("could not remove build context {}: {}", context.display(), e);
        }
        built?;

        self.app_image = Some(app_image);
        self.api_image = Some(api_tag);
        Ok(())
    }

    /// Assemble a docker build context that layers the application's
    /// configuration file over the API base image. A placeholder
    /// configuration is synthesized for bare-image targets.
    fn write_api_build_context(&self) -> Result<PathBuf> {
        let context = std::env::temp_dir().join(format!("vetbox-build-{}", self.run_id));
        fs::create_dir_all(&context)?;

        let conf_name = match &self.config.config_file {
            Some(path) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "app.yaml".to_string());
                fs::copy(path, context.join(&name))?;
                name
            }
            None => {
                fs::write(context.join("app.yaml"), PLACEHOLDER_CONFIG)?;
                "app.yaml".to_string()
            }
        };

        let dockerfile = format!(
            "FROM {}\nADD {} /app/{}\n",
            self.config.api_base_image, conf_name, conf_name
        );
        fs::write(context.join("Dockerfile"), dockerfile)?;
        Ok(context)
    }

    /// Create and start the API container, then the application
    /// container on its network stack, and poll until the application
    /// is reachable.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SandboxState::Created {
            return Err(VetboxError::Runtime(format!(
                "sandbox cannot start from state {:?}",
                self.state
            )));
        }
        self.state = SandboxState::Starting;
        match self.create_and_run_containers() {
            Ok(()) => {
                self.state = SandboxState::Running;
                info!(
                    "Your application is live. Access it at: {}:{}",
                    self.application_host(),
                    self.config.application_port
                );
                Ok(())
            }
            Err(e) => {
                self.state = SandboxState::Failed;
                Err(e)
            }
        }
    }

    fn create_and_run_containers(&mut self) -> Result<()> {
        let api_image = self
            .api_image
            .clone()
            .ok_or_else(|| VetboxError::Runtime("sandbox was not prepared".to_string()))?;
        let app_image = self
            .app_image
            .clone()
            .ok_or_else(|| VetboxError::Runtime("sandbox was not prepared".to_string()))?;

        self.check_cancel()?;

        // The API container publishes the application's port: the app
        // container joins its network stack, so both share one port
        // namespace and either can serve the publication.
        let conf_name = self
            .config
            .config_file
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "app.yaml".to_string());
        let api_spec = ContainerSpec {
            name: format!("vetbox-api.{}", self.run_id),
            image: api_image,
            env: vec![
                ("APP_ID".to_string(), self.config.app_id.clone()),
                ("API_PORT".to_string(), self.config.api_port.to_string()),
                ("CONFIG_FILE".to_string(), format!("/app/{}", conf_name)),
            ],
            network_container: None,
            published_ports: vec![
                (self.config.application_port, APPLICATION_CONTAINER_PORT),
                (self.config.api_port, self.config.api_port),
            ],
        };
        // Held by the sandbox before start, so teardown covers a
        // half-started pair.
        let api = self
            .api_container
            .insert(Container::create(self.runtime.clone(), api_spec)?);
        api.start()?;

        self.check_cancel()?;

        let api_id = self
            .api_container
            .as_ref()
            .and_then(|c| c.id())
            .map(|s| s.to_string())
            .ok_or_else(|| VetboxError::Runtime("API container has no id".to_string()))?;

        // The application locates the emulated API through these
        // coordinates. The stack is shared, so the API host is the
        // loopback of the joined namespace.
        let app_spec = ContainerSpec {
            name: format!("vetbox-app.{}", self.run_id),
            image: app_image,
            env: vec![
                ("API_HOST".to_string(), "localhost".to_string()),
                ("API_PORT".to_string(), self.config.api_port.to_string()),
                ("APP_ID".to_string(), self.config.app_id.clone()),
            ],
            network_container: Some(api_id),
            published_ports: Vec::new(),
        };
        let app = self
            .app_container
            .insert(Container::create(self.runtime.clone(), app_spec)?);
        app.start()?;

        self.wait_for_start()
    }

    /// Poll the application's published port until it accepts
    /// connections, the timeout elapses, or the run is canceled.
    fn wait_for_start(&mut self) -> Result<()> {
        info!(
            "Waiting for application to listen on port {}",
            APPLICATION_CONTAINER_PORT
        );
        let host = self.application_host().to_string();
        for _attempt in 0..self.config.timeout_secs {
            self.check_cancel()?;

            // A dead API container will never serve the publication;
            // fail early and surface its logs.
            if let Some(api) = &mut self.api_container {
                if !api.running() {
                    api.capture_logs();
                    if let Some(logs) = api.captured_logs() {
                        debug!("API container logs:\n{}", logs);
                    }
                    return Err(VetboxError::Runtime(
                        "API container stopped prematurely".to_string(),
                    ));
                }
            }

            if self.runtime.probe(&host, self.config.application_port) {
                return Ok(());
            }
            std::thread::sleep(self.poll_interval);
        }
        Err(VetboxError::StartTimeout(self.config.timeout_secs))
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_canceled() {
            Err(VetboxError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Tear the sandbox down: stop the application container, then the
    /// API container, capture their logs, and unconditionally attempt
    /// removal of both. Removal errors are logged, never propagated.
    /// Safe to call from any state, any number of times.
    pub fn stop(&mut self) {
        if self.state == SandboxState::Stopped {
            return;
        }
        if self.state != SandboxState::Failed {
            self.state = SandboxState::Stopping;
        }
        self.teardown_containers();
        if self.state != SandboxState::Failed {
            self.state = SandboxState::Stopped;
        }
    }

    fn teardown_containers(&mut self) {
        for container in [&mut self.app_container, &mut self.api_container]
            .into_iter()
            .flatten()
        {
            if container.id().is_some() {
                container.stop();
                container.capture_logs();
                container.remove();
            }
        }
    }

    fn has_live_containers(&self) -> bool {
        self.app_container
            .as_ref()
            .map(|c| c.id().is_some())
            .unwrap_or(false)
            || self
                .api_container
                .as_ref()
                .map(|c| c.id().is_some())
                .unwrap_or(false)
    }
}

impl Drop for ContainerSandbox {
    fn drop(&mut self) {
        if self.has_live_containers() {
            warn!("sandbox dropped with live containers; tearing down");
            self.teardown_containers();
            if self.state != SandboxState::Failed {
                self.state = SandboxState::Stopped;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;

    fn image_config() -> SandboxConfig {
        SandboxConfig {
            image: Some("myapp:latest".to_string()),
            timeout_secs: 5,
            ..SandboxConfig::default()
        }
    }

    fn fast_sandbox(runtime: Arc<FakeRuntime>, config: SandboxConfig) -> ContainerSandbox {
        let mut sandbox = ContainerSandbox::new(runtime, config).unwrap();
        sandbox.set_poll_interval(Duration::from_millis(1));
        sandbox
    }

    #[test]
    fn test_prepare_and_start_reaches_running() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_ready_after(1);
        let mut sandbox = fast_sandbox(runtime.clone(), image_config());

        sandbox.prepare().unwrap();
        sandbox.start().unwrap();
        assert_eq!(sandbox.state(), SandboxState::Running);
        // API container created and started before the app container.
        let ops = runtime.ops();
        let api_create = ops.iter().position(|o| o == "create vetbox-api").unwrap();
        let app_create = ops.iter().position(|o| o == "create vetbox-app").unwrap();
        assert!(api_create < app_create);

        sandbox.stop();
        assert_eq!(sandbox.state(), SandboxState::Stopped);
        assert!(runtime.all_removed());
    }

    #[test]
    fn test_app_env_carries_api_coordinates() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_ready_after(1);
        let mut sandbox = fast_sandbox(runtime.clone(), image_config());
        sandbox.prepare().unwrap();
        sandbox.start().unwrap();

        let app_env = runtime.env_of("vetbox-app");
        assert!(app_env.contains(&("API_HOST".to_string(), "localhost".to_string())));
        assert!(app_env.contains(&("API_PORT".to_string(), "10000".to_string())));
        assert!(runtime.network_of("vetbox-app").is_some());
        sandbox.stop();
    }

    #[test]
    fn test_start_timeout_removes_both_containers() {
        let runtime = Arc::new(FakeRuntime::new());
        // Never becomes ready.
        let mut sandbox = fast_sandbox(runtime.clone(), image_config());
        sandbox.prepare().unwrap();

        match sandbox.start() {
            Err(VetboxError::StartTimeout(5)) => {}
            other => panic!("expected StartTimeout, got {:?}", other.err()),
        }
        assert_eq!(sandbox.state(), SandboxState::Failed);

        sandbox.stop();
        assert!(runtime.all_removed());
        assert_eq!(sandbox.state(), SandboxState::Failed);
    }

    #[test]
    fn test_build_failure_is_fatal_and_leaves_nothing() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.fail_builds();
        let mut sandbox = fast_sandbox(runtime.clone(), image_config());

        match sandbox.prepare() {
            Err(VetboxError::Build(_)) => {}
            other => panic!("expected Build error, got {:?}", other.err()),
        }
        assert_eq!(sandbox.state(), SandboxState::Failed);
        sandbox.stop();
        assert!(runtime.all_removed());
    }

    #[test]
    fn test_premature_api_exit_aborts_start() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.exit_container_after_start("vetbox-api");
        let mut sandbox = fast_sandbox(runtime.clone(), image_config());
        sandbox.prepare().unwrap();

        match sandbox.start() {
            Err(VetboxError::Runtime(msg)) => assert!(msg.contains("prematurely")),
            other => panic!("expected Runtime error, got {:?}", other.err()),
        }
        sandbox.stop();
        assert!(runtime.all_removed());
    }

    #[test]
    fn test_cancellation_still_tears_down() {
        let runtime = Arc::new(FakeRuntime::new());
        let cancel = CancelFlag::new();
        let mut sandbox =
            ContainerSandbox::with_cancel(runtime.clone(), image_config(), cancel.clone())
                .unwrap();
        sandbox.set_poll_interval(Duration::from_millis(1));
        sandbox.prepare().unwrap();

        cancel.cancel();
        match sandbox.start() {
            Err(VetboxError::Canceled) => {}
            other => panic!("expected Canceled, got {:?}", other.err()),
        }
        sandbox.stop();
        assert!(runtime.all_removed());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_ready_after(1);
        let mut sandbox = fast_sandbox(runtime.clone(), image_config());
        sandbox.prepare().unwrap();
        sandbox.start().unwrap();

        sandbox.stop();
        let removes = runtime.op_count("remove");
        sandbox.stop();
        assert_eq!(runtime.op_count("remove"), removes);
    }

    #[test]
    fn test_drop_backstop_removes_containers() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_ready_after(1);
        {
            let mut sandbox = fast_sandbox(runtime.clone(), image_config());
            sandbox.prepare().unwrap();
            sandbox.start().unwrap();
            // Dropped without stop().
        }
        assert!(runtime.all_removed());
    }
}
