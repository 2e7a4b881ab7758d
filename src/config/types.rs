/// Core types and structures for the vetbox system
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Points in the sandbox lifecycle at which clauses may be scheduled.
///
/// The ordering is the execution timeline: all clauses bound to an
/// earlier point resolve before the sandbox advances to the next one.
/// `Start` and `Stop` are singular points that admit at most one clause.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecyclePoint {
    #[serde(rename = "PRE_START")]
    PreStart,
    #[serde(rename = "START")]
    Start,
    #[serde(rename = "POST_START")]
    PostStart,
    #[serde(rename = "STOP")]
    Stop,
    #[serde(rename = "POST_STOP")]
    PostStop,
}

impl LifecyclePoint {
    /// The full timeline in execution order.
    pub const TIMELINE: [LifecyclePoint; 5] = [
        LifecyclePoint::PreStart,
        LifecyclePoint::Start,
        LifecyclePoint::PostStart,
        LifecyclePoint::Stop,
        LifecyclePoint::PostStop,
    ];

    /// Points that admit at most one clause.
    pub const SINGULAR: [LifecyclePoint; 2] = [LifecyclePoint::Start, LifecyclePoint::Stop];

    pub fn is_singular(self) -> bool {
        Self::SINGULAR.contains(&self)
    }

    pub fn name(self) -> &'static str {
        match self {
            LifecyclePoint::PreStart => "Pre Start",
            LifecyclePoint::Start => "Start",
            LifecyclePoint::PostStart => "Post Start",
            LifecyclePoint::Stop => "Stop",
            LifecyclePoint::PostStop => "Post Stop",
        }
    }
}

impl FromStr for LifecyclePoint {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "PRE_START" => Ok(LifecyclePoint::PreStart),
            "START" => Ok(LifecyclePoint::Start),
            "POST_START" => Ok(LifecyclePoint::PostStart),
            "STOP" => Ok(LifecyclePoint::Stop),
            "POST_STOP" => Ok(LifecyclePoint::PostStop),
            other => Err(format!("unknown lifecycle point: {}", other)),
        }
    }
}

impl std::fmt::Display for LifecyclePoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Severity of a clause failure.
///
/// FATAL: the container absolutely will not work in production
///     (not listening on its port, failing health checks).
/// WARNING: the container will possibly exhibit unexpected behavior
///     (malformed access logs, disabled health checking).
/// UNUSED: no real error; the container just isn't taking full
///     advantage of the runtime contract. Other clauses may still
///     depend on UNUSED clauses.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorLevel {
    #[serde(rename = "UNUSED")]
    Unused,
    #[serde(rename = "WARNING")]
    Warning,
    #[serde(rename = "FATAL")]
    Fatal,
}

impl ErrorLevel {
    pub fn name(self) -> &'static str {
        match self {
            ErrorLevel::Fatal => "FATAL",
            ErrorLevel::Warning => "WARNING",
            ErrorLevel::Unused => "UNUSED",
        }
    }
}

impl FromStr for ErrorLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "FATAL" => Ok(ErrorLevel::Fatal),
            "WARNING" => Ok(ErrorLevel::Warning),
            "UNUSED" => Ok(ErrorLevel::Unused),
            other => Err(format!("unknown error level: {}", other)),
        }
    }
}

impl std::fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Sandbox configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Path to the application's configuration file. At least one of
    /// `config_file` and `image` must be set. When `image` is not set,
    /// the directory containing the config file must also hold the
    /// Dockerfile used to build the application image.
    pub config_file: Option<PathBuf>,
    /// Pre-built application image to run instead of building one.
    pub image: Option<String>,
    /// Application id handed to the API container. Controls which
    /// backing store the emulated services use between runs.
    pub app_id: String,
    /// Host port mapped to the application's listening port.
    pub application_port: u16,
    /// Port inside the API container that the emulated API server
    /// binds to. Internal to the shared network stack.
    pub api_port: u16,
    /// Base image the API container image is layered on top of.
    pub api_base_image: String,
    /// Seconds to wait for the application to become reachable.
    pub timeout_secs: u64,
    /// Skip the image build cache.
    pub nocache: bool,
}

/// Port the application is expected to listen on inside its container.
pub const APPLICATION_CONTAINER_PORT: u16 = 8080;

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            config_file: None,
            image: None,
            app_id: format!("vetbox-{}", uuid::Uuid::new_v4().simple()),
            application_port: 8080,
            api_port: 10000,
            api_base_image: "vetbox/api-base".to_string(),
            timeout_secs: 30,
            nocache: false,
        }
    }
}

impl SandboxConfig {
    /// Fail fast on configurations that cannot produce a runnable sandbox.
    pub fn validate(&self) -> Result<()> {
        if self.config_file.is_none() && self.image.is_none() {
            return Err(VetboxError::Config(
                "at least one of config_file and image must be specified".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(VetboxError::Config(
                "readiness timeout cannot be zero".to_string(),
            ));
        }
        if let Some(path) = &self.config_file {
            if !path.is_file() {
                return Err(VetboxError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    /// Root directory of the application, derived from the config file
    /// location. Only meaningful for config-file targets.
    pub fn app_directory(&self) -> Option<PathBuf> {
        let conf = self.config_file.as_ref()?;
        conf.parent().map(|p| p.to_path_buf())
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Custom error types for vetbox
#[derive(Error, Debug)]
pub enum VetboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image build failed: {0}")]
    Build(String),

    #[error("application did not become reachable within {0} seconds")]
    StartTimeout(u64),

    #[error("contract graph error: {0}")]
    Graph(String),

    #[error("hook definition error: {0}")]
    HookDefinition(String),

    #[error("clause execution error: {0}")]
    ClauseExecution(String),

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("run canceled")]
    Canceled,
}

impl VetboxError {
    /// Whether this error aborts the run as a whole (as opposed to
    /// being absorbed into a single clause's result).
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            VetboxError::HookDefinition(_) | VetboxError::ClauseExecution(_)
        )
    }
}

/// Result type alias for vetbox operations
pub type Result<T> = std::result::Result<T, VetboxError>;
