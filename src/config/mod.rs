//! Configuration and shared type definitions.

pub mod types;

pub use types::{
    ErrorLevel, LifecyclePoint, Result, SandboxConfig, VetboxError, APPLICATION_CONTAINER_PORT,
};
