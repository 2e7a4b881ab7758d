//! vetbox: local managed-VM emulation and runtime contract validation
//!
//! Runs an application container next to an API-emulation container on
//! a shared network stack, then verifies the application honors the
//! managed runtime contract.
//!
//! # Architecture
//!
//! ## Sandbox Orchestration ([`sandbox`])
//! - [`sandbox::ContainerSandbox`]: owns the container pair for one
//!   run, with guaranteed teardown on every exit path
//! - [`sandbox::Container`]: idempotent per-container handle
//!
//! ## Contract ([`contract`])
//! - [`contract::Clause`]: named, severity-tagged, lifecycle-bound
//!   verification units
//! - [`contract::builtin`]: the built-in runtime contract
//! - [`contract::hooks`]: discovery of external hook clauses
//!
//! ## Scheduling ([`scheduler`])
//! - [`scheduler::graph`]: hard/soft edge graph and per-point ordering
//! - [`scheduler::ContractScheduler`]: lifecycle-lockstep execution,
//!   skip propagation and aggregation
//!
//! ## Runtime ([`runtime`])
//! - [`runtime::ContainerRuntime`]: the capability surface required of
//!   a container runtime
//! - [`runtime::docker`]: docker CLI implementation
//!
//! ## Configuration & Reporting
//! - [`config::types`]: shared type definitions and the error enum
//! - [`report`]: per-clause rows and aggregate rendering
//!
//! ## Testing Infrastructure ([`testing`])
//! - [`testing::FakeRuntime`]: scripted in-memory container runtime

pub mod cli;
pub mod config;
pub mod contract;
pub mod report;
pub mod runtime;
pub mod sandbox;
pub mod scheduler;
pub mod testing;

pub use config::types::{ErrorLevel, LifecyclePoint, Result, SandboxConfig, VetboxError};
pub use contract::{Clause, ClauseResult};
pub use report::ValidationReport;
pub use sandbox::{CancelFlag, ContainerSandbox};
pub use scheduler::ContractScheduler;
