//! Sandbox orchestration: the paired API-emulation and application
//! containers for one run, plus their lifecycle state.

pub mod container;
#[allow(clippy::module_inception)]
pub mod sandbox;

pub use container::Container;
pub use sandbox::ContainerSandbox;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle state of a sandbox run.
///
/// Transitions are monotonic along `Created -> Starting -> Running ->
/// Stopping -> Stopped`; `Failed` absorbs from any non-terminal state.
/// Reaching `Stopped` or `Failed` guarantees both containers have been
/// removed from the runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SandboxState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl SandboxState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SandboxState::Stopped | SandboxState::Failed)
    }
}

/// Cooperative cancellation flag, shared between the sandbox's blocking
/// readiness poll and whatever wants to abort the run (typically the
/// signal handler). Setting it is async-signal-safe.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
