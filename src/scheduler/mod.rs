//! The clause scheduler.
//!
//! Drives the sandbox through its lifecycle in lockstep with clause
//! evaluation: `prepare`, the PRE_START clauses, `start`, the START
//! through STOP clauses, `stop`, then the POST_STOP clauses. The
//! sandbox is torn down on every exit path before the report (or the
//! fatal error) is returned.

pub mod graph;

use crate::config::types::{ErrorLevel, LifecyclePoint, Result, VetboxError};
use crate::contract::{Clause, ClauseCheck, ClauseResult};
use crate::report::{ReportRow, ValidationReport};
use crate::sandbox::{CancelFlag, ContainerSandbox};
use graph::ContractGraph;
use log::{debug, info, warn};
use std::io::Read;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default wall-clock budget for one hook process.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

const HOOK_POLL: Duration = Duration::from_millis(50);

#[derive(Clone)]
struct Outcome {
    result: ClauseResult,
    detail: String,
    /// Registration index of the failing clause this outcome is a
    /// consequence of, for skips propagated along hard edges.
    cause: Option<usize>,
}

impl Outcome {
    fn pending() -> Self {
        Self {
            result: ClauseResult::Pending,
            detail: String::new(),
            cause: None,
        }
    }
}

pub struct ContractScheduler {
    clauses: Vec<Clause>,
    graph: ContractGraph,
    threshold: ErrorLevel,
    /// Tag selection; empty means every clause runs. A clause's own
    /// name always counts as one of its tags.
    tags: Vec<String>,
    hook_timeout: Duration,
    cancel: CancelFlag,
    outcomes: Vec<Outcome>,
    /// Registration indices in the order clauses were resolved.
    sequence: Vec<usize>,
}

impl ContractScheduler {
    /// Validate the clause set and build the execution plan. Graph
    /// configuration errors surface here, before any container exists.
    pub fn new(clauses: Vec<Clause>, threshold: ErrorLevel, tags: Vec<String>) -> Result<Self> {
        let graph = ContractGraph::build(&clauses)?;
        let outcomes = vec![Outcome::pending(); clauses.len()];
        Ok(Self {
            clauses,
            graph,
            threshold,
            tags,
            hook_timeout: DEFAULT_HOOK_TIMEOUT,
            cancel: CancelFlag::new(),
            outcomes,
            sequence: Vec::new(),
        })
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    /// Run the full contract against the sandbox. The sandbox is torn
    /// down before this returns, whatever the outcome. A fatal
    /// infrastructure error (build, start timeout, cancellation) is
    /// returned as `Err`; clause failures are never fatal and land in
    /// the report.
    pub fn run(&mut self, sandbox: &mut ContainerSandbox) -> Result<ValidationReport> {
        let driven = self.drive(sandbox);
        sandbox.stop();
        driven?;
        Ok(self.report())
    }

    fn drive(&mut self, sandbox: &mut ContainerSandbox) -> Result<()> {
        sandbox.prepare()?;
        self.run_point(LifecyclePoint::PreStart, sandbox)?;
        sandbox.start()?;
        self.run_point(LifecyclePoint::Start, sandbox)?;
        self.run_point(LifecyclePoint::PostStart, sandbox)?;
        // The STOP clause sends the stop request while the containers
        // are still up; the sandbox teardown follows it.
        self.run_point(LifecyclePoint::Stop, sandbox)?;
        sandbox.stop();
        self.run_point(LifecyclePoint::PostStop, sandbox)?;
        Ok(())
    }

    fn run_point(&mut self, point: LifecyclePoint, sandbox: &ContainerSandbox) -> Result<()> {
        let order: Vec<usize> = self.graph.order_at(point).to_vec();
        if !order.is_empty() {
            debug!("running {} clauses at {}", order.len(), point.name());
        }
        for i in order {
            if self.cancel.is_canceled() {
                return Err(VetboxError::Canceled);
            }
            let outcome = self.resolve(i, sandbox);
            match outcome.result {
                ClauseResult::Passed => info!("[PASSED] {}", self.clauses[i].title),
                ClauseResult::Failed => warn!(
                    "[FAILED ({})] {}: {}",
                    self.clauses[i].level, self.clauses[i].title, outcome.detail
                ),
                _ => info!("[SKIPPED] {}: {}", self.clauses[i].title, outcome.detail),
            }
            self.outcomes[i] = outcome;
            self.sequence.push(i);
        }
        Ok(())
    }

    fn resolve(&self, i: usize, sandbox: &ContainerSandbox) -> Outcome {
        let clause = &self.clauses[i];

        if !self.selected_by_tags(clause) {
            return Outcome {
                result: ClauseResult::Skipped,
                detail: format!("not selected by tags: {}", self.tags.join(", ")),
                cause: None,
            };
        }

        // Hard dependencies gate evaluation; a failure propagates its
        // root cause through transitive skips.
        for &dep in self.graph.hard_deps(i) {
            let dep_outcome = &self.outcomes[dep];
            let cause = match dep_outcome.result {
                ClauseResult::Passed => continue,
                ClauseResult::Failed => Some(dep),
                _ => dep_outcome.cause,
            };
            return Outcome {
                result: ClauseResult::Skipped,
                detail: format!("\"{}\" did not pass", self.clauses[dep].title),
                cause,
            };
        }

        let (result, detail) = match &clause.check {
            ClauseCheck::Native(check) => match catch_unwind(AssertUnwindSafe(|| check(sandbox))) {
                Ok(Ok(())) => (ClauseResult::Passed, String::new()),
                Ok(Err(detail)) => (ClauseResult::Failed, detail),
                Err(panic) => (ClauseResult::Failed, panic_text(panic)),
            },
            ClauseCheck::Hook { command } => self.run_hook(command, sandbox),
        };
        Outcome {
            result,
            detail,
            cause: None,
        }
    }

    fn selected_by_tags(&self, clause: &Clause) -> bool {
        if self.tags.is_empty() {
            return true;
        }
        self.tags
            .iter()
            .any(|t| t == &clause.name || clause.tags.contains(t))
    }

    /// Run a hook executable with the application container's
    /// coordinates in its environment. Exit code zero passes; anything
    /// else fails with the captured output as detail.
    fn run_hook(
        &self,
        command: &std::path::Path,
        sandbox: &ContainerSandbox,
    ) -> (ClauseResult, String) {
        let container_id = sandbox
            .app_container()
            .and_then(|c| c.id())
            .unwrap_or("")
            .to_string();
        let spawned = Command::new(command)
            .env("VETBOX_CONTAINER_ID", container_id)
            .env("VETBOX_APP_HOST", sandbox.application_host())
            .env("VETBOX_APP_PORT", sandbox.application_port().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                return (
                    ClauseResult::Failed,
                    format!("could not run {}: {}", command.display(), e),
                )
            }
        };

        // Drain both pipes on collector threads while polling for
        // exit; a hook writing more than the pipe buffer would
        // otherwise block on write and never exit.
        let stdout_handle = child.stdout.take().map(drain_stream);
        let stderr_handle = child.stderr.take().map(drain_stream);

        let deadline = Instant::now() + self.hook_timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        break None;
                    }
                    std::thread::sleep(HOOK_POLL);
                }
                Err(e) => {
                    return (
                        ClauseResult::Failed,
                        format!("could not wait for {}: {}", command.display(), e),
                    )
                }
            }
        };

        // The child is gone either way, so its pipe ends are closed
        // and the collectors finish.
        let stdout = stdout_handle.map(join_drained).unwrap_or_default();
        let stderr = stderr_handle.map(join_drained).unwrap_or_default();

        let status = match status {
            Some(status) => status,
            None => {
                return (
                    ClauseResult::Failed,
                    format!("timed out after {:?}", self.hook_timeout),
                )
            }
        };
        if status.success() {
            (ClauseResult::Passed, String::new())
        } else {
            let mut detail = format!("exited with {}", status);
            for stream in [stderr.trim(), stdout.trim()] {
                if !stream.is_empty() {
                    detail.push_str(": ");
                    detail.push_str(stream);
                    break;
                }
            }
            (ClauseResult::Failed, detail)
        }
    }

    /// Aggregate: a run fails if any clause at or above the threshold
    /// failed, or was skipped as a consequence of such a failure.
    fn passed(&self) -> bool {
        for (i, outcome) in self.outcomes.iter().enumerate() {
            let relevant = match outcome.result {
                ClauseResult::Failed => self.clauses[i].level >= self.threshold,
                ClauseResult::Skipped => outcome
                    .cause
                    .map(|c| self.clauses[c].level >= self.threshold)
                    .unwrap_or(false),
                _ => false,
            };
            if relevant {
                return false;
            }
        }
        true
    }

    fn report(&self) -> ValidationReport {
        let rows = self
            .sequence
            .iter()
            .map(|&i| {
                let clause = &self.clauses[i];
                let outcome = &self.outcomes[i];
                ReportRow {
                    name: clause.name.clone(),
                    title: clause.title.clone(),
                    point: clause.point,
                    level: clause.level,
                    result: outcome.result,
                    detail: outcome.detail.clone(),
                }
            })
            .collect();
        ValidationReport::new(rows, self.threshold, self.passed())
    }
}

fn drain_stream<R: Read + Send + 'static>(mut stream: R) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut collected = String::new();
        let _ = stream.read_to_string(&mut collected);
        collected
    })
}

fn join_drained(handle: JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

fn panic_text(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("clause panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("clause panicked: {s}")
    } else {
        "clause panicked".to_string()
    }
}
