//! The clause model: named, severity-tagged, lifecycle-point-bound
//! verification units, either native (in-process check logic) or hooks
//! (externally supplied executables).

pub mod builtin;
pub mod hooks;

use crate::config::types::{ErrorLevel, LifecyclePoint};
use crate::sandbox::ContainerSandbox;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Outcome of one check: `Ok(())` passes, `Err(detail)` fails with the
/// detail carried into the report.
pub type CheckOutcome = std::result::Result<(), String>;

/// Evaluation behavior of a clause.
pub enum ClauseCheck {
    /// In-process check against the running sandbox.
    Native(Box<dyn Fn(&ContainerSandbox) -> CheckOutcome + Send + Sync>),
    /// External executable; exit 0 passes, anything else fails with the
    /// captured output as detail.
    Hook { command: PathBuf },
}

impl std::fmt::Debug for ClauseCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClauseCheck::Native(_) => f.write_str("Native"),
            ClauseCheck::Hook { command } => write!(f, "Hook({})", command.display()),
        }
    }
}

/// Result state of a clause. Clauses start `Pending` and are moved to a
/// terminal state exactly once by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum ClauseResult {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "PASSED")]
    Passed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "SKIPPED")]
    Skipped,
}

impl ClauseResult {
    pub fn is_terminal(self) -> bool {
        self != ClauseResult::Pending
    }
}

/// A single clause of the runtime contract.
///
/// `dependencies` and `dependants` are hard edges: they carry a
/// pass/fail gate in addition to ordering. `before` and `after` are
/// soft edges: ordering only, never gating.
#[derive(Debug)]
pub struct Clause {
    pub name: String,
    pub title: String,
    pub description: String,
    pub point: LifecyclePoint,
    pub level: ErrorLevel,
    pub tags: BTreeSet<String>,
    pub dependencies: BTreeSet<String>,
    pub dependants: BTreeSet<String>,
    pub before: BTreeSet<String>,
    pub after: BTreeSet<String>,
    pub check: ClauseCheck,
}

impl Clause {
    /// A native clause with default severity (UNUSED) and no edges.
    pub fn native<F>(name: &str, point: LifecyclePoint, check: F) -> Self
    where
        F: Fn(&ContainerSandbox) -> CheckOutcome + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            title: name.to_string(),
            description: String::new(),
            point,
            level: ErrorLevel::Unused,
            tags: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            dependants: BTreeSet::new(),
            before: BTreeSet::new(),
            after: BTreeSet::new(),
            check: ClauseCheck::Native(Box::new(check)),
        }
    }

    /// A hook clause backed by an external executable.
    pub fn hook(name: &str, point: LifecyclePoint, command: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            title: name.to_string(),
            description: String::new(),
            point,
            level: ErrorLevel::Unused,
            tags: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            dependants: BTreeSet::new(),
            before: BTreeSet::new(),
            after: BTreeSet::new(),
            check: ClauseCheck::Hook { command },
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_level(mut self, level: ErrorLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_dependencies(mut self, names: &[&str]) -> Self {
        self.dependencies = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_dependants(mut self, names: &[&str]) -> Self {
        self.dependants = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_before(mut self, names: &[&str]) -> Self {
        self.before = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_after(mut self, names: &[&str]) -> Self {
        self.after = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Title and description on one line, for report rows.
    pub fn short_description(&self) -> String {
        if self.description.is_empty() {
            self.title.clone()
        } else {
            format!("{}: {}", self.title, self.description)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_clause_defaults() {
        let clause = Clause::native("health-check", LifecyclePoint::PostStart, |_| Ok(()));
        assert_eq!(clause.level, ErrorLevel::Unused);
        assert!(clause.dependencies.is_empty());
        assert_eq!(clause.short_description(), "health-check");
    }

    #[test]
    fn test_builder_chain() {
        let clause = Clause::native("a", LifecyclePoint::PreStart, |_| Ok(()))
            .with_title("Clause A")
            .with_description("checks something")
            .with_level(ErrorLevel::Fatal)
            .with_dependencies(&["b"])
            .with_after(&["c"])
            .with_tags(&["health"]);
        assert_eq!(clause.level, ErrorLevel::Fatal);
        assert!(clause.dependencies.contains("b"));
        assert!(clause.after.contains("c"));
        assert_eq!(clause.short_description(), "Clause A: checks something");
    }
}
