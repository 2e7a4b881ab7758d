//! Discovery of externally supplied hook clauses.
//!
//! A hook clause is described by a `<name>.clause.json` definition
//! file and backed by an executable. Definitions that cannot be parsed
//! or whose executable is missing are logged and dropped rather than
//! aborting the run.

use super::Clause;
use crate::config::types::{ErrorLevel, LifecyclePoint, Result, VetboxError};
use log::{debug, warn};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Suffix that marks a file as a hook clause definition.
pub const DEFINITION_SUFFIX: &str = ".clause.json";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HookDefinition {
    name: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    lifecycle_point: String,
    #[serde(default)]
    error_level: Option<String>,
    /// Path to the executable; relative paths resolve against the
    /// definition file's directory. Defaults to a sibling file with
    /// the definition suffix stripped.
    #[serde(default)]
    command: Option<PathBuf>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    dependants: Vec<String>,
    #[serde(default)]
    before: Vec<String>,
    #[serde(default)]
    after: Vec<String>,
}

/// Walk `dir` recursively and build a clause for every valid hook
/// definition found. Discovery order is deterministic: entries are
/// visited in name order.
pub fn load_hook_clauses(dir: &Path) -> Result<Vec<Clause>> {
    if !dir.is_dir() {
        return Err(VetboxError::HookDefinition(format!(
            "hook directory {} does not exist",
            dir.display()
        )));
    }
    let mut clauses = Vec::new();
    walk(dir, &mut clauses);
    Ok(clauses)
}

/// One level of the discovery walk. Directories that cannot be read
/// are logged and skipped, like any other broken definition; they
/// never abort discovery.
fn walk(dir: &Path, clauses: &mut Vec<Clause>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("skipping unreadable directory {}: {}", dir.display(), e);
            return;
        }
    };
    let mut entries: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    entries.sort();
    for path in entries {
        if path.is_dir() {
            walk(&path, clauses);
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(DEFINITION_SUFFIX))
            .unwrap_or(false)
        {
            match load_definition(&path) {
                Ok(clause) => {
                    debug!("loaded hook clause {} from {}", clause.name, path.display());
                    clauses.push(clause);
                }
                Err(e) => warn!("dropping hook definition {}: {}", path.display(), e),
            }
        }
    }
}

fn load_definition(path: &Path) -> Result<Clause> {
    let text = std::fs::read_to_string(path)?;
    let def: HookDefinition = serde_json::from_str(&text)
        .map_err(|e| VetboxError::HookDefinition(e.to_string()))?;

    let point: LifecyclePoint = def
        .lifecycle_point
        .parse()
        .map_err(VetboxError::HookDefinition)?;
    let level = match &def.error_level {
        Some(level) => level.parse().map_err(VetboxError::HookDefinition)?,
        None => ErrorLevel::Unused,
    };

    let command = resolve_command(path, def.command.as_deref())?;

    let mut clause = Clause::hook(&def.name, point, command).with_level(level);
    if let Some(title) = def.title {
        clause.title = title;
    }
    if let Some(description) = def.description {
        clause.description = description;
    }
    clause.tags = to_set(def.tags);
    clause.dependencies = to_set(def.dependencies);
    clause.dependants = to_set(def.dependants);
    clause.before = to_set(def.before);
    clause.after = to_set(def.after);
    Ok(clause)
}

fn to_set(items: Vec<String>) -> BTreeSet<String> {
    items.into_iter().collect()
}

fn resolve_command(definition: &Path, command: Option<&Path>) -> Result<PathBuf> {
    let resolved = match command {
        Some(command) if command.is_absolute() => command.to_path_buf(),
        Some(command) => definition
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(command),
        None => {
            // foo.clause.json runs the sibling executable foo.
            let name = definition
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(DEFINITION_SUFFIX))
                .ok_or_else(|| {
                    VetboxError::HookDefinition("definition file has no usable name".to_string())
                })?;
            definition
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(name)
        }
    };
    if !is_executable(&resolved) {
        return Err(VetboxError::HookDefinition(format!(
            "{} is not an executable file",
            resolved.display()
        )));
    }
    Ok(resolved)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ClauseCheck;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn write_executable(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_loads_definition_with_sibling_command() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_executable(dir.path(), "check-metrics");
        fs::write(
            dir.path().join("check-metrics.clause.json"),
            r#"{
                "name": "check-metrics",
                "title": "Metrics endpoint",
                "lifecycle_point": "POST_START",
                "error_level": "WARNING",
                "tags": ["metrics"],
                "dependencies": ["health-check"]
            }"#,
        )
        .unwrap();

        let clauses = load_hook_clauses(dir.path()).unwrap();
        assert_eq!(clauses.len(), 1);
        let clause = &clauses[0];
        assert_eq!(clause.name, "check-metrics");
        assert_eq!(clause.point, LifecyclePoint::PostStart);
        assert_eq!(clause.level, ErrorLevel::Warning);
        assert!(clause.dependencies.contains("health-check"));
        match &clause.check {
            ClauseCheck::Hook { command } => assert_eq!(command, &script),
            other => panic!("expected hook check, got {other:?}"),
        }
    }

    #[test]
    fn test_explicit_relative_command_resolves_against_definition_dir() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_executable(dir.path(), "run.sh");
        fs::write(
            dir.path().join("probe.clause.json"),
            r#"{"name": "probe", "lifecycle_point": "PRE_START", "command": "run.sh"}"#,
        )
        .unwrap();

        let clauses = load_hook_clauses(dir.path()).unwrap();
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].level, ErrorLevel::Unused);
        match &clauses[0].check {
            ClauseCheck::Hook { command } => assert_eq!(command, &script),
            other => panic!("expected hook check, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_definition_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        write_executable(dir.path(), "good");
        fs::write(
            dir.path().join("good.clause.json"),
            r#"{"name": "good", "lifecycle_point": "POST_START"}"#,
        )
        .unwrap();
        fs::write(dir.path().join("bad.clause.json"), "{not json").unwrap();

        let clauses = load_hook_clauses(dir.path()).unwrap();
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].name, "good");
    }

    #[test]
    fn test_unknown_lifecycle_point_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        write_executable(dir.path(), "probe");
        fs::write(
            dir.path().join("probe.clause.json"),
            r#"{"name": "probe", "lifecycle_point": "MID_FLIGHT"}"#,
        )
        .unwrap();
        assert!(load_hook_clauses(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_non_executable_command_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe");
        fs::write(&path, "not executable").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        fs::write(
            dir.path().join("probe.clause.json"),
            r#"{"name": "probe", "lifecycle_point": "POST_START"}"#,
        )
        .unwrap();
        assert!(load_hook_clauses(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_definitions_in_subdirectories_are_found() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("checks");
        fs::create_dir(&sub).unwrap();
        write_executable(&sub, "nested");
        fs::write(
            sub.join("nested.clause.json"),
            r#"{"name": "nested", "lifecycle_point": "POST_STOP"}"#,
        )
        .unwrap();

        let clauses = load_hook_clauses(dir.path()).unwrap();
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].point, LifecyclePoint::PostStop);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        assert!(load_hook_clauses(Path::new("/nonexistent/hooks")).is_err());
    }

    #[test]
    fn test_unreadable_subdirectory_does_not_abort_discovery() {
        let dir = tempfile::tempdir().unwrap();
        write_executable(dir.path(), "survivor");
        fs::write(
            dir.path().join("survivor.clause.json"),
            r#"{"name": "survivor", "lifecycle_point": "POST_START"}"#,
        )
        .unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let clauses = load_hook_clauses(dir.path()).unwrap();
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].name, "survivor");

        // Restore so the tempdir can be cleaned up.
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    }
}
