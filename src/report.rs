//! Validation report assembly and rendering.

use crate::config::types::{ErrorLevel, LifecyclePoint};
use crate::contract::ClauseResult;
use serde::Serialize;
use std::fmt::Write as _;

/// One clause's outcome, in evaluation order.
#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    pub name: String,
    pub title: String,
    pub point: LifecyclePoint,
    pub level: ErrorLevel,
    pub result: ClauseResult,
    /// Failure or skip detail; empty for passing clauses.
    pub detail: String,
}

/// Aggregate outcome of one validation run.
#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub rows: Vec<ReportRow>,
    pub threshold: ErrorLevel,
    pub passed: bool,
}

impl ValidationReport {
    pub fn new(rows: Vec<ReportRow>, threshold: ErrorLevel, passed: bool) -> Self {
        Self {
            rows,
            threshold,
            passed,
        }
    }

    fn count(&self, result: ClauseResult) -> usize {
        self.rows.iter().filter(|r| r.result == result).count()
    }

    /// Human-readable report, one line per clause plus a summary.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for row in &self.rows {
            let status = match row.result {
                ClauseResult::Passed => "[PASSED]".to_string(),
                ClauseResult::Failed => format!("[FAILED ({})]", row.level),
                ClauseResult::Skipped => "[SKIPPED]".to_string(),
                ClauseResult::Pending => "[PENDING]".to_string(),
            };
            let _ = write!(out, "{:<20} {} ({})", status, row.title, row.point.name());
            if !row.detail.is_empty() {
                let _ = write!(out, "\n{:<20}   {}", "", row.detail);
            }
            out.push('\n');
        }
        let _ = write!(
            out,
            "\n{} passed, {} failed, {} skipped (threshold: {})\n",
            self.count(ClauseResult::Passed),
            self.count(ClauseResult::Failed),
            self.count(ClauseResult::Skipped),
            self.threshold,
        );
        let _ = write!(
            out,
            "validation {}\n",
            if self.passed { "PASSED" } else { "FAILED" }
        );
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, result: ClauseResult, level: ErrorLevel, detail: &str) -> ReportRow {
        ReportRow {
            name: name.to_string(),
            title: name.to_string(),
            point: LifecyclePoint::PostStart,
            level,
            result,
            detail: detail.to_string(),
        }
    }

    #[test]
    fn test_render_carries_status_and_detail() {
        let report = ValidationReport::new(
            vec![
                row("health-check", ClauseResult::Passed, ErrorLevel::Fatal, ""),
                row(
                    "log-format",
                    ClauseResult::Failed,
                    ErrorLevel::Warning,
                    "log line is not valid json",
                ),
            ],
            ErrorLevel::Warning,
            false,
        );
        let text = report.render();
        assert!(text.contains("[PASSED]"));
        assert!(text.contains("[FAILED (WARNING)]"));
        assert!(text.contains("log line is not valid json"));
        assert!(text.contains("1 passed, 1 failed, 0 skipped"));
        assert!(text.contains("validation FAILED"));
    }

    #[test]
    fn test_json_rendering_is_structured() {
        let report = ValidationReport::new(
            vec![row("a", ClauseResult::Skipped, ErrorLevel::Unused, "")],
            ErrorLevel::Fatal,
            true,
        );
        let json = report.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["passed"], true);
        assert_eq!(value["rows"][0]["result"], "SKIPPED");
    }
}
