//! Built-in runtime contract clauses.
//!
//! These encode the baseline expectations every managed application
//! container is held to: lifecycle endpoints, health checking and log
//! placement.

use super::Clause;
use crate::config::types::{ErrorLevel, LifecyclePoint};
use crate::sandbox::ContainerSandbox;
use std::time::Duration;

/// Diagnostic log location, one json object per line.
const DLOG_LOCATION: &str = "/var/log/app_engine/app.log.json";

/// Access log location.
const ALOG_LOCATION: &str = "/var/log/app_engine/request.log";

/// Permissible status codes for the lifecycle endpoints.
const LIFECYCLE_STATUS_CODES: [u16; 4] = [200, 202, 404, 503];

/// Fields every diagnostic log entry is required to carry.
const DLOG_FIELDS: [&str; 4] = ["timestamp", "thread", "severity", "message"];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// All built-in clauses, in registration order.
pub fn builtin_clauses() -> Vec<Clause> {
    vec![
        health_checks_enabled(),
        start_request(),
        health_check(),
        access_log_location(),
        diagnostic_log_location(),
        diagnostic_log_format(),
        stop_request(),
        clean_shutdown(),
    ]
}

fn get_lifecycle_endpoint(sandbox: &ContainerSandbox, path: &str) -> Result<(), String> {
    let url = format!(
        "http://{}:{}{}",
        sandbox.application_host(),
        sandbox.application_port(),
        path
    );
    let client = reqwest::blocking::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| format!("could not build http client: {e}"))?;
    let response = client
        .get(&url)
        .send()
        .map_err(|e| format!("request to {url} failed: {e}"))?;
    let status = response.status().as_u16();
    if LIFECYCLE_STATUS_CODES.contains(&status) {
        Ok(())
    } else {
        Err(format!("{url} responded with status {status}"))
    }
}

fn health_checks_enabled() -> Clause {
    Clause::native("health-checks-enabled", LifecyclePoint::PreStart, |sandbox| {
        let path = match &sandbox.config().config_file {
            Some(path) => path.clone(),
            // Image targets carry no configuration to inspect; health
            // checks default to enabled.
            None => return Ok(()),
        };
        let text = std::fs::read_to_string(&path)
            .map_err(|e| format!("could not read {}: {e}", path.display()))?;
        for line in text.lines() {
            let line = line.trim();
            if line.starts_with("enable_health_check") && line.contains("false") {
                return Err("health checking is disabled in the configuration".to_string());
            }
        }
        Ok(())
    })
    .with_title("Health checks enabled")
    .with_description("health checking can be enabled in the configuration")
    .with_level(ErrorLevel::Unused)
    .with_tags(&["health"])
}

fn start_request() -> Clause {
    Clause::native("start-request", LifecyclePoint::Start, |sandbox| {
        get_lifecycle_endpoint(sandbox, "/_ah/start")
    })
    .with_title("Start request")
    .with_description("container must accept a request to /_ah/start")
    .with_level(ErrorLevel::Fatal)
}

fn health_check() -> Clause {
    Clause::native("health-check", LifecyclePoint::PostStart, |sandbox| {
        let url = format!(
            "http://{}:{}/_ah/health",
            sandbox.application_host(),
            sandbox.application_port()
        );
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| format!("could not build http client: {e}"))?;
        let response = client
            .get(&url)
            .send()
            .map_err(|e| format!("request to {url} failed: {e}"))?;
        if response.status().as_u16() == 200 {
            Ok(())
        } else {
            Err(format!(
                "the container responded to health checks with status {}",
                response.status().as_u16()
            ))
        }
    })
    .with_title("Health check")
    .with_description("endpoint /_ah/health must respond with status code 200")
    .with_level(ErrorLevel::Fatal)
    .with_dependencies(&["health-checks-enabled"])
    .with_tags(&["health"])
}

fn app_file_exists(sandbox: &ContainerSandbox, path: &str) -> Result<(), String> {
    let container = sandbox
        .app_container()
        .ok_or_else(|| "application container is not available".to_string())?;
    let output = container
        .exec(&["test", "-e", path])
        .map_err(|e| e.to_string())?;
    if output.success() {
        Ok(())
    } else {
        Err(format!("no file found at {path}"))
    }
}

fn access_log_location() -> Clause {
    Clause::native("access-log-location", LifecyclePoint::PostStart, |sandbox| {
        app_file_exists(sandbox, ALOG_LOCATION)
    })
    .with_title("Access log location")
    .with_description("container should write access logs under /var/log/app_engine")
    .with_level(ErrorLevel::Unused)
    .with_tags(&["logging"])
}

fn diagnostic_log_location() -> Clause {
    Clause::native(
        "diagnostic-log-location",
        LifecyclePoint::PostStart,
        |sandbox| app_file_exists(sandbox, DLOG_LOCATION),
    )
    .with_title("Diagnostic log location")
    .with_description("container should write diagnostic logs under /var/log/app_engine")
    .with_level(ErrorLevel::Unused)
    .with_tags(&["logging"])
}

fn diagnostic_log_format() -> Clause {
    Clause::native(
        "diagnostic-log-format",
        LifecyclePoint::PostStart,
        |sandbox| {
            let container = sandbox
                .app_container()
                .ok_or_else(|| "application container is not available".to_string())?;
            let output = container
                .exec(&["cat", DLOG_LOCATION])
                .map_err(|e| e.to_string())?;
            if !output.success() {
                return Err(format!("could not read {DLOG_LOCATION}"));
            }
            check_json_log_format(&output.stdout)
        },
    )
    .with_title("Diagnostic log format")
    .with_description("json log entries must carry timestamp, thread, severity and message")
    .with_level(ErrorLevel::Warning)
    .with_dependencies(&["diagnostic-log-location"])
    .with_tags(&["logging"])
}

/// Every non-empty line must be one json object carrying the required
/// diagnostic fields.
fn check_json_log_format(text: &str) -> Result<(), String> {
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: serde_json::Value = serde_json::from_str(line)
            .map_err(|_| format!("log line is not valid json: {line}"))?;
        for field in DLOG_FIELDS {
            if entry.get(field).is_none() {
                return Err(format!("log entry is missing the \"{field}\" field: {line}"));
            }
        }
    }
    Ok(())
}

fn stop_request() -> Clause {
    Clause::native("stop-request", LifecyclePoint::Stop, |sandbox| {
        get_lifecycle_endpoint(sandbox, "/_ah/stop")
    })
    .with_title("Stop request")
    .with_description("container must accept a request to /_ah/stop")
    .with_level(ErrorLevel::Warning)
}

fn clean_shutdown() -> Clause {
    Clause::native("clean-shutdown", LifecyclePoint::PostStop, |sandbox| {
        let container = sandbox
            .app_container()
            .ok_or_else(|| "application container is not available".to_string())?;
        match container.captured_exit_code() {
            Some(0) => Ok(()),
            Some(code) => Err(format!("application container exited with code {code}")),
            None => Err("application container exit code was not recorded".to_string()),
        }
    })
    .with_title("Clean shutdown")
    .with_description("application container must exit cleanly when stopped")
    .with_level(ErrorLevel::Warning)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_order_follows_the_timeline() {
        let clauses = builtin_clauses();
        let points: Vec<_> = clauses.iter().map(|c| c.point).collect();
        let mut sorted = points.clone();
        sorted.sort();
        assert_eq!(points, sorted);
    }

    #[test]
    fn test_singular_points_have_one_clause_each() {
        let clauses = builtin_clauses();
        let starts = clauses
            .iter()
            .filter(|c| c.point == LifecyclePoint::Start)
            .count();
        let stops = clauses
            .iter()
            .filter(|c| c.point == LifecyclePoint::Stop)
            .count();
        assert_eq!(starts, 1);
        assert_eq!(stops, 1);
    }

    #[test]
    fn test_json_log_format_accepts_complete_entries() {
        let text = concat!(
            "{\"timestamp\": 1, \"thread\": 2, \"severity\": \"INFO\", \"message\": \"ok\"}\n",
            "\n",
            "{\"timestamp\": 2, \"thread\": 2, \"severity\": \"ERROR\", \"message\": \"bad\"}\n",
        );
        assert!(check_json_log_format(text).is_ok());
    }

    #[test]
    fn test_json_log_format_rejects_missing_fields() {
        let err = check_json_log_format("{\"timestamp\": 1}").unwrap_err();
        assert!(err.contains("thread"));
    }

    #[test]
    fn test_json_log_format_rejects_plain_text() {
        assert!(check_json_log_format("plain text line").is_err());
    }
}
