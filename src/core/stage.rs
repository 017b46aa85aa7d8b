//! Outcome and log-diagnostic types shared by the pipeline stages.

use serde::Serialize;

use crate::ssh::{RemoteExecutor, TextEncoding};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One marker line found in an external tool's log.
///
/// Advisory only: the tool's exit status decides success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogDiagnostic {
    pub severity: Severity,
    pub source: String,
    pub line: String,
}

impl LogDiagnostic {
    pub fn warning(source: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            source: source.into(),
            line: line.into(),
        }
    }
}

/// Lines starting with `ERROR` or `WARN`.
pub fn scan_log(source: &str, text: &str) -> Vec<LogDiagnostic> {
    text.lines()
        .filter_map(|line| {
            let severity = if line.starts_with("ERROR") {
                Severity::Error
            } else if line.starts_with("WARN") {
                Severity::Warning
            } else {
                return None;
            };
            Some(LogDiagnostic {
                severity,
                source: source.to_string(),
                line: line.trim_end().to_string(),
            })
        })
        .collect()
}

/// Read and scan a remote log. An unreadable log is itself reported as a warning.
pub fn scan_remote_log(executor: &dyn RemoteExecutor, log_path: &str) -> Vec<LogDiagnostic> {
    let source = crate::utils::remote_path::file_name(log_path).to_string();
    match executor.read_file(log_path, TextEncoding::Latin1) {
        Ok(text) => {
            let diagnostics = scan_log(&source, &text);
            for diagnostic in &diagnostics {
                log_status!("log", "{}: {}", source, diagnostic.line);
            }
            diagnostics
        }
        Err(e) => vec![LogDiagnostic::warning(
            source,
            format!("log {} could not be read: {}", log_path, e.message),
        )],
    }
}

/// Result of invoking one optional stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Done {
        detail: Option<String>,
        diagnostics: Vec<LogDiagnostic>,
    },
    Skipped { reason: String },
}

impl StageOutcome {
    pub fn done(detail: impl Into<String>, diagnostics: Vec<LogDiagnostic>) -> Self {
        StageOutcome::Done {
            detail: Some(detail.into()),
            diagnostics,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        StageOutcome::Skipped {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::MockExecutor;

    #[test]
    fn only_line_start_markers_count() {
        let text = "NOTE: ok\nERROR: Libref MDS is not assigned.\nWARNING: truncated\n  ERROR not at start\nWARN x\n";
        let found = scan_log("run.log", text);
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].severity, Severity::Error);
        assert_eq!(found[0].line, "ERROR: Libref MDS is not assigned.");
        assert_eq!(found[1].severity, Severity::Warning);
        assert!(found.iter().all(|d| d.source == "run.log"));
    }

    #[test]
    fn missing_log_becomes_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let executor = MockExecutor::new(dir.path()).unwrap();
        let found = scan_remote_log(&executor, "/work/logs/export_metadata.log");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Warning);
        assert_eq!(found[0].source, "export_metadata.log");
    }

    #[test]
    fn remote_log_is_scanned() {
        let dir = tempfile::tempdir().unwrap();
        let executor = MockExecutor::new(dir.path()).unwrap();
        executor
            .write_file("/work/logs/a.log", "ERROR boom\n", TextEncoding::Utf8)
            .unwrap();
        let found = scan_remote_log(&executor, "/work/logs/a.log");
        assert_eq!(found, vec![LogDiagnostic {
            severity: Severity::Error,
            source: "a.log".to_string(),
            line: "ERROR boom".to_string(),
        }]);
    }
}
