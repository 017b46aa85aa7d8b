//! Batch SAS execution on the deployment host.

use crate::config::{DeployConfig, Environment};
use crate::error::{Error, ErrorCode, Result, SasProgramFailedDetails};
use crate::ssh::RemoteExecutor;
use crate::stage::{scan_remote_log, LogDiagnostic, Severity};
use crate::utils::shell;
use crate::workdir::WorkingDirectory;

/// Environment variable SAS programs read the target environment from.
pub const ENVIRONMENT_VAR: &str = "srodowisko";

/// SAS exits 1 when the run only produced warnings.
const WARNINGS_EXIT_CODE: i64 = 1;

pub fn command(
    sas_command: &str,
    program: &str,
    log: &str,
    env: Option<Environment>,
) -> String {
    let invocation = format!(
        "{} -sysin {} -log {}",
        sas_command,
        shell::quote_path(program),
        shell::quote_path(log)
    );
    match env {
        Some(env) => format!("{}={} {}", ENVIRONMENT_VAR, env.as_str(), invocation),
        None => invocation,
    }
}

/// Run `program` in batch mode, logging to `log`.
///
/// Fails with `sas.program_failed` when SAS exits with 2 or more, or when the
/// log has `ERROR` lines. Warning lines come back as diagnostics.
pub fn run_program(
    executor: &dyn RemoteExecutor,
    config: &DeployConfig,
    work: &WorkingDirectory,
    program: &str,
    log: &str,
    env: Option<Environment>,
) -> Result<Vec<LogDiagnostic>> {
    let command = command(&config.sas_command, program, log, env);
    log_status!("sas", "Running {}", program);

    let failure = match executor.run(&command, Some(work.root()), None) {
        Ok(_) => None,
        Err(e) if e.code == ErrorCode::RemoteCommandFailed => {
            let exit_code = e.details.get("exitCode").and_then(|v| v.as_i64());
            if exit_code == Some(WARNINGS_EXIT_CODE) {
                log_status!("sas", "{} finished with warnings", program);
                None
            } else {
                Some(e)
            }
        }
        Err(e) => return Err(e),
    };

    let diagnostics = scan_remote_log(executor, log);
    let mut errors: Vec<String> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.line.clone())
        .collect();

    if failure.is_none() && errors.is_empty() {
        return Ok(diagnostics);
    }

    if errors.is_empty() {
        if let Some(e) = failure {
            errors.push(e.message);
        }
    }

    Err(Error::sas_program_failed(SasProgramFailedDetails {
        program: program.to_string(),
        log: log.to_string(),
        errors,
    }))
}
