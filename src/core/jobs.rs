//! Job redeploy and deployed-flow reporting.

use crate::config::DeployConfig;
use crate::error::Result;
use crate::manifest::MetadataManifest;
use crate::ssh::RemoteExecutor;
use crate::stage::{scan_remote_log, StageOutcome};
use crate::utils::{remote_path, shell};
use crate::workdir::{self, WorkingDirectory};

pub const FLOW_WARNING: &str = "verify the flow versions on the LSF server";

fn required_settings(config: &DeployConfig) -> [(&'static str, &str); 9] {
    [
        ("path_to_deployjobs", config.path_to_deployjobs.as_str()),
        ("meta_profile", config.meta_profile.as_str()),
        ("meta_repo", config.meta_repo.as_str()),
        ("appserver", config.appserver.as_str()),
        ("server_machine", config.server_machine.as_str()),
        ("server_port", config.server_port.as_str()),
        ("deployed_jobs_dir", config.deployed_jobs_dir.as_str()),
        ("batch_server", config.batch_server.as_str()),
        ("display", config.display.as_str()),
    ]
}

/// Settings the redeploy tool needs that are blank in the configuration.
pub fn missing_settings(config: &DeployConfig) -> Vec<&'static str> {
    required_settings(config)
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(key, _)| key)
        .collect()
}

pub fn redeploy_command(config: &DeployConfig, work: &WorkingDirectory, jobs: &[String]) -> String {
    let mut args = vec![
        config.path_to_deployjobs.clone(),
        "-deploytype".to_string(),
        "REDEPLOY".to_string(),
        "-profile".to_string(),
        config.meta_profile.clone(),
        "-metarepository".to_string(),
        config.meta_repo.clone(),
        "-appservername".to_string(),
        config.appserver.clone(),
        "-servermachine".to_string(),
        config.server_machine.clone(),
        "-serverport".to_string(),
        config.server_port.clone(),
        "-batchserver".to_string(),
        shell::strip_outer_quotes(&config.batch_server).to_string(),
        "-sourcedir".to_string(),
        config.deployed_jobs_dir.clone(),
        "-deploymentdir".to_string(),
        config.deployed_jobs_dir.clone(),
        "-log".to_string(),
        work.log(workdir::LOG_REDEPLOY_JOBS),
        "-objects".to_string(),
    ];
    args.extend(jobs.iter().cloned());
    format!(
        "export DISPLAY={}; {}",
        shell::quote_arg(&config.display),
        shell::quote_args(&args)
    )
}

/// Redeploy every job-kind manifest entry.
pub fn redeploy(
    executor: &dyn RemoteExecutor,
    config: &DeployConfig,
    work: &WorkingDirectory,
    manifest: &MetadataManifest,
) -> Result<StageOutcome> {
    let missing = missing_settings(config);
    if !missing.is_empty() {
        let reason = format!("configuration values are empty: {}", missing.join(", "));
        log_status!("jobs", "Skipping redeploy: {}", reason);
        return Ok(StageOutcome::skipped(reason));
    }

    let jobs = manifest.job_names();
    log_status!("jobs", "Redeploying {} job(s)", jobs.len());
    executor.run(&redeploy_command(config, work, &jobs), Some(work.root()), None)?;

    let diagnostics = scan_remote_log(executor, &work.log(workdir::LOG_REDEPLOY_JOBS));
    Ok(StageOutcome::done(
        format!("{} job(s) redeployed", jobs.len()),
        diagnostics,
    ))
}

/// Flow names (last path segment) of deployed-flow entries; report only.
pub fn deployed_flows(manifest: &MetadataManifest) -> Vec<String> {
    manifest
        .deployed_flows()
        .into_iter()
        .map(|entry| remote_path::file_name(&entry.name).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::MockExecutor;

    #[test]
    fn command_strips_batch_server_quotes_and_sets_display() {
        let mut config = DeployConfig::mock();
        config.batch_server = "\"SASApp - SAS DATA Step Batch Server\"".to_string();
        let work = WorkingDirectory::at("/rt/w");

        let command = redeploy_command(&config, &work, &["/Jobs/A".to_string(), "/Jobs/B C".to_string()]);
        assert!(command.starts_with("export DISPLAY=:0; mock_deployjobs -deploytype REDEPLOY"));
        assert!(command.contains("-batchserver 'SASApp - SAS DATA Step Batch Server'"));
        assert!(command.contains(
            "-sourcedir /mock_runtime/deployed_jobs -deploymentdir /mock_runtime/deployed_jobs"
        ));
        assert!(command.ends_with("-objects /Jobs/A '/Jobs/B C'"));
    }

    #[test]
    fn blank_settings_skip_without_running() {
        let dir = tempfile::tempdir().unwrap();
        let executor = MockExecutor::new(dir.path()).unwrap();
        let mut config = DeployConfig::mock();
        config.display = String::new();
        config.appserver = "  ".to_string();
        let manifest = MetadataManifest::parse("/Jobs/A (Job)");

        let outcome = redeploy(&executor, &config, &WorkingDirectory::at("/rt/w"), &manifest).unwrap();
        match outcome {
            StageOutcome::Skipped { reason } => {
                assert!(reason.contains("appserver, display"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(executor.commands().is_empty());
    }

    #[test]
    fn deployed_flow_names_are_last_segments() {
        let manifest = MetadataManifest::parse(
            "/Shared/Flows/NIGHTLY_LOAD (DeployedFlow)\n/Shared/Jobs/A (Job)\n",
        );
        assert_eq!(deployed_flows(&manifest), vec!["NIGHTLY_LOAD"]);
    }
}
