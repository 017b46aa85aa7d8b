//! Optional pre-deploy hook scripts assembled from fragments.

use crate::config::{DeployConfig, Environment};
use crate::error::Result;
use crate::sas;
use crate::ssh::RemoteExecutor;
use crate::stage::StageOutcome;
use crate::workdir::{self, WorkingDirectory};

/// Run `pre_deploy.sh` from the working directory, output captured in its log.
pub fn run_bash_hook(executor: &dyn RemoteExecutor, work: &WorkingDirectory) -> Result<StageOutcome> {
    let log = format!("{}/{}", workdir::LOGS_DIR, workdir::LOG_PRE_DEPLOY_BASH);
    let command = format!("./{} > {} 2>&1", workdir::PRE_DEPLOY_BASH_SCRIPT, log);

    log_status!("predeploy", "Running {}", workdir::PRE_DEPLOY_BASH_SCRIPT);
    executor
        .run(&command, Some(work.root()), None)
        .map_err(|e| e.with_hint(format!("Script output is in {}", work.path(&log))))?;

    Ok(StageOutcome::done(work.path(&log), Vec::new()))
}

/// Run `pre_deploy.sas` with the target environment exported.
pub fn run_sas_hook(
    executor: &dyn RemoteExecutor,
    config: &DeployConfig,
    work: &WorkingDirectory,
    env: Environment,
) -> Result<StageOutcome> {
    let log = work.log(workdir::LOG_PRE_DEPLOY_SAS);
    let diagnostics = sas::run_program(
        executor,
        config,
        work,
        &work.path(workdir::PRE_DEPLOY_SAS_SCRIPT),
        &log,
        Some(env),
    )?;
    Ok(StageOutcome::done(log, diagnostics))
}
