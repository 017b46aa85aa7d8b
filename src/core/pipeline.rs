//! The fixed deployment sequence for one run.
//!
//! Stages run strictly in order, each attempted once. Optional stages are
//! gated by a [`StagePrecondition`] evaluated before the stage is invoked;
//! a false precondition records a skip and moves on without side effects.
//! Code deployment is the point of no rollback: nothing undoes it when a
//! later stage fails.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::assemble::Assembler;
use crate::config::{DeployConfig, Environment};
use crate::error::{Error, Hint, Result};
use crate::manifest::MetadataManifest;
use crate::module_deploy::ModuleDeployer;
use crate::platform::PlatformClient;
use crate::pull_request::PullRequest;
use crate::ssh::RemoteExecutor;
use crate::stage::{LogDiagnostic, StageOutcome};
use crate::workdir::{self, WorkingDirectory};
use crate::{dictionaries, jobs, metadata, predeploy};

pub const NO_ROLLBACK_WARNING: &str =
    "code was already deployed and is not rolled back; the target holds the new code";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum PipelineState {
    Initialized,
    WorkingDirCreated,
    Qualified,
    Assembled,
    PreDeployRun,
    CodeDeployed,
    DictionariesUpdated,
    MetadataExported,
    MetadataImported,
    JobsRedeployed,
    RemoteMerged,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Done,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub stage: PipelineState,
    pub step: &'static str,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedError {
    pub code: String,
    pub message: String,
    pub details: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<Hint>,
}

impl From<&Error> for ReportedError {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code.as_str().to_string(),
            message: err.message.clone(),
            details: err.details.clone(),
            hints: err.hints.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub status: RunStatus,
    pub state: PipelineState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<PipelineState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReportedError>,
    pub work_dir: WorkingDirectory,
    pub qualified_pull_requests: Vec<PullRequest>,
    pub merged_pull_requests: Vec<PullRequest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remotely_merged: Vec<u64>,
    pub changed_files: BTreeSet<String>,
    pub stages: Vec<StageRecord>,
    pub diagnostics: Vec<LogDiagnostic>,
    pub deployed_flows: Vec<String>,
    pub warnings: Vec<String>,
    /// The error that stopped the run, kept whole for exit-code mapping.
    #[serde(skip)]
    pub failure: Option<Error>,
}

impl RunReport {
    fn new(work: &WorkingDirectory) -> Self {
        Self {
            status: RunStatus::Completed,
            state: PipelineState::Initialized,
            failed_stage: None,
            error: None,
            work_dir: work.clone(),
            qualified_pull_requests: Vec::new(),
            merged_pull_requests: Vec::new(),
            remotely_merged: Vec::new(),
            changed_files: BTreeSet::new(),
            stages: Vec::new(),
            diagnostics: Vec::new(),
            deployed_flows: Vec::new(),
            warnings: Vec::new(),
            failure: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn record(&self, step: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|record| record.step == step)
    }
}

/// Condition an optional stage needs before it is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagePrecondition {
    /// Remote path exists in the working directory.
    FileExists(String),
    /// Target environment is not DEV.
    NonDevEnvironment,
    /// Manifest was produced and lists at least one object.
    ManifestHasEntries,
    /// Manifest lists at least one job.
    ManifestHasJobs,
    /// `--merge` on PROD with at least one locally merged pull request.
    RemoteMergeRequested,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    /// Merge the pull requests on the platform once everything else succeeded.
    pub merge_after_deploy: bool,
}

pub struct Pipeline<'a> {
    executor: &'a dyn RemoteExecutor,
    platform: &'a PlatformClient,
    config: &'a DeployConfig,
    env: Environment,
    options: PipelineOptions,
    work: WorkingDirectory,
}

/// Mutable facts accumulated while a run progresses.
struct RunContext {
    report: RunReport,
    attempting: PipelineState,
    manifest: Option<MetadataManifest>,
    code_deployed: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        executor: &'a dyn RemoteExecutor,
        platform: &'a PlatformClient,
        config: &'a DeployConfig,
        env: Environment,
        options: PipelineOptions,
        work: WorkingDirectory,
    ) -> Self {
        Self {
            executor,
            platform,
            config,
            env,
            options,
            work,
        }
    }

    /// Run every stage. Failures end the run and are reported, not returned.
    pub fn run(&self) -> RunReport {
        let mut ctx = RunContext {
            report: RunReport::new(&self.work),
            attempting: PipelineState::Initialized,
            manifest: None,
            code_deployed: false,
        };

        if self.options.merge_after_deploy && self.env != Environment::Prod {
            ctx.report.warnings.push(format!(
                "--merge is ignored on {}; pull requests are merged only after a PROD deployment",
                self.env
            ));
        }

        match self.execute(&mut ctx) {
            Ok(()) => {
                ctx.report.state = PipelineState::Completed;
                log_status!("pipeline", "Run completed in {}", self.work);
            }
            Err(err) => self.fail(&mut ctx, err),
        }

        ctx.report
    }

    fn fail(&self, ctx: &mut RunContext, err: Error) {
        log_status!(
            "pipeline",
            "{:?} failed: {} (working directory kept at {})",
            ctx.attempting,
            err.message,
            self.work
        );

        let step = ctx
            .report
            .stages
            .last()
            .filter(|record| record.stage == ctx.attempting && record.status == StageStatus::Failed)
            .map(|record| record.step);
        if step.is_none() {
            ctx.report.stages.push(StageRecord {
                stage: ctx.attempting,
                step: step_name(ctx.attempting),
                status: StageStatus::Failed,
                detail: Some(err.message.clone()),
            });
        }

        if ctx.code_deployed {
            ctx.report.warnings.push(NO_ROLLBACK_WARNING.to_string());
        }

        ctx.report.status = RunStatus::Failed;
        ctx.report.state = PipelineState::Failed;
        ctx.report.failed_stage = Some(ctx.attempting);
        ctx.report.error = Some(ReportedError::from(&err));
        ctx.report.failure = Some(err);
    }

    fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        ctx.attempting = PipelineState::WorkingDirCreated;
        self.executor.mkdir_p(self.work.root())?;
        log_status!("pipeline", "Working directory {}", self.work);
        self.reached(ctx, PipelineState::WorkingDirCreated);

        ctx.attempting = PipelineState::Qualified;
        log_status!(
            "pipeline",
            "Listing open pull requests of {} on {}",
            self.platform.repo(),
            self.platform.variant().name()
        );
        let open = self
            .platform
            .fetch_open_pull_requests(self.platform.timeout())?;
        let qualified = self.platform.qualify(&open, self.config.approvals);
        log_status!(
            "pipeline",
            "{} of {} open pull request(s) have at least {} approval(s)",
            qualified.len(),
            open.len(),
            self.config.approvals
        );
        ctx.report.qualified_pull_requests = qualified.clone();
        self.reached(ctx, PipelineState::Qualified);

        ctx.attempting = PipelineState::Assembled;
        let assembler = Assembler::new(self.executor, self.config, &self.work);
        let merged = assembler.merge_pull_requests(&self.platform.clone_url(), &qualified)?;
        ctx.report.merged_pull_requests = merged.merged;
        ctx.report.warnings.extend(merged.warnings);
        ctx.report.changed_files = merged.changed_files;
        if ctx.report.changed_files.is_empty() {
            ctx.report
                .warnings
                .push("no files changed in the qualified pull requests; nothing to deploy".to_string());
            self.reached(ctx, PipelineState::Assembled);
            return Ok(());
        }

        let package = assembler.build_package(&ctx.report.changed_files)?;
        ctx.report.warnings.extend(package.warnings);
        if let Some(manifest) = &package.manifest {
            ctx.report.deployed_flows = jobs::deployed_flows(manifest);
            if !ctx.report.deployed_flows.is_empty() {
                ctx.report.warnings.push(format!(
                    "deployed flows changed ({}): {}",
                    ctx.report.deployed_flows.join(", "),
                    jobs::FLOW_WARNING
                ));
            }
        }
        ctx.manifest = package.manifest;
        self.reached(ctx, PipelineState::Assembled);

        ctx.attempting = PipelineState::PreDeployRun;
        let script = StagePrecondition::FileExists(self.work.path(workdir::PRE_DEPLOY_BASH_SCRIPT));
        self.gated(ctx, "pre_deploy_sh", &script, |_| {
            predeploy::run_bash_hook(self.executor, &self.work)
        })?;
        self.reached(ctx, PipelineState::PreDeployRun);

        ctx.attempting = PipelineState::CodeDeployed;
        let code = StagePrecondition::FileExists(self.work.package_code_dir());
        self.gated(ctx, "deploy_code", &code, |ctx| {
            let deployer = ModuleDeployer::new(self.executor, self.config, &self.work);
            let target = deployer.resolve_module_path(self.platform.repo())?;
            let destination = deployer.deploy_code(&target, &self.work.package_code_dir())?;
            ctx.code_deployed = true;
            Ok(StageOutcome::done(destination, Vec::new()))
        })?;
        self.reached(ctx, PipelineState::CodeDeployed);

        ctx.attempting = PipelineState::DictionariesUpdated;
        self.gated(ctx, "update_dictionaries", &StagePrecondition::NonDevEnvironment, |_| {
            dictionaries::update(self.executor, self.config, &self.work, self.env)
        })?;
        let script = StagePrecondition::FileExists(self.work.path(workdir::PRE_DEPLOY_SAS_SCRIPT));
        self.gated(ctx, "pre_deploy_sas", &script, |_| {
            predeploy::run_sas_hook(self.executor, self.config, &self.work, self.env)
        })?;
        self.reached(ctx, PipelineState::DictionariesUpdated);

        ctx.attempting = PipelineState::MetadataExported;
        self.gated(ctx, "export_metadata", &StagePrecondition::ManifestHasEntries, |ctx| {
            match &ctx.manifest {
                Some(manifest) => metadata::export(self.executor, self.config, &self.work, manifest),
                None => Ok(StageOutcome::skipped("no manifest")),
            }
        })?;
        self.reached(ctx, PipelineState::MetadataExported);

        ctx.attempting = PipelineState::MetadataImported;
        let package = StagePrecondition::FileExists(self.work.spk(workdir::METADATA_SPK));
        self.gated(ctx, "import_metadata", &package, |_| {
            metadata::import(self.executor, self.config, &self.work)
        })?;
        self.reached(ctx, PipelineState::MetadataImported);

        ctx.attempting = PipelineState::JobsRedeployed;
        self.gated(ctx, "redeploy_jobs", &StagePrecondition::ManifestHasJobs, |ctx| {
            match &ctx.manifest {
                Some(manifest) => jobs::redeploy(self.executor, self.config, &self.work, manifest),
                None => Ok(StageOutcome::skipped("no manifest")),
            }
        })?;
        self.reached(ctx, PipelineState::JobsRedeployed);

        ctx.attempting = PipelineState::RemoteMerged;
        self.gated(ctx, "merge_remote", &StagePrecondition::RemoteMergeRequested, |ctx| {
            let ids = self.platform.merge_all(&ctx.report.merged_pull_requests)?;
            let detail = format!("{} pull request(s) merged on the platform", ids.len());
            ctx.report.remotely_merged = ids;
            Ok(StageOutcome::done(detail, Vec::new()))
        })?;
        self.reached(ctx, PipelineState::RemoteMerged);

        Ok(())
    }

    fn reached(&self, ctx: &mut RunContext, state: PipelineState) {
        ctx.report.state = state;
        log_status!("pipeline", "-> {:?}", state);
    }

    /// Reason the stage should be skipped, or `None` when it should run.
    pub fn evaluate(
        &self,
        precondition: &StagePrecondition,
        manifest: Option<&MetadataManifest>,
        merged: &[PullRequest],
    ) -> Result<Option<String>> {
        let skip = match precondition {
            StagePrecondition::FileExists(path) => (!self.executor.exists(path)?)
                .then(|| format!("{} not present", workdir_relative(&self.work, path))),
            StagePrecondition::NonDevEnvironment => {
                (self.env == Environment::Dev).then(|| "not run on DEV".to_string())
            }
            StagePrecondition::ManifestHasEntries => match manifest {
                Some(m) if !m.is_empty() => None,
                Some(_) => Some(format!("{} is empty", workdir::META_FILE)),
                None => Some(format!("{} not present", workdir::META_FILE)),
            },
            StagePrecondition::ManifestHasJobs => match manifest {
                Some(m) if m.has_jobs() => None,
                _ => Some("no jobs in the manifest".to_string()),
            },
            StagePrecondition::RemoteMergeRequested => {
                if !self.options.merge_after_deploy {
                    Some("--merge not requested".to_string())
                } else if self.env != Environment::Prod {
                    Some(format!("--merge is ignored on {}", self.env))
                } else if merged.is_empty() {
                    Some("no pull requests were merged locally".to_string())
                } else {
                    None
                }
            }
        };
        Ok(skip)
    }

    fn gated<F>(
        &self,
        ctx: &mut RunContext,
        step: &'static str,
        precondition: &StagePrecondition,
        stage: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut RunContext) -> Result<StageOutcome>,
    {
        let skip = self.evaluate(
            precondition,
            ctx.manifest.as_ref(),
            &ctx.report.merged_pull_requests,
        );
        let result = match skip {
            Ok(Some(reason)) => Ok(StageOutcome::skipped(reason)),
            Ok(None) => stage(ctx),
            Err(err) => Err(err),
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                ctx.report.stages.push(StageRecord {
                    stage: ctx.attempting,
                    step,
                    status: StageStatus::Failed,
                    detail: Some(err.message.clone()),
                });
                return Err(err);
            }
        };

        let record = match outcome {
            StageOutcome::Done {
                detail,
                diagnostics,
            } => {
                ctx.report.diagnostics.extend(diagnostics);
                StageRecord {
                    stage: ctx.attempting,
                    step,
                    status: StageStatus::Done,
                    detail,
                }
            }
            StageOutcome::Skipped { reason } => {
                log_status!("pipeline", "{} skipped: {}", step, reason);
                StageRecord {
                    stage: ctx.attempting,
                    step,
                    status: StageStatus::Skipped,
                    detail: Some(reason),
                }
            }
        };
        ctx.report.stages.push(record);
        Ok(())
    }
}

fn step_name(state: PipelineState) -> &'static str {
    match state {
        PipelineState::WorkingDirCreated => "create_working_dir",
        PipelineState::Qualified => "qualify_pull_requests",
        PipelineState::Assembled => "assemble_package",
        PipelineState::PreDeployRun => "pre_deploy_sh",
        PipelineState::CodeDeployed => "deploy_code",
        PipelineState::DictionariesUpdated => "update_dictionaries",
        PipelineState::MetadataExported => "export_metadata",
        PipelineState::MetadataImported => "import_metadata",
        PipelineState::JobsRedeployed => "redeploy_jobs",
        PipelineState::RemoteMerged => "merge_remote",
        _ => "pipeline",
    }
}

fn workdir_relative<'p>(work: &WorkingDirectory, path: &'p str) -> &'p str {
    path.strip_prefix(work.root())
        .map(|rest| rest.trim_start_matches('/'))
        .unwrap_or(path)
}
