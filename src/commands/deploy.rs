use clap::Args;

use deploy_manager::config::{self, DeployConfig, Environment};
use deploy_manager::output::exit_code_for_error;
use deploy_manager::pipeline::{Pipeline, PipelineOptions, RunReport};
use deploy_manager::platform::PlatformClient;
use deploy_manager::ssh::{CommandOutput, MockExecutor, RemoteExecutor, SshClient, TextEncoding};
use deploy_manager::utils::remote_path;
use deploy_manager::workdir::{self, WorkingDirectory};

use super::CmdResult;

const MOCK_BASE_DIR: &str = "dm_mock";

#[derive(Args)]
pub struct DeployArgs {
    /// Repository (module) to deploy
    #[arg(short = 'r', long = "repo")]
    pub repo: String,

    /// Target environment: DEV, UAT or PROD
    #[arg(short = 'e', long = "env")]
    pub env: String,

    /// Merge the pull requests on the platform after a successful PROD run
    #[arg(long)]
    pub merge: bool,

    /// Run against a local simulated host and canned pull requests
    #[arg(long)]
    pub mock: bool,

    /// Configuration directory (default: $DEPLOY_MANAGER_CONFIG_DIR or ./configs)
    #[arg(long, value_name = "DIR")]
    pub config_dir: Option<String>,
}

pub fn run(args: DeployArgs, _global: &super::GlobalArgs) -> CmdResult<RunReport> {
    let env: Environment = args.env.parse()?;
    let repo = args.repo.trim();
    if repo.is_empty() {
        return Err(deploy_manager::Error::validation_invalid_argument(
            "repo",
            "Repository name must not be empty",
            None,
        ));
    }
    let options = PipelineOptions {
        merge_after_deploy: args.merge,
    };

    if args.mock {
        return run_mock(repo, env, options);
    }

    let config_dir = config::resolve_config_dir(args.config_dir.as_deref());
    let config = config::load(&config_dir, env)?;
    let executor = SshClient::from_config(&config)?;
    let platform = PlatformClient::from_config(&config, repo)?;
    let work = WorkingDirectory::unique(&config.runtime_base_dir()?);

    Ok(finish(
        Pipeline::new(&executor, &platform, &config, env, options, work).run(),
    ))
}

fn run_mock(repo: &str, env: Environment, options: PipelineOptions) -> CmdResult<RunReport> {
    let executor = MockExecutor::new(std::env::temp_dir().join(MOCK_BASE_DIR))?;
    let config = DeployConfig::mock();
    let platform = PlatformClient::mock(&config, repo);
    let work = WorkingDirectory::unique(&config.runtime_base_dir()?);
    seed_mock_host(&executor, &work, repo)?;

    deploy_manager::log_status!("mock", "Simulated host rooted at {}", executor.base_dir().display());
    Ok(finish(
        Pipeline::new(&executor, &platform, &config, env, options, work).run(),
    ))
}

/// One changed program in the checkout and a registered module path.
fn seed_mock_host(
    executor: &MockExecutor,
    work: &WorkingDirectory,
    repo: &str,
) -> deploy_manager::Result<()> {
    let program = format!("{}/{}_main.sas", workdir::REPO_CODES_DIR, repo);
    executor.respond("--name-status", CommandOutput::ok(format!("M\t{}\n", program)));
    executor.write_file(
        &remote_path::join(&work.repo_dir(), &program),
        "data _null_;\n  put 'mock deployment';\nrun;\n",
        TextEncoding::Utf8,
    )?;
    executor.write_file(
        &work.path(workdir::MODULE_PATH_FILE),
        &format!("/mock_runtime/modules/{}\n", repo),
        TextEncoding::Utf8,
    )
}

fn finish(report: RunReport) -> (RunReport, i32) {
    let exit_code = report
        .failure
        .as_ref()
        .map(|err| exit_code_for_error(err.code))
        .unwrap_or(0);
    (report, exit_code)
}
