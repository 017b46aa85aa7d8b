use clap::{Parser, Subcommand};

use commands::GlobalArgs;

mod commands;
mod tty;

use commands::{deploy, errors};
use deploy_manager::output;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "deploy-manager")]
#[command(version = VERSION)]
#[command(about = "Promote approved pull requests through a staged SAS deployment")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Qualify, merge, assemble and deploy a repository to an environment
    Deploy(deploy::DeployArgs),
    /// List error codes, or explain one
    Errors(errors::ErrorsArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let global = GlobalArgs {};

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    if output::print_json_result(json_result, exit_code).is_err() {
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
