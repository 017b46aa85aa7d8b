pub type CmdResult<T> = deploy_manager::Result<(T, i32)>;

pub(crate) struct GlobalArgs {}

pub mod deploy;
pub mod errors;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        deploy_manager::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (deploy_manager::Result<serde_json::Value>, i32) {
    crate::tty::status("deploy-manager is working...");

    match command {
        crate::Commands::Deploy(args) => dispatch!(args, global, deploy),
        crate::Commands::Errors(args) => dispatch!(args, global, errors),
    }
}
