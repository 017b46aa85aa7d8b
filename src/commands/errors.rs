use clap::Args;
use serde::Serialize;

use deploy_manager::error::codes;
use deploy_manager::error::help::{self, ErrorHelp, ErrorHelpSummary};

use super::CmdResult;

#[derive(Args)]
pub struct ErrorsArgs {
    /// Explain one error code (e.g. platform.merge_conflict)
    pub code: Option<String>,
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum ErrorsOutput {
    List { errors: Vec<ErrorHelpSummary> },
    Explain(ErrorHelp),
}

pub fn run(args: ErrorsArgs, _global: &super::GlobalArgs) -> CmdResult<ErrorsOutput> {
    let Some(raw) = args.code else {
        return Ok((ErrorsOutput::List { errors: help::list() }, 0));
    };

    let code = codes::parse_code(raw.trim()).ok_or_else(|| {
        deploy_manager::Error::validation_invalid_argument(
            "code",
            format!("Unknown error code '{}'", raw),
            Some(
                codes::all_codes()
                    .iter()
                    .map(|c| c.as_str().to_string())
                    .collect(),
            ),
        )
    })?;

    Ok((ErrorsOutput::Explain(help::explain(code)), 0))
}
