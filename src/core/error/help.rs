use super::{codes, ErrorCode, Hint};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorHelpSummary {
    pub code: String,
    pub summary: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorHelp {
    pub code: String,
    pub summary: String,
    pub details_schema: serde_json::Value,
    pub hints: Vec<Hint>,
}

pub fn list() -> Vec<ErrorHelpSummary> {
    codes::all_codes()
        .iter()
        .copied()
        .map(|code| {
            let help = explain(code);
            ErrorHelpSummary {
                code: help.code,
                summary: help.summary,
            }
        })
        .collect()
}

fn help(
    code: ErrorCode,
    summary: &str,
    details_schema: serde_json::Value,
    hint: Option<&str>,
) -> ErrorHelp {
    ErrorHelp {
        code: code.as_str().to_string(),
        summary: summary.to_string(),
        details_schema,
        hints: hint
            .map(|message| {
                vec![Hint {
                    message: message.to_string(),
                }]
            })
            .unwrap_or_default(),
    }
}

pub fn explain(code: ErrorCode) -> ErrorHelp {
    use serde_json::json;

    match code {
        ErrorCode::ConfigMissingKey => help(
            code,
            "Missing required configuration key or file",
            json!({"key":"string","path":"string?"}),
            Some("Check common.json, the environment file and local.json in the config directory"),
        ),
        ErrorCode::ConfigInvalidJson => help(
            code,
            "Configuration JSON is invalid",
            json!({"path":"string","error":"string"}),
            Some("Fix JSON syntax in the referenced file"),
        ),
        ErrorCode::ConfigInvalidValue => help(
            code,
            "Configuration value is invalid",
            json!({"key":"string","value":"string?","problem":"string"}),
            None,
        ),
        ErrorCode::ValidationInvalidArgument => help(
            code,
            "Command-line argument is invalid",
            json!({"field":"string","problem":"string","tried":"string[]?"}),
            None,
        ),
        ErrorCode::SshIdentityFileNotFound => help(
            code,
            "Configured SSH identity file does not exist",
            json!({"identityFile":"string"}),
            None,
        ),
        ErrorCode::RemoteCommandFailed => help(
            code,
            "Remote command exited with a non-zero status",
            json!({"command":"string","exitCode":"number","stdout":"string","stderr":"string","target":{"host":"string?","user":"string?"}}),
            Some("Inspect stdout/stderr and the stage log in the working directory"),
        ),
        ErrorCode::RemoteCommandTimeout => help(
            code,
            "Remote command exceeded its timeout",
            json!({"command":"string","timeoutSecs":"number","stdout":"string","stderr":"string","target":{"host":"string?","user":"string?"}}),
            None,
        ),
        ErrorCode::PlatformApiError => help(
            code,
            "Pull-request platform returned a non-success status",
            json!({"method":"string","url":"string","status":"number","body":"string","attempts":"number"}),
            None,
        ),
        ErrorCode::PlatformAuthFailed => help(
            code,
            "Pull-request platform rejected the bearer token",
            json!({"status":"number","url":"string"}),
            Some("Refresh BITBUCKET_API_TOKEN"),
        ),
        ErrorCode::PlatformMergeConflict => help(
            code,
            "Pull request is out of date or conflicts and must be merged manually",
            json!({"prId":"number","version":"number?","message":"string"}),
            Some("Resolve the pull request manually on the hosting platform"),
        ),
        ErrorCode::PlatformRequestFailed => help(
            code,
            "HTTP request to the pull-request platform could not be sent",
            json!({"url":"string","error":"string"}),
            None,
        ),
        ErrorCode::ModuleNotRegistered => help(
            code,
            "Module has no deployment path in the module registry",
            json!({"module":"string","registry":"string","log":"string?"}),
            Some("Register the module path before deploying it"),
        ),
        ErrorCode::AssemblyFailed => help(
            code,
            "Deployment package could not be assembled",
            json!({"prId":"number?","path":"string?","output":"string?"}),
            Some("The working directory is kept for inspection"),
        ),
        ErrorCode::SasProgramFailed => help(
            code,
            "Batch SAS program reported errors",
            json!({"program":"string","log":"string","errors":"string[]"}),
            None,
        ),
        ErrorCode::InternalIoError => help(
            code,
            "Local IO failure",
            json!({"error":"string","context":"string?"}),
            None,
        ),
        ErrorCode::InternalJsonError => help(
            code,
            "JSON serialization failure",
            json!({"error":"string","context":"string?"}),
            None,
        ),
        ErrorCode::InternalUnexpected => help(
            code,
            "Unexpected internal error",
            json!({"error":"string"}),
            None,
        ),
    }
}
