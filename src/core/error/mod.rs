use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod codes;
pub mod help;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationInvalidArgument,

    SshIdentityFileNotFound,

    RemoteCommandFailed,
    RemoteCommandTimeout,

    PlatformApiError,
    PlatformAuthFailed,
    PlatformMergeConflict,
    PlatformRequestFailed,

    ModuleNotRegistered,
    AssemblyFailed,
    SasProgramFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::SshIdentityFileNotFound => "ssh.identity_file_not_found",

            ErrorCode::RemoteCommandFailed => "remote.command_failed",
            ErrorCode::RemoteCommandTimeout => "remote.command_timeout",

            ErrorCode::PlatformApiError => "platform.api_error",
            ErrorCode::PlatformAuthFailed => "platform.auth_failed",
            ErrorCode::PlatformMergeConflict => "platform.merge_conflict",
            ErrorCode::PlatformRequestFailed => "platform.request_failed",

            ErrorCode::ModuleNotRegistered => "module.not_registered",
            ErrorCode::AssemblyFailed => "assembly.failed",
            ErrorCode::SasProgramFailed => "sas.program_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidJsonDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommandFailedDetails {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub target: TargetDetails,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommandTimeoutDetails {
    pub command: String,
    pub timeout_secs: u64,
    pub stdout: String,
    pub stderr: String,
    pub target: TargetDetails,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformApiErrorDetails {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub body: String,
    pub attempts: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeConflictDetails {
    pub pr_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleNotRegisteredDetails {
    pub module: String,
    pub registry: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyFailedDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SasProgramFailedDetails {
    pub program: String,
    pub log: String,
    pub errors: Vec<String>,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.clone(),
            tried,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            format!("Invalid argument: {}", problem),
            details,
        )
    }

    pub fn ssh_identity_file_not_found(identity_file: impl Into<String>) -> Self {
        let identity_file = identity_file.into();
        Self::new(
            ErrorCode::SshIdentityFileNotFound,
            format!("SSH identity file not found: {}", identity_file),
            serde_json::json!({ "identityFile": identity_file }),
        )
    }

    pub fn remote_command_failed(details: RemoteCommandFailedDetails) -> Self {
        let message = format!(
            "Remote command failed with exit code {}: {}",
            details.exit_code, details.command
        );
        Self::new(ErrorCode::RemoteCommandFailed, message, to_details(details))
    }

    pub fn remote_command_timeout(details: RemoteCommandTimeoutDetails) -> Self {
        let message = format!(
            "Remote command timed out after {}s: {}",
            details.timeout_secs, details.command
        );
        Self::new(ErrorCode::RemoteCommandTimeout, message, to_details(details))
    }

    pub fn platform_api_error(details: PlatformApiErrorDetails) -> Self {
        let message = format!(
            "Platform API returned HTTP {} for {} {}",
            details.status, details.method, details.url
        );
        let retryable = matches!(details.status, 502..=504);
        let mut err = Self::new(ErrorCode::PlatformApiError, message, to_details(details));
        err.retryable = Some(retryable);
        err
    }

    pub fn platform_auth_failed(status: u16, url: impl Into<String>) -> Self {
        let url = url.into();
        let mut err = Self::new(
            ErrorCode::PlatformAuthFailed,
            format!("Platform rejected credentials (HTTP {})", status),
            serde_json::json!({ "status": status, "url": url }),
        )
        .with_hint("Check BITBUCKET_API_TOKEN or bitbucket_api_token in the configuration");
        err.retryable = Some(false);
        err
    }

    pub fn platform_merge_conflict(details: MergeConflictDetails) -> Self {
        let message = format!(
            "Pull request #{} could not be merged: {}",
            details.pr_id, details.message
        );
        let mut err = Self::new(ErrorCode::PlatformMergeConflict, message, to_details(details))
            .with_hint("Resolve the pull request manually on the hosting platform");
        err.retryable = Some(false);
        err
    }

    pub fn platform_request_failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        let url = url.into();
        let error = error.into();
        Self::new(
            ErrorCode::PlatformRequestFailed,
            format!("HTTP request failed: {}", error),
            serde_json::json!({ "url": url, "error": error }),
        )
    }

    pub fn module_not_registered(details: ModuleNotRegisteredDetails) -> Self {
        let message = format!(
            "Module '{}' has no path registered in {}",
            details.module, details.registry
        );
        Self::new(ErrorCode::ModuleNotRegistered, message, to_details(details))
            .with_hint("Register the module path before deploying it")
    }

    pub fn assembly_failed(message: impl Into<String>, details: AssemblyFailedDetails) -> Self {
        Self::new(ErrorCode::AssemblyFailed, message, to_details(details))
    }

    pub fn sas_program_failed(details: SasProgramFailedDetails) -> Self {
        let message = format!(
            "SAS program {} failed ({} error line(s) in {})",
            details.program,
            details.errors.len(),
            details.log
        );
        Self::new(ErrorCode::SasProgramFailed, message, to_details(details))
    }

    pub fn config_missing_key(key: impl Into<String>, path: Option<String>) -> Self {
        let key = key.into();
        let details = to_details(ConfigMissingKeyDetails {
            key: key.clone(),
            path,
        });

        Self::new(
            ErrorCode::ConfigMissingKey,
            format!("Missing required configuration key: {}", key),
            details,
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        let details = to_details(ConfigInvalidJsonDetails {
            path: path.into(),
            error: err.to_string(),
        });

        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            details,
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let key = key.into();
        let problem = problem.into();
        let details = to_details(ConfigInvalidValueDetails {
            key: key.clone(),
            value,
            problem: problem.clone(),
        });

        Self::new(
            ErrorCode::ConfigInvalidValue,
            format!("Invalid configuration value for '{}': {}", key, problem),
            details,
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalIoErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalIoError, "IO error", details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalJsonErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalJsonError, "JSON error", details)
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    /// True for errors that callers may retry without changing anything.
    pub fn is_retryable(&self) -> bool {
        self.retryable.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_command_failed_keeps_output_verbatim() {
        let err = Error::remote_command_failed(RemoteCommandFailedDetails {
            command: "git merge --no-ff origin/feature".to_string(),
            exit_code: 1,
            stdout: "  CONFLICT (content): Merge conflict in kody/a.sas\n".to_string(),
            stderr: "Automatic merge failed; fix conflicts\n".to_string(),
            target: TargetDetails {
                host: Some("sas01".to_string()),
                user: Some("deploy".to_string()),
            },
        });

        assert_eq!(err.code, ErrorCode::RemoteCommandFailed);
        assert_eq!(
            err.details["stdout"],
            "  CONFLICT (content): Merge conflict in kody/a.sas\n"
        );
        assert_eq!(err.details["stderr"], "Automatic merge failed; fix conflicts\n");
        assert_eq!(err.details["exitCode"], 1);
    }

    #[test]
    fn auth_and_conflict_errors_are_not_retryable() {
        let auth = Error::platform_auth_failed(401, "https://bitbucket.local/rest");
        assert_eq!(auth.retryable, Some(false));

        let conflict = Error::platform_merge_conflict(MergeConflictDetails {
            pr_id: 7,
            version: Some(3),
            message: "out of date".to_string(),
        });
        assert_eq!(conflict.retryable, Some(false));
        assert_eq!(conflict.details["prId"], 7);
        assert!(!conflict.hints.is_empty());
    }

    #[test]
    fn api_error_marks_gateway_statuses_retryable() {
        let err = Error::platform_api_error(PlatformApiErrorDetails {
            method: "GET".to_string(),
            url: "https://api.bitbucket.org/2.0/x".to_string(),
            status: 503,
            body: String::new(),
            attempts: 3,
        });
        assert!(err.is_retryable());

        let err = Error::platform_api_error(PlatformApiErrorDetails {
            method: "GET".to_string(),
            url: "https://api.bitbucket.org/2.0/x".to_string(),
            status: 404,
            body: String::new(),
            attempts: 1,
        });
        assert!(!err.is_retryable());
    }
}
