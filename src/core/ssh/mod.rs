//! Remote execution capability.
//!
//! Every stage talks to the deployment host through [`RemoteExecutor`]. The
//! production implementation shells out to the system `ssh` client; the mock
//! implementation maps remote paths onto a local directory.

use std::time::Duration;

use serde::Serialize;

use crate::error::{Error, Result, TargetDetails};

mod client;
mod mock;

pub use client::{is_local_host, SshClient};
pub use mock::{MockExecutor, RecordedCommand};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
            exit_code: 0,
        }
    }

    pub fn failed(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            success: false,
            exit_code,
        }
    }
}

/// Text encoding used when moving file contents to and from the remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    /// ISO-8859-1, used by older SAS sessions.
    Latin1,
}

impl TextEncoding {
    pub fn encode(&self, content: &str) -> Result<Vec<u8>> {
        match self {
            TextEncoding::Utf8 => Ok(content.as_bytes().to_vec()),
            TextEncoding::Latin1 => content
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| {
                        Error::validation_invalid_argument(
                            "content",
                            format!("Character '{}' cannot be encoded as Latin-1", c),
                            None,
                        )
                    })
                })
                .collect(),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).to_string(),
            TextEncoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        }
    }
}

/// Commands and file operations against one remote host/user identity.
///
/// Failures (non-zero exit, transport failure, missing required path) come
/// back as `remote.command_failed` with the captured output. Implementations
/// never retry; callers own retry decisions.
pub trait RemoteExecutor {
    /// Host/user identity used in error details and logs.
    fn target(&self) -> TargetDetails;

    fn run(&self, command: &str, cwd: Option<&str>, timeout: Option<Duration>)
        -> Result<CommandOutput>;

    fn exists(&self, path: &str) -> Result<bool>;

    /// Create a directory and any missing parents.
    fn mkdir_p(&self, path: &str) -> Result<()>;

    /// Remove a file or directory tree. Missing paths are not an error.
    fn remove_all(&self, path: &str) -> Result<()>;

    fn write_file(&self, path: &str, content: &str, encoding: TextEncoding) -> Result<()>;

    fn read_file(&self, path: &str, encoding: TextEncoding) -> Result<String>;

    /// Entry names (not paths) of a directory, sorted.
    fn list_dir(&self, path: &str) -> Result<Vec<String>>;

    /// Copy `src` to `dst`; `dst` names the copy itself and must not exist yet.
    fn copy_recursive(&self, src: &str, dst: &str) -> Result<()>;

    fn make_executable(&self, path: &str) -> Result<()>;

    fn describe(&self) -> String {
        let target = self.target();
        format!(
            "{}@{}",
            target.user.unwrap_or_default(),
            target.host.unwrap_or_default()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin1_round_trips_polish_free_text() {
        let bytes = TextEncoding::Latin1.encode("caf\u{e9}").unwrap();
        assert_eq!(bytes, vec![b'c', b'a', b'f', 0xe9]);
        assert_eq!(TextEncoding::Latin1.decode(&bytes), "caf\u{e9}");
    }

    #[test]
    fn latin1_rejects_characters_outside_the_range() {
        let err = TextEncoding::Latin1.encode("\u{15b}rodowisko").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ValidationInvalidArgument);
    }
}
