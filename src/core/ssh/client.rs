use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

use super::{CommandOutput, RemoteExecutor, TextEncoding};
use crate::config::DeployConfig;
use crate::error::{
    Error, RemoteCommandFailedDetails, RemoteCommandTimeoutDetails, Result, TargetDetails,
};
use crate::utils::shell;

/// Exit status `timeout(1)` uses when the wrapped command ran out of time.
const TIMEOUT_EXIT_CODE: i32 = 124;

pub struct SshClient {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<String>,
    /// When true, all commands run locally instead of over SSH.
    /// Set automatically when the host is localhost/127.0.0.1/::1.
    pub is_local: bool,
    /// Applied to commands that do not pass their own timeout.
    pub default_timeout: Option<Duration>,
}

impl SshClient {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        let host = host.into();
        let is_local = is_local_host(&host);
        Self {
            host,
            user: user.into(),
            port: 22,
            identity_file: None,
            is_local,
            default_timeout: None,
        }
    }

    pub fn from_config(config: &DeployConfig) -> Result<Self> {
        let identity_file = match &config.identity_file {
            Some(path) if !path.is_empty() => {
                let expanded = shellexpand::tilde(path).to_string();
                if !std::path::Path::new(&expanded).exists() {
                    return Err(Error::ssh_identity_file_not_found(expanded));
                }
                Some(expanded)
            }
            _ => None,
        };

        let mut client = Self::new(config.ssh_host.clone(), config.deploy_user.clone());
        client.port = config.ssh_port;
        client.identity_file = identity_file;
        client.default_timeout = config.command_timeout_secs.map(Duration::from_secs);

        if client.is_local {
            log_status!("ssh", "Host '{}' is local, using local execution", client.host);
        }

        Ok(client)
    }

    fn build_ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(identity_file) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity_file.clone());
        }

        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }

        // Never prompt, and give up on stalled connections.
        args.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ]);

        args.push(format!("{}@{}", self.user, self.host));
        args.push(command.to_string());

        args
    }

    fn execute_once(&self, command: &str, stdin: Option<&[u8]>) -> CommandOutput {
        log_status!("ssh", "[{}]$ {}", self.describe(), command);

        let cmd = if self.is_local {
            shell_command(command)
        } else {
            let mut cmd = Command::new("ssh");
            cmd.args(self.build_ssh_args(command));
            cmd
        };

        run_captured(cmd, stdin)
    }

    fn check(
        &self,
        command: &str,
        output: CommandOutput,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        if output.success {
            return Ok(output);
        }

        if let Some(limit) = timeout {
            if output.exit_code == TIMEOUT_EXIT_CODE {
                return Err(Error::remote_command_timeout(RemoteCommandTimeoutDetails {
                    command: command.to_string(),
                    timeout_secs: limit.as_secs(),
                    stdout: output.stdout,
                    stderr: output.stderr,
                    target: self.target(),
                }));
            }
        }

        Err(Error::remote_command_failed(RemoteCommandFailedDetails {
            command: command.to_string(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            target: self.target(),
        }))
    }

    fn run_checked(&self, command: &str) -> Result<CommandOutput> {
        self.run(command, None, None)
    }
}

impl RemoteExecutor for SshClient {
    fn target(&self) -> TargetDetails {
        TargetDetails {
            host: Some(self.host.clone()),
            user: Some(self.user.clone()),
        }
    }

    fn run(
        &self,
        command: &str,
        cwd: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        let timeout = timeout.or(self.default_timeout);
        let wrapped = wrap_command(command, cwd, timeout);
        let output = self.execute_once(&wrapped, None);
        self.check(command, output, timeout)
    }

    fn exists(&self, path: &str) -> Result<bool> {
        let command = format!("test -e {}", shell::quote_path(path));
        let output = self.execute_once(&command, None);
        match output.exit_code {
            0 => Ok(true),
            1 => Ok(false),
            _ => self.check(&command, output, None).map(|_| false),
        }
    }

    fn mkdir_p(&self, path: &str) -> Result<()> {
        self.run_checked(&format!("mkdir -p {}", shell::quote_path(path)))
            .map(|_| ())
    }

    fn remove_all(&self, path: &str) -> Result<()> {
        self.run_checked(&format!("rm -rf {}", shell::quote_path(path)))
            .map(|_| ())
    }

    fn write_file(&self, path: &str, content: &str, encoding: TextEncoding) -> Result<()> {
        let bytes = encoding.encode(content)?;
        let command = format!("cat > {}", shell::quote_path(path));
        let output = self.execute_once(&command, Some(&bytes));
        self.check(&command, output, None).map(|_| ())
    }

    fn read_file(&self, path: &str, encoding: TextEncoding) -> Result<String> {
        let command = format!("cat {}", shell::quote_path(path));
        log_status!("ssh", "[{}]$ {}", self.describe(), command);

        let mut cmd = if self.is_local {
            shell_command(&command)
        } else {
            let mut cmd = Command::new("ssh");
            cmd.args(self.build_ssh_args(&command));
            cmd
        };

        // Decode from raw bytes so Latin-1 files survive the trip.
        let raw = cmd.output().map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("read {}", path)))
        })?;
        if !raw.status.success() {
            let output = CommandOutput::failed(
                raw.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&raw.stdout).to_string(),
                String::from_utf8_lossy(&raw.stderr).to_string(),
            );
            return self.check(&command, output, None).map(|_| String::new());
        }
        Ok(encoding.decode(&raw.stdout))
    }

    fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        let output = self.run_checked(&format!("ls -1A {}", shell::quote_path(path)))?;
        let mut names: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    fn copy_recursive(&self, src: &str, dst: &str) -> Result<()> {
        self.run_checked(&format!(
            "cp -r {} {}",
            shell::quote_path(src),
            shell::quote_path(dst)
        ))
        .map(|_| ())
    }

    fn make_executable(&self, path: &str) -> Result<()> {
        self.run_checked(&format!("chmod +x {}", shell::quote_path(path)))
            .map(|_| ())
    }
}

/// Apply working directory and timeout to a command line.
fn wrap_command(command: &str, cwd: Option<&str>, timeout: Option<Duration>) -> String {
    let inner = match cwd {
        Some(dir) => format!("cd {} && {}", shell::quote_path(dir), command),
        None => command.to_string(),
    };

    match timeout {
        Some(limit) => format!(
            "timeout {} sh -c {}",
            limit.as_secs().max(1),
            shell::quote_path(&inner)
        ),
        None => inner,
    }
}

fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", command]);
    cmd
}

fn run_captured(mut cmd: Command, stdin: Option<&[u8]>) -> CommandOutput {
    let Some(input) = stdin else {
        return match cmd.output() {
            Ok(out) => CommandOutput {
                stdout: String::from_utf8_lossy(&out.stdout).to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).to_string(),
                success: out.status.success(),
                exit_code: out.status.code().unwrap_or(-1),
            },
            Err(e) => CommandOutput::failed(-1, "", format!("SSH error: {}", e)),
        };
    };

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return CommandOutput::failed(-1, "", format!("SSH error: {}", e)),
    };

    if let Some(mut handle) = child.stdin.take() {
        if let Err(e) = handle.write_all(input) {
            let _ = child.kill();
            return CommandOutput::failed(-1, "", format!("Failed to stream stdin: {}", e));
        }
    }

    match child.wait_with_output() {
        Ok(out) => CommandOutput {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
        },
        Err(e) => CommandOutput::failed(-1, "", format!("SSH error: {}", e)),
    }
}

pub fn is_local_host(host: &str) -> bool {
    matches!(
        host.trim().to_ascii_lowercase().as_str(),
        "localhost" | "127.0.0.1" | "::1"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_variants_are_local() {
        assert!(is_local_host("localhost"));
        assert!(is_local_host("127.0.0.1"));
        assert!(is_local_host("::1"));
        assert!(!is_local_host("sas-prod-01"));
    }

    #[test]
    fn ssh_args_carry_batch_options_and_port() {
        let mut client = SshClient::new("sas01", "deploy");
        client.port = 2222;
        client.identity_file = Some("/home/deploy/.ssh/id_ed25519".to_string());

        let args = client.build_ssh_args("ls");
        assert_eq!(args[0], "-i");
        assert!(args.contains(&"-p".to_string()));
        assert!(args.contains(&"2222".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(args[args.len() - 2], "deploy@sas01");
        assert_eq!(args[args.len() - 1], "ls");
    }

    #[test]
    fn wrap_command_applies_cwd_and_timeout() {
        assert_eq!(wrap_command("ls", None, None), "ls");
        assert_eq!(
            wrap_command("./pre_deploy.sh", Some("/srv/work"), None),
            "cd '/srv/work' && ./pre_deploy.sh"
        );
        assert_eq!(
            wrap_command("ls", Some("/srv"), Some(Duration::from_secs(30))),
            "timeout 30 sh -c 'cd '\\''/srv'\\'' && ls'"
        );
    }

    #[test]
    fn local_failure_keeps_stdout_and_stderr() {
        let client = SshClient::new("localhost", "me");
        let err = client
            .run("printf 'out\\n'; printf 'err\\n' >&2; exit 3", None, None)
            .unwrap_err();

        assert_eq!(err.code, crate::error::ErrorCode::RemoteCommandFailed);
        assert_eq!(err.details["exitCode"], 3);
        assert_eq!(err.details["stdout"], "out\n");
        assert_eq!(err.details["stderr"], "err\n");
    }

    #[test]
    fn local_timeout_maps_to_timeout_error() {
        let client = SshClient::new("localhost", "me");
        let err = client
            .run("sleep 5", None, Some(Duration::from_secs(1)))
            .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::RemoteCommandTimeout);
    }

    #[test]
    fn local_file_operations_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().to_string_lossy().to_string();
        let client = SshClient::new("localhost", "me");

        let nested = format!("{}/a/b", base);
        client.mkdir_p(&nested).unwrap();
        assert!(client.exists(&nested).unwrap());

        let file = format!("{}/note.txt", nested);
        client
            .write_file(&file, "line one\nline two\n", TextEncoding::Utf8)
            .unwrap();
        assert_eq!(
            client.read_file(&file, TextEncoding::Utf8).unwrap(),
            "line one\nline two\n"
        );
        assert_eq!(client.list_dir(&nested).unwrap(), vec!["note.txt".to_string()]);

        client.remove_all(&format!("{}/a", base)).unwrap();
        assert!(!client.exists(&nested).unwrap());
    }

    #[test]
    fn local_read_decodes_latin1_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("slownik.txt");
        std::fs::write(&file, [b'Z', 0xF3, b'l', b'w']).unwrap();
        let client = SshClient::new("127.0.0.1", "me");

        let content = client
            .read_file(&file.to_string_lossy(), TextEncoding::Latin1)
            .unwrap();
        assert_eq!(content, "Z\u{f3}lw");
        assert_eq!(client.describe(), "me@127.0.0.1");
    }

    #[test]
    fn local_read_of_missing_file_is_a_remote_failure() {
        let dir = tempfile::tempdir().unwrap();
        let client = SshClient::new("localhost", "me");
        let missing = dir.path().join("absent.log");

        let err = client
            .read_file(&missing.to_string_lossy(), TextEncoding::Utf8)
            .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::RemoteCommandFailed);
    }
}
