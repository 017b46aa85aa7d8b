use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use super::{CommandOutput, RemoteExecutor, TextEncoding};
use crate::error::{Error, RemoteCommandFailedDetails, Result, TargetDetails};

/// Fixed hash returned for `git merge-base` when nothing scripted overrides it.
const MOCK_MERGE_BASE: &str = "abc123def456";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub command: String,
    pub cwd: Option<String>,
}

struct ScriptedResponse {
    pattern: String,
    output: CommandOutput,
}

/// Executor that simulates the deployment host on the local filesystem.
///
/// Remote absolute paths are re-rooted under `base_dir`. File operations act
/// on real local files; commands are recorded and answered from a script
/// (first substring match wins), falling back to a minimal git simulation
/// and plain success.
pub struct MockExecutor {
    base_dir: PathBuf,
    script: Mutex<Vec<ScriptedResponse>>,
    commands: Mutex<Vec<RecordedCommand>>,
}

impl MockExecutor {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|e| {
            Error::internal_io(e.to_string(), Some("create mock base directory".to_string()))
        })?;
        log_status!("mock", "Executor rooted at {}", base_dir.display());

        Ok(Self {
            base_dir,
            script: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
        })
    }

    /// Answer every command containing `pattern` with `output`.
    pub fn respond(&self, pattern: impl Into<String>, output: CommandOutput) {
        if let Ok(mut script) = self.script.lock() {
            script.push(ScriptedResponse {
                pattern: pattern.into(),
                output,
            });
        }
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.commands
            .lock()
            .map(|commands| commands.clone())
            .unwrap_or_default()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.commands()
            .iter()
            .any(|recorded| recorded.command.contains(pattern))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Local location backing a remote path.
    pub fn local_path(&self, remote: &str) -> PathBuf {
        self.base_dir.join(remote.trim_start_matches('/'))
    }

    fn scripted(&self, command: &str) -> Option<CommandOutput> {
        let script = self.script.lock().ok()?;
        script
            .iter()
            .find(|entry| command.contains(&entry.pattern))
            .map(|entry| entry.output.clone())
    }

    fn simulate_git(&self, command: &str, cwd: Option<&str>) -> Result<CommandOutput> {
        if command.contains(" clone ") {
            // Last token is the destination directory.
            if let Some(dest) = command.split_whitespace().last() {
                let dest = dest.trim_matches(|c| c == '\'' || c == '"');
                let local = match cwd {
                    Some(dir) => self.local_path(dir).join(dest),
                    None => self.local_path(dest),
                };
                fs::create_dir_all(&local).map_err(|e| {
                    Error::internal_io(e.to_string(), Some("simulate git clone".to_string()))
                })?;
            }
            return Ok(CommandOutput::ok(""));
        }

        if command.contains("merge-base") {
            return Ok(CommandOutput::ok(format!("{}\n", MOCK_MERGE_BASE)));
        }

        Ok(CommandOutput::ok(""))
    }

    fn failure(&self, command: &str, output: CommandOutput) -> Error {
        Error::remote_command_failed(RemoteCommandFailedDetails {
            command: command.to_string(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            target: self.target(),
        })
    }

    fn io_failure(&self, operation: &str, path: &str, err: std::io::Error) -> Error {
        self.failure(
            &format!("{} {}", operation, path),
            CommandOutput::failed(1, "", err.to_string()),
        )
    }
}

impl RemoteExecutor for MockExecutor {
    fn target(&self) -> TargetDetails {
        TargetDetails {
            host: Some("mock_host".to_string()),
            user: Some("mock_user".to_string()),
        }
    }

    fn run(
        &self,
        command: &str,
        cwd: Option<&str>,
        _timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        log_status!("mock", "[{}]$ {}", self.describe(), command);
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(RecordedCommand {
                command: command.to_string(),
                cwd: cwd.map(str::to_string),
            });
        }

        let output = match self.scripted(command) {
            Some(output) => output,
            None if command.contains("git ") => self.simulate_git(command, cwd)?,
            None => CommandOutput::ok(""),
        };

        if output.success {
            Ok(output)
        } else {
            Err(self.failure(command, output))
        }
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.local_path(path).exists())
    }

    fn mkdir_p(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.local_path(path)).map_err(|e| self.io_failure("mkdir -p", path, e))
    }

    fn remove_all(&self, path: &str) -> Result<()> {
        let local = self.local_path(path);
        let result = if local.is_dir() {
            fs::remove_dir_all(&local)
        } else if local.exists() {
            fs::remove_file(&local)
        } else {
            Ok(())
        };
        result.map_err(|e| self.io_failure("rm -rf", path, e))
    }

    fn write_file(&self, path: &str, content: &str, encoding: TextEncoding) -> Result<()> {
        let bytes = encoding.encode(content)?;
        let local = self.local_path(path);
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_failure("write", path, e))?;
        }
        fs::write(&local, bytes).map_err(|e| self.io_failure("write", path, e))
    }

    fn read_file(&self, path: &str, encoding: TextEncoding) -> Result<String> {
        let bytes = fs::read(self.local_path(path)).map_err(|e| self.io_failure("cat", path, e))?;
        Ok(encoding.decode(&bytes))
    }

    fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        let entries =
            fs::read_dir(self.local_path(path)).map_err(|e| self.io_failure("ls -1A", path, e))?;
        let mut names: Vec<String> = entries
            .flatten()
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    fn copy_recursive(&self, src: &str, dst: &str) -> Result<()> {
        copy_local(&self.local_path(src), &self.local_path(dst))
            .map_err(|e| self.io_failure("cp -r", src, e))
    }

    fn make_executable(&self, path: &str) -> Result<()> {
        let local = self.local_path(path);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&local)
                .map_err(|e| self.io_failure("chmod +x", path, e))?
                .permissions();
            perms.set_mode(perms.mode() | 0o755);
            fs::set_permissions(&local, perms).map_err(|e| self.io_failure("chmod +x", path, e))?;
        }
        #[cfg(not(unix))]
        {
            if !local.exists() {
                return Err(self.failure(
                    &format!("chmod +x {}", path),
                    CommandOutput::failed(1, "", "No such file or directory"),
                ));
            }
        }
        Ok(())
    }
}

fn copy_local(src: &Path, dst: &Path) -> std::io::Result<()> {
    if src.is_dir() {
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_local(&entry.path(), &dst.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn remote_paths_are_rooted_under_base_dir() {
        let dir = tempdir().unwrap();
        let mock = MockExecutor::new(dir.path()).unwrap();

        mock.mkdir_p("/runtime/deploy_1/logs").unwrap();
        assert!(dir.path().join("runtime/deploy_1/logs").is_dir());
        assert!(mock.exists("/runtime/deploy_1/logs").unwrap());
        assert!(!mock.exists("/runtime/deploy_2").unwrap());
    }

    #[test]
    fn identity_is_the_simulated_target() {
        let dir = tempdir().unwrap();
        let mock = MockExecutor::new(dir.path()).unwrap();
        assert_eq!(mock.describe(), "mock_user@mock_host");
    }

    #[test]
    fn scripted_failure_surfaces_output_verbatim() {
        let dir = tempdir().unwrap();
        let mock = MockExecutor::new(dir.path()).unwrap();
        mock.respond(
            "git merge",
            CommandOutput::failed(1, "CONFLICT (content)\n", "Automatic merge failed\n"),
        );

        let err = mock
            .run("git merge --no-ff origin/feature", Some("/w/repo"), None)
            .unwrap_err();
        assert_eq!(err.details["stdout"], "CONFLICT (content)\n");
        assert_eq!(err.details["stderr"], "Automatic merge failed\n");
        assert!(mock.ran("git merge --no-ff"));
    }

    #[test]
    fn git_clone_creates_destination_directory() {
        let dir = tempdir().unwrap();
        let mock = MockExecutor::new(dir.path()).unwrap();

        mock.run("git clone --branch master ssh://x/repo.git repo", Some("/w"), None)
            .unwrap();
        assert!(mock.exists("/w/repo").unwrap());

        let base = mock.run("git merge-base HEAD origin/f", Some("/w/repo"), None).unwrap();
        assert_eq!(base.stdout.trim(), MOCK_MERGE_BASE);
    }

    #[test]
    fn copy_recursive_copies_trees() {
        let dir = tempdir().unwrap();
        let mock = MockExecutor::new(dir.path()).unwrap();
        mock.write_file("/w/repo/kody/a.sas", "data a; run;", TextEncoding::Utf8)
            .unwrap();

        mock.copy_recursive("/w/repo/kody", "/w/codes/kody").unwrap();
        assert_eq!(
            mock.read_file("/w/codes/kody/a.sas", TextEncoding::Utf8).unwrap(),
            "data a; run;"
        );
    }

    #[test]
    fn reading_a_missing_file_is_a_remote_failure() {
        let dir = tempdir().unwrap();
        let mock = MockExecutor::new(dir.path()).unwrap();
        let err = mock.read_file("/nope.txt", TextEncoding::Utf8).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::RemoteCommandFailed);
    }
}
