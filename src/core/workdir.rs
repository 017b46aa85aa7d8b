//! Per-run working directory on the deployment host.

use chrono::{DateTime, Local};
use serde::Serialize;
use uuid::Uuid;

use crate::utils::remote_path;

pub const DEPLOY_DIR_PREFIX: &str = "deploy_";

pub const REPO_DIR: &str = "repo";
pub const CODES_DIR: &str = "codes";
/// Code directory name, both in the repository and in the package.
pub const REPO_CODES_DIR: &str = "kody";
/// Override fragments and other supplementary files.
pub const EXTRA_FILES_DIR: &str = "dodatkowe_pliki";
pub const SPKS_DIR: &str = "spks";
pub const LOGS_DIR: &str = "logs";

pub const META_FILE: &str = "meta.txt";
pub const PRE_DEPLOY_BASH_SCRIPT: &str = "pre_deploy.sh";
pub const PRE_DEPLOY_SAS_SCRIPT: &str = "pre_deploy.sas";
pub const JOBS_TO_REDEPLOY_FILE: &str = "jobs_to_redeploy.txt";
pub const MODULE_PATH_FILE: &str = "module_path.txt";

pub const METADATA_SPK: &str = "metadata.spk";
pub const METADATA_SUBPROP: &str = "metadata.subprop";

pub const LOG_PRE_DEPLOY_BASH: &str = "pre_deploy_sh.log";
pub const LOG_PRE_DEPLOY_SAS: &str = "pre_deploy_sas.log";
pub const LOG_GET_MODULE_PATH: &str = "get_module_path.log";
pub const LOG_UPDATE_DICTIONARIES: &str = "update_dictionaries.log";
pub const LOG_METADATA_EXPORT: &str = "export_metadata.log";
pub const LOG_METADATA_IMPORT: &str = "import_metadata.log";
pub const LOG_REDEPLOY_JOBS: &str = "redeploy_jobs.log";

/// The single remote directory scoping every artifact and log of one run.
///
/// Owned by one pipeline for its lifetime and handed to stages by reference.
/// Nothing in it is cleaned up, success or failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct WorkingDirectory {
    root: String,
}

impl WorkingDirectory {
    /// `<base>/deploy_<YYYYmmdd_HHMMSS>_<uuid>`; timestamp plus UUID keeps
    /// concurrent runs apart.
    pub fn unique(base: &str) -> Self {
        Self::unique_at(base, Local::now(), Uuid::new_v4())
    }

    pub fn unique_at(base: &str, now: DateTime<Local>, id: Uuid) -> Self {
        let name = format!(
            "{}{}_{}",
            DEPLOY_DIR_PREFIX,
            now.format("%Y%m%d_%H%M%S"),
            id
        );
        Self::at(remote_path::join(base.trim_end_matches('/'), &name))
    }

    /// Use an explicit path (tests, resumed inspection).
    pub fn at(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn path(&self, relative: &str) -> String {
        remote_path::join(&self.root, relative)
    }

    pub fn repo_dir(&self) -> String {
        self.path(REPO_DIR)
    }

    pub fn codes_dir(&self) -> String {
        self.path(CODES_DIR)
    }

    /// Assembled code area (`codes/kody`).
    pub fn package_code_dir(&self) -> String {
        remote_path::join(&self.codes_dir(), REPO_CODES_DIR)
    }

    pub fn extra_files_dir(&self) -> String {
        remote_path::join(&self.codes_dir(), EXTRA_FILES_DIR)
    }

    pub fn spks_dir(&self) -> String {
        self.path(SPKS_DIR)
    }

    pub fn logs_dir(&self) -> String {
        self.path(LOGS_DIR)
    }

    pub fn log(&self, name: &str) -> String {
        remote_path::join(&self.logs_dir(), name)
    }

    pub fn spk(&self, name: &str) -> String {
        remote_path::join(&self.spks_dir(), name)
    }

    pub fn meta_file(&self) -> String {
        self.path(META_FILE)
    }

    /// Directories created by assembly, parents first.
    pub fn package_dirs(&self) -> Vec<String> {
        vec![
            self.codes_dir(),
            self.extra_files_dir(),
            self.spks_dir(),
            self.logs_dir(),
        ]
    }
}

impl std::fmt::Display for WorkingDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn unique_name_has_prefix_timestamp_and_uuid() {
        let now = Local.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let id = Uuid::nil();
        let dir = WorkingDirectory::unique_at("/sas/runtime/", now, id);

        assert_eq!(
            dir.root(),
            "/sas/runtime/deploy_20260304_050607_00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn two_runs_never_share_a_directory() {
        let a = WorkingDirectory::unique("/sas/runtime");
        let b = WorkingDirectory::unique("/sas/runtime");
        assert_ne!(a, b);
    }

    #[test]
    fn layout_paths() {
        let dir = WorkingDirectory::at("/w");
        assert_eq!(dir.repo_dir(), "/w/repo");
        assert_eq!(dir.package_code_dir(), "/w/codes/kody");
        assert_eq!(dir.extra_files_dir(), "/w/codes/dodatkowe_pliki");
        assert_eq!(dir.log(LOG_METADATA_EXPORT), "/w/logs/export_metadata.log");
        assert_eq!(dir.spk(METADATA_SPK), "/w/spks/metadata.spk");
        assert_eq!(dir.meta_file(), "/w/meta.txt");
    }
}
