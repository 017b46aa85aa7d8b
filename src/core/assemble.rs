//! Working-copy merge and package assembly for one deployment run.
//!
//! Everything happens through the [`RemoteExecutor`]; paths are remote.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::config::DeployConfig;
use crate::error::{AssemblyFailedDetails, Error, ErrorCode, Result};
use crate::manifest::MetadataManifest;
use crate::pull_request::PullRequest;
use crate::ssh::{RemoteExecutor, TextEncoding};
use crate::utils::{remote_path, shell};
use crate::workdir::{self, WorkingDirectory};

static FRAGMENT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9]*)-(\d+)_(.+)$").unwrap());

/// Canonical files that start with a fixed header; every other target is plain concatenation.
const CANONICAL_HEADERS: &[(&str, &str)] = &[
    (
        workdir::PRE_DEPLOY_SAS_SCRIPT,
        "%let srodowisko = %sysget(srodowisko);\n",
    ),
    (
        workdir::PRE_DEPLOY_BASH_SCRIPT,
        "#!/bin/bash\nset -euo pipefail\n",
    ),
];

/// Working-directory entries a fragment may not be merged over.
const RESERVED_NAMES: &[&str] = &[
    workdir::REPO_DIR,
    workdir::CODES_DIR,
    workdir::SPKS_DIR,
    workdir::LOGS_DIR,
    workdir::JOBS_TO_REDEPLOY_FILE,
    workdir::MODULE_PATH_FILE,
];

/// Per-ticket dictionary lists; consumed by the dictionary stage, not merged.
pub const DICTIONARY_SUFFIX: &str = "mds.txt";

/// `<ticket-id>_<canonical-name>` file in the override directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideFragment {
    pub file_name: String,
    pub ticket_prefix: String,
    pub ticket_number: u64,
    pub canonical: String,
}

impl OverrideFragment {
    pub fn parse(file_name: &str) -> Option<Self> {
        let caps = FRAGMENT_NAME.captures(file_name)?;
        Some(Self {
            file_name: file_name.to_string(),
            ticket_prefix: caps[1].to_string(),
            ticket_number: caps[2].parse().ok()?,
            canonical: caps[3].to_string(),
        })
    }

    pub fn ticket_id(&self) -> String {
        format!("{}-{}", self.ticket_prefix, self.ticket_number)
    }

    fn sort_key(&self) -> (&str, u64, &str) {
        (&self.ticket_prefix, self.ticket_number, &self.file_name)
    }
}

/// Group fragments by canonical name, each group in ascending ticket order.
pub fn group_fragments(
    fragments: impl IntoIterator<Item = OverrideFragment>,
) -> BTreeMap<String, Vec<OverrideFragment>> {
    let mut groups: BTreeMap<String, Vec<OverrideFragment>> = BTreeMap::new();
    for fragment in fragments {
        groups
            .entry(fragment.canonical.clone())
            .or_default()
            .push(fragment);
    }
    for group in groups.values_mut() {
        group.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }
    groups
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    pub merged: Vec<PullRequest>,
    pub changed_files: BTreeSet<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageOutcome {
    /// Canonical files written to the working directory root.
    pub canonical_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<MetadataManifest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

pub struct Assembler<'a> {
    executor: &'a dyn RemoteExecutor,
    config: &'a DeployConfig,
    work: &'a WorkingDirectory,
}

impl<'a> Assembler<'a> {
    pub fn new(
        executor: &'a dyn RemoteExecutor,
        config: &'a DeployConfig,
        work: &'a WorkingDirectory,
    ) -> Self {
        Self {
            executor,
            config,
            work,
        }
    }

    fn git(&self, args: &str) -> String {
        format!("{} {}", self.config.remote_git_path, args)
    }

    /// Clone `master` and merge every qualified pull request into it.
    ///
    /// A failing git step aborts with `assembly.failed` naming the pull request.
    pub fn merge_pull_requests(
        &self,
        clone_url: &str,
        prs: &[PullRequest],
    ) -> Result<MergeOutcome> {
        log_status!("assemble", "Cloning {}", clone_url);
        self.executor
            .run(
                &self.git(&format!(
                    "clone --branch master {} {}",
                    shell::quote_arg(clone_url),
                    workdir::REPO_DIR
                )),
                Some(self.work.root()),
                None,
            )
            .map_err(|e| assembly_error(format!("Cloning {} failed", clone_url), None, e))?;

        let mut outcome = MergeOutcome::default();
        for pr in prs {
            if pr.source_branch.is_empty() {
                let warning = format!("PR #{} has no source branch; skipped", pr.id);
                log_status!("assemble", "{}", warning);
                outcome.warnings.push(warning);
                continue;
            }
            let changed = self
                .merge_one(pr)
                .map_err(|e| assembly_error(format!("Merging {} failed", pr), Some(pr.id), e))?;
            log_status!("assemble", "Merged {} ({} changed file(s))", pr, changed.len());
            outcome.changed_files.extend(changed);
            outcome.merged.push(pr.clone());
        }
        Ok(outcome)
    }

    fn merge_one(&self, pr: &PullRequest) -> Result<Vec<String>> {
        let repo = self.work.repo_dir();
        let remote_branch = format!("origin/{}", pr.source_branch);
        let run = |args: String| self.executor.run(&self.git(&args), Some(repo.as_str()), None);

        run(format!("fetch origin {}", shell::quote_arg(&pr.source_branch)))?;
        let base = run(format!("merge-base HEAD {}", shell::quote_arg(&remote_branch)))?;
        let diff = run(format!(
            "diff -M -C --name-status --diff-filter=ACMR {}",
            shell::quote_arg(&format!("{}..{}", base.stdout.trim(), remote_branch))
        ))?;
        run(format!(
            "merge --no-ff --no-edit {}",
            shell::quote_arg(&remote_branch)
        ))?;

        Ok(parse_name_status(&diff.stdout))
    }

    /// Lay out the package from the merged checkout.
    pub fn build_package(&self, changed_files: &BTreeSet<String>) -> Result<PackageOutcome> {
        for dir in self.work.package_dirs() {
            self.executor.mkdir_p(&dir)?;
        }

        let repo_code = remote_path::join(&self.work.repo_dir(), workdir::REPO_CODES_DIR);
        if self.executor.exists(&repo_code)? {
            self.executor
                .copy_recursive(&repo_code, &self.work.package_code_dir())?;
        } else {
            log_status!("assemble", "No {} directory in the repository", workdir::REPO_CODES_DIR);
        }

        self.copy_extra_files(changed_files)?;

        let mut outcome = PackageOutcome::default();
        let mut fragments = Vec::new();
        for name in self.executor.list_dir(&self.work.extra_files_dir())? {
            match OverrideFragment::parse(&name) {
                Some(fragment) if fragment.canonical == DICTIONARY_SUFFIX => {}
                Some(fragment) if RESERVED_NAMES.contains(&fragment.canonical.as_str()) => {
                    outcome.warnings.push(format!(
                        "{} would replace the working directory's {}; ignored",
                        name, fragment.canonical
                    ))
                }
                Some(fragment) => fragments.push(fragment),
                None => outcome.warnings.push(format!(
                    "{} does not follow the <TICKET>-<N>_<file> naming; ignored",
                    name
                )),
            }
        }

        for (canonical, group) in group_fragments(fragments) {
            self.write_canonical(&canonical, &group)?;
            outcome.canonical_files.push(canonical);
        }

        let meta_file = self.work.meta_file();
        if self.executor.exists(&meta_file)? {
            let text = self.executor.read_file(&meta_file, TextEncoding::Utf8)?;
            let manifest = MetadataManifest::parse(&text);
            let jobs = manifest.job_names();
            if !jobs.is_empty() {
                let content: String = jobs.iter().map(|job| format!("{}\n", job)).collect();
                self.executor.write_file(
                    &self.work.path(workdir::JOBS_TO_REDEPLOY_FILE),
                    &content,
                    TextEncoding::Utf8,
                )?;
            }
            outcome.manifest = Some(manifest);
        }

        for warning in &outcome.warnings {
            log_status!("assemble", "{}", warning);
        }
        Ok(outcome)
    }

    fn copy_extra_files(&self, changed_files: &BTreeSet<String>) -> Result<()> {
        let prefix = format!("{}/", workdir::EXTRA_FILES_DIR);
        for relative in changed_files {
            let Some(inner) = relative.strip_prefix(&prefix) else {
                continue;
            };
            let src = remote_path::join(&self.work.repo_dir(), relative);
            if !self.executor.exists(&src)? {
                return Err(Error::assembly_failed(
                    format!("Changed file {} is missing from the checkout", relative),
                    AssemblyFailedDetails {
                        pr_id: None,
                        path: Some(relative.clone()),
                        output: String::new(),
                    },
                ));
            }
            let dst = remote_path::join(&self.work.extra_files_dir(), inner);
            self.executor.mkdir_p(remote_path::parent(&dst))?;
            self.executor.remove_all(&dst)?;
            self.executor.copy_recursive(&src, &dst)?;
        }
        Ok(())
    }

    fn write_canonical(&self, canonical: &str, group: &[OverrideFragment]) -> Result<()> {
        let header = CANONICAL_HEADERS
            .iter()
            .find(|(c, _)| *c == canonical)
            .map(|(_, h)| *h)
            .unwrap_or_default();

        let mut content = header.to_string();
        for fragment in group {
            let path = remote_path::join(&self.work.extra_files_dir(), &fragment.file_name);
            // Latin-1 keeps the bytes intact whatever the fragment encoding.
            content.push_str(&self.executor.read_file(&path, TextEncoding::Latin1)?);
            content.push('\n');
        }

        let target = self.work.path(canonical);
        self.executor
            .write_file(&target, &content, TextEncoding::Latin1)?;
        if canonical == workdir::PRE_DEPLOY_BASH_SCRIPT {
            self.executor.make_executable(&target)?;
        }
        log_status!(
            "assemble",
            "Built {} from {} fragment(s)",
            canonical,
            group.len()
        );
        Ok(())
    }
}

/// Paths from `git diff --name-status`: A/M take the first path, R/C the second.
pub fn parse_name_status(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('\t').collect();
            let status = parts.first()?.chars().next()?;
            let path = match status {
                'A' | 'M' => parts.get(1)?,
                'R' | 'C' => parts.get(2)?,
                _ => return None,
            };
            Some(path.trim().to_string())
        })
        .filter(|path| !path.is_empty())
        .collect()
}

fn assembly_error(message: String, pr_id: Option<u64>, cause: Error) -> Error {
    let output = if cause.code == ErrorCode::RemoteCommandFailed {
        let field = |key: &str| {
            cause
                .details
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        [field("stdout"), field("stderr")]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        cause.message.clone()
    };

    Error::assembly_failed(
        message,
        AssemblyFailedDetails {
            pr_id,
            path: None,
            output,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::{CommandOutput, MockExecutor};
    use serde_json::Value;

    fn pr(id: u64, branch: &str) -> PullRequest {
        PullRequest {
            id,
            title: format!("Change {}", id),
            source_branch: branch.to_string(),
            approval_count: 2,
            version: Some(1),
            raw: Value::Null,
        }
    }

    fn setup() -> (tempfile::TempDir, MockExecutor, DeployConfig, WorkingDirectory) {
        let dir = tempfile::tempdir().unwrap();
        let executor = MockExecutor::new(dir.path()).unwrap();
        (dir, executor, DeployConfig::mock(), WorkingDirectory::at("/rt/deploy_x"))
    }

    fn fragment_names(group: &[OverrideFragment]) -> Vec<&str> {
        group.iter().map(|f| f.file_name.as_str()).collect()
    }

    #[test]
    fn fragment_names_split_ticket_and_canonical() {
        let f = OverrideFragment::parse("CRISPR-12_pre_deploy.sas").unwrap();
        assert_eq!(f.ticket_id(), "CRISPR-12");
        assert_eq!(f.canonical, "pre_deploy.sas");
        assert!(OverrideFragment::parse("notes.txt").is_none());
        assert!(OverrideFragment::parse("12-CRISPR_meta.txt").is_none());
    }

    #[test]
    fn grouping_orders_by_ticket_number_regardless_of_input_order() {
        let names = ["ABC-10_meta.txt", "ABC-9_meta.txt", "ABC-100_meta.txt", "ABC-9_pre_deploy.sh"];
        let forward = group_fragments(names.iter().filter_map(|n| OverrideFragment::parse(n)));
        let backward =
            group_fragments(names.iter().rev().filter_map(|n| OverrideFragment::parse(n)));

        assert_eq!(forward, backward);
        assert_eq!(
            fragment_names(&forward["meta.txt"]),
            vec!["ABC-9_meta.txt", "ABC-10_meta.txt", "ABC-100_meta.txt"]
        );
        assert_eq!(forward["pre_deploy.sh"].len(), 1);
    }

    #[test]
    fn ticket_prefix_sorts_before_number() {
        let group = group_fragments(
            ["ZED-1_meta.txt", "ABC-2_meta.txt"]
                .iter()
                .filter_map(|n| OverrideFragment::parse(n)),
        );
        assert_eq!(fragment_names(&group["meta.txt"]), vec!["ABC-2_meta.txt", "ZED-1_meta.txt"]);
    }

    #[test]
    fn name_status_takes_destination_of_renames() {
        let out = "M\tkody/a.sas\nA\tdodatkowe_pliki/T-1_meta.txt\nR100\told.sas\tkody/new.sas\nC75\tx\tkody/copy.sas\nD\tkody/gone.sas\n";
        assert_eq!(
            parse_name_status(out),
            vec![
                "kody/a.sas",
                "dodatkowe_pliki/T-1_meta.txt",
                "kody/new.sas",
                "kody/copy.sas"
            ]
        );
    }

    #[test]
    fn merge_runs_git_per_pull_request_and_collects_changes() {
        let (_dir, executor, config, work) = setup();
        executor.respond(
            "--name-status",
            CommandOutput::ok("M\tkody/a.sas\nA\tdodatkowe_pliki/T-1_meta.txt\n"),
        );
        let assembler = Assembler::new(&executor, &config, &work);

        let outcome = assembler
            .merge_pull_requests("ssh://git@h:7999/p/r.git", &[pr(1, "feature/a"), pr(2, "feature/b")])
            .unwrap();

        assert_eq!(outcome.merged.len(), 2);
        assert_eq!(outcome.changed_files.len(), 2);
        assert!(executor.local_path("/rt/deploy_x/repo").is_dir());

        let commands: Vec<String> = executor.commands().into_iter().map(|c| c.command).collect();
        assert_eq!(commands[0], "git clone --branch master ssh://git@h:7999/p/r.git repo");
        assert_eq!(commands[1], "git fetch origin feature/a");
        assert_eq!(commands[2], "git merge-base HEAD origin/feature/a");
        assert_eq!(
            commands[3],
            "git diff -M -C --name-status --diff-filter=ACMR abc123def456..origin/feature/a"
        );
        assert_eq!(commands[4], "git merge --no-ff --no-edit origin/feature/a");
        assert_eq!(commands.len(), 9);
    }

    #[test]
    fn pull_request_without_branch_is_skipped_with_a_warning() {
        let (_dir, executor, config, work) = setup();
        let assembler = Assembler::new(&executor, &config, &work);

        let outcome = assembler
            .merge_pull_requests("url", &[pr(4, ""), pr(5, "feature/e")])
            .unwrap();

        assert_eq!(outcome.merged.iter().map(|p| p.id).collect::<Vec<_>>(), vec![5]);
        assert_eq!(outcome.warnings, vec!["PR #4 has no source branch; skipped"]);
        assert!(!executor.ran("git fetch origin ''"));
        assert!(executor.ran("git fetch origin feature/e"));
    }

    #[test]
    fn merge_conflict_names_the_pull_request() {
        let (_dir, executor, config, work) = setup();
        executor.respond(
            "merge --no-ff",
            CommandOutput::failed(1, "CONFLICT (content): Merge conflict in kody/a.sas", ""),
        );
        let assembler = Assembler::new(&executor, &config, &work);

        let err = assembler
            .merge_pull_requests("url", &[pr(7, "feature/x")])
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AssemblyFailed);
        assert_eq!(err.details["prId"], 7);
        assert!(err.details["output"].as_str().unwrap().contains("CONFLICT"));
    }

    #[test]
    fn package_merges_fragments_and_derives_jobs() {
        let (_dir, executor, config, work) = setup();
        let repo = work.repo_dir();
        let write = |path: String, content: &str| {
            executor.write_file(&path, content, TextEncoding::Utf8).unwrap()
        };
        write(format!("{}/kody/etl.sas", repo), "data a; run;");
        write(format!("{}/dodatkowe_pliki/T-2_meta.txt", repo), "/Jobs/B (Job)\n/Flows/F (DeployedFlow)");
        write(format!("{}/dodatkowe_pliki/T-1_meta.txt", repo), "/Jobs/A (Job)");
        write(format!("{}/dodatkowe_pliki/T-1_pre_deploy.sh", repo), "echo hi");
        write(format!("{}/dodatkowe_pliki/T-1_pre_deploy.sas", repo), "%put &srodowisko;");
        write(format!("{}/dodatkowe_pliki/T-1_mds.txt", repo), "SLOWNIK_A");
        write(format!("{}/dodatkowe_pliki/readme.md", repo), "x");

        let changed: BTreeSet<String> = [
            "kody/etl.sas",
            "dodatkowe_pliki/T-2_meta.txt",
            "dodatkowe_pliki/T-1_meta.txt",
            "dodatkowe_pliki/T-1_pre_deploy.sh",
            "dodatkowe_pliki/T-1_pre_deploy.sas",
            "dodatkowe_pliki/T-1_mds.txt",
            "dodatkowe_pliki/readme.md",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let outcome = Assembler::new(&executor, &config, &work)
            .build_package(&changed)
            .unwrap();

        assert_eq!(outcome.canonical_files, vec!["meta.txt", "pre_deploy.sas", "pre_deploy.sh"]);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("readme.md"));

        let read = |path: String| executor.read_file(&path, TextEncoding::Utf8).unwrap();
        assert_eq!(
            read(work.meta_file()),
            "/Jobs/A (Job)\n/Jobs/B (Job)\n/Flows/F (DeployedFlow)\n"
        );
        assert_eq!(
            read(work.path("pre_deploy.sas")),
            "%let srodowisko = %sysget(srodowisko);\n%put &srodowisko;\n"
        );
        assert_eq!(
            read(work.path("pre_deploy.sh")),
            "#!/bin/bash\nset -euo pipefail\necho hi\n"
        );
        assert_eq!(read(work.path("jobs_to_redeploy.txt")), "/Jobs/A\n/Jobs/B\n");
        assert_eq!(read(format!("{}/etl.sas", work.package_code_dir())), "data a; run;");
        assert_eq!(outcome.manifest.unwrap().entries().len(), 3);
    }

    fn seed_extra_files(
        executor: &MockExecutor,
        work: &WorkingDirectory,
        files: &[(&str, &str)],
    ) -> BTreeSet<String> {
        files
            .iter()
            .map(|(name, content)| {
                let relative = format!("dodatkowe_pliki/{}", name);
                executor
                    .write_file(
                        &format!("{}/{}", work.repo_dir(), relative),
                        content,
                        TextEncoding::Utf8,
                    )
                    .unwrap();
                relative
            })
            .collect()
    }

    #[test]
    fn any_canonical_name_is_merged_without_header() {
        let (_dir, executor, config, work) = setup();
        let changed = seed_extra_files(
            &executor,
            &work,
            &[
                ("T-2_grants.sql", "grant select on b to etl;"),
                ("T-1_grants.sql", "grant select on a to etl;"),
            ],
        );

        let outcome = Assembler::new(&executor, &config, &work)
            .build_package(&changed)
            .unwrap();

        assert_eq!(outcome.canonical_files, vec!["grants.sql"]);
        assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
        assert!(outcome.manifest.is_none());
        assert_eq!(
            executor
                .read_file(&work.path("grants.sql"), TextEncoding::Utf8)
                .unwrap(),
            "grant select on a to etl;\ngrant select on b to etl;\n"
        );
    }

    #[test]
    fn interleaved_ticket_prefixes_merge_into_one_file() {
        let (_dir, executor, config, work) = setup();
        let changed = seed_extra_files(
            &executor,
            &work,
            &[
                ("XYZ-1_x.sas", "%put xyz1;"),
                ("ABC-2_x.sas", "%put abc2;"),
                ("ABC-10_x.sas", "%put abc10;"),
            ],
        );

        let outcome = Assembler::new(&executor, &config, &work)
            .build_package(&changed)
            .unwrap();

        assert_eq!(outcome.canonical_files, vec!["x.sas"]);
        assert_eq!(
            executor.read_file(&work.path("x.sas"), TextEncoding::Utf8).unwrap(),
            "%put abc2;\n%put abc10;\n%put xyz1;\n"
        );
    }

    #[test]
    fn fragments_never_replace_working_directory_entries() {
        let (_dir, executor, config, work) = setup();
        let changed = seed_extra_files(
            &executor,
            &work,
            &[("T-1_logs", "x"), ("T-1_module_path.txt", "/elsewhere")],
        );

        let outcome = Assembler::new(&executor, &config, &work)
            .build_package(&changed)
            .unwrap();

        assert!(outcome.canonical_files.is_empty());
        assert_eq!(outcome.warnings.len(), 2);
        assert!(executor.local_path(&work.logs_dir()).is_dir());
        assert!(!executor.exists(&work.path("module_path.txt")).unwrap());
    }

    #[test]
    fn missing_changed_file_is_an_assembly_error() {
        let (_dir, executor, config, work) = setup();
        let changed: BTreeSet<String> =
            std::iter::once("dodatkowe_pliki/T-1_meta.txt".to_string()).collect();

        let err = Assembler::new(&executor, &config, &work)
            .build_package(&changed)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AssemblyFailed);
        assert_eq!(err.details["path"], "dodatkowe_pliki/T-1_meta.txt");
    }

    #[test]
    fn no_fragments_means_no_canonical_files() {
        let (_dir, executor, config, work) = setup();
        let outcome = Assembler::new(&executor, &config, &work)
            .build_package(&BTreeSet::new())
            .unwrap();
        assert!(outcome.canonical_files.is_empty());
        assert!(outcome.manifest.is_none());
        assert!(!executor.exists(&work.meta_file()).unwrap());
    }
}
