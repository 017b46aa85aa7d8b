//! `meta.txt`: the kind-tagged metadata object list driving the export and
//! redeploy stages.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

// "<name> (<Tag>)" with the tag as the last parenthesized group on the line.
static TAGGED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)\s*\(\s*([^()]*?)\s*\)\s*$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "tag")]
pub enum EntryKind {
    Job,
    DeployedFlow,
    Other(String),
    Untagged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub name: String,
    #[serde(flatten)]
    pub kind: EntryKind,
    #[serde(skip)]
    line: String,
}

impl ManifestEntry {
    /// Parse one manifest line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (name, kind) = match TAGGED_LINE.captures(line) {
            Some(caps) => {
                let tag = &caps[2];
                let kind = match tag {
                    "Job" => EntryKind::Job,
                    "DeployedFlow" => EntryKind::DeployedFlow,
                    other => EntryKind::Other(other.to_string()),
                };
                (caps[1].to_string(), kind)
            }
            None => (line.to_string(), EntryKind::Untagged),
        };

        Some(Self {
            name,
            kind,
            line: line.to_string(),
        })
    }

    /// The line exactly as it appeared in the manifest (trimmed).
    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn is_job(&self) -> bool {
        self.kind == EntryKind::Job
    }
}

impl std::fmt::Display for ManifestEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.line)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MetadataManifest {
    entries: Vec<ManifestEntry>,
}

impl MetadataManifest {
    pub fn parse(text: &str) -> Self {
        Self {
            entries: text.lines().filter_map(ManifestEntry::parse).collect(),
        }
    }

    /// One line per entry, newline-terminated.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|entry| format!("{}\n", entry.line))
            .collect()
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_jobs(&self) -> bool {
        self.entries.iter().any(ManifestEntry::is_job)
    }

    /// Every object line, sorted and de-duplicated (export selection).
    pub fn object_lines(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.line.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Job names, sorted and de-duplicated (redeploy selection).
    pub fn job_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.is_job())
            .map(|entry| entry.name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn deployed_flows(&self) -> Vec<&ManifestEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.kind == EntryKind::DeployedFlow)
            .collect()
    }
}
