//! POSIX path helpers for paths that live on the remote host.
//!
//! Remote paths are plain strings: they never touch the local filesystem,
//! so `std::path` semantics (and Windows separators) do not apply.

/// Join a child onto a remote directory path.
pub fn join(base: &str, child: &str) -> String {
    let child = child.trim_start_matches('/');
    if child.is_empty() {
        return base.to_string();
    }
    if base.ends_with('/') {
        format!("{}{}", base, child)
    } else {
        format!("{}/{}", base, child)
    }
}

/// Last path segment (`/a/b/c.txt` -> `c.txt`).
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Parent directory (`/a/b/c.txt` -> `/a/b`). The root is its own parent.
pub fn parent(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((parent, _)) => parent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_handles_slashes() {
        assert_eq!(join("/srv/deploy", "logs"), "/srv/deploy/logs");
        assert_eq!(join("/srv/deploy/", "logs"), "/srv/deploy/logs");
        assert_eq!(join("/srv/deploy", "/logs"), "/srv/deploy/logs");
        assert_eq!(join("/srv/deploy", ""), "/srv/deploy");
    }

    #[test]
    fn file_name_and_parent() {
        assert_eq!(file_name("/Shared/Flows/FLOW_A"), "FLOW_A");
        assert_eq!(file_name("dodatkowe_pliki/CRISPR-1_meta.txt"), "CRISPR-1_meta.txt");
        assert_eq!(file_name("plain"), "plain");
        assert_eq!(parent("/srv/deploy/meta.txt"), "/srv/deploy");
        assert_eq!(parent("/meta.txt"), "/");
    }
}
