//! Shell escaping and quoting utilities.

/// Escape a value for use inside single quotes.
/// Replaces `'` with `'\''` (end quote, escaped quote, start quote).
pub fn escape_single_quote_content(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Quote a single argument for shell execution.
/// - Empty strings become `''`
/// - Strings with shell metacharacters are wrapped in single quotes
/// - Embedded single quotes are escaped
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }

    const SHELL_META: &[char] = &[
        ' ', '\t', '\n', '\'', '"', '\\', '$', '`', '!', '*', '?', '[', ']', '(', ')', '{', '}',
        '<', '>', '|', '&', ';', '#', '~',
    ];

    if !arg.contains(SHELL_META) {
        return arg.to_string();
    }

    format!("'{}'", escape_single_quote_content(arg))
}

/// Quote and join multiple arguments for shell execution.
pub fn quote_args<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| quote_arg(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote a path for shell execution (always quotes).
pub fn quote_path(path: &str) -> String {
    format!("'{}'", escape_single_quote_content(path))
}

/// Strip one layer of surrounding single or double quotes, as left behind by
/// values copied from shell scripts into JSON config.
pub fn strip_outer_quotes(value: &str) -> &str {
    value.trim_matches(|c| c == '\'' || c == '"')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_args_stay_unquoted() {
        assert_eq!(quote_arg("-disableX11"), "-disableX11");
        assert_eq!(quote_arg("/opt/sas/ExportPackage"), "/opt/sas/ExportPackage");
    }

    #[test]
    fn metadata_paths_with_spaces_are_quoted() {
        assert_eq!(
            quote_arg("/Shared Data/Jobs/JOB_1 (Job)"),
            "'/Shared Data/Jobs/JOB_1 (Job)'"
        );
        assert_eq!(quote_arg(""), "''");
    }

    #[test]
    fn embedded_single_quote_is_escaped() {
        assert_eq!(quote_path("/tmp/it's"), "'/tmp/it'\\''s'");
    }

    #[test]
    fn quote_args_joins_with_spaces() {
        assert_eq!(quote_args(&["-objects", "a b", "c"]), "-objects 'a b' c");
    }

    #[test]
    fn strip_outer_quotes_removes_wrapping_quotes() {
        assert_eq!(strip_outer_quotes("\"SASApp - SAS DATA Step Batch Server\""), "SASApp - SAS DATA Step Batch Server");
        assert_eq!(strip_outer_quotes("'batch'"), "batch");
        assert_eq!(strip_outer_quotes("batch"), "batch");
    }
}
