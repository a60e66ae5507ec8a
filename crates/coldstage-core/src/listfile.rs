//! Blacklist / whitelist file loading.
//!
//! Both lists use the same single-column format: one entry per line, with an
//! optional header line (`email` for the intake blacklist, `file` for the
//! housekeeping whitelist). Blank lines and `#` comments are skipped. Lists
//! are loaded once at startup and treated as read-only configuration.

use std::collections::HashSet;
use std::path::Path;

use tracing::info;

use crate::error::Result;

/// Recognized header lines, tolerated for compatibility with the CSV-style
/// files the operations team maintains.
const HEADERS: &[&str] = &["email", "file"];

/// Load a one-entry-per-line list file into a set.
pub fn load_list(path: &Path) -> Result<HashSet<String>> {
    let contents = std::fs::read_to_string(path)?;
    let entries = parse_list(&contents);
    info!(
        subsystem = "config",
        component = "listfile",
        path = %path.display(),
        entries = entries.len(),
        "Loaded list file"
    );
    Ok(entries)
}

/// Load a list file, returning an empty set when no path is configured.
pub fn load_optional_list(path: Option<&Path>) -> Result<HashSet<String>> {
    match path {
        Some(p) => load_list(p),
        None => Ok(HashSet::new()),
    }
}

fn parse_list(contents: &str) -> HashSet<String> {
    contents
        .lines()
        .enumerate()
        .map(|(i, line)| (i, line.trim()))
        .filter(|(i, line)| {
            if line.is_empty() || line.starts_with('#') {
                return false;
            }
            // Skip a header only on the first line
            !(*i == 0 && HEADERS.contains(&line.to_ascii_lowercase().as_str()))
        })
        .map(|(_, line)| line.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_skips_header_and_blanks() {
        let set = parse_list("email\na@x.edu\n\nb@y.edu\n");
        assert_eq!(set.len(), 2);
        assert!(set.contains("a@x.edu"));
        assert!(set.contains("b@y.edu"));
        assert!(!set.contains("email"));
    }

    #[test]
    fn test_parse_skips_comments() {
        let set = parse_list("file\n# kept for the ops dashboard\nREADME.txt\n");
        assert_eq!(set.len(), 1);
        assert!(set.contains("README.txt"));
    }

    #[test]
    fn test_parse_header_only_skipped_on_first_line() {
        // "email" appearing as a real entry later must survive
        let set = parse_list("file\nemail\n");
        assert_eq!(set.len(), 1);
        assert!(set.contains("email"));
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let set = parse_list("  a@x.edu  \n");
        assert!(set.contains("a@x.edu"));
    }

    #[test]
    fn test_load_optional_list_none_is_empty() {
        let set = load_optional_list(None).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_load_list_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "email").unwrap();
        writeln!(file, "spam@x.edu").unwrap();
        let set = load_list(file.path()).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains("spam@x.edu"));
    }

    #[test]
    fn test_load_list_missing_file_errors() {
        let result = load_list(Path::new("/nonexistent/blacklist.csv"));
        assert!(result.is_err());
    }
}
