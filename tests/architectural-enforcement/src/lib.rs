//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! across the hub's production code:
//! - No sleep() calls (liveness is driven by intervals and cancellation)
//! - No blocking I/O inside async functions
//!
//! The helpers here load production sources with their `#[cfg(test)]` modules
//! stripped so the individual tests only see code that ships.

use std::fs;
use std::path::{Path, PathBuf};

/// Source directories scanned by every check, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["hub/core/src", "hub/daemon/src"];

/// A production source file
#[derive(Debug)]
pub struct SourceFile {
    /// Path of the file
    pub path: PathBuf,
    /// Lines up to (not including) the first `#[cfg(test)]`
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Format a violation at `idx` (0-based)
    #[must_use]
    pub fn violation(&self, idx: usize, what: &str) -> String {
        format!(
            "{}:{} - {}: {}",
            self.path.display(),
            idx + 1,
            what,
            self.lines[idx].trim()
        )
    }
}

/// Workspace root (two levels above this package)
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// Load every `.rs` file under [`PRODUCTION_DIRS`]
#[must_use]
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }

        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            files.push(SourceFile {
                path: entry.path().to_path_buf(),
                lines: strip_test_modules(&content),
            });
        }
    }

    files
}

/// Keep lines before the first `#[cfg(test)]`
#[must_use]
pub fn strip_test_modules(content: &str) -> Vec<String> {
    content
        .lines()
        .take_while(|line| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(str::to_string)
        .collect()
}

/// The part of a line before any `//` comment
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Whether the nearest enclosing `fn` above `idx` is async
///
/// Returns `None` when no function is found before a module or impl boundary.
#[must_use]
pub fn enclosing_fn_is_async(lines: &[String], idx: usize) -> Option<bool> {
    for line in lines[..=idx].iter().rev() {
        let line = line.trim();

        if line.contains("async fn ") {
            return Some(true);
        }
        if line.starts_with("fn ") || line.contains(" fn ") {
            return Some(false);
        }
        if line.starts_with("mod ") || (line.starts_with("impl") && line.contains('{')) {
            return None;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(src: &[&str]) -> Vec<String> {
        src.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_strip_test_modules() {
        let stripped = strip_test_modules("fn a() {}\n#[cfg(test)]\nmod tests {}\n");
        assert_eq!(stripped, vec!["fn a() {}".to_string()]);
    }

    #[test]
    fn test_async_detection() {
        let code = lines(&[
            "async fn bad_function() {",
            "    let contents = std::fs::read_to_string(\"file.txt\")?;",
            "}",
        ]);
        assert_eq!(enclosing_fn_is_async(&code, 1), Some(true));
    }

    #[test]
    fn test_sync_detection() {
        let code = lines(&[
            "pub fn load() {",
            "    let contents = std::fs::read_to_string(\"hub.toml\")?;",
            "}",
        ]);
        assert_eq!(enclosing_fn_is_async(&code, 1), Some(false));
    }

    #[test]
    fn test_code_part_drops_comments() {
        assert_eq!(code_part("let x = 1; // sleep(1)"), "let x = 1; ");
    }

    #[test]
    fn test_production_dirs_exist() {
        let root = workspace_root();
        for dir in PRODUCTION_DIRS {
            assert!(root.join(dir).exists(), "missing {dir}");
        }
        assert!(!production_sources().is_empty());
    }
}
