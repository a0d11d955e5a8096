//! Architectural Enforcement Integration Tests
//!
//! This package scans the streaming core's sources and enforces:
//! - No sleep() calls in production code (deferred work goes through the
//!   timer queue, waiting happens only in the driver)
//! - No unwrap()/expect() outside test modules
//! - No UI or rendering dependencies in the core crate
//!
//! These tests are designed to catch violations early in the development cycle.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// A rule violation at a source location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the violation
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Offending source line, trimmed
    pub text: String,
}

/// Root of the workspace this crate lives in
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// Every `.rs` file under `dir`
#[must_use]
pub fn rust_sources(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|entry| entry.into_path())
        .collect()
}

/// Lines of a source file that are production code
///
/// Everything from the first `#[cfg(test)]` onwards is treated as test code,
/// matching the convention of a trailing `mod tests`. Comment lines are
/// skipped.
#[must_use]
pub fn production_lines(source: &str) -> Vec<(usize, &str)> {
    source
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .filter(|(_, line)| !line.trim_start().starts_with("//"))
        .map(|(i, line)| (i + 1, line))
        .collect()
}

/// Scan production lines of every source under `dir` with `is_violation`
#[must_use]
pub fn scan(dir: &Path, is_violation: impl Fn(&str) -> bool) -> Vec<Violation> {
    let mut violations = Vec::new();
    for path in rust_sources(dir) {
        let Ok(source) = std::fs::read_to_string(&path) else {
            continue;
        };
        for (line, text) in production_lines(&source) {
            if is_violation(text) {
                violations.push(Violation {
                    path: path.clone(),
                    line,
                    text: text.trim().to_string(),
                });
            }
        }
    }
    violations
}

/// A blocking or async sleep call
#[must_use]
pub fn is_sleep_call(line: &str) -> bool {
    line.contains("::sleep(") || line.contains(".sleep(")
}

/// A panicking unwrap or expect (`unwrap_or*` variants are fine)
#[must_use]
pub fn is_panicking_unwrap(line: &str) -> bool {
    line.contains(".unwrap()") || line.contains(".expect(")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core_src() -> PathBuf {
        workspace_root().join("inbox-stream/core/src")
    }

    fn report(violations: &[Violation]) -> String {
        violations
            .iter()
            .map(|v| format!("{}:{}: {}", v.path.display(), v.line, v.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_core_sources_found() {
        let sources = rust_sources(&core_src());
        assert!(sources.iter().any(|p| p.ends_with("pipeline.rs")));
        assert!(sources.iter().any(|p| p.ends_with("lib.rs")));
    }

    #[test]
    fn test_no_sleep_in_core() {
        let violations = scan(&core_src(), is_sleep_call);
        assert!(
            violations.is_empty(),
            "sleep() in production code; schedule a TimerAction instead:\n{}",
            report(&violations)
        );
    }

    #[test]
    fn test_no_unwrap_in_core() {
        let violations = scan(&core_src(), is_panicking_unwrap);
        assert!(
            violations.is_empty(),
            "unwrap()/expect() in production code; propagate the error instead:\n{}",
            report(&violations)
        );
    }

    #[test]
    fn test_no_unwrap_in_replay() {
        let replay_src = workspace_root().join("inbox-stream/replay/src");
        let violations = scan(&replay_src, is_panicking_unwrap);
        assert!(violations.is_empty(), "{}", report(&violations));
    }

    #[test]
    fn test_core_has_no_ui_dependencies() {
        let manifest =
            std::fs::read_to_string(workspace_root().join("inbox-stream/core/Cargo.toml")).unwrap();
        for forbidden in ["ratatui", "crossterm", "tauri", "egui"] {
            assert!(!manifest.contains(forbidden), "core depends on {forbidden}");
        }
    }

    #[test]
    fn test_rules_match_expected_lines() {
        assert!(is_sleep_call("    tokio::time::sleep(d).await;"));
        assert!(is_sleep_call("std::thread::sleep(d);"));
        assert!(!is_sleep_call("tokio::time::sleep_until(deadline).await"));
        assert!(is_panicking_unwrap("let x = y.unwrap();"));
        assert!(!is_panicking_unwrap("let x = y.unwrap_or_default();"));
        assert!(!is_panicking_unwrap("let x = y.unwrap_or_else(|| 1);"));
    }

    #[test]
    fn test_test_modules_are_excluded() {
        let source = "fn a() {}\n// x.unwrap()\n#[cfg(test)]\nmod tests { fn b() { x.unwrap(); } }\n";
        let lines = production_lines(source);
        assert_eq!(lines, vec![(1, "fn a() {}")]);
    }
}
