//! Source-control state captured once per run.

use serde::{Deserialize, Serialize};
use std::process::Command;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    /// `git log --format=%H -n 1 -z`
    pub commit: String,
    /// `git status -z`
    pub status: String,
}

impl Provenance {
    pub fn capture() -> Self {
        Self {
            commit: git_output(&["log", "--format=%H", "-n", "1", "-z"]),
            status: git_output(&["status", "-z"]),
        }
    }
}

/// Combined stdout and stderr of a git invocation, or why it could not run.
fn git_output(args: &[&str]) -> String {
    match Command::new("git").args(args).output() {
        Ok(out) => {
            let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&out.stderr));
            text.trim_end_matches('\n').to_string()
        }
        Err(err) => format!("git unavailable: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_always_yields_text() {
        let git = Provenance::capture();
        assert!(!git.commit.ends_with('\n'));
        let json = serde_json::to_value(&git).expect("serialize");
        assert!(json["commit"].is_string());
        assert!(json["status"].is_string());
    }
}
