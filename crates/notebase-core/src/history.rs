use std::path::{Path, PathBuf};
use std::process::Command;

/// Version-control collaborator. Every failure (untracked path, not a
/// repository, git missing) is reported as "no data".
pub trait HistoryProvider: Send + Sync {
    /// Epoch milliseconds of the earliest commit touching `path`.
    fn first_commit_time(&self, path: &Path) -> Option<i64>;
    /// Epoch milliseconds of the latest commit touching `path`.
    fn last_commit_time(&self, path: &Path) -> Option<i64>;
    /// Paths, relative to the knowledge-base root, changed since `rev`.
    fn changed_paths_since(&self, rev: &str) -> Vec<PathBuf>;
}

/// Used when no repository is available; callers fall back to the wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHistory;

impl HistoryProvider for NoHistory {
    fn first_commit_time(&self, _path: &Path) -> Option<i64> {
        None
    }

    fn last_commit_time(&self, _path: &Path) -> Option<i64> {
        None
    }

    fn changed_paths_since(&self, _rev: &str) -> Vec<PathBuf> {
        Vec::new()
    }
}

#[derive(Clone, Debug)]
pub struct GitHistory {
    root: PathBuf,
}

impl GitHistory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Commit times for `path`, newest first.
    fn commit_times(&self, path: &Path) -> Option<Vec<i64>> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(["log", "--follow", "--format=%ct", "--"])
            .arg(path)
            .output();
        let output = match output {
            Ok(output) => output,
            Err(err) => {
                tracing::debug!(error = %err, "git log execution failed");
                return None;
            }
        };
        if !output.status.success() {
            tracing::debug!(
                path = %path.display(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "git log failed"
            );
            return None;
        }

        let times = parse_commit_times(&String::from_utf8_lossy(&output.stdout));
        if times.is_empty() {
            None
        } else {
            Some(times)
        }
    }
}

impl HistoryProvider for GitHistory {
    fn first_commit_time(&self, path: &Path) -> Option<i64> {
        self.commit_times(path)?.last().copied()
    }

    fn last_commit_time(&self, path: &Path) -> Option<i64> {
        self.commit_times(path)?.first().copied()
    }

    fn changed_paths_since(&self, rev: &str) -> Vec<PathBuf> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(["diff", "--name-only", "--relative", rev, "--"])
            .output();
        match output {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(PathBuf::from)
                .collect(),
            Ok(output) => {
                tracing::warn!(
                    rev,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "git diff failed"
                );
                Vec::new()
            }
            Err(err) => {
                tracing::warn!(rev, error = %err, "git diff execution failed");
                Vec::new()
            }
        }
    }
}

/// Parses `%ct` lines (epoch seconds) into epoch milliseconds.
fn parse_commit_times(stdout: &str) -> Vec<i64> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse::<i64>().ok())
        .map(|secs| secs.saturating_mul(1000))
        .collect()
}
