//! One optimizer invocation per trial.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use crate::error::{HarnessError, ParseFailure, Result};
use crate::parser::{MarkerParser, ResultParser, TrialRecord};

/// What a single trial produced. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialOutcome {
    Parsed(TrialRecord),
    Failed {
        failure: ParseFailure,
        /// Captured stdout (and stderr, if any) kept for diagnosis.
        raw: String,
    },
}

impl TrialOutcome {
    pub fn failed(failure: ParseFailure, raw: impl Into<String>) -> Self {
        TrialOutcome::Failed {
            failure,
            raw: raw.into(),
        }
    }

    pub fn record(&self) -> Option<&TrialRecord> {
        match self {
            TrialOutcome::Parsed(r) => Some(r),
            TrialOutcome::Failed { .. } => None,
        }
    }
}

/// Runs one trial for a configuration.
///
/// `Err` is reserved for conditions that make every further trial pointless
/// (the optimizer cannot be launched); anything wrong with one run comes back
/// as [`TrialOutcome::Failed`].
#[async_trait]
pub trait TrialExecutor: Send + Sync {
    async fn run_once(&self, config_path: &Path) -> Result<TrialOutcome>;

    /// Whether the configuration file is reachable from where trials run.
    fn config_exists(&self, config_path: &Path) -> bool {
        config_path.exists()
    }
}

/// Spawns the external optimizer as `<binary> <config_path>` in a fixed
/// working directory and parses its stdout.
#[derive(Clone)]
pub struct TrialRunner {
    binary: PathBuf,
    work_dir: PathBuf,
    timeout: Option<Duration>,
    parser: Arc<dyn ResultParser>,
}

impl std::fmt::Debug for TrialRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrialRunner")
            .field("binary", &self.binary)
            .field("work_dir", &self.work_dir)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TrialRunner {
    pub fn new(binary: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            work_dir: work_dir.into(),
            timeout: None,
            parser: Arc::new(MarkerParser),
        }
    }

    /// Kill the optimizer and record a failure when a trial runs longer than `limit`.
    pub fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn ResultParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command(&self, config_path: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(config_path)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // dropping the wait future (timeout, cancellation) terminates the child
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TrialExecutor for TrialRunner {
    async fn run_once(&self, config_path: &Path) -> Result<TrialOutcome> {
        let child = self
            .command(config_path)
            .spawn()
            .map_err(|source| HarnessError::LaunchFailure {
                binary: self.binary.clone(),
                source,
            })?;

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(waited) => waited,
                Err(_) => {
                    return Ok(TrialOutcome::failed(
                        ParseFailure::TimedOut {
                            secs: limit.as_secs_f64(),
                        },
                        String::new(),
                    ))
                }
            },
            None => child.wait_with_output().await,
        };

        let output = match waited {
            Ok(output) => output,
            Err(err) => {
                return Ok(TrialOutcome::failed(
                    ParseFailure::incomplete(format!("failed to collect output: {}", err)),
                    String::new(),
                ))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let mut raw = stdout;
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.is_empty() {
                raw.push_str("\n[stderr]\n");
                raw.push_str(&stderr);
            }
            return Ok(TrialOutcome::failed(
                ParseFailure::NonZeroExit {
                    code: output.status.code(),
                },
                raw,
            ));
        }

        Ok(match self.parser.parse(&stdout) {
            Ok(record) => TrialOutcome::Parsed(record),
            Err(failure) => TrialOutcome::failed(failure, stdout),
        })
    }

    fn config_exists(&self, config_path: &Path) -> bool {
        self.work_dir.join(config_path).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_launch_failure() {
        let runner = TrialRunner::new("/definitely/not/a/binary", ".");
        let err = runner.run_once(Path::new("cfg.json")).await.unwrap_err();
        assert!(matches!(err, HarnessError::LaunchFailure { .. }));
        assert!(err.is_fatal_to_comparison());
    }

    #[test]
    fn test_outcome_record_accessor() {
        let ok = TrialOutcome::Parsed(TrialRecord::new(vec![1.0], 2.0));
        assert_eq!(ok.record().map(|r| r.objective_value), Some(2.0));
        let bad = TrialOutcome::failed(ParseFailure::marker("x: ["), "garbage");
        assert!(bad.record().is_none());
    }

    #[test]
    fn test_config_exists_is_relative_to_work_dir() {
        let dir = std::env::temp_dir();
        let runner = TrialRunner::new("true", &dir);
        assert!(runner.config_exists(Path::new(".")));
        assert!(!runner.config_exists(Path::new("no-such-config-file-7f3a.json")));
    }
}
