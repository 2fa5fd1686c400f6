//! Error taxonomy for the harness.
//!
//! Per-trial problems are *data* ([`ParseFailure`]) and are folded into batch
//! counts. Everything else is a [`HarnessError`] that aborts only the
//! operation it belongs to.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Why a single trial contributed no data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum ParseFailure {
    /// A required marker literal was absent from the output.
    #[error("marker {marker:?} not found")]
    MarkerNotFound { marker: String },

    /// A token between the markers did not parse as a finite float.
    #[error("malformed float {token:?}")]
    MalformedFloat { token: String },

    /// Output stopped before a delimiter (truncated or crashed run).
    #[error("incomplete output: {detail}")]
    Incomplete { detail: String },

    /// The optimizer exited unsuccessfully.
    #[error("optimizer exited with status {code:?}")]
    NonZeroExit { code: Option<i32> },

    /// The per-trial timeout expired and the process was killed.
    #[error("trial timed out after {secs:.1}s")]
    TimedOut { secs: f64 },
}

impl ParseFailure {
    /// Stable short name used for tallies and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ParseFailure::MarkerNotFound { .. } => "marker_not_found",
            ParseFailure::MalformedFloat { .. } => "malformed_float",
            ParseFailure::Incomplete { .. } => "incomplete",
            ParseFailure::NonZeroExit { .. } => "non_zero_exit",
            ParseFailure::TimedOut { .. } => "timed_out",
        }
    }

    pub(crate) fn marker(marker: &str) -> Self {
        ParseFailure::MarkerNotFound {
            marker: marker.to_string(),
        }
    }

    pub(crate) fn malformed(token: &str) -> Self {
        ParseFailure::MalformedFloat {
            token: token.to_string(),
        }
    }

    pub(crate) fn incomplete(detail: impl Into<String>) -> Self {
        ParseFailure::Incomplete {
            detail: detail.into(),
        }
    }
}

/// Failures that abort an operation (batch, render, overlay, load).
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The optimizer binary could not be started at all.
    #[error("cannot launch optimizer {binary}: {source}")]
    LaunchFailure {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file named in a comparison does not exist.
    #[error("configuration {label:?} not found at {path}")]
    ConfigMissing { label: String, path: PathBuf },

    /// A population file is missing or malformed.
    #[error("cannot load snapshot {path}: {reason}")]
    SnapshotLoadFailure { path: PathBuf, reason: String },

    /// A requested sub-group range falls outside the snapshot or overlaps another.
    #[error("group range {start}..{end} invalid for snapshot of {len} rows: {reason}")]
    IndexRangeFailure {
        start: usize,
        end: usize,
        len: usize,
        reason: String,
    },

    /// `best_solution` needs a fitness column.
    #[error("snapshot has no usable fitness values")]
    MissingFitness,

    #[error("invalid landscape grid: {0}")]
    InvalidGrid(String),

    #[error("batch cancelled")]
    Cancelled,

    #[error("render failed: {0}")]
    Render(String),

    #[error("results store: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Whether this error must stop every remaining configuration in a comparison.
    pub fn is_fatal_to_comparison(&self) -> bool {
        matches!(self, HarnessError::LaunchFailure { .. } | HarnessError::Cancelled)
    }

    pub(crate) fn render<E: std::fmt::Display>(err: E) -> Self {
        HarnessError::Render(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds_are_distinct() {
        let kinds = [
            ParseFailure::marker("x: [").kind(),
            ParseFailure::malformed("abc").kind(),
            ParseFailure::incomplete("eof").kind(),
            ParseFailure::NonZeroExit { code: Some(1) }.kind(),
            ParseFailure::TimedOut { secs: 1.0 }.kind(),
        ];
        let mut unique = kinds.to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), kinds.len());
    }

    #[test]
    fn test_timed_out_carries_fractional_seconds() {
        let a = ParseFailure::TimedOut { secs: 1.5 };
        assert_eq!(a, ParseFailure::TimedOut { secs: 1.5 });
        assert_ne!(a, ParseFailure::TimedOut { secs: 2.5 });
        assert_eq!(a.kind(), "timed_out");
        assert_eq!(a.to_string(), "trial timed out after 1.5s");
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["timed_out"]["secs"], 1.5);
    }

    #[test]
    fn test_launch_failure_is_fatal() {
        let err = HarnessError::LaunchFailure {
            binary: PathBuf::from("/nope"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.is_fatal_to_comparison());
        let err = HarnessError::ConfigMissing {
            label: "S=1".into(),
            path: PathBuf::from("p.json"),
        };
        assert!(!err.is_fatal_to_comparison());
    }
}
