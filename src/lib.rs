//! Experiment harness for a stochastic optimizer run as an external process,
//! plus a visualiser for the Schwefel landscape and recorded populations.

pub mod aggregator;
pub mod benchmark;
pub mod config;
pub mod error;
pub mod landscape;
pub mod logging;
pub mod overlay;
pub mod parser;
pub mod render;
pub mod runner;
pub mod snapshot;
pub mod stats;
pub mod storage;

pub use aggregator::{CancelToken, ComparisonEntry, ExperimentAggregator, TrialBatchResult};
pub use config::{ConfigRef, GroundTruth, HarnessConfig};
pub use error::{HarnessError, ParseFailure, Result};
pub use landscape::{build_grid, LandscapeGrid};
pub use runner::{TrialExecutor, TrialOutcome, TrialRunner};
