//! Batches of trials per configuration and side-by-side comparisons.
//!
//! A batch dispatches `trial_count` independent trials through a
//! [`TrialExecutor`], at most `workers` at a time, and folds every outcome into
//! a [`TrialBatchResult`]. Completion order is not preserved, so
//! `objective_values` is a multiset. Cancelling drops the in-flight trials
//! (which kills their processes) and discards the partial result.

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::{ConfigRef, GroundTruth};
use crate::error::{HarnessError, Result};
use crate::logging::{self, log, obj, v_str, Domain, Level};
use crate::runner::{TrialExecutor, TrialOutcome};
use crate::stats::{BatchSummary, Histogram};

/// Finalized statistics for one configuration's batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialBatchResult {
    configuration_label: String,
    objective_values: Vec<f64>,
    success_count: usize,
    failure_count: usize,
    total_trials: usize,
    optimum_hits: Option<usize>,
    failure_reasons: BTreeMap<String, usize>,
}

impl TrialBatchResult {
    pub fn configuration_label(&self) -> &str {
        &self.configuration_label
    }

    pub fn objective_values(&self) -> &[f64] {
        &self.objective_values
    }

    pub fn success_count(&self) -> usize {
        self.success_count
    }

    pub fn failure_count(&self) -> usize {
        self.failure_count
    }

    pub fn total_trials(&self) -> usize {
        self.total_trials
    }

    /// Parsed trials that landed within tolerance of the ground truth, when enabled.
    pub fn optimum_hits(&self) -> Option<usize> {
        self.optimum_hits
    }

    /// Failure tally keyed by [`crate::error::ParseFailure::kind`].
    pub fn failure_reasons(&self) -> &BTreeMap<String, usize> {
        &self.failure_reasons
    }

    /// `optimum_hits / total_trials`; `None` unless ground truth was supplied.
    pub fn success_probability(&self) -> Option<f64> {
        let hits = self.optimum_hits?;
        if self.total_trials == 0 {
            return Some(0.0);
        }
        Some(hits as f64 / self.total_trials as f64)
    }

    pub fn summary(&self) -> Option<BatchSummary> {
        BatchSummary::from_values(&self.objective_values)
    }

    pub fn histogram(&self, edges: &[f64]) -> Histogram {
        Histogram::from_values(&self.objective_values, edges)
    }

    /// Fold already-collected outcomes into a finalized result.
    pub fn from_outcomes(label: &str, outcomes: &[TrialOutcome], ground_truth: Option<GroundTruth>) -> Self {
        let mut acc = BatchAccumulator::new(label, ground_truth);
        for outcome in outcomes {
            acc.record(outcome);
        }
        acc.finish()
    }
}

/// Mutable state of a batch in progress. Only [`finish`](Self::finish) hands
/// out a [`TrialBatchResult`].
#[derive(Debug)]
struct BatchAccumulator {
    label: String,
    ground_truth: Option<GroundTruth>,
    values: Vec<f64>,
    successes: usize,
    failures: usize,
    hits: usize,
    reasons: BTreeMap<String, usize>,
}

impl BatchAccumulator {
    fn new(label: &str, ground_truth: Option<GroundTruth>) -> Self {
        Self {
            label: label.to_string(),
            ground_truth,
            values: Vec::new(),
            successes: 0,
            failures: 0,
            hits: 0,
            reasons: BTreeMap::new(),
        }
    }

    fn record(&mut self, outcome: &TrialOutcome) {
        match outcome {
            TrialOutcome::Parsed(rec) => {
                self.values.push(rec.objective_value);
                self.successes += 1;
                if let Some(gt) = &self.ground_truth {
                    if matches!(rec.distance_to(&gt.optimum), Some(d) if d < gt.tolerance) {
                        self.hits += 1;
                    }
                }
            }
            TrialOutcome::Failed { failure, .. } => {
                self.failures += 1;
                *self.reasons.entry(failure.kind().to_string()).or_insert(0) += 1;
            }
        }
    }

    fn done(&self) -> usize {
        self.successes + self.failures
    }

    fn finish(self) -> TrialBatchResult {
        TrialBatchResult {
            configuration_label: self.label,
            total_trials: self.successes + self.failures,
            success_count: self.successes,
            failure_count: self.failures,
            objective_values: self.values,
            optimum_hits: self.ground_truth.map(|_| self.hits),
            failure_reasons: self.reasons,
        }
    }
}

/// Cooperative cancellation shared between the caller and running batches.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|c| *c).await;
    }
}

/// Callback receiving `(label, done, total)` after every finished trial.
pub type ProgressFn = Arc<dyn Fn(&str, usize, usize) + Send + Sync>;

/// One row of a comparison, in input order.
#[derive(Debug)]
pub struct ComparisonEntry {
    pub config: ConfigRef,
    pub outcome: Result<TrialBatchResult>,
}

impl ComparisonEntry {
    pub fn result(&self) -> Option<&TrialBatchResult> {
        self.outcome.as_ref().ok()
    }
}

pub struct ExperimentAggregator {
    executor: Arc<dyn TrialExecutor>,
    workers: usize,
    ground_truth: Option<GroundTruth>,
    log_raw_failures: bool,
    cancel: CancelToken,
    progress: Option<ProgressFn>,
}

impl ExperimentAggregator {
    pub fn new(executor: Arc<dyn TrialExecutor>) -> Self {
        Self {
            executor,
            workers: 1,
            ground_truth: None,
            log_raw_failures: false,
            cancel: CancelToken::new(),
            progress: None,
        }
    }

    /// Maximum number of trials in flight at once (at least 1).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Enable success-probability reporting against a known optimum.
    pub fn with_ground_truth(mut self, ground_truth: Option<GroundTruth>) -> Self {
        self.ground_truth = ground_truth;
        self
    }

    pub fn with_raw_failure_logging(mut self, enabled: bool) -> Self {
        self.log_raw_failures = enabled;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run `trial_count` trials of one configuration.
    ///
    /// Per-trial failures are counted, never returned. Errors: a missing
    /// configuration file, a launch failure, or cancellation.
    pub async fn run_batch(
        &self,
        label: &str,
        config_path: &Path,
        trial_count: usize,
    ) -> Result<TrialBatchResult> {
        if self.cancel.is_cancelled() {
            return Err(HarnessError::Cancelled);
        }
        if !self.executor.config_exists(config_path) {
            return Err(HarnessError::ConfigMissing {
                label: label.to_string(),
                path: config_path.to_path_buf(),
            });
        }
        logging::log_batch_start(
            label,
            &config_path.display().to_string(),
            trial_count,
            self.workers,
        );

        let config_path: PathBuf = config_path.to_path_buf();
        let mut trials = stream::iter(0..trial_count)
            .map(|i| {
                let executor = Arc::clone(&self.executor);
                let path = config_path.clone();
                async move { (i, executor.run_once(&path).await) }
            })
            .buffer_unordered(self.workers);

        let mut acc = BatchAccumulator::new(label, self.ground_truth.clone());
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    log(
                        Level::Warn,
                        Domain::System,
                        "batch_cancelled",
                        obj(&[("label", v_str(label)), ("done", serde_json::json!(acc.done()))]),
                    );
                    return Err(HarnessError::Cancelled);
                }
                next = trials.next() => match next {
                    None => break,
                    Some((_, Err(err))) => return Err(err),
                    Some((i, Ok(outcome))) => {
                        if let TrialOutcome::Failed { failure, raw } = &outcome {
                            let raw = self.log_raw_failures.then_some(raw.as_str());
                            logging::log_trial_failure(label, i, failure, raw);
                        }
                        acc.record(&outcome);
                        logging::log_progress(label, acc.done(), trial_count);
                        if let Some(progress) = &self.progress {
                            progress(label, acc.done(), trial_count);
                        }
                    }
                },
            }
        }

        let result = acc.finish();
        let reasons: Vec<(&str, usize)> = result
            .failure_reasons
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        logging::log_batch_summary(
            label,
            result.total_trials,
            result.success_count,
            result.failure_count,
            &reasons,
            result.success_probability(),
        );
        Ok(result)
    }

    /// Run one batch per configuration, returning entries in input order.
    ///
    /// A configuration-level error is kept in its own entry and the comparison
    /// moves on; launch failure and cancellation abort the whole comparison.
    pub async fn run_comparison(
        &self,
        configs: &[ConfigRef],
        trial_count: usize,
    ) -> Result<Vec<ComparisonEntry>> {
        let mut entries = Vec::with_capacity(configs.len());
        for config in configs {
            let outcome = self.run_batch(&config.label, &config.path, trial_count).await;
            match outcome {
                Err(err) if err.is_fatal_to_comparison() => return Err(err),
                Err(err) => {
                    log(
                        Level::Error,
                        Domain::Batch,
                        "batch_failed",
                        obj(&[
                            ("label", v_str(&config.label)),
                            ("error", v_str(&err.to_string())),
                        ]),
                    );
                    entries.push(ComparisonEntry {
                        config: config.clone(),
                        outcome: Err(err),
                    });
                }
                Ok(result) => entries.push(ComparisonEntry {
                    config: config.clone(),
                    outcome: Ok(result),
                }),
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseFailure;
    use crate::parser::TrialRecord;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Alternates success/failure by call index; `missing` configs do not exist.
    struct ScriptedExecutor {
        calls: AtomicUsize,
        fail_every: usize,
        missing: Vec<PathBuf>,
        delay: Option<Duration>,
    }

    impl ScriptedExecutor {
        fn new(fail_every: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_every,
                missing: Vec::new(),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl TrialExecutor for ScriptedExecutor {
        async fn run_once(&self, _config_path: &Path) -> Result<TrialOutcome> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            if self.fail_every > 0 && n % self.fail_every == 0 {
                return Ok(TrialOutcome::failed(ParseFailure::marker("x: ["), "garbage"));
            }
            Ok(TrialOutcome::Parsed(TrialRecord::new(vec![n as f64, 0.0], -(n as f64))))
        }

        fn config_exists(&self, config_path: &Path) -> bool {
            !self.missing.iter().any(|m| m == config_path)
        }
    }

    struct LaunchFails;

    #[async_trait]
    impl TrialExecutor for LaunchFails {
        async fn run_once(&self, _config_path: &Path) -> Result<TrialOutcome> {
            Err(HarnessError::LaunchFailure {
                binary: PathBuf::from("GA_run"),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }

        fn config_exists(&self, _config_path: &Path) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_batch_counts_are_consistent() {
        for workers in [1, 3, 8] {
            let agg = ExperimentAggregator::new(Arc::new(ScriptedExecutor::new(3))).with_workers(workers);
            let r = agg.run_batch("S=1", Path::new("p.json"), 10).await.unwrap();
            assert_eq!(r.total_trials(), 10);
            assert_eq!(r.success_count() + r.failure_count(), 10);
            assert_eq!(r.objective_values().len(), r.success_count());
            // calls 0,3,6,9 fail
            assert_eq!(r.failure_count(), 4);
            assert_eq!(r.failure_reasons().get("marker_not_found"), Some(&4));
            assert_eq!(r.success_probability(), None);
        }
    }

    #[tokio::test]
    async fn test_parallel_values_match_sequential_as_multiset() {
        let seq = ExperimentAggregator::new(Arc::new(ScriptedExecutor::new(0)))
            .run_batch("a", Path::new("p"), 12)
            .await
            .unwrap();
        let par = ExperimentAggregator::new(Arc::new(ScriptedExecutor::new(0)))
            .with_workers(4)
            .run_batch("a", Path::new("p"), 12)
            .await
            .unwrap();
        let mut a = seq.objective_values().to_vec();
        let mut b = par.objective_values().to_vec();
        a.sort_by(|x, y| x.total_cmp(y));
        b.sort_by(|x, y| x.total_cmp(y));
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_zero_trials() {
        let agg = ExperimentAggregator::new(Arc::new(ScriptedExecutor::new(0)));
        let r = agg.run_batch("empty", Path::new("p"), 0).await.unwrap();
        assert_eq!(r.total_trials(), 0);
        assert!(r.objective_values().is_empty());
        assert!(r.summary().is_none());
    }

    #[tokio::test]
    async fn test_success_probability_with_ground_truth() {
        // decision vectors are [n, 0]; optimum [0, 0] with tolerance 2.5 hits n = 0, 1, 2
        let agg = ExperimentAggregator::new(Arc::new(ScriptedExecutor::new(0))).with_ground_truth(Some(GroundTruth {
            optimum: vec![0.0, 0.0],
            tolerance: 2.5,
        }));
        let r = agg.run_batch("gt", Path::new("p"), 8).await.unwrap();
        assert_eq!(r.optimum_hits(), Some(3));
        assert_eq!(r.success_probability(), Some(3.0 / 8.0));
    }

    #[tokio::test]
    async fn test_ground_truth_dimension_mismatch_never_hits() {
        let agg = ExperimentAggregator::new(Arc::new(ScriptedExecutor::new(0))).with_ground_truth(Some(GroundTruth {
            optimum: vec![0.0, 0.0, 0.0],
            tolerance: 1e9,
        }));
        let r = agg.run_batch("gt", Path::new("p"), 4).await.unwrap();
        assert_eq!(r.optimum_hits(), Some(0));
    }

    #[tokio::test]
    async fn test_comparison_preserves_order_and_isolates_missing_config() {
        let mut exec = ScriptedExecutor::new(0);
        exec.missing.push(PathBuf::from("missing.json"));
        let agg = ExperimentAggregator::new(Arc::new(exec));
        let configs = vec![
            ConfigRef::new("S=50", "p6.json"),
            ConfigRef::new("broken", "missing.json"),
            ConfigRef::new("S=1", "p1.json"),
            ConfigRef::new("S=10", "p4.json"),
        ];
        let entries = agg.run_comparison(&configs, 3).await.unwrap();
        let labels: Vec<&str> = entries.iter().map(|e| e.config.label.as_str()).collect();
        assert_eq!(labels, vec!["S=50", "broken", "S=1", "S=10"]);
        assert!(matches!(entries[1].outcome, Err(HarnessError::ConfigMissing { .. })));
        for i in [0, 2, 3] {
            let r = entries[i].result().unwrap();
            assert_eq!(r.configuration_label(), configs[i].label);
            assert_eq!(r.success_count(), 3);
        }
    }

    #[tokio::test]
    async fn test_launch_failure_aborts_comparison() {
        let agg = ExperimentAggregator::new(Arc::new(LaunchFails));
        let configs = vec![ConfigRef::new("a", "a.json"), ConfigRef::new("b", "b.json")];
        let err = agg.run_comparison(&configs, 5).await.unwrap_err();
        assert!(matches!(err, HarnessError::LaunchFailure { .. }));
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let agg = ExperimentAggregator::new(Arc::new(ScriptedExecutor::new(0)));
        agg.cancel_token().cancel();
        let err = agg.run_batch("a", Path::new("p"), 5).await.unwrap_err();
        assert!(matches!(err, HarnessError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_stops_issuing_trials() {
        let mut exec = ScriptedExecutor::new(0);
        exec.delay = Some(Duration::from_millis(20));
        let exec = Arc::new(exec);
        let cancel = CancelToken::new();
        let agg = ExperimentAggregator::new(exec.clone())
            .with_workers(2)
            .with_cancel_token(cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let err = agg.run_batch("slow", Path::new("p"), 1000).await.unwrap_err();
        canceller.await.unwrap();
        assert!(matches!(err, HarnessError::Cancelled));
        assert!(exec.calls.load(Ordering::SeqCst) < 1000);
    }

    #[tokio::test]
    async fn test_progress_reports_every_trial() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let agg = ExperimentAggregator::new(Arc::new(ScriptedExecutor::new(2))).with_progress(Arc::new(
            move |label: &str, done: usize, total: usize| {
                sink.lock().unwrap().push((label.to_string(), done, total));
            },
        ));
        agg.run_batch("p", Path::new("p"), 4).await.unwrap();
        let seen = seen.lock().unwrap();
        let done: Vec<usize> = seen.iter().map(|(_, d, _)| *d).collect();
        assert_eq!(done, vec![1, 2, 3, 4]);
        assert!(seen.iter().all(|(l, _, t)| l == "p" && *t == 4));
    }
}
