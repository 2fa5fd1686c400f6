//! Experiment harness: run the optimizer many times per configuration and
//! compare the distributions of the results.
//!
//! Usage:
//!   gaharness --trials 1000 --config S=1=Example/params1.json \
//!             --config S=2=Example/params2.json --output outcome_dist.svg

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use gaharness::aggregator::{CancelToken, ComparisonEntry, ExperimentAggregator, ProgressFn, TrialBatchResult};
use gaharness::benchmark;
use gaharness::config::{timeout_from_secs, ConfigRef, GroundTruth, HarnessConfig};
use gaharness::logging::{self, log, obj, v_num, v_str, Domain, Level};
use gaharness::render::{render_histogram, HistogramSeries};
use gaharness::runner::TrialRunner;
use gaharness::stats::{linspace, BatchSummary, Histogram};
use gaharness::storage::ResultStore;

#[derive(Parser, Debug)]
#[command(name = "gaharness")]
#[command(version, about = "Repeated-trial harness for an external optimizer")]
struct Cli {
    /// Trials per configuration [env: TRIALS, default 1000]
    #[arg(long)]
    trials: Option<usize>,

    /// Configuration to run, as LABEL=PATH (repeat to compare)
    #[arg(long = "config", value_name = "LABEL=PATH", required = true)]
    configs: Vec<ConfigRef>,

    /// Histogram image [env: OUTPUT, default outcome_dist.svg]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Optimizer binary [env: OPTIMIZER_BIN]
    #[arg(long)]
    optimizer: Option<PathBuf>,

    /// Working directory for every trial [env: WORK_DIR]
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Trials in flight at once; 0 uses every core [env: WORKERS, default 1]
    #[arg(long)]
    workers: Option<usize>,

    /// Kill a trial after this many seconds [env: TRIAL_TIMEOUT_SECS]
    #[arg(long = "timeout-secs", value_name = "SECS", value_parser = parse_timeout)]
    timeout_secs: Option<Duration>,

    /// Lower histogram edge [env: HIST_LOW, default -2600]
    #[arg(long = "hist-low", allow_negative_numbers = true)]
    hist_low: Option<f64>,

    /// Upper histogram edge [env: HIST_HIGH, default -1500]
    #[arg(long = "hist-high", allow_negative_numbers = true)]
    hist_high: Option<f64>,

    /// Number of histogram edges [env: HIST_EDGES, default 100]
    #[arg(long = "hist-edges")]
    hist_edges: Option<usize>,

    /// Known optimum for success probability, e.g. 420.97,420.97
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true, conflicts_with = "truth_schwefel")]
    truth: Option<Vec<f64>>,

    /// Use the Schwefel optimum of this dimension as ground truth
    #[arg(long = "truth-schwefel", value_name = "DIM")]
    truth_schwefel: Option<usize>,

    /// Distance below which a trial counts as having found the optimum [env: SUCCESS_TOLERANCE]
    #[arg(long)]
    tolerance: Option<f64>,

    /// Write the comparison report as JSON
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Append batch results to a SQLite store [env: RESULTS_DB]
    #[arg(long)]
    db: Option<PathBuf>,

    /// Log (truncated) raw output of failed trials [env: LOG_RAW_FAILURES]
    #[arg(long = "log-raw-failures")]
    log_raw_failures: bool,
}

/// `--timeout-secs` value; zero (or negative) disables the timeout.
fn parse_timeout(s: &str) -> std::result::Result<Duration, String> {
    let secs: f64 = s.trim().parse().map_err(|_| format!("not a number of seconds: {:?}", s))?;
    Ok(timeout_from_secs(secs)?.unwrap_or(Duration::ZERO))
}

impl Cli {
    fn apply(&self, mut cfg: HarnessConfig) -> HarnessConfig {
        if let Some(v) = self.trials { cfg.trials = v; }
        if let Some(v) = &self.output { cfg.output = v.clone(); }
        if let Some(v) = &self.optimizer { cfg.optimizer_bin = v.clone(); }
        if let Some(v) = &self.workdir { cfg.work_dir = v.clone(); }
        if let Some(v) = self.workers { cfg.workers = v; }
        if let Some(v) = self.timeout_secs { cfg.trial_timeout = (!v.is_zero()).then_some(v); }
        if let Some(v) = self.hist_low { cfg.hist_low = v; }
        if let Some(v) = self.hist_high { cfg.hist_high = v; }
        if let Some(v) = self.hist_edges { cfg.hist_edges = v; }
        if let Some(v) = &self.db { cfg.results_db = Some(v.clone()); }
        if let Some(v) = self.tolerance { cfg.success_tolerance = v; }
        cfg.log_raw_failures |= self.log_raw_failures;
        cfg
    }

    fn ground_truth(&self, tolerance: f64) -> Option<GroundTruth> {
        let optimum = match (&self.truth, self.truth_schwefel) {
            (Some(x), _) => x.clone(),
            (None, Some(dim)) => benchmark::known_optimum(dim).0,
            (None, None) => return None,
        };
        Some(GroundTruth { optimum, tolerance })
    }
}

#[derive(Serialize)]
struct ReportEntry<'a> {
    label: &'a str,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a TrialBatchResult>,
    summary: Option<BatchSummary>,
    success_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct Report<'a> {
    run_id: String,
    trials: usize,
    histogram_edges: &'a [f64],
    configurations: Vec<ReportEntry<'a>>,
}

fn fmt_opt(v: Option<f64>, prec: usize) -> String {
    v.map(|x| format!("{:.*}", prec, x)).unwrap_or_else(|| "-".to_string())
}

fn print_report(entries: &[ComparisonEntry], trials: usize) {
    println!();
    println!("{:<20} {:>8} {:>8} {:>8} {:>9} {:>12} {:>12} {:>12} {:>10}",
        "config", "trials", "ok", "failed", "p(opt)", "best", "mean", "median", "std");
    println!("{}", "-".repeat(107));

    let (mut ok, mut failed) = (0usize, 0usize);
    for entry in entries {
        match &entry.outcome {
            Ok(r) => {
                let s = r.summary();
                println!("{:<20} {:>8} {:>8} {:>8} {:>9} {:>12} {:>12} {:>12} {:>10}",
                    r.configuration_label(), r.total_trials(), r.success_count(), r.failure_count(),
                    fmt_opt(r.success_probability(), 3),
                    fmt_opt(s.as_ref().map(|s| s.min), 2), fmt_opt(s.as_ref().map(|s| s.mean), 2),
                    fmt_opt(s.as_ref().map(|s| s.median), 2), fmt_opt(s.as_ref().map(|s| s.std_dev), 2));
                ok += r.success_count();
                failed += r.failure_count();
            }
            Err(err) => println!("{:<20} {:>8} {}", entry.config.label, trials, err),
        }
    }

    let with_failures: Vec<&TrialBatchResult> = entries
        .iter()
        .filter_map(ComparisonEntry::result)
        .filter(|r| r.failure_count() > 0)
        .collect();
    if !with_failures.is_empty() {
        println!("\nFAILURE REASONS:");
        for r in with_failures {
            let reasons: Vec<String> = r.failure_reasons().iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            println!("  {:<18} {}", r.configuration_label(), reasons.join("  "));
        }
    }
    println!();
    println!("Total: {} parsed, {} failed", ok, failed);
}

fn progress_printer() -> ProgressFn {
    Arc::new(|label: &str, done: usize, total: usize| {
        let step = (total / 20).max(1);
        if done % step == 0 || done == total {
            eprintln!("[{}] {} / {}", label, done, total);
        }
    })
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = cli.apply(HarnessConfig::from_env());
    if cfg.hist_edges < 2 || !(cfg.hist_low < cfg.hist_high) {
        bail!(
            "histogram needs at least 2 edges and low < high (got {} edges over [{}, {}])",
            cfg.hist_edges, cfg.hist_low, cfg.hist_high
        );
    }
    let ground_truth = cli.ground_truth(cfg.success_tolerance);

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log(Level::Warn, Domain::System, "interrupt", obj(&[("msg", v_str("cancelling batch"))]));
                cancel.cancel();
            }
        });
    }

    let runner = TrialRunner::new(&cfg.optimizer_bin, &cfg.work_dir).with_timeout(cfg.trial_timeout);
    let aggregator = ExperimentAggregator::new(Arc::new(runner))
        .with_workers(cfg.effective_workers())
        .with_ground_truth(ground_truth.clone())
        .with_raw_failure_logging(cfg.log_raw_failures)
        .with_cancel_token(cancel)
        .with_progress(progress_printer());

    log(
        Level::Info,
        Domain::System,
        "harness_start",
        obj(&[
            ("optimizer", v_str(&cfg.optimizer_bin.display().to_string())),
            ("work_dir", v_str(&cfg.work_dir.display().to_string())),
            ("configs", json!(cli.configs.len())),
            ("trials", json!(cfg.trials)),
            ("workers", json!(cfg.effective_workers())),
            ("ground_truth", json!(ground_truth.is_some())),
        ]),
    );

    let entries = aggregator
        .run_comparison(&cli.configs, cfg.trials)
        .await
        .context("comparison aborted")?;
    print_report(&entries, cfg.trials);

    let edges = linspace(cfg.hist_low, cfg.hist_high, cfg.hist_edges);
    let histograms: Vec<(&str, Histogram)> = entries
        .iter()
        .filter_map(ComparisonEntry::result)
        .map(|r| (r.configuration_label(), r.histogram(&edges)))
        .collect();
    if histograms.is_empty() {
        log(Level::Warn, Domain::System, "no_histogram", obj(&[("msg", v_str("no configuration completed"))]));
    } else {
        let series: Vec<HistogramSeries> = histograms
            .iter()
            .map(|(label, h)| HistogramSeries { label: *label, histogram: h })
            .collect();
        render_histogram(&series, cfg.trials, &cfg.output)
            .with_context(|| format!("writing {}", cfg.output.display()))?;
        println!("Histogram written to {}", cfg.output.display());
    }

    if let Some(path) = &cli.summary {
        let report = Report {
            run_id: logging::run_id(),
            trials: cfg.trials,
            histogram_edges: &edges,
            configurations: entries
                .iter()
                .map(|e| ReportEntry {
                    label: &e.config.label,
                    config_path: e.config.path.display().to_string(),
                    result: e.result(),
                    summary: e.result().and_then(TrialBatchResult::summary),
                    success_probability: e.result().and_then(TrialBatchResult::success_probability),
                    error: e.outcome.as_ref().err().map(|err| err.to_string()),
                })
                .collect(),
        };
        let text = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    }

    if let Some(db) = &cfg.results_db {
        let mut store = ResultStore::open(db).with_context(|| format!("opening {}", db.display()))?;
        for entry in &entries {
            if let Some(result) = entry.result() {
                store.persist_batch(&cfg.work_dir.join(&entry.config.path), result)?;
            }
        }
    }

    log(
        Level::Info,
        Domain::System,
        "harness_done",
        obj(&[
            ("completed", json!(entries.iter().filter(|e| e.result().is_some()).count())),
            ("failed_configs", json!(entries.iter().filter(|e| e.result().is_none()).count())),
            ("hist_low", v_num(cfg.hist_low)),
            ("hist_high", v_num(cfg.hist_high)),
        ]),
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log(Level::Fatal, Domain::System, "harness_failed", obj(&[("error", v_str(&format!("{:#}", err)))]));
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
