//! Summarise harness logs.
//!
//! Usage:
//!   logparse <command> <file.jsonl> [options]
//!
//! Commands:
//!   summary <events.jsonl>    - Batches, per-configuration counts, failures by reason
//!   failures <trace.jsonl>    - List failed trials (needs LOG_LEVEL=debug when running)
//!   filter <file.jsonl>       - Print entries matching --domain/--level/--label

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Debug, Deserialize)]
struct LogEntry {
    ts: String,
    seq: u64,
    lvl: String,
    component: String,
    event: String,
    msg: Option<String>,
    #[serde(default)]
    data: Value,
    label: Option<String>,
    trial: Option<u64>,
}

#[derive(Debug, Default)]
struct BatchLine {
    total: u64,
    successes: u64,
    failures: u64,
    success_probability: Option<f64>,
}

#[derive(Debug, Default)]
struct LogStats {
    total_entries: u64,
    by_level: HashMap<String, u64>,
    by_domain: HashMap<String, u64>,
    first_ts: Option<String>,
    last_ts: Option<String>,
    batches_started: u64,
    batches: Vec<(String, BatchLine)>,
    failed_configs: Vec<(String, String)>,
    failure_reasons: BTreeMap<String, u64>,
    cancelled: bool,
    errors: u64,
}

#[derive(Debug, Clone, Default)]
struct FilterConfig {
    domains: Option<Vec<String>>,
    min_level: Option<String>,
    label: Option<String>,
}

fn level_rank(lvl: &str) -> u8 {
    match lvl.to_lowercase().as_str() {
        "trace" => 0,
        "debug" => 1,
        "info" => 2,
        "warn" => 3,
        "error" => 4,
        "fatal" => 5,
        _ => 2,
    }
}

fn read_entries(path: &Path) -> std::io::Result<Vec<(String, Option<LogEntry>)>> {
    let file = File::open(path)?;
    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let parsed = serde_json::from_str::<LogEntry>(&line).ok();
        out.push((line, parsed));
    }
    Ok(out)
}

fn entry_label(e: &LogEntry) -> String {
    e.label
        .clone()
        .or_else(|| e.data.get("label").and_then(|v| v.as_str()).map(str::to_string))
        .unwrap_or_else(|| "?".to_string())
}

fn u(data: &Value, key: &str) -> u64 {
    data.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn collect_stats(entries: Vec<(String, Option<LogEntry>)>) -> LogStats {
    let mut stats = LogStats::default();
    for (line, entry) in entries {
        let Some(e) = entry else {
            if !line.is_empty() {
                eprintln!("Failed to parse: {}", &line[..line.len().min(80)]);
            }
            continue;
        };
        stats.total_entries += 1;
        *stats.by_level.entry(e.lvl.clone()).or_insert(0) += 1;
        *stats.by_domain.entry(e.component.clone()).or_insert(0) += 1;
        if stats.first_ts.is_none() {
            stats.first_ts = Some(e.ts.clone());
        }
        stats.last_ts = Some(e.ts.clone());

        match e.event.as_str() {
            "batch_start" => stats.batches_started += 1,
            "batch_summary" => {
                if let Some(reasons) = e.data.get("failure_reasons").and_then(Value::as_object) {
                    for (k, v) in reasons {
                        *stats.failure_reasons.entry(k.clone()).or_insert(0) += v.as_u64().unwrap_or(0);
                    }
                }
                stats.batches.push((
                    entry_label(&e),
                    BatchLine {
                        total: u(&e.data, "total"),
                        successes: u(&e.data, "successes"),
                        failures: u(&e.data, "failures"),
                        success_probability: e.data.get("success_probability").and_then(Value::as_f64),
                    },
                ));
            }
            "batch_failed" => {
                let err = e.data.get("error").and_then(Value::as_str).unwrap_or("?").to_string();
                stats.failed_configs.push((entry_label(&e), err));
            }
            "batch_cancelled" => stats.cancelled = true,
            _ => {}
        }
        if e.lvl == "ERROR" || e.lvl == "FATAL" {
            stats.errors += 1;
        }
    }
    stats
}

fn cmd_summary(path: &Path) -> std::io::Result<()> {
    let stats = collect_stats(read_entries(path)?);

    println!("=== Harness Log Summary ===\n");
    println!("Total entries: {}", stats.total_entries);
    println!(
        "Time range: {} → {}",
        stats.first_ts.as_deref().unwrap_or("?"),
        stats.last_ts.as_deref().unwrap_or("?")
    );

    println!("\n--- By Level ---");
    let mut levels: Vec<_> = stats.by_level.iter().collect();
    levels.sort_by_key(|(k, _)| level_rank(k));
    for (lvl, count) in levels {
        println!("  {:<8} {:>8}", lvl, count);
    }

    println!("\n--- By Domain ---");
    let mut domains: Vec<_> = stats.by_domain.iter().collect();
    domains.sort_by(|a, b| b.1.cmp(a.1));
    for (domain, count) in domains {
        println!("  {:<12} {:>8}", domain, count);
    }

    println!("\n--- Batches ({} started, {} finished) ---", stats.batches_started, stats.batches.len());
    let (mut trials, mut failures) = (0u64, 0u64);
    for (label, b) in &stats.batches {
        let p = b
            .success_probability
            .map(|p| format!("  p(opt)={:.3}", p))
            .unwrap_or_default();
        println!("  {:<20} trials={:>6}  ok={:>6}  failed={:>6}{}", label, b.total, b.successes, b.failures, p);
        trials += b.total;
        failures += b.failures;
    }
    for (label, err) in &stats.failed_configs {
        println!("  {:<20} FAILED: {}", label, err);
    }
    println!("  Trials: {}  Failures: {}", trials, failures);

    if !stats.failure_reasons.is_empty() {
        println!("\n--- Failures By Reason ---");
        for (reason, count) in &stats.failure_reasons {
            println!("  {:<20} {:>8}", reason, count);
        }
    }
    if stats.cancelled {
        println!("\n⚠ run was cancelled");
    }
    println!("\nErrors: {}", stats.errors);
    Ok(())
}

fn cmd_failures(path: &Path) -> std::io::Result<()> {
    let mut shown = 0u64;
    for (_, entry) in read_entries(path)? {
        let Some(e) = entry else { continue };
        if e.event != "trial_failed" {
            continue;
        }
        shown += 1;
        let reason = e.data.get("reason").and_then(Value::as_str).unwrap_or("?");
        let detail = e.data.get("detail").and_then(Value::as_str).unwrap_or("");
        println!(
            "[{}] trial {:>5}  {:<18} {}",
            entry_label(&e),
            e.trial.map(|t| t.to_string()).unwrap_or_else(|| "?".into()),
            reason,
            detail
        );
        if let Some(raw) = e.data.get("raw_output").and_then(Value::as_str) {
            for l in raw.lines().take(4) {
                println!("      | {}", l);
            }
        }
    }
    if shown == 0 {
        println!("No trial_failed entries (were trials logged at LOG_LEVEL=debug?)");
    }
    Ok(())
}

fn cmd_filter(path: &Path, config: &FilterConfig, as_json: bool) -> std::io::Result<()> {
    for (line, entry) in read_entries(path)? {
        let Some(e) = entry else { continue };

        if let Some(ref min) = config.min_level {
            if level_rank(&e.lvl) < level_rank(min) {
                continue;
            }
        }
        if let Some(ref domains) = config.domains {
            if !domains.iter().any(|d| d == &e.component) {
                continue;
            }
        }
        if let Some(ref label) = config.label {
            if &entry_label(&e) != label {
                continue;
            }
        }

        if as_json {
            println!("{}", line);
        } else {
            println!(
                "[{}] #{} {} {} {} {}",
                e.ts.get(11..23).unwrap_or(&e.ts),
                e.seq,
                e.lvl,
                e.component,
                e.event,
                e.msg.as_deref().unwrap_or("")
            );
        }
    }
    Ok(())
}

fn print_usage() {
    eprintln!("Usage: logparse <command> <file.jsonl> [options]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  summary <events.jsonl>     Batches, failures by reason, per-level counts");
    eprintln!("  failures <trace.jsonl>     List failed trials with their reason");
    eprintln!("  filter <file> [options]    Filter and display log entries");
    eprintln!();
    eprintln!("Filter options:");
    eprintln!("  --domain=<d1,d2,...>   Filter by domain(s)");
    eprintln!("  --level=<level>        Minimum log level");
    eprintln!("  --label=<label>        Only one configuration");
    eprintln!("  --json                 Output raw JSON lines");
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        print_usage();
        std::process::exit(1);
    }

    let cmd = &args[1];
    let path = Path::new(&args[2]);

    if !path.exists() {
        eprintln!("Error: File not found: {}", path.display());
        std::process::exit(1);
    }

    let result = match cmd.as_str() {
        "summary" => cmd_summary(path),
        "failures" => cmd_failures(path),
        "filter" => {
            let mut config = FilterConfig::default();
            let mut as_json = false;
            for arg in &args[3..] {
                if let Some(v) = arg.strip_prefix("--domain=") {
                    config.domains = Some(v.split(',').map(str::to_string).collect());
                } else if let Some(v) = arg.strip_prefix("--level=") {
                    config.min_level = Some(v.to_string());
                } else if let Some(v) = arg.strip_prefix("--label=") {
                    config.label = Some(v.to_string());
                } else if arg == "--json" {
                    as_json = true;
                }
            }
            cmd_filter(path, &config, as_json)
        }
        _ => {
            eprintln!("Unknown command: {}", cmd);
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(err) = result {
        eprintln!("Error reading {}: {}", path.display(), err);
        std::process::exit(1);
    }
}
