use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logging::{log, obj, v_str, Domain, Level};

/// One optimizer parametrization: a display label and the file the optimizer reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRef {
    pub label: String,
    pub path: PathBuf,
}

impl ConfigRef {
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
        }
    }
}

impl FromStr for ConfigRef {
    type Err = String;

    /// Parses `LABEL=PATH`, splitting on the last `=` so labels such as
    /// `S=1` survive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (label, path) = s
            .rsplit_once('=')
            .ok_or_else(|| format!("expected LABEL=PATH, got {:?}", s))?;
        if label.trim().is_empty() || path.trim().is_empty() {
            return Err(format!("expected LABEL=PATH, got {:?}", s));
        }
        Ok(ConfigRef::new(label.trim(), path.trim()))
    }
}

/// Known optimum and acceptance radius for success-probability reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    pub optimum: Vec<f64>,
    pub tolerance: f64,
}

/// Per-trial timeout from a seconds value. Zero or negative means no timeout;
/// NaN, infinity and values beyond `Duration::MAX` are rejected.
pub fn timeout_from_secs(secs: f64) -> Result<Option<Duration>, String> {
    if secs.is_nan() {
        return Err("timeout must be a number of seconds, got NaN".to_string());
    }
    if secs <= 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|e| format!("timeout of {} seconds is out of range: {}", secs, e))
}

/// Timeout from an env var; an unusable value is reported and ignored.
fn env_timeout(key: &str) -> Option<Duration> {
    let raw = std::env::var(key).ok()?;
    let parsed = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("not a number: {:?}", raw))
        .and_then(timeout_from_secs);
    match parsed {
        Ok(limit) => limit,
        Err(reason) => {
            log(
                Level::Warn,
                Domain::System,
                "invalid_env",
                obj(&[("key", v_str(key)), ("reason", v_str(&reason))]),
            );
            None
        }
    }
}

/// Harness settings. Read from the environment, then overridden by CLI flags.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub optimizer_bin: PathBuf,
    pub work_dir: PathBuf,
    pub trials: usize,
    pub workers: usize,
    pub trial_timeout: Option<Duration>,
    pub hist_low: f64,
    pub hist_high: f64,
    pub hist_edges: usize,
    pub output: PathBuf,
    pub results_db: Option<PathBuf>,
    pub log_raw_failures: bool,
    pub success_tolerance: f64,
}

impl HarnessConfig {
    pub fn from_env() -> Self {
        Self {
            optimizer_bin: std::env::var("OPTIMIZER_BIN").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("Release/GA_run")),
            work_dir: std::env::var("WORK_DIR").map(PathBuf::from).or_else(|_| std::env::current_dir()).unwrap_or_else(|_| PathBuf::from(".")),
            trials: std::env::var("TRIALS").ok().and_then(|v| v.parse().ok()).unwrap_or(1000),
            workers: std::env::var("WORKERS").ok().and_then(|v| v.parse().ok()).unwrap_or(1),
            trial_timeout: env_timeout("TRIAL_TIMEOUT_SECS"),
            hist_low: std::env::var("HIST_LOW").ok().and_then(|v| v.parse().ok()).unwrap_or(-2600.0),
            hist_high: std::env::var("HIST_HIGH").ok().and_then(|v| v.parse().ok()).unwrap_or(-1500.0),
            hist_edges: std::env::var("HIST_EDGES").ok().and_then(|v| v.parse().ok()).unwrap_or(100),
            output: std::env::var("OUTPUT").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("outcome_dist.svg")),
            results_db: std::env::var("RESULTS_DB").ok().map(PathBuf::from),
            log_raw_failures: std::env::var("LOG_RAW_FAILURES").map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes")).unwrap_or(false),
            success_tolerance: std::env::var("SUCCESS_TOLERANCE").ok().and_then(|v| v.parse().ok()).unwrap_or(10.0),
        }
    }

    /// Worker count with `0` meaning one per available core.
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_ref_parse() {
        let c: ConfigRef = "S=1=Example/params1.json".parse().unwrap();
        assert_eq!(c.label, "S=1");
        assert_eq!(c.path, PathBuf::from("Example/params1.json"));

        let c: ConfigRef = "pop50=cfg/p.json".parse().unwrap();
        assert_eq!(c, ConfigRef::new("pop50", "cfg/p.json"));
    }

    #[test]
    fn test_config_ref_rejects_bad_input() {
        assert!("no-equals".parse::<ConfigRef>().is_err());
        assert!("=path".parse::<ConfigRef>().is_err());
        assert!("label=".parse::<ConfigRef>().is_err());
    }

    #[test]
    fn test_timeout_from_secs() {
        assert_eq!(timeout_from_secs(2.5).unwrap(), Some(Duration::from_millis(2500)));
        assert_eq!(timeout_from_secs(0.0).unwrap(), None);
        assert_eq!(timeout_from_secs(-3.0).unwrap(), None);
        assert!(timeout_from_secs(1e30).is_err());
        assert!(timeout_from_secs(f64::INFINITY).is_err());
        assert!(timeout_from_secs(f64::NAN).is_err());
    }

    #[test]
    fn test_oversized_env_timeout_is_ignored() {
        // no other test reads this variable
        std::env::set_var("TRIAL_TIMEOUT_SECS", "1e30");
        assert_eq!(HarnessConfig::from_env().trial_timeout, None);
        std::env::set_var("TRIAL_TIMEOUT_SECS", "0.5");
        assert_eq!(HarnessConfig::from_env().trial_timeout, Some(Duration::from_millis(500)));
        std::env::remove_var("TRIAL_TIMEOUT_SECS");
        assert_eq!(HarnessConfig::from_env().trial_timeout, None);
    }

    #[test]
    fn test_effective_workers() {
        let mut cfg = HarnessConfig::from_env();
        cfg.workers = 3;
        assert_eq!(cfg.effective_workers(), 3);
        cfg.workers = 0;
        assert!(cfg.effective_workers() >= 1);
    }
}
