use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::aggregator::TrialBatchResult;
use crate::error::Result;
use crate::logging::{self, log, obj, v_str, Domain, Level};

/// Append-only SQLite log of finalized batches.
pub struct ResultStore {
    conn: Connection,
}

impl ResultStore {
    pub fn open(path: &Path) -> Result<Self> {
        let mut store = Self {
            conn: Connection::open(path)?,
        };
        store.init()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let mut store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init()?;
        Ok(store)
    }

    fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS batches (
                ts TEXT NOT NULL,
                run_id TEXT NOT NULL,
                label TEXT NOT NULL,
                config_path TEXT NOT NULL,
                config_sha256 TEXT,
                total INTEGER NOT NULL,
                successes INTEGER NOT NULL,
                failures INTEGER NOT NULL,
                optimum_hits INTEGER,
                min REAL,
                mean REAL,
                median REAL,
                max REAL,
                std_dev REAL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    /// Insert one row for `result`. The configuration digest is best effort:
    /// an unreadable file stores `NULL`.
    pub fn persist_batch(&mut self, config_path: &Path, result: &TrialBatchResult) -> Result<()> {
        let digest = file_sha256(config_path).ok();
        let summary = result.summary();
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO batches (ts, run_id, label, config_path, config_sha256, total, successes,
                                  failures, optimum_hits, min, mean, median, max, std_dev)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                logging::ts_now(),
                logging::run_id(),
                result.configuration_label(),
                config_path.display().to_string(),
                digest,
                result.total_trials() as i64,
                result.success_count() as i64,
                result.failure_count() as i64,
                result.optimum_hits().map(|h| h as i64),
                summary.as_ref().map(|s| s.min),
                summary.as_ref().map(|s| s.mean),
                summary.as_ref().map(|s| s.median),
                summary.as_ref().map(|s| s.max),
                summary.as_ref().map(|s| s.std_dev),
            ],
        )?;
        tx.commit()?;
        log(
            Level::Debug,
            Domain::Storage,
            "batch_persisted",
            obj(&[("label", v_str(result.configuration_label()))]),
        );
        Ok(())
    }

    /// `(label, total, successes, failures)` for every stored batch, oldest first.
    pub fn batch_counts(&self) -> Result<Vec<(String, i64, i64, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT label, total, successes, failures FROM batches ORDER BY rowid")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Hex SHA-256 of a file's bytes.
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseFailure;
    use crate::parser::TrialRecord;
    use crate::runner::TrialOutcome;
    use tempfile::TempDir;

    #[test]
    fn test_file_sha256_known_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            file_sha256(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(file_sha256(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_persist_and_read_back() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("results.sqlite");
        let cfg = dir.path().join("params.json");
        std::fs::write(&cfg, "{}").unwrap();

        let outcomes = vec![
            TrialOutcome::Parsed(TrialRecord::new(vec![1.0, 2.0], -800.0)),
            TrialOutcome::Parsed(TrialRecord::new(vec![1.0, 2.0], -700.0)),
            TrialOutcome::failed(ParseFailure::marker("x: ["), "garbage"),
        ];
        let result = TrialBatchResult::from_outcomes("S=1", &outcomes, None);

        {
            let mut store = ResultStore::open(&db).unwrap();
            store.persist_batch(&cfg, &result).unwrap();
            // missing config still persists, without digest
            store.persist_batch(&dir.path().join("gone.json"), &result).unwrap();
        }

        let store = ResultStore::open(&db).unwrap();
        let rows = store.batch_counts().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], ("S=1".to_string(), 3, 2, 1));
    }

    #[test]
    fn test_empty_batch_has_null_stats() {
        let mut store = ResultStore::in_memory().unwrap();
        let result = TrialBatchResult::from_outcomes("empty", &[], None);
        store.persist_batch(Path::new("nowhere.json"), &result).unwrap();
        let mean: Option<f64> = store
            .conn
            .query_row("SELECT mean FROM batches", [], |r| r.get(0))
            .unwrap();
        assert!(mean.is_none());
    }
}
