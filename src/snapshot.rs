//! Population snapshots: comma-separated tables of decision vectors written by
//! the optimizer, one row per individual, optionally ending in a fitness column.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{HarnessError, Result};

/// Whether the last column of each row is a fitness value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitnessColumn {
    #[default]
    Absent,
    Last,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRow {
    pub coordinates: Vec<f64>,
    pub fitness: Option<f64>,
}

/// Read-only once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationSnapshot {
    path: PathBuf,
    dimension: usize,
    fitness: FitnessColumn,
    rows: Vec<SnapshotRow>,
}

fn load_failure(path: &Path, reason: impl Into<String>) -> HarnessError {
    HarnessError::SnapshotLoadFailure {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Load a snapshot table. Blank lines and lines starting with `#` are skipped.
pub fn load_snapshot(path: &Path, fitness: FitnessColumn) -> Result<PopulationSnapshot> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .flexible(true)
        .from_path(path)
        .map_err(|e| load_failure(path, e.to_string()))?;

    let min_columns = match fitness {
        FitnessColumn::Absent => 1,
        FitnessColumn::Last => 2,
    };
    let mut width: Option<usize> = None;
    let mut rows = Vec::new();

    for record in reader.records() {
        let record = record.map_err(|e| load_failure(path, e.to_string()))?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        if record.iter().all(|cell| cell.is_empty()) {
            continue;
        }

        let cells = record
            .iter()
            .enumerate()
            .map(|(col, cell)| {
                cell.parse::<f64>().map_err(|_| {
                    load_failure(path, format!("line {}: column {} is not numeric: {:?}", line, col + 1, cell))
                })
            })
            .collect::<Result<Vec<f64>>>()?;

        match width {
            None if cells.len() < min_columns => {
                return Err(load_failure(
                    path,
                    format!("line {}: expected at least {} columns, got {}", line, min_columns, cells.len()),
                ));
            }
            None => width = Some(cells.len()),
            Some(w) if w != cells.len() => {
                return Err(load_failure(
                    path,
                    format!("line {}: expected {} columns, got {}", line, w, cells.len()),
                ));
            }
            Some(_) => {}
        }

        rows.push(match fitness {
            FitnessColumn::Absent => SnapshotRow {
                coordinates: cells,
                fitness: None,
            },
            FitnessColumn::Last => {
                let mut coordinates = cells;
                let f = coordinates.pop();
                SnapshotRow {
                    coordinates,
                    fitness: f,
                }
            }
        });
    }

    let width = width.ok_or_else(|| load_failure(path, "no rows"))?;
    Ok(PopulationSnapshot {
        path: path.to_path_buf(),
        dimension: width + 1 - min_columns,
        fitness,
        rows,
    })
}

/// Half-open index range `start..end` naming one sub-population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GroupRange {
    pub start: usize,
    pub end: usize,
}

impl GroupRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn overlaps(&self, other: &GroupRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl std::fmt::Display for GroupRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

impl FromStr for GroupRange {
    type Err = String;

    /// Parses `START:END`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (a, b) = s
            .split_once(':')
            .ok_or_else(|| format!("expected START:END, got {:?}", s))?;
        let start = a.trim().parse().map_err(|_| format!("bad range start {:?}", a))?;
        let end = b.trim().parse().map_err(|_| format!("bad range end {:?}", b))?;
        Ok(Self { start, end })
    }
}

/// Four contiguous, near-equal ranges covering `0..len`. Empty quarters
/// (when `len < 4`) are omitted.
pub fn quartile_ranges(len: usize) -> Vec<GroupRange> {
    (0..4)
        .map(|k| GroupRange::new(k * len / 4, (k + 1) * len / 4))
        .filter(|r| !r.is_empty())
        .collect()
}

/// Every range must satisfy `start < end <= len` and no two may overlap.
pub fn validate_groups(ranges: &[GroupRange], len: usize) -> Result<()> {
    let fail = |r: &GroupRange, reason: String| HarnessError::IndexRangeFailure {
        start: r.start,
        end: r.end,
        len,
        reason,
    };
    for r in ranges {
        if r.start >= r.end {
            return Err(fail(r, "range is empty".into()));
        }
        if r.end > len {
            return Err(fail(r, "range extends past the last row".into()));
        }
    }
    for (i, a) in ranges.iter().enumerate() {
        if let Some(b) = ranges[i + 1..].iter().find(|b| a.overlaps(b)) {
            return Err(fail(b, format!("overlaps {}", a)));
        }
    }
    Ok(())
}

/// A labelled view over a contiguous run of snapshot rows.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotGroup<'a> {
    pub range: GroupRange,
    pub rows: &'a [SnapshotRow],
}

impl PopulationSnapshot {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of coordinate columns (fitness excluded).
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn fitness_column(&self) -> FitnessColumn {
        self.fitness
    }

    pub fn rows(&self) -> &[SnapshotRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Views for the requested ranges, in the order given. With no ranges the
    /// whole snapshot is one group.
    pub fn partition(&self, ranges: Option<&[GroupRange]>) -> Result<Vec<SnapshotGroup<'_>>> {
        let whole = [GroupRange::new(0, self.rows.len())];
        let ranges = match ranges {
            Some(r) => {
                validate_groups(r, self.rows.len())?;
                r
            }
            None => &whole[..],
        };
        Ok(ranges
            .iter()
            .map(|&range| SnapshotGroup {
                range,
                rows: &self.rows[range.start..range.end],
            })
            .collect())
    }

    /// Row with the smallest fitness; the earliest row wins ties and NaN never wins.
    pub fn best_solution(&self) -> Result<&SnapshotRow> {
        if self.fitness == FitnessColumn::Absent {
            return Err(HarnessError::MissingFitness);
        }
        let mut best: Option<(&SnapshotRow, f64)> = None;
        for row in &self.rows {
            let Some(f) = row.fitness.filter(|f| !f.is_nan()) else {
                continue;
            };
            match best {
                Some((_, b)) if f >= b => {}
                _ => best = Some((row, f)),
            }
        }
        best.map(|(row, _)| row).ok_or(HarnessError::MissingFitness)
    }
}
