//! Extraction of a trial record from one optimizer run's stdout.
//!
//! The optimizer prints its result as
//!
//! ```text
//! x: [420.97, 420.96]
//! f: -837.96
//! ```
//!
//! surrounded by arbitrary log noise. [`MarkerParser`] scrapes that format;
//! [`JsonRecordParser`] accepts a one-line JSON record instead, for optimizers
//! that can emit structured output.

use serde::{Deserialize, Serialize};

use crate::error::ParseFailure;

pub const VECTOR_MARKER: &str = "x: [";
pub const VECTOR_CLOSE: char = ']';
pub const OBJECTIVE_MARKER: &str = "f: ";

/// Result of one successfully parsed trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub decision_vector: Vec<f64>,
    pub objective_value: f64,
    pub parsed_ok: bool,
}

impl TrialRecord {
    pub fn new(decision_vector: Vec<f64>, objective_value: f64) -> Self {
        Self {
            decision_vector,
            objective_value,
            parsed_ok: true,
        }
    }

    pub fn dimension(&self) -> usize {
        self.decision_vector.len()
    }

    /// Euclidean distance to `target`, or `None` when dimensions differ.
    pub fn distance_to(&self, target: &[f64]) -> Option<f64> {
        if target.len() != self.decision_vector.len() {
            return None;
        }
        let sq: f64 = self
            .decision_vector
            .iter()
            .zip(target)
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        Some(sq.sqrt())
    }
}

/// Turns raw optimizer output into a [`TrialRecord`].
pub trait ResultParser: Send + Sync {
    fn parse(&self, raw: &str) -> Result<TrialRecord, ParseFailure>;
}

/// Parser for the `x: [..]` / `f: ..` marker format.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerParser;

impl ResultParser for MarkerParser {
    fn parse(&self, raw: &str) -> Result<TrialRecord, ParseFailure> {
        parse_markers(raw)
    }
}

/// Parser for a single-line JSON record `{"x": [..], "f": ..}`.
///
/// The last line that deserializes wins, so progress lines printed before the
/// final record are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRecordParser;

#[derive(Deserialize)]
struct JsonRecord {
    x: Vec<f64>,
    f: f64,
}

impl ResultParser for JsonRecordParser {
    fn parse(&self, raw: &str) -> Result<TrialRecord, ParseFailure> {
        let record = raw
            .lines()
            .rev()
            .filter(|l| l.trim_start().starts_with('{'))
            .find_map(|l| serde_json::from_str::<JsonRecord>(l.trim()).ok())
            .ok_or_else(|| ParseFailure::marker("{\"x\""))?;
        if record.x.is_empty() {
            return Err(ParseFailure::malformed(""));
        }
        for v in record.x.iter().chain(std::iter::once(&record.f)) {
            if !v.is_finite() {
                return Err(ParseFailure::malformed(&v.to_string()));
            }
        }
        Ok(TrialRecord::new(record.x, record.f))
    }
}

/// Parse the marker format. See the module docs for the expected shape.
pub fn parse_markers(raw: &str) -> Result<TrialRecord, ParseFailure> {
    let vec_start = raw
        .find(VECTOR_MARKER)
        .ok_or_else(|| ParseFailure::marker(VECTOR_MARKER))?
        + VECTOR_MARKER.len();
    let vec_len = raw[vec_start..]
        .find(VECTOR_CLOSE)
        .ok_or_else(|| ParseFailure::incomplete("decision vector not closed"))?;
    let vec_end = vec_start + vec_len;

    let decision_vector = raw[vec_start..vec_end]
        .split(',')
        .map(parse_finite)
        .collect::<Result<Vec<_>, _>>()?;

    // Prefer the objective printed after the vector; log noise before it may
    // contain the same literal (e.g. "conf: 3").
    let after_vec = vec_end + VECTOR_CLOSE.len_utf8();
    let obj_start = raw[after_vec..]
        .find(OBJECTIVE_MARKER)
        .map(|i| after_vec + i)
        .or_else(|| raw.find(OBJECTIVE_MARKER))
        .ok_or_else(|| ParseFailure::marker(OBJECTIVE_MARKER))?
        + OBJECTIVE_MARKER.len();
    let obj_len = raw[obj_start..]
        .find('\n')
        .ok_or_else(|| ParseFailure::incomplete("objective value not terminated by a line break"))?;
    let token = raw[obj_start..obj_start + obj_len].trim_end_matches('\r');
    let objective_value = parse_finite(token)?;

    Ok(TrialRecord::new(decision_vector, objective_value))
}

fn parse_finite(token: &str) -> Result<f64, ParseFailure> {
    let trimmed = token.trim();
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ParseFailure::malformed(trimmed)),
    }
}
