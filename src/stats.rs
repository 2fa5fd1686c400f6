//! Distributional statistics over trial objective values.

use serde::Serialize;

/// `n` evenly spaced points over `[low, high]`, both ends included.
pub fn linspace(low: f64, high: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![low],
        _ => {
            let step = (high - low) / (n - 1) as f64;
            let mut out: Vec<f64> = (0..n).map(|i| low + i as f64 * step).collect();
            out[n - 1] = high;
            out
        }
    }
}

/// Fixed-edge histogram. Bins are half-open except the last, which includes
/// its right edge; values outside the edges (and NaN) are not counted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub edges: Vec<f64>,
    pub counts: Vec<usize>,
}

impl Histogram {
    /// Edges must be finite and strictly ascending; otherwise the histogram
    /// has no bins and counts nothing.
    pub fn new(edges: Vec<f64>) -> Self {
        let ordered = edges.iter().all(|e| e.is_finite()) && edges.windows(2).all(|w| w[0] < w[1]);
        let bins = if ordered { edges.len().saturating_sub(1) } else { 0 };
        Self {
            edges,
            counts: vec![0; bins],
        }
    }

    pub fn from_values(values: &[f64], edges: &[f64]) -> Self {
        let mut hist = Self::new(edges.to_vec());
        for &v in values {
            hist.add(v);
        }
        hist
    }

    /// Bin index for `v`, if it falls inside the edges.
    pub fn bin_of(&self, v: f64) -> Option<usize> {
        let (first, last) = (*self.edges.first()?, *self.edges.last()?);
        if self.counts.is_empty() || v.is_nan() || v < first || v > last {
            return None;
        }
        if v == last {
            return Some(self.counts.len() - 1);
        }
        let idx = self.edges.partition_point(|&e| e <= v);
        idx.checked_sub(1)
    }

    pub fn add(&mut self, v: f64) {
        if let Some(i) = self.bin_of(v) {
            self.counts[i] += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn max_count(&self) -> usize {
        self.counts.iter().copied().max().unwrap_or(0)
    }
}

/// Order statistics and moments of one batch's objective values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
}

impl BatchSummary {
    /// `None` when there are no values.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let var = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        let median = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        };
        Some(Self {
            count: n,
            min: sorted[0],
            max: sorted[n - 1],
            mean,
            median,
            std_dev: var.sqrt(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linspace_endpoints() {
        let e = linspace(-2600.0, -1500.0, 100);
        assert_eq!(e.len(), 100);
        assert_eq!(e[0], -2600.0);
        assert_eq!(e[99], -1500.0);
        assert!((e[1] - e[0] - 1100.0 / 99.0).abs() < 1e-9);
        assert_eq!(linspace(1.0, 2.0, 1), vec![1.0]);
        assert!(linspace(1.0, 2.0, 0).is_empty());
    }

    #[test]
    fn test_histogram_binning() {
        let edges = linspace(0.0, 4.0, 5); // bins [0,1) [1,2) [2,3) [3,4]
        let h = Histogram::from_values(&[0.0, 0.5, 1.0, 2.9, 4.0, 3.5, -0.1, 4.1, f64::NAN], &edges);
        assert_eq!(h.counts, vec![2, 1, 1, 2]);
        assert_eq!(h.total(), 6);
        assert_eq!(h.max_count(), 2);
    }

    #[test]
    fn test_histogram_degenerate_edges() {
        let h = Histogram::from_values(&[1.0], &[1.0]);
        assert!(h.counts.is_empty());
        assert_eq!(h.total(), 0);
        let h = Histogram::from_values(&[1.0], &[]);
        assert_eq!(h.total(), 0);
    }

    #[test]
    fn test_histogram_unordered_edges_count_nothing() {
        let values = [0.5, 1.0, 1.5, 2.0, f64::NAN];
        for edges in [
            vec![0.0, f64::NAN, 2.0],
            vec![2.0, 1.0, 0.0],
            vec![0.0, 2.0, 1.0, 3.0],
            vec![0.0, 1.0, 1.0, 2.0],
        ] {
            let h = Histogram::from_values(&values, &edges);
            assert!(h.counts.is_empty(), "{:?}", edges);
            assert_eq!(h.total(), 0);
            assert_eq!(h.bin_of(1.0), None);
        }
    }

    #[test]
    fn test_summary() {
        let s = BatchSummary::from_values(&[3.0, 1.0, 2.0, 4.0]).unwrap();
        assert_eq!(s.count, 4);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 4.0);
        assert_eq!(s.mean, 2.5);
        assert_eq!(s.median, 2.5);
        assert!((s.std_dev - 1.25f64.sqrt()).abs() < 1e-12);
        assert!(BatchSummary::from_values(&[]).is_none());
    }
}
