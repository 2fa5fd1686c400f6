//! Precomputed benchmark landscape over a square 2-D grid.
//!
//! Grids are cached process-wide by `(low, high, resolution)`; a cached grid is
//! never mutated, and callers share it through an `Arc`.

use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::benchmark;
use crate::error::{HarnessError, Result};
use crate::logging::{log, obj, v_num, Domain, Level, ProfileScope};
use crate::stats::linspace;

#[derive(Debug, Clone, PartialEq)]
pub struct LandscapeGrid {
    low: f64,
    high: f64,
    resolution: usize,
    axis: Vec<f64>,
    mesh_x: Vec<Vec<f64>>,
    mesh_y: Vec<Vec<f64>>,
    values: Vec<Vec<f64>>,
}

impl LandscapeGrid {
    /// Evaluate `f` on every mesh point. `mesh_x[i][j] = axis[j]`,
    /// `mesh_y[i][j] = axis[i]`.
    pub fn compute_with<F>(low: f64, high: f64, resolution: usize, f: F) -> Result<Self>
    where
        F: Fn(&[f64]) -> f64,
    {
        validate(low, high, resolution)?;
        let axis = linspace(low, high, resolution);
        let mesh_x: Vec<Vec<f64>> = (0..resolution).map(|_| axis.clone()).collect();
        let mesh_y: Vec<Vec<f64>> = axis.iter().map(|&y| vec![y; resolution]).collect();
        let values = axis
            .iter()
            .map(|&y| axis.iter().map(|&x| f(&[x, y][..])).collect())
            .collect();
        Ok(Self {
            low,
            high,
            resolution,
            axis,
            mesh_x,
            mesh_y,
            values,
        })
    }

    /// Uncached Schwefel landscape.
    pub fn compute(low: f64, high: f64, resolution: usize) -> Result<Self> {
        Self::compute_with(low, high, resolution, benchmark::evaluate)
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Coordinates along either axis.
    pub fn axis(&self) -> &[f64] {
        &self.axis
    }

    pub fn mesh_x(&self) -> &[Vec<f64>] {
        &self.mesh_x
    }

    pub fn mesh_y(&self) -> &[Vec<f64>] {
        &self.mesh_y
    }

    pub fn values(&self) -> &[Vec<f64>] {
        &self.values
    }

    /// Smallest and largest finite value; `None` if nothing is finite.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .flatten()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Whether a point lies inside the grid's square.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        (self.low..=self.high).contains(&x) && (self.low..=self.high).contains(&y)
    }
}

fn validate(low: f64, high: f64, resolution: usize) -> Result<()> {
    if !low.is_finite() || !high.is_finite() || low >= high {
        return Err(HarnessError::InvalidGrid(format!(
            "bounds must be finite with low < high, got [{}, {}]",
            low, high
        )));
    }
    if resolution < 2 {
        return Err(HarnessError::InvalidGrid(format!(
            "resolution must be at least 2, got {}",
            resolution
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GridKey {
    low_bits: u64,
    high_bits: u64,
    resolution: usize,
}

static GRID_CACHE: OnceLock<Mutex<HashMap<GridKey, Arc<LandscapeGrid>>>> = OnceLock::new();

fn grid_cache() -> &'static Mutex<HashMap<GridKey, Arc<LandscapeGrid>>> {
    GRID_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn cached(key: &GridKey) -> Option<Arc<LandscapeGrid>> {
    grid_cache().lock().ok()?.get(key).cloned()
}

/// Schwefel landscape for `(low, high, resolution)`, computed at most once per process.
pub fn build_grid(low: f64, high: f64, resolution: usize) -> Result<Arc<LandscapeGrid>> {
    validate(low, high, resolution)?;
    let key = GridKey {
        low_bits: low.to_bits(),
        high_bits: high.to_bits(),
        resolution,
    };
    if let Some(grid) = cached(&key) {
        log(
            Level::Debug,
            Domain::Landscape,
            "grid_cache_hit",
            obj(&[("low", v_num(low)), ("high", v_num(high)), ("resolution", json!(resolution))]),
        );
        return Ok(grid);
    }

    let grid = {
        let _scope = ProfileScope::with_context("build_grid", &[("resolution", json!(resolution))]);
        Arc::new(LandscapeGrid::compute(low, high, resolution)?)
    };
    log(
        Level::Info,
        Domain::Landscape,
        "grid_built",
        obj(&[
            ("low", v_num(low)),
            ("high", v_num(high)),
            ("resolution", json!(resolution)),
            ("evaluations", json!(resolution * resolution)),
        ]),
    );

    // Two callers may race to build the same key; the first insert wins.
    match grid_cache().lock() {
        Ok(mut cache) => Ok(cache.entry(key).or_insert(grid).clone()),
        Err(_) => Ok(grid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn test_values_match_benchmark() {
        let g = LandscapeGrid::compute(-500.0, 500.0, 41).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let i = rng.gen_range(0..41);
            let j = rng.gen_range(0..41);
            let expected = benchmark::evaluate(&[g.mesh_x()[i][j], g.mesh_y()[i][j]]);
            assert!((g.values()[i][j] - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_mesh_layout() {
        let g = LandscapeGrid::compute(0.0, 2.0, 3).unwrap();
        assert_eq!(g.axis(), &[0.0, 1.0, 2.0]);
        assert_eq!(g.mesh_x()[2], vec![0.0, 1.0, 2.0]);
        assert_eq!(g.mesh_y()[2], vec![2.0, 2.0, 2.0]);
        assert_eq!(g.values().len(), 3);
        assert!(g.values().iter().all(|row| row.len() == 3));
    }

    #[test]
    fn test_cache_returns_same_grid() {
        let a = build_grid(-123.0, 321.0, 17).unwrap();
        let b = build_grid(-123.0, 321.0, 17).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*a, *b);

        let c = build_grid(-123.0, 321.0, 18).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.resolution(), 18);
    }

    #[test]
    fn test_uncached_compute_is_deterministic() {
        let a = LandscapeGrid::compute(-500.0, 500.0, 25).unwrap();
        let b = LandscapeGrid::compute(-500.0, 500.0, 25).unwrap();
        for (ra, rb) in a.values().iter().zip(b.values()) {
            for (va, vb) in ra.iter().zip(rb) {
                assert_eq!(va.to_bits(), vb.to_bits());
            }
        }
    }

    #[test]
    fn test_invalid_grids_rejected() {
        assert!(matches!(build_grid(1.0, 1.0, 10), Err(HarnessError::InvalidGrid(_))));
        assert!(matches!(build_grid(2.0, 1.0, 10), Err(HarnessError::InvalidGrid(_))));
        assert!(matches!(build_grid(0.0, 1.0, 1), Err(HarnessError::InvalidGrid(_))));
        assert!(matches!(build_grid(f64::NAN, 1.0, 10), Err(HarnessError::InvalidGrid(_))));
    }

    #[test]
    fn test_value_range_and_contains() {
        let g = LandscapeGrid::compute(-500.0, 500.0, 101).unwrap();
        let (lo, hi) = g.value_range().unwrap();
        assert!(lo < 0.0 && hi > 0.0);
        assert!(lo >= -837.97 - 1e-6);
        assert!(g.contains(420.0, -500.0));
        assert!(!g.contains(500.1, 0.0));
    }
}
