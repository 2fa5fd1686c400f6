//! Schwefel benchmark function.
//!
//! `f(x) = sum_i -x_i * sin(sqrt(|x_i|))`, usually searched over `[-500, 500]^d`.
//! The global minimum sits near `x_i = 420.9687` with `f ≈ -418.9829 * d`.

/// Coordinate of the global optimum along every axis.
pub const SCHWEFEL_OPTIMUM_COORD: f64 = 420.968_746;

/// Minimum value contributed by each dimension.
pub const SCHWEFEL_MIN_PER_DIM: f64 = -418.982_887;

/// Conventional search bounds per coordinate.
pub const DEFAULT_BOUNDS: (f64, f64) = (-500.0, 500.0);

/// Evaluate the Schwefel function. Non-finite inputs propagate to the output.
pub fn evaluate(x: &[f64]) -> f64 {
    x.iter().map(|&xi| -xi * xi.abs().sqrt().sin()).sum()
}

/// Evaluate with the optimizer's constraint convention: any coordinate outside
/// `[low, high]` scores `f64::MAX`.
pub fn evaluate_bounded(x: &[f64], low: f64, high: f64) -> f64 {
    if x.iter().any(|&xi| xi < low || xi > high) {
        return f64::MAX;
    }
    evaluate(x)
}

/// Known optimum `(decision vector, value)` for dimension `dim`.
pub fn known_optimum(dim: usize) -> (Vec<f64>, f64) {
    (
        vec![SCHWEFEL_OPTIMUM_COORD; dim],
        SCHWEFEL_MIN_PER_DIM * dim as f64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimum_2d() {
        let f = evaluate(&[420.9687, 420.9687]);
        assert!((f - (-837.9658)).abs() < 1e-2, "f = {}", f);
    }

    #[test]
    fn test_scales_with_dimension() {
        for d in 1..=8 {
            let (x, expected) = known_optimum(d);
            let f = evaluate(&x);
            assert!((f - expected).abs() < 1e-3 * d as f64, "d={} f={}", d, f);
            assert!((f - (-418.98 * d as f64)).abs() < 0.01 * d as f64);
        }
    }

    #[test]
    fn test_origin_is_zero() {
        assert_eq!(evaluate(&[0.0, 0.0, 0.0]), 0.0);
        assert_eq!(evaluate(&[]), 0.0);
    }

    #[test]
    fn test_symmetric_sign() {
        // -x sin(sqrt|x|) is odd in x
        let a = evaluate(&[123.4]);
        let b = evaluate(&[-123.4]);
        assert!((a + b).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_propagates() {
        assert!(evaluate(&[f64::NAN, 1.0]).is_nan());
        assert!(!evaluate(&[f64::INFINITY]).is_finite());
    }

    #[test]
    fn test_bounded_rejects_outside() {
        assert_eq!(evaluate_bounded(&[501.0, 0.0], -500.0, 500.0), f64::MAX);
        assert_eq!(evaluate_bounded(&[0.0, -500.5], -500.0, 500.0), f64::MAX);
        let inside = [420.9687, -10.0];
        assert_eq!(evaluate_bounded(&inside, -500.0, 500.0), evaluate(&inside));
    }
}
