//! Long-only mean-variance optimizer.
//!
//! Solves
//!
//! ```text
//! maximize    w'mu - (lambda / 2) w'Sigma w
//! subject to  sum(w) = 1,  0 <= w_i <= 1
//! ```
//!
//! with a primal active-set method. The upper bound is implied by the budget and lower
//! bounds, so only `w_i >= 0` enters the working set. Each iteration solves the KKT system of
//! the equality-constrained subproblem on the free assets:
//!
//! ```text
//! [ H_FF  1 ] [ p_F ]   [ -g_F ]
//! [ 1'    0 ] [ nu  ] = [   0  ]
//! ```
//!
//! where `H = lambda * Sigma` and `g = H w - mu`. Strictly convex whenever `Sigma` is positive
//! definite, so the result is unique and the method deterministic.

use crate::domain::recommendation::{AssetAllocation, AssetWeights};
use crate::domain::series::{ensure_aligned, CovarianceMatrix, TickerSeries};
use crate::error::{EngineError, EngineResult};
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;

const STEP_TOLERANCE: f64 = 1e-12;
const MULTIPLIER_TOLERANCE: f64 = 1e-10;
const PIVOT_TOLERANCE: f64 = 1e-10;
/// Active-set iterations allowed per asset, on top of a fixed allowance.
const ITERATIONS_PER_ASSET: usize = 20;

/// Maximize quadratic utility with penalty `risk_aversion` (used as given, not squared).
pub fn max_quadratic_utility(
    expected_returns: &TickerSeries,
    covariance: &CovarianceMatrix,
    risk_aversion: f64,
) -> EngineResult<AssetWeights> {
    ensure_aligned(
        expected_returns.tickers(),
        covariance.tickers(),
        "expected returns vs covariance",
    )?;

    let n = expected_returns.len();
    if n == 0 {
        return Err(EngineError::InsufficientData(
            "no assets to optimize".to_string(),
        ));
    }
    if !(risk_aversion.is_finite() && risk_aversion > 0.0) {
        return Err(EngineError::Validation(format!(
            "risk aversion penalty must be positive (got {risk_aversion})"
        )));
    }

    let mu = expected_returns.to_vector();
    let sigma = covariance.matrix();
    check_covariance(&mu, sigma)?;

    let h = sigma * risk_aversion;
    let mut w = DVector::from_element(n, 1.0 / n as f64);
    let mut at_bound = vec![false; n];
    let max_iterations = 50 + ITERATIONS_PER_ASSET * n;

    for iteration in 0..max_iterations {
        let free: Vec<usize> = (0..n).filter(|&i| !at_bound[i]).collect();
        let g = &h * &w - &mu;
        let (step, nu) = solve_subproblem(&h, &g, &free)?;

        if step.amax() <= STEP_TOLERANCE {
            // Stationary on the current face: check the bound multipliers.
            let tol = MULTIPLIER_TOLERANCE * (1.0 + g.amax());
            let release = (0..n)
                .filter(|&i| at_bound[i])
                .map(|i| (i, g[i] + nu))
                .filter(|&(_, lambda)| lambda < -tol)
                .min_by(|a, b| a.1.total_cmp(&b.1));

            match release {
                Some((i, _)) => at_bound[i] = false,
                None => {
                    tracing::debug!(
                        iteration,
                        assets = n,
                        active = at_bound.iter().filter(|b| **b).count(),
                        "quadratic utility solved"
                    );
                    return Ok(finish(expected_returns.tickers(), w));
                }
            }
            continue;
        }

        let mut alpha = 1.0;
        let mut blocking = None;
        for (k, &i) in free.iter().enumerate() {
            if step[k] < 0.0 {
                let ratio = -w[i] / step[k];
                if ratio < alpha {
                    alpha = ratio;
                    blocking = Some(i);
                }
            }
        }

        for (k, &i) in free.iter().enumerate() {
            w[i] += alpha * step[k];
        }
        if let Some(i) = blocking {
            w[i] = 0.0;
            at_bound[i] = true;
        }
    }

    Err(EngineError::OptimizationFailed(format!(
        "active-set solver did not converge in {max_iterations} iterations"
    )))
}

fn check_covariance(mu: &DVector<f64>, sigma: &DMatrix<f64>) -> EngineResult<()> {
    if mu.iter().any(|v| !v.is_finite()) {
        return Err(EngineError::OptimizationFailed(
            "expected returns contain non-finite values".to_string(),
        ));
    }
    if sigma.iter().any(|v| !v.is_finite()) {
        return Err(EngineError::OptimizationFailed(
            "covariance contains non-finite values".to_string(),
        ));
    }

    let scale = sigma.amax().max(f64::MIN_POSITIVE);
    let asymmetry = (sigma - sigma.transpose()).amax();
    if asymmetry > 1e-9 * scale {
        return Err(EngineError::OptimizationFailed(format!(
            "covariance is not symmetric (max deviation {asymmetry:e})"
        )));
    }

    // Pivots at roundoff level mean a singular matrix even when the factorization succeeds.
    let definite = sigma.clone().cholesky().is_some_and(|c| {
        c.l()
            .diagonal()
            .iter()
            .all(|d| d * d > PIVOT_TOLERANCE * scale)
    });
    if !definite {
        return Err(EngineError::OptimizationFailed(
            "covariance is not positive definite".to_string(),
        ));
    }
    Ok(())
}

/// Step on the free coordinates and the budget multiplier.
fn solve_subproblem(
    h: &DMatrix<f64>,
    g: &DVector<f64>,
    free: &[usize],
) -> EngineResult<(DVector<f64>, f64)> {
    let k = free.len();
    if k == 0 {
        return Err(EngineError::OptimizationFailed(
            "every asset hit its lower bound".to_string(),
        ));
    }

    let mut kkt = DMatrix::zeros(k + 1, k + 1);
    let mut rhs = DVector::zeros(k + 1);
    for (a, &i) in free.iter().enumerate() {
        for (b, &j) in free.iter().enumerate() {
            kkt[(a, b)] = h[(i, j)];
        }
        kkt[(a, k)] = 1.0;
        kkt[(k, a)] = 1.0;
        rhs[a] = -g[i];
    }

    let sol = kkt.lu().solve(&rhs).ok_or_else(|| {
        EngineError::OptimizationFailed("singular KKT system".to_string())
    })?;
    if sol.iter().any(|v| !v.is_finite()) {
        return Err(EngineError::OptimizationFailed(
            "KKT solution is not finite".to_string(),
        ));
    }

    Ok((sol.rows(0, k).into_owned(), sol[k]))
}

fn finish(tickers: &[String], w: DVector<f64>) -> AssetWeights {
    let clipped: Vec<f64> = w.iter().map(|v| v.clamp(0.0, 1.0)).collect();
    let total: f64 = clipped.iter().sum();
    AssetWeights::new(
        tickers.to_vec(),
        clipped.into_iter().map(|v| v / total).collect(),
    )
}

/// Attach each asset's own expected return and volatility to its weight.
pub fn annotate(
    weights: &AssetWeights,
    expected_returns: &TickerSeries,
    expected_volatility: &TickerSeries,
) -> EngineResult<BTreeMap<String, AssetAllocation>> {
    ensure_aligned(
        weights.tickers(),
        expected_returns.tickers(),
        "weights vs expected returns",
    )?;
    ensure_aligned(
        weights.tickers(),
        expected_volatility.tickers(),
        "weights vs expected volatility",
    )?;

    Ok(weights
        .iter()
        .zip(expected_returns.values())
        .zip(expected_volatility.values())
        .map(|(((ticker, weight), &ret), &vol)| {
            (
                ticker.to_string(),
                AssetAllocation {
                    weight,
                    expected_return: ret,
                    expected_volatility: vol,
                },
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn series(values: &[f64]) -> TickerSeries {
        TickerSeries::new(tickers(values.len()), values.to_vec()).unwrap()
    }

    fn tickers(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("T{i}")).collect()
    }

    fn cov(n: usize, values: &[f64]) -> CovarianceMatrix {
        CovarianceMatrix::new(tickers(n), DMatrix::from_row_slice(n, n, values)).unwrap()
    }

    fn volatility(w: &AssetWeights, c: &CovarianceMatrix) -> f64 {
        let w = DVector::from_column_slice(w.weights());
        (w.transpose() * c.matrix() * &w)[(0, 0)].sqrt()
    }

    fn four_assets() -> (TickerSeries, CovarianceMatrix) {
        (
            series(&[0.12, 0.10, 0.07, 0.05]),
            cov(
                4,
                &[
                    0.04, 0.01, 0.00, -0.01, //
                    0.01, 0.03, 0.00, 0.00, //
                    0.00, 0.00, 0.02, 0.00, //
                    -0.01, 0.00, 0.00, 0.01,
                ],
            ),
        )
    }

    #[test]
    fn two_assets_favor_lower_variance() {
        let w = max_quadratic_utility(
            &series(&[0.10, 0.05]),
            &cov(2, &[0.04, 0.0, 0.0, 0.01]),
            10.0,
        )
        .unwrap();
        assert!(w.get("T1").unwrap() > w.get("T0").unwrap());
        assert_relative_eq!(w.get("T0").unwrap(), 0.3, epsilon = 1e-10);
        assert_relative_eq!(w.get("T1").unwrap(), 0.7, epsilon = 1e-10);
    }

    #[test]
    fn weights_are_long_only_and_fully_invested() {
        let (mu, c) = four_assets();
        for lambda in [0.01, 0.5, 1.0, 4.0, 25.0, 100.0, 225.0] {
            let w = max_quadratic_utility(&mu, &c, lambda).unwrap();
            assert!((w.sum() - 1.0).abs() <= 1e-6, "sum {} at {lambda}", w.sum());
            assert!(w.weights().iter().all(|&x| x >= -1e-9 && x <= 1.0));
        }
    }

    #[test]
    fn low_aversion_goes_all_in_on_best_return() {
        let (mu, c) = four_assets();
        let w = max_quadratic_utility(&mu, &c, 0.01).unwrap();
        assert_relative_eq!(w.get("T0").unwrap(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn negative_return_asset_gets_zero_weight() {
        let w = max_quadratic_utility(
            &series(&[0.08, -0.20, 0.06]),
            &cov(3, &[0.02, 0.0, 0.0, 0.0, 0.01, 0.0, 0.0, 0.0, 0.03]),
            2.0,
        )
        .unwrap();
        assert_eq!(w.get("T1"), Some(0.0));
        assert_relative_eq!(w.sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn solving_twice_is_identical() {
        let (mu, c) = four_assets();
        let a = max_quadratic_utility(&mu, &c, 9.0).unwrap();
        let b = max_quadratic_utility(&mu, &c, 9.0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn more_aversion_never_adds_volatility() {
        let (mu, c) = four_assets();
        let mut last = f64::INFINITY;
        for lambda in [0.1, 1.0, 2.0, 5.0, 10.0, 25.0, 64.0, 100.0, 225.0] {
            let vol = volatility(&max_quadratic_utility(&mu, &c, lambda).unwrap(), &c);
            assert!(vol <= last + 1e-12, "volatility rose to {vol} at {lambda}");
            last = vol;
        }
    }

    #[test]
    fn matches_kkt_conditions() {
        let (mu, c) = four_assets();
        let lambda = 7.0;
        let w = max_quadratic_utility(&mu, &c, lambda).unwrap();
        let wv = DVector::from_column_slice(w.weights());
        let g = c.matrix() * &wv * lambda - mu.to_vector();

        // Gradient is equal on held assets and no smaller on excluded ones.
        let held: Vec<f64> = (0..4).filter(|&i| wv[i] > 1e-9).map(|i| g[i]).collect();
        let level = held[0];
        assert!(held.iter().all(|x| (x - level).abs() < 1e-9));
        assert!((0..4)
            .filter(|&i| wv[i] <= 1e-9)
            .all(|i| g[i] >= level - 1e-9));
    }

    #[test]
    fn missing_ticker_in_covariance_is_a_mismatch() {
        let mu = TickerSeries::new(vec!["A".into(), "B".into()], vec![0.1, 0.05]).unwrap();
        let c = CovarianceMatrix::new(vec!["A".into()], DMatrix::from_element(1, 1, 0.04))
            .unwrap();
        assert!(matches!(
            max_quadratic_utility(&mu, &c, 10.0),
            Err(EngineError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn singular_covariance_fails() {
        let res = max_quadratic_utility(
            &series(&[0.1, 0.1]),
            &cov(2, &[0.01, 0.01, 0.01, 0.01]),
            10.0,
        );
        assert!(matches!(res, Err(EngineError::OptimizationFailed(_))));

        let indefinite = max_quadratic_utility(
            &series(&[0.1, 0.1]),
            &cov(2, &[0.01, 0.02, 0.02, 0.01]),
            10.0,
        );
        assert!(matches!(indefinite, Err(EngineError::OptimizationFailed(_))));
    }

    #[test]
    fn non_positive_penalty_is_rejected() {
        let (mu, c) = four_assets();
        assert!(matches!(
            max_quadratic_utility(&mu, &c, 0.0),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn annotate_attaches_per_asset_figures() {
        let w = AssetWeights::new(tickers(2), vec![0.25, 0.75]);
        let out = annotate(&w, &series(&[0.1, 0.2]), &series(&[0.3, 0.4])).unwrap();
        assert_eq!(
            out["T1"],
            AssetAllocation {
                weight: 0.75,
                expected_return: 0.2,
                expected_volatility: 0.4,
            }
        );
    }
}
