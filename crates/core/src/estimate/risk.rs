//! Volatility and covariance estimates from periodic returns.
//!
//! The covariance is always the Ledoit-Wolf (2004) shrinkage estimate toward a scaled
//! identity: with few observations per asset the sample covariance is close to singular.

use crate::domain::quotes::PeriodicReturns;
use crate::domain::series::{CovarianceMatrix, TickerSeries};
use crate::error::{EngineError, EngineResult};
use nalgebra::DMatrix;

/// Shrunk covariance (not annualized) and the shrinkage intensity in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Shrinkage {
    pub covariance: DMatrix<f64>,
    pub intensity: f64,
}

/// Sample standard deviation (n - 1) of each ticker's defined returns, annualized.
pub fn expected_volatility(
    returns: &PeriodicReturns,
    periods_per_year: u32,
) -> EngineResult<TickerSeries> {
    let scale = f64::from(periods_per_year).sqrt();
    let mut values = Vec::with_capacity(returns.tickers().len());
    for (j, ticker) in returns.tickers().iter().enumerate() {
        let xs: Vec<f64> = returns.column(j).collect();
        if xs.len() < 2 {
            return Err(EngineError::InsufficientData(format!(
                "{ticker} has {} return observations; volatility needs at least 2",
                xs.len()
            )));
        }
        let n = xs.len() as f64;
        let mean = xs.iter().sum::<f64>() / n;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
        values.push(var.sqrt() * scale);
    }
    TickerSeries::new(returns.tickers().to_vec(), values)
}

/// Annualized Ledoit-Wolf covariance of the periodic returns. Undefined cells count as 0.
pub fn risk_model(
    returns: &PeriodicReturns,
    periods_per_year: u32,
) -> EngineResult<CovarianceMatrix> {
    let n = returns.n_observations();
    let p = returns.tickers().len();
    if n < 2 {
        return Err(EngineError::InsufficientData(format!(
            "{n} return observations; covariance needs at least 2"
        )));
    }

    let x = DMatrix::from_fn(n, p, |i, j| returns.rows()[i][j].unwrap_or(0.0));
    let shrunk = ledoit_wolf(&x);
    tracing::debug!(
        observations = n,
        assets = p,
        shrinkage = shrunk.intensity,
        "estimated risk model"
    );

    CovarianceMatrix::new(
        returns.tickers().to_vec(),
        shrunk.covariance * f64::from(periods_per_year),
    )
}

/// Ledoit-Wolf shrinkage of the empirical covariance of `x` (rows = observations).
///
/// Target is `mu * I` with `mu = trace(S) / p`, where `S` uses the `1/n` denominator of the
/// column-centered data. Intensity is `min(beta, delta) / delta`.
pub fn ledoit_wolf(x: &DMatrix<f64>) -> Shrinkage {
    let (n, p) = x.shape();
    let nf = n as f64;
    let pf = p as f64;

    let means = x.row_mean();
    let xc = DMatrix::from_fn(n, p, |i, j| x[(i, j)] - means[j]);

    if p == 1 {
        let var = xc.iter().map(|v| v * v).sum::<f64>() / nf;
        return Shrinkage {
            covariance: DMatrix::from_element(1, 1, var),
            intensity: 0.0,
        };
    }

    let xtx = xc.transpose() * &xc;
    let emp = &xtx / nf;

    let x2 = xc.map(|v| v * v);
    let trace_sum = x2.sum() / nf;
    let mu = trace_sum / pf;

    let beta_ = (x2.transpose() * &x2).sum();
    let delta_ = xtx.map(|v| v * v).sum() / (nf * nf);

    let beta = (beta_ / nf - delta_) / (pf * nf);
    let delta = (delta_ - 2.0 * mu * trace_sum + pf * mu * mu) / pf;
    let beta = beta.min(delta);
    let intensity = if beta == 0.0 { 0.0 } else { beta / delta };

    let mut covariance = emp * (1.0 - intensity);
    for i in 0..p {
        covariance[(i, i)] += intensity * mu;
    }

    Shrinkage {
        covariance,
        intensity,
    }
}
