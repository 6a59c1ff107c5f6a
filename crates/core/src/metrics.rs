use crate::domain::recommendation::{AssetWeights, PortfolioMetrics};
use crate::domain::series::{ensure_aligned, CovarianceMatrix, TickerSeries};
use crate::error::{EngineError, EngineResult};
use nalgebra::DVector;

/// Expected return and volatility (both in percent) plus the Sharpe ratio of `weights`.
pub fn portfolio_metrics(
    weights: &AssetWeights,
    expected_returns: &TickerSeries,
    covariance: &CovarianceMatrix,
    risk_free_rate: f64,
) -> EngineResult<PortfolioMetrics> {
    ensure_aligned(
        weights.tickers(),
        expected_returns.tickers(),
        "weights vs expected returns",
    )?;
    ensure_aligned(weights.tickers(), covariance.tickers(), "weights vs covariance")?;

    let w = DVector::from_column_slice(weights.weights());
    let ret = w.dot(&expected_returns.to_vector());
    let variance = (covariance.matrix() * &w).dot(&w);

    if !(variance.is_finite() && variance > 0.0) {
        return Err(EngineError::OptimizationFailed(format!(
            "portfolio variance is {variance}; Sharpe ratio is undefined"
        )));
    }
    let vol = variance.sqrt();

    Ok(PortfolioMetrics {
        expected_return: ret * 100.0,
        annual_volatility: vol * 100.0,
        sharpe_ratio: (ret - risk_free_rate) / vol,
    })
}
