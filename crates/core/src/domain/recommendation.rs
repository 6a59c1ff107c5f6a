use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Solved long-only, fully invested weights, in the optimizer's ticker order.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetWeights {
    tickers: Vec<String>,
    weights: Vec<f64>,
}

impl AssetWeights {
    pub(crate) fn new(tickers: Vec<String>, weights: Vec<f64>) -> Self {
        debug_assert_eq!(tickers.len(), weights.len());
        Self { tickers, weights }
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn get(&self, ticker: &str) -> Option<f64> {
        self.tickers
            .iter()
            .position(|t| t == ticker)
            .map(|i| self.weights[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.tickers
            .iter()
            .map(String::as_str)
            .zip(self.weights.iter().copied())
    }

    pub fn sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// Zero out weights below `cutoff` and renormalise the remainder to sum to 1.
    pub fn cleaned(&self, cutoff: f64) -> EngineResult<Self> {
        if !(0.0..1.0).contains(&cutoff) {
            return Err(EngineError::Validation(format!(
                "weight cutoff must be in [0, 1) (got {cutoff})"
            )));
        }

        let kept: Vec<f64> = self
            .weights
            .iter()
            .map(|&w| if w < cutoff { 0.0 } else { w })
            .collect();
        let total: f64 = kept.iter().sum();
        if total <= 0.0 {
            return Err(EngineError::OptimizationFailed(format!(
                "no weight survives cutoff {cutoff}"
            )));
        }

        Ok(Self {
            tickers: self.tickers.clone(),
            weights: kept.into_iter().map(|w| w / total).collect(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetAllocation {
    pub weight: f64,
    pub expected_return: f64,
    pub expected_volatility: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioMetrics {
    /// Annual expected return, percent.
    pub expected_return: f64,
    /// Annual volatility, percent.
    pub annual_volatility: f64,
    pub sharpe_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub assets: BTreeMap<String, AssetAllocation>,
    pub metrics: PortfolioMetrics,
    /// Resolved coefficient reported back on the normalised [0, 1] scale.
    pub risk_aversion: f64,
}
