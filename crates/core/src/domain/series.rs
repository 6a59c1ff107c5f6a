use crate::error::{EngineError, EngineResult};
use nalgebra::{DMatrix, DVector};

/// One value per ticker (expected returns, volatilities).
#[derive(Debug, Clone, PartialEq)]
pub struct TickerSeries {
    tickers: Vec<String>,
    values: Vec<f64>,
}

impl TickerSeries {
    pub fn new(tickers: Vec<String>, values: Vec<f64>) -> EngineResult<Self> {
        if tickers.len() != values.len() {
            return Err(EngineError::DimensionMismatch(format!(
                "{} tickers but {} values",
                tickers.len(),
                values.len()
            )));
        }
        Ok(Self { tickers, values })
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, ticker: &str) -> Option<f64> {
        self.tickers
            .iter()
            .position(|t| t == ticker)
            .map(|i| self.values[i])
    }

    pub fn to_vector(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.values)
    }
}

/// Annualized, ticker-indexed covariance matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceMatrix {
    tickers: Vec<String>,
    matrix: DMatrix<f64>,
}

impl CovarianceMatrix {
    pub fn new(tickers: Vec<String>, matrix: DMatrix<f64>) -> EngineResult<Self> {
        if !matrix.is_square() || matrix.nrows() != tickers.len() {
            return Err(EngineError::DimensionMismatch(format!(
                "covariance is {}x{} for {} tickers",
                matrix.nrows(),
                matrix.ncols(),
                tickers.len()
            )));
        }
        Ok(Self { tickers, matrix })
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }
}

/// Both inputs must be indexed by the same tickers in the same order.
pub fn ensure_aligned(left: &[String], right: &[String], what: &str) -> EngineResult<()> {
    if left == right {
        return Ok(());
    }

    let only_left: Vec<&str> = left
        .iter()
        .filter(|t| !right.contains(*t))
        .map(String::as_str)
        .collect();
    let only_right: Vec<&str> = right
        .iter()
        .filter(|t| !left.contains(*t))
        .map(String::as_str)
        .collect();

    let detail = if only_left.is_empty() && only_right.is_empty() {
        "same tickers in a different order".to_string()
    } else {
        format!(
            "only in first: [{}], only in second: [{}]",
            only_left.join(", "),
            only_right.join(", ")
        )
    };

    Err(EngineError::DimensionMismatch(format!("{what}: {detail}")))
}
