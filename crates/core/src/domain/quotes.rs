use crate::error::{EngineError, EngineResult};
use chrono::NaiveDate;
use std::collections::BTreeSet;

/// Adjusted close prices, one row per trading date (ascending), one column per ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteTable {
    dates: Vec<NaiveDate>,
    tickers: Vec<String>,
    rows: Vec<Vec<Option<f64>>>,
}

impl QuoteTable {
    pub fn new(
        dates: Vec<NaiveDate>,
        tickers: Vec<String>,
        rows: Vec<Vec<Option<f64>>>,
    ) -> EngineResult<Self> {
        if dates.len() != rows.len() {
            return Err(EngineError::DimensionMismatch(format!(
                "quote table has {} dates but {} rows",
                dates.len(),
                rows.len()
            )));
        }

        let mut seen = BTreeSet::new();
        for ticker in &tickers {
            if !seen.insert(ticker.as_str()) {
                return Err(EngineError::Validation(format!(
                    "duplicate ticker column: {ticker}"
                )));
            }
        }

        for pair in dates.windows(2) {
            if pair[0] >= pair[1] {
                return Err(EngineError::Validation(format!(
                    "quote dates must be strictly ascending ({} then {})",
                    pair[0], pair[1]
                )));
            }
        }

        for (date, row) in dates.iter().zip(&rows) {
            if row.len() != tickers.len() {
                return Err(EngineError::DimensionMismatch(format!(
                    "row {date} has {} cells for {} tickers",
                    row.len(),
                    tickers.len()
                )));
            }
            if let Some(bad) = row
                .iter()
                .flatten()
                .find(|p| !p.is_finite() || **p <= 0.0)
            {
                return Err(EngineError::Validation(format!(
                    "non-positive or non-finite price {bad} on {date}"
                )));
            }
        }

        Ok(Self {
            dates,
            tickers,
            rows,
        })
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn rows(&self) -> &[Vec<Option<f64>>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn column_index(&self, ticker: &str) -> Option<usize> {
        self.tickers.iter().position(|t| t == ticker)
    }

    /// Restrict (and reorder) the columns to `universe`. Every universe ticker must be present.
    pub fn select(&self, universe: &[String]) -> EngineResult<Self> {
        let mut idx = Vec::with_capacity(universe.len());
        let mut missing = Vec::new();
        for ticker in universe {
            match self.column_index(ticker) {
                Some(i) => idx.push(i),
                None => missing.push(ticker.as_str()),
            }
        }
        if !missing.is_empty() {
            return Err(EngineError::DimensionMismatch(format!(
                "quotes are missing universe tickers: {}",
                missing.join(", ")
            )));
        }

        let rows = self
            .rows
            .iter()
            .map(|row| idx.iter().map(|&i| row[i]).collect())
            .collect();

        Ok(Self {
            dates: self.dates.clone(),
            tickers: universe.to_vec(),
            rows,
        })
    }

    /// Carry the last known price forward over gaps; leading gaps stay empty.
    pub fn forward_filled(&self) -> Self {
        let mut last: Vec<Option<f64>> = vec![None; self.tickers.len()];
        let rows = self
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .zip(last.iter_mut())
                    .map(|(cell, prev)| {
                        if cell.is_some() {
                            *prev = *cell;
                        }
                        *prev
                    })
                    .collect()
            })
            .collect();

        Self {
            dates: self.dates.clone(),
            tickers: self.tickers.clone(),
            rows,
        }
    }

    /// Known prices of one ticker, in date order.
    pub fn series(&self, ticker: &str) -> Option<Vec<(NaiveDate, f64)>> {
        let j = self.column_index(ticker)?;
        Some(
            self.dates
                .iter()
                .zip(&self.rows)
                .filter_map(|(d, row)| row[j].map(|p| (*d, p)))
                .collect(),
        )
    }
}

/// Trailing-window percentage returns. Same columns as the source [`QuoteTable`].
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodicReturns {
    pub window: usize,
    dates: Vec<NaiveDate>,
    tickers: Vec<String>,
    rows: Vec<Vec<Option<f64>>>,
}

impl PeriodicReturns {
    pub(crate) fn from_parts(
        window: usize,
        dates: Vec<NaiveDate>,
        tickers: Vec<String>,
        rows: Vec<Vec<Option<f64>>>,
    ) -> Self {
        Self {
            window,
            dates,
            tickers,
            rows,
        }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn rows(&self) -> &[Vec<Option<f64>>] {
        &self.rows
    }

    /// Number of return rows (observations), including partially defined ones.
    pub fn n_observations(&self) -> usize {
        self.rows.len()
    }

    /// Defined returns of column `j`.
    pub fn column(&self, j: usize) -> impl Iterator<Item = f64> + '_ {
        self.rows.iter().filter_map(move |row| row[j])
    }
}
