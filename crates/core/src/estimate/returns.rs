use crate::domain::quotes::{PeriodicReturns, QuoteTable};
use crate::domain::series::TickerSeries;
use crate::error::{EngineError, EngineResult};
use crate::sources::{Forecasts, Lookup};

/// Which estimate produced the expected-returns vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnsStrategy {
    Forecast,
    Historical,
}

/// `price[t] / price[t - window] - 1` per ticker, after forward-filling gaps.
///
/// The first `window` rows are undefined and dropped, as is any row where no ticker has a
/// defined return. Partially defined rows are kept.
pub fn periodic_returns(quotes: &QuoteTable, window: usize) -> EngineResult<PeriodicReturns> {
    if window == 0 {
        return Err(EngineError::InsufficientData(
            "return window must be at least 1 period".to_string(),
        ));
    }
    if quotes.len() < window + 1 {
        return Err(EngineError::InsufficientData(format!(
            "{} quote rows cannot support a {window}-period return window",
            quotes.len()
        )));
    }

    let filled = quotes.forward_filled();
    let prices = filled.rows();

    let mut dates = Vec::with_capacity(prices.len() - window);
    let mut rows = Vec::with_capacity(prices.len() - window);
    for t in window..prices.len() {
        let row: Vec<Option<f64>> = prices[t]
            .iter()
            .zip(&prices[t - window])
            .map(|(now, then)| match (now, then) {
                (Some(p), Some(p0)) => Some(p / p0 - 1.0),
                _ => None,
            })
            .collect();

        if row.iter().all(Option::is_none) {
            continue;
        }
        dates.push(filled.dates()[t]);
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(EngineError::InsufficientData(
            "no ticker has a defined periodic return".to_string(),
        ));
    }

    tracing::debug!(window, observations = rows.len(), "estimated periodic returns");
    Ok(PeriodicReturns::from_parts(
        window,
        dates,
        filled.tickers().to_vec(),
        rows,
    ))
}

/// Forecasts are periodic; multiply by `periods_per_year`. Every ticker needs a forecast.
pub fn annualize_forecasts(
    forecasts: &Forecasts,
    tickers: &[String],
    periods_per_year: u32,
) -> EngineResult<TickerSeries> {
    let mut values = Vec::with_capacity(tickers.len());
    let mut missing = Vec::new();
    for ticker in tickers {
        match forecasts.get(ticker) {
            Some(v) => values.push(v * f64::from(periods_per_year)),
            None => missing.push(ticker.as_str()),
        }
    }
    if !missing.is_empty() {
        return Err(EngineError::DimensionMismatch(format!(
            "forecasts are missing tickers: {}",
            missing.join(", ")
        )));
    }
    TickerSeries::new(tickers.to_vec(), values)
}

/// Geometric annualization: `prod(1 + r)^(periods_per_year / n) - 1`.
///
/// `n` is the number of return rows, so a series spanning more (or fewer) than one year is
/// scaled by its real length. Undefined cells are skipped in the product.
pub fn historical_expected_returns(
    returns: &PeriodicReturns,
    periods_per_year: u32,
) -> EngineResult<TickerSeries> {
    let n = returns.n_observations();
    if n == 0 {
        return Err(EngineError::InsufficientData(
            "no periodic returns to annualize".to_string(),
        ));
    }

    let exponent = f64::from(periods_per_year) / n as f64;
    let values = (0..returns.tickers().len())
        .map(|j| {
            let growth: f64 = returns.column(j).map(|r| 1.0 + r).product();
            growth.powf(exponent) - 1.0
        })
        .collect();

    TickerSeries::new(returns.tickers().to_vec(), values)
}

/// Forecast strategy when a forecast table was found, historical compounding otherwise.
pub fn expected_returns(
    forecasts: Lookup<Forecasts>,
    returns: &PeriodicReturns,
    periods_per_year: u32,
) -> EngineResult<(TickerSeries, ReturnsStrategy)> {
    match forecasts {
        Lookup::Found(f) => {
            let series = annualize_forecasts(&f, returns.tickers(), periods_per_year)?;
            tracing::debug!(periods_per_year, "expected returns from forecasts");
            Ok((series, ReturnsStrategy::Forecast))
        }
        Lookup::NotFound => {
            tracing::warn!("forecasts not found; estimating expected returns from quotes");
            let series = historical_expected_returns(returns, periods_per_year)?;
            Ok((series, ReturnsStrategy::Historical))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, NaiveDate};

    fn quotes(prices: &[[Option<f64>; 2]]) -> QuoteTable {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        QuoteTable::new(
            (0..prices.len())
                .map(|i| start + Duration::days(i as i64))
                .collect(),
            vec!["A".into(), "B".into()],
            prices.iter().map(|r| r.to_vec()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn drops_window_rows() {
        let q = quotes(&[
            [Some(100.0), Some(10.0)],
            [Some(110.0), Some(10.0)],
            [Some(121.0), Some(11.0)],
            [Some(110.0), Some(12.1)],
        ]);
        let r = periodic_returns(&q, 2).unwrap();
        assert_eq!(r.n_observations(), q.len() - 2);
        assert_eq!(r.dates(), &q.dates()[2..]);
        assert_relative_eq!(r.rows()[0][0].unwrap(), 0.21, epsilon = 1e-12);
        assert_relative_eq!(r.rows()[0][1].unwrap(), 0.1, epsilon = 1e-12);
        assert_relative_eq!(r.rows()[1][0].unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn too_few_rows_is_insufficient_data() {
        let q = quotes(&[[Some(1.0), Some(1.0)], [Some(1.0), Some(1.0)]]);
        assert!(matches!(
            periodic_returns(&q, 2),
            Err(EngineError::InsufficientData(_))
        ));
        assert!(matches!(
            periodic_returns(&q, 0),
            Err(EngineError::InsufficientData(_))
        ));
    }

    #[test]
    fn keeps_partial_rows_and_drops_empty_ones() {
        // B starts trading a day after A.
        let q = quotes(&[
            [None, None],
            [Some(100.0), None],
            [Some(100.0), Some(10.0)],
            [Some(105.0), Some(11.0)],
        ]);
        let r = periodic_returns(&q, 1).unwrap();
        // The first return row is fully undefined and dropped.
        assert_eq!(r.n_observations(), 2);
        assert_eq!(r.rows()[0], vec![Some(0.0), None]);
        assert!(r.rows().iter().all(|row| row.iter().any(Option::is_some)));
    }

    #[test]
    fn forward_fills_gaps_before_differencing() {
        let q = quotes(&[
            [Some(100.0), Some(10.0)],
            [None, Some(10.0)],
            [Some(110.0), Some(10.0)],
        ]);
        let r = periodic_returns(&q, 1).unwrap();
        assert_eq!(r.rows()[0][0], Some(0.0));
        assert_relative_eq!(r.rows()[1][0].unwrap(), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn historical_annualization_uses_observation_count() {
        // Six periods of +1% with twelve periods per year compounds over half a year.
        let prices: Vec<[Option<f64>; 2]> = (0..7)
            .map(|i| [Some(100.0 * 1.01f64.powi(i)), Some(50.0)])
            .collect();
        let r = periodic_returns(&quotes(&prices), 1).unwrap();
        assert_eq!(r.n_observations(), 6);

        let er = historical_expected_returns(&r, 12).unwrap();
        assert_relative_eq!(er.get("A").unwrap(), 1.01f64.powi(12) - 1.0, epsilon = 1e-12);
        assert_relative_eq!(er.get("B").unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn forecasts_are_annualized() {
        let r = periodic_returns(
            &quotes(&[[Some(1.0), Some(1.0)], [Some(1.1), Some(0.9)]]),
            1,
        )
        .unwrap();
        let mut f = Forecasts::new();
        f.insert("A".into(), 0.01);
        f.insert("B".into(), -0.005);
        f.insert("C".into(), 0.5);

        let (er, strategy) = expected_returns(Lookup::Found(f), &r, 12).unwrap();
        assert_eq!(strategy, ReturnsStrategy::Forecast);
        assert_eq!(er.tickers(), ["A", "B"]);
        assert_relative_eq!(er.get("A").unwrap(), 0.12, epsilon = 1e-12);
        assert_relative_eq!(er.get("B").unwrap(), -0.06, epsilon = 1e-12);
    }

    #[test]
    fn missing_forecast_falls_back_to_history() {
        let r = periodic_returns(
            &quotes(&[[Some(1.0), Some(1.0)], [Some(1.1), Some(0.9)]]),
            1,
        )
        .unwrap();
        let (er, strategy) = expected_returns(Lookup::NotFound, &r, 12).unwrap();
        assert_eq!(strategy, ReturnsStrategy::Historical);
        assert_relative_eq!(er.get("A").unwrap(), 1.1f64.powi(12) - 1.0, epsilon = 1e-9);
    }

    #[test]
    fn forecast_missing_a_ticker_is_a_mismatch() {
        let r = periodic_returns(
            &quotes(&[[Some(1.0), Some(1.0)], [Some(1.1), Some(0.9)]]),
            1,
        )
        .unwrap();
        let mut f = Forecasts::new();
        f.insert("A".into(), 0.01);
        assert!(matches!(
            expected_returns(Lookup::Found(f), &r, 12),
            Err(EngineError::DimensionMismatch(_))
        ));
    }
}
