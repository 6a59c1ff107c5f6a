//! Per-asset price statistics served next to recommendations.

use crate::domain::quotes::QuoteTable;
use crate::error::{EngineError, EngineResult};
use crate::universe::TickerUniverse;
use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_HISTORY_MONTHS: u32 = 5;
const YEAR_MONTHS: u32 = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicStats {
    pub current_price: f64,
    /// Percent change against the previous close.
    pub change_for_day: f64,
    pub long_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedStats {
    pub previous_close: f64,
    pub current_price: f64,
    pub change_for_day: f64,
    pub change_for_day_sum: f64,
    pub year_range_low: f64,
    pub year_range_high: f64,
    pub long_name: Option<String>,
    pub exchange: Option<String>,
    pub timezone: Option<String>,
    pub currency: Option<String>,
    /// Unix seconds at which the figures were produced.
    pub timestamp: i64,
}

/// Closing price keyed by the day's unix timestamp in milliseconds.
pub type PriceHistory = BTreeMap<i64, f64>;

fn prices(
    quotes: &QuoteTable,
    universe: &TickerUniverse,
    ticker: &str,
) -> EngineResult<Vec<(NaiveDate, f64)>> {
    if !universe.contains(ticker) {
        return Err(EngineError::Validation(format!("unknown asset {ticker:?}")));
    }
    let series = quotes.series(ticker).ok_or_else(|| {
        EngineError::DimensionMismatch(format!("quote table has no column for {ticker}"))
    })?;
    if series.len() < 2 {
        return Err(EngineError::InsufficientData(format!(
            "{ticker} has {} prices; statistics need at least 2",
            series.len()
        )));
    }
    Ok(series)
}

fn last_two(series: &[(NaiveDate, f64)]) -> (f64, f64) {
    let n = series.len();
    (series[n - 2].1, series[n - 1].1)
}

fn trailing(series: &[(NaiveDate, f64)], months: u32) -> &[(NaiveDate, f64)] {
    let last = series[series.len() - 1].0;
    let start = last
        .checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN);
    let first = series.partition_point(|(d, _)| *d < start);
    &series[first..]
}

pub fn basic(quotes: &QuoteTable, universe: &TickerUniverse, ticker: &str) -> EngineResult<BasicStats> {
    let series = prices(quotes, universe, ticker)?;
    let (previous, current) = last_two(&series);
    Ok(BasicStats {
        current_price: current,
        change_for_day: current * 100.0 / previous - 100.0,
        long_name: universe.long_name(ticker).map(str::to_string),
    })
}

pub fn detailed(
    quotes: &QuoteTable,
    universe: &TickerUniverse,
    ticker: &str,
    now: DateTime<Utc>,
) -> EngineResult<DetailedStats> {
    let series = prices(quotes, universe, ticker)?;
    let (previous, current) = last_two(&series);

    let year = trailing(&series, YEAR_MONTHS);
    let (low, high) = year
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (_, p)| {
            (lo.min(*p), hi.max(*p))
        });

    Ok(DetailedStats {
        previous_close: previous,
        current_price: current,
        change_for_day: current * 100.0 / previous - 100.0,
        change_for_day_sum: current - previous,
        year_range_low: low,
        year_range_high: high,
        long_name: universe.long_name(ticker).map(str::to_string),
        exchange: universe.exchange(ticker).map(str::to_string),
        timezone: universe.tickers_exchange_timezone.clone(),
        currency: universe.tickers_currency.clone(),
        timestamp: now.timestamp(),
    })
}

pub fn history(
    quotes: &QuoteTable,
    universe: &TickerUniverse,
    ticker: &str,
    months: u32,
) -> EngineResult<PriceHistory> {
    let series = prices(quotes, universe, ticker)?;
    Ok(trailing(&series, months)
        .iter()
        .map(|(d, p)| (d.and_time(chrono::NaiveTime::MIN).and_utc().timestamp_millis(), *p))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn universe() -> TickerUniverse {
        TickerUniverse::from_json_str(
            r#"{
                "tickers": ["SPY", "TLT"],
                "tickersDescription": {"SPY": "SPDR S&P 500 ETF"},
                "tickersExchange": {"SPY": "NYSE Arca"},
                "tickersExchangeTimezone": "America/New_York",
                "tickersCurrency": "USD"
            }"#,
        )
        .unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn quotes() -> QuoteTable {
        QuoteTable::new(
            vec![d(2023, 1, 31), d(2023, 6, 30), d(2023, 11, 30), d(2024, 1, 31), d(2024, 2, 29)],
            vec!["SPY".into(), "TLT".into()],
            vec![
                vec![Some(500.0), Some(90.0)],
                vec![Some(380.0), Some(95.0)],
                vec![Some(410.0), None],
                vec![Some(420.0), None],
                vec![Some(441.0), None],
            ],
        )
        .unwrap()
    }

    #[test]
    fn basic_uses_last_two_closes() {
        let s = basic(&quotes(), &universe(), "SPY").unwrap();
        assert_eq!(s.current_price, 441.0);
        assert_relative_eq!(s.change_for_day, 5.0, epsilon = 1e-9);
        assert_eq!(s.long_name.as_deref(), Some("SPDR S&P 500 ETF"));
    }

    #[test]
    fn detailed_year_range_excludes_older_prices() {
        let now = DateTime::from_timestamp(1_709_251_200, 0).unwrap();
        let s = detailed(&quotes(), &universe(), "SPY", now).unwrap();
        assert_eq!(s.previous_close, 420.0);
        assert_relative_eq!(s.change_for_day_sum, 21.0);
        // 2023-01-31 is more than a year before 2024-02-29.
        assert_eq!(s.year_range_low, 380.0);
        assert_eq!(s.year_range_high, 441.0);
        assert_eq!(s.exchange.as_deref(), Some("NYSE Arca"));
        assert_eq!(s.currency.as_deref(), Some("USD"));
        assert_eq!(s.timestamp, 1_709_251_200);
    }

    #[test]
    fn history_covers_trailing_months() {
        let h = history(&quotes(), &universe(), "SPY", DEFAULT_HISTORY_MONTHS).unwrap();
        let keys: Vec<i64> = h.keys().copied().collect();
        assert_eq!(
            keys,
            vec![
                d(2023, 11, 30).and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_millis(),
                d(2024, 1, 31).and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_millis(),
                d(2024, 2, 29).and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_millis(),
            ]
        );

        let json = serde_json::to_value(&h).unwrap();
        assert_eq!(json["1709164800000"], 441.0);
    }

    #[test]
    fn unknown_asset_is_a_validation_error() {
        assert!(matches!(
            basic(&quotes(), &universe(), "QQQ"),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn one_price_is_not_enough() {
        let q = QuoteTable::new(
            vec![d(2024, 1, 2), d(2024, 1, 3)],
            vec!["SPY".into(), "TLT".into()],
            vec![vec![Some(1.0), Some(2.0)], vec![Some(1.1), None]],
        )
        .unwrap();
        assert!(matches!(
            basic(&q, &universe(), "TLT"),
            Err(EngineError::InsufficientData(_))
        ));
    }
}
