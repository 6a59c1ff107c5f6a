use super::{Forecasts, Lookup};
use crate::domain::quotes::QuoteTable;
use crate::error::{EngineError, EngineResult};
use chrono::NaiveDate;

const FORECAST_COLUMN: &str = "forecast_value";
const CLIENT_ID_COLUMN: &str = "clientID";
const PREDICTED_RISK_COLUMN: &str = "predicted_risk";

fn malformed(source_name: &'static str, detail: impl std::fmt::Display) -> EngineError {
    EngineError::malformed(source_name, format!("csv: {detail}"))
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    // Accept plain dates and pandas-style timestamps ("2024-01-02 00:00:00").
    let head = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

fn parse_cell(raw: &str) -> Result<Option<f64>, std::num::ParseFloatError> {
    if raw.is_empty() {
        return Ok(None);
    }
    let v = raw.parse::<f64>()?;
    Ok(v.is_finite().then_some(v))
}

/// Wide quote table: first column is the date index, every other column a ticker.
pub fn parse_quotes(text: &str) -> EngineResult<QuoteTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = rdr.headers().map_err(|e| malformed("quotes", e))?.clone();
    if headers.len() < 2 {
        return Err(malformed("quotes", "expected a date column and at least one ticker"));
    }
    let tickers: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

    let mut rows: Vec<(NaiveDate, Vec<Option<f64>>)> = Vec::new();
    for (line, rec) in rdr.records().enumerate() {
        let rec = rec.map_err(|e| malformed("quotes", e))?;
        let raw_date = rec.get(0).unwrap_or_default();
        let date = parse_date(raw_date)
            .ok_or_else(|| malformed("quotes", format!("row {line}: bad date {raw_date:?}")))?;

        let mut cells = Vec::with_capacity(tickers.len());
        for (j, raw) in rec.iter().skip(1).enumerate() {
            let cell = parse_cell(raw).map_err(|_| {
                malformed(
                    "quotes",
                    format!("row {line}: bad price {raw:?} for {}", tickers[j]),
                )
            })?;
            cells.push(cell);
        }
        rows.push((date, cells));
    }

    rows.sort_by_key(|(date, _)| *date);
    let (dates, rows): (Vec<_>, Vec<_>) = rows.into_iter().unzip();

    QuoteTable::new(dates, tickers, rows).map_err(|e| malformed("quotes", e))
}

/// Forecast table indexed by ticker (first column) with a `forecast_value` column.
pub fn parse_forecasts(text: &str) -> EngineResult<Forecasts> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = rdr.headers().map_err(|e| malformed("forecasts", e))?.clone();
    let value_idx = headers
        .iter()
        .position(|h| h == FORECAST_COLUMN)
        .filter(|&i| i > 0)
        .ok_or_else(|| malformed("forecasts", format!("missing {FORECAST_COLUMN} column")))?;

    let mut out = Forecasts::new();
    for rec in rdr.records() {
        let rec = rec.map_err(|e| malformed("forecasts", e))?;
        let ticker = rec.get(0).unwrap_or_default().to_string();
        let raw = rec.get(value_idx).unwrap_or_default();
        let value = parse_cell(raw)
            .ok()
            .flatten()
            .ok_or_else(|| malformed("forecasts", format!("bad forecast {raw:?} for {ticker}")))?;
        if out.insert(ticker.clone(), value).is_some() {
            return Err(malformed("forecasts", format!("duplicate ticker {ticker}")));
        }
    }
    Ok(out)
}

/// Last `predicted_risk` recorded for `user_id` in a `;`-separated predictions file.
pub fn latest_prediction(text: &str, user_id: &str) -> EngineResult<Lookup<f64>> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b';')
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = rdr
        .headers()
        .map_err(|e| malformed("risk_preferences", e))?
        .clone();
    let find = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| malformed("risk_preferences", format!("missing {name} column")))
    };
    let id_idx = find(CLIENT_ID_COLUMN)?;
    let risk_idx = find(PREDICTED_RISK_COLUMN)?;

    let mut latest = None;
    for rec in rdr.records() {
        let rec = rec.map_err(|e| malformed("risk_preferences", e))?;
        if rec.get(id_idx) != Some(user_id) {
            continue;
        }
        let raw = rec.get(risk_idx).unwrap_or_default();
        let value = parse_cell(raw).ok().flatten().ok_or_else(|| {
            malformed("risk_preferences", format!("bad predicted_risk {raw:?}"))
        })?;
        latest = Some(value);
    }
    Ok(latest.into())
}
