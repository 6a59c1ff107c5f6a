use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Tradable tickers plus the descriptive metadata shown by the statistics queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerUniverse {
    pub tickers: Vec<String>,
    #[serde(default)]
    pub tickers_description: BTreeMap<String, String>,
    #[serde(default)]
    pub tickers_exchange: BTreeMap<String, String>,
    #[serde(default)]
    pub tickers_exchange_timezone: Option<String>,
    #[serde(default)]
    pub tickers_currency: Option<String>,
}

impl TickerUniverse {
    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        let universe: Self =
            serde_json::from_str(s).context("ticker settings are not valid JSON")?;
        universe.validate()?;
        Ok(universe)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read ticker settings failed: {}", path.display()))?;
        Self::from_json_str(&text)
            .with_context(|| format!("invalid ticker settings: {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.tickers.is_empty(), "tickers must be non-empty");

        let mut seen = BTreeSet::new();
        for ticker in &self.tickers {
            let t = ticker.trim();
            anyhow::ensure!(!t.is_empty(), "ticker must be non-empty");
            anyhow::ensure!(t == ticker, "ticker has surrounding whitespace: {ticker:?}");
            anyhow::ensure!(seen.insert(t), "duplicate ticker: {t}");
        }
        Ok(())
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.tickers.iter().any(|t| t == ticker)
    }

    pub fn long_name(&self, ticker: &str) -> Option<&str> {
        self.tickers_description.get(ticker).map(String::as_str)
    }

    pub fn exchange(&self, ticker: &str) -> Option<&str> {
        self.tickers_exchange.get(ticker).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_settings_shape() {
        let u = TickerUniverse::from_json_str(
            r#"{
                "tickers": ["SPY", "TLT"],
                "tickersDescription": {"SPY": "SPDR S&P 500 ETF Trust"},
                "tickersExchange": {"SPY": "NYSEArca"},
                "tickersExchangeTimezone": "America/New_York",
                "tickersCurrency": "USD",
                "startDate": "2015-01-01"
            }"#,
        )
        .unwrap();

        assert_eq!(u.tickers, vec!["SPY", "TLT"]);
        assert_eq!(u.long_name("SPY"), Some("SPDR S&P 500 ETF Trust"));
        assert_eq!(u.long_name("TLT"), None);
        assert_eq!(u.exchange("SPY"), Some("NYSEArca"));
        assert_eq!(u.tickers_currency.as_deref(), Some("USD"));
        assert!(u.contains("TLT"));
    }

    #[test]
    fn rejects_duplicates_and_empty() {
        assert!(TickerUniverse::from_json_str(r#"{"tickers": []}"#).is_err());
        assert!(TickerUniverse::from_json_str(r#"{"tickers": ["A", "A"]}"#).is_err());
    }
}
