//! External collaborators of the recommendation pipeline.
//!
//! Every adapter answers with a [`Lookup`]: a missing blob or record is an ordinary
//! `NotFound`, while transport and parse failures are [`EngineError`]s.

pub mod blob;
pub mod csv_tables;

use crate::domain::quotes::QuoteTable;
use crate::error::EngineResult;
use blob::{BlobRef, BlobStore};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(v) => Some(v),
            Lookup::NotFound => None,
        }
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => Lookup::Found(v),
            None => Lookup::NotFound,
        }
    }
}

/// Per-ticker periodic forecast values (not yet annualized).
pub type Forecasts = BTreeMap<String, f64>;

#[async_trait::async_trait]
pub trait QuoteSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn load_quotes(&self) -> EngineResult<Lookup<QuoteTable>>;
}

#[async_trait::async_trait]
pub trait ForecastSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn load_forecasts(&self) -> EngineResult<Lookup<Forecasts>>;
}

#[async_trait::async_trait]
pub trait RiskPreferenceSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Most recent predicted risk preference for `user_id`, on the normalised [0, 1] scale.
    async fn latest_prediction(&self, user_id: &str) -> EngineResult<Lookup<f64>>;
}

/// Quote table stored as a wide CSV blob (date index, one column per ticker).
#[derive(Clone)]
pub struct BlobQuoteSource {
    store: Arc<dyn BlobStore>,
    blob: BlobRef,
}

impl BlobQuoteSource {
    pub fn new(store: Arc<dyn BlobStore>, blob: BlobRef) -> Self {
        Self { store, blob }
    }
}

#[async_trait::async_trait]
impl QuoteSource for BlobQuoteSource {
    fn source_name(&self) -> &'static str {
        "quotes"
    }

    async fn load_quotes(&self) -> EngineResult<Lookup<QuoteTable>> {
        tracing::debug!(blob = %self.blob, store = self.store.store_name(), "loading quotes");
        match self.store.get_text(&self.blob).await? {
            Lookup::Found(text) => Ok(Lookup::Found(csv_tables::parse_quotes(&text)?)),
            Lookup::NotFound => Ok(Lookup::NotFound),
        }
    }
}

/// Forecast table stored as a CSV blob indexed by ticker with a `forecast_value` column.
#[derive(Clone)]
pub struct BlobForecastSource {
    store: Arc<dyn BlobStore>,
    blob: BlobRef,
}

impl BlobForecastSource {
    pub fn new(store: Arc<dyn BlobStore>, blob: BlobRef) -> Self {
        Self { store, blob }
    }
}

#[async_trait::async_trait]
impl ForecastSource for BlobForecastSource {
    fn source_name(&self) -> &'static str {
        "forecasts"
    }

    async fn load_forecasts(&self) -> EngineResult<Lookup<Forecasts>> {
        tracing::debug!(blob = %self.blob, store = self.store.store_name(), "loading forecasts");
        match self.store.get_text(&self.blob).await? {
            Lookup::Found(text) => Ok(Lookup::Found(csv_tables::parse_forecasts(&text)?)),
            Lookup::NotFound => Ok(Lookup::NotFound),
        }
    }
}

/// Predicted preferences stored as a `;`-separated CSV blob (`clientID`, `predicted_risk`).
#[derive(Clone)]
pub struct BlobRiskPreferenceSource {
    store: Arc<dyn BlobStore>,
    blob: BlobRef,
}

impl BlobRiskPreferenceSource {
    pub fn new(store: Arc<dyn BlobStore>, blob: BlobRef) -> Self {
        Self { store, blob }
    }
}

#[async_trait::async_trait]
impl RiskPreferenceSource for BlobRiskPreferenceSource {
    fn source_name(&self) -> &'static str {
        "risk_preferences"
    }

    async fn latest_prediction(&self, user_id: &str) -> EngineResult<Lookup<f64>> {
        tracing::debug!(blob = %self.blob, user_id, "loading predicted risk preference");
        match self.store.get_text(&self.blob).await? {
            Lookup::Found(text) => csv_tables::latest_prediction(&text, user_id),
            Lookup::NotFound => Ok(Lookup::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blob::MemoryBlobStore;

    fn store() -> Arc<MemoryBlobStore> {
        let store = MemoryBlobStore::default();
        store.put(
            &BlobRef::new("quotes", "quotes.csv"),
            "Date,AAA,BBB\n2024-01-02,10,20\n2024-01-03,11,21\n",
        );
        store.put(
            &BlobRef::new("irp", "irp.csv"),
            "clientID;predicted_risk\nuser-1;0.2\nuser-2;0.9\nuser-1;0.4\n",
        );
        Arc::new(store)
    }

    #[tokio::test]
    async fn quote_source_parses_found_blob() {
        let src = BlobQuoteSource::new(store(), BlobRef::new("quotes", "quotes.csv"));
        let table = src.load_quotes().await.unwrap().found().unwrap();
        assert_eq!(table.tickers(), ["AAA", "BBB"]);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn missing_forecast_blob_is_not_found() {
        let src = BlobForecastSource::new(store(), BlobRef::new("fc", "missing.csv"));
        assert_eq!(src.load_forecasts().await.unwrap(), Lookup::NotFound);
    }

    #[tokio::test]
    async fn risk_preference_uses_last_record_for_user() {
        let src = BlobRiskPreferenceSource::new(store(), BlobRef::new("irp", "irp.csv"));
        assert_eq!(
            src.latest_prediction("user-1").await.unwrap(),
            Lookup::Found(0.4)
        );
        assert_eq!(
            src.latest_prediction("user-3").await.unwrap(),
            Lookup::NotFound
        );
    }
}
