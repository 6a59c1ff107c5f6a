//! Request orchestration: sources in, recommendation out.

use crate::config::{EngineOptions, Settings};
use crate::domain::quotes::QuoteTable;
use crate::domain::recommendation::Recommendation;
use crate::error::{EngineError, EngineResult};
use crate::estimate::{expected_returns, expected_volatility, periodic_returns, risk_model};
use crate::metrics::portfolio_metrics;
use crate::optimize::{annotate, max_quadratic_utility};
use crate::risk_aversion::RiskAversionResolver;
use crate::sources::blob::{BlobStore, FsBlobStore, HttpBlobStore};
use crate::sources::{
    BlobForecastSource, BlobQuoteSource, BlobRiskPreferenceSource, Forecasts, ForecastSource,
    Lookup, QuoteSource, RiskPreferenceSource,
};
use crate::stats::{self, BasicStats, DetailedStats, PriceHistory};
use crate::storage::risk_preferences::PgRiskPreferenceSource;
use crate::universe::TickerUniverse;
use std::sync::Arc;

pub struct RecommendationEngine {
    universe: Arc<TickerUniverse>,
    quotes: Arc<dyn QuoteSource>,
    forecasts: Option<Arc<dyn ForecastSource>>,
    preferences: Option<Arc<dyn RiskPreferenceSource>>,
    options: EngineOptions,
    resolver: RiskAversionResolver,
}

impl RecommendationEngine {
    pub fn new(
        universe: Arc<TickerUniverse>,
        quotes: Arc<dyn QuoteSource>,
        options: EngineOptions,
    ) -> EngineResult<Self> {
        let resolver = RiskAversionResolver::from_options(&options)?;
        Ok(Self {
            universe,
            quotes,
            forecasts: None,
            preferences: None,
            options,
            resolver,
        })
    }

    pub fn with_forecasts(mut self, source: Arc<dyn ForecastSource>) -> Self {
        self.forecasts = Some(source);
        self
    }

    pub fn with_risk_preferences(mut self, source: Arc<dyn RiskPreferenceSource>) -> Self {
        self.preferences = Some(source);
        self
    }

    /// Wire the blob-backed sources described by `settings`.
    ///
    /// `BLOB_ROOT` selects a local directory store, otherwise blobs are fetched over HTTP.
    /// Predicted preferences come from Postgres when a pool is supplied.
    pub fn from_settings(
        settings: &Settings,
        options: EngineOptions,
        pool: Option<sqlx::PgPool>,
    ) -> anyhow::Result<Self> {
        let universe = Arc::new(TickerUniverse::load(&settings.settings_path)?);
        let store: Arc<dyn BlobStore> = match &settings.blob_root {
            Some(root) => Arc::new(FsBlobStore::new(root)),
            None => Arc::new(HttpBlobStore::from_settings(settings)?),
        };

        let quotes = Arc::new(BlobQuoteSource::new(
            store.clone(),
            settings.require_quotes_blob()?,
        ));
        let mut engine = Self::new(universe, quotes, options)?;

        match settings.predicted_returns_blob() {
            Some(blob) => {
                engine = engine.with_forecasts(Arc::new(BlobForecastSource::new(store.clone(), blob)))
            }
            None => tracing::warn!("PREDICTED_RETURNS_* not set; expected returns will be historical"),
        }

        match (pool, settings.predicted_irp_blob()) {
            (Some(pool), _) => {
                engine = engine.with_risk_preferences(Arc::new(PgRiskPreferenceSource::new(pool)))
            }
            (None, Some(blob)) => {
                engine = engine
                    .with_risk_preferences(Arc::new(BlobRiskPreferenceSource::new(store, blob)))
            }
            (None, None) => {
                tracing::warn!("no risk preference source configured; default risk aversion applies")
            }
        }

        tracing::info!(
            tickers = engine.universe.tickers.len(),
            store = if settings.blob_root.is_some() { "fs" } else { "http" },
            forecasts = engine.forecasts.is_some(),
            risk_preferences = engine.preferences.as_ref().map(|p| p.source_name()),
            "recommendation engine ready"
        );
        Ok(engine)
    }

    pub fn universe(&self) -> &TickerUniverse {
        &self.universe
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Quotes restricted to the configured universe. Missing quotes abort the request.
    pub async fn load_quotes(&self) -> EngineResult<QuoteTable> {
        match self.quotes.load_quotes().await? {
            Lookup::Found(table) => table.select(&self.universe.tickers),
            Lookup::NotFound => Err(EngineError::unavailable(
                self.quotes.source_name(),
                "quote table not found",
            )),
        }
    }

    async fn load_forecasts(&self) -> EngineResult<Lookup<Forecasts>> {
        let Some(source) = &self.forecasts else {
            return Ok(Lookup::NotFound);
        };
        match source.load_forecasts().await {
            Err(err @ EngineError::DataUnavailable { .. }) => {
                tracing::warn!(source = source.source_name(), error = %err, "forecast source unavailable");
                Ok(Lookup::NotFound)
            }
            other => other,
        }
    }

    /// Build a recommendation for `user_id`.
    ///
    /// `risk_preference` in `[0, 1]` overrides the user's predicted preference.
    pub async fn make_recommendation(
        &self,
        user_id: &str,
        risk_preference: Option<f64>,
    ) -> EngineResult<Recommendation> {
        if user_id.trim().is_empty() {
            return Err(EngineError::Validation("user id is empty".to_string()));
        }

        let resolved = match risk_preference {
            Some(pref) => self.resolver.resolve_explicit(pref)?,
            None => {
                self.resolver
                    .resolve_for_user(self.preferences.as_deref(), user_id)
                    .await?
            }
        };

        let quotes = self.load_quotes().await?;
        let returns = periodic_returns(&quotes, self.options.return_window)?;
        let forecasts = self.load_forecasts().await?;
        let ppy = self.options.periods_per_year;

        let (mu, strategy) = expected_returns(forecasts, &returns, ppy)?;
        let volatility = expected_volatility(&returns, ppy)?;
        let covariance = risk_model(&returns, ppy)?;

        let mut weights = max_quadratic_utility(&mu, &covariance, resolved.coefficient.powi(2))?;
        if let Some(cutoff) = self.options.weight_cutoff {
            weights = weights.cleaned(cutoff)?;
        }

        let assets = annotate(&weights, &mu, &volatility)?;
        let metrics = portfolio_metrics(&weights, &mu, &covariance, self.options.risk_free_rate)?;
        let risk_aversion = self.resolver.scale().unscale(resolved.coefficient);

        tracing::info!(
            user_id,
            coefficient = resolved.coefficient,
            origin = ?resolved.origin,
            strategy = ?strategy,
            expected_return = metrics.expected_return,
            annual_volatility = metrics.annual_volatility,
            sharpe_ratio = metrics.sharpe_ratio,
            "recommendation built"
        );

        Ok(Recommendation {
            assets,
            metrics,
            risk_aversion,
        })
    }

    pub async fn basic_stats(&self, ticker: &str) -> EngineResult<BasicStats> {
        let quotes = self.load_quotes().await?;
        stats::basic(&quotes, &self.universe, ticker)
    }

    pub async fn detailed_stats(&self, ticker: &str) -> EngineResult<DetailedStats> {
        let quotes = self.load_quotes().await?;
        stats::detailed(&quotes, &self.universe, ticker, chrono::Utc::now())
    }

    pub async fn price_history(&self, ticker: &str, months: u32) -> EngineResult<PriceHistory> {
        let quotes = self.load_quotes().await?;
        stats::history(&quotes, &self.universe, ticker, months)
    }
}
