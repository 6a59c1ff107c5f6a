pub mod domain;
pub mod engine;
pub mod error;
pub mod estimate;
pub mod metrics;
pub mod optimize;
pub mod risk_aversion;
pub mod sources;
pub mod stats;
pub mod storage;
pub mod universe;

pub mod config {
    use anyhow::Context;
    use std::path::PathBuf;

    use crate::sources::blob::BlobRef;

    const DEFAULT_SETTINGS_PATH: &str = "settings.json";
    const DEFAULT_VALID_USER_IDS: [&str; 3] = [
        "user-0000000000000001",
        "user-0000000000000501",
        "user-0000000000000999",
    ];

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub quotes_bucket: Option<String>,
        pub quotes_blob: Option<String>,
        pub predicted_irp_bucket: Option<String>,
        pub predicted_irp_blob: Option<String>,
        pub predicted_returns_bucket: Option<String>,
        pub predicted_returns_blob: Option<String>,
        pub blob_base_url: Option<String>,
        pub blob_auth_token: Option<String>,
        pub blob_root: Option<PathBuf>,
        pub settings_path: PathBuf,
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub valid_user_ids: Vec<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let valid_user_ids = match std::env::var("VALID_USER_IDS") {
                Ok(s) => s
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                Err(_) => DEFAULT_VALID_USER_IDS.iter().map(|s| s.to_string()).collect(),
            };

            Ok(Self {
                quotes_bucket: std::env::var("QUOTES_BUCKET").ok(),
                quotes_blob: std::env::var("QUOTES_BLOB").ok(),
                predicted_irp_bucket: std::env::var("PREDICTED_IRP_BUCKET").ok(),
                predicted_irp_blob: std::env::var("PREDICTED_IRP_BLOB").ok(),
                predicted_returns_bucket: std::env::var("PREDICTED_RETURNS_BUCKET").ok(),
                predicted_returns_blob: std::env::var("PREDICTED_RETURNS_BLOB").ok(),
                blob_base_url: std::env::var("BLOB_BASE_URL").ok(),
                blob_auth_token: std::env::var("BLOB_AUTH_TOKEN").ok(),
                blob_root: std::env::var("BLOB_ROOT").ok().map(PathBuf::from),
                settings_path: std::env::var("SETTINGS_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_SETTINGS_PATH)),
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                valid_user_ids,
            })
        }

        pub fn require_quotes_blob(&self) -> anyhow::Result<BlobRef> {
            let bucket = self
                .quotes_bucket
                .as_deref()
                .context("QUOTES_BUCKET is required")?;
            let name = self
                .quotes_blob
                .as_deref()
                .context("QUOTES_BLOB is required")?;
            Ok(BlobRef::new(bucket, name))
        }

        /// Optional: without it every recommendation falls back to the default risk aversion.
        pub fn predicted_irp_blob(&self) -> Option<BlobRef> {
            Some(BlobRef::new(
                self.predicted_irp_bucket.as_deref()?,
                self.predicted_irp_blob.as_deref()?,
            ))
        }

        /// Optional: without it expected returns come from historical compounding.
        pub fn predicted_returns_blob(&self) -> Option<BlobRef> {
            Some(BlobRef::new(
                self.predicted_returns_bucket.as_deref()?,
                self.predicted_returns_blob.as_deref()?,
            ))
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn is_valid_user(&self, user_id: &str) -> bool {
            self.valid_user_ids.iter().any(|u| u == user_id)
        }
    }

    /// Numeric knobs of the pipeline.
    #[derive(Debug, Clone, PartialEq)]
    pub struct EngineOptions {
        /// Trailing window (in rows) of periodic returns.
        pub return_window: usize,
        pub periods_per_year: u32,
        pub risk_aversion_min: f64,
        pub risk_aversion_max: f64,
        /// Raw coefficient used when no prediction exists for a user. Not rescaled.
        pub default_risk_aversion: f64,
        pub risk_free_rate: f64,
        /// When set, weights below this are zeroed and the rest renormalised.
        pub weight_cutoff: Option<f64>,
    }

    impl Default for EngineOptions {
        fn default() -> Self {
            Self {
                return_window: 20,
                periods_per_year: 12,
                risk_aversion_min: 5.0,
                risk_aversion_max: 15.0,
                default_risk_aversion: 10.0,
                risk_free_rate: 0.025,
                weight_cutoff: None,
            }
        }
    }

    impl EngineOptions {
        pub fn from_env() -> anyhow::Result<Self> {
            let mut out = Self::default();

            if let Some(n) = env_parse::<usize>("RETURN_WINDOW")? {
                out.return_window = n;
            }
            if let Some(n) = env_parse::<u32>("PERIODS_PER_YEAR")? {
                out.periods_per_year = n;
            }
            if let Some(v) = env_parse::<f64>("RISK_AVERSION_MIN")? {
                out.risk_aversion_min = v;
            }
            if let Some(v) = env_parse::<f64>("RISK_AVERSION_MAX")? {
                out.risk_aversion_max = v;
            }
            if let Some(v) = env_parse::<f64>("DEFAULT_RISK_AVERSION")? {
                out.default_risk_aversion = v;
            }
            if let Some(v) = env_parse::<f64>("RISK_FREE_RATE")? {
                out.risk_free_rate = v;
            }
            if let Some(v) = env_parse::<f64>("WEIGHT_CUTOFF")? {
                out.weight_cutoff = Some(v);
            }

            out.validate()?;
            Ok(out)
        }

        pub fn validate(&self) -> anyhow::Result<()> {
            anyhow::ensure!(self.return_window >= 1, "RETURN_WINDOW must be >= 1");
            anyhow::ensure!(self.periods_per_year >= 1, "PERIODS_PER_YEAR must be >= 1");
            anyhow::ensure!(
                self.risk_aversion_min.is_finite()
                    && self.risk_aversion_max.is_finite()
                    && self.risk_aversion_min < self.risk_aversion_max,
                "risk aversion range must satisfy min < max (got {}..{})",
                self.risk_aversion_min,
                self.risk_aversion_max
            );
            anyhow::ensure!(
                self.default_risk_aversion.is_finite() && self.default_risk_aversion > 0.0,
                "DEFAULT_RISK_AVERSION must be positive"
            );
            anyhow::ensure!(
                self.risk_free_rate.is_finite(),
                "RISK_FREE_RATE must be finite"
            );
            if let Some(cutoff) = self.weight_cutoff {
                anyhow::ensure!(
                    (0.0..1.0).contains(&cutoff),
                    "WEIGHT_CUTOFF must be in [0, 1) (got {cutoff})"
                );
            }
            Ok(())
        }
    }

    fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match std::env::var(key) {
            Ok(s) if !s.trim().is_empty() => s
                .trim()
                .parse::<T>()
                .map(Some)
                .with_context(|| format!("{key} is not valid: {s:?}")),
            _ => Ok(None),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn default_options_are_valid() {
            let o = EngineOptions::default();
            assert!(o.validate().is_ok());
            assert_eq!(o.return_window, 20);
            assert_eq!(o.periods_per_year, 12);
        }

        #[test]
        fn inverted_risk_range_is_rejected() {
            let o = EngineOptions {
                risk_aversion_min: 15.0,
                risk_aversion_max: 5.0,
                ..EngineOptions::default()
            };
            assert!(o.validate().is_err());
        }
    }
}
