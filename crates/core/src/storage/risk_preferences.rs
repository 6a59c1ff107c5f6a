use crate::error::{EngineError, EngineResult};
use crate::sources::{Lookup, RiskPreferenceSource};
use chrono::{DateTime, Utc};

/// Predicted preferences written by the risk-profiling model into `predicted_risk_preferences`.
#[derive(Clone)]
pub struct PgRiskPreferenceSource {
    pool: sqlx::PgPool,
}

impl PgRiskPreferenceSource {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RiskPreferenceSource for PgRiskPreferenceSource {
    fn source_name(&self) -> &'static str {
        "postgres"
    }

    async fn latest_prediction(&self, user_id: &str) -> EngineResult<Lookup<f64>> {
        let row = sqlx::query_as::<_, (f64, DateTime<Utc>)>(
            "SELECT predicted_risk, predicted_at FROM predicted_risk_preferences \
             WHERE client_id = $1 \
             ORDER BY predicted_at DESC, id DESC \
             LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            EngineError::unavailable(
                "postgres",
                format!("select predicted_risk_preferences failed: {e}"),
            )
        })?;

        Ok(match row {
            Some((predicted, predicted_at)) => {
                tracing::debug!(user_id, predicted, %predicted_at, "loaded predicted risk preference");
                Lookup::Found(predicted)
            }
            None => Lookup::NotFound,
        })
    }
}
