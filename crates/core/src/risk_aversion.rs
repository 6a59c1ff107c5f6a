use crate::config::EngineOptions;
use crate::error::{EngineError, EngineResult};
use crate::sources::{Lookup, RiskPreferenceSource};

/// Linear map between the normalised [0, 1] preference and the optimizer's coefficient range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskAversionScale {
    pub min: f64,
    pub max: f64,
}

impl Default for RiskAversionScale {
    fn default() -> Self {
        Self {
            min: 5.0,
            max: 15.0,
        }
    }
}

impl RiskAversionScale {
    pub fn new(min: f64, max: f64) -> EngineResult<Self> {
        if !(min.is_finite() && max.is_finite() && min < max) {
            return Err(EngineError::Validation(format!(
                "risk aversion range must satisfy min < max (got {min}..{max})"
            )));
        }
        Ok(Self { min, max })
    }

    pub fn scale(&self, value: f64) -> f64 {
        value * (self.max - self.min) + self.min
    }

    pub fn unscale(&self, value: f64) -> f64 {
        (value - self.min) / (self.max - self.min)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskAversionOrigin {
    /// Scaled from the user's most recent predicted preference.
    Predicted,
    /// No prediction was available; the configured default applies unscaled.
    Default,
    /// Scaled from a preference supplied by the caller.
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedRiskAversion {
    pub coefficient: f64,
    pub origin: RiskAversionOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskAversionResolver {
    scale: RiskAversionScale,
    default_coefficient: f64,
}

impl RiskAversionResolver {
    pub fn new(scale: RiskAversionScale, default_coefficient: f64) -> Self {
        Self {
            scale,
            default_coefficient,
        }
    }

    pub fn from_options(options: &EngineOptions) -> EngineResult<Self> {
        let scale = RiskAversionScale::new(options.risk_aversion_min, options.risk_aversion_max)?;
        Ok(Self::new(scale, options.default_risk_aversion))
    }

    pub fn scale(&self) -> RiskAversionScale {
        self.scale
    }

    /// Caller-supplied preference in [0, 1]; larger means more averse.
    pub fn resolve_explicit(&self, preference: f64) -> EngineResult<ResolvedRiskAversion> {
        if !(0.0..=1.0).contains(&preference) {
            return Err(EngineError::Validation(format!(
                "risk preference must be within [0, 1] (got {preference})"
            )));
        }
        Ok(ResolvedRiskAversion {
            coefficient: self.scale.scale(preference),
            origin: RiskAversionOrigin::Explicit,
        })
    }

    /// Latest prediction for the user, or the default when the source has none.
    ///
    /// Predictions outside [0, 1] are clamped, so the coefficient stays within the scale range.
    ///
    /// An unreachable source is treated like a missing record: the request proceeds with the
    /// default coefficient.
    pub async fn resolve_for_user(
        &self,
        source: Option<&dyn RiskPreferenceSource>,
        user_id: &str,
    ) -> EngineResult<ResolvedRiskAversion> {
        let lookup = match source {
            Some(src) => match src.latest_prediction(user_id).await {
                Ok(lookup) => lookup,
                Err(err @ EngineError::DataUnavailable { .. }) => {
                    tracing::warn!(user_id, error = %err, "risk preference source unavailable");
                    Lookup::NotFound
                }
                Err(err) => return Err(err),
            },
            None => Lookup::NotFound,
        };

        let lookup = match lookup {
            Lookup::Found(predicted) if !predicted.is_finite() => {
                tracing::warn!(user_id, predicted, "predicted risk preference is not finite; ignoring it");
                Lookup::NotFound
            }
            Lookup::Found(predicted) if !(0.0..=1.0).contains(&predicted) => {
                let clamped = predicted.clamp(0.0, 1.0);
                tracing::warn!(user_id, predicted, clamped, "predicted risk preference outside [0, 1]; clamping");
                Lookup::Found(clamped)
            }
            other => other,
        };

        match lookup {
            Lookup::Found(predicted) => {
                let coefficient = self.scale.scale(predicted);
                tracing::debug!(user_id, predicted, coefficient, "resolved predicted risk aversion");
                Ok(ResolvedRiskAversion {
                    coefficient,
                    origin: RiskAversionOrigin::Predicted,
                })
            }
            Lookup::NotFound => {
                tracing::warn!(
                    user_id,
                    default = self.default_coefficient,
                    "no predicted risk preference; using default risk aversion"
                );
                Ok(ResolvedRiskAversion {
                    coefficient: self.default_coefficient,
                    origin: RiskAversionOrigin::Default,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Fixed(EngineResult<Lookup<f64>>);

    #[async_trait::async_trait]
    impl RiskPreferenceSource for Fixed {
        fn source_name(&self) -> &'static str {
            "fixed"
        }

        async fn latest_prediction(&self, _user_id: &str) -> EngineResult<Lookup<f64>> {
            match &self.0 {
                Ok(l) => Ok(l.clone()),
                Err(EngineError::DataUnavailable { detail, .. }) => {
                    Err(EngineError::unavailable("fixed", detail.clone()))
                }
                Err(EngineError::MalformedData { detail, .. }) => {
                    Err(EngineError::malformed("fixed", detail.clone()))
                }
                Err(e) => Err(EngineError::DimensionMismatch(e.to_string())),
            }
        }
    }

    fn resolver() -> RiskAversionResolver {
        RiskAversionResolver::from_options(&EngineOptions::default()).unwrap()
    }

    #[test]
    fn scale_round_trips() {
        let s = RiskAversionScale::default();
        for x in [0.0, 0.1, 0.25, 0.5, 0.77, 1.0] {
            assert_relative_eq!(s.unscale(s.scale(x)), x, epsilon = 1e-12);
        }
        assert_eq!(s.scale(0.0), 5.0);
        assert_eq!(s.scale(1.0), 15.0);
        assert_eq!(s.unscale(10.0), 0.5);
    }

    #[test]
    fn explicit_zero_maps_to_range_min() {
        let r = resolver().resolve_explicit(0.0).unwrap();
        assert_eq!(r.coefficient, 5.0);
        assert_eq!(r.origin, RiskAversionOrigin::Explicit);
        assert!(resolver().resolve_explicit(0.8).unwrap().coefficient > 12.0);
    }

    #[test]
    fn explicit_out_of_range_is_rejected() {
        for bad in [-0.01, 1.01, f64::NAN] {
            assert!(matches!(
                resolver().resolve_explicit(bad),
                Err(EngineError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn predicted_value_is_scaled() {
        let src = Fixed(Ok(Lookup::Found(0.3)));
        let r = resolver().resolve_for_user(Some(&src), "u").await.unwrap();
        assert_relative_eq!(r.coefficient, 8.0, epsilon = 1e-12);
        assert_eq!(r.origin, RiskAversionOrigin::Predicted);
    }

    #[tokio::test]
    async fn missing_prediction_uses_unscaled_default() {
        let src = Fixed(Ok(Lookup::NotFound));
        let r = resolver().resolve_for_user(Some(&src), "u").await.unwrap();
        assert_eq!(r.coefficient, 10.0);
        assert_eq!(r.origin, RiskAversionOrigin::Default);

        let r = resolver().resolve_for_user(None, "u").await.unwrap();
        assert_eq!(r.coefficient, 10.0);
    }

    #[tokio::test]
    async fn predictions_outside_unit_range_are_clamped() {
        let high = Fixed(Ok(Lookup::Found(1.3)));
        let r = resolver().resolve_for_user(Some(&high), "u").await.unwrap();
        assert_eq!(r.coefficient, 15.0);
        assert_eq!(r.origin, RiskAversionOrigin::Predicted);

        let low = Fixed(Ok(Lookup::Found(-0.5)));
        let r = resolver().resolve_for_user(Some(&low), "u").await.unwrap();
        assert_eq!(r.coefficient, 5.0);

        let nan = Fixed(Ok(Lookup::Found(f64::NAN)));
        let r = resolver().resolve_for_user(Some(&nan), "u").await.unwrap();
        assert_eq!(r.origin, RiskAversionOrigin::Default);
    }

    #[tokio::test]
    async fn unreachable_source_falls_back_but_other_errors_propagate() {
        let down = Fixed(Err(EngineError::unavailable("fixed", "timeout")));
        let r = resolver().resolve_for_user(Some(&down), "u").await.unwrap();
        assert_eq!(r.origin, RiskAversionOrigin::Default);

        let broken = Fixed(Err(EngineError::DimensionMismatch("x".into())));
        assert!(resolver().resolve_for_user(Some(&broken), "u").await.is_err());

        let malformed = Fixed(Err(EngineError::malformed("fixed", "bad predicted_risk")));
        assert!(matches!(
            resolver().resolve_for_user(Some(&malformed), "u").await,
            Err(EngineError::MalformedData { .. })
        ));
    }
}
