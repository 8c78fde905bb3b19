//! Refinement configuration.
//!
//! Every option the pipeline recognizes is a named field with a default.
//! Unknown keys and unsupported values are rejected when the record is built,
//! never later in the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config_error;
use crate::errors::{SrError, SrResult};

/// How structural simplicity is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityMetric {
    /// Total number of nodes in the expression tree.
    #[default]
    NodeCount,
}

impl ComplexityMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityMetric::NodeCount => "node_count",
        }
    }
}

impl FromStr for ComplexityMetric {
    type Err = SrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node_count" => Ok(ComplexityMetric::NodeCount),
            other => Err(config_error!("unrecognized complexity metric '{}'", other)),
        }
    }
}

impl fmt::Display for ComplexityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rule used to promote one candidate to the final model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionCriterion {
    /// Lowest training error wins.
    MinError,
    /// Weighted accuracy/simplicity trade-off; `rci = 1` is pure simplicity.
    Weighted { rci: f64 },
}

/// Top-level configuration for one fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefineConfig {
    /// Complexity weight in `[0, 1]`; `None` selects purely by error.
    pub rci: Option<f64>,

    /// Whether to fine-tune coefficients after sanitization.
    pub finetune: bool,

    /// Total optimizer iterations shared by all candidates.
    pub finetune_max_evals: Option<usize>,

    /// Per-candidate iterations when no shared budget is configured.
    pub finetune_steps: usize,

    pub complexity_metric: ComplexityMetric,

    pub simplify_timeout_ms: u64,
    pub compile_timeout_ms: u64,
    pub finetune_timeout_ms: u64,

    /// L-BFGS step size.
    pub learning_rate: f64,
    /// Stop when consecutive losses differ by less than this.
    pub tolerance_change: f64,
    /// Stop when the largest gradient component is at most this.
    pub tolerance_grad: f64,
    /// Number of curvature pairs kept by L-BFGS.
    pub history_size: usize,

    /// Magnitude of the offsets that separate duplicated constants.
    pub perturbation_scale: f64,

    /// Fine-tuning is skipped on datasets with more rows than this.
    pub max_finetune_rows: usize,

    /// Value substituted for degenerate constructs (infinities, complex
    /// results, undefined forms, relations, oscillation bounds).
    pub degenerate_placeholder: f64,

    /// Result of a division whose divisor is exactly zero.
    pub division_placeholder: f64,

    /// Refine candidates on the rayon pool.
    pub parallel: bool,

    pub random_state: Option<u64>,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            rci: None,
            finetune: false,
            finetune_max_evals: None,
            finetune_steps: 100,
            complexity_metric: ComplexityMetric::NodeCount,
            simplify_timeout_ms: 5_000,
            compile_timeout_ms: 5_000,
            finetune_timeout_ms: 10_000,
            learning_rate: 1.0,
            tolerance_change: 1e-9,
            tolerance_grad: 1e-9,
            history_size: 100,
            perturbation_scale: 1e-5,
            max_finetune_rows: 10_000,
            degenerate_placeholder: 1.0,
            division_placeholder: 1.0,
            parallel: false,
            random_state: None,
        }
    }
}

impl RefineConfig {
    /// Builds a validated configuration from loosely typed key/value options.
    pub fn from_options<I>(options: I) -> SrResult<Self>
    where
        I: IntoIterator<Item = (String, serde_json::Value)>,
    {
        let map: serde_json::Map<String, serde_json::Value> = options.into_iter().collect();
        let config: RefineConfig = serde_json::from_value(serde_json::Value::Object(map))
            .map_err(|e| config_error!("{}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> SrResult<Self> {
        let config: RefineConfig =
            serde_json::from_str(json).map_err(|e| config_error!("{}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_rci(mut self, rci: f64) -> Self {
        self.rci = Some(rci);
        self
    }

    pub fn with_finetune(mut self, max_evals: Option<usize>) -> Self {
        self.finetune = true;
        self.finetune_max_evals = max_evals;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn validate(&self) -> SrResult<()> {
        if let Some(rci) = self.rci {
            if !rci.is_finite() || !(0.0..=1.0).contains(&rci) {
                return Err(config_error!("rci must lie in [0, 1], got {}", rci));
            }
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(config_error!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            ));
        }
        for (name, value) in [
            ("tolerance_change", self.tolerance_change),
            ("tolerance_grad", self.tolerance_grad),
            ("perturbation_scale", self.perturbation_scale),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(config_error!("{} must be non-negative, got {}", name, value));
            }
        }
        for (name, value) in [
            ("degenerate_placeholder", self.degenerate_placeholder),
            ("division_placeholder", self.division_placeholder),
        ] {
            if !value.is_finite() {
                return Err(config_error!("{} must be finite, got {}", name, value));
            }
        }
        if self.history_size == 0 {
            return Err(config_error!("history_size must be at least 1"));
        }
        Ok(())
    }

    /// Decided once per fit so stages never re-inspect `rci`.
    pub fn selection_criterion(&self) -> SelectionCriterion {
        match self.rci {
            Some(rci) => SelectionCriterion::Weighted { rci },
            None => SelectionCriterion::MinError,
        }
    }

    pub fn simplify_timeout(&self) -> Duration {
        Duration::from_millis(self.simplify_timeout_ms)
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_millis(self.compile_timeout_ms)
    }

    pub fn finetune_timeout(&self) -> Duration {
        Duration::from_millis(self.finetune_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(pairs: &[(&str, serde_json::Value)]) -> Vec<(String, serde_json::Value)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn defaults_are_valid() {
        let config = RefineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.selection_criterion(), SelectionCriterion::MinError);
        assert_eq!(config.complexity_metric, ComplexityMetric::NodeCount);
        assert!(!config.finetune);
    }

    #[test]
    fn from_options_reads_recognized_keys() {
        let config = RefineConfig::from_options(options(&[
            ("rci", json!(0.1)),
            ("finetune", json!(true)),
            ("finetune_max_evals", json!(10_000)),
            ("complexity_metric", json!("node_count")),
        ]))
        .unwrap();

        assert_eq!(config.selection_criterion(), SelectionCriterion::Weighted { rci: 0.1 });
        assert!(config.finetune);
        assert_eq!(config.finetune_max_evals, Some(10_000));
        // untouched options keep their defaults
        assert_eq!(config.finetune_steps, 100);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = RefineConfig::from_options(options(&[("finetune_max_eval", json!(5))])).unwrap_err();
        assert!(matches!(err, SrError::Config(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn unknown_metric_is_a_configuration_error() {
        let err = RefineConfig::from_options(options(&[("complexity_metric", json!("depth"))]))
            .unwrap_err();
        assert!(matches!(err, SrError::Config(_)));

        assert!("component_count".parse::<ComplexityMetric>().is_err());
        assert_eq!("node_count".parse::<ComplexityMetric>().unwrap(), ComplexityMetric::NodeCount);
    }

    #[test]
    fn rci_out_of_range_is_rejected() {
        assert!(RefineConfig::default().with_rci(1.5).validate().is_err());
        assert!(RefineConfig::default().with_rci(-0.1).validate().is_err());
        assert!(RefineConfig::default().with_rci(f64::NAN).validate().is_err());
        assert!(RefineConfig::from_json(r#"{"rci": 2.0}"#).is_err());
        assert!(RefineConfig::from_json(r#"{"rci": 1.0}"#).is_ok());
    }

    #[test]
    fn builder_chain() {
        let config = RefineConfig::default()
            .with_rci(0.05)
            .with_finetune(Some(500))
            .with_parallel(true)
            .with_random_state(42);
        assert!(config.finetune);
        assert_eq!(config.finetune_max_evals, Some(500));
        assert!(config.parallel);
        assert_eq!(config.random_state, Some(42));
        assert_eq!(config.simplify_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn json_round_trip() {
        let config = RefineConfig::default().with_rci(0.3).with_random_state(7);
        let json = serde_json::to_string(&config).unwrap();
        let back = RefineConfig::from_json(&json).unwrap();
        assert_eq!(config, back);
    }
}
