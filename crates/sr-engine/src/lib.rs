//! # sr-engine
//!
//! Refinement and selection layer of SymRefine.
//!
//! Takes raw candidate expressions from an external search, repairs and
//! fine-tunes them against the training data, and promotes one to a
//! [`FittedModel`] under an accuracy/complexity trade-off.

pub mod complexity;
pub mod impute;
pub mod model;
pub mod pipeline;
pub mod predict;
pub mod selection;

use std::sync::Arc;

use sr_types::{Dataset, Matrix, RefineConfig, SrResult};
use tracing::info;

pub use complexity::{complexity_by_name, compute_complexity};
pub use impute::{ColumnMeanImputer, ColumnMeans, Imputer, ImputerState};
pub use model::{FitSummary, FittedModel, ModelId};
pub use pipeline::{refine, Refinement};
pub use predict::{evaluate_expression, predict, predict_or_nan};
pub use selection::{composite_scores, select, select_candidate};

/// Symbolic-regression refiner: configuration plus the imputation strategy.
#[derive(Debug, Clone)]
pub struct SymbolicRefiner {
    config: RefineConfig,
    imputer: Arc<dyn Imputer>,
}

impl SymbolicRefiner {
    /// Validates `config`; this is the only place configuration errors arise.
    pub fn new(config: RefineConfig) -> SrResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            imputer: Arc::new(ColumnMeanImputer),
        })
    }

    pub fn with_imputer(mut self, imputer: Arc<dyn Imputer>) -> Self {
        self.imputer = imputer;
        self
    }

    pub fn config(&self) -> &RefineConfig {
        &self.config
    }

    /// Refines `raw_expressions` against `(x, y)` and returns the winner.
    ///
    /// Always yields a model for well-formed data, possibly the constant
    /// mean predictor.
    pub fn fit<S: AsRef<str>>(
        &self,
        raw_expressions: &[S],
        x: &Matrix,
        y: &[f64],
    ) -> SrResult<FittedModel> {
        info!(
            "Refining {} candidate expressions on {} rows x {} features",
            raw_expressions.len(),
            x.rows(),
            x.cols()
        );

        let (imputer, features) = if x.has_missing() {
            info!("Imputing missing feature values");
            let (state, imputed) = self.imputer.impute(x)?;
            (Some(state), imputed)
        } else {
            (None, x.clone())
        };
        let data = Dataset::new(features, y.to_vec())?;

        let Refinement {
            mut candidates,
            selected,
            summary,
        } = refine(raw_expressions, &data, &self.config)?;
        let winner = candidates.swap_remove(selected);

        let model = FittedModel::from_candidate(winner, summary)
            .with_division_placeholder(self.config.division_placeholder)
            .with_imputer(imputer);
        info!(
            "Fitted model {}: {} (training error {:.6e})",
            model.id, model.expr, model.training_error
        );
        Ok(model)
    }

    pub fn predict(&self, model: &FittedModel, x: &Matrix) -> SrResult<Vec<f64>> {
        predict(model, x)
    }

    pub fn predict_or_nan(&self, model: &FittedModel, x: &Matrix) -> Vec<f64> {
        predict_or_nan(model, x)
    }

    /// Structural size of the fitted expression under the configured metric.
    pub fn complexity(&self, model: &FittedModel) -> usize {
        compute_complexity(&model.expr, self.config.complexity_metric)
    }
}
