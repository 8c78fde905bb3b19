//! The fitted model handed back to callers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sr_types::{Candidate, CandidateStatus, Expr, RefineConfig};
use uuid::Uuid;

use crate::impute::ImputerState;

pub type ModelId = Uuid;

/// What happened to the candidate pool during one fit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitSummary {
    pub raw_candidates: usize,
    pub parsed: usize,
    pub sanitized: usize,
    pub finetuned: usize,
    /// Candidates replaced by the target mean after invalid predictions.
    pub degraded: usize,
    /// Candidates removed by parse, sanitization or compilation failures.
    pub dropped: usize,
    /// Optimizer iterations spent across all candidates.
    pub finetune_steps: usize,
    /// Input position of the winner; `None` when every candidate was lost
    /// and the mean predictor was synthesized.
    pub selected_index: Option<usize>,
}

/// The single expression promoted by a fit. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedModel {
    pub id: ModelId,
    pub expr: Expr,
    pub training_error: f64,
    pub complexity: usize,
    pub status: CandidateStatus,
    pub fitted_at: DateTime<Utc>,
    pub summary: FitSummary,
    /// Result of a division by zero when the model is evaluated.
    pub division_placeholder: f64,
    /// Imputation learned at fit time, replayed on prediction inputs.
    #[serde(skip)]
    pub imputer: Option<Arc<dyn ImputerState>>,
}

impl FittedModel {
    pub fn from_candidate(candidate: Candidate, summary: FitSummary) -> Self {
        Self {
            id: Uuid::new_v4(),
            training_error: candidate.error.unwrap_or(f64::NAN),
            complexity: candidate
                .complexity
                .unwrap_or_else(|| candidate.expr.node_count()),
            expr: candidate.expr,
            status: candidate.status,
            fitted_at: Utc::now(),
            summary,
            division_placeholder: RefineConfig::default().division_placeholder,
            imputer: None,
        }
    }

    pub fn with_division_placeholder(mut self, placeholder: f64) -> Self {
        self.division_placeholder = placeholder;
        self
    }

    pub fn with_imputer(mut self, imputer: Option<Arc<dyn ImputerState>>) -> Self {
        self.imputer = imputer;
        self
    }

    /// The literal value if the model degenerated to a constant.
    pub fn constant_value(&self) -> Option<f64> {
        self.expr.constant_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sr_types::parse;

    #[test]
    fn model_from_scored_candidate() {
        let mut candidate = Candidate::new(2, parse("2.0*x_0").unwrap());
        candidate.set_scores(0.5, 3);
        let summary = FitSummary {
            raw_candidates: 3,
            selected_index: Some(2),
            ..FitSummary::default()
        };
        let model = FittedModel::from_candidate(candidate, summary);

        assert_eq!(model.training_error, 0.5);
        assert_eq!(model.complexity, 3);
        assert_eq!(model.status, CandidateStatus::Untouched);
        assert_eq!(model.summary.selected_index, Some(2));
        assert!(model.imputer.is_none());
        assert_eq!(model.constant_value(), None);
    }

    #[test]
    fn serializes_without_imputer() {
        let mut candidate = Candidate::constant(0, 3.5);
        candidate.set_scores(1.25, 1);
        let model = FittedModel::from_candidate(candidate, FitSummary::default());
        let json = serde_json::to_string(&model).unwrap();
        let back: FittedModel = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, model.id);
        assert_eq!(back.expr, model.expr);
        assert_eq!(back.constant_value(), Some(3.5));
    }
}
