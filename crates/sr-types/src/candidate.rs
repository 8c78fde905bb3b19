use serde::{Deserialize, Serialize};

use crate::expr::Expr;

/// How far a candidate got through refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateStatus {
    Untouched,
    FineTuned,
    /// Replaced by the training-target mean after producing invalid values.
    DegradedToConstant,
}

/// One expression under consideration plus its derived metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Position of the raw expression this candidate came from.
    pub source_index: usize,
    pub expr: Expr,
    pub status: CandidateStatus,
    /// Optimizer iterations spent on this candidate.
    pub finetune_steps: usize,
    /// Training mean squared error.
    pub error: Option<f64>,
    pub complexity: Option<usize>,
}

impl Candidate {
    pub fn new(source_index: usize, expr: Expr) -> Self {
        Self {
            source_index,
            expr,
            status: CandidateStatus::Untouched,
            finetune_steps: 0,
            error: None,
            complexity: None,
        }
    }

    /// Constant predictor, used as the floor of every candidate pool.
    pub fn constant(source_index: usize, value: f64) -> Self {
        Self {
            status: CandidateStatus::DegradedToConstant,
            ..Self::new(source_index, Expr::constant(value))
        }
    }

    pub fn mark_finetuned(&mut self, expr: Expr, steps: usize) {
        self.expr = expr;
        self.finetune_steps = steps;
        self.status = CandidateStatus::FineTuned;
    }

    /// Records steps spent on a fine-tuning attempt that kept the expression.
    pub fn record_attempt(&mut self, steps: usize) {
        self.finetune_steps = steps;
    }

    pub fn degrade_to_constant(&mut self, value: f64) {
        self.expr = Expr::constant(value);
        self.status = CandidateStatus::DegradedToConstant;
    }

    pub fn set_scores(&mut self, error: f64, complexity: usize) {
        self.error = Some(error);
        self.complexity = Some(complexity);
    }
}
