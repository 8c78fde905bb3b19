//! # sr-optimizer
//!
//! Numeric core of SymRefine.
//!
//! Turns raw candidate expressions into something that can be evaluated and
//! optimized: algebraic simplification with a timeout, replacement of
//! degenerate symbols, compilation into a differentiable program, L-BFGS
//! coefficient fine-tuning and the ledger that shares an iteration budget
//! across candidates.

mod budget;
mod compile;
mod deadline;
mod finetune;
mod lbfgs;
mod sanitize;
mod simplify;

pub use budget::{partition, BudgetLedger};
pub use compile::{compile, CompileOptions, CompiledExpr};
pub use deadline::Deadline;
pub use finetune::{
    finetune, free_constant_count, insert_parameters, lift_constants, FinetuneOutcome,
    FinetuneSettings, FinetuneStatus,
};
pub use lbfgs::{Lbfgs, LbfgsSettings, StepOutcome};
pub use sanitize::{sanitize, substitute, SanitizePolicy, PI_PLACEHOLDER};
pub use simplify::simplify;
