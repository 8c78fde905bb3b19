//! Candidate refinement: parse, sanitize, fine-tune, score and select.
//!
//! Every recoverable failure is handled here. A candidate that cannot be
//! parsed, sanitized or compiled is dropped; one whose predictions are not
//! finite is replaced by the target mean; an empty pool gets the mean
//! predictor. Only configuration errors leave this module.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use sr_optimizer::{
    finetune, free_constant_count, partition, sanitize, BudgetLedger, CompileOptions,
    FinetuneOutcome, FinetuneSettings, SanitizePolicy,
};
use sr_types::{
    parse, Candidate, CandidateStatus, Dataset, Expr, RefineConfig, SrError, SrResult,
};
use tracing::{debug, info, warn};

use crate::complexity::compute_complexity;
use crate::model::FitSummary;
use crate::predict::evaluate;
use crate::selection::select_candidate;

/// Result of refining one batch of raw expressions.
#[derive(Debug, Clone)]
pub struct Refinement {
    /// Surviving candidates in input order, each scored.
    pub candidates: Vec<Candidate>,
    /// Position of the winner in `candidates`.
    pub selected: usize,
    pub summary: FitSummary,
}

impl Refinement {
    pub fn winner(&self) -> &Candidate {
        &self.candidates[self.selected]
    }
}

/// A sanitized candidate together with its pre-fine-tuning form.
struct Working {
    candidate: Candidate,
    sanitized: Expr,
}

/// Generator for one candidate, independent of processing order.
fn candidate_rng(base_seed: u64, source_index: usize) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(base_seed.wrapping_add(source_index as u64));
    rng.set_stream(1);
    rng
}

fn apply_outcome(candidate: &mut Candidate, outcome: FinetuneOutcome) {
    if outcome.is_tuned() {
        candidate.mark_finetuned(outcome.expr, outcome.steps_used);
    } else {
        candidate.record_attempt(outcome.steps_used);
    }
}

/// Runs the whole refinement pipeline over `raw`.
pub fn refine<S: AsRef<str>>(
    raw: &[S],
    data: &Dataset,
    config: &RefineConfig,
) -> SrResult<Refinement> {
    config.validate()?;
    let mut summary = FitSummary {
        raw_candidates: raw.len(),
        ..FitSummary::default()
    };
    let base_seed = config.random_state.unwrap_or_else(rand::random);

    let mut pool = sanitize_all(raw, config, &mut summary);

    if config.finetune {
        if data.n_rows() > config.max_finetune_rows {
            warn!(
                "skipping fine-tuning: {} rows exceeds the limit of {}",
                data.n_rows(),
                config.max_finetune_rows
            );
        } else {
            finetune_all(&mut pool, data, config, base_seed);
            summary.finetuned = pool
                .iter()
                .filter(|w| w.candidate.status == CandidateStatus::FineTuned)
                .count();
            summary.finetune_steps = pool.iter().map(|w| w.candidate.finetune_steps).sum();
        }
    }

    let mut candidates = score_all(pool, data, config, &mut summary)?;
    if candidates.is_empty() {
        warn!("{}; falling back to the mean predictor", SrError::EmptyCandidatePool);
        let mut mean = Candidate::constant(raw.len(), data.target_mean());
        let error = data.mse(&vec![data.target_mean(); data.n_rows()]);
        mean.set_scores(error, compute_complexity(&mean.expr, config.complexity_metric));
        candidates.push(mean);
    }

    let selected = select_candidate(&candidates, config.selection_criterion())?;
    let winner = &candidates[selected];
    summary.selected_index = (winner.source_index < raw.len()).then_some(winner.source_index);
    info!(
        "selected {} (error {:.6e}, complexity {}) from {} candidates",
        winner.expr,
        winner.error.unwrap_or(f64::NAN),
        winner.complexity.unwrap_or(0),
        candidates.len()
    );

    Ok(Refinement {
        candidates,
        selected,
        summary,
    })
}

fn sanitize_all<S: AsRef<str>>(
    raw: &[S],
    config: &RefineConfig,
    summary: &mut FitSummary,
) -> Vec<Working> {
    let policy = SanitizePolicy::from(config);
    let mut pool = Vec::with_capacity(raw.len());
    for (index, text) in raw.iter().enumerate() {
        let parsed = match parse(text.as_ref()) {
            Ok(expr) => expr,
            Err(e) => {
                warn!("dropping candidate {} ({:?}): {}", index, text.as_ref(), e);
                summary.dropped += 1;
                continue;
            }
        };
        summary.parsed += 1;

        match sanitize(&parsed, &policy) {
            Ok(sanitized) => {
                debug!("candidate {}: {} -> {}", index, parsed, sanitized);
                summary.sanitized += 1;
                pool.push(Working {
                    candidate: Candidate::new(index, sanitized.clone()),
                    sanitized,
                });
            }
            Err(e) => {
                warn!("dropping candidate {}: {}", index, e);
                summary.dropped += 1;
            }
        }
    }
    pool
}

fn finetune_all(pool: &mut [Working], data: &Dataset, config: &RefineConfig, base_seed: u64) {
    let settings = FinetuneSettings::from(config);
    let mut ledger_rng = ChaCha8Rng::seed_from_u64(base_seed);
    let counts: Vec<usize> = pool
        .iter()
        .map(|w| free_constant_count(&w.candidate.expr))
        .collect();

    if config.parallel {
        let budgets = match config.finetune_max_evals {
            Some(total) => partition(total, &counts, &mut ledger_rng),
            None => vec![config.finetune_steps; pool.len()],
        };
        debug!("fine-tuning {} candidates in parallel, budgets {:?}", pool.len(), budgets);
        pool.par_iter_mut()
            .zip(budgets.par_iter())
            .for_each(|(working, &budget)| {
                let mut rng = candidate_rng(base_seed, working.candidate.source_index);
                let outcome = finetune(&working.sanitized, data, budget, &settings, &mut rng);
                apply_outcome(&mut working.candidate, outcome);
            });
        return;
    }

    let mut ledger = config
        .finetune_max_evals
        .map(|total| BudgetLedger::proportional(total, &counts, &mut ledger_rng));
    if let Some(ledger) = &ledger {
        debug!(
            "initial fine-tuning budgets {:?} of {}",
            ledger.allotted(),
            ledger.total()
        );
    }

    for (i, working) in pool.iter_mut().enumerate() {
        let budget = match &ledger {
            Some(ledger) => ledger.allotment(i),
            None => config.finetune_steps,
        };
        let mut rng = candidate_rng(base_seed, working.candidate.source_index);
        let outcome = finetune(&working.sanitized, data, budget, &settings, &mut rng);
        debug!(
            "candidate {}: {:?} after {}/{} steps",
            working.candidate.source_index, outcome.status, outcome.steps_used, budget
        );
        if let Some(ledger) = ledger.as_mut() {
            ledger.settle(i, outcome.steps_used, &mut ledger_rng);
        }
        apply_outcome(&mut working.candidate, outcome);
    }
}

fn score_all(
    pool: Vec<Working>,
    data: &Dataset,
    config: &RefineConfig,
    summary: &mut FitSummary,
) -> SrResult<Vec<Candidate>> {
    let options = CompileOptions::from_config(config, data.n_features());
    let mean = data.target_mean();
    let mut scored = Vec::with_capacity(pool.len());

    for Working {
        mut candidate,
        sanitized,
    } in pool
    {
        let predictions = match evaluate(&candidate.expr, data.features(), &options) {
            Err(SrError::Timeout { limit_ms, .. }) if candidate.expr != sanitized => {
                warn!(
                    "candidate {}: compilation exceeded {} ms; using its pre-fine-tuning form",
                    candidate.source_index, limit_ms
                );
                candidate.expr = sanitized.clone();
                candidate.status = CandidateStatus::Untouched;
                evaluate(&sanitized, data.features(), &options)
            }
            other => other,
        };

        let error = match predictions {
            Ok(predictions) if predictions.iter().all(|p| p.is_finite()) => data.mse(&predictions),
            Ok(_) => {
                warn!(
                    "candidate {} predicts invalid values; replacing it with the target mean",
                    candidate.source_index
                );
                candidate.degrade_to_constant(mean);
                summary.degraded += 1;
                data.mse(&vec![mean; data.n_rows()])
            }
            Err(e) if !e.is_recoverable() => return Err(e),
            Err(e) => {
                warn!("dropping candidate {}: {}", candidate.source_index, e);
                summary.dropped += 1;
                continue;
            }
        };

        let complexity = compute_complexity(&candidate.expr, config.complexity_metric);
        candidate.set_scores(error, complexity);
        scored.push(candidate);
    }
    Ok(scored)
}
