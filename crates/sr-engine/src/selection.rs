//! Promoting one candidate to the final model.
//!
//! Without a complexity weight the lowest training error wins. With a weight
//! `rci` each candidate scores
//! `(1 - rci) * (1 - norm_error) + rci * (1 - norm_complexity)`, where both
//! axes are min-max normalized over the pool. Ties always go to the earliest
//! candidate.

use sr_types::{config_error, internal_error, Candidate, SelectionCriterion, SrError, SrResult};

/// Gap placed between the worst finite error and any invalid one.
const INVALID_ERROR_GAP: f64 = 1e-6;

/// Replaces non-finite errors with a value just above the worst finite one.
pub fn fill_invalid_errors(errors: &[f64]) -> Vec<f64> {
    let worst = errors
        .iter()
        .copied()
        .filter(|e| e.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    let fill = if worst.is_finite() { worst + INVALID_ERROR_GAP } else { 0.0 };
    errors
        .iter()
        .map(|&e| if e.is_finite() { e } else { fill })
        .collect()
}

/// Min-max scaling to `[0, 1]`; a zero range maps everything to 0.
fn normalize(values: &[f64]) -> Vec<f64> {
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = hi - lo;
    values
        .iter()
        .map(|&v| if range > 0.0 { (v - lo) / range } else { 0.0 })
        .collect()
}

/// Composite score of every candidate; higher is better.
pub fn composite_scores(errors: &[f64], complexities: &[usize], rci: f64) -> Vec<f64> {
    let errors = normalize(&fill_invalid_errors(errors));
    let complexities: Vec<f64> = complexities.iter().map(|&c| c as f64).collect();
    let complexities = normalize(&complexities);
    errors
        .iter()
        .zip(&complexities)
        .map(|(e, c)| (1.0 - rci) * (1.0 - e) + rci * (1.0 - c))
        .collect()
}

/// Index of the winning candidate.
pub fn select(
    errors: &[f64],
    complexities: &[usize],
    criterion: SelectionCriterion,
) -> SrResult<usize> {
    if errors.len() != complexities.len() {
        return Err(config_error!(
            "{} errors but {} complexities",
            errors.len(),
            complexities.len()
        ));
    }
    if errors.is_empty() {
        return Err(SrError::EmptyCandidatePool);
    }
    if let SelectionCriterion::Weighted { rci } = criterion {
        if !(0.0..=1.0).contains(&rci) {
            return Err(config_error!("rci must lie in [0, 1], got {}", rci));
        }
    }
    if errors.len() == 1 {
        return Ok(0);
    }

    let best = match criterion {
        SelectionCriterion::MinError => {
            let errors = fill_invalid_errors(errors);
            first_best(&errors, |candidate, best| candidate < best)
        }
        SelectionCriterion::Weighted { rci } => {
            let scores = composite_scores(errors, complexities, rci);
            first_best(&scores, |candidate, best| candidate > best)
        }
    };
    Ok(best)
}

/// First index whose value beats every earlier one under `better`.
fn first_best(values: &[f64], better: impl Fn(f64, f64) -> bool) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if better(v, values[best]) {
            best = i;
        }
    }
    best
}

/// [`select`] over scored candidates.
pub fn select_candidate(candidates: &[Candidate], criterion: SelectionCriterion) -> SrResult<usize> {
    let mut errors = Vec::with_capacity(candidates.len());
    let mut complexities = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match (candidate.error, candidate.complexity) {
            (Some(e), Some(c)) => {
                errors.push(e);
                complexities.push(c);
            }
            _ => {
                return Err(internal_error!(
                    "candidate {} reached selection unscored",
                    candidate.source_index
                ))
            }
        }
    }
    select(&errors, &complexities, criterion)
}
