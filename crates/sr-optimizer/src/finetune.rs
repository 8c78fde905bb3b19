//! Gradient-based coefficient fine-tuning.
//!
//! Literal constants are lifted into free parameters, optimized with
//! [`Lbfgs`] against the training MSE and written back. Any failure along the
//! way returns the expression unchanged; fine-tuning never makes a candidate
//! worse on the training data.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use sr_types::{BinaryOp, Dataset, Expr, ExprBuilder, Node, NodeId, RefineConfig, Stage};
use tracing::debug;

use crate::compile::{compile, CompileOptions};
use crate::deadline::Deadline;
use crate::lbfgs::{Lbfgs, LbfgsSettings, StepOutcome};
use crate::sanitize::{sanitize, SanitizePolicy};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinetuneSettings {
    pub lbfgs: LbfgsSettings,
    /// Duplicated constants are spread over `±perturbation_scale`.
    pub perturbation_scale: f64,
    pub timeout: Duration,
    pub compile_timeout: Duration,
    pub division_placeholder: f64,
    pub sanitize: SanitizePolicy,
}

impl Default for FinetuneSettings {
    fn default() -> Self {
        Self::from(&RefineConfig::default())
    }
}

impl From<&RefineConfig> for FinetuneSettings {
    fn from(config: &RefineConfig) -> Self {
        Self {
            lbfgs: LbfgsSettings::from(config),
            perturbation_scale: config.perturbation_scale,
            timeout: config.finetune_timeout(),
            compile_timeout: config.compile_timeout(),
            division_placeholder: config.division_placeholder,
            sanitize: SanitizePolicy::from(config),
        }
    }
}

/// Why fine-tuning ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinetuneStatus {
    /// Coefficients were updated.
    Tuned,
    /// Nothing to optimize: no liftable constants or no input dependence.
    NoParameters,
    CompileFailed,
    /// Loss or gradient became non-finite mid-run.
    NumericFailure,
    /// The optimized expression was not better than the original.
    NotImproved,
}

#[derive(Debug, Clone)]
pub struct FinetuneOutcome {
    pub expr: Expr,
    /// Optimizer iterations consumed, including ones of a failed run.
    pub steps_used: usize,
    pub status: FinetuneStatus,
}

impl FinetuneOutcome {
    fn unchanged(expr: &Expr, steps_used: usize, status: FinetuneStatus) -> Self {
        Self {
            expr: expr.clone(),
            steps_used,
            status,
        }
    }

    pub fn is_tuned(&self) -> bool {
        self.status == FinetuneStatus::Tuned
    }
}

/// Walks the constants eligible for lifting in preorder. Integral exponents
/// stay literal so `x**2` keeps its shape.
fn visit_liftable<F>(expr: &Expr, id: NodeId, fixed: bool, f: &mut F)
where
    F: FnMut(NodeId, f64),
{
    match expr.node(id) {
        Node::Const(v) if !fixed && v.is_finite() => f(id, *v),
        Node::Binary(BinaryOp::Pow, base, exponent) => {
            visit_liftable(expr, *base, false, f);
            let integral = matches!(expr.node(*exponent), Node::Const(v) if v.fract() == 0.0);
            visit_liftable(expr, *exponent, integral, f);
        }
        node => {
            for child in node.children() {
                visit_liftable(expr, child, false, f);
            }
        }
    }
}

/// Number of constants [`lift_constants`] would turn into parameters.
pub fn free_constant_count(expr: &Expr) -> usize {
    let mut count = 0;
    visit_liftable(expr, expr.root(), false, &mut |_, _| count += 1);
    count
}

/// Replaces each liftable constant with a parameter `C_i`, numbered in
/// preorder, and returns the initial values. `expr` must not contain
/// parameters already.
///
/// Constants whose value occurs more than once get a small random offset so
/// the optimizer can move them independently.
pub fn lift_constants<R: Rng>(expr: &Expr, rng: &mut R, scale: f64) -> (Expr, Vec<f64>) {
    let mut liftable = Vec::new();
    visit_liftable(expr, expr.root(), false, &mut |id, v| liftable.push((id, v)));

    let mut occurrences: HashMap<u64, usize> = HashMap::new();
    for (_, v) in &liftable {
        *occurrences.entry(v.to_bits()).or_insert(0) += 1;
    }

    let mut params = HashMap::with_capacity(liftable.len());
    let mut values = Vec::with_capacity(liftable.len());
    for (id, v) in liftable {
        let duplicated = occurrences.get(&v.to_bits()).copied().unwrap_or(0) > 1;
        let offset = if duplicated && scale > 0.0 {
            rng.gen_range(-scale..=scale)
        } else {
            0.0
        };
        params.insert(id, values.len());
        values.push(v + offset);
    }

    let mut builder = ExprBuilder::new();
    let root = lift_node(expr, expr.root(), &params, &mut builder);
    (builder.finish(root), values)
}

fn lift_node(
    expr: &Expr,
    id: NodeId,
    params: &HashMap<NodeId, usize>,
    b: &mut ExprBuilder,
) -> NodeId {
    if let Some(index) = params.get(&id) {
        return b.param(*index);
    }
    let node = expr.node(id);
    let children: Vec<NodeId> = node
        .children()
        .into_iter()
        .map(|c| lift_node(expr, c, params, b))
        .collect();
    b.push(node.with_children(&children))
}

/// Writes parameter values back as literals.
pub fn insert_parameters(expr: &Expr, params: &[f64]) -> Expr {
    expr.rebuild(|b, node| match node {
        Node::Param(i) if i < params.len() => b.constant(params[i]),
        other => b.push(other),
    })
}

fn training_error(expr: &Expr, data: &Dataset, options: &CompileOptions) -> f64 {
    compile(expr, options)
        .and_then(|program| program.evaluate(data.features(), &[]))
        .map(|predictions| data.mse(&predictions))
        .unwrap_or(f64::NAN)
}

/// Optimizes the constants of `expr` for at most `max_steps` iterations.
pub fn finetune<R: Rng>(
    expr: &Expr,
    data: &Dataset,
    max_steps: usize,
    settings: &FinetuneSettings,
    rng: &mut R,
) -> FinetuneOutcome {
    if expr.variables().is_empty() {
        return FinetuneOutcome::unchanged(expr, 0, FinetuneStatus::NoParameters);
    }
    // lifted coefficients are numbered from C_0 and would alias these
    if expr.count_params() > 0 {
        debug!("not fine-tuning {}: it has unbound parameters", expr);
        return FinetuneOutcome::unchanged(expr, 0, FinetuneStatus::CompileFailed);
    }
    let (lifted, initial) = lift_constants(expr, rng, settings.perturbation_scale);
    if initial.is_empty() {
        return FinetuneOutcome::unchanged(expr, 0, FinetuneStatus::NoParameters);
    }

    let options = CompileOptions {
        n_features: data.n_features(),
        timeout: settings.compile_timeout,
        division_placeholder: settings.division_placeholder,
    };
    let program = match compile(&lifted, &options) {
        Ok(program) => program,
        Err(e) => {
            debug!("not fine-tuning {}: {}", expr, e);
            return FinetuneOutcome::unchanged(expr, 0, FinetuneStatus::CompileFailed);
        }
    };

    let deadline = Deadline::start(Stage::FineTune, settings.timeout);
    let mut optimizer = Lbfgs::new(settings.lbfgs);
    let mut params = initial;
    let mut best: Option<(f64, Vec<f64>)> = None;
    let mut prev_loss = f64::INFINITY;
    let mut steps = 0;

    while steps < max_steps {
        if deadline.expired() {
            debug!("fine-tuning of {} stopped by deadline after {} steps", expr, steps);
            break;
        }
        steps += 1;

        let evaluated = program.loss_and_gradient(data.features(), data.targets(), &params);
        let (loss, grad) = match evaluated {
            Ok((loss, grad)) if loss.is_finite() && grad.iter().all(|g| g.is_finite()) => {
                (loss, grad)
            }
            _ => {
                debug!("fine-tuning of {} hit a non-finite loss at step {}", expr, steps);
                return FinetuneOutcome::unchanged(expr, steps, FinetuneStatus::NumericFailure);
            }
        };

        if best.as_ref().map_or(true, |(l, _)| loss < *l) {
            best = Some((loss, params.clone()));
        }
        if (loss - prev_loss).abs() < settings.lbfgs.tolerance_change {
            break;
        }
        prev_loss = loss;

        if optimizer.step(&mut params, &grad) == StepOutcome::Converged {
            break;
        }
    }

    let Some((best_loss, best_params)) = best else {
        return FinetuneOutcome::unchanged(expr, steps, FinetuneStatus::NotImproved);
    };

    let tuned = match sanitize(&insert_parameters(&lifted, &best_params), &settings.sanitize) {
        Ok(tuned) => tuned,
        Err(e) => {
            debug!("tuned form of {} could not be sanitized: {}", expr, e);
            return FinetuneOutcome::unchanged(expr, steps, FinetuneStatus::NumericFailure);
        }
    };

    let before = training_error(expr, data, &options);
    let after = training_error(&tuned, data, &options);
    if !after.is_finite() || (before.is_finite() && after > before) {
        debug!("fine-tuning of {} did not improve: {} -> {}", expr, before, after);
        return FinetuneOutcome::unchanged(expr, steps, FinetuneStatus::NotImproved);
    }

    debug!(
        "fine-tuned {} -> {} in {} steps (loss {:.3e})",
        expr, tuned, steps, best_loss
    );
    FinetuneOutcome {
        expr: tuned,
        steps_used: steps,
        status: FinetuneStatus::Tuned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use sr_types::{parse, Matrix};

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(7)
    }

    fn linear_data() -> Dataset {
        // y = 2.5 x + 1
        let xs: Vec<f64> = (0..20).map(|i| i as f64 * 0.25).collect();
        let ys = xs.iter().map(|x| 2.5 * x + 1.0).collect();
        Dataset::new(Matrix::column_vector(&xs), ys).unwrap()
    }

    #[test]
    fn lifting_numbers_constants_in_preorder() {
        let expr = parse("3.0*x_0 + 5.0").unwrap();
        let (lifted, values) = lift_constants(&expr, &mut rng(), 1e-5);
        assert_eq!(lifted.to_string(), "(C_0*x_0) + C_1");
        assert_eq!(values, vec![3.0, 5.0]);
        assert_eq!(free_constant_count(&expr), 2);
    }

    #[test]
    fn integral_exponents_stay_literal() {
        let expr = parse("2.5*x_0**2.0 + x_1**0.5").unwrap();
        let (lifted, values) = lift_constants(&expr, &mut rng(), 1e-5);
        assert_eq!(lifted.to_string(), "(C_0*(x_0**2.0)) + (x_1**C_1)");
        assert_eq!(values, vec![2.5, 0.5]);
        assert_eq!(free_constant_count(&expr), 2);
    }

    #[test]
    fn duplicated_constants_are_separated() {
        let expr = parse("2.0*x_0 + 2.0*x_1 + 7.0").unwrap();
        let (_, values) = lift_constants(&expr, &mut rng(), 1e-5);
        assert_eq!(values.len(), 3);
        assert_ne!(values[0], values[1]);
        assert!((values[0] - 2.0).abs() <= 1e-5);
        assert!((values[1] - 2.0).abs() <= 1e-5);
        // unique values are left exactly as they were
        assert_eq!(values[2], 7.0);
    }

    #[test]
    fn insert_parameters_restores_literals() {
        let expr = parse("C_0*x_0 + C_1").unwrap();
        let restored = insert_parameters(&expr, &[2.0, 4.0]);
        assert_eq!(restored.to_string(), "(2.0*x_0) + 4.0");
    }

    #[test]
    fn recovers_linear_coefficients() {
        let data = linear_data();
        let expr = parse("2.0*x_0 + 0.5").unwrap();
        let outcome = finetune(&expr, &data, 100, &FinetuneSettings::default(), &mut rng());

        assert!(outcome.is_tuned(), "{:?}", outcome.status);
        assert!(outcome.steps_used > 0 && outcome.steps_used <= 100);
        let predictions = compile(&outcome.expr, &CompileOptions::new(1))
            .unwrap()
            .evaluate(data.features(), &[])
            .unwrap();
        assert!(data.mse(&predictions) < 1e-6, "{}", outcome.expr);
    }

    #[test]
    fn never_exceeds_step_budget() {
        let data = linear_data();
        let expr = parse("2.0*x_0 + 0.5").unwrap();
        let outcome = finetune(&expr, &data, 3, &FinetuneSettings::default(), &mut rng());
        assert!(outcome.steps_used <= 3);
    }

    #[test]
    fn constant_only_expression_is_untouched() {
        let data = linear_data();
        let expr = parse("3.0").unwrap();
        let outcome = finetune(&expr, &data, 100, &FinetuneSettings::default(), &mut rng());
        assert_eq!(outcome.status, FinetuneStatus::NoParameters);
        assert_eq!(outcome.steps_used, 0);
        assert_eq!(outcome.expr, expr);
    }

    #[test]
    fn expression_without_constants_is_untouched() {
        let data = linear_data();
        let expr = parse("x_0*x_0").unwrap();
        let outcome = finetune(&expr, &data, 100, &FinetuneSettings::default(), &mut rng());
        assert_eq!(outcome.status, FinetuneStatus::NoParameters);
        assert_eq!(outcome.steps_used, 0);
    }

    #[test]
    fn uncompilable_expression_falls_back() {
        let data = linear_data();
        let expr = parse("2.0*erf(x_0)").unwrap();
        let outcome = finetune(&expr, &data, 100, &FinetuneSettings::default(), &mut rng());
        assert_eq!(outcome.status, FinetuneStatus::CompileFailed);
        assert_eq!(outcome.steps_used, 0);
        assert_eq!(outcome.expr, expr);
    }

    #[test]
    fn expired_deadline_keeps_original() {
        let data = linear_data();
        let expr = parse("2.0*x_0 + 0.5").unwrap();
        let settings = FinetuneSettings {
            timeout: Duration::ZERO,
            ..FinetuneSettings::default()
        };
        let outcome = finetune(&expr, &data, 100, &settings, &mut rng());
        assert_eq!(outcome.steps_used, 0);
        assert_eq!(outcome.status, FinetuneStatus::NotImproved);
        assert_eq!(outcome.expr, expr);
    }

    #[test]
    fn unbound_parameters_are_not_lifted_over() {
        let data = linear_data();
        let expr = parse("C_0*x_0 + 2.0").unwrap();
        let outcome = finetune(&expr, &data, 100, &FinetuneSettings::default(), &mut rng());
        assert_eq!(outcome.status, FinetuneStatus::CompileFailed);
        assert_eq!(outcome.steps_used, 0);
        assert_eq!(outcome.expr, expr);
    }

    #[test]
    fn returns_best_iterate_not_last() {
        // y = 2 x; a step size of 2.5 overshoots the minimum by a growing
        // margin after the first step lands on C_0 = 2.5
        let xs: Vec<f64> = (0..20).map(|i| i as f64 * 0.25).collect();
        let ys = xs.iter().map(|x| 2.0 * x).collect();
        let data = Dataset::new(Matrix::column_vector(&xs), ys).unwrap();
        let settings = FinetuneSettings {
            lbfgs: LbfgsSettings {
                learning_rate: 2.5,
                ..FinetuneSettings::default().lbfgs
            },
            ..FinetuneSettings::default()
        };

        let outcome = finetune(&parse("5.0*x_0").unwrap(), &data, 6, &settings, &mut rng());
        assert!(outcome.is_tuned(), "{:?}", outcome.status);
        assert_eq!(outcome.steps_used, 6);

        let predictions = compile(&outcome.expr, &CompileOptions::new(1))
            .unwrap()
            .evaluate(data.features(), &[])
            .unwrap();
        for (p, x) in predictions.iter().zip(&xs) {
            assert!((p - 2.5 * x).abs() < 1e-9, "{}", outcome.expr);
        }
    }

    #[test]
    fn worse_result_returns_original_with_steps() {
        // the expression is already exact; a wide perturbation of the
        // duplicated 2.0 can only make the single evaluated iterate worse
        let xs: Vec<f64> = (0..10).map(|i| i as f64 * 0.5).collect();
        let ys = xs.iter().map(|x| 2.0 * x + 2.0).collect();
        let data = Dataset::new(Matrix::column_vector(&xs), ys).unwrap();
        let settings = FinetuneSettings {
            perturbation_scale: 0.5,
            ..FinetuneSettings::default()
        };

        let expr = parse("2.0*x_0 + 2.0").unwrap();
        let outcome = finetune(&expr, &data, 1, &settings, &mut rng());
        assert_eq!(outcome.status, FinetuneStatus::NotImproved);
        assert_eq!(outcome.steps_used, 1);
        assert_eq!(outcome.expr, expr);
    }

    #[test]
    fn non_finite_loss_falls_back() {
        let data = linear_data();
        // log of a non-positive value is NaN on every row
        let expr = parse("log(-1.0 - x_0*x_0)*2.0").unwrap();
        let outcome = finetune(&expr, &data, 100, &FinetuneSettings::default(), &mut rng());
        assert_eq!(outcome.status, FinetuneStatus::NumericFailure);
        assert_eq!(outcome.steps_used, 1);
        assert_eq!(outcome.expr, expr);
    }
}
