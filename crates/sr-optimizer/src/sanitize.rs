//! Sanitization: simplification plus degenerate-symbol substitution.

use std::time::Duration;

use sr_types::{Expr, Node, RefineConfig, SrError, SrResult, Stage, Symbolic};
use tracing::{debug, warn};

use crate::deadline::Deadline;
use crate::simplify::simplify;

/// Numeric stand-in for `pi`.
pub const PI_PLACEHOLDER: f64 = 3.1415927;

const MAX_PASSES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SanitizePolicy {
    pub simplify_timeout: Duration,
    /// Value substituted for every degenerate construct.
    pub placeholder: f64,
}

impl Default for SanitizePolicy {
    fn default() -> Self {
        Self::from(&RefineConfig::default())
    }
}

impl From<&RefineConfig> for SanitizePolicy {
    fn from(config: &RefineConfig) -> Self {
        Self {
            simplify_timeout: config.simplify_timeout(),
            placeholder: config.degenerate_placeholder,
        }
    }
}

/// Rewrites `expr` into an equivalent expression free of degenerate symbols.
///
/// A simplification timeout is not an error: the current form is kept and
/// substitution proceeds on it. Only structurally broken input and input
/// with free parameters (`C_i`) fail.
pub fn sanitize(expr: &Expr, policy: &SanitizePolicy) -> SrResult<Expr> {
    expr.validate()?;
    if expr.count_params() > 0 {
        return Err(SrError::Unsanitizable(format!(
            "{expr} references unbound parameters"
        )));
    }
    let deadline = Deadline::start(Stage::Simplify, policy.simplify_timeout);

    let mut current = simplify_or_keep(expr, &deadline);
    for _ in 0..MAX_PASSES {
        let (substituted, changed) = substitute(&current, policy.placeholder);
        if !changed {
            return finish(current);
        }
        current = simplify_or_keep(&substituted, &deadline);
    }

    // simplification keeps re-introducing symbols; settle on a substituted form
    let (substituted, _) = substitute(&current, policy.placeholder);
    finish(substituted)
}

fn simplify_or_keep(expr: &Expr, deadline: &Deadline) -> Expr {
    match simplify(expr, deadline) {
        Ok(simplified) => simplified,
        Err(SrError::Timeout { limit_ms, .. }) => {
            debug!("simplification exceeded {} ms, keeping {}", limit_ms, expr);
            expr.compact()
        }
        Err(e) => {
            warn!("simplification failed: {}", e);
            expr.compact()
        }
    }
}

/// Replaces degenerate constructs with literals. Returns whether anything
/// was replaced.
pub fn substitute(expr: &Expr, placeholder: f64) -> (Expr, bool) {
    let mut changed = false;
    let replaced = expr.rebuild(|b, node| {
        let literal = match &node {
            Node::Symbol(Symbolic::Pi) => Some(PI_PLACEHOLDER),
            other if other.is_degenerate() => Some(placeholder),
            _ => None,
        };
        match literal {
            Some(v) => {
                changed = true;
                b.constant(v)
            }
            None => b.push(node),
        }
    });
    (replaced.compact(), changed)
}

fn finish(expr: Expr) -> SrResult<Expr> {
    expr.validate()?;
    if expr.has_degenerate() {
        return Err(SrError::Unsanitizable(format!(
            "degenerate construct survived substitution in {expr}"
        )));
    }
    Ok(expr)
}
