//! Structural complexity of expressions.

use sr_types::{ComplexityMetric, Expr, SrResult};

/// Complexity under `metric`.
pub fn compute_complexity(expr: &Expr, metric: ComplexityMetric) -> usize {
    match metric {
        ComplexityMetric::NodeCount => expr.node_count(),
    }
}

/// Like [`compute_complexity`] with the metric given by name. Unknown names
/// are configuration errors.
pub fn complexity_by_name(expr: &Expr, metric: &str) -> SrResult<usize> {
    let metric: ComplexityMetric = metric.parse()?;
    Ok(compute_complexity(expr, metric))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sr_types::{parse, SrError};

    #[test]
    fn node_count_of_common_shapes() {
        let cases = [
            ("3.0", 1),
            ("x_0", 1),
            ("x_0 + 1.0", 3),
            ("sin(x_0)", 2),
            ("6.67*x_0*x_1/(x_2**2.0)", 8),
            ("clip(x_0, 0.0, 1.0)", 5),
        ];
        for (text, expected) in cases {
            let expr = parse(text).unwrap();
            assert_eq!(compute_complexity(&expr, ComplexityMetric::NodeCount), expected, "{text}");
        }
    }

    #[test]
    fn metric_by_name() {
        let expr = parse("x_0*x_1").unwrap();
        assert_eq!(complexity_by_name(&expr, "node_count").unwrap(), 3);

        let err = complexity_by_name(&expr, "depth").unwrap_err();
        assert!(matches!(err, SrError::Config(_)));
    }
}
