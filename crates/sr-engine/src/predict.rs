//! Evaluating expressions and fitted models on new inputs.

use sr_optimizer::{compile, CompileOptions};
use sr_types::{data_error, Expr, Matrix, SrError, SrResult};

use crate::model::FittedModel;

fn numeric_invalid(e: SrError) -> SrError {
    match e {
        SrError::Data(_) | SrError::NumericInvalid(_) => e,
        other => SrError::NumericInvalid(other.to_string()),
    }
}

/// One prediction per row of `x`.
///
/// Literal constants are broadcast without compiling. Expressions that do not
/// read any feature are evaluated once and broadcast too. Compilation or
/// evaluation failures surface as `NumericInvalid`.
pub fn evaluate_expression(
    expr: &Expr,
    x: &Matrix,
    options: &CompileOptions,
) -> SrResult<Vec<f64>> {
    evaluate(expr, x, options).map_err(numeric_invalid)
}

/// [`evaluate_expression`] with failures reported as they happened.
pub(crate) fn evaluate(expr: &Expr, x: &Matrix, options: &CompileOptions) -> SrResult<Vec<f64>> {
    if let Some(value) = expr.constant_value() {
        return Ok(vec![value; x.rows()]);
    }

    let program = compile(expr, options)?;
    if program.is_input_independent() {
        let probe = Matrix::zeros(1, x.cols());
        return match program.evaluate(&probe, &[])?.first() {
            Some(value) => Ok(vec![*value; x.rows()]),
            None => Err(SrError::NumericInvalid(format!("{expr} produced no value"))),
        };
    }
    program.evaluate(x, &[])
}

/// Predictions of `model` on `x`, imputing missing inputs with the state
/// learned at fit time.
pub fn predict(model: &FittedModel, x: &Matrix) -> SrResult<Vec<f64>> {
    let imputed;
    let x = if x.has_missing() {
        let Some(imputer) = &model.imputer else {
            return Err(data_error!(
                "inputs contain missing values and the model has no imputer"
            ));
        };
        imputed = imputer.transform(x)?;
        &imputed
    } else {
        x
    };

    let options = CompileOptions {
        division_placeholder: model.division_placeholder,
        ..CompileOptions::new(x.cols())
    };
    evaluate_expression(&model.expr, x, &options)
}

/// Like [`predict`], but a failure yields NaN for every row.
pub fn predict_or_nan(model: &FittedModel, x: &Matrix) -> Vec<f64> {
    predict(model, x).unwrap_or_else(|_| vec![f64::NAN; x.rows()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impute::{ColumnMeanImputer, Imputer};
    use crate::model::FitSummary;
    use sr_types::{parse, Candidate};

    fn model(text: &str) -> FittedModel {
        FittedModel::from_candidate(Candidate::new(0, parse(text).unwrap()), FitSummary::default())
    }

    fn matrix(rows: &[&[f64]]) -> Matrix {
        Matrix::from_rows(&rows.iter().map(|r| r.to_vec()).collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn constant_model_is_broadcast() {
        let x = matrix(&[&[1.0], &[2.0], &[3.0]]);
        assert_eq!(predict(&model("4.5"), &x).unwrap(), vec![4.5, 4.5, 4.5]);
    }

    #[test]
    fn input_independent_expression_is_broadcast() {
        let x = matrix(&[&[1.0, 9.0], &[2.0, 8.0]]);
        let out = predict(&model("exp(1.0)*2.0 - sin(0.5)"), &x).unwrap();
        let expected = 1.0_f64.exp() * 2.0 - 0.5_f64.sin();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|v| (v - expected).abs() < 1e-12));
    }

    #[test]
    fn evaluates_general_expressions() {
        let x = matrix(&[&[1.0, 2.0], &[3.0, 0.0]]);
        assert_eq!(predict(&model("x_0*x_1 + 1.0"), &x).unwrap(), vec![3.0, 1.0]);
        // protected division
        assert_eq!(predict(&model("1.0/x_1"), &x).unwrap(), vec![0.5, 1.0]);
        let custom = model("1.0/x_1").with_division_placeholder(0.0);
        assert_eq!(predict(&custom, &x).unwrap(), vec![0.5, 0.0]);
    }

    #[test]
    fn uncompilable_model_is_numerically_invalid() {
        let x = matrix(&[&[1.0], &[2.0]]);
        let broken = model("erf(x_0)");
        assert!(matches!(predict(&broken, &x), Err(SrError::NumericInvalid(_))));
        assert!(predict_or_nan(&broken, &x).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn missing_inputs_need_an_imputer() {
        let train = matrix(&[&[1.0], &[3.0]]);
        let (state, _) = ColumnMeanImputer.impute(&train).unwrap();
        let x = matrix(&[&[f64::NAN], &[4.0]]);

        let plain = model("2.0*x_0");
        assert!(matches!(predict(&plain, &x), Err(SrError::Data(_))));

        let with_state = model("2.0*x_0").with_imputer(Some(state));
        assert_eq!(predict(&with_state, &x).unwrap(), vec![4.0, 8.0]);
    }
}
