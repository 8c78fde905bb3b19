//! Missing-value imputation.
//!
//! Missing feature values are encoded as NaN. An [`Imputer`] is fitted once on
//! the training features; the resulting [`ImputerState`] is stored on the
//! fitted model and reapplied to prediction inputs.

use std::fmt;
use std::sync::Arc;

use sr_types::{data_error, Matrix, SrResult};

/// Fitted imputation that can be replayed on new data.
pub trait ImputerState: fmt::Debug + Send + Sync {
    fn transform(&self, x: &Matrix) -> SrResult<Matrix>;
}

/// Learns how to fill missing values from training features.
pub trait Imputer: fmt::Debug + Send + Sync {
    /// Returns the fitted state and the imputed training features.
    fn impute(&self, x: &Matrix) -> SrResult<(Arc<dyn ImputerState>, Matrix)>;
}

/// Fills each missing entry with its column's observed mean.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnMeanImputer;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeans {
    means: Vec<f64>,
}

impl ColumnMeans {
    pub fn means(&self) -> &[f64] {
        &self.means
    }
}

impl ImputerState for ColumnMeans {
    fn transform(&self, x: &Matrix) -> SrResult<Matrix> {
        if x.cols() != self.means.len() {
            return Err(data_error!(
                "imputer fitted on {} columns, got {}",
                self.means.len(),
                x.cols()
            ));
        }
        let mut filled = x.view().to_owned();
        for mut row in filled.rows_mut() {
            for (v, mean) in row.iter_mut().zip(&self.means) {
                if v.is_nan() {
                    *v = *mean;
                }
            }
        }
        Ok(Matrix::from(filled))
    }
}

impl Imputer for ColumnMeanImputer {
    fn impute(&self, x: &Matrix) -> SrResult<(Arc<dyn ImputerState>, Matrix)> {
        let means = x
            .view()
            .columns()
            .into_iter()
            .map(|column| {
                let (sum, count) = column
                    .iter()
                    .filter(|v| !v.is_nan())
                    .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                if count == 0 {
                    0.0
                } else {
                    sum / count as f64
                }
            })
            .collect();
        let state = ColumnMeans { means };
        let imputed = state.transform(x)?;
        Ok((Arc::new(state), imputed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn fills_with_column_means() {
        let x = Matrix::from_rows(&[
            vec![1.0, f64::NAN, f64::NAN],
            vec![3.0, 4.0, f64::NAN],
            vec![f64::NAN, 8.0, f64::NAN],
        ])
        .unwrap();
        let (state, imputed) = ColumnMeanImputer.impute(&x).unwrap();

        assert!(!imputed.has_missing());
        assert_eq!(imputed.row(0), array![1.0, 6.0, 0.0]);
        assert_eq!(imputed.row(2), array![2.0, 8.0, 0.0]);

        let fresh = Matrix::from_rows(&[vec![f64::NAN, 1.0, f64::NAN]]).unwrap();
        assert_eq!(state.transform(&fresh).unwrap().row(0), array![2.0, 1.0, 0.0]);
    }

    #[test]
    fn width_mismatch_is_rejected() {
        let x = Matrix::from_rows(&[vec![1.0, 2.0]]).unwrap();
        let (state, _) = ColumnMeanImputer.impute(&x).unwrap();
        let narrow = Matrix::column_vector(&[1.0]);
        assert!(state.transform(&narrow).is_err());
    }
}
