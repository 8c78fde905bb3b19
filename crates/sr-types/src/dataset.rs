use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::errors::SrResult;
use crate::data_error;

/// Dense feature matrix, one row per sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    data: Array2<f64>,
}

impl Matrix {
    /// Row-major `data` reshaped to `rows x cols`.
    pub fn new(data: Vec<f64>, rows: usize, cols: usize) -> SrResult<Self> {
        let len = data.len();
        let data = Array2::from_shape_vec((rows, cols), data).map_err(|_| {
            data_error!("matrix of {} values cannot have shape {}x{}", len, rows, cols)
        })?;
        Ok(Self { data })
    }

    pub fn from_rows(rows: &[Vec<f64>]) -> SrResult<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(data_error!(
                    "row {} has {} columns, expected {}",
                    i,
                    row.len(),
                    cols
                ));
            }
            data.extend_from_slice(row);
        }
        Self::new(data, rows.len(), cols)
    }

    /// Single-column matrix, handy for univariate data.
    pub fn column_vector(values: &[f64]) -> Self {
        Self {
            data: Array1::from(values.to_vec()).insert_axis(Axis(1)),
        }
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            data: Array2::zeros((rows, cols)),
        }
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f64> {
        self.data.row(index)
    }

    pub fn column(&self, col: usize) -> ArrayView1<'_, f64> {
        self.data.column(col)
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[[row, col]]
    }

    /// Missing entries are encoded as NaN.
    pub fn has_missing(&self) -> bool {
        self.data.iter().any(|v| v.is_nan())
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.data
    }
}

impl From<Array2<f64>> for Matrix {
    fn from(data: Array2<f64>) -> Self {
        Self { data }
    }
}

/// Training data: features plus aligned regression targets.
///
/// Read-only for the whole pipeline; stages that need a different view build
/// a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    features: Matrix,
    targets: Array1<f64>,
}

impl Dataset {
    pub fn new(features: Matrix, targets: Vec<f64>) -> SrResult<Self> {
        if features.rows() != targets.len() {
            return Err(data_error!(
                "{} feature rows but {} targets",
                features.rows(),
                targets.len()
            ));
        }
        if targets.is_empty() {
            return Err(data_error!("dataset has no rows"));
        }
        if let Some(i) = targets.iter().position(|t| !t.is_finite()) {
            return Err(data_error!("target {} is not finite", i));
        }
        Ok(Self {
            features,
            targets: Array1::from(targets),
        })
    }

    pub fn features(&self) -> &Matrix {
        &self.features
    }

    pub fn targets(&self) -> ArrayView1<'_, f64> {
        self.targets.view()
    }

    pub fn n_rows(&self) -> usize {
        self.targets.len()
    }

    pub fn n_features(&self) -> usize {
        self.features.cols()
    }

    pub fn target_mean(&self) -> f64 {
        self.targets.mean().unwrap_or(f64::NAN)
    }

    /// Mean squared error of `predictions` against the targets.
    pub fn mse(&self, predictions: &[f64]) -> f64 {
        mean_squared_error(self.targets(), ArrayView1::from(predictions))
    }
}

/// NaN when the lengths differ or there is nothing to compare.
pub fn mean_squared_error(targets: ArrayView1<'_, f64>, predictions: ArrayView1<'_, f64>) -> f64 {
    if targets.len() != predictions.len() {
        return f64::NAN;
    }
    (&targets - &predictions)
        .mapv(|r| r * r)
        .mean()
        .unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn from_rows_checks_shape() {
        let m = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        assert_eq!(m.rows(), 3);
        assert_eq!(m.cols(), 2);
        assert_eq!(m.row(1), array![3.0, 4.0]);
        assert_eq!(m.column(1), array![2.0, 4.0, 6.0]);
        assert_eq!(m.view(), array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);

        assert!(Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).is_err());
        assert!(Matrix::new(vec![1.0, 2.0, 3.0], 2, 2).is_err());
    }

    #[test]
    fn missing_values_are_nan() {
        let m = Matrix::from_rows(&[vec![1.0, f64::NAN]]).unwrap();
        assert!(m.has_missing());
        let filled = Matrix::from(m.into_inner().mapv(|v| if v.is_nan() { 0.0 } else { v }));
        assert!(!filled.has_missing());
        assert_eq!(filled.get(0, 1), 0.0);
        assert!(!Matrix::zeros(2, 3).has_missing());
    }

    #[test]
    fn dataset_validation() {
        let x = Matrix::column_vector(&[1.0, 2.0, 3.0]);
        assert!(Dataset::new(x.clone(), vec![1.0, 2.0]).is_err());
        assert!(Dataset::new(x.clone(), vec![1.0, f64::NAN, 2.0]).is_err());
        assert!(Dataset::new(Matrix::column_vector(&[]), vec![]).is_err());

        let data = Dataset::new(x, vec![2.0, 4.0, 6.0]).unwrap();
        assert_eq!(data.n_rows(), 3);
        assert_eq!(data.n_features(), 1);
        assert_eq!(data.target_mean(), 4.0);
        assert_eq!(data.targets(), array![2.0, 4.0, 6.0]);
    }

    #[test]
    fn mse_of_mean_predictor_is_variance() {
        let targets = array![2.0, 3.0, 4.0, 5.0];
        let mse = mean_squared_error(targets.view(), array![3.5, 3.5, 3.5, 3.5].view());
        assert!((mse - 1.25).abs() < 1e-12);
        assert!(mean_squared_error(targets.view(), array![1.0].view()).is_nan());
    }
}
