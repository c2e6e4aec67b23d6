//! Dense reference backend.
//!
//! The tape itself never looks inside host values, but something has to hold
//! them. [`Vector`] is the materialized value type every callback exchanges,
//! and [`DenseMatrix`] is a small direct-solve matrix used by the built-in
//! blocks and by hosts that do not bring their own linear algebra.

use std::ops::Index;

use ndarray::{Array1, Array2};
use thiserror::Error;

use crate::Error;

/// Failures inside the dense backend.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum LinalgError {
    #[error("matrix is singular at pivot {pivot}")]
    Singular { pivot: usize },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("matrix must be square, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },
}

impl From<LinalgError> for Error {
    fn from(err: LinalgError) -> Self {
        Error::host(err)
    }
}

/// A materialized dense vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector(Array1<f64>);

impl Vector {
    /// Creates a zero vector of length `len`.
    #[must_use]
    pub fn zeros(len: usize) -> Self {
        Self(Array1::zeros(len))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if every entry is exactly zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&x| x == 0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.0.iter()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<f64> {
        self.0.to_vec()
    }

    #[must_use]
    pub fn as_array(&self) -> &Array1<f64> {
        &self.0
    }

    /// Computes `self += alpha * x`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lengths differ.
    pub fn axpy(&mut self, alpha: f64, x: &Vector) -> Result<(), Error> {
        check_len(self.len(), x.len())?;
        self.0.scaled_add(alpha, &x.0);
        Ok(())
    }

    /// Returns `alpha * self`.
    #[must_use]
    pub fn scaled(&self, alpha: f64) -> Vector {
        Self(self.0.mapv(|x| alpha * x))
    }

    /// Returns the Euclidean inner product.
    ///
    /// # Errors
    ///
    /// Returns an error if the lengths differ.
    pub fn dot(&self, other: &Vector) -> Result<f64, Error> {
        check_len(self.len(), other.len())?;
        Ok(self.0.dot(&other.0))
    }

    #[must_use]
    pub fn norm(&self) -> f64 {
        self.0.dot(&self.0).sqrt()
    }

    /// Returns the largest absolute entry-wise difference.
    ///
    /// # Errors
    ///
    /// Returns an error if the lengths differ.
    pub fn max_abs_diff(&self, other: &Vector) -> Result<f64, Error> {
        check_len(self.len(), other.len())?;
        Ok(self
            .0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max))
    }
}

impl From<Vec<f64>> for Vector {
    fn from(values: Vec<f64>) -> Self {
        Self(Array1::from(values))
    }
}

impl From<Array1<f64>> for Vector {
    fn from(values: Array1<f64>) -> Self {
        Self(values)
    }
}

impl Index<usize> for Vector {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

/// A square dense matrix with a direct solver.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix(Array2<f64>);

impl DenseMatrix {
    /// Wraps a square array.
    ///
    /// # Errors
    ///
    /// Returns an error if the array is not square.
    pub fn new(values: Array2<f64>) -> Result<Self, LinalgError> {
        let (rows, cols) = values.dim();
        if rows != cols {
            return Err(LinalgError::NotSquare { rows, cols });
        }
        Ok(Self(values))
    }

    /// Builds a matrix from row-major entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the rows do not form a square matrix.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, LinalgError> {
        let n = rows.len();
        let mut values = Array2::zeros((n, n));
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n {
                return Err(LinalgError::NotSquare {
                    rows: n,
                    cols: row.len(),
                });
            }
            for (j, &x) in row.iter().enumerate() {
                values[[i, j]] = x;
            }
        }
        Ok(Self(values))
    }

    #[must_use]
    pub fn identity(dim: usize) -> Self {
        Self(Array2::eye(dim))
    }

    /// Returns a diagonal matrix.
    #[must_use]
    pub fn diagonal(entries: &[f64]) -> Self {
        let mut values = Array2::zeros((entries.len(), entries.len()));
        for (i, &x) in entries.iter().enumerate() {
            values[[i, i]] = x;
        }
        Self(values)
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.0.nrows()
    }

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.0[[row, col]]
    }

    #[must_use]
    pub fn transpose(&self) -> Self {
        Self(self.0.t().to_owned())
    }

    #[must_use]
    pub fn scaled(&self, alpha: f64) -> Self {
        Self(self.0.mapv(|x| alpha * x))
    }

    /// Returns `self + alpha * other`.
    ///
    /// # Errors
    ///
    /// Returns an error if the dimensions differ.
    pub fn add_scaled(&self, alpha: f64, other: &DenseMatrix) -> Result<Self, LinalgError> {
        if self.dim() != other.dim() {
            return Err(LinalgError::DimensionMismatch {
                expected: self.dim(),
                actual: other.dim(),
            });
        }
        let mut values = self.0.clone();
        values.scaled_add(alpha, &other.0);
        Ok(Self(values))
    }

    /// Returns `self * x`.
    ///
    /// # Errors
    ///
    /// Returns an error if the dimensions differ.
    pub fn matvec(&self, x: &Vector) -> Result<Vector, LinalgError> {
        if self.dim() != x.len() {
            return Err(LinalgError::DimensionMismatch {
                expected: self.dim(),
                actual: x.len(),
            });
        }
        Ok(Vector(self.0.dot(&x.0)))
    }

    /// Solves `self * x = b` by Gaussian elimination with partial pivoting.
    ///
    /// # Errors
    ///
    /// Returns an error if the dimensions differ or the matrix is singular.
    pub fn solve(&self, b: &Vector) -> Result<Vector, LinalgError> {
        let n = self.dim();
        if b.len() != n {
            return Err(LinalgError::DimensionMismatch {
                expected: n,
                actual: b.len(),
            });
        }

        let mut a = self.0.clone();
        let mut x = b.0.clone();

        for k in 0..n {
            let pivot = (k..n)
                .max_by(|&i, &j| a[[i, k]].abs().total_cmp(&a[[j, k]].abs()))
                .unwrap_or(k);
            if a[[pivot, k]].abs() < f64::EPSILON * 1e-3 {
                return Err(LinalgError::Singular { pivot: k });
            }
            if pivot != k {
                for j in 0..n {
                    a.swap([k, j], [pivot, j]);
                }
                x.swap(k, pivot);
            }
            for i in (k + 1)..n {
                let factor = a[[i, k]] / a[[k, k]];
                if factor == 0.0 {
                    continue;
                }
                for j in k..n {
                    a[[i, j]] -= factor * a[[k, j]];
                }
                x[i] -= factor * x[k];
            }
        }

        for k in (0..n).rev() {
            let tail: f64 = ((k + 1)..n).map(|j| a[[k, j]] * x[j]).sum();
            x[k] = (x[k] - tail) / a[[k, k]];
        }

        Ok(Vector(x))
    }
}

fn check_len(expected: usize, actual: usize) -> Result<(), LinalgError> {
    if expected == actual {
        Ok(())
    } else {
        Err(LinalgError::DimensionMismatch { expected, actual })
    }
}
