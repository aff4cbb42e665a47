// ─────────────────────────────────────────────────────────────────────
// SCPN CMFD — Sparse Matrices
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Compressed sparse row (CSR) matrices for the coarse-mesh operators.
//!
//! The destruction and production operators are assembled entry by entry
//! into a [`CsrBuilder`] (one ordered map per row) and frozen into a
//! [`CsrMatrix`] once per outer iteration. Rows and columns are indexed
//! `cell * num_groups + group`.

use rayon::prelude::*;
use std::collections::BTreeMap;

/// Row-ordered accumulator for building a [`CsrMatrix`].
#[derive(Debug, Clone)]
pub struct CsrBuilder {
    n_rows: usize,
    n_cols: usize,
    rows: Vec<BTreeMap<usize, f64>>,
}

impl CsrBuilder {
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        CsrBuilder {
            n_rows,
            n_cols,
            rows: vec![BTreeMap::new(); n_rows],
        }
    }

    pub fn new_square(n: usize) -> Self {
        Self::new(n, n)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    /// Accumulate `value` into `(row, col)`. Indices are checked in debug
    /// builds only; operator assembly always stays in range.
    #[inline]
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.n_rows, "row {row} out of range {}", self.n_rows);
        debug_assert!(col < self.n_cols, "col {col} out of range {}", self.n_cols);
        *self.rows[row].entry(col).or_insert(0.0) += value;
    }

    /// Overwrite `(row, col)`.
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.n_rows, "row {row} out of range {}", self.n_rows);
        debug_assert!(col < self.n_cols, "col {col} out of range {}", self.n_cols);
        self.rows[row].insert(col, value);
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.rows[row].get(&col).copied().unwrap_or(0.0)
    }

    pub fn nnz(&self) -> usize {
        self.rows.iter().map(|r| r.len()).sum()
    }

    /// Freeze into CSR. Column indices come out sorted per row.
    pub fn build(self) -> CsrMatrix {
        let nnz = self.nnz();
        let mut row_ptr = Vec::with_capacity(self.n_rows + 1);
        let mut col_idx = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);
        row_ptr.push(0);
        for row in self.rows {
            for (col, val) in row {
                col_idx.push(col);
                values.push(val);
            }
            row_ptr.push(col_idx.len());
        }
        CsrMatrix {
            n_rows: self.n_rows,
            n_cols: self.n_cols,
            row_ptr,
            col_idx,
            values,
        }
    }
}

/// Immutable CSR matrix.
#[derive(Debug, Clone)]
pub struct CsrMatrix {
    n_rows: usize,
    n_cols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// `(column, value)` pairs of one row, ascending by column.
    #[inline]
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let start = self.row_ptr[row];
        let end = self.row_ptr[row + 1];
        self.col_idx[start..end]
            .iter()
            .copied()
            .zip(self.values[start..end].iter().copied())
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        let start = self.row_ptr[row];
        let end = self.row_ptr[row + 1];
        match self.col_idx[start..end].binary_search(&col) {
            Ok(k) => self.values[start + k],
            Err(_) => 0.0,
        }
    }

    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.n_rows.min(self.n_cols))
            .map(|i| self.get(i, i))
            .collect()
    }

    /// y = A x
    pub fn mul_vec(&self, x: &[f64], y: &mut [f64]) {
        debug_assert_eq!(x.len(), self.n_cols);
        debug_assert_eq!(y.len(), self.n_rows);
        for (i, yi) in y.iter_mut().enumerate() {
            *yi = self.row(i).map(|(j, a)| a * x[j]).sum();
        }
    }

    /// y = A x, rows distributed over the rayon pool.
    pub fn mul_vec_parallel(&self, x: &[f64], y: &mut [f64]) {
        debug_assert_eq!(x.len(), self.n_cols);
        debug_assert_eq!(y.len(), self.n_rows);
        y.par_iter_mut().enumerate().for_each(|(i, yi)| {
            *yi = self.row(i).map(|(j, a)| a * x[j]).sum();
        });
    }

    /// Strict row diagonal dominance: |a_ii| >= Σ_{j≠i} |a_ij| for every row.
    pub fn is_diagonally_dominant(&self) -> bool {
        (0..self.n_rows).all(|i| {
            let mut diag = 0.0;
            let mut off = 0.0;
            for (j, a) in self.row(i) {
                if j == i {
                    diag = a.abs();
                } else {
                    off += a.abs();
                }
            }
            diag >= off
        })
    }

    /// Largest |a_ij - a_ji| over the stored pattern.
    pub fn max_asymmetry(&self) -> f64 {
        let mut worst: f64 = 0.0;
        for i in 0..self.n_rows {
            for (j, a) in self.row(i) {
                if j < self.n_rows && i < self.n_cols {
                    worst = worst.max((a - self.get(j, i)).abs());
                }
            }
        }
        worst
    }
}
