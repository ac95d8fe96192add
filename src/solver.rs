//! Elimination Solver Interface
//!
//! The common `solve(A, b) -> x` seam shared by the serial baseline, the rayon
//! row-parallel baseline and the distributed solver, so callers and benchmarks can
//! treat them interchangeably.
//!

use super::util::*;

pub trait EliminationSolver {
    /// a short name used in benchmark records
    fn name(&self) -> String;
    /// solve the dense system, returning the solution vector of length `dimension`;
    /// no pivoting is performed, so a zero diagonal entry propagates non-finite values
    /// into the solution rather than raising an error
    fn solve(&mut self, system: &LinearSystem) -> Vec<Scalar>;
}

/// back-substitution over an upper-triangular system stored row-major, from the last
/// row up; a zero or near-zero diagonal entry is not specially handled
pub fn back_substitute(dimension: usize, matrix: &[Scalar], rhs: &[Scalar]) -> Vec<Scalar> {
    assert_eq!(matrix.len(), dimension * dimension, "matrix is not square");
    assert_eq!(rhs.len(), dimension, "right-hand side length mismatch");
    let mut solution = vec![0.; dimension];
    for i in (0..dimension).rev() {
        let mut sum = rhs[i];
        for j in (i + 1)..dimension {
            sum -= matrix[i * dimension + j] * solution[j];
        }
        solution[i] = sum / matrix[i * dimension + i];
    }
    solution
}
