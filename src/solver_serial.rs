//! Serial Solver
//!
//! Single-threaded Gaussian elimination with back-substitution, used as the reference
//! baseline for correctness cross-checks and timing comparison. The elimination is the
//! same forward pass the distributed solver performs, without any partitioning.
//!

use super::solver::*;
use super::util::*;

#[derive(Debug, Clone, Default)]
pub struct SolverSerial {}

impl SolverSerial {
    pub fn new() -> Self {
        Self {}
    }
}

impl EliminationSolver for SolverSerial {
    fn name(&self) -> String {
        "serial".to_string()
    }

    fn solve(&mut self, system: &LinearSystem) -> Vec<Scalar> {
        let dimension = system.dimension;
        let mut matrix = system.matrix.clone();
        let mut rhs = system.rhs.clone();
        for k in 0..dimension {
            let pivot = matrix[k * dimension + k];
            for i in (k + 1)..dimension {
                // row-dependent multiplier, each row is scaled by its own column-k entry
                let factor = matrix[i * dimension + k] / pivot;
                for j in k..dimension {
                    matrix[i * dimension + j] -= factor * matrix[k * dimension + j];
                }
                rhs[i] -= factor * rhs[k];
            }
        }
        back_substitute(dimension, &matrix, &rhs)
    }
}
