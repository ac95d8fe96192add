//! Row Parallel Solver
//!
//! A shared-memory multi-threaded baseline: at every pivot step the inner row-update
//! loop fans out over a rayon parallel iterator, and the completion of that iterator
//! is the per-step barrier. Only used for timing comparison against the serial and
//! distributed solvers; the dependency between consecutive pivot steps stays
//! sequential.
//!

use super::solver::*;
use super::util::*;
use crate::rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct SolverRowParallel {
    pub config: SolverRowParallelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SolverRowParallelConfig {
    /// the number of rayon worker threads; 0 defaults to the number of CPU cores
    #[serde(default = "solver_row_parallel_default_configs::thread_num")]
    pub thread_num: usize,
}

pub mod solver_row_parallel_default_configs {
    pub fn thread_num() -> usize { 0 }  // by default to the number of CPU cores
}

impl SolverRowParallel {
    pub fn new() -> Self {
        Self::new_config(serde_json::from_value(json!({})).unwrap())
    }

    pub fn new_config(config: SolverRowParallelConfig) -> Self {
        Self { config }
    }

    fn eliminate(&self, dimension: usize, matrix: &mut [Scalar], rhs: &mut [Scalar]) {
        for k in 0..dimension {
            // the pivot row is copied out so the row updates can run without aliasing
            let pivot_row: Vec<Scalar> = matrix[k * dimension..(k + 1) * dimension].to_vec();
            let pivot = pivot_row[k];
            let rhs_k = rhs[k];
            matrix[(k + 1) * dimension..]
                .par_chunks_mut(dimension)
                .zip(rhs[(k + 1)..].par_iter_mut())
                .for_each(|(row, rhs_i)| {
                    let factor = row[k] / pivot;
                    for j in k..dimension {
                        row[j] -= factor * pivot_row[j];
                    }
                    *rhs_i -= factor * rhs_k;
                });
        }
    }
}

impl Default for SolverRowParallel {
    fn default() -> Self {
        Self::new()
    }
}

impl EliminationSolver for SolverRowParallel {
    fn name(&self) -> String {
        "row-parallel".to_string()
    }

    fn solve(&mut self, system: &LinearSystem) -> Vec<Scalar> {
        let dimension = system.dimension;
        let mut matrix = system.matrix.clone();
        let mut rhs = system.rhs.clone();
        if self.config.thread_num != 0 {
            let thread_pool = crate::rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.thread_num)
                .build()
                .expect("creating thread pool failed");
            thread_pool.install(|| self.eliminate(dimension, &mut matrix, &mut rhs));
        } else {
            self.eliminate(dimension, &mut matrix, &mut rhs);
        }
        back_substitute(dimension, &matrix, &rhs)
    }
}
