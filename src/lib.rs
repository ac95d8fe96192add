extern crate cfg_if;
extern crate chrono;
extern crate derivative;
extern crate parking_lot;
extern crate rand_xoshiro;
extern crate rayon;
extern crate serde;
#[macro_use] extern crate serde_json;

pub mod util;
pub mod messaging;
pub mod solver;
pub mod solver_serial;
pub mod solver_row_parallel;
pub mod solver_distributed;
pub mod example_systems;

use solver::EliminationSolver;
use util::*;

/// solve a dense linear system with the distributed column-cyclic solver
/// (to optimize repeated solving, consider reusing a [`solver_distributed::SolverDistributed`] object)
pub fn distributed_solve(system: &LinearSystem, rank_num: usize) -> Vec<Scalar> {
    // sanity check
    assert!(rank_num > 0, "at least one rank required");
    system.sanity_check().expect("invalid linear system");
    solver_distributed::SolverDistributed::new(rank_num).solve(system)
}

/// solve with the single-threaded reference baseline
pub fn serial_solve(system: &LinearSystem) -> Vec<Scalar> {
    system.sanity_check().expect("invalid linear system");
    solver_serial::SolverSerial::new().solve(system)
}
