//! Example Systems
//!
//! Deterministic generators of dense linear systems used by the tests and the
//! command-line benchmark. These are debugging aids, not realistic workloads:
//! diagonally dominant systems are always well-conditioned, which keeps the
//! no-pivoting elimination numerically meaningful.
//!

use super::util::*;
use crate::rand_xoshiro::rand_core::SeedableRng;

/// a random diagonally dominant system: off-diagonal entries in [-1, 1), each diagonal
/// entry strictly exceeds its row's off-diagonal absolute sum, so the system is
/// well-conditioned and every elimination pivot stays away from zero
pub fn random_diagonally_dominant_system(dimension: usize, seed: u64) -> LinearSystem {
    assert!(dimension > 0, "at least one equation required");
    let mut rng = DeterministicRng::seed_from_u64(seed);
    let mut matrix = vec![0.; dimension * dimension];
    for i in 0..dimension {
        let mut row_sum: Scalar = 0.;
        for j in 0..dimension {
            if i != j {
                let value = (rng.next_f64() * 2. - 1.) as Scalar;
                matrix[i * dimension + j] = value;
                row_sum += value.abs();
            }
        }
        matrix[i * dimension + i] = row_sum + 1.;
    }
    let rhs = (0..dimension).map(|_| (rng.next_f64() * 2. - 1.) as Scalar).collect();
    LinearSystem::new(dimension, matrix, rhs)
}

/// a diagonally dominant system whose exact solution is known: small integer components,
/// with the right-hand side computed as `A x`
pub fn known_solution_system(dimension: usize, seed: u64) -> (LinearSystem, Vec<Scalar>) {
    let mut base = random_diagonally_dominant_system(dimension, seed);
    let mut rng = DeterministicRng::seed_from_u64(seed.wrapping_add(0x5eed));
    let solution: Vec<Scalar> = (0..dimension)
        .map(|_| ((rng.next_f64() * 11.) as i64 - 5) as Scalar)
        .collect();
    for i in 0..dimension {
        let mut sum: Scalar = 0.;
        for j in 0..dimension {
            sum += base.entry(i, j) * solution[j];
        }
        base.rhs[i] = sum;
    }
    (base, solution)
}

/// a system with a zero leading pivot; the unguarded elimination propagates
/// non-finite values through it without raising any error
pub fn zero_pivot_system() -> LinearSystem {
    LinearSystem::new(2, vec![0., 1., 1., 1.], vec![1., 2.])
}

/// a system whose sub-diagonal entries differ in scale from row to row; a constant
/// per-step row multiplier cannot eliminate it correctly, so it distinguishes the
/// textbook elimination from a degenerate one
pub fn row_scaled_system() -> (LinearSystem, Vec<Scalar>) {
    // x = [1, 2, 3]
    let matrix = vec![
        2., 1., 1., //
        8., 10., 2., //
        -4., 3., 20., //
    ];
    let solution: Vec<Scalar> = vec![1., 2., 3.];
    let mut rhs = vec![0.; 3];
    for i in 0..3 {
        for j in 0..3 {
            rhs[i] += matrix[i * 3 + j] * solution[j];
        }
    }
    (LinearSystem::new(3, matrix, rhs), solution)
}
