//! Distributed Solver
//!
//! The distributed-memory Gaussian elimination core. The matrix is partitioned by
//! columns across a fixed group of ranks (`owner(j) = j mod rank_num`); rank 0 is the
//! coordinator that reads the full system, distributes each rank's column block, and
//! reassembles the eliminated matrix for back-substitution. During elimination only
//! the pivot row, the pivot scalars and the sub-diagonal pivot column cross rank
//! boundaries, once per step, through the gather/broadcast protocol of
//! [`eliminate`]. No rank shares memory with another: the replicated right-hand side
//! stays consistent purely because every rank applies the identical broadcast-driven
//! update sequence.
//!

use super::messaging::*;
use super::solver::*;
use super::util::*;
use crate::derivative::Derivative;
use serde::{Deserialize, Serialize};

/// the columns a rank owns, stored as a dense N x localCols block; the flat row-major
/// buffer is exactly the wire format of the distribution and collection stages
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct LocalBlock {
    /// the number of rows, always the full dimension
    pub dimension: usize,
    /// the owned global column indices, in ascending order
    pub columns: Vec<ColumnIndex>,
    /// row-major values, `values[row * columns.len() + local]` is row `row` of the
    /// `local`-th owned column
    #[derivative(Debug = "ignore")]
    values: Vec<Scalar>,
}

impl LocalBlock {
    pub fn new(dimension: usize, columns: Vec<ColumnIndex>, values: Vec<Scalar>) -> Self {
        assert_eq!(values.len(), dimension * columns.len(), "column data does not match block shape");
        Self { dimension, columns, values }
    }

    /// the coordinator builds its own block directly, without messaging itself
    pub fn from_system(system: &LinearSystem, columns: Vec<ColumnIndex>) -> Self {
        let mut values = Vec::with_capacity(system.dimension * columns.len());
        for row in 0..system.dimension {
            for column in columns.iter() {
                values.push(system.entry(row, *column));
            }
        }
        Self::new(system.dimension, columns, values)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn get(&self, row: RowIndex, local: usize) -> Scalar {
        self.values[row * self.columns.len() + local]
    }

    pub fn set(&mut self, row: RowIndex, local: usize, value: Scalar) {
        self.values[row * self.columns.len() + local] = value;
    }

    /// one row of the block, restricted to the owned columns
    pub fn row_values(&self, row: RowIndex) -> Vec<Scalar> {
        self.values[row * self.columns.len()..(row + 1) * self.columns.len()].to_vec()
    }

    /// the flat buffer in wire format
    pub fn flat_values(&self) -> Vec<Scalar> {
        self.values.clone()
    }
}

/// the per-rank entry point: every cooperating participant calls this once with its
/// own communicator; only the coordinator passes the system and receives the solution.
/// An external launcher running one OS process per rank can drive this directly with
/// its own [`Communicator`] implementation.
pub fn solve_rank<C: Communicator>(comm: &C, system: Option<&LinearSystem>) -> Option<Vec<Scalar>> {
    let rank = comm.rank();
    let size = comm.size();
    if rank == COORDINATOR {
        let system = system.expect("the coordinator must provide the full system");
        // fail fast on inconsistent input, strictly before any communication
        system.sanity_check().expect("invalid linear system");
    } else {
        assert!(system.is_none(), "only the coordinator may provide the full system");
    }
    // broadcast the dimension and the full right-hand side; afterwards every rank
    // holds its own replica of the rhs, updated redundantly in lockstep
    let dimension = comm
        .broadcast(
            COORDINATOR,
            MessageTag::Dimension,
            STEP_DISTRIBUTION,
            system.map(|system| Payload::Count(system.dimension)),
        )
        .into_count();
    let mut rhs = comm
        .broadcast(
            COORDINATOR,
            MessageTag::RightHandSide,
            STEP_DISTRIBUTION,
            system.map(|system| Payload::Values(system.rhs.clone())),
        )
        .into_values();
    let partition = ColumnPartition::new(dimension, size);
    let mut block = if rank == COORDINATOR {
        distribute_columns(comm, system.expect("checked above"), &partition)
    } else {
        receive_columns(comm, &partition)
    };
    comm.barrier();
    eliminate(comm, &partition, &mut block, &mut rhs);
    comm.barrier();
    let solution = if rank == COORDINATOR {
        let matrix = collect_columns(comm, &partition, &block);
        Some(back_substitute(dimension, &matrix, &rhs))
    } else {
        return_columns(comm, &block);
        None
    };
    comm.barrier();
    solution
}

/// distribution stage on the coordinator: send every worker its owned column count,
/// column-index list and flat column data, then build the coordinator's own block
fn distribute_columns<C: Communicator>(comm: &C, system: &LinearSystem, partition: &ColumnPartition) -> LocalBlock {
    for destination in 0..comm.size() {
        if destination == COORDINATOR {
            continue;
        }
        let columns = partition.owned_columns(destination);
        let block = LocalBlock::from_system(system, columns.clone());
        comm.send(
            destination,
            MessageTag::ColumnCount,
            STEP_DISTRIBUTION,
            Payload::Count(columns.len()),
        );
        comm.send(
            destination,
            MessageTag::ColumnIndices,
            STEP_DISTRIBUTION,
            Payload::Indices(columns),
        );
        comm.send(
            destination,
            MessageTag::ColumnData,
            STEP_DISTRIBUTION,
            Payload::Values(block.flat_values()),
        );
    }
    LocalBlock::from_system(system, partition.owned_columns(COORDINATOR))
}

/// distribution stage on a worker: receive the owned block and cross-check it against
/// the locally computed partition
fn receive_columns<C: Communicator>(comm: &C, partition: &ColumnPartition) -> LocalBlock {
    let count = comm.recv(COORDINATOR, MessageTag::ColumnCount, STEP_DISTRIBUTION).into_count();
    let columns = comm
        .recv(COORDINATOR, MessageTag::ColumnIndices, STEP_DISTRIBUTION)
        .into_indices();
    assert_eq!(columns.len(), count, "column count does not match the index list");
    assert_eq!(
        columns,
        partition.owned_columns(comm.rank()),
        "distribution disagrees with the locally computed partition"
    );
    let values = comm.recv(COORDINATOR, MessageTag::ColumnData, STEP_DISTRIBUTION).into_values();
    LocalBlock::new(partition.dimension, columns, values)
}

/// the N sequential elimination steps; every rank, even one owning no column, takes
/// part in every gather, broadcast and barrier, otherwise the collectives deadlock
fn eliminate<C: Communicator>(comm: &C, partition: &ColumnPartition, block: &mut LocalBlock, rhs: &mut [Scalar]) {
    let rank = comm.rank();
    let size = comm.size();
    let dimension = partition.dimension;
    for k in 0..dimension {
        let owner = partition.owner(k);
        // gather: the owner assembles the full pivot row from every rank's owned slice
        let mut owner_payloads: Option<(Vec<Scalar>, Vec<Scalar>)> = None;
        if rank == owner {
            let local_k = partition.local_index(k);
            assert_eq!(block.columns[local_k], k, "pivot column {} not found on its owner", k);
            let mut pivot_row = vec![0.; dimension];
            for (local, column) in block.columns.iter().enumerate() {
                pivot_row[*column] = block.get(k, local);
            }
            for source in 0..size {
                if source == rank {
                    continue;
                }
                // one receive set per rank per step, in any arrival order
                let count = comm.recv(source, MessageTag::PivotColumnCount, k).into_count();
                let indices = comm.recv(source, MessageTag::PivotColumnIndices, k).into_indices();
                assert_eq!(indices.len(), count, "gather column count mismatch from rank {}", source);
                let values = comm.recv(source, MessageTag::PivotRowValues, k).into_values();
                assert_eq!(values.len(), count, "gather value count mismatch from rank {}", source);
                for (column, value) in indices.iter().zip(values.iter()) {
                    pivot_row[*column] = *value;
                }
            }
            // the owner is the sole holder of pivot column k: extract its sub-diagonal
            // part so every rank can form its row-dependent multiplier A[i][k] / A[k][k]
            let pivot_column_below: Vec<Scalar> = ((k + 1)..dimension).map(|row| block.get(row, local_k)).collect();
            owner_payloads = Some((pivot_row, pivot_column_below));
        } else {
            comm.send(owner, MessageTag::PivotColumnCount, k, Payload::Count(block.column_count()));
            comm.send(owner, MessageTag::PivotColumnIndices, k, Payload::Indices(block.columns.clone()));
            comm.send(owner, MessageTag::PivotRowValues, k, Payload::Values(block.row_values(k)));
        }
        comm.barrier();
        // broadcast the assembled pivot row, the pivot scalars and the pivot column
        let (pivot_row_payload, pivot_column_payload) = match owner_payloads {
            Some((pivot_row, pivot_column_below)) => {
                (Some(Payload::Values(pivot_row)), Some(Payload::Values(pivot_column_below)))
            }
            None => (None, None),
        };
        let pivot_row = comm.broadcast(owner, MessageTag::PivotRow, k, pivot_row_payload).into_values();
        let pivot_value = comm
            .broadcast(
                owner,
                MessageTag::PivotValue,
                k,
                (rank == owner).then(|| Payload::Scalar(pivot_row[k])),
            )
            .into_scalar();
        let rhs_entry = comm
            .broadcast(
                owner,
                MessageTag::RhsEntry,
                k,
                (rank == owner).then(|| Payload::Scalar(rhs[k])),
            )
            .into_scalar();
        let pivot_column_below = comm
            .broadcast(owner, MessageTag::PivotColumnBelow, k, pivot_column_payload)
            .into_values();
        // local update: owned columns and the replicated rhs, all rows below the pivot
        for row in (k + 1)..dimension {
            let factor = pivot_column_below[row - k - 1] / pivot_value;
            for local in 0..block.column_count() {
                let column = block.columns[local];
                let value = block.get(row, local) - factor * pivot_row[column];
                block.set(row, local, value);
            }
            rhs[row] -= factor * rhs_entry;
        }
        comm.barrier();
    }
}

/// collection stage on the coordinator: reassemble the full eliminated matrix from
/// every rank's final block, using the same index mapping as the distribution
fn collect_columns<C: Communicator>(comm: &C, partition: &ColumnPartition, block: &LocalBlock) -> Vec<Scalar> {
    let dimension = partition.dimension;
    let mut matrix = vec![0.; dimension * dimension];
    let mut scatter = |columns: &[ColumnIndex], values: &[Scalar]| {
        for row in 0..dimension {
            for (local, column) in columns.iter().enumerate() {
                matrix[row * dimension + column] = values[row * columns.len() + local];
            }
        }
    };
    scatter(&block.columns, &block.flat_values());
    for source in 0..comm.size() {
        if source == COORDINATOR {
            continue;
        }
        let count = comm.recv(source, MessageTag::ResultColumnCount, STEP_COLLECTION).into_count();
        let columns = comm
            .recv(source, MessageTag::ResultColumnIndices, STEP_COLLECTION)
            .into_indices();
        assert_eq!(columns.len(), count, "result column count mismatch from rank {}", source);
        let values = comm.recv(source, MessageTag::ResultColumnData, STEP_COLLECTION).into_values();
        assert_eq!(values.len(), dimension * count, "result data shape mismatch from rank {}", source);
        scatter(&columns, &values);
    }
    matrix
}

/// collection stage on a worker
fn return_columns<C: Communicator>(comm: &C, block: &LocalBlock) {
    comm.send(
        COORDINATOR,
        MessageTag::ResultColumnCount,
        STEP_COLLECTION,
        Payload::Count(block.column_count()),
    );
    comm.send(
        COORDINATOR,
        MessageTag::ResultColumnIndices,
        STEP_COLLECTION,
        Payload::Indices(block.columns.clone()),
    );
    comm.send(
        COORDINATOR,
        MessageTag::ResultColumnData,
        STEP_COLLECTION,
        Payload::Values(block.flat_values()),
    );
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SolverDistributedConfig {
    /// the number of cooperating ranks, coordinator included
    #[serde(default = "solver_distributed_default_configs::rank_num")]
    pub rank_num: usize,
}

pub mod solver_distributed_default_configs {
    pub fn rank_num() -> usize { 1 }  // by default a single rank does everything
}

/// runs the full protocol on a [`LocalCluster`], one thread per rank; the coordinator
/// runs on the calling thread and returns the solution
#[derive(Debug, Clone)]
pub struct SolverDistributed {
    pub config: SolverDistributedConfig,
}

impl SolverDistributed {
    pub fn new(rank_num: usize) -> Self {
        assert!(rank_num > 0, "at least one rank required");
        Self::new_config(SolverDistributedConfig { rank_num })
    }

    pub fn new_config(config: SolverDistributedConfig) -> Self {
        assert!(config.rank_num > 0, "at least one rank required");
        Self { config }
    }
}

impl EliminationSolver for SolverDistributed {
    fn name(&self) -> String {
        format!("distributed-{}", self.config.rank_num)
    }

    fn solve(&mut self, system: &LinearSystem) -> Vec<Scalar> {
        let cluster = LocalCluster::new(self.config.rank_num);
        std::thread::scope(|scope| {
            let mut workers = vec![];
            for rank in 1..self.config.rank_num {
                let channel = cluster.channel(rank);
                workers.push(scope.spawn(move || {
                    solve_rank(&channel, None);
                }));
            }
            let coordinator_channel = cluster.channel(COORDINATOR);
            let solution = solve_rank(&coordinator_channel, Some(system)).expect("the coordinator produces the solution");
            for worker in workers {
                worker.join().expect("worker rank panicked");
            }
            solution
        })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use super::super::example_systems::*;
    use super::super::solver_serial::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    pub fn solve_with_ranks(system: &LinearSystem, rank_num: usize) -> Vec<Scalar> {
        SolverDistributed::new(rank_num).solve(system)
    }

    /// A = [[4,1],[1,3]], b = [1,2]: x = [1/11, 7/11], with one and with two ranks
    #[test]
    fn solver_distributed_scenario_1() {
        // cargo test solver_distributed_scenario_1 -- --nocapture
        let system = LinearSystem::new(2, vec![4., 1., 1., 3.], vec![1., 2.]);
        for rank_num in [1, 2] {
            let solution = solve_with_ranks(&system, rank_num);
            assert!((solution[0] - 0.0909090909090909).abs() < 1e-6, "x0 = {} with {} ranks", solution[0], rank_num);
            assert!((solution[1] - 0.6363636363636364).abs() < 1e-6, "x1 = {} with {} ranks", solution[1], rank_num);
        }
    }

    /// solving a fixed system with 1, 2 and 4 ranks yields identical solutions
    #[test]
    fn solver_distributed_rank_count_invariance_1() {
        // cargo test solver_distributed_rank_count_invariance_1 -- --nocapture
        let system = random_diagonally_dominant_system(10, 5);
        let reference = solve_with_ranks(&system, 1);
        for rank_num in [2, 4] {
            let solution = solve_with_ranks(&system, rank_num);
            for (a, b) in reference.iter().zip(solution.iter()) {
                assert!((a - b).abs() < 1e-9, "solutions diverge with {} ranks: {} vs {}", rank_num, a, b);
            }
        }
    }

    /// more ranks than columns: empty ranks still take part in every collective
    #[test]
    fn solver_distributed_degenerate_size_1() {
        // cargo test solver_distributed_degenerate_size_1 -- --nocapture
        let system = LinearSystem::new(2, vec![4., 1., 1., 3.], vec![1., 2.]);
        let solution = solve_with_ranks(&system, 4);
        assert!(system.residual_infinity_norm(&solution) < 1e-6);
    }

    /// every owned column of a block is rewritten in place during the update loop:
    /// with 2 ranks and dimension 6, each rank updates 3 columns per step
    #[test]
    fn solver_distributed_multi_column_update_1() {
        // cargo test solver_distributed_multi_column_update_1 -- --nocapture
        let system = random_diagonally_dominant_system(6, 21);
        let serial_solution = SolverSerial::new().solve(&system);
        let distributed_solution = solve_with_ranks(&system, 2);
        for (a, b) in serial_solution.iter().zip(distributed_solution.iter()) {
            assert!((a - b).abs() < 1e-9, "solutions diverge: {} vs {}", a, b);
        }
        assert!(system.residual_infinity_norm(&distributed_solution) < 1e-6);
    }

    /// agrees with the serial baseline across dimensions and rank counts
    #[test]
    fn solver_distributed_cross_check_1() {
        // cargo test solver_distributed_cross_check_1 -- --nocapture
        for (seed, dimension, rank_num) in [(10, 1, 1), (11, 5, 2), (12, 12, 3), (13, 25, 4)] {
            let system = random_diagonally_dominant_system(dimension, seed);
            let serial_solution = SolverSerial::new().solve(&system);
            let distributed_solution = solve_with_ranks(&system, rank_num);
            for (a, b) in serial_solution.iter().zip(distributed_solution.iter()) {
                assert!((a - b).abs() < 1e-9, "solutions diverge: {} vs {}", a, b);
            }
        }
    }

    /// rows whose sub-diagonal entries differ in scale require the row-dependent
    /// multiplier A[i][k] / A[k][k]; a constant per-step multiplier fails this system
    #[test]
    fn solver_distributed_row_dependent_multiplier_regression_1() {
        // cargo test solver_distributed_row_dependent_multiplier_regression_1 -- --nocapture
        let (system, expected) = row_scaled_system();
        for rank_num in [1, 2, 3] {
            let solution = solve_with_ranks(&system, rank_num);
            assert!(
                system.residual_infinity_norm(&solution) < 1e-6,
                "residual too large with {} ranks: {:?}",
                rank_num,
                solution
            );
            for (value, expected_value) in solution.iter().zip(expected.iter()) {
                assert!((value - expected_value).abs() < 1e-9);
            }
        }
    }

    /// a zero pivot propagates non-finite values through the protocol without deadlock
    #[test]
    fn solver_distributed_zero_pivot_1() {
        // cargo test solver_distributed_zero_pivot_1 -- --nocapture
        let system = zero_pivot_system();
        let solution = solve_with_ranks(&system, 2);
        assert!(solution.iter().any(|value| !value.is_finite()), "expected non-finite components, got {:?}", solution);
    }

    /// a communicator wrapper that counts cross-rank gather messages
    struct InstrumentedChannel {
        inner: RankChannel,
        gather_sends: Arc<AtomicUsize>,
    }

    impl Communicator for InstrumentedChannel {
        fn rank(&self) -> RankIndex {
            self.inner.rank()
        }
        fn size(&self) -> usize {
            self.inner.size()
        }
        fn send(&self, destination: RankIndex, tag: MessageTag, step: usize, payload: Payload) {
            if tag == MessageTag::PivotRowValues {
                self.gather_sends.fetch_add(1, Ordering::SeqCst);
            }
            self.inner.send(destination, tag, step, payload);
        }
        fn recv(&self, source: RankIndex, tag: MessageTag, step: usize) -> Payload {
            self.inner.recv(source, tag, step)
        }
        fn barrier(&self) {
            self.inner.barrier();
        }
    }

    /// with two ranks, every elimination step crosses the rank boundary exactly once
    /// during the gather
    #[test]
    fn solver_distributed_cross_rank_gather_1() {
        // cargo test solver_distributed_cross_rank_gather_1 -- --nocapture
        let system = LinearSystem::new(2, vec![4., 1., 1., 3.], vec![1., 2.]);
        let rank_num = 2;
        let gather_sends = Arc::new(AtomicUsize::new(0));
        let cluster = LocalCluster::new(rank_num);
        let solution = std::thread::scope(|scope| {
            let worker_channel = InstrumentedChannel {
                inner: cluster.channel(1),
                gather_sends: Arc::clone(&gather_sends),
            };
            let worker = scope.spawn(move || {
                solve_rank(&worker_channel, None);
            });
            let coordinator_channel = InstrumentedChannel {
                inner: cluster.channel(COORDINATOR),
                gather_sends: Arc::clone(&gather_sends),
            };
            let solution = solve_rank(&coordinator_channel, Some(&system)).unwrap();
            worker.join().unwrap();
            solution
        });
        assert!(system.residual_infinity_norm(&solution) < 1e-6);
        // one non-owner gather send per elimination step
        assert_eq!(
            gather_sends.load(Ordering::SeqCst),
            system.dimension * (rank_num - 1),
            "expected a cross-rank gather on every elimination step"
        );
    }

    /// end to end through the file interface: read the folder, solve, write X.txt
    #[test]
    fn solver_distributed_file_round_trip_1() {
        // cargo test solver_distributed_file_round_trip_1 -- --nocapture
        let folder = std::env::temp_dir().join("gauss_cyclic_solver_distributed_file_round_trip_1");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("A.txt"), "4 1\n1 3\n").unwrap();
        std::fs::write(folder.join("B.txt"), "1\n2\n").unwrap();
        let system = LinearSystem::read_from_folder(&folder).unwrap();
        let solution = solve_with_ranks(&system, 2);
        let solution_path = folder.join("X.txt");
        LinearSystem::write_solution(&solution_path, &solution).unwrap();
        let reread = read_vector_file(&solution_path).unwrap();
        assert_eq!(solution, reread, "solution file must round trip exactly");
    }
}
