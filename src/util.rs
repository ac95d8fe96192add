//! Common Utilities
//!
//! This module contains the scalar/index type definitions, the dense [`LinearSystem`]
//! with its plain-text file format, the column-cyclic [`ColumnPartition`] and a small
//! benchmark profiler shared by the command-line tool.
//!

use crate::chrono::Local;
use crate::rand_xoshiro::rand_core::RngCore;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::time::Instant;

cfg_if::cfg_if! {
    if #[cfg(feature="f32_scalar")] {
        /// use f32 to store matrix entries, to save memory by half
        pub type Scalar = f32;
    } else {
        pub type Scalar = f64;
    }
}

/// the integer identity of a process within the cooperating group, 0 <= rank < rank_num
pub type RankIndex = usize;
/// the global column index in the full matrix
pub type ColumnIndex = usize;
/// the global row index in the full matrix
pub type RowIndex = usize;

/// rank 0 reads the input, distributes the columns and owns the final solution
pub const COORDINATOR: RankIndex = 0;

/// a dense N x N linear system `A x = b`, with the matrix stored row-major
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearSystem {
    /// the number of equations (and unknowns)
    pub dimension: usize,
    /// row-major N x N matrix, `matrix[i * dimension + j]` is the entry at row i, column j
    pub matrix: Vec<Scalar>,
    /// the right-hand-side vector of length N
    pub rhs: Vec<Scalar>,
}

impl LinearSystem {
    pub fn new(dimension: usize, matrix: Vec<Scalar>, rhs: Vec<Scalar>) -> Self {
        let system = Self { dimension, matrix, rhs };
        system.sanity_check().expect("invalid linear system");
        system
    }

    pub fn entry(&self, row: RowIndex, column: ColumnIndex) -> Scalar {
        self.matrix[row * self.dimension + column]
    }

    /// check the dimensions are consistent before any communication happens
    pub fn sanity_check(&self) -> Result<(), String> {
        if self.dimension == 0 {
            return Err("empty system".to_string());
        }
        if self.matrix.len() != self.dimension * self.dimension {
            return Err(format!(
                "matrix is not square: {} entries but dimension {}",
                self.matrix.len(),
                self.dimension
            ));
        }
        if self.rhs.len() != self.dimension {
            return Err(format!(
                "right-hand side length {} does not match dimension {}",
                self.rhs.len(),
                self.dimension
            ));
        }
        Ok(())
    }

    /// read `A.txt` and `B.txt` from a folder; this is the only place input-format
    /// errors can surface, and it runs strictly before the distribution stage
    pub fn read_from_folder(folder: &Path) -> std::io::Result<Self> {
        let matrix_rows = read_matrix_file(&folder.join("A.txt"))?;
        let rhs = read_vector_file(&folder.join("B.txt"))?;
        let dimension = matrix_rows.len();
        if dimension == 0 {
            return Err(invalid_data("matrix file is empty"));
        }
        for (row_index, row) in matrix_rows.iter().enumerate() {
            if row.len() != dimension {
                return Err(invalid_data(format!(
                    "matrix is not square: row {} has {} values, expected {}",
                    row_index,
                    row.len(),
                    dimension
                )));
            }
        }
        if rhs.len() != dimension {
            return Err(invalid_data(format!(
                "vector file does not match matrix size: {} values, expected {}",
                rhs.len(),
                dimension
            )));
        }
        let matrix = matrix_rows.into_iter().flatten().collect();
        Ok(Self { dimension, matrix, rhs })
    }

    /// write the solution vector, one component per line in round-trip-exact decimal text
    pub fn write_solution(path: &Path, solution: &[Scalar]) -> std::io::Result<()> {
        let mut file = File::create(path)?;
        for value in solution.iter() {
            writeln!(file, "{}", value)?;
        }
        Ok(())
    }

    /// the infinity norm of `A x - b`, used to verify a solution
    pub fn residual_infinity_norm(&self, solution: &[Scalar]) -> Scalar {
        assert_eq!(solution.len(), self.dimension, "solution length mismatch");
        let mut norm: Scalar = 0.;
        for i in 0..self.dimension {
            let mut residual = -self.rhs[i];
            for j in 0..self.dimension {
                residual += self.entry(i, j) * solution[j];
            }
            if residual.abs() > norm {
                norm = residual.abs();
            }
        }
        norm
    }
}

fn invalid_data(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

/// read a matrix file: N lines each containing N whitespace-separated values
pub fn read_matrix_file(path: &Path) -> std::io::Result<Vec<Vec<Scalar>>> {
    let file = File::open(path)?;
    let mut rows = Vec::new();
    for (line_index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut row = Vec::new();
        for token in line.split_whitespace() {
            let value: Scalar = token.parse().map_err(|_| {
                invalid_data(format!("unparsable numeric token {:?} at line {}", token, line_index + 1))
            })?;
            row.push(value);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// read a vector file: N lines each containing a single value
pub fn read_vector_file(path: &Path) -> std::io::Result<Vec<Scalar>> {
    let file = File::open(path)?;
    let mut values = Vec::new();
    for (line_index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let token = line.trim();
        if token.is_empty() {
            continue;
        }
        let value: Scalar = token.parse().map_err(|_| {
            invalid_data(format!("unparsable numeric token {:?} at line {}", token, line_index + 1))
        })?;
        values.push(value);
    }
    Ok(values)
}

/// the column-cyclic partition: column j belongs to rank `j mod rank_num`;
/// every rank computes it locally from the dimension and its own rank, no communication
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ColumnPartition {
    /// the number of columns to partition
    pub dimension: usize,
    /// the number of cooperating ranks
    pub rank_num: usize,
}

impl ColumnPartition {
    pub fn new(dimension: usize, rank_num: usize) -> Self {
        assert!(rank_num > 0, "at least one rank required");
        Self { dimension, rank_num }
    }

    /// the rank owning a column; total over all columns
    pub fn owner(&self, column: ColumnIndex) -> RankIndex {
        column % self.rank_num
    }

    /// the ordered list of columns owned by a rank; may be empty when dimension < rank_num
    pub fn owned_columns(&self, rank: RankIndex) -> Vec<ColumnIndex> {
        assert!(rank < self.rank_num, "invalid rank {}", rank);
        (rank..self.dimension).step_by(self.rank_num).collect()
    }

    pub fn local_column_count(&self, rank: RankIndex) -> usize {
        assert!(rank < self.rank_num, "invalid rank {}", rank);
        (self.dimension + self.rank_num - 1 - rank) / self.rank_num
    }

    /// the position of a column inside its owner's block
    pub fn local_index(&self, column: ColumnIndex) -> usize {
        column / self.rank_num
    }
}

#[allow(dead_code)]
/// use Xoshiro256StarStar for deterministic random number generator
pub type DeterministicRng = rand_xoshiro::Xoshiro256StarStar;

pub trait F64Rng {
    fn next_f64(&mut self) -> f64;
}

impl F64Rng for DeterministicRng {
    fn next_f64(&mut self) -> f64 {
        f64::from_bits(0x3FF << 52 | self.next_u64() >> 12) - 1.
    }
}

/// record the solve time of multiple rounds, optionally logging each round as a JSON line
pub struct BenchmarkProfiler {
    /// each record corresponds to a different solved system
    pub records: Vec<BenchmarkProfilerEntry>,
    /// summation of all solve time
    pub sum_round_time: f64,
    /// the file to output the profiler results
    pub benchmark_profiler_output: Option<File>,
}

impl BenchmarkProfiler {
    pub fn new(detail_log_file: Option<String>) -> Self {
        let benchmark_profiler_output = detail_log_file.map(|filename| {
            let mut file = File::create(filename).unwrap();
            file.write_all(
                serde_json::to_string(&json!({
                    "started_at": Local::now().to_rfc3339(),
                }))
                .unwrap()
                .as_bytes(),
            )
            .unwrap();
            file.write_all(b"\n").unwrap();
            file
        });
        Self {
            records: vec![],
            sum_round_time: 0.,
            benchmark_profiler_output,
        }
    }
    /// record the beginning of a solve
    pub fn begin(&mut self, solver_name: String, dimension: usize) {
        // sanity check last entry, if exists, is complete
        if let Some(last_entry) = self.records.last() {
            assert!(
                last_entry.is_complete(),
                "the last benchmark profiler entry is not complete, make sure to call `begin` and `end` in pairs"
            );
        }
        let entry = BenchmarkProfilerEntry::new(solver_name, dimension);
        self.records.push(entry);
        self.records.last_mut().unwrap().record_begin();
    }
    /// record the ending of a solve
    pub fn end(&mut self, residual: Option<Scalar>) {
        let last_entry = self
            .records
            .last_mut()
            .expect("last entry not exists, call `begin` before `end`");
        last_entry.record_end();
        self.sum_round_time += last_entry.round_time.unwrap();
        if let Some(file) = self.benchmark_profiler_output.as_mut() {
            let value = json!({
                "solver": last_entry.solver_name,
                "dimension": last_entry.dimension,
                "round_time": last_entry.round_time.unwrap(),
                "residual": residual,
            });
            file.write_all(serde_json::to_string(&value).unwrap().as_bytes()).unwrap();
            file.write_all(b"\n").unwrap();
        }
    }
    /// print out a brief one-line statistics
    pub fn brief(&self) -> String {
        let average = self.sum_round_time / (self.records.len() as f64);
        format!("rounds: {}, average: {average:.3e}s,", self.records.len())
    }
}

pub struct BenchmarkProfilerEntry {
    /// the solver variant used for this round
    pub solver_name: String,
    /// the dimension of the solved system
    pub dimension: usize,
    /// the time of beginning a solve
    begin_time: Option<Instant>,
    /// interval between calling [`Self::record_begin`] to calling [`Self::record_end`]
    pub round_time: Option<f64>,
}

impl BenchmarkProfilerEntry {
    pub fn new(solver_name: String, dimension: usize) -> Self {
        Self {
            solver_name,
            dimension,
            begin_time: None,
            round_time: None,
        }
    }
    pub fn record_begin(&mut self) {
        assert!(self.begin_time.is_none(), "do not call `record_begin` twice on the same entry");
        self.begin_time = Some(Instant::now());
    }
    pub fn record_end(&mut self) {
        let begin_time = self
            .begin_time
            .as_ref()
            .expect("make sure to call `record_begin` before calling `record_end`");
        self.round_time = Some(begin_time.elapsed().as_secs_f64());
    }
    pub fn is_complete(&self) -> bool {
        self.round_time.is_some()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// the union of owned columns over all ranks covers every column exactly once
    #[test]
    fn util_partition_totality_1() {
        // cargo test util_partition_totality_1 -- --nocapture
        for dimension in [1, 2, 3, 7, 16, 33] {
            for rank_num in [1, 2, 3, 4, 8] {
                let partition = ColumnPartition::new(dimension, rank_num);
                let mut seen = vec![0usize; dimension];
                for rank in 0..rank_num {
                    let columns = partition.owned_columns(rank);
                    assert_eq!(columns.len(), partition.local_column_count(rank));
                    for (local_index, column) in columns.iter().enumerate() {
                        assert_eq!(partition.owner(*column), rank, "column {} owner mismatch", column);
                        assert_eq!(partition.local_index(*column), local_index);
                        seen[*column] += 1;
                    }
                }
                assert!(seen.iter().all(|count| *count == 1), "partition is not a disjoint cover: {seen:?}");
            }
        }
    }

    /// ranks without any owned column are valid when dimension < rank_num
    #[test]
    fn util_partition_empty_ranks_1() {
        // cargo test util_partition_empty_ranks_1 -- --nocapture
        let partition = ColumnPartition::new(2, 4);
        assert_eq!(partition.owned_columns(0), vec![0]);
        assert_eq!(partition.owned_columns(1), vec![1]);
        assert_eq!(partition.owned_columns(2), Vec::<ColumnIndex>::new());
        assert_eq!(partition.owned_columns(3), Vec::<ColumnIndex>::new());
    }

    /// writing then re-reading the solution file reproduces the same floating-point values
    #[test]
    fn util_solution_file_round_trip_1() {
        // cargo test util_solution_file_round_trip_1 -- --nocapture
        let solution: Vec<Scalar> = vec![0.09090909090909091, 0.6363636363636364, -1.5, 3e-17, 12345.6789];
        let path = std::env::temp_dir().join("gauss_cyclic_util_solution_file_round_trip_1.txt");
        LinearSystem::write_solution(&path, &solution).unwrap();
        let reread = read_vector_file(&path).unwrap();
        assert_eq!(solution, reread, "round trip must be exact to full printed precision");
    }

    /// dimension mismatches are reported as fatal input errors before any communication
    #[test]
    fn util_linear_system_sanity_check_1() {
        // cargo test util_linear_system_sanity_check_1 -- --nocapture
        let system = LinearSystem {
            dimension: 2,
            matrix: vec![1., 2., 3., 4.],
            rhs: vec![1., 2.],
        };
        system.sanity_check().unwrap();
        let not_square = LinearSystem {
            dimension: 2,
            matrix: vec![1., 2., 3.],
            rhs: vec![1., 2.],
        };
        assert!(not_square.sanity_check().is_err());
        let rhs_mismatch = LinearSystem {
            dimension: 2,
            matrix: vec![1., 2., 3., 4.],
            rhs: vec![1.],
        };
        assert!(rhs_mismatch.sanity_check().is_err());
    }

    /// input folder with inconsistent files must fail fast
    #[test]
    fn util_read_from_folder_1() {
        // cargo test util_read_from_folder_1 -- --nocapture
        let folder = std::env::temp_dir().join("gauss_cyclic_util_read_from_folder_1");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("A.txt"), "4 1\n1 3\n").unwrap();
        std::fs::write(folder.join("B.txt"), "1\n2\n").unwrap();
        let system = LinearSystem::read_from_folder(&folder).unwrap();
        assert_eq!(system.dimension, 2);
        assert_eq!(system.entry(0, 1), 1.);
        assert_eq!(system.rhs, vec![1., 2.]);
        // non-square matrix
        std::fs::write(folder.join("A.txt"), "4 1 7\n1 3\n").unwrap();
        assert!(LinearSystem::read_from_folder(&folder).is_err());
        // rhs length mismatch
        std::fs::write(folder.join("A.txt"), "4 1\n1 3\n").unwrap();
        std::fs::write(folder.join("B.txt"), "1\n2\n3\n").unwrap();
        assert!(LinearSystem::read_from_folder(&folder).is_err());
        // unparsable token
        std::fs::write(folder.join("B.txt"), "1\nabc\n").unwrap();
        assert!(LinearSystem::read_from_folder(&folder).is_err());
    }
}
