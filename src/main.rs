extern crate clap;
extern crate pbr;

use gauss_cyclic::example_systems::*;
use gauss_cyclic::solver::*;
use gauss_cyclic::solver_distributed::SolverDistributed;
use gauss_cyclic::solver_row_parallel::SolverRowParallel;
use gauss_cyclic::solver_serial::SolverSerial;
use gauss_cyclic::util::*;
use pbr::ProgressBar;
use std::path::Path;

fn create_clap_parser<'a>(color_choice: clap::ColorChoice) -> clap::Command<'a> {
    clap::Command::new("Gauss Cyclic")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Distributed-memory Gaussian elimination with column-cyclic partitioning")
        .color(color_choice)
        .propagate_version(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(clap::Command::new("solve")
            .about("solve the system in a folder containing A.txt and B.txt, writing X.txt")
            .arg(clap::Arg::new("folder").help("path to the folder with the input files").takes_value(true).required(true))
            .arg(clap::Arg::new("ranks").long("ranks").short('p').help("the number of cooperating ranks")
                .takes_value(true).default_value("1")))
        .subcommand(clap::Command::new("benchmark")
            .about("time a solver variant on randomly generated diagonally dominant systems")
            .arg(clap::Arg::new("dimension").help("the dimension of the generated systems").takes_value(true).required(true))
            .arg(clap::Arg::new("rounds").long("rounds").short('r').help("the number of systems to solve")
                .takes_value(true).default_value("10"))
            .arg(clap::Arg::new("ranks").long("ranks").short('p').help("the number of cooperating ranks")
                .takes_value(true).default_value("1"))
            .arg(clap::Arg::new("solver_type").long("solver-type").help("one of `serial`, `row-parallel`, `distributed`")
                .takes_value(true).default_value("distributed"))
            .arg(clap::Arg::new("benchmark_profiler_output").long("benchmark-profiler-output")
                .help("write a JSON line per round to this file").takes_value(true)))
        .subcommand(clap::Command::new("test")
            .about("testing features")
            .subcommand_required(true)
            .arg_required_else_help(true)
            .subcommand(clap::Command::new("cross-check")
                .about("test the solver variants against each other on random systems")))
}

/// command-line counts must be positive integers; a zero rank count or dimension is
/// an input error, reported like the other input failures instead of a panic
fn parse_positive(value: &str, name: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err(format!("{} must be a positive integer, got 0", name)),
        Ok(parsed) => Ok(parsed),
        Err(_) => Err(format!("{} must be a positive integer, got {:?}", name, value)),
    }
}

fn parse_positive_or_exit(value: &str, name: &str) -> usize {
    parse_positive(value, name).unwrap_or_else(|error| {
        eprintln!("[error] {}", error);
        std::process::exit(1);
    })
}

fn solver_of_type(solver_type: &str, rank_num: usize) -> Box<dyn EliminationSolver> {
    match solver_type {
        "serial" => Box::new(SolverSerial::new()),
        "row-parallel" => Box::new(SolverRowParallel::new()),
        "distributed" => Box::new(SolverDistributed::new(rank_num)),
        _ => panic!("unknown solver type {}", solver_type),
    }
}

pub fn main() {

    let matches = create_clap_parser(clap::ColorChoice::Auto).get_matches();

    match matches.subcommand() {
        Some(("solve", matches)) => {
            let folder = Path::new(matches.value_of("folder").unwrap());
            let rank_num = parse_positive_or_exit(matches.value_of("ranks").unwrap(), "ranks");
            // input-format errors are fatal before any communication begins
            let system = LinearSystem::read_from_folder(folder).unwrap_or_else(|error| {
                eprintln!("[error] {}", error);
                std::process::exit(1);
            });
            println!("[coordinator] dimension = {}, ranks = {}", system.dimension, rank_num);
            let begin = std::time::Instant::now();
            let solution = SolverDistributed::new(rank_num).solve(&system);
            let elapsed_ms = begin.elapsed().as_secs_f64() * 1000.;
            LinearSystem::write_solution(&folder.join("X.txt"), &solution).unwrap_or_else(|error| {
                eprintln!("[error] {}", error);
                std::process::exit(1);
            });
            println!("==============================================");
            println!("  matrix size: {0}x{0}", system.dimension);
            println!("  ranks: {}", rank_num);
            println!("  residual: {:.3e}", system.residual_infinity_norm(&solution));
            println!("  time: {:.3} ms", elapsed_ms);
            println!("==============================================");
        },
        Some(("benchmark", matches)) => {
            let dimension = parse_positive_or_exit(matches.value_of("dimension").unwrap(), "dimension");
            let rounds = parse_positive_or_exit(matches.value_of("rounds").unwrap(), "rounds") as u64;
            let rank_num = parse_positive_or_exit(matches.value_of("ranks").unwrap(), "ranks");
            let solver_type = matches.value_of("solver_type").unwrap();
            let benchmark_profiler_output = matches.value_of("benchmark_profiler_output").map(|value| value.to_string());
            let mut solver = solver_of_type(solver_type, rank_num);
            let mut profiler = BenchmarkProfiler::new(benchmark_profiler_output);
            let mut pb = ProgressBar::on(std::io::stderr(), rounds);
            pb.message(format!("{} {dimension}x{dimension} ", solver.name()).as_str());
            for round in 0..rounds {
                pb.set(round);
                let system = random_diagonally_dominant_system(dimension, round);
                profiler.begin(solver.name(), dimension);
                let solution = solver.solve(&system);
                profiler.end(Some(system.residual_infinity_norm(&solution)));
            }
            pb.finish();
            println!();
            println!("{}", profiler.brief());
        },
        Some(("test", matches)) => {
            match matches.subcommand() {
                Some(("cross-check", _)) => {
                    let total_rounds = 100;
                    let mut pb = ProgressBar::on(std::io::stderr(), total_rounds);
                    for round in 0..total_rounds {
                        pb.set(round);
                        let dimension = 1 + (round as usize % 30);
                        let (system, expected) = known_solution_system(dimension, round);
                        let serial_solution = SolverSerial::new().solve(&system);
                        let row_parallel_solution = SolverRowParallel::new().solve(&system);
                        for rank_num in [1, 2, 4] {
                            let distributed_solution = SolverDistributed::new(rank_num).solve(&system);
                            for i in 0..dimension {
                                assert!((distributed_solution[i] - serial_solution[i]).abs() < 1e-9,
                                    "distributed-{} and serial diverge at {}", rank_num, i);
                                assert!((distributed_solution[i] - row_parallel_solution[i]).abs() < 1e-9,
                                    "distributed-{} and row-parallel diverge at {}", rank_num, i);
                                assert!((distributed_solution[i] - expected[i]).abs() < 1e-6,
                                    "unexpected solution component at {}", i);
                            }
                        }
                    }
                    pb.finish();
                    println!();
                    println!("cross-check passed");
                },
                _ => unreachable!()
            }
        },
        _ => unreachable!()
    }

}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// zero, negative or unparsable counts are rejected as input errors before any solver runs
    #[test]
    fn main_parse_positive_1() {
        // cargo test main_parse_positive_1 -- --nocapture
        assert_eq!(parse_positive("4", "ranks"), Ok(4));
        assert_eq!(parse_positive("1", "ranks"), Ok(1));
        assert!(parse_positive("0", "ranks").is_err());
        assert!(parse_positive("-1", "ranks").is_err());
        assert!(parse_positive("two", "ranks").is_err());
        assert!(parse_positive("", "dimension").is_err());
    }
}
