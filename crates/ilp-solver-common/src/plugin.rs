//! Harness for worker binaries.
//!
//! Provides common infrastructure for worker executables, eliminating
//! boilerplate for tracing setup, shared memory handling, and mapping
//! failures to exit codes.
//!
//! # Usage
//!
//! ```rust,ignore
//! use ilp_solver_common::plugin::run_solver_plugin;
//!
//! fn main() {
//!     run_solver_plugin(MyBackend);
//! }
//! ```
//!
//! The worker is started as `<worker> <shared memory name>`.

use crate::backend::{check_start_solution, BackendError, SolverBackend};
use crate::channel::{CommunicationChild, SolutionSink};
use crate::error::{ExitCode, SolverError};
use crate::problem::IlpDataView;
use crate::solution::IlpSolutionData;
use anyhow::{anyhow, Context, Result};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info, warn};

/// Run a worker with the standard harness.
///
/// This function:
/// 1. Initializes tracing (respects `RUST_LOG` environment variable)
/// 2. Checks that exactly one argument (the shared memory name) was given
/// 3. Reads the problem from shared memory
/// 4. Calls `backend.solve()`, writing each improving solution back
/// 5. Writes the final solution with CPU time and peak memory
/// 6. Exits with the matching [`ExitCode`]
pub fn run_solver_plugin<B: SolverBackend>(backend: B) -> ! {
    // Initialize tracing to stderr (respects RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(io::stderr)
        .init();

    info!("{} v{}", backend.name(), env!("CARGO_PKG_VERSION"));

    let args: Vec<String> = std::env::args().skip(1).collect();
    let exit_code = run_worker(&backend, &args);
    std::process::exit(exit_code.code());
}

/// The harness without process setup and exit.
pub fn run_worker<B: SolverBackend + ?Sized>(backend: &B, args: &[String]) -> ExitCode {
    let [name] = args else {
        error!("Expected the shared memory name as the only argument, got {} arguments", args.len());
        return ExitCode::CommandLineError;
    };

    match run_worker_inner(backend, name) {
        Ok(()) => ExitCode::Ok,
        Err(e) => {
            let exit_code = exit_code_for(&e);
            error!("Worker error ({}): {:?}", exit_code, e);
            exit_code
        }
    }
}

fn run_worker_inner<B: SolverBackend + ?Sized>(backend: &B, name: &str) -> Result<()> {
    let mut channel = CommunicationChild::open(name)
        .with_context(|| format!("Failed to open shared memory {}", name))?;
    let (problem, mut sink) = channel
        .read_problem()
        .context("Failed to read problem from shared memory")?;

    info!(
        "Problem: {} variables, {} constraints, sense {:?}",
        problem.num_cols(),
        problem.num_rows(),
        problem.objective_sense
    );

    problem
        .validate()
        .map_err(|e| BackendError::Model(e.to_string()))
        .context("Invalid problem")?;
    check_start_solution(&problem)?;

    let solution = solve_into(backend, &problem, &mut sink)?;
    info!(
        "Solution written: status={}, objective={:.6}, cpu={:.3}s",
        solution.status, solution.objective, solution.cpu_time_sec
    );
    Ok(())
}

/// Solve and write interim and final solutions into `sink`.
pub fn solve_into<B: SolverBackend + ?Sized>(
    backend: &B,
    problem: &IlpDataView<'_>,
    sink: &mut SolutionSink<'_>,
) -> Result<IlpSolutionData> {
    let sense = problem.objective_sense;
    let mut best = IlpSolutionData::new(sense);

    let outcome = {
        let mut on_improved = |candidate: &IlpSolutionData| {
            if !candidate.is_better_than(&best, sense) {
                return;
            }
            best = candidate.clone();
            record_usage(&mut best);
            match sink.write(&best) {
                Ok(()) => debug!("Interim solution written: objective={:.6}", best.objective),
                Err(e) => warn!("Failed to write interim solution: {}", e),
            }
        };
        panic::catch_unwind(AssertUnwindSafe(|| backend.solve(problem, &mut on_improved)))
    };

    let mut solution = match outcome {
        Ok(result) => result?,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            return Err(anyhow!(BackendError::Solver(message))).context("Solver panicked");
        }
    };

    record_usage(&mut solution);
    sink.write(&solution).context("Failed to write solution")?;
    Ok(solution)
}

/// Exit code reported for a harness error.
pub fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    if let Some(e) = err.downcast_ref::<BackendError>() {
        return e.exit_code();
    }
    match err.downcast_ref::<SolverError>() {
        Some(SolverError::Transport(_)) | Some(SolverError::Io(_)) => ExitCode::SharedMemoryError,
        Some(SolverError::Model(_)) => ExitCode::ModelError,
        Some(SolverError::InvalidStartSolution(_)) => ExitCode::InvalidStartSolution,
        _ => ExitCode::SolverError,
    }
}

/// Resources used by the current process so far.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceUsage {
    /// User plus system CPU time in seconds.
    pub cpu_time_sec: f64,
    /// Maximum resident set size in bytes.
    pub peak_memory: u64,
}

impl ResourceUsage {
    /// Uses `getrusage()`; zero where unavailable.
    #[cfg(unix)]
    pub fn current() -> Self {
        use nix::sys::resource::{getrusage, UsageWho};

        match getrusage(UsageWho::RUSAGE_SELF) {
            Ok(usage) => {
                let seconds = |t: nix::sys::time::TimeVal| t.tv_sec() as f64 + t.tv_usec() as f64 * 1e-6;
                let max_rss = usage.max_rss().max(0) as u64;

                #[cfg(target_os = "macos")]
                // macOS: max_rss is in bytes
                let peak_memory = max_rss;

                #[cfg(not(target_os = "macos"))]
                // Linux: max_rss is in kilobytes
                let peak_memory = max_rss * 1024;

                Self {
                    cpu_time_sec: seconds(usage.user_time()) + seconds(usage.system_time()),
                    peak_memory,
                }
            }
            Err(_) => Self::default(),
        }
    }

    #[cfg(not(unix))]
    pub fn current() -> Self {
        Self::default()
    }
}

fn record_usage(solution: &mut IlpSolutionData) {
    let usage = ResourceUsage::current();
    solution.cpu_time_sec = usage.cpu_time_sec;
    solution.peak_memory = usage.peak_memory;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encoded_len, read_sealed, sealed_len, AlignedBuffer};
    use crate::problem::{IlpData, ObjectiveSense, VariableType};
    use crate::solution::SolutionStatus;

    /// Reports a fixed list of solutions, then returns the last one or fails.
    struct Scripted {
        objectives: Vec<f64>,
        fail: Option<BackendError>,
        panic: bool,
    }

    impl SolverBackend for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn solve(
            &self,
            problem: &IlpDataView<'_>,
            on_improved: &mut dyn FnMut(&IlpSolutionData),
        ) -> Result<IlpSolutionData, BackendError> {
            let mut last = IlpSolutionData::new(problem.objective_sense);
            for &objective in &self.objectives {
                last = IlpSolutionData {
                    status: SolutionStatus::Suboptimal,
                    objective,
                    solution: vec![objective; problem.num_cols()],
                    ..IlpSolutionData::new(problem.objective_sense)
                };
                on_improved(&last);
            }
            if self.panic {
                panic!("backend exploded");
            }
            match &self.fail {
                Some(e) => Err(e.clone()),
                None => Ok(IlpSolutionData {
                    status: SolutionStatus::ProvenOptimal,
                    ..last
                }),
            }
        }
    }

    fn problem() -> IlpData {
        let mut data = IlpData::new();
        data.add_variable(VariableType::Integer, 1.0, 0.0, 10.0, &[], &[]).unwrap();
        data.objective_sense = ObjectiveSense::Maximize;
        data
    }

    fn region(data: &IlpData) -> AlignedBuffer {
        let worst = IlpSolutionData::worst_case(data.num_cols(), data.num_rows());
        AlignedBuffer::zeroed(sealed_len(encoded_len(&worst).unwrap()))
    }

    #[test]
    fn test_final_solution_written_with_usage() {
        let data = problem();
        let mut buf = region(&data);
        let backend = Scripted {
            objectives: vec![1.0, 4.0],
            fail: None,
            panic: false,
        };

        let mut sink = SolutionSink::new(buf.as_mut_slice());
        let solution = solve_into(&backend, &data.as_view(), &mut sink).unwrap();
        assert_eq!(sink.writes(), 3);
        assert_eq!(solution.status, SolutionStatus::ProvenOptimal);
        assert!(solution.cpu_time_sec >= 0.0);

        let written: IlpSolutionData = read_sealed(buf.as_slice()).unwrap();
        assert_eq!(written.objective, 4.0);
        assert_eq!(written.status, SolutionStatus::ProvenOptimal);
    }

    #[test]
    fn test_non_improving_interim_is_skipped() {
        let data = problem();
        let mut buf = region(&data);
        let backend = Scripted {
            objectives: vec![5.0, 3.0, 5.0],
            fail: Some(BackendError::OutOfMemory),
            panic: false,
        };

        let mut sink = SolutionSink::new(buf.as_mut_slice());
        let err = solve_into(&backend, &data.as_view(), &mut sink).unwrap_err();
        assert_eq!(exit_code_for(&err), ExitCode::OutOfMemory);
        assert_eq!(sink.writes(), 1);

        // The interim result survives the failure
        let written: IlpSolutionData = read_sealed(buf.as_slice()).unwrap();
        assert_eq!(written.objective, 5.0);
        assert_eq!(written.status, SolutionStatus::Suboptimal);
    }

    #[test]
    fn test_panic_becomes_solver_error() {
        let data = problem();
        let mut buf = region(&data);
        let backend = Scripted {
            objectives: vec![2.0],
            fail: None,
            panic: true,
        };

        let mut sink = SolutionSink::new(buf.as_mut_slice());
        let err = solve_into(&backend, &data.as_view(), &mut sink).unwrap_err();
        assert_eq!(exit_code_for(&err), ExitCode::SolverError);
        assert!(format!("{:?}", err).contains("backend exploded"));
    }

    #[test]
    fn test_command_line_is_checked_first() {
        let backend = Scripted {
            objectives: vec![],
            fail: None,
            panic: false,
        };
        assert_eq!(run_worker(&backend, &[]), ExitCode::CommandLineError);
        assert_eq!(
            run_worker(&backend, &["a".to_string(), "b".to_string()]),
            ExitCode::CommandLineError
        );
    }

    #[test]
    fn test_missing_segment_is_shared_memory_error() {
        let backend = Scripted {
            objectives: vec![],
            fail: None,
            panic: false,
        };
        let name = format!("IlpPluginMissing{}", std::process::id());
        assert_eq!(run_worker(&backend, &[name]), ExitCode::SharedMemoryError);
    }

    #[test]
    fn test_error_classification() {
        let err = anyhow!(SolverError::Model("bad".into())).context("outer");
        assert_eq!(exit_code_for(&err), ExitCode::ModelError);
        let err = anyhow!(BackendError::InvalidStartSolution("x".into()));
        assert_eq!(exit_code_for(&err), ExitCode::InvalidStartSolution);
        assert_eq!(exit_code_for(&anyhow!("other")), ExitCode::SolverError);
    }

    #[cfg(unix)]
    #[test]
    fn test_resource_usage_is_measured() {
        let usage = ResourceUsage::current();
        assert!(usage.peak_memory > 0);
        assert!(usage.cpu_time_sec >= 0.0);
    }
}
