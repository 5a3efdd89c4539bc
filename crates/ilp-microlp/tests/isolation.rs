//! End-to-end tests running the worker binaries through shared memory.

use ilp_microlp::{registry, DIRECT_SOLVER, ISOLATED_SOLVER};
use ilp_solver_common::stub::SolvePhase;
use ilp_solver_common::{
    self_test, ExitCode, IlpSolver, IlpSolverStub, IsolationConfig, ObjectiveSense, SolutionStatus, SolverError,
};
use std::path::PathBuf;
use tempfile::NamedTempFile;

const TOLERANCE: f64 = 1e-4;

fn microlp_worker() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ilp-microlp"))
}

fn scripted_worker() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ilp-scripted-worker"))
}

/// Segment names must not collide between tests running in parallel.
fn config(tag: &str) -> IsolationConfig {
    IsolationConfig {
        shm_base_name: format!("IlpIsolation{}{}_", tag, std::process::id()),
        shm_name_trials: 10,
        absolute_overtime_seconds: 1.0,
        ..IsolationConfig::default()
    }
}

/// max x + y s.t. x + 2y <= 2, 2x + y <= 2, -1 <= x, y <= 1
fn build_reference(solver: &mut dyn IlpSolver) {
    solver.set_max_seconds(10.0);
    solver.add_variable_continuous(1.0, -1.0, 1.0).unwrap();
    solver.add_variable_continuous(1.0, -1.0, 1.0).unwrap();
    solver.add_constraint_upper(&[0, 1], &[1.0, 2.0], 2.0).unwrap();
    solver.add_constraint_upper(&[0, 1], &[2.0, 1.0], 2.0).unwrap();
}

fn assert_reference_optimum(solver: &dyn IlpSolver) {
    let solution = solver.get_solution();
    assert_eq!(solution.len(), 2);
    for value in solution {
        assert!((value - 2.0 / 3.0).abs() < TOLERANCE, "got {}", value);
    }
    assert!((solver.get_objective() - 4.0 / 3.0).abs() < TOLERANCE);
}

fn scripted(script: &str, tag: &str, config_override: Option<IsolationConfig>) -> IlpSolverStub {
    let config = config_override.unwrap_or_else(|| config(tag));
    let mut stub = IlpSolverStub::new(scripted_worker(), config).with_env("ILP_WORKER_SCRIPT", script);
    build_reference(&mut stub);
    stub
}

#[test]
fn test_end_to_end_reference_problem() {
    let mut stub = IlpSolverStub::new(microlp_worker(), config("e2e"));
    build_reference(&mut stub);
    stub.maximize().unwrap();

    assert_eq!(stub.get_status(), SolutionStatus::ProvenOptimal);
    assert_reference_optimum(&stub);
    assert_eq!(stub.external_exit_code(), Some(ExitCode::Ok));
    assert_eq!(stub.phase(), SolvePhase::Done);
    assert!(stub.external_cpu_time() >= 0.0);
    assert!(stub.external_peak_memory() > 0);
}

#[test]
fn test_isolated_matches_direct() {
    let registry = registry(&IsolationConfig {
        worker_path: Some(microlp_worker()),
        ..config("registry")
    });

    let mut results = Vec::new();
    for name in [DIRECT_SOLVER, ISOLATED_SOLVER] {
        let mut solver = registry.create(name).unwrap();
        let a = solver.add_variable_integer(3.0, 0.0, 4.0).unwrap();
        let b = solver.add_variable_integer(2.0, 0.0, 4.0).unwrap();
        solver.add_constraint_upper(&[a, b], &[2.0, 1.0], 7.0).unwrap();
        solver.set_max_seconds(10.0);
        solver.maximize().unwrap();
        assert_eq!(solver.get_status(), SolutionStatus::ProvenOptimal);
        results.push((solver.get_solution(), solver.get_objective()));
    }
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0].1, 12.0);
}

#[test]
fn test_self_test_passes() {
    assert_eq!(self_test(microlp_worker()).unwrap(), ExitCode::Ok);
}

#[test]
fn test_invalid_start_solution_fails() {
    let mut stub = IlpSolverStub::new(microlp_worker(), config("start"));
    build_reference(&mut stub);
    stub.set_start_solution(&[1.0, 1.0]);

    let err = stub.maximize().unwrap_err();
    assert!(matches!(err, SolverError::InvalidStartSolution(_)), "got {:?}", err);
    assert_eq!(stub.external_exit_code(), Some(ExitCode::InvalidStartSolution));
}

#[test]
fn test_infeasible_problem_is_reported() {
    let mut stub = IlpSolverStub::new(microlp_worker(), config("infeasible"));
    build_reference(&mut stub);
    stub.add_constraint_lower(&[0, 1], &[1.0, 1.0], 3.0).unwrap();
    stub.maximize().unwrap();
    assert_eq!(stub.get_status(), SolutionStatus::ProvenInfeasible);
    assert!(stub.get_solution().is_empty());
}

#[test]
fn test_timeout_keeps_interim_solution() {
    let mut stub = scripted("interim-then-hang", "hang", None);
    stub.set_max_seconds(0.5);
    stub.maximize().unwrap();

    assert_eq!(stub.external_exit_code(), Some(ExitCode::ForcedTermination));
    assert_eq!(stub.get_status(), SolutionStatus::Suboptimal);
    assert_reference_optimum(&stub);
}

#[test]
fn test_timeout_fails_when_throwing_on_all_crashes() {
    let config = IsolationConfig {
        throw_on_all_crashes: true,
        ..config("hangthrow")
    };
    let mut stub = scripted("interim-then-hang", "hangthrow", Some(config));
    stub.set_max_seconds(0.5);

    match stub.maximize() {
        Err(SolverError::Worker { exit_code, message }) => {
            assert_eq!(exit_code, ExitCode::ForcedTermination);
            assert!(message.starts_with("Failed solving by timeout."), "got {}", message);
        }
        other => panic!("expected a worker error, got {:?}", other),
    }
    // The interim solution was still read
    assert_eq!(stub.get_status(), SolutionStatus::Suboptimal);
}

#[test]
fn test_abort_is_ignored_silently() {
    let mut stub = scripted("abort", "abort", None);
    stub.maximize().unwrap();
    assert_eq!(stub.external_exit_code(), Some(ExitCode::UncaughtException2));
    assert_eq!(stub.get_status(), SolutionStatus::NoSolution);
}

#[test]
fn test_out_of_memory_is_ignored_silently() {
    let mut stub = scripted("oom", "oom", None);
    stub.maximize().unwrap();
    assert_eq!(stub.external_exit_code(), Some(ExitCode::OutOfMemory));
    assert_eq!(stub.get_status(), SolutionStatus::NoSolution);
}

#[test]
fn test_panic_is_a_solver_error() {
    let mut stub = scripted("panic", "panic", None);
    let err = stub.maximize().unwrap_err();
    assert_eq!(err.exit_code(), Some(ExitCode::SolverError));
}

#[test]
fn test_scripted_exit_codes() {
    for (name, expected) in [
        ("ModelError", ExitCode::ModelError),
        ("SharedMemoryError", ExitCode::SharedMemoryError),
        ("CommandLineError", ExitCode::CommandLineError),
    ] {
        let mut stub = scripted(&format!("exit:{}", name), name, None);
        let err = stub.maximize().unwrap_err();
        assert_eq!(err.exit_code(), Some(expected), "script exit:{}", name);
    }
}

#[test]
fn test_name_collision_is_retried() {
    let config = config("collision");
    let mut first = IlpSolverStub::new(microlp_worker(), config.clone());
    build_reference(&mut first);

    // Hold the first segment name while the stub solves
    let mut holder = ilp_solver_common::channel::CommunicationParent::new(&config);
    let held = holder.write_problem(first.data()).unwrap();
    assert_eq!(held, format!("{}1", config.shm_base_name));

    first.maximize().unwrap();
    assert_reference_optimum(&first);
    assert_eq!(first.channel_name(), Some(format!("{}2", config.shm_base_name).as_str()));
    assert_eq!(holder.name(), Some(held.as_str()));
}

#[test]
fn test_config_file_is_used() {
    let file = NamedTempFile::new().unwrap();
    let saved = IsolationConfig {
        worker_path: Some(microlp_worker()),
        ..config("file")
    };
    saved.save_to(file.path()).unwrap();

    let loaded = IsolationConfig::load_from(file.path()).unwrap();
    assert_eq!(loaded, saved);

    let mut solver = registry(&loaded).create(ISOLATED_SOLVER).unwrap();
    build_reference(solver.as_mut());
    solver.maximize().unwrap();
    assert_reference_optimum(solver.as_ref());
}

#[tokio::test]
async fn test_async_solve() {
    let mut stub = IlpSolverStub::new(microlp_worker(), config("async"));
    build_reference(&mut stub);
    stub.solve_async(ObjectiveSense::Maximize).await.unwrap();

    assert_eq!(stub.get_status(), SolutionStatus::ProvenOptimal);
    assert_reference_optimum(&stub);
}

#[tokio::test]
async fn test_async_timeout_keeps_interim_solution() {
    let mut stub = scripted("interim-then-hang", "asynchang", None);
    stub.set_max_seconds(0.5);
    stub.solve_async(ObjectiveSense::Maximize).await.unwrap();

    assert_eq!(stub.external_exit_code(), Some(ExitCode::ForcedTermination));
    assert_eq!(stub.get_status(), SolutionStatus::Suboptimal);
}
