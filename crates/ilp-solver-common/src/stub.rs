//! Solving in a separate worker process.
//!
//! [`IlpSolverStub`] implements the same facade as an in-process solver but
//! ships the problem to a worker executable through shared memory. A worker
//! that crashes or hangs cannot take the caller down; whatever solution it
//! managed to write before it died is still read back.
//!
//! ```text
//! Idle -> Serialized -> Launched -> Completed | TimedOut | Crashed
//!      -> ResultRead -> Done | Failed
//! ```

use crate::channel::CommunicationParent;
use crate::config::IsolationConfig;
use crate::error::{ExitCode, SolverError, SolverResult};
use crate::interface::IlpSolver;
use crate::problem::{IlpData, ObjectiveSense};
use crate::solution::{IlpSolutionData, SolutionStatus};
use crate::supervisor::{find_worker, WorkerOutcome, WorkerSupervisor};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Progress of an isolated solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolvePhase {
    Idle,
    /// Problem written to shared memory.
    Serialized,
    /// Worker running.
    Launched,
    /// Worker exited with `Ok`.
    Completed,
    /// Worker killed after the wait budget ran out.
    TimedOut,
    /// Worker exited with any other code.
    Crashed,
    ResultRead,
    Done,
    Failed,
}

/// [`IlpSolver`] that runs each solve in a worker process.
#[derive(Debug)]
pub struct IlpSolverStub {
    executable: PathBuf,
    config: IsolationConfig,
    envs: Vec<(OsString, OsString)>,
    data: IlpData,
    solution: IlpSolutionData,
    phase: SolvePhase,
    exit_code: Option<ExitCode>,
    channel_name: Option<String>,
}

impl IlpSolverStub {
    pub fn new(executable: impl Into<PathBuf>, config: IsolationConfig) -> Self {
        Self {
            executable: executable.into(),
            config,
            envs: Vec::new(),
            data: IlpData::default(),
            solution: IlpSolutionData::default(),
            phase: SolvePhase::Idle,
            exit_code: None,
            channel_name: None,
        }
    }

    /// Locate the worker `binary_name` and create a stub for it.
    pub fn find(binary_name: &str, config: IsolationConfig) -> SolverResult<Self> {
        let executable = find_worker(&config, binary_name)?;
        Ok(Self::new(executable, config))
    }

    /// Set an environment variable for the worker.
    pub fn with_env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn config(&self) -> &IsolationConfig {
        &self.config
    }

    pub fn phase(&self) -> SolvePhase {
        self.phase
    }

    /// CPU time the worker reported, in seconds.
    pub fn external_cpu_time(&self) -> f64 {
        self.solution.cpu_time_sec
    }

    /// Peak memory the worker reported, in bytes.
    pub fn external_peak_memory(&self) -> u64 {
        self.solution.peak_memory
    }

    /// Exit code of the last worker, `None` before the first solve.
    pub fn external_exit_code(&self) -> Option<ExitCode> {
        self.exit_code
    }

    /// Shared-memory name used by the last solve.
    pub fn channel_name(&self) -> Option<&str> {
        self.channel_name.as_deref()
    }

    fn transition(&mut self, next: SolvePhase) {
        debug!("Solve phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    fn fail(&mut self, err: SolverError) -> SolverError {
        self.transition(SolvePhase::Failed);
        err
    }

    /// Write the problem and prepare the worker launch.
    fn prepare(&mut self) -> SolverResult<(CommunicationParent, String, WorkerSupervisor, Option<Duration>)> {
        self.phase = SolvePhase::Idle;
        self.exit_code = None;
        self.channel_name = None;
        self.solution = IlpSolutionData::new(self.data.objective_sense);

        let mut parent = CommunicationParent::new(&self.config);
        let name = match parent.write_problem(&self.data) {
            Ok(name) => name,
            Err(e) => return Err(self.fail(e)),
        };
        self.channel_name = Some(name.clone());
        self.transition(SolvePhase::Serialized);

        let supervisor = WorkerSupervisor::new(&self.executable)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .quiet(self.data.log_level == 0)
            .poll_interval(self.config.poll_interval());
        let timeout = self.config.wait_budget(self.data.max_seconds);
        Ok((parent, name, supervisor, timeout))
    }

    /// Read back the result and decide whether the solve failed.
    fn finish(
        &mut self,
        parent: &CommunicationParent,
        outcome: SolverResult<WorkerOutcome>,
        timeout: Option<Duration>,
    ) -> SolverResult<()> {
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.fail(e)),
        };
        let exit_code = outcome.exit_code;
        self.exit_code = Some(exit_code);

        let message = if outcome.timed_out {
            self.transition(SolvePhase::TimedOut);
            format!(
                "Failed solving by timeout. (limit:{} timeout:{})",
                self.data.max_seconds,
                timeout.map_or(f64::INFINITY, |t| t.as_secs_f64())
            )
        } else if exit_code.is_success() {
            self.transition(SolvePhase::Completed);
            exit_code.message()
        } else {
            self.transition(SolvePhase::Crashed);
            exit_code.message()
        };

        if self.data.log_level != 0 {
            info!("External solver messages: \"{}\" (exit code {})", message, exit_code.code());
        }

        // Whatever happened, the worker may have left a solution behind.
        match parent.read_solution() {
            Ok(Some(solution)) => self.solution = solution,
            Ok(None) => self.solution = IlpSolutionData::new(self.data.objective_sense),
            Err(e) => return Err(self.fail(e)),
        }
        self.transition(SolvePhase::ResultRead);

        if exit_code == ExitCode::InvalidStartSolution {
            return Err(self.fail(SolverError::InvalidStartSolution(message)));
        }
        if !exit_code.is_success() {
            if self.config.throw_on_all_crashes || !exit_code.should_be_ignored_silently() {
                error!("Worker failed: {} ({})", message, exit_code);
                return Err(self.fail(SolverError::Worker { exit_code, message }));
            }
            warn!(
                "Ignoring worker failure \"{}\" ({}), keeping status {}",
                message, exit_code, self.solution.status
            );
        }

        self.transition(SolvePhase::Done);
        info!(
            "Solved in {:?}: status={}, objective={:.6}, cpu={:.3}s, peak memory={} bytes",
            outcome.elapsed,
            self.solution.status,
            self.solution.objective,
            self.solution.cpu_time_sec,
            self.solution.peak_memory
        );
        Ok(())
    }

    /// Blocking solve in the worker.
    pub fn solve_blocking(&mut self) -> SolverResult<()> {
        let (parent, name, supervisor, timeout) = self.prepare()?;
        self.transition(SolvePhase::Launched);
        let outcome = supervisor.run_blocking(&name, timeout);
        self.finish(&parent, outcome, timeout)
    }

    /// Async solve in the given direction, using `tokio` to wait for the worker.
    ///
    /// Like [`IlpSolver::optimize`], does nothing without a positive time limit.
    pub async fn solve_async(&mut self, sense: ObjectiveSense) -> SolverResult<()> {
        if self.data.max_seconds <= 0.0 {
            return Ok(());
        }
        self.data.objective_sense = sense;

        let (parent, name, supervisor, timeout) = self.prepare()?;
        self.transition(SolvePhase::Launched);
        let outcome = supervisor.run(&name, timeout).await;
        self.finish(&parent, outcome, timeout)
    }
}

impl IlpSolver for IlpSolverStub {
    fn data(&self) -> &IlpData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut IlpData {
        &mut self.data
    }

    fn solve(&mut self) -> SolverResult<()> {
        self.solve_blocking()
    }

    fn solution_data(&self) -> &IlpSolutionData {
        &self.solution
    }

    fn reset_solution(&mut self) {
        self.data.start_solution.clear();
        self.solution = IlpSolutionData::new(self.data.objective_sense);
    }
}

/// Absolute tolerance of [`self_test`].
const SELF_TEST_TOLERANCE: f64 = 1e-4;

/// Check that a worker installation solves a trivial LP.
///
/// Solves `max x + y` s.t. `x + 2y <= 2`, `2x + y <= 2`, `-1 <= x, y <= 1`,
/// whose optimum is `x = y = 2/3`. Every worker failure is reported, and a
/// wrong answer is a [`SolverError::Solver`].
pub fn self_test(executable: impl Into<PathBuf>) -> SolverResult<ExitCode> {
    let config = IsolationConfig {
        throw_on_all_crashes: true,
        ..IsolationConfig::load()?
    };
    let mut solver = IlpSolverStub::new(executable, config);
    solver.set_max_seconds(5.0);

    solver.add_variable_continuous(1.0, -1.0, 1.0)?;
    solver.add_variable_continuous(1.0, -1.0, 1.0)?;
    solver.add_constraint_upper(&[0, 1], &[1.0, 2.0], 2.0)?;
    solver.add_constraint_upper(&[0, 1], &[2.0, 1.0], 2.0)?;
    solver.maximize()?;

    let expected = 2.0 / 3.0;
    let solution = solver.get_solution();
    let correct = solver.get_status() == SolutionStatus::ProvenOptimal
        && solution.len() == 2
        && solution.iter().all(|v| (v - expected).abs() <= SELF_TEST_TOLERANCE);
    if !correct {
        return Err(SolverError::Solver(format!(
            "Self test got status {} and solution {:?}",
            solver.get_status(),
            solution
        )));
    }
    Ok(solver.external_exit_code().unwrap_or(ExitCode::Ok))
}
