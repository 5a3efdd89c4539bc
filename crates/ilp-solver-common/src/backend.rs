//! In-process solver backends.
//!
//! A backend solves a borrowed problem and reports every strictly improving
//! solution through a callback before returning the final one. Workers pass
//! a callback that writes into shared memory, so a worker that is killed
//! later still leaves its best solution behind.

use crate::error::{ExitCode, SolverError};
use crate::problem::IlpDataView;
use crate::solution::IlpSolutionData;
use thiserror::Error;

/// Absolute tolerance for checking start solutions.
pub const START_SOLUTION_TOLERANCE: f64 = 1e-6;

/// Failures reported by a backend.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    /// The model could not be built.
    #[error("Failed generating model: {0}")]
    Model(String),

    /// The solver failed.
    #[error("Failed solving: {0}")]
    Solver(String),

    /// The given start solution is not feasible.
    #[error("Invalid start solution: {0}")]
    InvalidStartSolution(String),

    #[error("Out of memory")]
    OutOfMemory,
}

impl BackendError {
    /// Exit code a worker uses to report this error.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            BackendError::Model(_) => ExitCode::ModelError,
            BackendError::Solver(_) => ExitCode::SolverError,
            BackendError::InvalidStartSolution(_) => ExitCode::InvalidStartSolution,
            BackendError::OutOfMemory => ExitCode::OutOfMemory,
        }
    }
}

impl From<BackendError> for SolverError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Model(msg) => SolverError::Model(msg),
            BackendError::Solver(msg) => SolverError::Solver(msg),
            BackendError::InvalidStartSolution(msg) => SolverError::InvalidStartSolution(msg),
            BackendError::OutOfMemory => SolverError::Solver(ExitCode::OutOfMemory.message()),
        }
    }
}

/// A solver running in the current process.
pub trait SolverBackend: Send + Sync {
    /// The backend name (e.g., "microlp").
    fn name(&self) -> &'static str;

    /// Solve `problem`.
    ///
    /// `on_improved` must be called with every solution that strictly
    /// improves on the previous one, in the order they are found.
    fn solve(
        &self,
        problem: &IlpDataView<'_>,
        on_improved: &mut dyn FnMut(&IlpSolutionData),
    ) -> Result<IlpSolutionData, BackendError>;
}

/// Reject a start solution that violates bounds, integrality or constraints.
///
/// An empty start solution is accepted.
pub fn check_start_solution(problem: &IlpDataView<'_>) -> Result<(), BackendError> {
    let x = problem.start_solution;
    if x.is_empty() {
        return Ok(());
    }
    if x.len() != problem.num_cols() {
        return Err(BackendError::InvalidStartSolution(format!(
            "{} values for {} variables",
            x.len(),
            problem.num_cols()
        )));
    }

    for (col, &value) in x.iter().enumerate() {
        let lower = problem.variable_lower[col];
        let upper = problem.variable_upper[col];
        if value < lower - START_SOLUTION_TOLERANCE || value > upper + START_SOLUTION_TOLERANCE {
            return Err(BackendError::InvalidStartSolution(format!(
                "variable {} = {} outside [{}, {}]",
                col, value, lower, upper
            )));
        }
        if problem.variable_type[col].is_integral() && (value - value.round()).abs() > START_SOLUTION_TOLERANCE {
            return Err(BackendError::InvalidStartSolution(format!(
                "variable {} = {} is not integral",
                col, value
            )));
        }
    }

    for row in 0..problem.num_rows() {
        let activity = problem.matrix.row_activity(row, x);
        let lower = problem.constraint_lower[row];
        let upper = problem.constraint_upper[row];
        if activity < lower - START_SOLUTION_TOLERANCE || activity > upper + START_SOLUTION_TOLERANCE {
            return Err(BackendError::InvalidStartSolution(format!(
                "constraint {} activity {} outside [{}, {}]",
                row, activity, lower, upper
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{IlpData, VariableType};

    fn knapsack() -> IlpData {
        let mut data = IlpData::new();
        data.add_variable(VariableType::Binary, 3.0, 0.0, 1.0, &[], &[]).unwrap();
        data.add_variable(VariableType::Integer, 2.0, 0.0, 4.0, &[], &[]).unwrap();
        data.add_variable(VariableType::Continuous, 1.0, 0.0, 10.0, &[], &[]).unwrap();
        data.add_constraint(&[0, 1, 2], &[2.0, 1.0, 1.0], f64::MIN, 5.0).unwrap();
        data
    }

    #[test]
    fn test_empty_start_solution_ok() {
        assert!(check_start_solution(&knapsack().as_view()).is_ok());
    }

    #[test]
    fn test_feasible_start_solution() {
        let mut data = knapsack();
        data.start_solution = vec![1.0, 2.0, 0.5];
        assert!(check_start_solution(&data.as_view()).is_ok());
    }

    #[test]
    fn test_start_solution_violations() {
        for start in [
            vec![1.0, 2.0],      // length
            vec![1.0, 5.0, 0.0], // bound
            vec![0.5, 1.0, 0.0], // integrality
            vec![1.0, 3.0, 1.0], // constraint: 2 + 3 + 1 > 5
        ] {
            let mut data = knapsack();
            data.start_solution = start.clone();
            assert!(
                matches!(
                    check_start_solution(&data.as_view()),
                    Err(BackendError::InvalidStartSolution(_))
                ),
                "accepted {:?}",
                start
            );
        }
    }

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(BackendError::Model(String::new()).exit_code(), ExitCode::ModelError);
        assert_eq!(BackendError::OutOfMemory.exit_code(), ExitCode::OutOfMemory);
        assert!(matches!(
            SolverError::from(BackendError::InvalidStartSolution("x".into())),
            SolverError::InvalidStartSolution(_)
        ));
    }
}
