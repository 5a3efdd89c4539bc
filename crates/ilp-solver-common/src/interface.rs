//! The caller-facing solver facade.
//!
//! Implementors only provide access to the problem data, a solve step and
//! the last solution; model building, option setters and getters come for
//! free. The same facade is implemented by [`DirectSolver`](crate::direct::DirectSolver)
//! (same process) and [`IlpSolverStub`](crate::stub::IlpSolverStub) (worker process).

use crate::error::{SolverError, SolverResult};
use crate::problem::{IlpData, ObjectiveSense, VariableType};
use crate::solution::{IlpSolutionData, SolutionStatus};

pub trait IlpSolver {
    fn data(&self) -> &IlpData;

    fn data_mut(&mut self) -> &mut IlpData;

    /// Solve the current problem with its objective sense.
    fn solve(&mut self) -> SolverResult<()>;

    /// Result of the last solve.
    fn solution_data(&self) -> &IlpSolutionData;

    /// Forget the last result and the start solution.
    fn reset_solution(&mut self);

    // Variables. Each returns the index of the new variable, or a model
    // error if a row index or the coefficient count is invalid.

    fn add_variable_boolean(&mut self, objective: f64) -> SolverResult<i32> {
        self.add_variable_boolean_in_rows(&[], &[], objective)
    }

    fn add_variable_boolean_in_rows(
        &mut self,
        row_indices: &[i32],
        row_values: &[f64],
        objective: f64,
    ) -> SolverResult<i32> {
        self.data_mut()
            .add_variable(VariableType::Binary, objective, 0.0, 1.0, row_indices, row_values)
    }

    fn add_variable_integer(&mut self, objective: f64, lower: f64, upper: f64) -> SolverResult<i32> {
        self.add_variable_integer_in_rows(&[], &[], objective, lower, upper)
    }

    fn add_variable_integer_in_rows(
        &mut self,
        row_indices: &[i32],
        row_values: &[f64],
        objective: f64,
        lower: f64,
        upper: f64,
    ) -> SolverResult<i32> {
        self.data_mut()
            .add_variable(VariableType::Integer, objective, lower, upper, row_indices, row_values)
    }

    fn add_variable_continuous(&mut self, objective: f64, lower: f64, upper: f64) -> SolverResult<i32> {
        self.add_variable_continuous_in_rows(&[], &[], objective, lower, upper)
    }

    fn add_variable_continuous_in_rows(
        &mut self,
        row_indices: &[i32],
        row_values: &[f64],
        objective: f64,
        lower: f64,
        upper: f64,
    ) -> SolverResult<i32> {
        self.data_mut()
            .add_variable(VariableType::Continuous, objective, lower, upper, row_indices, row_values)
    }

    // Constraints. Each returns the row index, or `None` if the constraint
    // does not restrict anything and was skipped. Unknown columns and
    // mismatched coefficient counts are model errors.

    /// `lower <= a * x <= upper` with one coefficient per variable.
    fn add_constraint(&mut self, col_values: &[f64], lower: f64, upper: f64) -> SolverResult<Option<usize>> {
        if col_values.len() != self.num_variables() {
            return Err(SolverError::Model(format!(
                "dense constraint has {} coefficients for {} variables",
                col_values.len(),
                self.num_variables()
            )));
        }
        let indices: Vec<i32> = (0..col_values.len() as i32).collect();
        self.add_constraint_sparse(&indices, col_values, lower, upper)
    }

    /// `lower <= a * x <= upper` over the given columns.
    fn add_constraint_sparse(
        &mut self,
        col_indices: &[i32],
        col_values: &[f64],
        lower: f64,
        upper: f64,
    ) -> SolverResult<Option<usize>> {
        self.data_mut().add_constraint(col_indices, col_values, lower, upper)
    }

    /// `a * x <= upper`
    fn add_constraint_upper(
        &mut self,
        col_indices: &[i32],
        col_values: &[f64],
        upper: f64,
    ) -> SolverResult<Option<usize>> {
        self.add_constraint_sparse(col_indices, col_values, f64::MIN, upper)
    }

    /// `lower <= a * x`
    fn add_constraint_lower(
        &mut self,
        col_indices: &[i32],
        col_values: &[f64],
        lower: f64,
    ) -> SolverResult<Option<usize>> {
        self.add_constraint_sparse(col_indices, col_values, lower, f64::MAX)
    }

    /// `a * x = value`
    fn add_constraint_equality(
        &mut self,
        col_indices: &[i32],
        col_values: &[f64],
        value: f64,
    ) -> SolverResult<Option<usize>> {
        self.add_constraint_sparse(col_indices, col_values, value, value)
    }

    fn num_variables(&self) -> usize {
        self.data().num_cols()
    }

    fn num_constraints(&self) -> usize {
        self.data().num_rows()
    }

    // Options

    fn set_start_solution(&mut self, solution: &[f64]) {
        self.data_mut().start_solution = solution.to_vec();
    }

    fn set_num_threads(&mut self, threads: i32) {
        self.data_mut().num_threads = threads;
    }

    fn set_deterministic_mode(&mut self, deterministic: bool) {
        self.data_mut().deterministic = deterministic;
    }

    /// 0 silences all solver output.
    fn set_log_level(&mut self, level: i32) {
        self.data_mut().log_level = level;
    }

    fn set_presolve(&mut self, presolve: bool) {
        self.data_mut().presolve = presolve;
    }

    fn set_max_seconds(&mut self, seconds: f64) {
        self.data_mut().max_seconds = seconds;
    }

    fn set_max_nodes(&mut self, nodes: i32) {
        self.data_mut().max_nodes = nodes;
    }

    fn set_max_solutions(&mut self, solutions: i32) {
        self.data_mut().max_solutions = solutions;
    }

    fn set_max_abs_gap(&mut self, gap: f64) {
        self.data_mut().max_abs_gap = gap;
    }

    fn set_max_rel_gap(&mut self, gap: f64) {
        self.data_mut().max_rel_gap = gap;
    }

    fn set_cutoff(&mut self, cutoff: f64) {
        self.data_mut().cutoff = cutoff;
    }

    // Solving

    fn minimize(&mut self) -> SolverResult<()> {
        self.optimize(ObjectiveSense::Minimize)
    }

    fn maximize(&mut self) -> SolverResult<()> {
        self.optimize(ObjectiveSense::Maximize)
    }

    /// Solve in the given direction. Does nothing without a positive time limit.
    fn optimize(&mut self, sense: ObjectiveSense) -> SolverResult<()> {
        if self.data().max_seconds <= 0.0 {
            return Ok(());
        }
        self.data_mut().objective_sense = sense;
        self.solve()
    }

    // Results

    fn get_solution(&self) -> Vec<f64> {
        self.solution_data().solution.clone()
    }

    fn get_objective(&self) -> f64 {
        self.solution_data().objective
    }

    fn get_status(&self) -> SolutionStatus {
        self.solution_data().status
    }

    fn get_dual_solution(&self) -> Vec<f64> {
        self.solution_data().dual.clone()
    }
}
