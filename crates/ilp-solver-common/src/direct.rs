//! Facade solving in the calling process.

use crate::backend::{check_start_solution, SolverBackend};
use crate::error::SolverResult;
use crate::interface::IlpSolver;
use crate::problem::IlpData;
use crate::solution::IlpSolutionData;
use tracing::{debug, info};

/// [`IlpSolver`] running a [`SolverBackend`] directly.
///
/// A crash of the backend takes the caller down with it; use
/// [`IlpSolverStub`](crate::stub::IlpSolverStub) to isolate it.
#[derive(Debug)]
pub struct DirectSolver<B> {
    backend: B,
    data: IlpData,
    solution: IlpSolutionData,
    /// Number of improving solutions reported by the last solve.
    improvements: usize,
}

impl<B: SolverBackend> DirectSolver<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            data: IlpData::default(),
            solution: IlpSolutionData::default(),
            improvements: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn improvements(&self) -> usize {
        self.improvements
    }
}

impl<B: SolverBackend> IlpSolver for DirectSolver<B> {
    fn data(&self) -> &IlpData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut IlpData {
        &mut self.data
    }

    fn solve(&mut self) -> SolverResult<()> {
        self.solution = IlpSolutionData::new(self.data.objective_sense);
        self.improvements = 0;

        let view = self.data.as_view();
        view.validate()?;
        check_start_solution(&view)?;

        debug!(
            "Solving {} x {} in process with {}",
            view.num_rows(),
            view.num_cols(),
            self.backend.name()
        );
        let mut improvements = 0;
        let solution = self.backend.solve(&view, &mut |_| improvements += 1)?;
        info!(
            "{}: status={}, objective={:.6}",
            self.backend.name(),
            solution.status,
            solution.objective
        );

        self.improvements = improvements;
        self.solution = solution;
        Ok(())
    }

    fn solution_data(&self) -> &IlpSolutionData {
        &self.solution
    }

    fn reset_solution(&mut self) {
        self.data.start_solution.clear();
        self.solution = IlpSolutionData::new(self.data.objective_sense);
    }
}
