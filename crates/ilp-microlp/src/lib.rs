//! microlp backend for isolated ILP solving.
//!
//! [`MicrolpBackend`] solves an [`IlpDataView`] with the pure-Rust `microlp`
//! branch-and-bound solver through `good_lp`. The `ilp-microlp` binary wraps
//! it in the worker harness, and [`registry`] exposes it both in-process and
//! isolated.
//!
//! microlp has no time, node or gap limits and no warm start, so those
//! options are ignored here. The time limit is still enforced by the stub,
//! which kills the worker once its wait budget runs out.

use good_lp::solvers::microlp::microlp;
use good_lp::{constraint, variable, Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable};
use ilp_solver_common::problem::{NEG_INF_BOUND, POS_INF_BOUND};
use ilp_solver_common::{
    find_worker, BackendError, DirectSolver, IlpDataView, IlpSolutionData, IlpSolver, IlpSolverStub,
    IsolationConfig, ObjectiveSense, SolutionStatus, SolverBackend, SolverRegistry,
};
use tracing::debug;

/// Name of the worker executable.
pub const WORKER_BINARY: &str = "ilp-microlp";

/// Registry name of the in-process solver.
pub const DIRECT_SOLVER: &str = "microlp";

/// Registry name of the solver running in `ilp-microlp` workers.
pub const ISOLATED_SOLVER: &str = "microlp-isolated";

#[derive(Debug, Clone, Copy, Default)]
pub struct MicrolpBackend;

impl SolverBackend for MicrolpBackend {
    fn name(&self) -> &'static str {
        "microlp"
    }

    fn solve(
        &self,
        problem: &IlpDataView<'_>,
        on_improved: &mut dyn FnMut(&IlpSolutionData),
    ) -> Result<IlpSolutionData, BackendError> {
        let sense = problem.objective_sense;
        debug!(
            "Building microlp model: {} variables, {} constraints",
            problem.num_cols(),
            problem.num_rows()
        );

        let mut vars = ProblemVariables::new();
        let columns: Vec<Variable> = (0..problem.num_cols())
            .map(|col| {
                let mut definition = variable();
                let lower = problem.variable_lower[col];
                let upper = problem.variable_upper[col];
                if lower > NEG_INF_BOUND {
                    definition = definition.min(lower);
                }
                if upper < POS_INF_BOUND {
                    definition = definition.max(upper);
                }
                if problem.variable_type[col].is_integral() {
                    definition = definition.integer();
                }
                vars.add(definition)
            })
            .collect();

        let objective: Expression = columns
            .iter()
            .zip(problem.objective)
            .map(|(&var, &coefficient)| coefficient * var)
            .sum();

        let mut model = match sense {
            ObjectiveSense::Minimize => vars.minimise(objective),
            ObjectiveSense::Maximize => vars.maximise(objective),
        }
        .using(microlp);

        for row in 0..problem.num_rows() {
            let mut activity = Expression::from(0.0);
            for (&col, &value) in problem.matrix.indices[row].iter().zip(problem.matrix.values[row]) {
                let var = columns
                    .get(col as usize)
                    .ok_or_else(|| BackendError::Model(format!("constraint {} uses unknown column {}", row, col)))?;
                activity += value * *var;
            }

            let lower = problem.constraint_lower[row];
            let upper = problem.constraint_upper[row];
            if lower == upper {
                model = model.with(constraint!(activity == upper));
                continue;
            }
            if lower > NEG_INF_BOUND {
                model = model.with(constraint!(activity.clone() >= lower));
            }
            if upper < POS_INF_BOUND {
                model = model.with(constraint!(activity <= upper));
            }
        }

        let result = match model.solve() {
            Ok(solution) => {
                let values: Vec<f64> = columns
                    .iter()
                    .zip(problem.variable_type)
                    .map(|(&var, ty)| {
                        let value = solution.value(var);
                        if ty.is_integral() {
                            value.round()
                        } else {
                            value
                        }
                    })
                    .collect();
                IlpSolutionData {
                    status: SolutionStatus::ProvenOptimal,
                    objective: problem.objective.iter().zip(&values).map(|(c, x)| c * x).sum(),
                    solution: values,
                    ..IlpSolutionData::new(sense)
                }
            }
            Err(ResolutionError::Infeasible) => IlpSolutionData {
                status: SolutionStatus::ProvenInfeasible,
                ..IlpSolutionData::new(sense)
            },
            Err(ResolutionError::Unbounded) => IlpSolutionData {
                status: SolutionStatus::ProvenUnbounded,
                ..IlpSolutionData::new(sense)
            },
            Err(e) => return Err(BackendError::Solver(e.to_string())),
        };

        debug!("microlp finished: status={}, objective={:.6}", result.status, result.objective);
        on_improved(&result);
        Ok(result)
    }
}

/// Solvers provided by this crate: [`DIRECT_SOLVER`] and [`ISOLATED_SOLVER`].
///
/// The isolated solver looks up the [`WORKER_BINARY`] each time one is
/// created, so a missing worker only fails that creation.
pub fn registry(config: &IsolationConfig) -> SolverRegistry {
    let mut registry = SolverRegistry::new();
    registry.register(DIRECT_SOLVER, || {
        Ok(Box::new(DirectSolver::new(MicrolpBackend)) as Box<dyn IlpSolver>)
    });

    let config = config.clone();
    registry.register(ISOLATED_SOLVER, move || {
        let worker = find_worker(&config, WORKER_BINARY)?;
        Ok(Box::new(IlpSolverStub::new(worker, config.clone())) as Box<dyn IlpSolver>)
    });
    registry
}
