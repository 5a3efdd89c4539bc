//! Solution representation returned by solvers and workers.

use crate::problem::ObjectiveSense;
use bytemuck::{CheckedBitPattern, NoUninit};

/// Status of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, NoUninit, CheckedBitPattern)]
#[repr(i32)]
pub enum SolutionStatus {
    /// Optimal solution found.
    ProvenOptimal = 0,
    /// Problem has no feasible point.
    ProvenInfeasible = 1,
    /// Objective is unbounded.
    ProvenUnbounded = 2,
    /// Feasible solution, optimality not proven (limit hit).
    Suboptimal = 3,
    /// Nothing found (yet).
    #[default]
    NoSolution = 4,
}

impl SolutionStatus {
    /// Check if this status carries a usable primal solution.
    pub fn has_solution(&self) -> bool {
        matches!(self, SolutionStatus::ProvenOptimal | SolutionStatus::Suboptimal)
    }
}

impl std::fmt::Display for SolutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolutionStatus::ProvenOptimal => write!(f, "proven_optimal"),
            SolutionStatus::ProvenInfeasible => write!(f, "proven_infeasible"),
            SolutionStatus::ProvenUnbounded => write!(f, "proven_unbounded"),
            SolutionStatus::Suboptimal => write!(f, "suboptimal"),
            SolutionStatus::NoSolution => write!(f, "no_solution"),
        }
    }
}

/// Result of a solve, including the resources the worker used.
#[derive(Debug, Clone, PartialEq)]
pub struct IlpSolutionData {
    pub status: SolutionStatus,
    pub objective: f64,
    /// Primal values, one per variable, empty if none was found.
    pub solution: Vec<f64>,
    /// Dual values, one per constraint, may be empty.
    pub dual: Vec<f64>,
    pub cpu_time_sec: f64,
    /// Peak resident memory in bytes.
    pub peak_memory: u64,
}

crate::wire_layout!(IlpSolutionData {
    status: scalar,
    objective: scalar,
    solution: array,
    dual: array,
    cpu_time_sec: scalar,
    peak_memory: scalar,
});

impl Default for IlpSolutionData {
    fn default() -> Self {
        Self::new(ObjectiveSense::Minimize)
    }
}

impl IlpSolutionData {
    /// An empty result whose objective loses against any real solution.
    pub fn new(sense: ObjectiveSense) -> Self {
        Self {
            status: SolutionStatus::NoSolution,
            objective: match sense {
                ObjectiveSense::Minimize => f64::INFINITY,
                ObjectiveSense::Maximize => f64::NEG_INFINITY,
            },
            solution: Vec::new(),
            dual: Vec::new(),
            cpu_time_sec: 0.0,
            peak_memory: 0,
        }
    }

    /// The largest solution a problem of this size can produce.
    ///
    /// Used to size the result region of the shared-memory segment.
    pub fn worst_case(num_cols: usize, num_rows: usize) -> Self {
        Self {
            solution: vec![0.0; num_cols],
            dual: vec![0.0; num_rows],
            ..Self::default()
        }
    }

    pub fn has_solution(&self) -> bool {
        !self.solution.is_empty() && self.status.has_solution()
    }

    /// Whether `self` strictly improves on `other`.
    pub fn is_better_than(&self, other: &Self, sense: ObjectiveSense) -> bool {
        if !self.has_solution() {
            return false;
        }
        if !other.has_solution() {
            return true;
        }
        match sense {
            ObjectiveSense::Minimize => self.objective < other.objective,
            ObjectiveSense::Maximize => self.objective > other.objective,
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::codec::{encode_into, encoded_len, AlignedBuffer};
    use proptest::prelude::*;

    fn status() -> impl Strategy<Value = SolutionStatus> {
        prop_oneof![
            Just(SolutionStatus::ProvenOptimal),
            Just(SolutionStatus::ProvenInfeasible),
            Just(SolutionStatus::ProvenUnbounded),
            Just(SolutionStatus::Suboptimal),
            Just(SolutionStatus::NoSolution),
        ]
    }

    /// A solution a worker could report for `cols` variables and `rows` constraints.
    fn reported(cols: usize, rows: usize) -> impl Strategy<Value = IlpSolutionData> {
        (
            status(),
            -1.0e9..1.0e9f64,
            prop::option::of(prop::collection::vec(-1.0e6..1.0e6f64, cols)),
            prop::option::of(prop::collection::vec(-1.0e6..1.0e6f64, rows)),
            0.0..1.0e5f64,
            any::<u64>(),
        )
            .prop_map(|(status, objective, solution, dual, cpu_time_sec, peak_memory)| IlpSolutionData {
                status,
                objective,
                solution: solution.unwrap_or_default(),
                dual: dual.unwrap_or_default(),
                cpu_time_sec,
                peak_memory,
            })
    }

    fn sized() -> impl Strategy<Value = (usize, usize, IlpSolutionData)> {
        (0usize..64, 0usize..64)
            .prop_flat_map(|(cols, rows)| (Just(cols), Just(rows), reported(cols, rows)))
    }

    proptest! {
        /// The result region sized from the worst case holds every real result.
        #[test]
        fn worst_case_bounds_reported_solution((cols, rows, real) in sized()) {
            let capacity = encoded_len(&IlpSolutionData::worst_case(cols, rows)).unwrap();
            let len = encoded_len(&real).unwrap();
            prop_assert!(len <= capacity);

            let mut region = AlignedBuffer::zeroed(capacity);
            prop_assert_eq!(encode_into(&real, region.as_mut_slice()).unwrap(), len);
        }
    }
}
