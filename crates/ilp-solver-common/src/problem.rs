//! Problem representation shared by the caller and the worker.
//!
//! [`IlpData`] owns its arrays and is what the facade builds. [`IlpDataView`]
//! has the same fields but borrows every array, typically straight out of the
//! shared-memory segment. Both have the same wire layout.

use crate::error::{SolverError, SolverResult};
use bytemuck::{CheckedBitPattern, NoUninit};

/// Bounds at or beyond this value mean "no upper restriction".
pub const POS_INF_BOUND: f64 = f64::MAX / 2.0;

/// Bounds at or below this value mean "no lower restriction".
pub const NEG_INF_BOUND: f64 = f64::MIN / 2.0;

/// Variable domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, NoUninit, CheckedBitPattern)]
#[repr(i32)]
pub enum VariableType {
    Integer = 0,
    #[default]
    Continuous = 1,
    Binary = 2,
}

impl VariableType {
    /// Whether values of this type must be integral.
    pub fn is_integral(&self) -> bool {
        !matches!(self, VariableType::Continuous)
    }
}

/// Optimization direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, NoUninit, CheckedBitPattern)]
#[repr(i32)]
pub enum ObjectiveSense {
    #[default]
    Minimize = 0,
    Maximize = 1,
}

/// Row-major sparse constraint matrix.
///
/// Row `i` has nonzeros `values[i][k]` in columns `indices[i][k]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SparseMatrix {
    pub values: Vec<Vec<f64>>,
    pub indices: Vec<Vec<i32>>,
    pub num_cols: i32,
}

/// Borrowed [`SparseMatrix`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SparseMatrixView<'a> {
    pub values: Vec<&'a [f64]>,
    pub indices: Vec<&'a [i32]>,
    pub num_cols: i32,
}

crate::wire_layout!(SparseMatrix, SparseMatrixView {
    values: nested,
    indices: nested,
    num_cols: scalar,
});

impl SparseMatrix {
    pub fn num_rows(&self) -> usize {
        self.values.len()
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols as usize
    }

    /// Append a row given by column indices and coefficients.
    ///
    /// Every index must name an existing column.
    pub fn append_row(&mut self, indices: &[i32], values: &[f64]) -> SolverResult<()> {
        self.check_row(indices, values)?;
        self.indices.push(indices.to_vec());
        self.values.push(values.to_vec());
        Ok(())
    }

    /// Check that a row would only reference existing columns.
    pub fn check_row(&self, indices: &[i32], values: &[f64]) -> SolverResult<()> {
        check_lengths("constraint", indices, values)?;
        if let Some(&col) = indices.iter().find(|&&c| c < 0 || c >= self.num_cols) {
            return Err(SolverError::Model(format!(
                "constraint references column {} of {}",
                col, self.num_cols
            )));
        }
        Ok(())
    }

    /// Append a row with one coefficient per column; zeros are skipped.
    pub fn append_dense_row(&mut self, values: &[f64]) -> SolverResult<()> {
        if values.len() != self.num_cols() {
            return Err(SolverError::Model(format!(
                "dense constraint has {} coefficients for {} columns",
                values.len(),
                self.num_cols
            )));
        }
        let (indices, values): (Vec<i32>, Vec<f64>) = values
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0.0)
            .map(|(i, v)| (i as i32, *v))
            .unzip();
        self.indices.push(indices);
        self.values.push(values);
        Ok(())
    }

    /// Append a column with coefficients in the given existing rows.
    ///
    /// Returns the index of the new column. Nothing is changed on error.
    pub fn append_column(&mut self, row_indices: &[i32], row_values: &[f64]) -> SolverResult<i32> {
        check_lengths("variable", row_indices, row_values)?;
        let rows = self.num_rows();
        if let Some(&row) = row_indices.iter().find(|&&r| r < 0 || r as usize >= rows) {
            return Err(SolverError::Model(format!("variable references row {} of {}", row, rows)));
        }
        let col = self.num_cols;
        for (&row, &value) in row_indices.iter().zip(row_values) {
            let row = row as usize;
            self.indices[row].push(col);
            self.values[row].push(value);
        }
        self.num_cols += 1;
        Ok(col)
    }

    pub fn as_view(&self) -> SparseMatrixView<'_> {
        SparseMatrixView {
            values: self.values.iter().map(Vec::as_slice).collect(),
            indices: self.indices.iter().map(Vec::as_slice).collect(),
            num_cols: self.num_cols,
        }
    }
}

fn check_lengths(what: &str, indices: &[i32], values: &[f64]) -> SolverResult<()> {
    if indices.len() != values.len() {
        return Err(SolverError::Model(format!(
            "{} has {} indices but {} values",
            what,
            indices.len(),
            values.len()
        )));
    }
    Ok(())
}

impl SparseMatrixView<'_> {
    pub fn num_rows(&self) -> usize {
        self.values.len()
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols as usize
    }

    pub fn to_owned(&self) -> SparseMatrix {
        SparseMatrix {
            values: self.values.iter().map(|row| row.to_vec()).collect(),
            indices: self.indices.iter().map(|row| row.to_vec()).collect(),
            num_cols: self.num_cols,
        }
    }

    /// Activity `a_i * x` of row `row`.
    pub fn row_activity(&self, row: usize, x: &[f64]) -> f64 {
        self.indices[row]
            .iter()
            .zip(self.values[row])
            .map(|(&col, &value)| value * x[col as usize])
            .sum()
    }
}

/// An LP/ILP with its solver options.
#[derive(Debug, Clone, PartialEq)]
pub struct IlpData {
    pub matrix: SparseMatrix,
    pub objective: Vec<f64>,
    pub variable_lower: Vec<f64>,
    pub variable_upper: Vec<f64>,
    pub constraint_lower: Vec<f64>,
    pub constraint_upper: Vec<f64>,
    pub variable_type: Vec<VariableType>,
    pub objective_sense: ObjectiveSense,
    /// Empty if no start solution is given.
    pub start_solution: Vec<f64>,

    pub num_threads: i32,
    pub deterministic: bool,
    /// 0 silences the solver output.
    pub log_level: i32,
    pub presolve: bool,
    pub max_seconds: f64,
    pub max_nodes: i32,
    pub max_solutions: i32,
    pub max_abs_gap: f64,
    pub max_rel_gap: f64,
    pub cutoff: f64,
}

/// Borrowed [`IlpData`].
#[derive(Debug, Clone, PartialEq)]
pub struct IlpDataView<'a> {
    pub matrix: SparseMatrixView<'a>,
    pub objective: &'a [f64],
    pub variable_lower: &'a [f64],
    pub variable_upper: &'a [f64],
    pub constraint_lower: &'a [f64],
    pub constraint_upper: &'a [f64],
    pub variable_type: &'a [VariableType],
    pub objective_sense: ObjectiveSense,
    pub start_solution: &'a [f64],

    pub num_threads: i32,
    pub deterministic: bool,
    pub log_level: i32,
    pub presolve: bool,
    pub max_seconds: f64,
    pub max_nodes: i32,
    pub max_solutions: i32,
    pub max_abs_gap: f64,
    pub max_rel_gap: f64,
    pub cutoff: f64,
}

crate::wire_layout!(IlpData, IlpDataView {
    matrix: record,
    objective: array,
    variable_lower: array,
    variable_upper: array,
    constraint_lower: array,
    constraint_upper: array,
    variable_type: array,
    objective_sense: scalar,
    start_solution: array,
    num_threads: scalar,
    deterministic: scalar,
    log_level: scalar,
    presolve: scalar,
    max_seconds: scalar,
    max_nodes: scalar,
    max_solutions: scalar,
    max_abs_gap: scalar,
    max_rel_gap: scalar,
    cutoff: scalar,
});

impl Default for IlpData {
    fn default() -> Self {
        Self {
            matrix: SparseMatrix::default(),
            objective: Vec::new(),
            variable_lower: Vec::new(),
            variable_upper: Vec::new(),
            constraint_lower: Vec::new(),
            constraint_upper: Vec::new(),
            variable_type: Vec::new(),
            objective_sense: ObjectiveSense::Minimize,
            start_solution: Vec::new(),
            num_threads: 1,
            deterministic: true,
            log_level: 0,
            presolve: true,
            max_seconds: f64::MAX,
            max_nodes: i32::MAX,
            max_solutions: i32::MAX,
            max_abs_gap: 0.0,
            max_rel_gap: 0.0,
            cutoff: f64::MAX,
        }
    }
}

impl IlpData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_rows(&self) -> usize {
        self.matrix.num_rows()
    }

    pub fn num_cols(&self) -> usize {
        self.matrix.num_cols()
    }

    /// Add a variable with coefficients in existing rows. Returns its index.
    pub fn add_variable(
        &mut self,
        variable_type: VariableType,
        objective: f64,
        lower: f64,
        upper: f64,
        row_indices: &[i32],
        row_values: &[f64],
    ) -> SolverResult<i32> {
        let col = self.matrix.append_column(row_indices, row_values)?;
        self.objective.push(objective);
        self.variable_lower.push(lower);
        self.variable_upper.push(upper);
        self.variable_type.push(variable_type);
        Ok(col)
    }

    /// Add a constraint `lower <= a * x <= upper` over existing columns.
    ///
    /// A constraint without finite bound on either side is not added and
    /// `None` is returned.
    pub fn add_constraint(
        &mut self,
        col_indices: &[i32],
        col_values: &[f64],
        lower: f64,
        upper: f64,
    ) -> SolverResult<Option<usize>> {
        self.matrix.check_row(col_indices, col_values)?;
        if lower <= NEG_INF_BOUND && upper >= POS_INF_BOUND {
            return Ok(None);
        }
        self.matrix.append_row(col_indices, col_values)?;
        self.constraint_lower.push(lower);
        self.constraint_upper.push(upper);
        Ok(Some(self.num_rows() - 1))
    }

    pub fn as_view(&self) -> IlpDataView<'_> {
        IlpDataView {
            matrix: self.matrix.as_view(),
            objective: &self.objective,
            variable_lower: &self.variable_lower,
            variable_upper: &self.variable_upper,
            constraint_lower: &self.constraint_lower,
            constraint_upper: &self.constraint_upper,
            variable_type: &self.variable_type,
            objective_sense: self.objective_sense,
            start_solution: &self.start_solution,
            num_threads: self.num_threads,
            deterministic: self.deterministic,
            log_level: self.log_level,
            presolve: self.presolve,
            max_seconds: self.max_seconds,
            max_nodes: self.max_nodes,
            max_solutions: self.max_solutions,
            max_abs_gap: self.max_abs_gap,
            max_rel_gap: self.max_rel_gap,
            cutoff: self.cutoff,
        }
    }

    /// Check array lengths and column indices.
    pub fn validate(&self) -> SolverResult<()> {
        self.as_view().validate()
    }
}

impl IlpDataView<'_> {
    pub fn num_rows(&self) -> usize {
        self.matrix.num_rows()
    }

    pub fn num_cols(&self) -> usize {
        self.matrix.num_cols()
    }

    pub fn to_owned(&self) -> IlpData {
        IlpData {
            matrix: self.matrix.to_owned(),
            objective: self.objective.to_vec(),
            variable_lower: self.variable_lower.to_vec(),
            variable_upper: self.variable_upper.to_vec(),
            constraint_lower: self.constraint_lower.to_vec(),
            constraint_upper: self.constraint_upper.to_vec(),
            variable_type: self.variable_type.to_vec(),
            objective_sense: self.objective_sense,
            start_solution: self.start_solution.to_vec(),
            num_threads: self.num_threads,
            deterministic: self.deterministic,
            log_level: self.log_level,
            presolve: self.presolve,
            max_seconds: self.max_seconds,
            max_nodes: self.max_nodes,
            max_solutions: self.max_solutions,
            max_abs_gap: self.max_abs_gap,
            max_rel_gap: self.max_rel_gap,
            cutoff: self.cutoff,
        }
    }

    /// Check array lengths and column indices.
    pub fn validate(&self) -> SolverResult<()> {
        let model_error = |msg: String| Err(SolverError::Model(msg));

        if self.matrix.num_cols < 0 {
            return model_error(format!("negative column count {}", self.matrix.num_cols));
        }
        let cols = self.num_cols();
        let rows = self.num_rows();

        for (name, len) in [
            ("objective", self.objective.len()),
            ("variable_lower", self.variable_lower.len()),
            ("variable_upper", self.variable_upper.len()),
            ("variable_type", self.variable_type.len()),
        ] {
            if len != cols {
                return model_error(format!("{} has {} entries for {} columns", name, len, cols));
            }
        }
        for (name, len) in [
            ("constraint_lower", self.constraint_lower.len()),
            ("constraint_upper", self.constraint_upper.len()),
            ("matrix indices", self.matrix.indices.len()),
        ] {
            if len != rows {
                return model_error(format!("{} has {} entries for {} rows", name, len, rows));
            }
        }
        if !self.start_solution.is_empty() && self.start_solution.len() != cols {
            return model_error(format!(
                "start solution has {} entries for {} columns",
                self.start_solution.len(),
                cols
            ));
        }

        for (row, (indices, values)) in self.matrix.indices.iter().zip(&self.matrix.values).enumerate() {
            if indices.len() != values.len() {
                return model_error(format!(
                    "row {} has {} indices but {} values",
                    row,
                    indices.len(),
                    values.len()
                ));
            }
            if let Some(&col) = indices.iter().find(|&&c| c < 0 || c as usize >= cols) {
                return model_error(format!("row {} references column {} of {}", row, col, cols));
            }
        }
        Ok(())
    }
}
