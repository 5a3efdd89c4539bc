//! Named solver factories.

use crate::error::{SolverError, SolverResult};
use crate::interface::IlpSolver;
use std::collections::BTreeMap;
use std::fmt;

/// Creates a fresh solver instance.
pub type SolverFactory = Box<dyn Fn() -> SolverResult<Box<dyn IlpSolver>> + Send + Sync>;

/// Solvers available by name, e.g. `"microlp"` or `"microlp-isolated"`.
#[derive(Default)]
pub struct SolverRegistry {
    factories: BTreeMap<String, SolverFactory>,
}

impl SolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> SolverResult<Box<dyn IlpSolver>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Create the solver registered under `name` (case-insensitive).
    pub fn create(&self, name: &str) -> SolverResult<Box<dyn IlpSolver>> {
        let factory = self
            .factories
            .get(name)
            .or_else(|| self.factories.get(&name.to_lowercase()))
            .ok_or_else(|| SolverError::UnknownSolver(name.to_string()))?;
        factory()
    }
}

impl fmt::Debug for SolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
