//! Out-of-process ILP solving.
//!
//! Third-party MIP solvers crash, leak and ignore time limits. This crate
//! moves each solve into a worker process and talks to it through a named
//! shared-memory segment, so the caller survives whatever the solver does.
//!
//! # Architecture
//!
//! ```text
//! caller ── IlpSolverStub ──shm: [problem][sealed result]──> worker
//!                          <──────── exit code ─────────────
//! ```
//!
//! - [`codec`]: aligned binary encoding with zero-copy views
//! - [`problem`], [`solution`]: what crosses the process boundary
//! - [`shm`], [`channel`]: the segment and its layout
//! - [`supervisor`]: launching, waiting for and killing the worker
//! - [`stub`]: the isolated facade; [`direct`] is its in-process twin
//! - [`plugin`]: the harness worker binaries are built on
//!
//! Workers report failures through [`ExitCode`]. Codes above
//! [`CUSTOM_EXIT_CODE_BASE`](error::CUSTOM_EXIT_CODE_BASE) are defined by
//! this crate; a few OS crash signatures are ignored unless
//! [`IsolationConfig::throw_on_all_crashes`] is set.

pub mod backend;
pub mod channel;
pub mod codec;
pub mod config;
pub mod direct;
pub mod error;
pub mod interface;
pub mod plugin;
pub mod problem;
pub mod registry;
pub mod shm;
pub mod solution;
pub mod stub;
pub mod supervisor;

pub use backend::{BackendError, SolverBackend};
pub use config::IsolationConfig;
pub use direct::DirectSolver;
pub use error::{ExitCode, SolverError, SolverResult};
pub use interface::IlpSolver;
pub use plugin::run_solver_plugin;
pub use problem::{IlpData, IlpDataView, ObjectiveSense, VariableType};
pub use registry::SolverRegistry;
pub use solution::{IlpSolutionData, SolutionStatus};
pub use stub::{self_test, IlpSolverStub};
pub use supervisor::find_worker;
