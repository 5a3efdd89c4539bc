//! microlp worker binary.
//!
//! Started by `IlpSolverStub` as `ilp-microlp <shared memory name>`:
//! 1. Reads the problem from the named shared-memory segment
//! 2. Solves it with microlp
//! 3. Writes the solution back into the segment
//!
//! Exit codes are defined in `ilp_solver_common::ExitCode`.

use ilp_microlp::MicrolpBackend;
use ilp_solver_common::run_solver_plugin;

fn main() {
    run_solver_plugin(MicrolpBackend);
}
