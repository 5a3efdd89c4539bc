//! Error types and exit codes for solver communication.

use crate::codec::CodecError;
use crate::shm::ShmError;
use std::process::ExitStatus;
use thiserror::Error;

/// First value of the block of exit codes defined by this crate.
///
/// Windows exit codes are 32 bit, so the block starts at a value that the
/// system is unlikely to use for its own codes. Unix only transports the low
/// eight bits of an exit status, so the block sits below the range the shell
/// uses for "killed by signal" (128 + n).
#[cfg(windows)]
pub const CUSTOM_EXIT_CODE_BASE: i32 = 14142;
#[cfg(not(windows))]
pub const CUSTOM_EXIT_CODE_BASE: i32 = 114;

/// Exit codes of the worker process.
///
/// The custom codes form the contiguous block starting at
/// [`CUSTOM_EXIT_CODE_BASE`]; the remaining codes are crash signatures that
/// were observed when the wrapped solver died.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitCode {
    /// Worker finished and wrote its result.
    Ok,
    /// Killed from outside (task manager, SIGTERM).
    KilledExternally,
    /// Exception thrown in a solver thread and not caught, likely out of memory.
    UncaughtException1,
    /// Uncaught C++ exception or abort, likely out of memory.
    UncaughtException2,
    /// Stack buffer overflow / bus error, likely out of memory.
    UncaughtException3,
    /// Heap filled or corrupted.
    UncaughtException4,
    /// Access violation / segmentation fault.
    UncaughtException5,
    /// A shared library of the solver could not be loaded.
    MissingLibrary,
    OutOfMemory,
    CommandLineError,
    SharedMemoryError,
    ModelError,
    SolverError,
    /// The supervisor killed the worker after the wait budget ran out.
    ForcedTermination,
    InvalidStartSolution,
    /// Any code not listed above.
    Unknown(i32),
}

impl ExitCode {
    const CUSTOM: [ExitCode; 7] = [
        ExitCode::OutOfMemory,
        ExitCode::CommandLineError,
        ExitCode::SharedMemoryError,
        ExitCode::ModelError,
        ExitCode::SolverError,
        ExitCode::ForcedTermination,
        ExitCode::InvalidStartSolution,
    ];

    /// Convert from a raw process exit code.
    pub fn from_raw(code: i32) -> Self {
        match code {
            0 => ExitCode::Ok,
            // Unix reports external kills as signals
            #[cfg(windows)]
            1 => ExitCode::KilledExternally,
            3 => ExitCode::UncaughtException1,
            -529_697_949 => ExitCode::UncaughtException2,
            -1_073_740_791 => ExitCode::UncaughtException3,
            -1_073_740_940 => ExitCode::UncaughtException4,
            -1_073_741_819 => ExitCode::UncaughtException5,
            -1_073_741_515 => ExitCode::MissingLibrary,
            c if (CUSTOM_EXIT_CODE_BASE..CUSTOM_EXIT_CODE_BASE + Self::CUSTOM.len() as i32)
                .contains(&c) =>
            {
                Self::CUSTOM[(c - CUSTOM_EXIT_CODE_BASE) as usize]
            }
            c => ExitCode::Unknown(c),
        }
    }

    /// The raw process exit code for this value.
    pub fn code(&self) -> i32 {
        match self {
            ExitCode::Ok => 0,
            ExitCode::KilledExternally => 1,
            ExitCode::UncaughtException1 => 3,
            ExitCode::UncaughtException2 => -529_697_949,
            ExitCode::UncaughtException3 => -1_073_740_791,
            ExitCode::UncaughtException4 => -1_073_740_940,
            ExitCode::UncaughtException5 => -1_073_741_819,
            ExitCode::MissingLibrary => -1_073_741_515,
            ExitCode::Unknown(c) => *c,
            custom => {
                let offset = Self::CUSTOM
                    .iter()
                    .position(|c| c == custom)
                    .unwrap_or_default();
                CUSTOM_EXIT_CODE_BASE + offset as i32
            }
        }
    }

    /// Classify how a worker process ended.
    ///
    /// On Unix a process killed by a signal has no exit code; the signals
    /// that correspond to the crash signatures above are mapped onto them.
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::from_raw(code);
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::Signal;
            use std::os::unix::process::ExitStatusExt;

            if let Some(raw) = status.signal() {
                return match Signal::try_from(raw) {
                    Ok(Signal::SIGABRT) => ExitCode::UncaughtException2,
                    Ok(Signal::SIGBUS) => ExitCode::UncaughtException3,
                    Ok(Signal::SIGSEGV) => ExitCode::UncaughtException5,
                    // Most likely the OOM killer
                    Ok(Signal::SIGKILL) => ExitCode::OutOfMemory,
                    Ok(Signal::SIGTERM) | Ok(Signal::SIGINT) => ExitCode::KilledExternally,
                    _ => ExitCode::Unknown(128 + raw),
                };
            }
        }

        ExitCode::Unknown(-1)
    }

    /// Check if this exit code indicates success.
    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Ok)
    }

    /// Crash signatures attributable to resource exhaustion.
    ///
    /// For these the caller gets whatever (interim) solution the worker wrote
    /// instead of an error, unless it asked to fail on all crashes.
    pub fn should_be_ignored_silently(&self) -> bool {
        matches!(
            self,
            ExitCode::OutOfMemory
                | ExitCode::UncaughtException1
                | ExitCode::UncaughtException2
                | ExitCode::UncaughtException3
                | ExitCode::UncaughtException4
                | ExitCode::UncaughtException5
                | ExitCode::ForcedTermination
        )
    }

    /// Human-readable description.
    pub fn message(&self) -> String {
        match self {
            ExitCode::Ok => String::new(),
            ExitCode::KilledExternally => "Solver process killed.".to_string(),
            ExitCode::UncaughtException1 => {
                "Uncaught exception, likely out of memory (stack buffer overflow Windows 7).".to_string()
            }
            ExitCode::UncaughtException2 => {
                "Uncaught exception, likely out of memory (C++ exception or abort).".to_string()
            }
            ExitCode::UncaughtException3 => {
                "Uncaught exception, likely out of memory (stack buffer overflow Windows 10).".to_string()
            }
            ExitCode::UncaughtException4 => {
                "Uncaught exception, the heap was most likely filled or corrupted.".to_string()
            }
            ExitCode::UncaughtException5 => "Uncaught exception: Access violation.".to_string(),
            ExitCode::MissingLibrary => "Shared library missing.".to_string(),
            ExitCode::OutOfMemory => "Out of memory.".to_string(),
            ExitCode::CommandLineError => "Invalid command line.".to_string(),
            ExitCode::SharedMemoryError => "Failed communicating via shared memory.".to_string(),
            ExitCode::ModelError => "Failed generating model.".to_string(),
            ExitCode::SolverError => "Failed solving (solver error).".to_string(),
            // The stub reports its own timeouts with the wait budget; seeing
            // this as a real exit code is unexpected.
            ExitCode::ForcedTermination => {
                "Unexpected exit code \"forced termination\".".to_string()
            }
            ExitCode::InvalidStartSolution => "Invalid start solution.".to_string(),
            ExitCode::Unknown(c) => format!("Unknown exit code {}.", c),
        }
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

/// Errors that can occur during solver operations.
#[derive(Debug, Error)]
pub enum SolverError {
    /// Unknown solver name.
    #[error("Unknown solver: {0}")]
    UnknownSolver(String),

    /// Worker executable could not be found.
    #[error("Solver worker {name} is not installed. Looked next to the executable, in ~/.ilp-solver/solvers and on PATH")]
    NotInstalled { name: String },

    /// Worker process failed to start.
    #[error("Failed to start solver process: {0}")]
    ProcessStart(#[source] std::io::Error),

    /// Serialization or shared memory failure on the calling side.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Worker ended with a code that is not silently ignored.
    #[error("Solver process failed with exit code {}: {message}", exit_code.code())]
    Worker { exit_code: ExitCode, message: String },

    /// The start solution violates bounds, integrality or constraints.
    #[error("Invalid start solution: {0}")]
    InvalidStartSolution(String),

    /// The problem data is inconsistent.
    #[error("Model error: {0}")]
    Model(String),

    /// In-process solve failed.
    #[error("Solver error: {0}")]
    Solver(String),

    /// Configuration could not be read or written.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SolverError {
    /// Exit code reported by the worker, if this error came from one.
    pub fn exit_code(&self) -> Option<ExitCode> {
        match self {
            SolverError::Worker { exit_code, .. } => Some(*exit_code),
            SolverError::InvalidStartSolution(_) => Some(ExitCode::InvalidStartSolution),
            _ => None,
        }
    }
}

impl From<CodecError> for SolverError {
    fn from(e: CodecError) -> Self {
        SolverError::Transport(e.to_string())
    }
}

impl From<ShmError> for SolverError {
    fn from(e: ShmError) -> Self {
        SolverError::Transport(e.to_string())
    }
}

impl From<toml::de::Error> for SolverError {
    fn from(e: toml::de::Error) -> Self {
        SolverError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for SolverError {
    fn from(e: toml::ser::Error) -> Self {
        SolverError::Config(e.to_string())
    }
}

/// Result type alias for solver operations.
pub type SolverResult<T> = Result<T, SolverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_codes_are_contiguous() {
        assert_eq!(ExitCode::OutOfMemory.code(), CUSTOM_EXIT_CODE_BASE);
        assert_eq!(ExitCode::InvalidStartSolution.code(), CUSTOM_EXIT_CODE_BASE + 6);
        for code in ExitCode::CUSTOM {
            assert_eq!(ExitCode::from_raw(code.code()), code);
        }
    }

    #[test]
    fn test_crash_signatures_roundtrip() {
        for code in [
            ExitCode::Ok,
            ExitCode::UncaughtException1,
            ExitCode::UncaughtException2,
            ExitCode::UncaughtException3,
            ExitCode::UncaughtException4,
            ExitCode::UncaughtException5,
            ExitCode::MissingLibrary,
        ] {
            assert_eq!(ExitCode::from_raw(code.code()), code);
        }
        assert_eq!(ExitCode::from_raw(42), ExitCode::Unknown(42));
    }

    #[cfg(windows)]
    #[test]
    fn test_exit_code_one_is_external_kill() {
        assert_eq!(ExitCode::from_raw(1), ExitCode::KilledExternally);
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code_one_is_generic_failure() {
        assert_eq!(ExitCode::from_raw(1), ExitCode::Unknown(1));
        assert!(!ExitCode::from_raw(1).should_be_ignored_silently());

        use std::os::unix::process::ExitStatusExt;
        // Exit status 1 << 8 versus termination by SIGTERM
        assert_eq!(ExitCode::from_status(ExitStatus::from_raw(1 << 8)), ExitCode::Unknown(1));
        assert_eq!(ExitCode::from_status(ExitStatus::from_raw(15)), ExitCode::KilledExternally);
    }

    #[test]
    fn test_ignored_silently() {
        assert!(ExitCode::OutOfMemory.should_be_ignored_silently());
        assert!(ExitCode::ForcedTermination.should_be_ignored_silently());
        assert!(ExitCode::UncaughtException5.should_be_ignored_silently());

        assert!(!ExitCode::Ok.should_be_ignored_silently());
        assert!(!ExitCode::ModelError.should_be_ignored_silently());
        assert!(!ExitCode::SolverError.should_be_ignored_silently());
        assert!(!ExitCode::InvalidStartSolution.should_be_ignored_silently());
        assert!(!ExitCode::Unknown(7).should_be_ignored_silently());
    }

    #[test]
    fn test_messages() {
        assert!(ExitCode::Ok.message().is_empty());
        assert_eq!(ExitCode::CommandLineError.message(), "Invalid command line.");
        assert!(ExitCode::Unknown(99).message().contains("99"));
    }

    #[cfg(unix)]
    #[test]
    fn test_from_status_signals() {
        use std::os::unix::process::ExitStatusExt;

        // Raw wait statuses: low 7 bits carry the terminating signal
        assert_eq!(ExitCode::from_status(ExitStatus::from_raw(6)), ExitCode::UncaughtException2);
        assert_eq!(ExitCode::from_status(ExitStatus::from_raw(9)), ExitCode::OutOfMemory);
        assert_eq!(ExitCode::from_status(ExitStatus::from_raw(11)), ExitCode::UncaughtException5);
        assert_eq!(ExitCode::from_status(ExitStatus::from_raw(0)), ExitCode::Ok);
        // Exit status 115 << 8
        assert_eq!(
            ExitCode::from_status(ExitStatus::from_raw(115 << 8)),
            ExitCode::CommandLineError
        );
    }

    #[test]
    fn test_worker_error_carries_code() {
        let err = SolverError::Worker {
            exit_code: ExitCode::SolverError,
            message: ExitCode::SolverError.message(),
        };
        assert_eq!(err.exit_code(), Some(ExitCode::SolverError));
        assert!(err.to_string().contains("solver error"));
    }
}
