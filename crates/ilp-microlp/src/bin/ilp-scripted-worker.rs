//! Worker with scripted misbehavior.
//!
//! Runs the regular worker harness around [`MicrolpBackend`], but deviates
//! as told by `ILP_WORKER_SCRIPT`:
//!
//! | Script | Behavior |
//! |--------|----------|
//! | unset or `solve` | solve normally |
//! | `interim-then-hang` | report the optimum as an interim solution, then sleep forever |
//! | `exit:<code>` | exit with the named `ExitCode` (e.g. `exit:ModelError`) or raw code |
//! | `abort` | abort the process |
//! | `panic` | panic inside the backend |
//! | `oom` | report running out of memory |

use anyhow::{anyhow, bail, Result};
use ilp_microlp::MicrolpBackend;
use ilp_solver_common::{
    run_solver_plugin, BackendError, ExitCode, IlpDataView, IlpSolutionData, SolutionStatus, SolverBackend,
};
use std::str::FromStr;
use std::time::Duration;

const SCRIPT_ENV: &str = "ILP_WORKER_SCRIPT";

const NAMED_EXIT_CODES: [ExitCode; 15] = [
    ExitCode::Ok,
    ExitCode::KilledExternally,
    ExitCode::UncaughtException1,
    ExitCode::UncaughtException2,
    ExitCode::UncaughtException3,
    ExitCode::UncaughtException4,
    ExitCode::UncaughtException5,
    ExitCode::MissingLibrary,
    ExitCode::OutOfMemory,
    ExitCode::CommandLineError,
    ExitCode::SharedMemoryError,
    ExitCode::ModelError,
    ExitCode::SolverError,
    ExitCode::ForcedTermination,
    ExitCode::InvalidStartSolution,
];

#[derive(Debug, Clone, Copy, PartialEq)]
enum WorkerScript {
    Solve,
    InterimThenHang,
    Exit(ExitCode),
    Abort,
    Panic,
    OutOfMemory,
}

impl FromStr for WorkerScript {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(name) = s.strip_prefix("exit:") {
            let code = NAMED_EXIT_CODES
                .into_iter()
                .find(|code| format!("{:?}", code) == name)
                .or_else(|| name.parse().ok().map(ExitCode::from_raw))
                .ok_or_else(|| anyhow!("Unknown exit code {:?}", name))?;
            return Ok(WorkerScript::Exit(code));
        }
        Ok(match s {
            "" | "solve" => WorkerScript::Solve,
            "interim-then-hang" => WorkerScript::InterimThenHang,
            "abort" => WorkerScript::Abort,
            "panic" => WorkerScript::Panic,
            "oom" => WorkerScript::OutOfMemory,
            other => bail!("Unknown {} {:?}", SCRIPT_ENV, other),
        })
    }
}

struct ScriptedBackend {
    script: WorkerScript,
}

impl SolverBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "ilp-scripted-worker"
    }

    fn solve(
        &self,
        problem: &IlpDataView<'_>,
        on_improved: &mut dyn FnMut(&IlpSolutionData),
    ) -> Result<IlpSolutionData, BackendError> {
        match self.script {
            WorkerScript::Solve => MicrolpBackend.solve(problem, on_improved),
            WorkerScript::InterimThenHang => {
                let optimum = MicrolpBackend.solve(problem, &mut |_| {})?;
                on_improved(&IlpSolutionData {
                    status: SolutionStatus::Suboptimal,
                    ..optimum
                });
                loop {
                    std::thread::sleep(Duration::from_secs(60));
                }
            }
            WorkerScript::Exit(code) => std::process::exit(code.code()),
            WorkerScript::Abort => std::process::abort(),
            WorkerScript::Panic => panic!("scripted panic"),
            WorkerScript::OutOfMemory => Err(BackendError::OutOfMemory),
        }
    }
}

fn main() {
    let script = match std::env::var(SCRIPT_ENV).unwrap_or_default().parse() {
        Ok(script) => script,
        Err(e) => {
            eprintln!("{:#}", e);
            std::process::exit(ExitCode::CommandLineError.code());
        }
    };
    run_solver_plugin(ScriptedBackend { script });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scripts() {
        assert_eq!("".parse::<WorkerScript>().unwrap(), WorkerScript::Solve);
        assert_eq!("oom".parse::<WorkerScript>().unwrap(), WorkerScript::OutOfMemory);
        assert_eq!(
            "exit:ModelError".parse::<WorkerScript>().unwrap(),
            WorkerScript::Exit(ExitCode::ModelError)
        );
        assert_eq!(
            "exit:3".parse::<WorkerScript>().unwrap(),
            WorkerScript::Exit(ExitCode::UncaughtException1)
        );
        assert!("exit:Nope".parse::<WorkerScript>().is_err());
        assert!("segfault".parse::<WorkerScript>().is_err());
    }
}
