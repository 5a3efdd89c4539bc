//! Worker process management.
//!
//! Spawns a worker with the channel name as its only argument, waits for it
//! within a time budget and classifies how it ended.

use crate::config::IsolationConfig;
use crate::error::{ExitCode, SolverError, SolverResult};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How a worker run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOutcome {
    pub exit_code: ExitCode,
    /// The worker was killed because the wait budget ran out.
    pub timed_out: bool,
    pub elapsed: Duration,
}

/// Launches and supervises worker processes.
#[derive(Debug, Clone)]
pub struct WorkerSupervisor {
    executable: PathBuf,
    envs: Vec<(OsString, OsString)>,
    quiet: bool,
    poll_interval: Duration,
}

impl WorkerSupervisor {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            envs: Vec::new(),
            quiet: false,
            poll_interval: Duration::from_millis(10),
        }
    }

    /// Set an environment variable for the worker.
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Set several environment variables for the worker.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        for (key, value) in vars {
            self = self.env(key, value);
        }
        self
    }

    /// Discard the worker's stdout and stderr.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// How often [`run_blocking`](Self::run_blocking) checks for exit.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn output(&self) -> Stdio {
        if self.quiet {
            Stdio::null()
        } else {
            Stdio::inherit()
        }
    }

    fn command(&self, argument: &str) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.executable);
        cmd.arg(argument)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(self.output())
            .stderr(self.output());
        cmd
    }

    /// Run the worker, blocking the calling thread until it ends.
    ///
    /// With a `timeout`, a worker still running after it is killed and the
    /// outcome is [`ExitCode::ForcedTermination`].
    pub fn run_blocking(&self, argument: &str, timeout: Option<Duration>) -> SolverResult<WorkerOutcome> {
        let start = Instant::now();
        let mut child = self
            .command(argument)
            .spawn()
            .map_err(SolverError::ProcessStart)?;
        debug!(pid = child.id(), "Spawned worker {}", self.executable.display());
        self.supervise(&mut child, start, timeout)
    }

    fn supervise(
        &self,
        child: &mut impl RunningWorker,
        start: Instant,
        timeout: Option<Duration>,
    ) -> SolverResult<WorkerOutcome> {
        loop {
            let status = match child.try_wait() {
                Ok(status) => status,
                Err(e) => {
                    warn!(pid = child.id(), "Waiting for worker failed: {}", e);
                    if let Err(reap) = kill_and_reap(child) {
                        warn!("Could not reap worker: {}", reap);
                    }
                    return Err(e.into());
                }
            };
            if let Some(status) = status {
                let exit_code = ExitCode::from_status(status);
                debug!("Worker exited with {} after {:?}", exit_code, start.elapsed());
                return Ok(WorkerOutcome {
                    exit_code,
                    timed_out: false,
                    elapsed: start.elapsed(),
                });
            }

            let mut nap = self.poll_interval;
            if let Some(limit) = timeout {
                let elapsed = start.elapsed();
                if elapsed >= limit {
                    warn!(pid = child.id(), "Worker exceeded {:?}, killing it", limit);
                    kill_and_reap(child)?;
                    return Ok(WorkerOutcome {
                        exit_code: ExitCode::ForcedTermination,
                        timed_out: true,
                        elapsed: start.elapsed(),
                    });
                }
                nap = nap.min(limit - elapsed);
            }
            std::thread::sleep(nap);
        }
    }

    /// Async version of [`run_blocking`](Self::run_blocking).
    ///
    /// The worker is killed if the returned future is dropped.
    pub async fn run(&self, argument: &str, timeout: Option<Duration>) -> SolverResult<WorkerOutcome> {
        let start = Instant::now();
        let mut child = tokio::process::Command::new(&self.executable)
            .arg(argument)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(self.output())
            .stderr(self.output())
            .kill_on_drop(true)
            .spawn()
            .map_err(SolverError::ProcessStart)?;
        debug!(pid = child.id(), "Spawned worker {}", self.executable.display());

        let status = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(pid = child.id(), "Worker exceeded {:?}, killing it", limit);
                    if let Err(e) = child.kill().await {
                        debug!("Kill failed: {}", e);
                    }
                    return Ok(WorkerOutcome {
                        exit_code: ExitCode::ForcedTermination,
                        timed_out: true,
                        elapsed: start.elapsed(),
                    });
                }
            },
            None => child.wait().await?,
        };

        let exit_code = ExitCode::from_status(status);
        debug!("Worker exited with {} after {:?}", exit_code, start.elapsed());
        Ok(WorkerOutcome {
            exit_code,
            timed_out: false,
            elapsed: start.elapsed(),
        })
    }
}

/// The parts of a child process the blocking wait loop uses.
trait RunningWorker {
    fn id(&self) -> u32;
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;
    fn kill(&mut self) -> io::Result<()>;
    fn wait(&mut self) -> io::Result<ExitStatus>;
}

impl RunningWorker for std::process::Child {
    fn id(&self) -> u32 {
        std::process::Child::id(self)
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        std::process::Child::try_wait(self)
    }

    fn kill(&mut self) -> io::Result<()> {
        std::process::Child::kill(self)
    }

    fn wait(&mut self) -> io::Result<ExitStatus> {
        std::process::Child::wait(self)
    }
}

/// Kill the worker and wait for it, so no zombie is left behind.
fn kill_and_reap(child: &mut impl RunningWorker) -> io::Result<ExitStatus> {
    if let Err(e) = child.kill() {
        // Raced with a regular exit
        debug!("Kill failed: {}", e);
    }
    let status = child.wait()?;
    debug!("Killed worker reaped with {:?}", status);
    Ok(status)
}

/// Find a worker executable.
///
/// Search order:
/// 1. `worker_path` from the configuration
/// 2. Next to the current executable (and its parent for test binaries in `deps/`)
/// 3. `~/.ilp-solver/solvers/<binary_name>`
/// 4. System PATH
pub fn find_worker(config: &IsolationConfig, binary_name: &str) -> SolverResult<PathBuf> {
    if let Some(path) = &config.worker_path {
        if path.exists() {
            return Ok(path.clone());
        }
        warn!("Configured worker {} does not exist", path.display());
    }

    let file_name = format!("{}{}", binary_name, std::env::consts::EXE_SUFFIX);

    if let Ok(exe) = std::env::current_exe() {
        let mut dir = exe.parent();
        while let Some(d) = dir {
            let candidate = d.join(&file_name);
            if candidate.exists() {
                return Ok(candidate);
            }
            dir = match d.file_name() {
                Some(name) if name == "deps" => d.parent(),
                _ => None,
            };
        }
    }

    if let Some(solvers) = IsolationConfig::solvers_dir() {
        let candidate = solvers.join(&file_name);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    if let Ok(path) = which::which(binary_name) {
        return Ok(path);
    }

    Err(SolverError::NotInstalled {
        name: binary_name.to_string(),
    })
}
