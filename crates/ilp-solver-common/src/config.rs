//! Configuration of isolated solving.
//!
//! Stored in `~/.ilp-solver/config.toml`. Partial files are fine: missing
//! keys take the defaults below.

use crate::error::{SolverError, SolverResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for [`IlpSolverStub`](crate::stub::IlpSolverStub) and the shared-memory channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    /// Extra wait time as a fraction of the solver time limit.
    pub relative_overtime: f64,

    /// Extra wait time in seconds on top of the relative overtime.
    pub absolute_overtime_seconds: f64,

    /// Prefix of shared memory segment names.
    pub shm_base_name: String,

    /// How many numbered names to try before giving up.
    pub shm_name_trials: u32,

    /// Report every worker crash as an error, including those that usually
    /// mean "out of memory" and still leave a usable interim solution.
    pub throw_on_all_crashes: bool,

    /// Worker executable; searched for when unset.
    pub worker_path: Option<PathBuf>,

    /// How often the supervisor checks whether the worker has exited.
    pub poll_interval_ms: u64,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            relative_overtime: 0.5,
            absolute_overtime_seconds: 10.0,
            shm_base_name: "IlpSolver".to_string(),
            shm_name_trials: 10_000,
            throw_on_all_crashes: false,
            worker_path: None,
            poll_interval_ms: 10,
        }
    }
}

impl IsolationConfig {
    /// Get the default config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".ilp-solver"))
    }

    /// Get the default config file path.
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join("config.toml"))
    }

    /// Directory searched for installed worker executables.
    pub fn solvers_dir() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join("solvers"))
    }

    /// Load configuration from the default location.
    ///
    /// Returns default config if file doesn't exist.
    pub fn load() -> SolverResult<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> SolverResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> SolverResult<()> {
        let path = Self::config_path()
            .ok_or_else(|| SolverError::Config("could not determine config directory".to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.save_to(&path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> SolverResult<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// How long to wait for a worker given the solver time limit.
    ///
    /// `(1 + relative_overtime) * max_seconds + absolute_overtime_seconds`,
    /// or `None` (no limit) when that does not fit a [`Duration`].
    pub fn wait_budget(&self, max_seconds: f64) -> Option<Duration> {
        let wait = (1.0 + self.relative_overtime) * max_seconds + self.absolute_overtime_seconds;
        Duration::try_from_secs_f64(wait.max(0.0)).ok()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = IsolationConfig::default();
        assert_eq!(config.relative_overtime, 0.5);
        assert_eq!(config.absolute_overtime_seconds, 10.0);
        assert_eq!(config.shm_name_trials, 10_000);
        assert!(!config.throw_on_all_crashes);
        assert!(config.worker_path.is_none());
    }

    #[test]
    fn test_partial_config_parsing() {
        let toml = r#"
            throw_on_all_crashes = true
            shm_base_name = "Custom"
        "#;
        let config: IsolationConfig = toml::from_str(toml).unwrap();
        assert!(config.throw_on_all_crashes);
        assert_eq!(config.shm_base_name, "Custom");
        assert_eq!(config.relative_overtime, 0.5);
    }

    #[test]
    fn test_save_and_load() {
        let mut config = IsolationConfig::default();
        config.worker_path = Some(PathBuf::from("/opt/ilp/ilp-microlp"));
        config.poll_interval_ms = 25;

        let file = NamedTempFile::new().unwrap();
        config.save_to(file.path()).unwrap();
        let loaded = IsolationConfig::load_from(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "relative_overtime = \"lots\"").unwrap();
        assert!(matches!(
            IsolationConfig::load_from(file.path()),
            Err(SolverError::Config(_))
        ));
    }

    #[test]
    fn test_wait_budget() {
        let config = IsolationConfig::default();
        assert_eq!(config.wait_budget(10.0), Some(Duration::from_secs(25)));
        assert_eq!(config.wait_budget(0.0), Some(Duration::from_secs(10)));
        assert_eq!(config.wait_budget(f64::MAX), None);
        assert_eq!(config.wait_budget(f64::INFINITY), None);
    }
}
