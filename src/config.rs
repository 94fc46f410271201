//! Engine configuration, passed explicitly into every run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Defaults for WaitFor polling when a step does not set
    /// `maxWait` / `interval`.
    #[serde(default)]
    pub wait_for: WaitForConfig,
    /// Keep executing after a failed step. When off, a failed step ends
    /// the run, or skips the rest of the enclosing window.
    #[serde(default = "default_continue_on_failure")]
    pub continue_on_failure: bool,
    /// Shell used by the `Cmd` getter.
    #[serde(default)]
    pub shell: ShellConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitForConfig {
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub program: String,
    pub flag: String,
}

fn default_max_wait_ms() -> u64 {
    60_000
}

fn default_interval_ms() -> u64 {
    500
}

fn default_continue_on_failure() -> bool {
    true
}

impl Default for WaitForConfig {
    fn default() -> Self {
        Self {
            max_wait_ms: default_max_wait_ms(),
            interval_ms: default_interval_ms(),
        }
    }
}

impl WaitForConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        if cfg!(windows) {
            Self {
                program: "cmd".to_string(),
                flag: "/C".to_string(),
            }
        } else {
            Self {
                program: "sh".to_string(),
                flag: "-c".to_string(),
            }
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wait_for: WaitForConfig::default(),
            continue_on_failure: default_continue_on_failure(),
            shell: ShellConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Load a YAML config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading engine config from {}", path.display());

        let content = fs::read_to_string(path).context(format!(
            "Failed to read config file: {}",
            path.display()
        ))?;
        let config = Self::from_yaml(&content).context(format!(
            "Failed to parse YAML from {}",
            path.display()
        ))?;

        debug!("Loaded engine config: {:?}", config);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.wait_for.max_wait(), Duration::from_secs(60));
        assert_eq!(config.wait_for.interval(), Duration::from_millis(500));
        assert!(config.continue_on_failure);
    }

    #[test]
    fn test_partial_yaml_falls_back_to_defaults() {
        let config =
            EngineConfig::from_yaml("wait_for:\n  interval_ms: 100\n").unwrap();
        assert_eq!(config.wait_for.interval_ms, 100);
        assert_eq!(config.wait_for.max_wait_ms, 60_000);
        assert_eq!(config.shell, ShellConfig::default());
    }

    #[test]
    fn test_partial_shell_block_keeps_default_program() {
        let config = EngineConfig::from_yaml("shell:\n  flag: -lc\n").unwrap();
        assert_eq!(config.shell.flag, "-lc");
        assert_eq!(config.shell.program, ShellConfig::default().program);
    }

    #[test]
    fn test_empty_mapping_is_default() {
        let config = EngineConfig::from_yaml("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(
            &path,
            "continue_on_failure: false\nshell:\n  program: bash\n  flag: -c\n",
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert!(!config.continue_on_failure);
        assert_eq!(config.shell.program, "bash");
    }

    #[test]
    fn test_load_missing_file_has_context() {
        let err = EngineConfig::load("/nonexistent/engine.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_yaml_round_trip_keeps_values() {
        let mut config = EngineConfig::default();
        config.wait_for.max_wait_ms = 1_000;
        let yaml = config.to_yaml().unwrap();
        assert_eq!(EngineConfig::from_yaml(&yaml).unwrap(), config);
    }
}
