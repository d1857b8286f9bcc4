//! Configuration surface for the execution engine

use crate::limits::ResourceLimits;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("crucible-sandbox")
}

fn default_max_concurrent() -> usize {
    50
}

fn default_output_cap() -> usize {
    1024 * 1024
}

fn default_grace_period() -> Duration {
    Duration::from_secs(2)
}

fn default_true() -> bool {
    true
}

/// Container backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Prefix for container names, used to find orphans on cleanup
    pub name_prefix: String,

    pub default_limits: ResourceLimits,

    /// Per-language limit overrides, keyed by canonical language id
    #[serde(default)]
    pub language_limits: HashMap<String, ResourceLimits>,

    /// Allow outbound network from containers (default off)
    #[serde(default)]
    pub enable_network: bool,

    #[serde(default = "default_true")]
    pub enable_seccomp: bool,

    #[serde(default = "default_true")]
    pub read_only_root: bool,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Per-stream stdout/stderr byte cap
    #[serde(default = "default_output_cap")]
    pub max_output_bytes: usize,

    /// Grace between the stop signal and the forced kill
    #[serde(default = "default_grace_period", with = "humantime_serde")]
    pub stop_grace: Duration,

    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Container user, e.g. "1000:1000". When unset the image default
    /// applies; non-root users need the scratch mount to be readable by
    /// that uid.
    #[serde(default)]
    pub run_as_user: Option<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        let mut language_limits = HashMap::new();
        for lang in ["go", "rust", "java", "c", "cpp"] {
            language_limits.insert(lang.to_string(), ResourceLimits::compiled());
        }
        Self {
            name_prefix: "crucible-sandbox".to_string(),
            default_limits: ResourceLimits::default(),
            language_limits,
            enable_network: false,
            enable_seccomp: true,
            read_only_root: true,
            max_concurrent: default_max_concurrent(),
            max_output_bytes: default_output_cap(),
            stop_grace: default_grace_period(),
            scratch_dir: default_scratch_dir(),
            run_as_user: None,
        }
    }
}

impl ContainerConfig {
    /// Effective limits for a language.
    pub fn limits_for(&self, language: &str) -> ResourceLimits {
        self.language_limits
            .get(language)
            .cloned()
            .unwrap_or_else(|| self.default_limits.clone())
    }
}

/// Process backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub default_limits: ResourceLimits,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_output_cap")]
    pub max_output_bytes: usize,

    #[serde(default = "default_grace_period", with = "humantime_serde")]
    pub stop_grace: Duration,

    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Extra environment entries added to the sanitized base environment
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            default_limits: ResourceLimits::default(),
            max_concurrent: default_max_concurrent(),
            max_output_bytes: default_output_cap(),
            stop_grace: default_grace_period(),
            scratch_dir: default_scratch_dir(),
            environment: HashMap::new(),
        }
    }
}

/// Factory policy and backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactoryConfig {
    /// Fail instead of falling back to the process backend when the
    /// container engine is unreachable
    #[serde(default)]
    pub force_container: bool,

    /// Reject every execution request
    #[serde(default)]
    pub disable_execution: bool,

    #[serde(default)]
    pub container: ContainerConfig,

    #[serde(default)]
    pub process: ProcessConfig,
}

impl FactoryConfig {
    /// Load configuration from a TOML file.
    pub async fn from_toml_path(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(toml::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiled_languages_get_override_limits() {
        let config = ContainerConfig::default();
        assert_eq!(config.limits_for("go").memory_bytes, 512 * 1024 * 1024);
        assert_eq!(config.limits_for("python").memory_bytes, 256 * 1024 * 1024);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = FactoryConfig {
            force_container: true,
            ..Default::default()
        };
        let text = toml::to_string(&config).unwrap();
        let parsed: FactoryConfig = toml::from_str(&text).unwrap();
        assert!(parsed.force_container);
        assert_eq!(
            parsed.container.max_concurrent,
            config.container.max_concurrent
        );
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let parsed: FactoryConfig = toml::from_str("force_container = false").unwrap();
        assert!(!parsed.disable_execution);
        assert_eq!(parsed.process.max_output_bytes, 1024 * 1024);
    }
}
