use crate::executor::{DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT};
use crate::mutator::RuleKind;
use crate::scheduler::IndexRange;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SessionSettings {
    pub sample: Option<PathBuf>,
    pub scores: Option<PathBuf>,
    pub seed: Option<String>,
    #[serde(default)]
    pub rule: RuleKind,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct HarnessSettings {
    /// Target program and leading arguments; the input path is appended.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    pub work_dir: Option<PathBuf>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

impl HarnessSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: default_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            work_dir: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default)]
    pub start: u64,
    #[serde(default)]
    pub end: Option<u64>,
    #[serde(default = "default_threads")]
    pub threads: usize,
}

pub fn default_threads() -> usize {
    1
}

impl FuzzerSettings {
    pub fn range(&self) -> IndexRange {
        IndexRange {
            start: self.start,
            end: self.end,
        }
    }
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            start: 0,
            end: None,
            threads: default_threads(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CoralineConfig {
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub harness: HarnessSettings,
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
}

impl CoralineConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;
        Self::from_toml(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file {:?}: {}", path, e))
    }

    pub fn from_toml(content: &str) -> Result<Self, anyhow::Error> {
        let config: CoralineConfig = toml::from_str(content)?;
        Ok(config)
    }
}
