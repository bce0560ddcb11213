use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Top-level node configuration, loadable from TOML. Every section has
/// working defaults; a bare `Config::default()` boots an ephemeral dev
/// node.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub storage: StorageConfig,
    pub secrets: SecretsConfig,
    pub randomness: RandomnessConfig,
    pub engine: EngineSection,
    pub executor: ExecutorSection,
    pub automation: AutomationSection,
    pub oracle: OracleSection,
    pub gasbank: GasBankSection,
    pub feed: FeedSection,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&raw)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// `memory` or `sqlite`.
    pub backend: StorageBackend,
    /// Database file for the sqlite backend.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { backend: StorageBackend::Memory, path: None }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecretsConfig {
    /// Hex-encoded 32-byte AES key. Required with a persistent storage
    /// backend; an ephemeral key is generated for in-memory nodes.
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RandomnessConfig {
    /// Hex-encoded 32-byte Ed25519 seed. Without it signatures do not
    /// survive restarts.
    pub signing_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub start_deadline_secs: u64,
    pub stop_deadline_secs: u64,
    pub slow_threshold_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self { start_deadline_secs: 30, stop_deadline_secs: 10, slow_threshold_ms: 2_000 }
    }
}

impl EngineSection {
    pub fn engine_config(&self) -> strato_engine::EngineConfig {
        strato_engine::EngineConfig {
            start_deadline: Duration::from_secs(self.start_deadline_secs),
            stop_deadline: Duration::from_secs(self.stop_deadline_secs),
            slow_threshold: Duration::from_millis(self.slow_threshold_ms),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorSection {
    pub sandbox_timeout_secs: u64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self { sandbox_timeout_secs: 30 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutomationSection {
    pub tick_interval_ms: u64,
    pub workers: usize,
}

impl Default for AutomationSection {
    fn default() -> Self {
        Self { tick_interval_ms: 1_000, workers: 8 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OracleSection {
    pub poll_interval_ms: u64,
    pub workers: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub default_ttl_secs: u64,
    pub request_timeout_secs: u64,
    /// Runner callback endpoint; callbacks are skipped when unset.
    pub runner_url: Option<String>,
    pub runner_token: Option<String>,
    /// Hex-encoded Ed25519 seed signing runner callbacks.
    pub signing_key: Option<String>,
}

impl Default for OracleSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            workers: 8,
            max_attempts: 5,
            backoff_base_ms: 5_000,
            backoff_cap_ms: 300_000,
            default_ttl_secs: 3_600,
            request_timeout_secs: 10,
            runner_url: None,
            runner_token: None,
            signing_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GasBankSection {
    pub poll_interval_ms: u64,
    pub workers: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for GasBankSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            workers: 4,
            max_attempts: 5,
            backoff_base_ms: 10_000,
            backoff_cap_ms: 600_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedSection {
    pub refresh_interval_secs: u64,
    pub submission_window_ppm: u32,
    pub history_window: Option<usize>,
    /// Hex-encoded Ed25519 seed signing internally published rounds.
    pub signing_key: Option<String>,
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 15,
            submission_window_ppm: 20_000,
            history_window: Some(10_000),
            signing_key: None,
        }
    }
}
