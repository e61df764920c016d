//! missiond configuration types and loading
//!
//! Configuration comes from YAML (`.missiond.yml`, then the user config dir),
//! then a fixed set of environment variables override file values. Only the
//! variables listed in [`Config::apply_env`] are part of the contract.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main missiond configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Mission admission
    pub admission: AdmissionConfig,

    /// LLM gateway: rate limits, timeouts, provider chains
    pub llm: LlmConfig,

    /// Agent executor bounds
    pub executor: ExecutorConfig,

    /// Pattern engine defaults
    pub pattern: PatternConfig,

    /// Adversarial guard
    pub guard: GuardConfig,

    /// Darwin selection
    pub darwin: DarwinConfig,

    /// Message bus
    pub bus: BusConfig,

    /// Tool runner defaults
    pub tools: ToolsConfig,

    /// Storage locations
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration with fallback chain, then apply env overrides
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file(config_path)?;
        config.apply_env();
        Ok(config)
    }

    fn load_file(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".missiond.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("missiond").join("missiond.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Apply the recognized environment variables over file values
    ///
    /// No other variable is consulted anywhere in the core.
    pub fn apply_env(&mut self) {
        fn env_parse<T: std::str::FromStr>(name: &str, slot: &mut T) {
            if let Ok(raw) = std::env::var(name)
                && let Ok(value) = raw.parse::<T>()
            {
                *slot = value;
            }
        }

        env_parse("ADMISSION_CONCURRENCY", &mut self.admission.concurrency);
        env_parse("LLM_RATE_LIMIT_RPM", &mut self.llm.rate_limit_rpm);
        env_parse("LLM_TOKEN_WINDOW", &mut self.llm.token_window);
        env_parse("LLM_PROVIDER_COOLDOWN_S", &mut self.llm.provider_cooldown_s);
        env_parse("PATTERN_DEFAULT_TIMEOUT_S", &mut self.pattern.default_timeout_s);
        env_parse("EXECUTOR_MAX_ROUNDS", &mut self.executor.max_rounds);
        env_parse("ADVERSARIAL_L1_ENABLED", &mut self.guard.l1_enabled);
        env_parse("DARWIN_WARMUP_RUNS", &mut self.darwin.warmup_runs);
        env_parse("DARWIN_AB_DELTA", &mut self.darwin.ab_delta);
        env_parse("DARWIN_AB_RANDOM_P", &mut self.darwin.ab_random_p);
    }
}

/// Mission admission limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Concurrent missions admitted globally
    pub concurrency: usize,

    /// Concurrent missions per project (0 = unlimited)
    #[serde(rename = "per-project")]
    pub per_project: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            per_project: 0,
        }
    }
}

/// LLM gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Requests per minute per provider
    #[serde(rename = "rate-limit-rpm")]
    pub rate_limit_rpm: u32,

    /// Soft token ceiling over the sliding 60s window
    #[serde(rename = "token-window")]
    pub token_window: u64,

    /// Longest a call waits on the limiter before failing rate_limited
    #[serde(rename = "rate-wait-max-s")]
    pub rate_wait_max_s: u64,

    /// Cooldown after a provider returns 429
    #[serde(rename = "provider-cooldown-s")]
    pub provider_cooldown_s: u64,

    /// Connect timeout
    #[serde(rename = "connect-timeout-s")]
    pub connect_timeout_s: u64,

    /// Read timeout
    #[serde(rename = "read-timeout-s")]
    pub read_timeout_s: u64,

    /// Provider chains per model category, primary first
    pub providers: Vec<ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            rate_limit_rpm: 15,
            token_window: 100_000,
            rate_wait_max_s: 30,
            provider_cooldown_s: 90,
            connect_timeout_s: 30,
            read_timeout_s: 300,
            providers: vec![ProviderConfig::default()],
        }
    }
}

impl LlmConfig {
    pub fn rate_wait_max(&self) -> Duration {
        Duration::from_secs(self.rate_wait_max_s)
    }

    pub fn provider_cooldown(&self) -> Duration {
        Duration::from_secs(self.provider_cooldown_s)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_s)
    }
}

/// One configured provider endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider name ("anthropic", "openai", "mock")
    pub name: String,

    /// Wire protocol ("anthropic", "openai")
    pub protocol: String,

    /// Model categories this provider serves (empty = all)
    pub categories: Vec<String>,

    /// Default model per category, keyed by category tag
    pub models: std::collections::HashMap<String, String>,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "anthropic".to_string(),
            protocol: "anthropic".to_string(),
            categories: vec![],
            models: std::collections::HashMap::new(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 16384,
        }
    }
}

/// Agent executor bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Hard cap on tool rounds inside one agent turn
    #[serde(rename = "max-rounds")]
    pub max_rounds: u32,

    /// Sliding conversation window injected into each turn (messages)
    #[serde(rename = "history-window")]
    pub history_window: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_rounds: 15,
            history_window: 40,
        }
    }
}

/// Pattern engine defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Default pattern timeout in seconds
    #[serde(rename = "default-timeout-s")]
    pub default_timeout_s: u64,

    /// Default concurrent agents in parallel patterns
    #[serde(rename = "default-wip-limit")]
    pub default_wip_limit: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            default_timeout_s: 1800,
            default_wip_limit: 4,
        }
    }
}

/// Adversarial guard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Whether the semantic L1 review runs at all
    #[serde(rename = "l1-enabled")]
    pub l1_enabled: bool,

    /// Re-evaluations of a rejected turn (never re-runs the turn itself)
    #[serde(rename = "max-adversarial-retries")]
    pub max_adversarial_retries: u32,

    /// Minimum output length before TOO_SHORT fires
    #[serde(rename = "min-output-chars")]
    pub min_output_chars: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            l1_enabled: true,
            max_adversarial_retries: 0,
            min_output_chars: 40,
        }
    }
}

/// Darwin selection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DarwinConfig {
    /// Selections per cold key that stay uniform random
    #[serde(rename = "warmup-runs")]
    pub warmup_runs: i64,

    /// Sampled-score distance that triggers an A/B shadow run
    #[serde(rename = "ab-delta")]
    pub ab_delta: f64,

    /// Random shadow probability per mission
    #[serde(rename = "ab-random-p")]
    pub ab_random_p: f64,

    /// Minutes before a never-run key is force-explored
    #[serde(rename = "fairness-floor-min")]
    pub fairness_floor_min: i64,
}

impl Default for DarwinConfig {
    fn default() -> Self {
        Self {
            warmup_runs: 5,
            ab_delta: 10.0,
            ab_random_p: 0.1,
            fairness_floor_min: 60,
        }
    }
}

/// Message bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Per-recipient inbox capacity
    #[serde(rename = "inbox-capacity")]
    pub inbox_capacity: usize,

    /// Idle timeout for a blocking recv, in milliseconds
    #[serde(rename = "recv-idle-ms")]
    pub recv_idle_ms: u64,

    /// Lagged ticks after which a live listener is cut off
    #[serde(rename = "listener-lag-cutoff")]
    pub listener_lag_cutoff: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 2000,
            recv_idle_ms: 30_000,
            listener_lag_cutoff: 8,
        }
    }
}

/// Tool runner defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Default tool timeout in seconds
    #[serde(rename = "default-timeout-s")]
    pub default_timeout_s: u64,

    /// Timeout for android builders, which are much slower
    #[serde(rename = "android-timeout-s")]
    pub android_timeout_s: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timeout_s: 120,
            android_timeout_s: 900,
        }
    }
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the mission store
    #[serde(rename = "store-dir")]
    pub store_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_dir: ".missionstore".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.admission.concurrency, 1);
        assert_eq!(config.llm.rate_limit_rpm, 15);
        assert_eq!(config.llm.token_window, 100_000);
        assert_eq!(config.llm.provider_cooldown_s, 90);
        assert_eq!(config.pattern.default_timeout_s, 1800);
        assert_eq!(config.executor.max_rounds, 15);
        assert!(config.guard.l1_enabled);
        assert_eq!(config.guard.max_adversarial_retries, 0);
        assert_eq!(config.darwin.warmup_runs, 5);
        assert!((config.darwin.ab_delta - 10.0).abs() < f64::EPSILON);
        assert!((config.darwin.ab_random_p - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.bus.inbox_capacity, 2000);
    }

    #[test]
    fn test_deserialize_partial_yaml() {
        let yaml = r#"
admission:
  concurrency: 3

llm:
  rate-limit-rpm: 5
  providers:
    - name: anthropic
      protocol: anthropic
      api-key-env: MY_KEY
      base-url: https://api.example.com
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.admission.concurrency, 3);
        assert_eq!(config.llm.rate_limit_rpm, 5);
        assert_eq!(config.llm.providers[0].api_key_env, "MY_KEY");
        // Unspecified sections keep defaults
        assert_eq!(config.executor.max_rounds, 15);
        assert_eq!(config.darwin.warmup_runs, 5);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        // SAFETY: serialized test, no concurrent env access
        unsafe {
            std::env::set_var("ADMISSION_CONCURRENCY", "4");
            std::env::set_var("EXECUTOR_MAX_ROUNDS", "7");
            std::env::set_var("ADVERSARIAL_L1_ENABLED", "false");
            std::env::set_var("DARWIN_AB_DELTA", "2.5");
        }

        let mut config = Config::default();
        config.apply_env();

        assert_eq!(config.admission.concurrency, 4);
        assert_eq!(config.executor.max_rounds, 7);
        assert!(!config.guard.l1_enabled);
        assert!((config.darwin.ab_delta - 2.5).abs() < f64::EPSILON);

        unsafe {
            std::env::remove_var("ADMISSION_CONCURRENCY");
            std::env::remove_var("EXECUTOR_MAX_ROUNDS");
            std::env::remove_var("ADVERSARIAL_L1_ENABLED");
            std::env::remove_var("DARWIN_AB_DELTA");
        }
    }

    #[test]
    #[serial]
    fn test_env_garbage_is_ignored() {
        unsafe {
            std::env::set_var("LLM_RATE_LIMIT_RPM", "not-a-number");
        }
        let mut config = Config::default();
        config.apply_env();
        assert_eq!(config.llm.rate_limit_rpm, 15);
        unsafe {
            std::env::remove_var("LLM_RATE_LIMIT_RPM");
        }
    }
}
