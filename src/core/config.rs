use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for the payload store and admission pipeline.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub payload: PayloadConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayloadConfig {
    /// Directory for the file-per-payload backend. In-memory storage when unset.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    /// Cached payloads expire after this long without being read.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    #[serde(default = "default_bucket_count")]
    pub bucket_count: usize,
    #[serde(default = "default_cleanup_schedule_ms")]
    pub cleanup_schedule_ms: u64,
    /// Grace delay between a counter reaching zero and physical deletion.
    #[serde(default = "default_cleanup_delay_ms")]
    pub cleanup_delay_ms: u64,
    #[serde(default = "default_cleanup_threads")]
    pub cleanup_threads: usize,
    #[serde(default)]
    pub log_reference_counting_backtrace: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Allow clients to PUBLISH to topics starting with `$`.
    #[serde(default)]
    pub allow_dollar_topics: bool,
    #[serde(default = "default_async_timeout_ms")]
    pub default_async_timeout_ms: u64,
    /// Upper bound applied to any timeout an extension requests.
    #[serde(default = "default_async_timeout_ms")]
    pub max_async_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Config {
    /// Load configuration using `BROKER_CORE_CONFIG` or the default path, then apply env overrides.
    pub fn load_from_env() -> Result<Self> {
        let path = env_config_path();
        let mut cfg = Self::load(&path)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from a specific file (TOML or JSON based on extension).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        let data = fs::read_to_string(path_ref)
            .with_context(|| format!("unable to read config {}", path_ref.display()))?;
        if is_json(path_ref) {
            Ok(serde_json::from_str(&data)
                .with_context(|| format!("invalid JSON config {}", path_ref.display()))?)
        } else {
            Ok(toml::from_str(&data)
                .with_context(|| format!("invalid TOML config {}", path_ref.display()))?)
        }
    }

    pub fn validate(&self) -> Result<()> {
        let payload = &self.payload;
        if payload.bucket_count == 0 {
            bail!("payload.bucket_count must be > 0");
        }
        if payload.cleanup_threads == 0 {
            bail!("payload.cleanup_threads must be > 0");
        }
        if payload.cleanup_schedule_ms == 0 {
            bail!("payload.cleanup_schedule_ms must be > 0");
        }
        if payload.cache_max_entries == 0 {
            bail!("payload.cache_max_entries must be > 0");
        }
        if self.auth.default_async_timeout_ms > self.auth.max_async_timeout_ms {
            bail!(
                "auth.default_async_timeout_ms ({}) exceeds auth.max_async_timeout_ms ({})",
                self.auth.default_async_timeout_ms,
                self.auth.max_async_timeout_ms
            );
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(level) = std::env::var("BROKER_CORE_LOG_LEVEL") {
            self.telemetry.log_level = level;
        }
        if let Ok(raw) = std::env::var("BROKER_CORE_ALLOW_DOLLAR_TOPICS") {
            self.auth.allow_dollar_topics = parse_bool(&raw).with_context(|| {
                format!("invalid BROKER_CORE_ALLOW_DOLLAR_TOPICS value {raw}")
            })?;
        }
        if let Ok(dir) = std::env::var("BROKER_CORE_STORAGE_DIR") {
            self.payload.storage_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }
}

impl PayloadConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn cleanup_schedule(&self) -> Duration {
        Duration::from_millis(self.cleanup_schedule_ms)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_delay_ms)
    }
}

impl AuthConfig {
    pub fn default_async_timeout(&self) -> Duration {
        Duration::from_millis(self.default_async_timeout_ms)
    }

    pub fn max_async_timeout(&self) -> Duration {
        Duration::from_millis(self.max_async_timeout_ms)
    }
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            storage_dir: None,
            cache_max_entries: default_cache_max_entries(),
            cache_ttl_ms: default_cache_ttl_ms(),
            bucket_count: default_bucket_count(),
            cleanup_schedule_ms: default_cleanup_schedule_ms(),
            cleanup_delay_ms: default_cleanup_delay_ms(),
            cleanup_threads: default_cleanup_threads(),
            log_reference_counting_backtrace: false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            allow_dollar_topics: false,
            default_async_timeout_ms: default_async_timeout_ms(),
            max_async_timeout_ms: default_async_timeout_ms(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn env_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("BROKER_CORE_CONFIG") {
        PathBuf::from(path)
    } else {
        PathBuf::from("config/broker-core.toml")
    }
}

fn is_json(path: &Path) -> bool {
    matches!(path.extension().and_then(|s| s.to_str()), Some("json"))
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got {other}"),
    }
}

fn default_cache_max_entries() -> usize {
    10_000
}

fn default_cache_ttl_ms() -> u64 {
    10_000
}

fn default_bucket_count() -> usize {
    64
}

fn default_cleanup_schedule_ms() -> u64 {
    250
}

fn default_cleanup_delay_ms() -> u64 {
    2_000
}

fn default_cleanup_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(2)
}

fn default_async_timeout_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.payload.cache_max_entries, 10_000);
        assert_eq!(cfg.payload.cache_ttl(), Duration::from_secs(10));
        assert_eq!(cfg.payload.bucket_count, 64);
        assert_eq!(cfg.payload.cleanup_schedule(), Duration::from_millis(250));
        assert_eq!(cfg.payload.cleanup_delay(), Duration::from_secs(2));
        assert!(cfg.payload.cleanup_threads >= 2);
        assert!(cfg.payload.storage_dir.is_none());
        assert!(!cfg.auth.allow_dollar_topics);
        assert_eq!(cfg.auth.default_async_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.telemetry.log_level, "info");
        cfg.validate().unwrap();
    }

    #[test]
    fn loads_toml_and_json_by_extension() {
        let dir = tempdir().unwrap();
        let toml_path = dir.path().join("broker.toml");
        fs::write(
            &toml_path,
            r#"
[payload]
bucket_count = 8
cleanup_threads = 3
cleanup_delay_ms = 50

[auth]
allow_dollar_topics = true
"#,
        )
        .unwrap();
        let cfg = Config::load(&toml_path).unwrap();
        assert_eq!(cfg.payload.bucket_count, 8);
        assert_eq!(cfg.payload.cleanup_threads, 3);
        assert_eq!(cfg.payload.cleanup_delay_ms, 50);
        assert!(cfg.auth.allow_dollar_topics);

        let json_path = dir.path().join("broker.json");
        fs::write(
            &json_path,
            r#"{"payload":{"cache_max_entries":5},"telemetry":{"log_level":"debug"}}"#,
        )
        .unwrap();
        let cfg = Config::load(&json_path).unwrap();
        assert_eq!(cfg.payload.cache_max_entries, 5);
        assert_eq!(cfg.telemetry.log_level, "debug");
    }

    #[test]
    fn rejects_zero_sizes_and_inverted_timeouts() {
        let mut cfg = Config::default();
        cfg.payload.bucket_count = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.payload.cleanup_threads = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.payload.cleanup_schedule_ms = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.auth.default_async_timeout_ms = 60_000;
        cfg.auth.max_async_timeout_ms = 1_000;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Config::load("/nonexistent/broker-core.toml").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/broker-core.toml"));
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("TRUE").unwrap());
        assert!(parse_bool("1").unwrap());
        assert!(!parse_bool("off").unwrap());
        assert!(parse_bool("maybe").is_err());
    }
}
