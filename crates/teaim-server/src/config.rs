use anyhow::Context;
use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use teaim_core::Error as CoreError;
use teaim_ingress::RateLimitConfig;
use teaim_pii::{PiiPolicy, RedactionMode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub pii: PiiSettings,

    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// One JSON object per line instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    #[serde(default = "default_max_requests")]
    pub max: u32,

    #[serde(default = "default_limited_methods")]
    pub methods: Vec<String>,

    #[serde(default = "default_max_buckets")]
    pub max_buckets: usize,

    /// Background sweep of stale buckets; 0 disables it
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PiiSettings {
    #[serde(default)]
    pub mode: RedactionMode,

    #[serde(default)]
    pub allow_email_domains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            logging: LoggingConfig::default(),
            rate_limit: RateLimitSettings::default(),
            pii: PiiSettings::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max: default_max_requests(),
            methods: default_limited_methods(),
            max_buckets: default_max_buckets(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)
                .with_context(|| format!("Invalid TOML in {}", path.display()))?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Invalid YAML in {}", path.display()))?
        };

        Ok(config)
    }

    /// Merge `TEAIM_*` environment variables into config (env vars take
    /// precedence). Unparseable values are skipped and reported back so they
    /// can be logged once tracing is up.
    pub fn merge_env(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Ok(val) = std::env::var("TEAIM_HOST") {
            self.host = val;
        }
        env_parse("TEAIM_PORT", &mut self.port, &mut warnings);

        if let Ok(val) = std::env::var("TEAIM_LOG_LEVEL") {
            self.logging.level = val;
        }
        env_parse("TEAIM_LOG_JSON", &mut self.logging.json, &mut warnings);

        env_parse(
            "TEAIM_RATE_LIMIT_WINDOW_MS",
            &mut self.rate_limit.window_ms,
            &mut warnings,
        );
        env_parse("TEAIM_RATE_LIMIT_MAX", &mut self.rate_limit.max, &mut warnings);
        if let Ok(val) = std::env::var("TEAIM_RATE_LIMIT_METHODS") {
            self.rate_limit.methods = split_list(&val);
        }
        env_parse(
            "TEAIM_RATE_LIMIT_MAX_BUCKETS",
            &mut self.rate_limit.max_buckets,
            &mut warnings,
        );
        env_parse(
            "TEAIM_RATE_LIMIT_SWEEP_INTERVAL_SECS",
            &mut self.rate_limit.sweep_interval_secs,
            &mut warnings,
        );

        env_parse("TEAIM_PII_MODE", &mut self.pii.mode, &mut warnings);
        if let Ok(val) = std::env::var("TEAIM_PII_ALLOW_EMAIL_DOMAINS") {
            self.pii.allow_email_domains = split_list(&val);
        }

        env_parse(
            "TEAIM_MAX_BODY_BYTES",
            &mut self.limits.max_body_bytes,
            &mut warnings,
        );

        warnings
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.rate_limit.window_ms == 0 {
            return Err(CoreError::ConfigValidation(
                "rate_limit.window_ms must be greater than 0".to_string(),
            ));
        }
        if self.rate_limit.max == 0 {
            return Err(CoreError::ConfigValidation(
                "rate_limit.max must be greater than 0".to_string(),
            ));
        }
        if self.rate_limit.max_buckets == 0 {
            return Err(CoreError::ConfigValidation(
                "rate_limit.max_buckets must be greater than 0".to_string(),
            ));
        }
        if self.limits.max_body_bytes == 0 {
            return Err(CoreError::ConfigValidation(
                "limits.max_body_bytes must be greater than 0".to_string(),
            ));
        }
        self.rate_limit_methods()?;
        Ok(())
    }

    fn rate_limit_methods(&self) -> Result<Vec<Method>, CoreError> {
        self.rate_limit
            .methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.trim().to_uppercase().as_bytes()).map_err(|_| {
                    CoreError::ConfigValidation(format!("invalid HTTP method '{}'", m))
                })
            })
            .collect()
    }

    pub fn rate_limit_config(&self) -> Result<RateLimitConfig, CoreError> {
        Ok(RateLimitConfig {
            window: Duration::from_millis(self.rate_limit.window_ms),
            max: self.rate_limit.max,
            methods: self.rate_limit_methods()?,
            max_buckets: self.rate_limit.max_buckets,
        })
    }

    /// Policy applied when a request does not bring its own
    pub fn pii_policy(&self) -> PiiPolicy {
        PiiPolicy {
            mode: self.pii.mode,
            allow_email_domains: self.pii.allow_email_domains.clone(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, target: &mut T, warnings: &mut Vec<String>) {
    if let Ok(val) = std::env::var(key) {
        match val.trim().parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warnings.push(format!("Ignoring invalid {} '{}'", key, val)),
        }
    }
}

fn split_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_max_requests() -> u32 {
    120
}

fn default_limited_methods() -> Vec<String> {
    ["POST", "PUT", "PATCH", "DELETE"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_max_buckets() -> usize {
    10_000
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}
