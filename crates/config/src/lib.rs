//! LangHook Configuration
//!
//! Environment-variable driven configuration with sensible defaults.
//! A bare environment should just work against local services - only set
//! what you need to change.
//!
//! # Recognized variables
//!
//! | Variable | Default | Purpose |
//! |----------|---------|---------|
//! | `BROKER_URL` | `nats://localhost:4222` | Message broker endpoint |
//! | `CACHE_URL` | `redis://localhost:6379` | Rate-limit cache store |
//! | `STORE_DSN` | `data/langhook.db` | Registry store (path or `:memory:`) |
//! | `LISTEN_ADDR` | `0.0.0.0:8000` | HTTP bind address |
//! | `SERVER_PATH` | unset | URL path prefix behind a reverse proxy |
//! | `MAX_BODY_BYTES` | `1048576` | Ingest body limit |
//! | `RATE_LIMIT` | `200/minute` | Per-IP ingest rate limit |
//! | `{PUBLISHER}_SECRET` | unset | HMAC secret per publisher |
//! | `LLM_PROVIDER` / `LLM_API_KEY` / `LLM_MODEL` / `LLM_BASE_URL` | see [`LlmSettings`] | Model access |
//! | `LLM_TEMPERATURE` / `LLM_MAX_TOKENS` | `0.1` / `500` | Sampling knobs |
//! | `GATE_DAILY_COST_LIMIT_USD` | `10.0` | Daily LLM spend cap |
//! | `GATE_COST_ALERT_THRESHOLD` | `0.8` | Alert fraction of the cap |
//! | `EVENT_LOGGING_ENABLED` | `false` | Canonical event log rows |
//! | `MAP_WORKERS` | `1` | Map worker pool size |
//!
//! # Parsing
//!
//! `Settings::from_env()` reads the process environment;
//! `Settings::from_vars()` takes any iterator of pairs so tests never touch
//! global state.

mod error;
mod ratelimit;

use std::collections::BTreeMap;

pub use error::ConfigError;
pub use ratelimit::RateLimitSpec;

/// Result type for configuration loading
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level settings for every LangHook process
#[derive(Debug, Clone)]
pub struct Settings {
    /// Message broker endpoint
    pub broker_url: String,
    /// Cache store endpoint (rate limiting)
    pub cache_url: String,
    /// Registry store DSN (file path or `:memory:`)
    pub store_dsn: String,
    /// HTTP bind address
    pub listen_addr: String,
    /// Optional URL path prefix when behind a reverse proxy
    pub server_path: Option<String>,
    /// Maximum accepted ingest body size in bytes
    pub max_body_bytes: usize,
    /// Per-source-IP ingest rate limit
    pub rate_limit: RateLimitSpec,
    /// HMAC secrets keyed by lowercase publisher name
    pub secrets: BTreeMap<String, String>,
    /// LLM provider access
    pub llm: LlmSettings,
    /// Gate budget knobs
    pub gate: GateBudgetSettings,
    /// Whether to append canonical event log rows
    pub event_logging_enabled: bool,
    /// Map worker pool size
    pub map_workers: usize,
}

/// LLM provider settings
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// Provider name: `openai` or `local` (OpenAI-compatible endpoint)
    pub provider: String,
    /// API key; when unset the broker runs in degraded (heuristic) mode
    pub api_key: Option<String>,
    /// Model identifier
    pub model: String,
    /// Base URL override for local or proxied providers
    pub base_url: Option<String>,
    /// Sampling temperature
    pub temperature: f64,
    /// Completion token cap
    pub max_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            api_key: None,
            model: "gpt-4o-mini".into(),
            base_url: None,
            temperature: 0.1,
            max_tokens: 500,
        }
    }
}

/// Daily LLM spend controls
#[derive(Debug, Clone)]
pub struct GateBudgetSettings {
    /// Hard daily cap in USD; calls fail with budget-exhausted above this
    pub daily_cost_limit_usd: f64,
    /// Fraction of the cap at which a warning alert is emitted
    pub cost_alert_threshold: f64,
}

impl Default for GateBudgetSettings {
    fn default() -> Self {
        Self {
            daily_cost_limit_usd: 10.0,
            cost_alert_threshold: 0.8,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker_url: "nats://localhost:4222".into(),
            cache_url: "redis://localhost:6379".into(),
            store_dsn: "data/langhook.db".into(),
            listen_addr: "0.0.0.0:8000".into(),
            server_path: None,
            max_body_bytes: 1024 * 1024,
            rate_limit: RateLimitSpec::default(),
            secrets: BTreeMap::new(),
            llm: LlmSettings::default(),
            gate: GateBudgetSettings::default(),
            event_logging_enabled: false,
            map_workers: 1,
        }
    }
}

impl Settings {
    /// Load settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Load settings from an explicit variable set
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: BTreeMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let mut settings = Settings::default();

        if let Some(v) = non_empty(&vars, "BROKER_URL") {
            settings.broker_url = v.to_string();
        }
        if let Some(v) = non_empty(&vars, "CACHE_URL") {
            settings.cache_url = v.to_string();
        }
        if let Some(v) = non_empty(&vars, "STORE_DSN") {
            settings.store_dsn = v.to_string();
        }
        if let Some(v) = non_empty(&vars, "LISTEN_ADDR") {
            settings.listen_addr = v.to_string();
        }
        if let Some(v) = non_empty(&vars, "SERVER_PATH") {
            settings.server_path = Some(normalize_path_prefix(v));
        }
        if let Some(v) = non_empty(&vars, "MAX_BODY_BYTES") {
            settings.max_body_bytes = parse_num(v, "MAX_BODY_BYTES")?;
        }
        if let Some(v) = non_empty(&vars, "RATE_LIMIT") {
            settings.rate_limit = v.parse()?;
        }
        if let Some(v) = non_empty(&vars, "EVENT_LOGGING_ENABLED") {
            settings.event_logging_enabled = parse_bool(v);
        }
        if let Some(v) = non_empty(&vars, "MAP_WORKERS") {
            settings.map_workers = parse_num::<usize>(v, "MAP_WORKERS")?.max(1);
        }

        if let Some(v) = non_empty(&vars, "LLM_PROVIDER") {
            settings.llm.provider = v.to_lowercase();
        }
        if let Some(v) = non_empty(&vars, "LLM_API_KEY") {
            settings.llm.api_key = Some(v.to_string());
        }
        if let Some(v) = non_empty(&vars, "LLM_MODEL") {
            settings.llm.model = v.to_string();
        }
        if let Some(v) = non_empty(&vars, "LLM_BASE_URL") {
            settings.llm.base_url = Some(v.trim_end_matches('/').to_string());
        }
        if let Some(v) = non_empty(&vars, "LLM_TEMPERATURE") {
            settings.llm.temperature = parse_num(v, "LLM_TEMPERATURE")?;
        }
        if let Some(v) = non_empty(&vars, "LLM_MAX_TOKENS") {
            settings.llm.max_tokens = parse_num(v, "LLM_MAX_TOKENS")?;
        }

        if let Some(v) = non_empty(&vars, "GATE_DAILY_COST_LIMIT_USD") {
            settings.gate.daily_cost_limit_usd = parse_num(v, "GATE_DAILY_COST_LIMIT_USD")?;
        }
        if let Some(v) = non_empty(&vars, "GATE_COST_ALERT_THRESHOLD") {
            settings.gate.cost_alert_threshold = parse_num(v, "GATE_COST_ALERT_THRESHOLD")?;
        }

        // {PUBLISHER}_SECRET -> per-publisher HMAC secret
        for (key, value) in &vars {
            if let Some(publisher) = key.strip_suffix("_SECRET") {
                if !publisher.is_empty() && !value.is_empty() {
                    settings
                        .secrets
                        .insert(publisher.to_lowercase(), value.clone());
                }
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Secret for a publisher, if one is configured
    pub fn secret_for(&self, publisher: &str) -> Option<&str> {
        self.secrets.get(&publisher.to_lowercase()).map(|s| s.as_str())
    }

    fn validate(&self) -> Result<()> {
        if self.max_body_bytes == 0 {
            return Err(ConfigError::invalid(
                "MAX_BODY_BYTES",
                "must be greater than zero",
            ));
        }
        if !(0.0..=1.0).contains(&self.gate.cost_alert_threshold) {
            return Err(ConfigError::invalid(
                "GATE_COST_ALERT_THRESHOLD",
                "must be a fraction in [0, 1]",
            ));
        }
        if self.gate.daily_cost_limit_usd < 0.0 {
            return Err(ConfigError::invalid(
                "GATE_DAILY_COST_LIMIT_USD",
                "must not be negative",
            ));
        }
        if self.llm.provider == "local" && self.llm.base_url.is_none() {
            return Err(ConfigError::invalid(
                "LLM_BASE_URL",
                "required when LLM_PROVIDER is 'local'",
            ));
        }
        Ok(())
    }
}

fn non_empty<'a>(vars: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key).map(|s| s.trim()).filter(|s| !s.is_empty())
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

fn parse_num<T: std::str::FromStr>(value: &str, key: &'static str) -> Result<T> {
    value
        .parse()
        .map_err(|_| ConfigError::invalid(key, format!("cannot parse '{}'", value)))
}

/// Ensure a path prefix has a single leading slash and no trailing slash
fn normalize_path_prefix(raw: &str) -> String {
    let trimmed = raw.trim_matches('/');
    format!("/{}", trimmed)
}
