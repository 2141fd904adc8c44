use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use url::Url;

/// PostgreSQL connection configuration.
///
/// Either a full connection string in `url`, or the individual fields.
/// When `url` is set it takes precedence.
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_pg_host")]
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    #[serde(default = "default_pg_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_pg_database")]
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            url: None,
            host: default_pg_host(),
            port: default_pg_port(),
            user: default_pg_user(),
            password: String::new(),
            database: default_pg_database(),
            pool_size: default_pool_size(),
        }
    }
}

fn default_pg_host() -> String {
    "localhost".to_string()
}

fn default_pg_port() -> u16 {
    5432
}

fn default_pg_user() -> String {
    "postgres".to_string()
}

fn default_pg_database() -> String {
    "delegations".to_string()
}

fn default_pool_size() -> usize {
    16
}

/// Delegation collector configuration.
///
/// The collector polls the Cosmos LCD staking endpoint for every validator
/// in `validators` once per `poll_interval_secs`.
#[derive(Debug, Deserialize, Clone)]
pub struct CollectorSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Base URL of the LCD REST gateway, e.g. `https://lcd.cosmos.example`
    #[serde(default)]
    pub api_base_url: String,
    #[serde(default)]
    pub validators: Vec<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Expected balance denom. `None` accepts any denom.
    #[serde(default = "default_denom")]
    pub denom: Option<String>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base_url: String::new(),
            validators: Vec::new(),
            poll_interval_secs: default_poll_interval(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            page_size: default_page_size(),
            denom: default_denom(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    3600 // hourly
}

fn default_request_timeout() -> u64 {
    30
}

/// Upper bound accepted for `collector.max_retries`
pub const MAX_FETCH_RETRIES: u32 = 10;

fn default_max_retries() -> u32 {
    3
}

fn default_page_size() -> u32 {
    100
}

fn default_denom() -> Option<String> {
    Some("uatom".to_string())
}

/// Per-client token bucket limits for the read API.
#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitSettings {
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// Upper bound on tracked client buckets before eviction kicks in
    #[serde(default = "default_max_clients")]
    pub max_clients: u64,
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            max_clients: default_max_clients(),
            idle_secs: default_idle_secs(),
        }
    }
}

fn default_requests_per_second() -> f64 {
    5.0
}

fn default_burst() -> u32 {
    10
}

fn default_max_clients() -> u64 {
    100_000
}

fn default_idle_secs() -> u64 {
    600
}

/// HTTP read API configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Prefix for the delegation routes, e.g. `/api/v1`. Empty serves them at the root.
    #[serde(default)]
    pub base_path: String,
    /// Use the first `X-Forwarded-For` entry as the client identity
    #[serde(default)]
    pub trust_forwarded_for: bool,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            base_path: String::new(),
            trust_forwarded_for: false,
            rate_limit: RateLimitSettings::default(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

/// Daily aggregate cache configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    #[serde(default = "default_daily_ttl")]
    pub daily_ttl_secs: u64,
    #[serde(default = "default_max_validators")]
    pub max_validators: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            daily_ttl_secs: default_daily_ttl(),
            max_validators: default_max_validators(),
        }
    }
}

fn default_daily_ttl() -> u64 {
    60
}

fn default_max_validators() -> u64 {
    1024
}

/// Root application configuration.
///
/// Loaded from an optional `config.{yaml,toml,json}` file, overridden by
/// `TRACKER_*` environment variables (`__` separates nested keys).
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub postgres: PostgresSettings,
    #[serde(default)]
    pub collector: CollectorSettings,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub cache: CacheSettings,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("TRACKER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("collector.validators")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = s.try_deserialize()?;
        settings.validate()?;

        Ok(settings)
    }

    /// Parses settings from an in-memory YAML document.
    pub fn from_yaml(source: &str) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(source, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;

        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collector.enabled {
            Url::parse(&self.collector.api_base_url).map_err(|e| {
                ConfigError::Message(format!(
                    "collector.api_base_url {:?} is not a valid URL: {}",
                    self.collector.api_base_url, e
                ))
            })?;

            if self.collector.validators.is_empty() {
                return Err(ConfigError::Message(
                    "collector.validators must list at least one validator".to_string(),
                ));
            }
            if self.collector.validators.iter().any(|v| v.trim().is_empty()) {
                return Err(ConfigError::Message(
                    "collector.validators contains an empty address".to_string(),
                ));
            }
            if self.collector.poll_interval_secs == 0 {
                return Err(ConfigError::Message(
                    "collector.poll_interval_secs must be greater than zero".to_string(),
                ));
            }
            if self.collector.max_retries > MAX_FETCH_RETRIES {
                return Err(ConfigError::Message(format!(
                    "collector.max_retries must be at most {}",
                    MAX_FETCH_RETRIES
                )));
            }
            if self.collector.page_size == 0 {
                return Err(ConfigError::Message(
                    "collector.page_size must be greater than zero".to_string(),
                ));
            }
        }

        let limits = &self.api.rate_limit;
        if limits.requests_per_second <= 0.0 || !limits.requests_per_second.is_finite() {
            return Err(ConfigError::Message(
                "api.rate_limit.requests_per_second must be a positive number".to_string(),
            ));
        }
        if limits.burst == 0 {
            return Err(ConfigError::Message(
                "api.rate_limit.burst must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
collector:
  api_base_url: "https://lcd.example.com"
  validators:
    - cosmosvaloper1clpqr4nrk4khgkxj78fcwwh6dl3uw4epsluffn
"#;

    #[test]
    fn test_defaults_applied() {
        let settings = Settings::from_yaml(MINIMAL).unwrap();

        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.collector.poll_interval_secs, 3600);
        assert_eq!(settings.collector.denom.as_deref(), Some("uatom"));
        assert_eq!(settings.api.bind_address, "0.0.0.0:8080");
        assert_eq!(settings.api.base_path, "");
        assert_eq!(settings.api.rate_limit.burst, 10);
        assert_eq!(settings.api.rate_limit.requests_per_second, 5.0);
        assert_eq!(settings.postgres.port, 5432);
        assert!(settings.postgres.url.is_none());
    }

    #[test]
    fn test_collector_requires_validators() {
        let err = Settings::from_yaml(
            r#"
collector:
  api_base_url: "https://lcd.example.com"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("validators"));
    }

    #[test]
    fn test_collector_rejects_bad_url() {
        let err = Settings::from_yaml(
            r#"
collector:
  api_base_url: "not a url"
  validators: [val1]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("api_base_url"));
    }

    #[test]
    fn test_api_only_needs_no_collector_settings() {
        let settings = Settings::from_yaml(
            r#"
collector:
  enabled: false
api:
  base_path: /api/v1
"#,
        )
        .unwrap();
        assert!(!settings.collector.enabled);
        assert_eq!(settings.api.base_path, "/api/v1");
    }

    #[test]
    fn test_rejects_zero_burst() {
        let err = Settings::from_yaml(
            r#"
collector:
  enabled: false
api:
  rate_limit:
    burst: 0
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("burst"));
    }

    #[test]
    fn test_rejects_unbounded_retries() {
        let err = Settings::from_yaml(&format!("{}  max_retries: 64\n", MINIMAL)).unwrap_err();
        assert!(err.to_string().contains("max_retries"));
    }
}
