use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub retry: RetrySettings,
    pub webhook: WebhookConfig,
    pub idempotency: IdempotencyConfig,
    pub rate_limit: RateLimitConfig,
    pub billing: BillingConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: SecretString,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_elapsed_secs: u64,
    pub jitter: bool,
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub secret: SecretString,
    pub max_age_secs: u64,
    pub future_tolerance_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdempotencyConfig {
    pub ttl_days: u32,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub routes: BTreeMap<String, u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BillingConfig {
    pub credits_per_minute: Decimal,
    pub minimum_debit: Decimal,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub provider_base_url: Option<String>,
    pub provider_api_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub requests_per_minute: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://dialsync.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            provider: ProviderConfig {
                name: "voice-provider".to_string(),
                base_url: "https://api.voice-provider.example".to_string(),
                api_key: String::new().into(),
                timeout_secs: 15,
            },
            retry: RetrySettings {
                max_attempts: 4,
                initial_delay_ms: 250,
                max_delay_ms: 5_000,
                backoff_multiplier: 2.0,
                max_elapsed_secs: 30,
                jitter: true,
            },
            webhook: WebhookConfig {
                secret: String::new().into(),
                max_age_secs: 300,
                future_tolerance_secs: 30,
            },
            idempotency: IdempotencyConfig { ttl_days: 1, sweep_interval_secs: 3_600 },
            rate_limit: RateLimitConfig { requests_per_minute: 100, routes: BTreeMap::new() },
            billing: BillingConfig { credits_per_minute: Decimal::ONE, minimum_debit: Decimal::ZERO },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl RateLimitConfig {
    pub fn limit_for(&self, route: &str) -> u32 {
        self.routes.get(route).copied().unwrap_or(self.requests_per_minute)
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("dialsync.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(provider) = patch.provider {
            if let Some(name) = provider.name {
                self.provider.name = name;
            }
            if let Some(base_url) = provider.base_url {
                self.provider.base_url = base_url;
            }
            if let Some(api_key) = provider.api_key {
                self.provider.api_key = secret_value(api_key);
            }
            if let Some(timeout_secs) = provider.timeout_secs {
                self.provider.timeout_secs = timeout_secs;
            }
        }

        if let Some(retry) = patch.retry {
            if let Some(max_attempts) = retry.max_attempts {
                self.retry.max_attempts = max_attempts;
            }
            if let Some(initial_delay_ms) = retry.initial_delay_ms {
                self.retry.initial_delay_ms = initial_delay_ms;
            }
            if let Some(max_delay_ms) = retry.max_delay_ms {
                self.retry.max_delay_ms = max_delay_ms;
            }
            if let Some(backoff_multiplier) = retry.backoff_multiplier {
                self.retry.backoff_multiplier = backoff_multiplier;
            }
            if let Some(max_elapsed_secs) = retry.max_elapsed_secs {
                self.retry.max_elapsed_secs = max_elapsed_secs;
            }
            if let Some(jitter) = retry.jitter {
                self.retry.jitter = jitter;
            }
        }

        if let Some(webhook) = patch.webhook {
            if let Some(secret) = webhook.secret {
                self.webhook.secret = secret_value(secret);
            }
            if let Some(max_age_secs) = webhook.max_age_secs {
                self.webhook.max_age_secs = max_age_secs;
            }
            if let Some(future_tolerance_secs) = webhook.future_tolerance_secs {
                self.webhook.future_tolerance_secs = future_tolerance_secs;
            }
        }

        if let Some(idempotency) = patch.idempotency {
            if let Some(ttl_days) = idempotency.ttl_days {
                self.idempotency.ttl_days = ttl_days;
            }
            if let Some(sweep_interval_secs) = idempotency.sweep_interval_secs {
                self.idempotency.sweep_interval_secs = sweep_interval_secs;
            }
        }

        if let Some(rate_limit) = patch.rate_limit {
            if let Some(requests_per_minute) = rate_limit.requests_per_minute {
                self.rate_limit.requests_per_minute = requests_per_minute;
            }
            if let Some(routes) = rate_limit.routes {
                self.rate_limit.routes.extend(routes);
            }
        }

        if let Some(billing) = patch.billing {
            if let Some(credits_per_minute) = billing.credits_per_minute {
                self.billing.credits_per_minute = credits_per_minute;
            }
            if let Some(minimum_debit) = billing.minimum_debit {
                self.billing.minimum_debit = minimum_debit;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("DIALSYNC_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("DIALSYNC_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("DIALSYNC_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("DIALSYNC_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("DIALSYNC_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("DIALSYNC_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("DIALSYNC_SERVER_PORT") {
            self.server.port = parse_env("DIALSYNC_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("DIALSYNC_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("DIALSYNC_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("DIALSYNC_PROVIDER_NAME") {
            self.provider.name = value;
        }
        if let Some(value) = read_env("DIALSYNC_PROVIDER_BASE_URL") {
            self.provider.base_url = value;
        }
        if let Some(value) = read_env("DIALSYNC_PROVIDER_API_KEY") {
            self.provider.api_key = secret_value(value);
        }
        if let Some(value) = read_env("DIALSYNC_PROVIDER_TIMEOUT_SECS") {
            self.provider.timeout_secs = parse_env("DIALSYNC_PROVIDER_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("DIALSYNC_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_env("DIALSYNC_RETRY_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("DIALSYNC_RETRY_INITIAL_DELAY_MS") {
            self.retry.initial_delay_ms = parse_env("DIALSYNC_RETRY_INITIAL_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("DIALSYNC_RETRY_MAX_DELAY_MS") {
            self.retry.max_delay_ms = parse_env("DIALSYNC_RETRY_MAX_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("DIALSYNC_RETRY_MAX_ELAPSED_SECS") {
            self.retry.max_elapsed_secs = parse_env("DIALSYNC_RETRY_MAX_ELAPSED_SECS", &value)?;
        }

        if let Some(value) = read_env("DIALSYNC_WEBHOOK_SECRET") {
            self.webhook.secret = secret_value(value);
        }
        if let Some(value) = read_env("DIALSYNC_WEBHOOK_MAX_AGE_SECS") {
            self.webhook.max_age_secs = parse_env("DIALSYNC_WEBHOOK_MAX_AGE_SECS", &value)?;
        }

        if let Some(value) = read_env("DIALSYNC_IDEMPOTENCY_TTL_DAYS") {
            self.idempotency.ttl_days = parse_env("DIALSYNC_IDEMPOTENCY_TTL_DAYS", &value)?;
        }
        if let Some(value) = read_env("DIALSYNC_RATE_LIMIT_REQUESTS_PER_MINUTE") {
            self.rate_limit.requests_per_minute =
                parse_env("DIALSYNC_RATE_LIMIT_REQUESTS_PER_MINUTE", &value)?;
        }
        if let Some(value) = read_env("DIALSYNC_BILLING_CREDITS_PER_MINUTE") {
            self.billing.credits_per_minute =
                parse_env("DIALSYNC_BILLING_CREDITS_PER_MINUTE", &value)?;
        }

        let log_level =
            read_env("DIALSYNC_LOGGING_LEVEL").or_else(|| read_env("DIALSYNC_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("DIALSYNC_LOGGING_FORMAT").or_else(|| read_env("DIALSYNC_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(base_url) = overrides.provider_base_url {
            self.provider.base_url = base_url;
        }
        if let Some(api_key) = overrides.provider_api_key {
            self.provider.api_key = secret_value(api_key);
        }
        if let Some(secret) = overrides.webhook_secret {
            self.webhook.secret = secret_value(secret);
        }
        if let Some(requests_per_minute) = overrides.requests_per_minute {
            self.rate_limit.requests_per_minute = requests_per_minute;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_provider(&self.provider)?;
        validate_retry(&self.retry)?;
        validate_webhook(&self.webhook)?;
        validate_idempotency(&self.idempotency)?;
        validate_rate_limit(&self.rate_limit)?;
        validate_billing(&self.billing)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("dialsync.toml"), PathBuf::from("config/dialsync.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_provider(provider: &ProviderConfig) -> Result<(), ConfigError> {
    if provider.name.trim().is_empty() {
        return Err(ConfigError::Validation("provider.name must not be empty".to_string()));
    }

    let base_url = provider.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "provider.base_url must start with http:// or https://".to_string(),
        ));
    }

    if provider.api_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "provider.api_key is required. Set DIALSYNC_PROVIDER_API_KEY or [provider].api_key"
                .to_string(),
        ));
    }

    if provider.timeout_secs == 0 || provider.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "provider.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_retry(retry: &RetrySettings) -> Result<(), ConfigError> {
    if retry.max_attempts == 0 || retry.max_attempts > 10 {
        return Err(ConfigError::Validation(
            "retry.max_attempts must be in range 1..=10".to_string(),
        ));
    }

    if retry.initial_delay_ms == 0 || retry.max_delay_ms < retry.initial_delay_ms {
        return Err(ConfigError::Validation(
            "retry.initial_delay_ms must be positive and not exceed retry.max_delay_ms"
                .to_string(),
        ));
    }

    if !(retry.backoff_multiplier >= 1.0 && retry.backoff_multiplier <= 10.0) {
        return Err(ConfigError::Validation(
            "retry.backoff_multiplier must be in range 1.0..=10.0".to_string(),
        ));
    }

    if retry.max_elapsed_secs == 0 {
        return Err(ConfigError::Validation(
            "retry.max_elapsed_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_webhook(webhook: &WebhookConfig) -> Result<(), ConfigError> {
    if webhook.secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "webhook.secret is required. Use the signing secret shown in the provider dashboard"
                .to_string(),
        ));
    }

    if webhook.max_age_secs == 0 {
        return Err(ConfigError::Validation(
            "webhook.max_age_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_idempotency(idempotency: &IdempotencyConfig) -> Result<(), ConfigError> {
    if idempotency.ttl_days == 0 || idempotency.ttl_days > 30 {
        return Err(ConfigError::Validation(
            "idempotency.ttl_days must be in range 1..=30".to_string(),
        ));
    }

    if idempotency.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "idempotency.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_rate_limit(rate_limit: &RateLimitConfig) -> Result<(), ConfigError> {
    if rate_limit.requests_per_minute == 0 {
        return Err(ConfigError::Validation(
            "rate_limit.requests_per_minute must be greater than zero".to_string(),
        ));
    }

    if let Some((route, _)) = rate_limit.routes.iter().find(|(_, limit)| **limit == 0) {
        return Err(ConfigError::Validation(format!(
            "rate_limit.routes.\"{route}\" must be greater than zero"
        )));
    }

    Ok(())
}

fn validate_billing(billing: &BillingConfig) -> Result<(), ConfigError> {
    if billing.credits_per_minute.is_sign_negative() || billing.minimum_debit.is_sign_negative() {
        return Err(ConfigError::Validation(
            "billing.credits_per_minute and billing.minimum_debit must not be negative"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    provider: Option<ProviderPatch>,
    retry: Option<RetryPatch>,
    webhook: Option<WebhookPatch>,
    idempotency: Option<IdempotencyPatch>,
    rate_limit: Option<RateLimitPatch>,
    billing: Option<BillingPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderPatch {
    name: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RetryPatch {
    max_attempts: Option<u32>,
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    backoff_multiplier: Option<f64>,
    max_elapsed_secs: Option<u64>,
    jitter: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPatch {
    secret: Option<String>,
    max_age_secs: Option<u64>,
    future_tolerance_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct IdempotencyPatch {
    ttl_days: Option<u32>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RateLimitPatch {
    requests_per_minute: Option<u32>,
    routes: Option<BTreeMap<String, u32>>,
}

#[derive(Debug, Default, Deserialize)]
struct BillingPatch {
    credits_per_minute: Option<Decimal>,
    minimum_debit: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
