use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dialsync_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::json;
use toml::Value;

use crate::commands::{load_config, CommandResult};

#[derive(Debug, Serialize)]
struct ConfigEntry {
    key: &'static str,
    value: String,
    source: String,
}

/// Effective configuration with the layer each value came from. Secrets never leave redacted.
pub fn run(options: LoadOptions) -> CommandResult {
    let file_path = detect_config_path(options.config_path.as_deref());
    let config = match load_config(options) {
        Ok(config) => config,
        Err(failure) => return failure.into_result("config"),
    };

    let file_doc = load_config_file_doc(file_path.as_deref());
    let sources = SourceResolver { file_doc: file_doc.as_ref(), file_path: file_path.as_deref() };
    let entries = collect_entries(&config, &sources);

    CommandResult::success_with_details(
        "config",
        "effective config (source precedence: env > file > default)",
        Some(json!({
            "config_file": file_path.map(|path| path.display().to_string()),
            "entries": entries,
        })),
    )
}

fn collect_entries(config: &AppConfig, sources: &SourceResolver<'_>) -> Vec<ConfigEntry> {
    let routes = config
        .rate_limit
        .routes
        .iter()
        .map(|(route, limit)| format!("{route}={limit}"))
        .collect::<Vec<_>>()
        .join(", ");

    vec![
        sources.entry("database.url", &["DIALSYNC_DATABASE_URL"], config.database.url.clone()),
        sources.entry(
            "database.max_connections",
            &["DIALSYNC_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        sources.entry(
            "database.timeout_secs",
            &["DIALSYNC_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs.to_string(),
        ),
        sources.entry("server.bind_address", &["DIALSYNC_SERVER_BIND_ADDRESS"], config.server.bind_address.clone()),
        sources.entry("server.port", &["DIALSYNC_SERVER_PORT"], config.server.port.to_string()),
        sources.entry(
            "server.graceful_shutdown_secs",
            &["DIALSYNC_SERVER_GRACEFUL_SHUTDOWN_SECS"],
            config.server.graceful_shutdown_secs.to_string(),
        ),
        sources.entry("provider.name", &["DIALSYNC_PROVIDER_NAME"], config.provider.name.clone()),
        sources.entry("provider.base_url", &["DIALSYNC_PROVIDER_BASE_URL"], config.provider.base_url.clone()),
        sources.entry(
            "provider.api_key",
            &["DIALSYNC_PROVIDER_API_KEY"],
            redact_token(config.provider.api_key.expose_secret()),
        ),
        sources.entry(
            "provider.timeout_secs",
            &["DIALSYNC_PROVIDER_TIMEOUT_SECS"],
            config.provider.timeout_secs.to_string(),
        ),
        sources.entry("retry.max_attempts", &["DIALSYNC_RETRY_MAX_ATTEMPTS"], config.retry.max_attempts.to_string()),
        sources.entry(
            "retry.initial_delay_ms",
            &["DIALSYNC_RETRY_INITIAL_DELAY_MS"],
            config.retry.initial_delay_ms.to_string(),
        ),
        sources.entry("retry.max_delay_ms", &["DIALSYNC_RETRY_MAX_DELAY_MS"], config.retry.max_delay_ms.to_string()),
        sources.entry("retry.backoff_multiplier", &[], config.retry.backoff_multiplier.to_string()),
        sources.entry(
            "retry.max_elapsed_secs",
            &["DIALSYNC_RETRY_MAX_ELAPSED_SECS"],
            config.retry.max_elapsed_secs.to_string(),
        ),
        sources.entry("retry.jitter", &[], config.retry.jitter.to_string()),
        sources.entry("webhook.secret", &["DIALSYNC_WEBHOOK_SECRET"], redact_secret(config.webhook.secret.expose_secret())),
        sources.entry(
            "webhook.max_age_secs",
            &["DIALSYNC_WEBHOOK_MAX_AGE_SECS"],
            config.webhook.max_age_secs.to_string(),
        ),
        sources.entry("webhook.future_tolerance_secs", &[], config.webhook.future_tolerance_secs.to_string()),
        sources.entry(
            "idempotency.ttl_days",
            &["DIALSYNC_IDEMPOTENCY_TTL_DAYS"],
            config.idempotency.ttl_days.to_string(),
        ),
        sources.entry("idempotency.sweep_interval_secs", &[], config.idempotency.sweep_interval_secs.to_string()),
        sources.entry(
            "rate_limit.requests_per_minute",
            &["DIALSYNC_RATE_LIMIT_REQUESTS_PER_MINUTE"],
            config.rate_limit.requests_per_minute.to_string(),
        ),
        sources.entry("rate_limit.routes", &[], if routes.is_empty() { "<none>".to_string() } else { routes }),
        sources.entry(
            "billing.credits_per_minute",
            &["DIALSYNC_BILLING_CREDITS_PER_MINUTE"],
            config.billing.credits_per_minute.to_string(),
        ),
        sources.entry("billing.minimum_debit", &[], config.billing.minimum_debit.to_string()),
        sources.entry(
            "logging.level",
            &["DIALSYNC_LOGGING_LEVEL", "DIALSYNC_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        sources.entry(
            "logging.format",
            &["DIALSYNC_LOGGING_FORMAT", "DIALSYNC_LOG_FORMAT"],
            format!("{:?}", config.logging.format).to_lowercase(),
        ),
    ]
}

struct SourceResolver<'a> {
    file_doc: Option<&'a Value>,
    file_path: Option<&'a Path>,
}

impl SourceResolver<'_> {
    fn entry(&self, key: &'static str, env_keys: &[&str], value: String) -> ConfigEntry {
        ConfigEntry { key, value, source: self.source(key, env_keys) }
    }

    fn source(&self, key_path: &str, env_keys: &[&str]) -> String {
        if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
            return format!("env ({env_key})");
        }

        if let Some(doc) = self.file_doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .file_path
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from("dialsync.toml"), PathBuf::from("config/dialsync.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

/// Keeps a short vendor prefix such as `sk` so operators can tell keys apart.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.split_once(['-', '_']) {
        Some((prefix, _)) if prefix.len() <= 6 => format!("{prefix}_***"),
        _ => "<redacted>".to_string(),
    }
}

fn redact_secret(secret: &str) -> String {
    if secret.trim().is_empty() {
        "<empty>".to_string()
    } else {
        "<redacted>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, redact_secret, redact_token};

    #[test]
    fn tokens_keep_only_their_prefix() {
        assert_eq!(redact_token("sk_live_abcdef"), "sk_***");
        assert_eq!(redact_token("opaquevalue"), "<redacted>");
        assert_eq!(redact_token("  "), "<empty>");
        assert_eq!(redact_secret("whsec"), "<redacted>");
    }

    #[test]
    fn dotted_paths_walk_nested_tables() {
        let doc: Value = "[provider]\nbase_url = \"http://x\"\n".parse().expect("toml");

        assert!(contains_path(&doc, "provider.base_url"));
        assert!(!contains_path(&doc, "provider.api_key"));
        assert!(!contains_path(&doc, "database.url"));
    }
}
