use std::collections::BTreeSet;

use dialsync_core::config::{AppConfig, LoadOptions};
use dialsync_db::migrations::MIGRATOR;
use dialsync_db::DbPool;
use dialsync_provider::HttpProvider;
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::commands::{open_pool, runtime, CommandResult, EXIT_CHECKS_FAILED, EXIT_OK};

const MIN_WEBHOOK_SECRET_LEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self::new(name, CheckStatus::Skipped, format!("skipped because {reason}"))
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    fn from_checks(checks: Vec<DoctorCheck>) -> Self {
        let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
        let warned = checks.iter().any(|check| check.status == CheckStatus::Warn);
        let (overall_status, summary) = match (failed, warned) {
            (true, _) => (CheckStatus::Fail, "doctor: one or more readiness checks failed"),
            (false, true) => (CheckStatus::Warn, "doctor: ready with warnings"),
            (false, false) => (CheckStatus::Pass, "doctor: all readiness checks passed"),
        };
        Self { overall_status, summary: summary.to_string(), checks }
    }
}

/// Readiness report. Warnings keep exit code 0; any failed check exits non-zero.
pub fn run(json_output: bool, options: LoadOptions) -> CommandResult {
    let report = build_report(options);
    let exit_code =
        if report.overall_status == CheckStatus::Fail { EXIT_CHECKS_FAILED } else { EXIT_OK };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            let reason = "configuration did not load";
            return DoctorReport::from_checks(vec![
                DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()),
                DoctorCheck::skipped("provider_readiness", reason),
                DoctorCheck::skipped("webhook_secret", reason),
                DoctorCheck::skipped("database_connectivity", reason),
                DoctorCheck::skipped("schema_migrations", reason),
            ]);
        }
    };

    let mut checks = vec![
        DoctorCheck::new("config_validation", CheckStatus::Pass, "configuration loaded and validated"),
        check_provider(&config),
        check_webhook_secret(&config),
    ];
    checks.extend(check_database(&config));
    DoctorReport::from_checks(checks)
}

fn check_provider(config: &AppConfig) -> DoctorCheck {
    let base_url = config.provider.base_url.trim();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return DoctorCheck::new(
            "provider_readiness",
            CheckStatus::Fail,
            format!("provider.base_url `{base_url}` is not an http(s) URL"),
        );
    }

    match HttpProvider::new(&config.provider) {
        Ok(_) => DoctorCheck::new(
            "provider_readiness",
            CheckStatus::Pass,
            format!("client for `{}` built against {base_url}", config.provider.name),
        ),
        Err(error) => DoctorCheck::new("provider_readiness", CheckStatus::Fail, error.to_string()),
    }
}

fn check_webhook_secret(config: &AppConfig) -> DoctorCheck {
    let length = config.webhook.secret.expose_secret().trim().len();
    if length < MIN_WEBHOOK_SECRET_LEN {
        return DoctorCheck::new(
            "webhook_secret",
            CheckStatus::Warn,
            format!("secret is {length} characters; use at least {MIN_WEBHOOK_SECRET_LEN}"),
        );
    }
    DoctorCheck::new("webhook_secret", CheckStatus::Pass, "signing secret configured")
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err(failure) => {
            return vec![
                DoctorCheck::new("database_connectivity", CheckStatus::Fail, failure.message),
                DoctorCheck::skipped("schema_migrations", "the async runtime did not start"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match open_pool(config).await {
            Ok(pool) => pool,
            Err(failure) => {
                return vec![
                    DoctorCheck::new(
                        "database_connectivity",
                        CheckStatus::Fail,
                        format!("failed to connect to database: {}", failure.message),
                    ),
                    DoctorCheck::skipped("schema_migrations", "the database is unreachable"),
                ];
            }
        };

        let connectivity = DoctorCheck::new(
            "database_connectivity",
            CheckStatus::Pass,
            format!("connected using `{}`", config.database.url),
        );
        let migrations = check_migrations(&pool).await;
        pool.close().await;
        vec![connectivity, migrations]
    })
}

async fn check_migrations(pool: &DbPool) -> DoctorCheck {
    let known: BTreeSet<i64> = MIGRATOR
        .iter()
        .filter(|migration| !migration.migration_type.is_down_migration())
        .map(|migration| migration.version)
        .collect();

    let ledger_exists: Option<String> = match sqlx::query_scalar::<_, String>(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_optional(pool)
    .await
    {
        Ok(row) => row,
        Err(error) => return DoctorCheck::new("schema_migrations", CheckStatus::Fail, error.to_string()),
    };

    let applied: BTreeSet<i64> = if ledger_exists.is_some() {
        match sqlx::query_scalar::<_, i64>("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await
        {
            Ok(versions) => versions.into_iter().collect(),
            Err(error) => {
                return DoctorCheck::new("schema_migrations", CheckStatus::Fail, error.to_string());
            }
        }
    } else {
        BTreeSet::new()
    };

    let pending = known.difference(&applied).count();
    if pending == 0 {
        DoctorCheck::new(
            "schema_migrations",
            CheckStatus::Pass,
            format!("{} migrations applied", applied.len()),
        )
    } else {
        DoctorCheck::new(
            "schema_migrations",
            CheckStatus::Warn,
            format!("{pending} of {} migrations pending; run `dialsync migrate`", known.len()),
        )
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::{render_human, CheckStatus, DoctorCheck, DoctorReport};

    #[test]
    fn warnings_do_not_fail_the_report() {
        let report = DoctorReport::from_checks(vec![
            DoctorCheck::new("config_validation", CheckStatus::Pass, "ok"),
            DoctorCheck::new("schema_migrations", CheckStatus::Warn, "1 pending"),
        ]);

        assert_eq!(report.overall_status, CheckStatus::Warn);
        assert!(render_human(&report).contains("- [warn] schema_migrations: 1 pending"));
    }

    #[test]
    fn a_single_failure_fails_the_report() {
        let report = DoctorReport::from_checks(vec![
            DoctorCheck::new("webhook_secret", CheckStatus::Warn, "short"),
            DoctorCheck::new("database_connectivity", CheckStatus::Fail, "refused"),
            DoctorCheck::skipped("schema_migrations", "the database is unreachable"),
        ]);

        assert_eq!(report.overall_status, CheckStatus::Fail);
        assert!(render_human(&report).starts_with("doctor: one or more"));
    }
}
