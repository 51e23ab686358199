use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::domain::rate_limit::RateLimitRejection;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorClass {
    Connection,
    Timeout,
    Server,
    RateLimited,
    Client,
    Decode,
}

impl ProviderErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Server => "server",
            Self::RateLimited => "rate_limited",
            Self::Client => "client",
            Self::Decode => "decode",
        }
    }
}

/// Failure of a call to the remote provider, after retries were applied.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{provider} {} failure{}: {message}", .class.as_str(), status_suffix(.status))]
pub struct ProviderError {
    pub provider: String,
    pub class: ProviderErrorClass,
    pub status: Option<u16>,
    pub retry_after_secs: Option<u64>,
    pub message: String,
    pub details: Value,
    pub attempts: u32,
}

impl ProviderError {
    fn new(provider: &str, class: ProviderErrorClass, message: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            class,
            status: None,
            retry_after_secs: None,
            message: message.into(),
            details: Value::Null,
            attempts: 0,
        }
    }

    pub fn connection(provider: &str, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorClass::Connection, message)
    }

    pub fn timeout(provider: &str, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorClass::Timeout, message)
    }

    pub fn decode(provider: &str, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorClass::Decode, message)
    }

    pub fn from_status(
        provider: &str,
        status: u16,
        retry_after_secs: Option<u64>,
        details: Value,
    ) -> Self {
        let class = match status {
            429 => ProviderErrorClass::RateLimited,
            500..=599 => ProviderErrorClass::Server,
            _ => ProviderErrorClass::Client,
        };
        Self {
            provider: provider.to_string(),
            class,
            status: Some(status),
            retry_after_secs: retry_after_secs.filter(|_| status == 429),
            message: format!("remote returned HTTP {status}"),
            details,
            attempts: 0,
        }
    }

    /// Connection errors, timeouts, 5xx and 429 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class,
            ProviderErrorClass::Connection
                | ProviderErrorClass::Timeout
                | ProviderErrorClass::Server
                | ProviderErrorClass::RateLimited
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" (HTTP {code})")).unwrap_or_default()
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ApplicationError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    RateLimited(#[from] RateLimitRejection),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let mut mapped = InterfaceError::from(self);
        mapped.correlation_id = correlation_id.into();
        mapped
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    NotFound,
    Conflict,
    RateLimited,
    Provider,
    Unavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::RateLimited => "rate_limited",
            Self::Provider => "provider_error",
            Self::Unavailable => "service_unavailable",
            Self::Internal => "internal",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::Unauthorized => 401,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::RateLimited => 429,
            Self::Provider => 502,
            Self::Unavailable => 503,
            Self::Internal => 500,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryHint {
    pub limit: u32,
    pub reset_at: DateTime<Utc>,
    pub retry_after_secs: u64,
}

/// Caller-facing error: a machine-readable kind plus a human-readable message.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{}: {message}", .kind.as_str())]
pub struct InterfaceError {
    pub kind: ErrorKind,
    pub message: String,
    pub correlation_id: String,
    pub retry: Option<RetryHint>,
}

impl InterfaceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            correlation_id: "unassigned".to_owned(),
            retry: None,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self.kind {
            ErrorKind::Validation => {
                "The request could not be processed. Check inputs and try again."
            }
            ErrorKind::Unauthorized => "The request is missing valid credentials.",
            ErrorKind::NotFound => "The requested resource does not exist.",
            ErrorKind::Conflict => "The request conflicts with an existing resource.",
            ErrorKind::RateLimited => "Too many requests. Retry after the indicated delay.",
            ErrorKind::Provider => "The call provider rejected or failed the request.",
            ErrorKind::Unavailable => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            ErrorKind::Internal => "An unexpected internal error occurred.",
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Validation(message) => Self::new(ErrorKind::Validation, message),
            ApplicationError::Provider(error) => Self::new(ErrorKind::Provider, error.to_string()),
            error @ ApplicationError::NotFound { .. } => {
                Self::new(ErrorKind::NotFound, error.to_string())
            }
            ApplicationError::Conflict(message) => Self::new(ErrorKind::Conflict, message),
            ApplicationError::RateLimited(rejection) => {
                let mut mapped = Self::new(ErrorKind::RateLimited, rejection.to_string());
                mapped.retry = Some(RetryHint {
                    limit: rejection.limit,
                    reset_at: rejection.reset_at,
                    retry_after_secs: rejection.retry_after_secs,
                });
                mapped
            }
            ApplicationError::Persistence(message) => Self::new(ErrorKind::Unavailable, message),
            ApplicationError::Configuration(message) => Self::new(ErrorKind::Internal, message),
        }
    }
}
