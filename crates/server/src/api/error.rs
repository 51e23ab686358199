use axum::{
    http::{header::RETRY_AFTER, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use dialsync_core::errors::{ApplicationError, ErrorKind, InterfaceError};
use serde::Serialize;
use tracing::{error, warn};

pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

/// JSON error envelope returned by every API route.
#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

#[derive(Serialize)]
struct ErrorBody<'a> {
    kind: &'static str,
    message: &'a str,
    correlation_id: &'a str,
}

impl ApiError {
    pub fn from_application(error: ApplicationError, correlation_id: &str) -> Self {
        Self(error.into_interface(correlation_id))
    }

    pub fn unauthorized(message: impl Into<String>, correlation_id: &str) -> Self {
        Self::with_kind(ErrorKind::Unauthorized, message, correlation_id)
    }

    pub fn validation(message: impl Into<String>, correlation_id: &str) -> Self {
        Self::with_kind(ErrorKind::Validation, message, correlation_id)
    }

    pub fn internal(message: impl Into<String>, correlation_id: &str) -> Self {
        Self::with_kind(ErrorKind::Internal, message, correlation_id)
    }

    fn with_kind(kind: ErrorKind, message: impl Into<String>, correlation_id: &str) -> Self {
        let mut interface = InterfaceError::new(kind, message);
        interface.correlation_id = correlation_id.to_string();
        Self(interface)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let interface = self.0;
        let status = StatusCode::from_u16(interface.kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(
                event_name = "api.request.failed",
                correlation_id = %interface.correlation_id,
                kind = interface.kind.as_str(),
                error = %interface.message,
                "request failed"
            );
        } else if status != StatusCode::TOO_MANY_REQUESTS {
            warn!(
                event_name = "api.request.rejected",
                correlation_id = %interface.correlation_id,
                kind = interface.kind.as_str(),
                error = %interface.message,
                "request rejected"
            );
        }

        let body = ErrorBody {
            kind: interface.kind.as_str(),
            message: &interface.message,
            correlation_id: &interface.correlation_id,
        };
        let mut response = (status, Json(body)).into_response();

        if let Some(hint) = &interface.retry {
            let headers = response.headers_mut();
            headers.insert(RETRY_AFTER, HeaderValue::from(hint.retry_after_secs));
            headers.insert(HeaderName::from_static(RATE_LIMIT_LIMIT_HEADER), HeaderValue::from(hint.limit));
            headers.insert(
                HeaderName::from_static(RATE_LIMIT_RESET_HEADER),
                HeaderValue::from(hint.reset_at.timestamp()),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use axum::{http::StatusCode, response::IntoResponse};
    use chrono::{TimeZone, Utc};
    use dialsync_core::domain::rate_limit::RateLimitRejection;
    use dialsync_core::errors::ApplicationError;

    use super::ApiError;

    #[test]
    fn rate_limited_errors_carry_retry_headers() {
        let reset_at = Utc.with_ymd_and_hms(2026, 3, 1, 10, 1, 0).single().expect("time");
        let response = ApiError::from_application(
            ApplicationError::RateLimited(RateLimitRejection {
                subject: "tenant:t-1".to_string(),
                route: "POST /api/v1/calls".to_string(),
                limit: 100,
                reset_at,
                retry_after_secs: 12,
            }),
            "req-1",
        )
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers["retry-after"], "12");
        assert_eq!(headers["x-ratelimit-limit"], "100");
        assert_eq!(headers["x-ratelimit-reset"], reset_at.timestamp().to_string().as_str());
    }

    #[test]
    fn not_found_maps_to_404_without_retry_headers() {
        let response =
            ApiError::from_application(ApplicationError::not_found("agent", "agt_1"), "req-2")
                .into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get("retry-after").is_none());
    }
}
