use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::{header, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::{AppError, AppResult};

/// Largest accepted request body, overridable through `CARELINK_MAX_BODY_SIZE`.
pub fn max_body_size() -> usize {
    std::env::var("CARELINK_MAX_BODY_SIZE")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(1024 * 1024)
        .clamp(64 * 1024, 10 * 1024 * 1024)
}

/// Rejects traversal-looking URIs and oversized bodies before routing; logs
/// scanner user agents.
pub async fn validate_request_middleware(req: Request, next: Next) -> Response {
    let uri_path = req.uri().path();
    if contains_path_traversal(uri_path) {
        tracing::warn!(path = %sanitize_for_logging(uri_path), "rejected traversal-looking path");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": {
                    "code": "INVALID_PATH",
                    "message": "Path traversal detected in request",
                },
                "status": 400,
            })),
        )
            .into_response();
    }

    if let Some(ua_str) = req.headers().get("user-agent").and_then(|ua| ua.to_str().ok()) {
        if is_suspicious_user_agent(ua_str) {
            tracing::warn!("Suspicious user agent detected: {}", sanitize_for_logging(ua_str));
        }
    }

    // Early rejection; DefaultBodyLimit still guards chunked bodies
    if matches!(req.method(), &Method::POST | &Method::PUT | &Method::PATCH) {
        let length = req
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        let max = max_body_size();
        if let Some(length) = length.filter(|l| *l > max) {
            tracing::debug!(length, max, "request body too large");
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({
                    "error": {
                        "code": "PAYLOAD_TOO_LARGE",
                        "message": format!("Request body exceeds maximum size of {} bytes", max),
                    },
                    "status": 413,
                })),
            )
                .into_response();
        }
    }

    next.run(req).await
}

fn contains_path_traversal(path: &str) -> bool {
    let lower = path.to_lowercase();

    if path.contains("/..") || path.contains("\\..") || path.starts_with("..") {
        return true;
    }
    if path.contains("/./") || path.contains("\\.\\") || path.contains("....") {
        return true;
    }

    // Single and double URL-encoded variants
    const ENCODED_PATTERNS: &[&str] = &[
        "%2e%2e", "%252e%252e", "%2e/", "%252e%2f", "/%2e", "%2f%2e", "%2e\\", "%2e%5c", "%5c%2e", "%5c%5c", "%00",
    ];
    if ENCODED_PATTERNS.iter().any(|p| lower.contains(p)) {
        return true;
    }

    path.contains('\0')
}

fn is_suspicious_user_agent(ua: &str) -> bool {
    let ua_lower = ua.to_lowercase();
    ua_lower.contains("scanner")
        || (ua_lower.contains("crawler") && !ua_lower.contains("googlebot") && !ua_lower.contains("bingbot"))
        || ua_lower.contains("nikto")
        || ua_lower.contains("sqlmap")
        || ua_lower.contains("havij")
        || ua_lower.contains("acunetix")
}

/// Strips control characters, escapes quotes and caps the length at 200 chars.
pub fn sanitize_for_logging(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .take(200)
        .collect::<String>()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\'', "\\\'")
}

/// Payload checks that run after deserialization.
pub trait Validate {
    fn validate(&self) -> AppResult<()>;
}

/// `Json<T>` that answers malformed bodies with 400 and then runs `T::validate`.
/// A request without a body and without a content type decodes as `{}`, so
/// action endpoints whose fields are all optional accept a bare POST.
#[derive(Debug, Clone)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let value = if req.headers().contains_key(header::CONTENT_TYPE) {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|rejection: JsonRejection| AppError::BadRequest(rejection.body_text()))?;
            value
        } else {
            let bytes = Bytes::from_request(req, state)
                .await
                .map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
            decode_untyped_body(&bytes)?
        };
        value.validate()?;
        Ok(ValidatedJson(value))
    }
}

fn decode_untyped_body<T: DeserializeOwned>(bytes: &[u8]) -> AppResult<T> {
    if !bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::BadRequest("Expected request with `Content-Type: application/json`".to_string()));
    }
    let Json(value) = Json::<T>::from_bytes(b"{}").map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    Ok(value)
}

/// Ids are UUID strings; anything else is a malformed request, not a miss.
pub fn validate_id(field: &str, id: &str) -> AppResult<()> {
    uuid::Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| AppError::validation(field, format!("'{}' is not a valid id", sanitize_for_logging(id))))
}

pub fn require_non_empty(field: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::validation(field, "must not be empty"));
    }
    Ok(())
}

pub fn require_max_len(field: &str, value: &str, max: usize) -> AppResult<()> {
    if value.chars().count() > max {
        return Err(AppError::validation(field, format!("must be at most {} characters", max)));
    }
    Ok(())
}

/// Shape check only: one `@`, non-empty local part, dotted domain, no whitespace.
pub fn validate_email(field: &str, value: &str) -> AppResult<()> {
    let value = value.trim();
    let valid = match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !value.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(AppError::validation(field, "must be a valid email address"));
    }
    Ok(())
}

/// Parses a `YYYY-MM-DD` date.
pub fn parse_date(field: &str, value: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::validation(field, "must be a date in YYYY-MM-DD format"))
}

/// Parses an RFC 3339 timestamp and normalises it to UTC.
pub fn parse_datetime(field: &str, value: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| AppError::validation(field, "must be an RFC 3339 timestamp"))
}

pub fn require_range(field: &str, value: i64, min: i64, max: i64) -> AppResult<()> {
    if value < min || value > max {
        return Err(AppError::validation(field, format!("must be between {} and {}", min, max)));
    }
    Ok(())
}
