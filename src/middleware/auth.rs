use axum::{
    extract::{connect_info::ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sqlx::Row;
use std::net::SocketAddr;

use super::ip::extract_ip_from_headers;
use crate::error::AppError;
use crate::state::AppState;
use crate::types::{Role, UserStatus};

/// Header the session gateway uses to forward the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller, loaded from `X-User-Id` on every request.
///
/// Profile ids are filled for the roles that own one, so scope resolution
/// needs no further lookup of the user row.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub operator_id: Option<String>,
    pub family_id: Option<String>,
    pub caregiver_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Unauthorized("missing X-User-Id header".to_string()))?
            .to_string();

        let row = sqlx::query(
            r#"SELECT u.id, u.email, u.first_name, u.last_name, u.role, u.status,
                      o.id AS operator_id, f.id AS family_id, c.id AS caregiver_id
               FROM users u
               LEFT JOIN operators o ON o.user_id = u.id
               LEFT JOIN families f ON f.user_id = u.id
               LEFT JOIN caregivers c ON c.user_id = u.id
               WHERE u.id = ?1"#,
        )
        .bind(&user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::Unauthorized("unknown user".to_string()))?;

        let status: String = row.try_get("status")?;
        if status.parse::<UserStatus>().ok() != Some(UserStatus::Active) {
            tracing::warn!(%user_id, %status, "rejected request from inactive user");
            return Err(AppError::Unauthorized("user is not active".to_string()));
        }
        let role: String = row.try_get("role")?;
        let role = role
            .parse::<Role>()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("user {} has {}", user_id, e)))?;

        let remote_ip = parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|info| info.0.ip());
        let ip = extract_ip_from_headers(&parts.headers, remote_ip);
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.chars().take(256).collect());

        Ok(CurrentUser {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            role,
            operator_id: row.try_get("operator_id")?,
            family_id: row.try_get("family_id")?,
            caregiver_id: row.try_get("caregiver_id")?,
            ip: Some(ip.to_string()),
            user_agent,
        })
    }
}

/// Compares two byte strings without short-circuiting on the first mismatch.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Requires `Authorization: Bearer <security.service_token>` on API routes.
///
/// A no-op when no service token is configured.
pub async fn service_token_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.config.service_token() else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => next.run(req).await,
        _ => AppError::Unauthorized("invalid or missing service token".to_string()).into_response(),
    }
}
