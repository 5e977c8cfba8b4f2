use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::homes::load_home;
use crate::{
    audit::{self, AuditEvent},
    error::{AppError, AppResult, OptionExt},
    middleware::{
        auth::CurrentUser,
        validation::{require_max_len, require_non_empty, validate_email, validate_id, Validate, ValidatedJson},
    },
    permissions::{self, role_permissions, Permission},
    state::AppState,
    types::{AuditAction, Role, User, UserStatus},
};

async fn load_user(db: impl sqlx::SqliteExecutor<'_>, id: &str) -> AppResult<User> {
    let row = sqlx::query(
        "SELECT id, email, first_name, last_name, phone, role, status, created_at FROM users WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(db)
    .await?
    .ok_or_not_found("user")?;
    User::from_row(&row)
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub status: Option<UserStatus>,
    /// Operators only; defaults to the user's full name.
    pub company_name: Option<String>,
    /// Caregivers only.
    pub hourly_rate_cents: Option<i64>,
}

impl Validate for CreateUserRequest {
    fn validate(&self) -> AppResult<()> {
        validate_email("email", &self.email)?;
        require_non_empty("first_name", &self.first_name)?;
        require_non_empty("last_name", &self.last_name)?;
        require_max_len("first_name", &self.first_name, 100)?;
        require_max_len("last_name", &self.last_name, 100)?;
        if self.hourly_rate_cents.is_some_and(|r| r <= 0) {
            return Err(AppError::validation("hourly_rate_cents", "must be > 0"));
        }
        Ok(())
    }
}

/// Creates a user and, for operators, families and caregivers, the profile row
/// their scope hangs off.
pub async fn create_user(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidatedJson(req): ValidatedJson<CreateUserRequest>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::UsersCreate)?;
    let email = req.email.trim().to_lowercase();

    let mut tx = state.db.begin().await?;
    let taken: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?1")
        .bind(&email)
        .fetch_optional(&mut *tx)
        .await?;
    if taken.is_some() {
        return Err(AppError::Conflict {
            message: "a user with this email already exists".to_string(),
            details: Some(json!({ "field": "email" })),
        });
    }

    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO users (id, email, first_name, last_name, phone, role, status) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(&id)
    .bind(&email)
    .bind(req.first_name.trim())
    .bind(req.last_name.trim())
    .bind(&req.phone)
    .bind(req.role.as_str())
    .bind(req.status.unwrap_or(UserStatus::Active).as_str())
    .execute(&mut *tx)
    .await?;

    let profile_id = uuid::Uuid::new_v4().to_string();
    let profile = match req.role {
        Role::Operator => {
            let company = req
                .company_name
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("{} {}", req.first_name.trim(), req.last_name.trim()));
            sqlx::query("INSERT INTO operators (id, user_id, company_name) VALUES (?1, ?2, ?3)")
                .bind(&profile_id)
                .bind(&id)
                .bind(company)
                .execute(&mut *tx)
                .await?;
            Some(("operator_id", profile_id))
        }
        Role::Family => {
            sqlx::query("INSERT INTO families (id, user_id) VALUES (?1, ?2)")
                .bind(&profile_id)
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            Some(("family_id", profile_id))
        }
        Role::Caregiver => {
            sqlx::query("INSERT INTO caregivers (id, user_id, hourly_rate_cents) VALUES (?1, ?2, ?3)")
                .bind(&profile_id)
                .bind(&id)
                .bind(req.hourly_rate_cents)
                .execute(&mut *tx)
                .await?;
            Some(("caregiver_id", profile_id))
        }
        _ => None,
    };
    let created = load_user(&mut *tx, &id).await?;
    tx.commit().await?;

    tracing::info!(user_id = %created.id, role = %created.role, "user created");
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Create, "user", format!("created {} user", created.role))
            .resource(&created.id)
            .metadata(json!({ "role": created.role, "status": created.status })),
    )
    .await;

    let mut body = json!({ "user": created });
    if let Some((key, value)) = profile {
        body[key] = json!(value);
    }
    Ok((StatusCode::CREATED, Json(body)))
}

/// The caller, their permissions and the records they can reach.
pub async fn me(State(state): State<AppState>, user: CurrentUser) -> AppResult<impl IntoResponse> {
    let scope = permissions::resolve_scope(&state.db, &user).await?;
    let perms: Vec<&str> = role_permissions(user.role).iter().map(|p| p.as_str()).collect();
    Ok(Json(json!({
        "id": user.id,
        "email": user.email,
        "first_name": user.first_name,
        "last_name": user.last_name,
        "role": user.role,
        "operator_id": user.operator_id,
        "family_id": user.family_id,
        "caregiver_id": user.caregiver_id,
        "permissions": perms,
        "scope": scope.summary(),
    })))
}

pub async fn get_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    if id != user.id {
        permissions::require(&user, Permission::UsersView)?;
    }
    validate_id("id", &id)?;
    Ok(Json(load_user(&state.db, &id).await?))
}

#[derive(Debug, Deserialize)]
pub struct AssignCaregiverRequest {
    pub home_id: String,
}

impl Validate for AssignCaregiverRequest {
    fn validate(&self) -> AppResult<()> {
        validate_id("home_id", &self.home_id)
    }
}

pub async fn assign_caregiver(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(caregiver_id): Path<String>,
    ValidatedJson(req): ValidatedJson<AssignCaregiverRequest>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::CaregiversAssign)?;
    validate_id("id", &caregiver_id)?;
    load_home(&state.db, &req.home_id).await?;
    permissions::require_home_access(&state, &user, &req.home_id).await?;
    let exists: Option<String> = sqlx::query_scalar("SELECT id FROM caregivers WHERE id = ?1")
        .bind(&caregiver_id)
        .fetch_optional(&state.db)
        .await?;
    exists.ok_or_not_found("caregiver")?;

    let res = sqlx::query("INSERT OR IGNORE INTO caregiver_homes (caregiver_id, home_id) VALUES (?1, ?2)")
        .bind(&caregiver_id)
        .bind(&req.home_id)
        .execute(&state.db)
        .await?;
    let assigned = res.rows_affected() == 1;
    if assigned {
        tracing::info!(%caregiver_id, home_id = %req.home_id, "caregiver assigned to home");
        audit::record(
            &state,
            AuditEvent::by(&user, AuditAction::Update, "caregiver", "caregiver assigned to home")
                .resource(&caregiver_id)
                .metadata(json!({ "home_id": req.home_id })),
        )
        .await;
    }
    Ok(Json(json!({ "caregiver_id": caregiver_id, "home_id": req.home_id, "assigned": assigned })))
}
