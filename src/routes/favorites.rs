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
        validation::{validate_id, Validate, ValidatedJson},
    },
    permissions::{self, Permission},
    state::AppState,
    types::{now_utc, AuditAction, FavoriteHome, HomeStatus},
};

const FAVORITE_COLUMNS: &str = "f.home_id AS home_id, h.name AS name, h.status AS status, h.city AS city, \
    h.state AS state, h.price_min AS price_min, h.price_max AS price_max, h.capacity AS capacity, \
    h.current_occupancy AS current_occupancy, f.created_at AS created_at";

fn family_id(user: &CurrentUser) -> AppResult<String> {
    user.family_id
        .clone()
        .ok_or_else(|| AppError::Forbidden("a family profile is required".to_string()))
}

async fn load_favorite(state: &AppState, family_id: &str, home_id: &str) -> AppResult<FavoriteHome> {
    let sql = format!(
        "SELECT {} FROM favorites f JOIN homes h ON h.id = f.home_id WHERE f.family_id = ?1 AND f.home_id = ?2",
        FAVORITE_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(family_id)
        .bind(home_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("favorite")?;
    FavoriteHome::from_row(&row)
}

/// The family's saved homes, newest first.
pub async fn list_favorites(State(state): State<AppState>, user: CurrentUser) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::FavoritesManage)?;
    let family = family_id(&user)?;
    let sql = format!(
        "SELECT {} FROM favorites f JOIN homes h ON h.id = f.home_id WHERE f.family_id = ?1 \
         ORDER BY f.created_at DESC, f.home_id",
        FAVORITE_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(&family).fetch_all(&state.db).await?;
    let items = rows.iter().map(FavoriteHome::from_row).collect::<AppResult<Vec<_>>>()?;
    Ok(Json(json!({ "items": items })))
}

#[derive(Debug, Deserialize)]
pub struct AddFavoriteRequest {
    pub home_id: String,
}

impl Validate for AddFavoriteRequest {
    fn validate(&self) -> AppResult<()> {
        validate_id("home_id", &self.home_id)
    }
}

/// Saves an ACTIVE home. Saving the same home twice is a conflict.
pub async fn add_favorite(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidatedJson(req): ValidatedJson<AddFavoriteRequest>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::FavoritesManage)?;
    let family = family_id(&user)?;
    let home = load_home(&state.db, &req.home_id).await?;
    if home.status != HomeStatus::Active {
        return Err(AppError::conflict(format!("home is {} and cannot be saved", home.status)));
    }

    let res = sqlx::query("INSERT OR IGNORE INTO favorites (family_id, home_id, created_at) VALUES (?1, ?2, ?3)")
        .bind(&family)
        .bind(&home.id)
        .bind(now_utc())
        .execute(&state.db)
        .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::conflict("home is already saved"));
    }

    let favorite = load_favorite(&state, &family, &home.id).await?;
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Create, "favorite", format!("saved home {}", home.name))
            .resource(&home.id)
            .metadata(json!({ "family_id": family })),
    )
    .await;
    Ok((StatusCode::CREATED, Json(favorite)))
}

pub async fn remove_favorite(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(home_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::FavoritesManage)?;
    let family = family_id(&user)?;
    validate_id("home_id", &home_id)?;

    let res = sqlx::query("DELETE FROM favorites WHERE family_id = ?1 AND home_id = ?2")
        .bind(&family)
        .bind(&home_id)
        .execute(&state.db)
        .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("favorite not found".to_string()));
    }

    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Delete, "favorite", "removed saved home")
            .resource(&home_id)
            .metadata(json!({ "family_id": family })),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}
