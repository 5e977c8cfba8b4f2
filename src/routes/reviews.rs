use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::Row;

use super::homes::load_visible_home;
use crate::{
    audit::{self, AuditEvent},
    error::{AppError, AppResult, OptionExt},
    middleware::{
        auth::CurrentUser,
        validation::{require_max_len, Validate, ValidatedJson},
    },
    permissions::{self, Permission},
    state::AppState,
    types::{now_utc, AuditAction, HomeReview, TourStatus},
};

#[derive(Debug, Deserialize)]
pub struct ReviewQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Public reviews of a home, newest first, with the rating summary.
pub async fn list_reviews(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Query(query): Query<ReviewQuery>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::HomesView)?;
    let home = load_visible_home(&state, &user, &id).await?;
    let limit = state.config.page_size(query.limit);
    let offset = query.offset.unwrap_or(0).max(0);

    let sql = format!(
        "SELECT {} FROM home_reviews WHERE home_id = ?1 AND is_public = 1 \
         ORDER BY created_at DESC, id LIMIT ?2 OFFSET ?3",
        HomeReview::COLUMNS
    );
    let rows = sqlx::query(&sql).bind(&home.id).bind(limit).bind(offset).fetch_all(&state.db).await?;
    let items = rows.iter().map(HomeReview::from_row).collect::<AppResult<Vec<_>>>()?;

    let stats = sqlx::query(
        "SELECT COUNT(*) AS total, AVG(rating) AS average FROM home_reviews WHERE home_id = ?1 AND is_public = 1",
    )
    .bind(&home.id)
    .fetch_one(&state.db)
    .await?;
    let total: i64 = stats.try_get("total")?;
    let average: Option<f64> = stats.try_get("average")?;

    Ok(Json(json!({
        "items": items,
        "limit": limit,
        "offset": offset,
        "stats": {
            "total_reviews": total,
            "average_rating": average.map(|a| (a * 10.0).round() / 10.0),
        },
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateReviewRequest {
    pub rating: i64,
    pub title: Option<String>,
    pub content: Option<String>,
    #[serde(default = "default_public")]
    pub is_public: bool,
}

fn default_public() -> bool {
    true
}

impl Validate for CreateReviewRequest {
    fn validate(&self) -> AppResult<()> {
        if !(1..=5).contains(&self.rating) {
            return Err(AppError::validation("rating", "must be between 1 and 5"));
        }
        if let Some(t) = &self.title {
            require_max_len("title", t, 200)?;
        }
        if let Some(c) = &self.content {
            require_max_len("content", c, 5000)?;
        }
        Ok(())
    }
}

/// A family reviews a home it has a resident at or has toured. One review
/// per reviewer and home.
pub async fn create_review(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<CreateReviewRequest>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ReviewsCreate)?;
    let family = user
        .family_id
        .clone()
        .ok_or_else(|| AppError::Forbidden("a family profile is required".to_string()))?;
    let home = load_visible_home(&state, &user, &id).await?;

    let eligible: i64 = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM residents WHERE family_id = ?1 AND home_id = ?2) \
         OR EXISTS (SELECT 1 FROM tours WHERE family_id = ?1 AND home_id = ?2 AND status = ?3)",
    )
    .bind(&family)
    .bind(&home.id)
    .bind(TourStatus::Completed.as_str())
    .fetch_one(&state.db)
    .await?;
    if eligible == 0 {
        permissions::record_denial(&state, &user, "home_review", &home.id).await;
        return Err(AppError::Forbidden(
            "only families with a resident at or a completed tour of this home can review it".to_string(),
        ));
    }

    let review_id = uuid::Uuid::new_v4().to_string();
    let res = sqlx::query(
        "INSERT OR IGNORE INTO home_reviews (id, home_id, family_id, reviewer_user_id, rating, title, content, \
         is_public, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(&review_id)
    .bind(&home.id)
    .bind(&family)
    .bind(&user.id)
    .bind(req.rating)
    .bind(req.title.as_deref().map(str::trim).filter(|t| !t.is_empty()))
    .bind(req.content.as_deref().map(str::trim).filter(|c| !c.is_empty()))
    .bind(req.is_public)
    .bind(now_utc())
    .execute(&state.db)
    .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::conflict("you have already reviewed this home"));
    }

    let sql = format!("SELECT {} FROM home_reviews WHERE id = ?1", HomeReview::COLUMNS);
    let row = sqlx::query(&sql).bind(&review_id).fetch_optional(&state.db).await?.ok_or_not_found("review")?;
    let review = HomeReview::from_row(&row)?;

    tracing::info!(home_id = %home.id, review_id = %review.id, rating = review.rating, "home reviewed");
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Create, "home_review", format!("reviewed home {}", home.name))
            .resource(&review.id)
            .metadata(json!({ "home_id": home.id, "rating": review.rating, "is_public": review.is_public })),
    )
    .await;
    Ok((StatusCode::CREATED, Json(review)))
}
