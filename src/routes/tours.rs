use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::{QueryBuilder, Sqlite};

use super::{homes::load_home, push_in};
use crate::{
    audit::{self, AuditEvent},
    error::{AppError, AppResult, OptionExt},
    metrics::Metrics,
    middleware::{
        auth::CurrentUser,
        ip::ClientIp,
        validation::{parse_datetime, require_max_len, validate_id, Validate, ValidatedJson},
    },
    permissions::{self, Permission, Scope},
    scheduling::{format_timestamp, tour_sources, tour_target, TourAction},
    state::AppState,
    types::{now_utc, AuditAction, HomeStatus, Role, Tour, TourStatus},
};

const MAX_REQUESTED_TIMES: usize = 5;

const TOUR_COLUMNS: &str = "id, family_id, home_id, status, requested_times, confirmed_time, family_notes, \
    operator_notes, cancel_reason, created_at, updated_at";

async fn load_tour(db: impl sqlx::SqliteExecutor<'_>, id: &str) -> AppResult<Tour> {
    let sql = format!("SELECT {} FROM tours WHERE id = ?1", TOUR_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(db).await?.ok_or_not_found("tour")?;
    Tour::from_row(&row)
}

/// Validates 1–5 future timestamps and returns them in stored form.
fn normalize_times(raw: &[String]) -> AppResult<Vec<String>> {
    if raw.is_empty() || raw.len() > MAX_REQUESTED_TIMES {
        return Err(AppError::validation(
            "requested_times",
            format!("between 1 and {} times are required", MAX_REQUESTED_TIMES),
        ));
    }
    let now = chrono::Utc::now();
    let mut times = Vec::with_capacity(raw.len());
    for t in raw {
        let dt = parse_datetime("requested_times", t)?;
        if dt <= now {
            return Err(AppError::validation("requested_times", "all times must be in the future"));
        }
        let formatted = format_timestamp(dt);
        if !times.contains(&formatted) {
            times.push(formatted);
        }
    }
    Ok(times)
}

/// Families reach their own tours, everyone else goes through home scope.
async fn require_tour_access(state: &AppState, user: &CurrentUser, tour: &Tour) -> AppResult<()> {
    match user.role {
        Role::Admin => Ok(()),
        Role::Family => {
            if user.family_id.as_deref() == Some(tour.family_id.as_str()) {
                Ok(())
            } else {
                permissions::record_denial(state, user, "tour", &tour.id).await;
                Err(AppError::Forbidden("tour is outside your scope".to_string()))
            }
        }
        _ => permissions::require_home_access(state, user, &tour.home_id).await.map(|_| ()),
    }
}

async fn load_accessible(state: &AppState, user: &CurrentUser, id: &str) -> AppResult<Tour> {
    validate_id("id", id)?;
    let tour = load_tour(&state.db, id).await?;
    require_tour_access(state, user, &tour).await?;
    Ok(tour)
}

/// Moves the tour only if it still has one of the statuses `action` starts from.
async fn transition(
    state: &AppState,
    tour: &Tour,
    action: TourAction,
    set: &[(&str, Option<String>)],
) -> AppResult<Tour> {
    let target = tour_target(tour.status, action)?;
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE tours SET status = ");
    qb.push_bind(target.as_str()).push(", updated_at = ").push_bind(now_utc());
    for (column, value) in set {
        qb.push(", ").push(*column).push(" = ").push_bind(value.clone());
    }
    qb.push(" WHERE id = ").push_bind(tour.id.clone());
    let sources: Vec<String> = tour_sources(action).iter().map(|s| s.as_str().to_string()).collect();
    push_in(&mut qb, "status", &sources);
    let res = qb.build().execute(&state.db).await?;
    if res.rows_affected() == 0 {
        // Lost a race; report against the status that won.
        let latest = load_tour(&state.db, &tour.id).await?;
        tour_target(latest.status, action)?;
        return Err(AppError::conflict("tour changed concurrently; retry"));
    }
    let updated = load_tour(&state.db, &tour.id).await?;
    tracing::info!(tour_id = %tour.id, action = action.name(), from = %tour.status, to = %updated.status, "tour transition");
    Ok(updated)
}

#[derive(Debug, Deserialize)]
pub struct RequestTourRequest {
    pub home_id: String,
    pub requested_times: Vec<String>,
    pub notes: Option<String>,
}

impl Validate for RequestTourRequest {
    fn validate(&self) -> AppResult<()> {
        validate_id("home_id", &self.home_id)?;
        normalize_times(&self.requested_times)?;
        if let Some(n) = &self.notes {
            require_max_len("notes", n, 2000)?;
        }
        Ok(())
    }
}

pub async fn request_tour(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    user: CurrentUser,
    ValidatedJson(req): ValidatedJson<RequestTourRequest>,
) -> AppResult<impl IntoResponse> {
    state.rate_limiter.check_endpoint_limit("/tours/request", ip).await?;
    permissions::require(&user, Permission::ToursRequest)?;
    let family_id = user
        .family_id
        .clone()
        .ok_or_else(|| AppError::Forbidden("only families can request tours".to_string()))?;
    let home = load_home(&state.db, &req.home_id).await?;
    if home.status != HomeStatus::Active {
        return Err(AppError::Conflict {
            message: "home is not accepting tours".to_string(),
            details: Some(json!({ "home_id": home.id, "home_status": home.status })),
        });
    }
    let times = normalize_times(&req.requested_times)?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = now_utc();
    sqlx::query(
        "INSERT INTO tours (id, family_id, home_id, status, requested_times, family_notes, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
    )
    .bind(&id)
    .bind(&family_id)
    .bind(&home.id)
    .bind(TourStatus::Pending.as_str())
    .bind(serde_json::to_string(&times)?)
    .bind(&req.notes)
    .bind(&now)
    .execute(&state.db)
    .await?;

    let tour = load_tour(&state.db, &id).await?;
    Metrics::inc(&state.metrics.tours_requested);
    tracing::info!(tour_id = %tour.id, home_id = %tour.home_id, "tour requested");
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Create, "tour", "tour requested")
            .resource(&tour.id)
            .metadata(json!({ "home_id": tour.home_id, "requested_times": tour.requested_times })),
    )
    .await;
    Ok((StatusCode::CREATED, Json(tour)))
}

#[derive(Debug, Deserialize)]
pub struct TourQuery {
    pub status: Option<TourStatus>,
    pub home_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_tours(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<TourQuery>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ToursView)?;
    let limit = state.config.page_size(query.limit);
    let offset = query.offset.unwrap_or(0).max(0);

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT {} FROM tours WHERE 1=1", TOUR_COLUMNS));
    match user.role {
        Role::Admin => {}
        Role::Family => {
            qb.push(" AND family_id = ").push_bind(user.family_id.clone().unwrap_or_default());
        }
        _ => match permissions::resolve_scope(&state.db, &user).await? {
            Scope::All => {}
            Scope::Homes(ids) => push_in(&mut qb, "home_id", &ids),
            _ => {
                qb.push(" AND 1=0");
            }
        },
    }
    if let Some(status) = query.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(home_id) = &query.home_id {
        qb.push(" AND home_id = ").push_bind(home_id.clone());
    }
    qb.push(" ORDER BY created_at DESC, id DESC LIMIT ").push_bind(limit).push(" OFFSET ").push_bind(offset);

    let rows = qb.build().fetch_all(&state.db).await?;
    let items = rows.iter().map(Tour::from_row).collect::<AppResult<Vec<_>>>()?;
    Ok(Json(json!({ "items": items, "limit": limit, "offset": offset })))
}

pub async fn get_tour(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ToursView)?;
    Ok(Json(load_accessible(&state, &user, &id).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfirmTourRequest {
    /// Must be one of the requested times; defaults to the first.
    pub confirmed_time: Option<String>,
    pub operator_notes: Option<String>,
}

impl Validate for ConfirmTourRequest {
    fn validate(&self) -> AppResult<()> {
        if let Some(t) = &self.confirmed_time {
            parse_datetime("confirmed_time", t)?;
        }
        Ok(())
    }
}

pub async fn confirm_tour(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<ConfirmTourRequest>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ToursConfirm)?;
    validate_id("id", &id)?;
    let tour = load_tour(&state.db, &id).await?;
    permissions::require_home_access(&state, &user, &tour.home_id).await?;
    tour_target(tour.status, TourAction::Confirm)?;

    let confirmed = match &req.confirmed_time {
        Some(t) => {
            let t = format_timestamp(parse_datetime("confirmed_time", t)?);
            if !tour.requested_times.contains(&t) {
                return Err(AppError::validation("confirmed_time", "must be one of the requested times"));
            }
            t
        }
        None => tour
            .requested_times
            .first()
            .cloned()
            .ok_or_else(|| AppError::validation("confirmed_time", "tour has no requested times"))?,
    };

    let updated = transition(
        &state,
        &tour,
        TourAction::Confirm,
        &[("confirmed_time", Some(confirmed.clone())), ("operator_notes", req.operator_notes.clone())],
    )
    .await?;
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Update, "tour", "tour confirmed")
            .resource(&updated.id)
            .metadata(json!({ "confirmed_time": confirmed })),
    )
    .await;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct RescheduleTourRequest {
    pub requested_times: Vec<String>,
    pub notes: Option<String>,
}

impl Validate for RescheduleTourRequest {
    fn validate(&self) -> AppResult<()> {
        normalize_times(&self.requested_times).map(|_| ())
    }
}

pub async fn reschedule_tour(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<RescheduleTourRequest>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ToursReschedule)?;
    let tour = load_accessible(&state, &user, &id).await?;
    let times = normalize_times(&req.requested_times)?;
    let notes_column = if user.role == Role::Family { "family_notes" } else { "operator_notes" };

    let mut set = vec![("requested_times", Some(serde_json::to_string(&times)?)), ("confirmed_time", None)];
    if req.notes.is_some() {
        set.push((notes_column, req.notes.clone()));
    }
    let updated = transition(&state, &tour, TourAction::Reschedule, &set).await?;
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Update, "tour", "tour rescheduled")
            .resource(&updated.id)
            .metadata(json!({ "previous_status": tour.status, "requested_times": times })),
    )
    .await;
    Ok(Json(updated))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CancelTourRequest {
    pub reason: Option<String>,
}

impl Validate for CancelTourRequest {
    fn validate(&self) -> AppResult<()> {
        if let Some(r) = &self.reason {
            require_max_len("reason", r, 1000)?;
        }
        Ok(())
    }
}

pub async fn cancel_tour(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<CancelTourRequest>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ToursCancel)?;
    let tour = load_accessible(&state, &user, &id).await?;
    let updated = transition(&state, &tour, TourAction::Cancel, &[("cancel_reason", req.reason.clone())]).await?;
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Update, "tour", "tour cancelled")
            .resource(&updated.id)
            .metadata(json!({ "previous_status": tour.status, "reason": req.reason })),
    )
    .await;
    Ok(Json(updated))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CompleteTourRequest {
    pub no_show: bool,
    pub operator_notes: Option<String>,
}

impl Validate for CompleteTourRequest {
    fn validate(&self) -> AppResult<()> {
        Ok(())
    }
}

pub async fn complete_tour(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<CompleteTourRequest>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ToursConfirm)?;
    validate_id("id", &id)?;
    let tour = load_tour(&state.db, &id).await?;
    permissions::require_home_access(&state, &user, &tour.home_id).await?;

    let mut set = Vec::new();
    if req.operator_notes.is_some() {
        set.push(("operator_notes", req.operator_notes.clone()));
    }
    let updated = transition(&state, &tour, TourAction::Complete { no_show: req.no_show }, &set).await?;
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Update, "tour", "tour completed")
            .resource(&updated.id)
            .metadata(json!({ "status": updated.status })),
    )
    .await;
    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_times_are_bounded_and_future() {
        assert!(normalize_times(&[]).is_err());
        let future = (chrono::Utc::now() + chrono::Duration::days(3)).to_rfc3339();
        let six = vec![future.clone(); 6];
        assert!(normalize_times(&six).is_err());
        assert!(normalize_times(&["2001-01-01T10:00:00Z".to_string()]).is_err());
        let normalized = normalize_times(&[future.clone(), future]).expect("one distinct future time");
        assert_eq!(normalized.len(), 1);
        assert!(normalized[0].ends_with('Z'));
    }
}
