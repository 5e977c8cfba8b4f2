use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::SubsecRound;
use serde::Deserialize;
use serde_json::json;
use sqlx::{QueryBuilder, Sqlite};

use super::{homes::load_home, push_in};
use crate::{
    audit::{self, AuditEvent},
    error::{AppError, AppResult, OptionExt},
    metrics::Metrics,
    middleware::validation::{parse_datetime, require_max_len, require_range, validate_id, Validate, ValidatedJson},
    middleware::auth::CurrentUser,
    permissions::{self, has_permission, Permission, Scope},
    scheduling::{amount_cents, check_review, format_timestamp, payable_minutes, shift_sources, shift_target, ShiftAction},
    state::AppState,
    types::{now_utc, AuditAction, Role, Shift, ShiftStatus, Timesheet, TimesheetStatus},
};

const SHIFT_COLUMNS: &str =
    "id, home_id, caregiver_id, status, start_time, end_time, hourly_rate_cents, notes, created_at, updated_at";

const TIMESHEET_COLUMNS: &str = "id, shift_id, caregiver_id, status, start_time, end_time, break_minutes, notes, \
    payable_minutes, amount_cents, reviewed_by, reviewed_at, rejection_reason, created_at";

async fn load_shift(db: impl sqlx::SqliteExecutor<'_>, id: &str) -> AppResult<Shift> {
    let sql = format!("SELECT {} FROM shifts WHERE id = ?1", SHIFT_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(db).await?.ok_or_not_found("shift")?;
    Shift::from_row(&row)
}

async fn load_timesheet(db: impl sqlx::SqliteExecutor<'_>, id: &str) -> AppResult<Timesheet> {
    let sql = format!("SELECT {} FROM timesheets WHERE id = ?1", TIMESHEET_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(db).await?.ok_or_not_found("timesheet")?;
    Timesheet::from_row(&row)
}

/// Parses both ends of a time window at stored (whole second) precision and
/// requires `end > start`.
fn parse_window(
    start: &str,
    end: &str,
) -> AppResult<(chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>)> {
    let start = parse_datetime("start_time", start)?.trunc_subsecs(0);
    let end = parse_datetime("end_time", end)?.trunc_subsecs(0);
    if end <= start {
        return Err(AppError::validation("end_time", "must be after start_time"));
    }
    Ok((start, end))
}

fn caregiver_id(user: &CurrentUser) -> AppResult<String> {
    user.caregiver_id
        .clone()
        .ok_or_else(|| AppError::Forbidden("a caregiver profile is required".to_string()))
}

fn is_assigned(user: &CurrentUser, shift: &Shift) -> bool {
    user.caregiver_id.is_some() && user.caregiver_id == shift.caregiver_id
}

/// Managers reach shifts through home scope; caregivers reach shifts in their
/// homes and the ones assigned to them.
async fn require_shift_access(state: &AppState, user: &CurrentUser, shift: &Shift) -> AppResult<()> {
    if is_assigned(user, shift) {
        return Ok(());
    }
    permissions::require_home_access(state, user, &shift.home_id).await.map(|_| ())
}

async fn transition(
    state: &AppState,
    shift: &Shift,
    action: ShiftAction,
    caregiver: Option<&str>,
) -> AppResult<Shift> {
    let target = shift_target(shift.status, action)?;
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE shifts SET status = ");
    qb.push_bind(target.as_str()).push(", updated_at = ").push_bind(now_utc());
    if let Some(caregiver) = caregiver {
        qb.push(", caregiver_id = ").push_bind(caregiver.to_string());
    }
    qb.push(" WHERE id = ").push_bind(shift.id.clone());
    let sources: Vec<String> = shift_sources(action).iter().map(|s| s.as_str().to_string()).collect();
    push_in(&mut qb, "status", &sources);
    let res = qb.build().execute(&state.db).await?;
    if res.rows_affected() == 0 {
        let latest = load_shift(&state.db, &shift.id).await?;
        shift_target(latest.status, action)?;
        return Err(AppError::conflict("shift changed concurrently; retry"));
    }
    let updated = load_shift(&state.db, &shift.id).await?;
    tracing::info!(shift_id = %shift.id, action = action.name(), from = %shift.status, to = %updated.status, "shift transition");
    Ok(updated)
}

#[derive(Debug, Deserialize)]
pub struct CreateShiftRequest {
    pub home_id: String,
    pub start_time: String,
    pub end_time: String,
    pub hourly_rate_cents: i64,
    pub notes: Option<String>,
}

impl Validate for CreateShiftRequest {
    fn validate(&self) -> AppResult<()> {
        validate_id("home_id", &self.home_id)?;
        parse_window(&self.start_time, &self.end_time)?;
        if self.hourly_rate_cents <= 0 {
            return Err(AppError::validation("hourly_rate_cents", "must be > 0"));
        }
        if let Some(n) = &self.notes {
            require_max_len("notes", n, 2000)?;
        }
        Ok(())
    }
}

pub async fn create_shift(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidatedJson(req): ValidatedJson<CreateShiftRequest>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ShiftsManage)?;
    load_home(&state.db, &req.home_id).await?;
    permissions::require_home_access(&state, &user, &req.home_id).await?;
    let (start, end) = parse_window(&req.start_time, &req.end_time)?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = now_utc();
    sqlx::query(
        "INSERT INTO shifts (id, home_id, status, start_time, end_time, hourly_rate_cents, notes, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
    )
    .bind(&id)
    .bind(&req.home_id)
    .bind(ShiftStatus::Open.as_str())
    .bind(format_timestamp(start))
    .bind(format_timestamp(end))
    .bind(req.hourly_rate_cents)
    .bind(&req.notes)
    .bind(&now)
    .execute(&state.db)
    .await?;

    let shift = load_shift(&state.db, &id).await?;
    tracing::info!(shift_id = %shift.id, home_id = %shift.home_id, "shift posted");
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Create, "shift", "shift posted")
            .resource(&shift.id)
            .metadata(json!({ "home_id": shift.home_id, "start_time": shift.start_time })),
    )
    .await;
    Ok((StatusCode::CREATED, Json(shift)))
}

#[derive(Debug, Deserialize)]
pub struct ShiftQuery {
    pub status: Option<ShiftStatus>,
    pub home_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_shifts(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<ShiftQuery>,
) -> AppResult<impl IntoResponse> {
    if !has_permission(user.role, Permission::ShiftsManage) {
        permissions::require(&user, Permission::ShiftsWork)?;
    }
    let from = query.from.as_deref().map(|f| parse_datetime("from", f)).transpose()?;
    let to = query.to.as_deref().map(|t| parse_datetime("to", t)).transpose()?;
    let limit = state.config.page_size(query.limit);
    let offset = query.offset.unwrap_or(0).max(0);

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT {} FROM shifts WHERE 1=1", SHIFT_COLUMNS));
    let scope = permissions::resolve_scope(&state.db, &user).await?;
    match (user.role, scope) {
        (_, Scope::All) => {}
        (Role::Caregiver, Scope::Homes(ids)) => {
            let own = user.caregiver_id.clone().unwrap_or_default();
            qb.push(" AND ((status = ").push_bind(ShiftStatus::Open.as_str());
            push_in(&mut qb, "home_id", &ids);
            qb.push(") OR caregiver_id = ").push_bind(own).push(")");
        }
        (_, Scope::Homes(ids)) => push_in(&mut qb, "home_id", &ids),
        _ => {
            qb.push(" AND 1=0");
        }
    }
    if let Some(status) = query.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(home_id) = &query.home_id {
        qb.push(" AND home_id = ").push_bind(home_id.clone());
    }
    if let Some(from) = from {
        qb.push(" AND start_time >= ").push_bind(format_timestamp(from));
    }
    if let Some(to) = to {
        qb.push(" AND start_time < ").push_bind(format_timestamp(to));
    }
    qb.push(" ORDER BY start_time, id LIMIT ").push_bind(limit).push(" OFFSET ").push_bind(offset);

    let rows = qb.build().fetch_all(&state.db).await?;
    let items = rows.iter().map(Shift::from_row).collect::<AppResult<Vec<_>>>()?;
    Ok(Json(json!({ "items": items, "limit": limit, "offset": offset })))
}

pub async fn get_shift(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    if !has_permission(user.role, Permission::ShiftsManage) {
        permissions::require(&user, Permission::ShiftsWork)?;
    }
    validate_id("id", &id)?;
    let shift = load_shift(&state.db, &id).await?;
    require_shift_access(&state, &user, &shift).await?;
    Ok(Json(shift))
}

pub async fn accept_shift(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ShiftsWork)?;
    let caregiver = caregiver_id(&user)?;
    validate_id("id", &id)?;
    let shift = load_shift(&state.db, &id).await?;
    permissions::require_home_access(&state, &user, &shift.home_id).await?;

    let updated = transition(&state, &shift, ShiftAction::Accept, Some(&caregiver)).await?;
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Update, "shift", "shift accepted")
            .resource(&updated.id)
            .metadata(json!({ "caregiver_id": caregiver })),
    )
    .await;
    Ok(Json(updated))
}

pub async fn complete_shift(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    validate_id("id", &id)?;
    let shift = load_shift(&state.db, &id).await?;
    if is_assigned(&user, &shift) {
        permissions::require(&user, Permission::ShiftsWork)?;
    } else {
        permissions::require(&user, Permission::ShiftsManage)?;
        permissions::require_home_access(&state, &user, &shift.home_id).await?;
    }

    let updated = transition(&state, &shift, ShiftAction::Complete, None).await?;
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Update, "shift", "shift completed").resource(&updated.id),
    )
    .await;
    Ok(Json(updated))
}

pub async fn cancel_shift(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ShiftsManage)?;
    validate_id("id", &id)?;
    let shift = load_shift(&state.db, &id).await?;
    permissions::require_home_access(&state, &user, &shift.home_id).await?;

    let updated = transition(&state, &shift, ShiftAction::Cancel, None).await?;
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Update, "shift", "shift cancelled")
            .resource(&updated.id)
            .metadata(json!({ "previous_status": shift.status })),
    )
    .await;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct SubmitTimesheetRequest {
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub break_minutes: i64,
    pub notes: Option<String>,
}

impl Validate for SubmitTimesheetRequest {
    fn validate(&self) -> AppResult<()> {
        parse_window(&self.start_time, &self.end_time)?;
        require_range("break_minutes", self.break_minutes, 0, 24 * 60)?;
        if let Some(n) = &self.notes {
            require_max_len("notes", n, 2000)?;
        }
        Ok(())
    }
}

/// The assigned caregiver records worked hours once per shift.
pub async fn submit_timesheet(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(shift_id): Path<String>,
    ValidatedJson(req): ValidatedJson<SubmitTimesheetRequest>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ShiftsWork)?;
    let caregiver = caregiver_id(&user)?;
    validate_id("id", &shift_id)?;
    let shift = load_shift(&state.db, &shift_id).await?;
    if !is_assigned(&user, &shift) {
        return Err(AppError::Forbidden("only the assigned caregiver can submit a timesheet".to_string()));
    }
    if !matches!(shift.status, ShiftStatus::Assigned | ShiftStatus::Completed) {
        return Err(AppError::Conflict {
            message: format!("cannot submit a timesheet for a shift with status {}", shift.status),
            details: Some(json!({ "status": shift.status })),
        });
    }
    let (start, end) = parse_window(&req.start_time, &req.end_time)?;

    let id = uuid::Uuid::new_v4().to_string();
    let res = sqlx::query(
        "INSERT OR IGNORE INTO timesheets (id, shift_id, caregiver_id, status, start_time, end_time, break_minutes, notes, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(&id)
    .bind(&shift.id)
    .bind(&caregiver)
    .bind(TimesheetStatus::Submitted.as_str())
    .bind(format_timestamp(start))
    .bind(format_timestamp(end))
    .bind(req.break_minutes)
    .bind(&req.notes)
    .bind(now_utc())
    .execute(&state.db)
    .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::Conflict {
            message: "a timesheet was already submitted for this shift".to_string(),
            details: Some(json!({ "shift_id": shift.id })),
        });
    }

    let timesheet = load_timesheet(&state.db, &id).await?;
    tracing::info!(timesheet_id = %timesheet.id, shift_id = %shift.id, "timesheet submitted");
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Create, "timesheet", "timesheet submitted")
            .resource(&timesheet.id)
            .metadata(json!({ "shift_id": shift.id })),
    )
    .await;
    Ok((StatusCode::CREATED, Json(timesheet)))
}

/// Loads a timesheet with its shift and checks the reviewer may act on it.
async fn load_for_review(state: &AppState, user: &CurrentUser, id: &str) -> AppResult<(Timesheet, Shift)> {
    permissions::require(user, Permission::TimesheetsApprove)?;
    validate_id("id", id)?;
    let timesheet = load_timesheet(&state.db, id).await?;
    let shift = load_shift(&state.db, &timesheet.shift_id).await?;
    permissions::require_home_access(state, user, &shift.home_id).await?;
    check_review(timesheet.status)?;
    Ok((timesheet, shift))
}

pub async fn approve_timesheet(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let (timesheet, shift) = load_for_review(&state, &user, &id).await?;
    let (start, end) = parse_window(&timesheet.start_time, &timesheet.end_time)?;
    let minutes = payable_minutes(start, end, timesheet.break_minutes);
    let amount = amount_cents(minutes, shift.hourly_rate_cents);

    let res = sqlx::query(
        "UPDATE timesheets SET status = ?1, payable_minutes = ?2, amount_cents = ?3, reviewed_by = ?4, reviewed_at = ?5 \
         WHERE id = ?6 AND status = ?7",
    )
    .bind(TimesheetStatus::Approved.as_str())
    .bind(minutes)
    .bind(amount)
    .bind(&user.id)
    .bind(now_utc())
    .bind(&timesheet.id)
    .bind(TimesheetStatus::Submitted.as_str())
    .execute(&state.db)
    .await?;
    if res.rows_affected() == 0 {
        let latest = load_timesheet(&state.db, &timesheet.id).await?;
        check_review(latest.status)?;
        return Err(AppError::conflict("timesheet changed concurrently; retry"));
    }

    let updated = load_timesheet(&state.db, &timesheet.id).await?;
    Metrics::inc(&state.metrics.timesheets_approved);
    tracing::info!(timesheet_id = %updated.id, payable_minutes = minutes, amount_cents = amount, "timesheet approved");
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Update, "timesheet", "timesheet approved")
            .resource(&updated.id)
            .metadata(json!({ "payable_minutes": minutes, "amount_cents": amount })),
    )
    .await;
    Ok(Json(updated))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RejectTimesheetRequest {
    pub reason: Option<String>,
}

impl Validate for RejectTimesheetRequest {
    fn validate(&self) -> AppResult<()> {
        if let Some(r) = &self.reason {
            require_max_len("reason", r, 1000)?;
        }
        Ok(())
    }
}

pub async fn reject_timesheet(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<RejectTimesheetRequest>,
) -> AppResult<impl IntoResponse> {
    let (timesheet, _) = load_for_review(&state, &user, &id).await?;
    let res = sqlx::query(
        "UPDATE timesheets SET status = ?1, rejection_reason = ?2, reviewed_by = ?3, reviewed_at = ?4 \
         WHERE id = ?5 AND status = ?6",
    )
    .bind(TimesheetStatus::Rejected.as_str())
    .bind(&req.reason)
    .bind(&user.id)
    .bind(now_utc())
    .bind(&timesheet.id)
    .bind(TimesheetStatus::Submitted.as_str())
    .execute(&state.db)
    .await?;
    if res.rows_affected() == 0 {
        let latest = load_timesheet(&state.db, &timesheet.id).await?;
        check_review(latest.status)?;
        return Err(AppError::conflict("timesheet changed concurrently; retry"));
    }

    let updated = load_timesheet(&state.db, &timesheet.id).await?;
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Update, "timesheet", "timesheet rejected")
            .resource(&updated.id)
            .metadata(json!({ "reason": req.reason })),
    )
    .await;
    Ok(Json(updated))
}
