use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite};

use super::{homes::load_home, like_pattern};
use crate::{
    audit::{self, AuditEvent},
    error::{AppError, AppResult, OptionExt},
    marketplace::{self, MarketplaceError},
    middleware::auth::CurrentUser,
    middleware::validation::{parse_datetime, require_max_len, require_non_empty, validate_id, Validate, ValidatedJson},
    permissions::{self, Permission},
    scheduling::format_timestamp,
    state::AppState,
    types::{now_utc, ApplicationStatus, AuditAction, Listing, ListingApplication, ListingStatus},
};

/// A listing with its application count and whether the caller has an
/// application in progress (or accepted) on it.
#[derive(Debug, Serialize)]
pub struct ListingView {
    #[serde(flatten)]
    pub listing: Listing,
    pub application_count: i64,
    pub applied_by_me: bool,
}

impl ListingView {
    fn from_row(row: &SqliteRow) -> AppResult<Self> {
        Ok(Self {
            listing: Listing::from_row(row)?,
            application_count: row.try_get("application_count")?,
            applied_by_me: row.try_get::<i64, _>("applied_by_me")? != 0,
        })
    }
}

fn view_query(caregiver_id: Option<&str>) -> QueryBuilder<'static, Sqlite> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {}, (SELECT COUNT(*) FROM listing_applications a WHERE a.listing_id = listings.id \
         AND a.status != 'WITHDRAWN') AS application_count, \
         EXISTS (SELECT 1 FROM listing_applications a WHERE a.listing_id = listings.id AND a.caregiver_id = ",
        Listing::COLUMNS
    ));
    qb.push_bind(caregiver_id.unwrap_or_default().to_string());
    qb.push(" AND a.status IN ('APPLIED', 'INVITED', 'INTERVIEWING', 'OFFERED', 'ACCEPTED')) AS applied_by_me FROM listings WHERE 1=1");
    qb
}

async fn load_listing(db: impl sqlx::SqliteExecutor<'_>, id: &str) -> AppResult<Listing> {
    let sql = format!("SELECT {} FROM listings WHERE id = ?1", Listing::COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(db).await?.ok_or_not_found("listing")?;
    Listing::from_row(&row)
}

async fn load_view(state: &AppState, user: &CurrentUser, id: &str) -> AppResult<ListingView> {
    let mut qb = view_query(user.caregiver_id.as_deref());
    qb.push(" AND id = ").push_bind(id.to_string());
    let row = qb.build().fetch_optional(&state.db).await?.ok_or_not_found("listing")?;
    ListingView::from_row(&row)
}

async fn load_application(db: impl sqlx::SqliteExecutor<'_>, id: &str) -> AppResult<ListingApplication> {
    let sql = format!("SELECT {} FROM listing_applications WHERE id = ?1", ListingApplication::COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(db).await?.ok_or_not_found("application")?;
    ListingApplication::from_row(&row)
}

async fn find_application(
    db: impl sqlx::SqliteExecutor<'_>,
    listing_id: &str,
    caregiver_id: &str,
) -> AppResult<Option<ListingApplication>> {
    let sql = format!(
        "SELECT {} FROM listing_applications WHERE listing_id = ?1 AND caregiver_id = ?2",
        ListingApplication::COLUMNS
    );
    let row = sqlx::query(&sql).bind(listing_id).bind(caregiver_id).fetch_optional(db).await?;
    row.as_ref().map(ListingApplication::from_row).transpose()
}

/// The poster manages their listing; admins manage every listing.
async fn require_poster(state: &AppState, user: &CurrentUser, listing: &Listing) -> AppResult<()> {
    if user.is_admin() || user.id == listing.posted_by_user_id {
        return Ok(());
    }
    permissions::record_denial(state, user, "listing", &listing.id).await;
    Err(AppError::Forbidden("only the poster can manage this listing".to_string()))
}

fn caregiver_id(user: &CurrentUser) -> AppResult<String> {
    user.caregiver_id
        .clone()
        .ok_or_else(|| AppError::Forbidden("a caregiver profile is required".to_string()))
}

fn check_rates(min: Option<i64>, max: Option<i64>) -> AppResult<()> {
    if min.is_some_and(|r| r < 0) || max.is_some_and(|r| r < 0) {
        return Err(AppError::validation("hourly_rate_min_cents", "rates must be >= 0"));
    }
    if let (Some(lo), Some(hi)) = (min, max) {
        if lo > hi {
            return Err(AppError::validation("hourly_rate_max_cents", "must be >= hourly_rate_min_cents"));
        }
    }
    Ok(())
}

fn clean_terms(raw: &[String]) -> Vec<String> {
    let mut terms: Vec<String> = Vec::with_capacity(raw.len());
    for t in raw.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if !terms.iter().any(|existing| existing.eq_ignore_ascii_case(t)) {
            terms.push(t.to_string());
        }
    }
    terms
}

fn optional_time(field: &str, value: &Option<String>) -> AppResult<Option<String>> {
    value.as_deref().map(|v| parse_datetime(field, v).map(format_timestamp)).transpose()
}

#[derive(Debug, Deserialize)]
pub struct CreateListingRequest {
    pub title: String,
    pub description: String,
    pub home_id: Option<String>,
    pub hourly_rate_min_cents: Option<i64>,
    pub hourly_rate_max_cents: Option<i64>,
    pub setting: Option<String>,
    #[serde(default)]
    pub care_types: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

impl Validate for CreateListingRequest {
    fn validate(&self) -> AppResult<()> {
        require_non_empty("title", &self.title)?;
        require_max_len("title", &self.title, 200)?;
        require_non_empty("description", &self.description)?;
        require_max_len("description", &self.description, 5000)?;
        if let Some(id) = &self.home_id {
            validate_id("home_id", id)?;
        }
        check_rates(self.hourly_rate_min_cents, self.hourly_rate_max_cents)?;
        let start = self.start_time.as_deref().map(|t| parse_datetime("start_time", t)).transpose()?;
        let end = self.end_time.as_deref().map(|t| parse_datetime("end_time", t)).transpose()?;
        if let (Some(start), Some(end)) = (start, end) {
            if end <= start {
                return Err(AppError::validation("end_time", "must be after start_time"));
            }
        }
        Ok(())
    }
}

pub async fn create_listing(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidatedJson(req): ValidatedJson<CreateListingRequest>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ListingsManage)?;
    if let Some(home_id) = &req.home_id {
        load_home(&state.db, home_id).await?;
        permissions::require_home_access(&state, &user, home_id).await?;
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = now_utc();
    sqlx::query(
        "INSERT INTO listings (id, posted_by_user_id, home_id, title, description, hourly_rate_min_cents, \
         hourly_rate_max_cents, setting, care_types, services, city, state, zip_code, start_time, end_time, status, \
         created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17)",
    )
    .bind(&id)
    .bind(&user.id)
    .bind(&req.home_id)
    .bind(req.title.trim())
    .bind(req.description.trim())
    .bind(req.hourly_rate_min_cents)
    .bind(req.hourly_rate_max_cents)
    .bind(&req.setting)
    .bind(serde_json::to_string(&clean_terms(&req.care_types))?)
    .bind(serde_json::to_string(&clean_terms(&req.services))?)
    .bind(&req.city)
    .bind(&req.state)
    .bind(&req.zip_code)
    .bind(optional_time("start_time", &req.start_time)?)
    .bind(optional_time("end_time", &req.end_time)?)
    .bind(ListingStatus::Open.as_str())
    .bind(&now)
    .execute(&state.db)
    .await?;

    let listing = load_listing(&state.db, &id).await?;
    tracing::info!(listing_id = %listing.id, posted_by = %user.id, "listing posted");
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Create, "listing", format!("posted listing {}", listing.title))
            .resource(&listing.id)
            .metadata(json!({ "home_id": listing.home_id })),
    )
    .await;
    Ok((StatusCode::CREATED, Json(listing)))
}

#[derive(Debug, Deserialize)]
pub struct ListingQuery {
    pub status: Option<ListingStatus>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub q: Option<String>,
    /// Only the caller's own listings.
    #[serde(default)]
    pub mine: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Open listings by default; `status` picks another status.
pub async fn list_listings(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<ListingQuery>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ListingsView)?;
    let limit = state.config.page_size(query.limit);
    let offset = query.offset.unwrap_or(0).max(0);

    let mut qb = view_query(user.caregiver_id.as_deref());
    if query.mine {
        qb.push(" AND posted_by_user_id = ").push_bind(user.id.clone());
        if let Some(status) = query.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
    } else {
        qb.push(" AND status = ").push_bind(query.status.unwrap_or(ListingStatus::Open).as_str());
    }
    if let Some(city) = query.city.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        qb.push(" AND city = ").push_bind(city.to_string()).push(" COLLATE NOCASE");
    }
    if let Some(st) = query.state.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND state = ").push_bind(st.to_string()).push(" COLLATE NOCASE");
    }
    if let Some(pattern) = like_pattern(query.q.as_deref()) {
        qb.push(" AND (title LIKE ")
            .push_bind(pattern.clone())
            .push(" OR description LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    qb.push(" ORDER BY created_at DESC, id DESC LIMIT ").push_bind(limit).push(" OFFSET ").push_bind(offset);

    let rows = qb.build().fetch_all(&state.db).await?;
    let items = rows.iter().map(ListingView::from_row).collect::<AppResult<Vec<_>>>()?;
    Ok(Json(json!({ "items": items, "limit": limit, "offset": offset })))
}

pub async fn get_listing(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ListingsView)?;
    validate_id("id", &id)?;
    Ok(Json(load_view(&state, &user, &id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateListingRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<ListingStatus>,
    pub hourly_rate_min_cents: Option<i64>,
    pub hourly_rate_max_cents: Option<i64>,
    pub setting: Option<String>,
    pub care_types: Option<Vec<String>>,
    pub services: Option<Vec<String>>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

impl Validate for UpdateListingRequest {
    fn validate(&self) -> AppResult<()> {
        if let Some(title) = &self.title {
            require_non_empty("title", title)?;
            require_max_len("title", title, 200)?;
        }
        if let Some(description) = &self.description {
            require_non_empty("description", description)?;
            require_max_len("description", description, 5000)?;
        }
        optional_time("start_time", &self.start_time)?;
        optional_time("end_time", &self.end_time)?;
        Ok(())
    }
}

pub async fn update_listing(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<UpdateListingRequest>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ListingsManage)?;
    validate_id("id", &id)?;
    let current = load_listing(&state.db, &id).await?;
    require_poster(&state, &user, &current).await?;

    let status = match req.status {
        Some(next) => marketplace::listing_status(current.status, next)?,
        None => current.status,
    };
    if current.status == ListingStatus::Hired {
        return Err(MarketplaceError::Listing { from: current.status, to: status }.into());
    }
    let rate_min = req.hourly_rate_min_cents.or(current.hourly_rate_min_cents);
    let rate_max = req.hourly_rate_max_cents.or(current.hourly_rate_max_cents);
    check_rates(rate_min, rate_max)?;
    let start_time = optional_time("start_time", &req.start_time)?.or(current.start_time.clone());
    let end_time = optional_time("end_time", &req.end_time)?.or(current.end_time.clone());
    if let (Some(start), Some(end)) = (&start_time, &end_time) {
        if end <= start {
            return Err(AppError::validation("end_time", "must be after start_time"));
        }
    }
    let care_types = req.care_types.as_deref().map(clean_terms).unwrap_or_else(|| current.care_types.clone());
    let services = req.services.as_deref().map(clean_terms).unwrap_or_else(|| current.services.clone());

    // Accepting an application can hire the listing in between.
    let res = sqlx::query(
        "UPDATE listings SET title = ?2, description = ?3, status = ?4, hourly_rate_min_cents = ?5, \
         hourly_rate_max_cents = ?6, setting = ?7, care_types = ?8, services = ?9, city = ?10, state = ?11, \
         zip_code = ?12, start_time = ?13, end_time = ?14, updated_at = ?15 WHERE id = ?1 AND status = ?16",
    )
    .bind(&id)
    .bind(req.title.as_deref().map(str::trim).unwrap_or(&current.title))
    .bind(req.description.as_deref().map(str::trim).unwrap_or(&current.description))
    .bind(status.as_str())
    .bind(rate_min)
    .bind(rate_max)
    .bind(req.setting.clone().or(current.setting.clone()))
    .bind(serde_json::to_string(&care_types)?)
    .bind(serde_json::to_string(&services)?)
    .bind(req.city.clone().or(current.city.clone()))
    .bind(req.state.clone().or(current.state.clone()))
    .bind(req.zip_code.clone().or(current.zip_code.clone()))
    .bind(start_time)
    .bind(end_time)
    .bind(now_utc())
    .bind(current.status.as_str())
    .execute(&state.db)
    .await?;
    if res.rows_affected() == 0 {
        let latest = load_listing(&state.db, &id).await?;
        return Err(MarketplaceError::Listing { from: latest.status, to: status }.into());
    }

    let listing = load_listing(&state.db, &id).await?;
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Update, "listing", "listing updated")
            .resource(&listing.id)
            .metadata(json!({ "previous_status": current.status, "status": listing.status })),
    )
    .await;
    Ok(Json(listing))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ApplyRequest {
    pub note: Option<String>,
}

impl Validate for ApplyRequest {
    fn validate(&self) -> AppResult<()> {
        if let Some(n) = &self.note {
            require_max_len("note", n, 2000)?;
        }
        Ok(())
    }
}

/// A caregiver applies to an OPEN listing. A withdrawn application is
/// reopened in place; any other earlier application is a conflict.
pub async fn apply_to_listing(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<ApplyRequest>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ListingsApply)?;
    let caregiver = caregiver_id(&user)?;
    validate_id("id", &id)?;
    let note = req.note.as_deref().map(str::trim).filter(|n| !n.is_empty());

    let mut tx = state.db.begin().await?;
    let listing = load_listing(&mut *tx, &id).await?;
    let existing = find_application(&mut *tx, &listing.id, &caregiver).await?;
    let status = marketplace::apply(listing.status, existing.as_ref().map(|a| a.status))?;
    let now = now_utc();
    let application_id = match &existing {
        Some(previous) => {
            let res = sqlx::query(
                "UPDATE listing_applications SET status = ?2, note = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?5",
            )
            .bind(&previous.id)
            .bind(status.as_str())
            .bind(note)
            .bind(&now)
            .bind(ApplicationStatus::Withdrawn.as_str())
            .execute(&mut *tx)
            .await?;
            if res.rows_affected() == 0 {
                return Err(AppError::conflict("application changed concurrently; retry"));
            }
            previous.id.clone()
        }
        None => {
            let application_id = uuid::Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO listing_applications (id, listing_id, caregiver_id, status, note, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            )
            .bind(&application_id)
            .bind(&listing.id)
            .bind(&caregiver)
            .bind(status.as_str())
            .bind(note)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            application_id
        }
    };
    let application = load_application(&mut *tx, &application_id).await?;
    tx.commit().await?;

    tracing::info!(listing_id = %listing.id, caregiver_id = %caregiver, reopened = existing.is_some(), "listing application");
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Create, "listing_application", "applied to listing")
            .resource(&application.id)
            .metadata(json!({ "listing_id": listing.id, "reopened": existing.is_some() })),
    )
    .await;
    Ok((StatusCode::CREATED, Json(application)))
}

/// The caller withdraws their in-progress application to the listing.
pub async fn withdraw_application(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ListingsApply)?;
    let caregiver = caregiver_id(&user)?;
    validate_id("id", &id)?;
    let application = find_application(&state.db, &id, &caregiver).await?.ok_or_not_found("application")?;
    let target = marketplace::withdraw(application.status)?;

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE listing_applications SET status = ");
    qb.push_bind(target.as_str()).push(", updated_at = ").push_bind(now_utc());
    qb.push(" WHERE id = ").push_bind(application.id.clone());
    qb.push(" AND status IN ('APPLIED', 'INVITED', 'INTERVIEWING', 'OFFERED')");
    let res = qb.build().execute(&state.db).await?;
    if res.rows_affected() == 0 {
        let latest = load_application(&state.db, &application.id).await?;
        marketplace::withdraw(latest.status)?;
        return Err(AppError::conflict("application changed concurrently; retry"));
    }

    let updated = load_application(&state.db, &application.id).await?;
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Update, "listing_application", "application withdrawn")
            .resource(&updated.id)
            .metadata(json!({ "listing_id": updated.listing_id, "previous_status": application.status })),
    )
    .await;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct ApplicationQuery {
    pub status: Option<ApplicationStatus>,
}

pub async fn list_applications(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Query(query): Query<ApplicationQuery>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ListingsManage)?;
    validate_id("id", &id)?;
    let listing = load_listing(&state.db, &id).await?;
    require_poster(&state, &user, &listing).await?;

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {} FROM listing_applications WHERE listing_id = ",
        ListingApplication::COLUMNS
    ));
    qb.push_bind(listing.id.clone());
    if let Some(status) = query.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    qb.push(" ORDER BY created_at, id");
    let rows = qb.build().fetch_all(&state.db).await?;
    let items = rows.iter().map(ListingApplication::from_row).collect::<AppResult<Vec<_>>>()?;
    Ok(Json(json!({ "items": items })))
}

#[derive(Debug, Deserialize)]
pub struct ReviewApplicationRequest {
    pub status: ApplicationStatus,
}

impl Validate for ReviewApplicationRequest {
    fn validate(&self) -> AppResult<()> {
        Ok(())
    }
}

/// The poster moves an application along. Accepting one hires the listing in
/// the same transaction; the listing must still be OPEN.
pub async fn review_application(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<ReviewApplicationRequest>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ListingsManage)?;
    validate_id("id", &id)?;
    let application = load_application(&state.db, &id).await?;
    let listing = load_listing(&state.db, &application.listing_id).await?;
    require_poster(&state, &user, &listing).await?;
    let target = marketplace::review(application.status, req.status)?;

    let mut tx = state.db.begin().await?;
    let now = now_utc();
    if target == ApplicationStatus::Accepted {
        let res = sqlx::query("UPDATE listings SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status = ?4")
            .bind(&listing.id)
            .bind(ListingStatus::Hired.as_str())
            .bind(&now)
            .bind(ListingStatus::Open.as_str())
            .execute(&mut *tx)
            .await?;
        if res.rows_affected() == 0 {
            let latest = load_listing(&mut *tx, &listing.id).await?;
            return Err(MarketplaceError::ListingNotOpen(latest.status).into());
        }
    }
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE listing_applications SET status = ");
    qb.push_bind(target.as_str()).push(", updated_at = ").push_bind(now);
    qb.push(" WHERE id = ").push_bind(application.id.clone());
    let sources: Vec<String> = marketplace::review_sources(target).iter().map(|s| s.as_str().to_string()).collect();
    super::push_in(&mut qb, "status", &sources);
    let res = qb.build().execute(&mut *tx).await?;
    if res.rows_affected() == 0 {
        let latest = load_application(&mut *tx, &application.id).await?;
        marketplace::review(latest.status, target)?;
        return Err(AppError::conflict("application changed concurrently; retry"));
    }
    let updated = load_application(&mut *tx, &application.id).await?;
    tx.commit().await?;

    tracing::info!(application_id = %updated.id, from = %application.status, to = %updated.status, "application reviewed");
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Update, "listing_application", format!("application {}", updated.status))
            .resource(&updated.id)
            .metadata(json!({
                "listing_id": listing.id,
                "previous_status": application.status,
                "status": updated.status,
            })),
    )
    .await;
    Ok(Json(updated))
}
