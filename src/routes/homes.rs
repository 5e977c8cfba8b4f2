use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::{like_pattern, push_in};
use crate::{
    audit::{self, AuditEvent},
    error::{AppError, AppResult, OptionExt},
    lifecycle,
    middleware::{
        auth::CurrentUser,
        validation::{require_max_len, require_non_empty, validate_id, Validate, ValidatedJson},
    },
    permissions::{self, Permission, Scope},
    state::AppState,
    types::{now_utc, AuditAction, CareLevel, Home, HomeStatus, Role},
};

pub(crate) async fn load_home(db: impl sqlx::SqliteExecutor<'_>, home_id: &str) -> AppResult<Home> {
    let sql = format!("SELECT {} FROM homes WHERE id = ?1", Home::COLUMNS);
    let row = sqlx::query(&sql).bind(home_id).fetch_optional(db).await?.ok_or_not_found("home")?;
    Home::from_row(&row)
}

fn parse_care_levels(raw: &[String]) -> AppResult<Vec<CareLevel>> {
    let mut levels = Vec::with_capacity(raw.len());
    for s in raw {
        let level = CareLevel::parse_lenient(s)
            .ok_or_else(|| AppError::validation("care_levels", format!("unknown care level '{}'", s)))?;
        if !levels.contains(&level) {
            levels.push(level);
        }
    }
    if levels.is_empty() {
        return Err(AppError::validation("care_levels", "at least one care level is required"));
    }
    Ok(levels)
}

fn check_prices(price_min: Option<i64>, price_max: Option<i64>) -> AppResult<()> {
    if price_min.is_some_and(|p| p < 0) || price_max.is_some_and(|p| p < 0) {
        return Err(AppError::validation("price_min", "prices must be >= 0"));
    }
    if let (Some(lo), Some(hi)) = (price_min, price_max) {
        if lo > hi {
            return Err(AppError::validation("price_max", "must be >= price_min"));
        }
    }
    Ok(())
}

fn embedding_text(home: &HomeText<'_>) -> String {
    let mut parts: Vec<&str> = vec![home.name];
    if let Some(d) = home.description {
        parts.push(d);
    }
    let levels: Vec<&str> = home.care_levels.iter().map(|l| l.as_str()).collect();
    parts.extend(levels);
    parts.extend(home.amenities.iter().map(String::as_str));
    if let Some(c) = home.city {
        parts.push(c);
    }
    parts.join(" ").replace('_', " ")
}

struct HomeText<'a> {
    name: &'a str,
    description: Option<&'a str>,
    care_levels: &'a [CareLevel],
    amenities: &'a [String],
    city: Option<&'a str>,
}

/// A supplied vector wins; otherwise the configured provider embeds the
/// listing text. Provider failures leave the home without an embedding.
async fn home_embedding(state: &AppState, supplied: Option<Vec<f32>>, text: &HomeText<'_>) -> Option<String> {
    let vector = match supplied {
        Some(v) => Some(v),
        None => match state.embeddings.embed(&embedding_text(text)).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(provider = state.embeddings.name(), "home embedding failed: {}", e);
                None
            }
        },
    };
    vector.and_then(|v| serde_json::to_string(&v).ok())
}

fn check_embedding(embedding: &Option<Vec<f32>>) -> AppResult<()> {
    if let Some(e) = embedding {
        if e.is_empty() || e.iter().any(|x| !x.is_finite()) {
            return Err(AppError::validation("embedding", "must be a non-empty vector of finite numbers"));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct CreateHomeRequest {
    /// Required for admins; operators always create under their own operator.
    pub operator_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub status: Option<HomeStatus>,
    pub care_levels: Vec<String>,
    #[serde(default)]
    pub amenities: Vec<String>,
    pub capacity: i64,
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

impl Validate for CreateHomeRequest {
    fn validate(&self) -> AppResult<()> {
        require_non_empty("name", &self.name)?;
        require_max_len("name", &self.name, 200)?;
        if self.capacity < 1 {
            return Err(AppError::validation("capacity", "must be >= 1"));
        }
        check_prices(self.price_min, self.price_max)?;
        parse_care_levels(&self.care_levels)?;
        check_embedding(&self.embedding)
    }
}

pub async fn create_home(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidatedJson(req): ValidatedJson<CreateHomeRequest>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::HomesCreate)?;
    let operator_id = match user.role {
        Role::Operator => {
            let own = user
                .operator_id
                .clone()
                .ok_or_else(|| AppError::Forbidden("operator profile missing".to_string()))?;
            if req.operator_id.as_deref().is_some_and(|o| o != own) {
                return Err(AppError::Forbidden("operators create homes for themselves only".to_string()));
            }
            own
        }
        _ => {
            let id = req
                .operator_id
                .clone()
                .ok_or_else(|| AppError::validation("operator_id", "is required"))?;
            validate_id("operator_id", &id)?;
            let exists: Option<String> = sqlx::query_scalar("SELECT id FROM operators WHERE id = ?1")
                .bind(&id)
                .fetch_optional(&state.db)
                .await?;
            exists.ok_or_not_found("operator")?
        }
    };

    let care_levels = parse_care_levels(&req.care_levels)?;
    let amenities: Vec<String> =
        req.amenities.iter().map(|a| a.trim().to_string()).filter(|a| !a.is_empty()).collect();
    let embedding = home_embedding(
        &state,
        req.embedding.clone(),
        &HomeText {
            name: &req.name,
            description: req.description.as_deref(),
            care_levels: &care_levels,
            amenities: &amenities,
            city: req.city.as_deref(),
        },
    )
    .await;

    let id = uuid::Uuid::new_v4().to_string();
    let now = now_utc();
    sqlx::query(
        "INSERT INTO homes (id, operator_id, name, description, status, care_levels, amenities, capacity, \
         current_occupancy, price_min, price_max, city, state, zip_code, embedding, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
    )
    .bind(&id)
    .bind(&operator_id)
    .bind(req.name.trim())
    .bind(&req.description)
    .bind(req.status.unwrap_or(HomeStatus::Draft).as_str())
    .bind(serde_json::to_string(&care_levels)?)
    .bind(serde_json::to_string(&amenities)?)
    .bind(req.capacity)
    .bind(req.price_min)
    .bind(req.price_max)
    .bind(&req.city)
    .bind(&req.state)
    .bind(&req.zip_code)
    .bind(embedding)
    .bind(&now)
    .execute(&state.db)
    .await?;

    let home = load_home(&state.db, &id).await?;
    tracing::info!(home_id = %home.id, %operator_id, "home created");
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Create, "home", format!("created home {}", home.name))
            .resource(&home.id)
            .metadata(json!({ "capacity": home.capacity, "status": home.status })),
    )
    .await;
    Ok((StatusCode::CREATED, Json(home)))
}

#[derive(Debug, Deserialize)]
pub struct HomeQuery {
    pub q: Option<String>,
    pub status: Option<HomeStatus>,
    pub care_level: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub has_availability: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_homes(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<HomeQuery>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::HomesView)?;
    let scope = permissions::resolve_scope(&state.db, &user).await?;
    let limit = state.config.page_size(query.limit);
    let offset = query.offset.unwrap_or(0).max(0);

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT {} FROM homes WHERE 1=1", Home::COLUMNS));
    // Anyone may browse the public ACTIVE listing; everything else stays within scope.
    let public = query.status == Some(HomeStatus::Active);
    match &scope {
        Scope::All => {}
        Scope::Homes(ids) if !public => push_in(&mut qb, "id", ids),
        _ => {
            qb.push(" AND status = ").push_bind(HomeStatus::Active.as_str());
        }
    }
    if let Some(status) = query.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(pattern) = like_pattern(query.q.as_deref()) {
        qb.push(" AND (name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR description LIKE ")
            .push_bind(pattern.clone())
            .push(" OR city LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(raw) = query.care_level.as_deref().filter(|s| !s.trim().is_empty()) {
        let level = CareLevel::parse_lenient(raw)
            .ok_or_else(|| AppError::validation("care_level", format!("unknown care level '{}'", raw)))?;
        qb.push(" AND care_levels LIKE ").push_bind(format!("%\"{}\"%", level.as_str()));
    }
    if let Some(city) = query.city.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND city = ").push_bind(city.to_string()).push(" COLLATE NOCASE");
    }
    if let Some(st) = query.state.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND state = ").push_bind(st.to_string()).push(" COLLATE NOCASE");
    }
    if let Some(zip) = query.zip.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND zip_code = ").push_bind(zip.to_string());
    }
    if let Some(min) = query.min_price {
        qb.push(" AND (price_max IS NULL OR price_max >= ").push_bind(min).push(")");
    }
    if let Some(max) = query.max_price {
        qb.push(" AND (price_min IS NULL OR price_min <= ").push_bind(max).push(")");
    }
    if query.has_availability == Some(true) {
        qb.push(" AND current_occupancy < capacity");
    }
    qb.push(" ORDER BY name ASC, id ASC LIMIT ").push_bind(limit).push(" OFFSET ").push_bind(offset);

    let rows = qb.build().fetch_all(&state.db).await?;
    let items = rows.iter().map(Home::from_row).collect::<AppResult<Vec<_>>>()?;
    Ok(Json(json!({ "items": items, "limit": limit, "offset": offset })))
}

/// ACTIVE homes are public to `homes.view`; other homes need scope.
pub(crate) async fn load_visible_home(state: &AppState, user: &CurrentUser, home_id: &str) -> AppResult<Home> {
    validate_id("id", home_id)?;
    let home = load_home(&state.db, home_id).await?;
    if home.status != HomeStatus::Active {
        permissions::require_home_access(state, user, &home.id).await?;
    }
    Ok(home)
}

pub async fn get_home(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::HomesView)?;
    let home = load_visible_home(&state, &user, &id).await?;
    Ok(Json(home))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateHomeRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<HomeStatus>,
    pub care_levels: Option<Vec<String>>,
    pub amenities: Option<Vec<String>>,
    pub capacity: Option<i64>,
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

impl Validate for UpdateHomeRequest {
    fn validate(&self) -> AppResult<()> {
        if let Some(name) = &self.name {
            require_non_empty("name", name)?;
            require_max_len("name", name, 200)?;
        }
        if self.capacity.is_some_and(|c| c < 1) {
            return Err(AppError::validation("capacity", "must be >= 1"));
        }
        if let Some(levels) = &self.care_levels {
            parse_care_levels(levels)?;
        }
        check_embedding(&self.embedding)
    }
}

pub async fn update_home(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<UpdateHomeRequest>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::HomesUpdate)?;
    validate_id("id", &id)?;
    let current = load_home(&state.db, &id).await?;
    permissions::require_home_access(&state, &user, &id).await?;

    let name = req.name.as_deref().map(str::trim).unwrap_or(&current.name).to_string();
    // An empty description clears it.
    let description = match req.description.as_deref().map(str::trim) {
        Some("") => None,
        Some(d) => Some(d.to_string()),
        None => current.description.clone(),
    };
    let care_levels = match &req.care_levels {
        Some(raw) => parse_care_levels(raw)?,
        None => current.care_levels.clone(),
    };
    let amenities: Vec<String> = match &req.amenities {
        Some(raw) => raw.iter().map(|a| a.trim().to_string()).filter(|a| !a.is_empty()).collect(),
        None => current.amenities.clone(),
    };
    let capacity = req.capacity.unwrap_or(current.capacity);
    let price_min = req.price_min.or(current.price_min);
    let price_max = req.price_max.or(current.price_max);
    check_prices(price_min, price_max)?;
    let city = req.city.clone().or(current.city.clone());

    let text_changed = req.name.is_some()
        || req.description.is_some()
        || req.care_levels.is_some()
        || req.amenities.is_some()
        || req.city.is_some();
    let embedding = if req.embedding.is_some() || text_changed || current.embedding.is_none() {
        home_embedding(
            &state,
            req.embedding.clone(),
            &HomeText {
                name: &name,
                description: description.as_deref(),
                care_levels: &care_levels,
                amenities: &amenities,
                city: city.as_deref(),
            },
        )
        .await
    } else {
        current.embedding.as_ref().and_then(|v| serde_json::to_string(v).ok())
    };

    // Capacity is checked against the live counter in the same statement.
    let res = sqlx::query(
        "UPDATE homes SET name = ?2, description = ?3, status = ?4, care_levels = ?5, amenities = ?6, capacity = ?7, \
         price_min = ?8, price_max = ?9, city = ?10, state = ?11, zip_code = ?12, embedding = ?13, updated_at = ?14 \
         WHERE id = ?1 AND current_occupancy <= ?7",
    )
    .bind(&id)
    .bind(&name)
    .bind(&description)
    .bind(req.status.unwrap_or(current.status).as_str())
    .bind(serde_json::to_string(&care_levels)?)
    .bind(serde_json::to_string(&amenities)?)
    .bind(capacity)
    .bind(price_min)
    .bind(price_max)
    .bind(&city)
    .bind(req.state.clone().or(current.state.clone()))
    .bind(req.zip_code.clone().or(current.zip_code.clone()))
    .bind(embedding)
    .bind(now_utc())
    .execute(&state.db)
    .await?;
    if res.rows_affected() == 0 {
        let latest = load_home(&state.db, &id).await?;
        return Err(AppError::Conflict {
            message: "capacity cannot drop below current occupancy".to_string(),
            details: Some(json!({ "capacity": capacity, "current_occupancy": latest.current_occupancy })),
        });
    }

    let home = load_home(&state.db, &id).await?;
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Update, "home", format!("updated home {}", home.name))
            .resource(&home.id)
            .metadata(json!({
                "previous_status": current.status,
                "status": home.status,
                "previous_capacity": current.capacity,
                "capacity": home.capacity,
            })),
    )
    .await;
    Ok(Json(home))
}

pub async fn delete_home(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::HomesDelete)?;
    validate_id("id", &id)?;
    permissions::require_home_access(&state, &user, &id).await?;
    let home = remove_home(&state.db, &id).await?;
    tracing::info!(home_id = %id, "home deleted");
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Delete, "home", format!("deleted home {}", home.name)).resource(&id),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

/// Refuses while ACTIVE residents remain. Other residents keep their record
/// without a home; the home's leads go with it.
async fn remove_home(db: &SqlitePool, home_id: &str) -> AppResult<Home> {
    let mut tx = db.begin().await?;
    let home = load_home(&mut *tx, home_id).await?;
    let active: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM residents WHERE home_id = ?1 AND status = 'ACTIVE'")
        .bind(home_id)
        .fetch_one(&mut *tx)
        .await?;
    if active > 0 {
        return Err(AppError::Conflict {
            message: "home still has active residents".to_string(),
            details: Some(json!({ "active_residents": active })),
        });
    }
    sqlx::query("UPDATE residents SET home_id = NULL, updated_at = ?2 WHERE home_id = ?1")
        .bind(home_id)
        .bind(now_utc())
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM inquiries WHERE home_id = ?1").bind(home_id).execute(&mut *tx).await?;
    sqlx::query("DELETE FROM homes WHERE id = ?1").bind(home_id).execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(home)
}

pub async fn occupancy(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::HomesView)?;
    validate_id("id", &id)?;
    load_home(&state.db, &id).await?;
    permissions::require_home_access(&state, &user, &id).await?;
    Ok(Json(lifecycle::occupancy_report(&state.db, &id).await?))
}

pub async fn reconcile(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("reconcile is limited to administrators".to_string()));
    }
    validate_id("id", &id)?;
    let report = lifecycle::reconcile(&state.db, &id).await?;
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Update, "home", "occupancy reconciled")
            .resource(&id)
            .metadata(json!({ "drift": report.drift, "active_residents": report.active_residents })),
    )
    .await;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn care_levels_dedupe_and_accept_aliases() {
        let levels = parse_care_levels(&["assisted_living".into(), "ASSISTED".into(), "memory_care".into()])
            .expect("levels");
        assert_eq!(levels, vec![CareLevel::Assisted, CareLevel::MemoryCare]);
        assert!(parse_care_levels(&[]).is_err());
        assert!(parse_care_levels(&["spa".into()]).is_err());
    }

    #[test]
    fn price_range_must_be_ordered() {
        assert!(check_prices(Some(3000), Some(5000)).is_ok());
        assert!(check_prices(None, Some(5000)).is_ok());
        assert!(check_prices(Some(6000), Some(5000)).is_err());
        assert!(check_prices(Some(-1), None).is_err());
    }
}
