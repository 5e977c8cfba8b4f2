use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::{QueryBuilder, Sqlite};

use super::{homes::load_home, like_pattern, push_in};
use crate::{
    audit::{self, AuditEvent},
    error::{AppError, AppResult, OptionExt},
    export::{csv_attachment, csv_row, opt},
    family::{self, FamilyContact},
    lifecycle::{self, NewResident, Transition, TransitionDetails},
    metrics::Metrics,
    middleware::{
        auth::CurrentUser,
        validation::{parse_date, require_max_len, require_non_empty, validate_id, Validate, ValidatedJson},
    },
    permissions::{self, Permission, Scope},
    state::AppState,
    types::{now_utc, AuditAction, Page, Resident, ResidentStatus},
};

/// Rows a single CSV export may contain.
const EXPORT_MAX_ROWS: i64 = 10_000;

async fn load_resident(state: &AppState, id: &str) -> AppResult<Resident> {
    validate_id("id", id)?;
    let sql = format!("SELECT {} FROM residents WHERE id = ?1", Resident::COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(&state.db).await?.ok_or_not_found("resident")?;
    Resident::from_row(&row)
}

fn check_birth_date(value: &str) -> AppResult<()> {
    let dob = parse_date("date_of_birth", value)?;
    if dob >= chrono::Utc::now().date_naive() {
        return Err(AppError::validation("date_of_birth", "must be in the past"));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct CreateResidentRequest {
    pub family_id: Option<String>,
    /// Contact used when no family id is given.
    pub family_email: Option<String>,
    pub home_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: String,
    pub gender: String,
    pub status: Option<ResidentStatus>,
    pub care_level: Option<String>,
    pub medical_conditions: Option<String>,
    pub medications: Option<String>,
    pub allergies: Option<String>,
    pub dietary_restrictions: Option<String>,
}

impl Validate for CreateResidentRequest {
    fn validate(&self) -> AppResult<()> {
        require_non_empty("first_name", &self.first_name)?;
        require_non_empty("last_name", &self.last_name)?;
        require_max_len("first_name", &self.first_name, 100)?;
        require_max_len("last_name", &self.last_name, 100)?;
        require_non_empty("gender", &self.gender)?;
        check_birth_date(&self.date_of_birth)?;
        if let Some(id) = &self.family_id {
            validate_id("family_id", id)?;
        }
        if let Some(id) = &self.home_id {
            validate_id("home_id", id)?;
        }
        match self.status {
            None | Some(ResidentStatus::Inquiry) | Some(ResidentStatus::Pending) => Ok(()),
            Some(_) => Err(AppError::validation("status", "new residents start as INQUIRY or PENDING; use admit")),
        }
    }
}

pub async fn create_resident(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidatedJson(req): ValidatedJson<CreateResidentRequest>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ResidentsCreate)?;
    if let Some(home_id) = &req.home_id {
        load_home(&state.db, home_id).await?;
        if !user.is_admin() {
            permissions::require_home_access(&state, &user, home_id).await?;
        }
    }

    let mut tx = state.db.begin().await?;
    let family_id = family::resolve_or_create(
        &mut tx,
        req.family_id.as_deref(),
        &FamilyContact {
            email: req.family_email.clone(),
            first_name: "Family of".to_string(),
            last_name: format!("{} {}", req.first_name.trim(), req.last_name.trim()),
            phone: None,
        },
    )
    .await?;
    let id = lifecycle::insert_resident(
        &mut *tx,
        &NewResident {
            family_id,
            home_id: req.home_id.clone(),
            first_name: req.first_name.clone(),
            last_name: req.last_name.clone(),
            date_of_birth: req.date_of_birth.trim().to_string(),
            gender: req.gender.trim().to_uppercase(),
            status: req.status.unwrap_or(ResidentStatus::Inquiry),
            care_level: req.care_level.clone(),
            medical_conditions: req.medical_conditions.clone(),
            medications: req.medications.clone(),
            allergies: req.allergies.clone(),
            dietary_restrictions: req.dietary_restrictions.clone(),
        },
    )
    .await?;
    let resident = lifecycle::load_resident(&mut tx, &id).await?;
    tx.commit().await?;

    tracing::info!(resident_id = %resident.id, family_id = %resident.family_id, "resident created");
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Create, "resident", "resident created")
            .resource(&resident.id)
            .metadata(json!({ "status": resident.status, "home_id": resident.home_id })),
    )
    .await;
    Ok((StatusCode::CREATED, Json(resident)))
}

#[derive(Debug, Deserialize)]
pub struct ResidentQuery {
    pub q: Option<String>,
    pub status: Option<ResidentStatus>,
    pub home_id: Option<String>,
    pub family_id: Option<String>,
    pub show_archived: Option<bool>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
    pub format: Option<String>,
}

fn resident_filters(qb: &mut QueryBuilder<'_, Sqlite>, scope: &Scope, query: &ResidentQuery) {
    match scope {
        Scope::All => {}
        Scope::Homes(ids) => push_in(qb, "home_id", ids),
        Scope::Residents(ids) => push_in(qb, "id", ids),
        Scope::None => {
            qb.push(" AND 1=0");
        }
    }
    if let Some(pattern) = like_pattern(query.q.as_deref()) {
        qb.push(" AND (first_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR last_name LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(status) = query.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(home_id) = &query.home_id {
        qb.push(" AND home_id = ").push_bind(home_id.clone());
    }
    if let Some(family_id) = &query.family_id {
        qb.push(" AND family_id = ").push_bind(family_id.clone());
    }
    if query.show_archived != Some(true) {
        qb.push(" AND archived_at IS NULL");
    }
}

pub async fn list_residents(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<ResidentQuery>,
) -> AppResult<Response> {
    permissions::require(&user, Permission::ResidentsView)?;
    let scope = permissions::resolve_scope(&state.db, &user).await?;
    let csv = match query.format.as_deref() {
        None | Some("json") => false,
        Some("csv") => true,
        Some(other) => return Err(AppError::validation("format", format!("unsupported format '{}'", other))),
    };

    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {} FROM residents WHERE 1=1", Resident::COLUMNS));
    resident_filters(&mut qb, &scope, &query);

    if csv {
        permissions::require(&user, Permission::ReportsExport)?;
        qb.push(" ORDER BY last_name ASC, first_name ASC, id ASC LIMIT ").push_bind(EXPORT_MAX_ROWS);
        let rows = qb.build().fetch_all(&state.db).await?;
        let residents = rows.iter().map(Resident::from_row).collect::<AppResult<Vec<_>>>()?;
        audit::record(
            &state,
            AuditEvent::by(&user, AuditAction::Export, "resident", "resident CSV export")
                .metadata(json!({ "rows": residents.len() })),
        )
        .await;
        return Ok(csv_attachment("residents", residents_csv(&residents)));
    }

    let limit = state.config.page_size(query.limit);
    if let Some(cursor) = &query.cursor {
        qb.push(" AND id > ").push_bind(cursor.clone());
    }
    // One extra row tells whether another page exists.
    qb.push(" ORDER BY id ASC LIMIT ").push_bind(limit + 1);
    let rows = qb.build().fetch_all(&state.db).await?;
    let mut items = rows.iter().map(Resident::from_row).collect::<AppResult<Vec<_>>>()?;
    let next_cursor = if items.len() as i64 > limit {
        items.truncate(limit as usize);
        items.last().map(|r| r.id.clone())
    } else {
        None
    };
    Ok(Json(Page { items, next_cursor }).into_response())
}

fn residents_csv(residents: &[Resident]) -> String {
    let mut out = csv_row([
        "id",
        "first_name",
        "last_name",
        "date_of_birth",
        "gender",
        "status",
        "care_level",
        "home_id",
        "family_id",
        "admission_date",
        "discharge_date",
        "archived_at",
        "created_at",
    ]);
    for r in residents {
        out.push_str(&csv_row([
            r.id.as_str(),
            r.first_name.as_str(),
            r.last_name.as_str(),
            r.date_of_birth.as_str(),
            r.gender.as_str(),
            r.status.as_str(),
            opt(&r.care_level),
            opt(&r.home_id),
            r.family_id.as_str(),
            opt(&r.admission_date),
            opt(&r.discharge_date),
            opt(&r.archived_at),
            r.created_at.as_str(),
        ]));
    }
    out
}

pub async fn get_resident(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ResidentsView)?;
    let resident = load_resident(&state, &id).await?;
    permissions::require_resident_access(&state, &user, &resident).await?;
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Read, "resident", "resident viewed").resource(&resident.id),
    )
    .await;
    Ok(Json(resident))
}

/// Demographic and care fields only; status moves through the transitions.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateResidentRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub home_id: Option<String>,
    pub care_level: Option<String>,
    pub medical_conditions: Option<String>,
    pub medications: Option<String>,
    pub allergies: Option<String>,
    pub dietary_restrictions: Option<String>,
}

impl Validate for UpdateResidentRequest {
    fn validate(&self) -> AppResult<()> {
        if let Some(v) = &self.first_name {
            require_non_empty("first_name", v)?;
            require_max_len("first_name", v, 100)?;
        }
        if let Some(v) = &self.last_name {
            require_non_empty("last_name", v)?;
            require_max_len("last_name", v, 100)?;
        }
        if let Some(v) = &self.gender {
            require_non_empty("gender", v)?;
        }
        if let Some(v) = &self.date_of_birth {
            check_birth_date(v)?;
        }
        if let Some(id) = &self.home_id {
            validate_id("home_id", id)?;
        }
        Ok(())
    }
}

pub async fn update_resident(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<UpdateResidentRequest>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ResidentsUpdate)?;
    let resident = load_resident(&state, &id).await?;
    permissions::require_resident_access(&state, &user, &resident).await?;

    if let Some(home_id) = req.home_id.as_deref().filter(|h| Some(*h) != resident.home_id.as_deref()) {
        if resident.status == ResidentStatus::Active {
            return Err(AppError::Conflict {
                message: "home cannot change while the resident is ACTIVE; use transfer".to_string(),
                details: Some(json!({ "status": resident.status })),
            });
        }
        load_home(&state.db, home_id).await?;
        if !user.is_admin() {
            permissions::require_home_access(&state, &user, home_id).await?;
        }
    }

    let fields: [(&str, Option<String>); 10] = [
        ("first_name", req.first_name.as_deref().map(|s| s.trim().to_string())),
        ("last_name", req.last_name.as_deref().map(|s| s.trim().to_string())),
        ("date_of_birth", req.date_of_birth.as_deref().map(|s| s.trim().to_string())),
        ("gender", req.gender.as_deref().map(|s| s.trim().to_uppercase())),
        ("home_id", req.home_id.clone()),
        ("care_level", req.care_level.clone()),
        ("medical_conditions", req.medical_conditions.clone()),
        ("medications", req.medications.clone()),
        ("allergies", req.allergies.clone()),
        ("dietary_restrictions", req.dietary_restrictions.clone()),
    ];
    // An unchanged home_id is not a move.
    let changes: Vec<(&str, String)> = fields
        .into_iter()
        .filter(|(column, value)| !(*column == "home_id" && value.as_deref() == resident.home_id.as_deref()))
        .filter_map(|(column, value)| value.map(|v| (column, v)))
        .collect();
    let changed: Vec<&str> = changes.iter().map(|(column, _)| *column).collect();
    let updated = lifecycle::update_fields(&state.db, &resident.id, &changes).await?;
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Update, "resident", "resident updated")
            .resource(&updated.id)
            .metadata(json!({ "fields": changed })),
    )
    .await;
    Ok(Json(updated))
}

pub async fn delete_resident(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::ResidentsDelete)?;
    let resident = load_resident(&state, &id).await?;
    permissions::require_resident_access(&state, &user, &resident).await?;
    let deleted = lifecycle::delete_resident(&state.db, &id).await?;
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Delete, "resident", "resident deleted")
            .resource(&id)
            .metadata(json!({ "status": deleted.status, "home_id": deleted.home_id })),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

/// Body shared by every transition endpoint; each reads the fields it needs.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TransitionRequest {
    pub home_id: Option<String>,
    #[serde(alias = "admission_date", alias = "discharge_date", alias = "date_of_death")]
    pub date: Option<String>,
    pub reason: Option<String>,
}

impl Validate for TransitionRequest {
    fn validate(&self) -> AppResult<()> {
        if let Some(id) = &self.home_id {
            validate_id("home_id", id)?;
        }
        if let Some(d) = &self.date {
            parse_date("date", d)?;
        }
        if let Some(r) = &self.reason {
            require_max_len("reason", r, 1000)?;
        }
        Ok(())
    }
}

async fn run_transition(
    state: &AppState,
    user: &CurrentUser,
    id: &str,
    transition: Transition,
    req: TransitionRequest,
) -> AppResult<Json<serde_json::Value>> {
    permissions::require(user, Permission::ResidentsUpdate)?;
    let resident = load_resident(state, id).await?;
    permissions::require_resident_access(state, user, &resident).await?;

    // The receiving home must be in scope too.
    let target = match &transition {
        Transition::Admit { home_id } => home_id.as_deref(),
        Transition::Transfer { to_home_id } => Some(to_home_id.as_str()),
        _ => None,
    };
    if let Some(home_id) = target.filter(|h| Some(*h) != resident.home_id.as_deref()) {
        if !user.is_admin() {
            permissions::require_home_access(state, user, home_id).await?;
        }
    }

    let details = TransitionDetails { date: req.date, reason: req.reason };
    let (updated, plan) = lifecycle::apply(&state.db, id, &transition, &details).await?;

    match &transition {
        Transition::Admit { .. } => Metrics::inc(&state.metrics.residents_admitted),
        Transition::Transfer { .. } => {}
        _ if plan.release.is_some() => Metrics::inc(&state.metrics.residents_discharged),
        _ => {}
    }
    audit::record(
        state,
        AuditEvent::by(user, AuditAction::Update, "resident", format!("resident {}", transition.name()))
            .resource(id)
            .metadata(json!({ "transition": transition.name(), "plan": plan })),
    )
    .await;
    Ok(Json(json!({ "resident": updated, "transition": plan })))
}

pub async fn admit(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<TransitionRequest>,
) -> AppResult<impl IntoResponse> {
    let transition = Transition::Admit { home_id: req.home_id.clone() };
    run_transition(&state, &user, &id, transition, req).await
}

pub async fn discharge(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<TransitionRequest>,
) -> AppResult<impl IntoResponse> {
    run_transition(&state, &user, &id, Transition::Discharge, req).await
}

pub async fn mark_deceased(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<TransitionRequest>,
) -> AppResult<impl IntoResponse> {
    run_transition(&state, &user, &id, Transition::MarkDeceased, req).await
}

pub async fn transfer(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<TransitionRequest>,
) -> AppResult<impl IntoResponse> {
    let to_home_id = req.home_id.clone().ok_or_else(|| AppError::validation("home_id", "is required"))?;
    run_transition(&state, &user, &id, Transition::Transfer { to_home_id }, req).await
}

pub async fn archive(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<TransitionRequest>,
) -> AppResult<impl IntoResponse> {
    run_transition(&state, &user, &id, Transition::Archive, req).await
}

pub async fn unarchive(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<TransitionRequest>,
) -> AppResult<impl IntoResponse> {
    run_transition(&state, &user, &id, Transition::Unarchive, req).await
}
