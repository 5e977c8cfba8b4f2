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
    family::{self, split_name, FamilyContact},
    inquiry::{self, load_inquiry, ConvertRequest},
    metrics::Metrics,
    middleware::{
        auth::CurrentUser,
        ip::ClientIp,
        validation::{
            parse_datetime, require_max_len, require_non_empty, require_range, validate_email, validate_id, Validate,
            ValidatedJson,
        },
    },
    permissions::{self, Permission, Scope},
    scheduling::format_timestamp,
    state::AppState,
    types::{now_utc, AuditAction, ContactMethod, FollowUp, FollowUpStatus, HomeStatus, Inquiry, InquiryStatus, Role, Urgency},
};

/// Who may see an inquiry: admins and staff all, families their own,
/// providers the ones assigned to them, everyone else by home scope.
async fn require_inquiry_access(state: &AppState, user: &CurrentUser, inquiry: &Inquiry) -> AppResult<()> {
    let allowed = match user.role {
        Role::Admin | Role::Staff => true,
        Role::Family => user.family_id.as_deref() == Some(inquiry.family_id.as_str()),
        Role::Provider => inquiry.assigned_to_id.as_deref() == Some(user.id.as_str()),
        _ => {
            permissions::require_home_access(state, user, &inquiry.home_id).await?;
            true
        }
    };
    if !allowed {
        permissions::record_denial(state, user, "inquiry", &inquiry.id).await;
        return Err(AppError::Forbidden("inquiry is outside your scope".to_string()));
    }
    Ok(())
}

async fn load_accessible(state: &AppState, user: &CurrentUser, id: &str) -> AppResult<Inquiry> {
    validate_id("id", id)?;
    let inquiry = load_inquiry(&state.db, id).await?;
    require_inquiry_access(state, user, &inquiry).await?;
    Ok(inquiry)
}

#[derive(Debug, Deserialize)]
pub struct CreateInquiryRequest {
    pub home_id: String,
    /// Affiliates and admins file on behalf of a family; families use their own.
    pub family_id: Option<String>,
    pub contact_name: String,
    pub contact_email: String,
    pub contact_phone: Option<String>,
    pub care_recipient_name: Option<String>,
    pub care_recipient_age: Option<i64>,
    #[serde(default)]
    pub care_needs: Vec<String>,
    pub additional_info: Option<String>,
    pub urgency: Option<Urgency>,
    pub preferred_contact_method: Option<ContactMethod>,
}

impl Validate for CreateInquiryRequest {
    fn validate(&self) -> AppResult<()> {
        validate_id("home_id", &self.home_id)?;
        if let Some(id) = &self.family_id {
            validate_id("family_id", id)?;
        }
        require_non_empty("contact_name", &self.contact_name)?;
        require_max_len("contact_name", &self.contact_name, 200)?;
        validate_email("contact_email", &self.contact_email)?;
        if let Some(age) = self.care_recipient_age {
            require_range("care_recipient_age", age, 0, 130)?;
        }
        if let Some(info) = &self.additional_info {
            require_max_len("additional_info", info, 5000)?;
        }
        Ok(())
    }
}

pub async fn create_inquiry(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    user: CurrentUser,
    ValidatedJson(req): ValidatedJson<CreateInquiryRequest>,
) -> AppResult<impl IntoResponse> {
    state.rate_limiter.check_endpoint_limit("/inquiries", ip).await?;
    permissions::require(&user, Permission::InquiriesCreate)?;

    let family_id = match user.role {
        Role::Family => {
            let own = user
                .family_id
                .clone()
                .ok_or_else(|| AppError::Forbidden("family profile missing".to_string()))?;
            if req.family_id.as_deref().is_some_and(|f| f != own) {
                return Err(AppError::Forbidden("families file inquiries for themselves only".to_string()));
            }
            Some(own)
        }
        _ => req.family_id.clone(),
    };

    let home = load_home(&state.db, &req.home_id).await?;
    if home.status != HomeStatus::Active {
        return Err(AppError::Conflict {
            message: "home is not accepting inquiries".to_string(),
            details: Some(json!({ "home_id": home.id, "home_status": home.status })),
        });
    }

    let mut tx = state.db.begin().await?;
    let (first_name, last_name) = split_name(&req.contact_name);
    let family_id = family::resolve_or_create(
        &mut tx,
        family_id.as_deref(),
        &FamilyContact {
            email: Some(req.contact_email.clone()),
            first_name,
            last_name,
            phone: req.contact_phone.clone(),
        },
    )
    .await?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = now_utc();
    let care_needs: Vec<String> =
        req.care_needs.iter().map(|c| c.trim().to_string()).filter(|c| !c.is_empty()).collect();
    sqlx::query(
        "INSERT INTO inquiries (id, family_id, home_id, status, urgency, contact_name, contact_email, contact_phone, \
         care_recipient_name, care_recipient_age, care_needs, additional_info, preferred_contact_method, created_at, \
         updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
    )
    .bind(&id)
    .bind(&family_id)
    .bind(&home.id)
    .bind(InquiryStatus::New.as_str())
    .bind(req.urgency.unwrap_or(Urgency::Medium).as_str())
    .bind(req.contact_name.trim())
    .bind(req.contact_email.trim().to_lowercase())
    .bind(&req.contact_phone)
    .bind(&req.care_recipient_name)
    .bind(req.care_recipient_age)
    .bind(serde_json::to_string(&care_needs)?)
    .bind(&req.additional_info)
    .bind(req.preferred_contact_method.unwrap_or(ContactMethod::Any).as_str())
    .bind(&now)
    .execute(&mut *tx)
    .await?;
    let inquiry = load_inquiry(&mut *tx, &id).await?;
    tx.commit().await?;

    Metrics::inc(&state.metrics.inquiries_created);
    tracing::info!(inquiry_id = %inquiry.id, home_id = %inquiry.home_id, family_id = %inquiry.family_id, "inquiry created");
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Create, "inquiry", "inquiry created")
            .resource(&inquiry.id)
            .metadata(json!({ "home_id": inquiry.home_id, "urgency": inquiry.urgency })),
    )
    .await;
    Ok((StatusCode::CREATED, Json(inquiry)))
}

#[derive(Debug, Deserialize)]
pub struct InquiryQuery {
    pub status: Option<InquiryStatus>,
    pub urgency: Option<Urgency>,
    pub home_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_inquiries(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<InquiryQuery>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::InquiriesView)?;
    let limit = state.config.page_size(query.limit);
    let offset = query.offset.unwrap_or(0).max(0);

    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {} FROM inquiries WHERE 1=1", Inquiry::COLUMNS));
    match user.role {
        Role::Admin | Role::Staff => {}
        Role::Family => {
            qb.push(" AND family_id = ").push_bind(user.family_id.clone().unwrap_or_default());
        }
        Role::Provider => {
            qb.push(" AND assigned_to_id = ").push_bind(user.id.clone());
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
    if let Some(urgency) = query.urgency {
        qb.push(" AND urgency = ").push_bind(urgency.as_str());
    }
    if let Some(home_id) = &query.home_id {
        qb.push(" AND home_id = ").push_bind(home_id.clone());
    }
    qb.push(" ORDER BY created_at DESC, id DESC LIMIT ").push_bind(limit).push(" OFFSET ").push_bind(offset);

    let rows = qb.build().fetch_all(&state.db).await?;
    let items = rows.iter().map(Inquiry::from_row).collect::<AppResult<Vec<_>>>()?;
    Ok(Json(json!({ "items": items, "limit": limit, "offset": offset })))
}

pub async fn get_inquiry(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::InquiriesView)?;
    Ok(Json(load_accessible(&state, &user, &id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateInquiryRequest {
    pub status: Option<InquiryStatus>,
    pub urgency: Option<Urgency>,
    pub assigned_to_id: Option<String>,
    pub internal_notes: Option<String>,
    pub tour_date: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub care_recipient_name: Option<String>,
    pub care_recipient_age: Option<i64>,
    pub care_needs: Option<Vec<String>>,
    pub additional_info: Option<String>,
    pub preferred_contact_method: Option<ContactMethod>,
}

impl Validate for UpdateInquiryRequest {
    fn validate(&self) -> AppResult<()> {
        if let Some(id) = &self.assigned_to_id {
            validate_id("assigned_to_id", id)?;
        }
        if let Some(d) = &self.tour_date {
            parse_datetime("tour_date", d)?;
        }
        if let Some(name) = &self.contact_name {
            require_non_empty("contact_name", name)?;
        }
        if let Some(email) = &self.contact_email {
            validate_email("contact_email", email)?;
        }
        if let Some(age) = self.care_recipient_age {
            require_range("care_recipient_age", age, 0, 130)?;
        }
        if let Some(notes) = &self.internal_notes {
            require_max_len("internal_notes", notes, 5000)?;
        }
        Ok(())
    }
}

pub async fn update_inquiry(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<UpdateInquiryRequest>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::InquiriesUpdate)?;
    let current = load_accessible(&state, &user, &id).await?;
    inquiry::check_update(current.status, req.status)?;

    if let Some(assignee) = &req.assigned_to_id {
        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE id = ?1")
            .bind(assignee)
            .fetch_optional(&state.db)
            .await?;
        exists.ok_or_not_found("assignee")?;
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE inquiries SET updated_at = ");
    qb.push_bind(now_utc());
    let mut changed: Vec<&str> = Vec::new();
    let fields: [(&str, Option<String>); 11] = [
        ("status", req.status.map(|s| s.as_str().to_string())),
        ("urgency", req.urgency.map(|u| u.as_str().to_string())),
        ("assigned_to_id", req.assigned_to_id.clone()),
        ("internal_notes", req.internal_notes.clone()),
        (
            "tour_date",
            req.tour_date.as_deref().map(|d| parse_datetime("tour_date", d).map(format_timestamp)).transpose()?,
        ),
        ("contact_name", req.contact_name.as_deref().map(|s| s.trim().to_string())),
        ("contact_email", req.contact_email.as_deref().map(|s| s.trim().to_lowercase())),
        ("contact_phone", req.contact_phone.clone()),
        ("care_recipient_name", req.care_recipient_name.clone()),
        ("additional_info", req.additional_info.clone()),
        ("preferred_contact_method", req.preferred_contact_method.map(|m| m.as_str().to_string())),
    ];
    for (column, value) in fields {
        if let Some(value) = value {
            qb.push(", ").push(column).push(" = ").push_bind(value);
            changed.push(column);
        }
    }
    if let Some(age) = req.care_recipient_age {
        qb.push(", care_recipient_age = ").push_bind(age);
        changed.push("care_recipient_age");
    }
    if let Some(needs) = &req.care_needs {
        qb.push(", care_needs = ").push_bind(serde_json::to_string(needs)?);
        changed.push("care_needs");
    }
    // The status guard keeps a concurrent conversion from being overwritten.
    qb.push(" WHERE id = ")
        .push_bind(current.id.clone())
        .push(" AND status != ")
        .push_bind(InquiryStatus::Converted.as_str());
    let res = qb.build().execute(&state.db).await?;
    if res.rows_affected() == 0 {
        return Err(inquiry::FunnelError::Converted.into());
    }

    let updated = load_inquiry(&state.db, &id).await?;
    if updated.status != current.status {
        tracing::info!(inquiry_id = %id, from = %current.status, to = %updated.status, "inquiry status changed");
    }
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Update, "inquiry", "inquiry updated")
            .resource(&id)
            .metadata(json!({ "fields": changed, "previous_status": current.status, "status": updated.status })),
    )
    .await;
    Ok(Json(updated))
}

pub async fn convert_inquiry(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<ConvertRequest>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::InquiriesConvert)?;
    validate_id("id", &id)?;
    let current = load_inquiry(&state.db, &id).await?;
    permissions::require_home_access(&state, &user, &current.home_id).await?;

    let (inquiry, resident) = inquiry::convert(&state.db, &id, &user.id, &req).await?;
    Metrics::inc(&state.metrics.inquiries_converted);
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Update, "inquiry", "inquiry converted")
            .resource(&inquiry.id)
            .metadata(json!({ "previous_status": current.status, "resident_id": resident.id })),
    )
    .await;
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Create, "resident", "resident created from inquiry")
            .resource(&resident.id)
            .metadata(json!({ "inquiry_id": inquiry.id, "status": resident.status })),
    )
    .await;
    Ok((StatusCode::CREATED, Json(json!({ "inquiry": inquiry, "resident": resident }))))
}

async fn load_follow_up(db: impl sqlx::SqliteExecutor<'_>, inquiry_id: &str, id: &str) -> AppResult<FollowUp> {
    let row = sqlx::query(
        "SELECT id, inquiry_id, kind, subject, scheduled_for, status, completed_at, completed_by, created_at \
         FROM inquiry_follow_ups WHERE id = ?1 AND inquiry_id = ?2",
    )
    .bind(id)
    .bind(inquiry_id)
    .fetch_optional(db)
    .await?
    .ok_or_not_found("follow-up")?;
    FollowUp::from_row(&row)
}

#[derive(Debug, Deserialize)]
pub struct CreateFollowUpRequest {
    pub scheduled_for: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub subject: String,
}

impl Validate for CreateFollowUpRequest {
    fn validate(&self) -> AppResult<()> {
        parse_datetime("scheduled_for", &self.scheduled_for)?;
        require_non_empty("type", &self.kind)?;
        require_max_len("type", &self.kind, 50)?;
        require_non_empty("subject", &self.subject)?;
        require_max_len("subject", &self.subject, 200)
    }
}

pub async fn create_follow_up(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<CreateFollowUpRequest>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::InquiriesUpdate)?;
    let inquiry = load_accessible(&state, &user, &id).await?;

    let follow_up_id = uuid::Uuid::new_v4().to_string();
    let scheduled_for = format_timestamp(parse_datetime("scheduled_for", &req.scheduled_for)?);
    sqlx::query(
        "INSERT INTO inquiry_follow_ups (id, inquiry_id, kind, subject, scheduled_for, status) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(&follow_up_id)
    .bind(&inquiry.id)
    .bind(req.kind.trim().to_uppercase())
    .bind(req.subject.trim())
    .bind(&scheduled_for)
    .bind(FollowUpStatus::Pending.as_str())
    .execute(&state.db)
    .await?;

    let follow_up = load_follow_up(&state.db, &inquiry.id, &follow_up_id).await?;
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Create, "inquiry_follow_up", "follow-up scheduled")
            .resource(&follow_up.id)
            .metadata(json!({ "inquiry_id": inquiry.id, "scheduled_for": scheduled_for })),
    )
    .await;
    Ok((StatusCode::CREATED, Json(follow_up)))
}

pub async fn list_follow_ups(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::InquiriesView)?;
    let inquiry = load_accessible(&state, &user, &id).await?;
    let rows = sqlx::query(
        "SELECT id, inquiry_id, kind, subject, scheduled_for, status, completed_at, completed_by, created_at \
         FROM inquiry_follow_ups WHERE inquiry_id = ?1 ORDER BY scheduled_for ASC, id ASC",
    )
    .bind(&inquiry.id)
    .fetch_all(&state.db)
    .await?;
    let items = rows.iter().map(FollowUp::from_row).collect::<AppResult<Vec<_>>>()?;
    Ok(Json(json!({ "items": items })))
}

pub async fn complete_follow_up(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((id, follow_up_id)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    permissions::require(&user, Permission::InquiriesUpdate)?;
    let inquiry = load_accessible(&state, &user, &id).await?;
    validate_id("follow_up_id", &follow_up_id)?;

    let res = sqlx::query(
        "UPDATE inquiry_follow_ups SET status = ?3, completed_at = ?4, completed_by = ?5 \
         WHERE id = ?1 AND inquiry_id = ?2 AND status = ?6",
    )
    .bind(&follow_up_id)
    .bind(&inquiry.id)
    .bind(FollowUpStatus::Completed.as_str())
    .bind(now_utc())
    .bind(&user.id)
    .bind(FollowUpStatus::Pending.as_str())
    .execute(&state.db)
    .await?;
    if res.rows_affected() == 0 {
        let existing = load_follow_up(&state.db, &inquiry.id, &follow_up_id).await?;
        return Err(AppError::Conflict {
            message: format!("follow-up is already {}", existing.status),
            details: Some(json!({ "status": existing.status })),
        });
    }

    let follow_up = load_follow_up(&state.db, &inquiry.id, &follow_up_id).await?;
    audit::record(
        &state,
        AuditEvent::by(&user, AuditAction::Update, "inquiry_follow_up", "follow-up completed")
            .resource(&follow_up.id)
            .metadata(json!({ "inquiry_id": inquiry.id })),
    )
    .await;
    Ok(Json(follow_up))
}
