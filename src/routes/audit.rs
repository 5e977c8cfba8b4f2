use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    audit::{self, AuditEvent, AuditFilter},
    error::{AppError, AppResult},
    export::{csv_attachment, csv_row, opt},
    middleware::{auth::CurrentUser, validation::parse_datetime},
    permissions::{self, Permission},
    scheduling::format_timestamp,
    state::AppState,
    types::{AuditAction, AuditEntry},
};

const EXPORT_MAX_ROWS: i64 = 10_000;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub user_id: Option<String>,
    pub action: Option<AuditAction>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub format: Option<String>,
}

impl AuditQuery {
    /// Normalizes the time bounds to the stored timestamp form.
    fn filter(&self) -> AppResult<AuditFilter> {
        let bound = |field: &str, v: &Option<String>| -> AppResult<Option<String>> {
            v.as_deref().map(|s| parse_datetime(field, s).map(format_timestamp)).transpose()
        };
        Ok(AuditFilter {
            user_id: self.user_id.clone(),
            action: self.action,
            resource_type: self.resource_type.clone(),
            resource_id: self.resource_id.clone(),
            from: bound("from", &self.from)?,
            to: bound("to", &self.to)?,
        })
    }
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<AuditQuery>,
) -> AppResult<Response> {
    permissions::require(&user, Permission::AuditLogsView)?;
    let filter = query.filter()?;

    match query.format.as_deref() {
        None | Some("json") => {}
        Some("csv") => {
            let entries = audit::query(&state.db, &filter, EXPORT_MAX_ROWS, 0).await?;
            audit::record(
                &state,
                AuditEvent::by(&user, AuditAction::Export, "audit_log", "audit log CSV export")
                    .metadata(json!({ "rows": entries.len() })),
            )
            .await;
            return Ok(csv_attachment("audit-logs", audit_csv(&entries)));
        }
        Some(other) => return Err(AppError::validation("format", format!("unsupported format '{}'", other))),
    }

    let limit = state.config.page_size(query.limit);
    let offset = query.offset.unwrap_or(0).max(0);
    let items = audit::query(&state.db, &filter, limit, offset).await?;
    let total = audit::count(&state.db, &filter).await?;
    Ok(Json(json!({ "items": items, "total": total, "limit": limit, "offset": offset })).into_response())
}

fn audit_csv(entries: &[AuditEntry]) -> String {
    let mut out = csv_row([
        "id",
        "created_at",
        "user_id",
        "action",
        "resource_type",
        "resource_id",
        "description",
        "ip_address",
        "metadata",
    ]);
    for e in entries {
        let metadata = e.metadata.as_ref().map(|m| m.to_string()).unwrap_or_default();
        out.push_str(&csv_row([
            e.id.as_str(),
            e.created_at.as_str(),
            opt(&e.user_id),
            e.action.as_str(),
            e.resource_type.as_str(),
            opt(&e.resource_id),
            e.description.as_str(),
            opt(&e.ip_address),
            metadata.as_str(),
        ]));
    }
    out
}
