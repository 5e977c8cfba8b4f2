//! Append-only audit trail.
//!
//! Recording is best effort: a failed insert is logged and counted, never
//! surfaced to the request that triggered it.

use serde::Deserialize;
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::time::Duration;

use crate::error::AppResult;
use crate::metrics::Metrics;
use crate::middleware::auth::CurrentUser;
use crate::state::AppState;
use crate::types::{AuditAction, AuditEntry};

const SENSITIVE_KEYS: &[&str] = &[
    "password", "token", "secret", "key", "auth", "credential", "ssn", "social", "credit", "card", "cvv", "pin",
    "passphrase",
];

pub const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub user_id: Option<String>,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub description: String,
    pub metadata: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, resource_type: &str, description: impl Into<String>) -> Self {
        Self {
            user_id: None,
            action,
            resource_type: resource_type.to_string(),
            resource_id: None,
            description: description.into(),
            metadata: None,
            ip_address: None,
            user_agent: None,
        }
    }

    /// An event attributed to `user`, carrying their IP and user agent.
    pub fn by(user: &CurrentUser, action: AuditAction, resource_type: &str, description: impl Into<String>) -> Self {
        let mut event = Self::new(action, resource_type, description);
        event.user_id = Some(user.id.clone());
        event.ip_address = user.ip.clone();
        event.user_agent = user.user_agent.clone();
        event
    }

    pub fn user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn resource(mut self, resource_id: &str) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|s| key.contains(s))
}

/// Replaces the value of every sensitive-looking key, at any depth.
pub fn sanitize_metadata(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    if is_sensitive_key(&k) {
                        (k, Value::String(REDACTED.to_string()))
                    } else {
                        (k, sanitize_metadata(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_metadata).collect()),
        other => other,
    }
}

/// Writes one audit entry. Never fails.
pub async fn record(state: &AppState, event: AuditEvent) {
    if !state.config.audit.enabled {
        return;
    }
    match insert(&state.db, event).await {
        Ok(()) => Metrics::inc(&state.metrics.audit_events),
        Err(e) => {
            Metrics::inc(&state.metrics.audit_failures);
            tracing::warn!("failed to write audit entry: {}", e);
        }
    }
}

async fn insert(db: &SqlitePool, event: AuditEvent) -> Result<(), sqlx::Error> {
    let metadata = event.metadata.map(sanitize_metadata).map(|m| m.to_string());
    sqlx::query(
        "INSERT INTO audit_logs (id, user_id, action, resource_type, resource_id, description, metadata, ip_address, user_agent) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(event.user_id)
    .bind(event.action.as_str())
    .bind(event.resource_type)
    .bind(event.resource_id)
    .bind(event.description)
    .bind(metadata)
    .bind(event.ip_address)
    .bind(event.user_agent)
    .execute(db)
    .await?;
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub user_id: Option<String>,
    pub action: Option<AuditAction>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    /// Inclusive lower bound, RFC 3339.
    pub from: Option<String>,
    /// Exclusive upper bound, RFC 3339.
    pub to: Option<String>,
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &AuditFilter) {
    qb.push(" WHERE 1=1");
    if let Some(v) = &filter.user_id {
        qb.push(" AND user_id = ").push_bind(v.clone());
    }
    if let Some(v) = &filter.action {
        qb.push(" AND action = ").push_bind(v.as_str());
    }
    if let Some(v) = &filter.resource_type {
        qb.push(" AND resource_type = ").push_bind(v.clone());
    }
    if let Some(v) = &filter.resource_id {
        qb.push(" AND resource_id = ").push_bind(v.clone());
    }
    if let Some(v) = &filter.from {
        qb.push(" AND created_at >= ").push_bind(v.clone());
    }
    if let Some(v) = &filter.to {
        qb.push(" AND created_at < ").push_bind(v.clone());
    }
}

/// Newest first.
pub async fn query(db: &SqlitePool, filter: &AuditFilter, limit: i64, offset: i64) -> AppResult<Vec<AuditEntry>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT id, user_id, action, resource_type, resource_id, description, metadata, ip_address, user_agent, created_at FROM audit_logs",
    );
    push_filters(&mut qb, filter);
    qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let rows = qb.build().fetch_all(db).await?;
    rows.iter().map(AuditEntry::from_row).collect()
}

pub async fn count(db: &SqlitePool, filter: &AuditFilter) -> AppResult<i64> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM audit_logs");
    push_filters(&mut qb, filter);
    Ok(qb.build_query_scalar::<i64>().fetch_one(db).await?)
}

/// Deletes entries older than `retention_days`; returns how many went.
pub async fn purge_older_than(db: &SqlitePool, retention_days: u32) -> AppResult<u64> {
    let cutoff = (chrono::Utc::now() - chrono::Duration::days(retention_days as i64))
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string();
    let res = sqlx::query("DELETE FROM audit_logs WHERE created_at < ?1")
        .bind(cutoff)
        .execute(db)
        .await?;
    Ok(res.rows_affected())
}

/// Background retention loop; runs until the process exits.
pub async fn retention_task(db: SqlitePool, retention_days: u32, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        match purge_older_than(&db, retention_days).await {
            Ok(0) => tracing::debug!("audit retention: nothing to purge"),
            Ok(n) => tracing::info!(purged = n, retention_days, "audit retention purge"),
            Err(e) => tracing::warn!("audit retention purge failed: {}", e),
        }
    }
}
