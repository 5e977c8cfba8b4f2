//! Role based permissions and per-user data scope.
//!
//! A request passes two gates: the caller's role must hold the permission for
//! the operation, and the touched home or resident must lie inside the scope
//! resolved for that caller.

use sqlx::SqlitePool;

use crate::audit::{self, AuditEvent};
use crate::error::{AppError, AppResult};
use crate::middleware::auth::CurrentUser;
use crate::state::AppState;
use crate::types::{AuditAction, Resident, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ResidentsView,
    ResidentsCreate,
    ResidentsUpdate,
    ResidentsDelete,
    HomesView,
    HomesCreate,
    HomesUpdate,
    HomesDelete,
    CaregiversView,
    CaregiversCreate,
    CaregiversUpdate,
    CaregiversAssign,
    InquiriesView,
    InquiriesCreate,
    InquiriesUpdate,
    InquiriesConvert,
    ToursRequest,
    ToursView,
    ToursConfirm,
    ToursReschedule,
    ToursCancel,
    ShiftsManage,
    ShiftsWork,
    TimesheetsApprove,
    ListingsView,
    ListingsManage,
    ListingsApply,
    FavoritesManage,
    ReviewsCreate,
    UsersCreate,
    UsersView,
    AuditLogsView,
    ReportsExport,
}

impl Permission {
    pub const ALL: &'static [Permission] = &[
        Permission::ResidentsView,
        Permission::ResidentsCreate,
        Permission::ResidentsUpdate,
        Permission::ResidentsDelete,
        Permission::HomesView,
        Permission::HomesCreate,
        Permission::HomesUpdate,
        Permission::HomesDelete,
        Permission::CaregiversView,
        Permission::CaregiversCreate,
        Permission::CaregiversUpdate,
        Permission::CaregiversAssign,
        Permission::InquiriesView,
        Permission::InquiriesCreate,
        Permission::InquiriesUpdate,
        Permission::InquiriesConvert,
        Permission::ToursRequest,
        Permission::ToursView,
        Permission::ToursConfirm,
        Permission::ToursReschedule,
        Permission::ToursCancel,
        Permission::ShiftsManage,
        Permission::ShiftsWork,
        Permission::TimesheetsApprove,
        Permission::ListingsView,
        Permission::ListingsManage,
        Permission::ListingsApply,
        Permission::FavoritesManage,
        Permission::ReviewsCreate,
        Permission::UsersCreate,
        Permission::UsersView,
        Permission::AuditLogsView,
        Permission::ReportsExport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ResidentsView => "residents.view",
            Permission::ResidentsCreate => "residents.create",
            Permission::ResidentsUpdate => "residents.update",
            Permission::ResidentsDelete => "residents.delete",
            Permission::HomesView => "homes.view",
            Permission::HomesCreate => "homes.create",
            Permission::HomesUpdate => "homes.update",
            Permission::HomesDelete => "homes.delete",
            Permission::CaregiversView => "caregivers.view",
            Permission::CaregiversCreate => "caregivers.create",
            Permission::CaregiversUpdate => "caregivers.update",
            Permission::CaregiversAssign => "caregivers.assign",
            Permission::InquiriesView => "inquiries.view",
            Permission::InquiriesCreate => "inquiries.create",
            Permission::InquiriesUpdate => "inquiries.update",
            Permission::InquiriesConvert => "inquiries.convert",
            Permission::ToursRequest => "tours.request",
            Permission::ToursView => "tours.view",
            Permission::ToursConfirm => "tours.confirm",
            Permission::ToursReschedule => "tours.reschedule",
            Permission::ToursCancel => "tours.cancel",
            Permission::ShiftsManage => "shifts.manage",
            Permission::ShiftsWork => "shifts.work",
            Permission::TimesheetsApprove => "timesheets.approve",
            Permission::ListingsView => "listings.view",
            Permission::ListingsManage => "listings.manage",
            Permission::ListingsApply => "listings.apply",
            Permission::FavoritesManage => "favorites.manage",
            Permission::ReviewsCreate => "reviews.create",
            Permission::UsersCreate => "users.create",
            Permission::UsersView => "users.view",
            Permission::AuditLogsView => "audit_logs.view",
            Permission::ReportsExport => "reports.export",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed role to permission table.
pub fn role_permissions(role: Role) -> &'static [Permission] {
    use Permission::*;
    match role {
        Role::Admin => Permission::ALL,
        Role::Operator => &[
            ResidentsView,
            ResidentsCreate,
            ResidentsUpdate,
            ResidentsDelete,
            HomesView,
            HomesCreate,
            HomesUpdate,
            CaregiversView,
            CaregiversCreate,
            CaregiversUpdate,
            CaregiversAssign,
            InquiriesView,
            InquiriesUpdate,
            InquiriesConvert,
            ToursView,
            ToursConfirm,
            ToursReschedule,
            ToursCancel,
            ShiftsManage,
            TimesheetsApprove,
            ListingsView,
            ListingsManage,
            ReportsExport,
        ],
        Role::Caregiver => &[ResidentsView, HomesView, ShiftsWork, ListingsView, ListingsApply],
        Role::Family => &[
            ResidentsView,
            HomesView,
            InquiriesView,
            InquiriesCreate,
            ToursRequest,
            ToursView,
            ToursReschedule,
            ToursCancel,
            ListingsView,
            ListingsManage,
            FavoritesManage,
            ReviewsCreate,
        ],
        Role::Staff => &[ResidentsView, HomesView, CaregiversView, InquiriesView, ListingsView],
        Role::Affiliate => &[HomesView, InquiriesCreate],
        Role::Provider => &[InquiriesView, InquiriesUpdate],
    }
}

pub fn has_permission(role: Role, permission: Permission) -> bool {
    role_permissions(role).contains(&permission)
}

/// Fails with 403 when the caller's role lacks `permission`.
pub fn require(user: &CurrentUser, permission: Permission) -> AppResult<()> {
    if has_permission(user.role, permission) {
        Ok(())
    } else {
        tracing::debug!(user_id = %user.id, role = %user.role, %permission, "permission denied");
        Err(AppError::Forbidden(format!("missing permission {}", permission)))
    }
}

/// Which records a caller may touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    /// Home ids the caller operates or is assigned to.
    Homes(Vec<String>),
    /// Resident ids of the caller's family.
    Residents(Vec<String>),
    None,
}

impl Scope {
    pub fn is_all(&self) -> bool {
        matches!(self, Scope::All)
    }

    /// Home ids, if the scope is home based.
    pub fn home_ids(&self) -> Option<&[String]> {
        match self {
            Scope::Homes(ids) => Some(ids),
            _ => None,
        }
    }

    /// Short description for `GET /users/me`.
    pub fn summary(&self) -> serde_json::Value {
        match self {
            Scope::All => serde_json::json!({ "kind": "all" }),
            Scope::Homes(ids) => serde_json::json!({ "kind": "homes", "home_ids": ids }),
            Scope::Residents(ids) => serde_json::json!({ "kind": "residents", "resident_ids": ids }),
            Scope::None => serde_json::json!({ "kind": "none" }),
        }
    }
}

pub async fn resolve_scope(db: &SqlitePool, user: &CurrentUser) -> AppResult<Scope> {
    let scope = match user.role {
        Role::Admin | Role::Staff => Scope::All,
        Role::Operator => match &user.operator_id {
            Some(operator_id) => {
                let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM homes WHERE operator_id = ?1 ORDER BY id")
                    .bind(operator_id)
                    .fetch_all(db)
                    .await?;
                Scope::Homes(ids)
            }
            None => Scope::None,
        },
        Role::Caregiver => match &user.caregiver_id {
            Some(caregiver_id) => {
                let ids: Vec<String> = sqlx::query_scalar(
                    "SELECT home_id FROM caregiver_homes WHERE caregiver_id = ?1 ORDER BY home_id",
                )
                .bind(caregiver_id)
                .fetch_all(db)
                .await?;
                Scope::Homes(ids)
            }
            None => Scope::None,
        },
        Role::Family => match &user.family_id {
            Some(family_id) => {
                let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM residents WHERE family_id = ?1 ORDER BY id")
                    .bind(family_id)
                    .fetch_all(db)
                    .await?;
                Scope::Residents(ids)
            }
            None => Scope::None,
        },
        Role::Affiliate | Role::Provider => Scope::None,
    };
    Ok(scope)
}

pub fn can_access_home(scope: &Scope, home_id: &str) -> bool {
    match scope {
        Scope::All => true,
        Scope::Homes(ids) => ids.iter().any(|id| id == home_id),
        Scope::Residents(_) | Scope::None => false,
    }
}

pub fn can_access_resident(scope: &Scope, resident: &Resident) -> bool {
    match scope {
        Scope::All => true,
        Scope::Homes(ids) => resident
            .home_id
            .as_deref()
            .map(|h| ids.iter().any(|id| id == h))
            .unwrap_or(false),
        Scope::Residents(ids) => ids.iter().any(|id| id == &resident.id),
        Scope::None => false,
    }
}

/// Resolves the caller's scope and fails with 403 when `home_id` is outside it.
/// Denials are written to the audit log.
pub async fn require_home_access(state: &AppState, user: &CurrentUser, home_id: &str) -> AppResult<Scope> {
    let scope = resolve_scope(&state.db, user).await?;
    if can_access_home(&scope, home_id) {
        return Ok(scope);
    }
    record_denial(state, user, "home", home_id).await;
    Err(AppError::Forbidden("home is outside your scope".to_string()))
}

pub async fn require_resident_access(state: &AppState, user: &CurrentUser, resident: &Resident) -> AppResult<Scope> {
    let scope = resolve_scope(&state.db, user).await?;
    if can_access_resident(&scope, resident) {
        return Ok(scope);
    }
    record_denial(state, user, "resident", &resident.id).await;
    Err(AppError::Forbidden("resident is outside your scope".to_string()))
}

/// Logs and audits a scope denial.
pub async fn record_denial(state: &AppState, user: &CurrentUser, resource_type: &str, resource_id: &str) {
    tracing::warn!(user_id = %user.id, resource_type, resource_id, "access denied");
    audit::record(
        state,
        AuditEvent::new(AuditAction::AccessDenied, resource_type, "access denied by scope")
            .user(&user.id)
            .resource(resource_id),
    )
    .await;
}
