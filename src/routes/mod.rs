//! HTTP route handlers for the CareLink API.
//!
//! Every domain handler follows the same path: the [`CurrentUser`] extractor
//! authenticates, `permissions::require` checks the role, a scope check guards
//! the touched home or resident, `ValidatedJson` checks the payload, and the
//! write plus its audit entry follow.
//!
//! - `health`: liveness, readiness, metrics and version
//! - `users`: user administration and caregiver assignment
//! - `homes`: home listings, occupancy report and reconcile
//! - `residents`: resident records and lifecycle transitions
//! - `inquiries`: the lead funnel, conversion and follow-ups
//! - `tours`: tour requests and their confirmation flow
//! - `shifts`: caregiver shifts and timesheets
//! - `matching`: home recommendations
//! - `marketplace`: caregiver job listings and applications
//! - `favorites`: homes a family has saved
//! - `reviews`: family reviews of homes
//! - `audit`: audit log query and export
//!
//! [`CurrentUser`]: crate::middleware::auth::CurrentUser

pub mod audit;
pub mod favorites;
pub mod health;
pub mod homes;
pub mod inquiries;
pub mod marketplace;
pub mod matching;
pub mod residents;
pub mod reviews;
pub mod shifts;
pub mod tours;
pub mod users;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, patch, post},
    Router,
};
use sqlx::{QueryBuilder, Sqlite};

use crate::middleware::{auth::service_token_middleware, security_headers::security_headers_middleware};
use crate::state::AppState;

/// Health endpoints plus the domain API, with security headers applied.
///
/// Global concerns (body limit, request validation, global rate limit,
/// compression, tracing, CORS) are layered on by `main`.
pub fn api_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/users", post(users::create_user))
        .route("/users/me", get(users::me))
        .route("/users/{id}", get(users::get_user))
        .route("/caregivers/{id}/homes", post(users::assign_caregiver))
        .route("/homes", post(homes::create_home).get(homes::list_homes))
        .route(
            "/homes/{id}",
            get(homes::get_home).patch(homes::update_home).delete(homes::delete_home),
        )
        .route("/homes/{id}/occupancy", get(homes::occupancy))
        .route("/homes/{id}/reconcile", post(homes::reconcile))
        .route("/homes/{id}/reviews", get(reviews::list_reviews).post(reviews::create_review))
        .route("/residents", post(residents::create_resident).get(residents::list_residents))
        .route(
            "/residents/{id}",
            get(residents::get_resident)
                .patch(residents::update_resident)
                .delete(residents::delete_resident),
        )
        .route("/residents/{id}/admit", post(residents::admit))
        .route("/residents/{id}/discharge", post(residents::discharge))
        .route("/residents/{id}/deceased", post(residents::mark_deceased))
        .route("/residents/{id}/transfer", post(residents::transfer))
        .route("/residents/{id}/archive", post(residents::archive))
        .route("/residents/{id}/unarchive", post(residents::unarchive))
        .route("/inquiries", post(inquiries::create_inquiry).get(inquiries::list_inquiries))
        .route("/inquiries/{id}", get(inquiries::get_inquiry).patch(inquiries::update_inquiry))
        .route("/inquiries/{id}/convert", post(inquiries::convert_inquiry))
        .route(
            "/inquiries/{id}/follow-ups",
            post(inquiries::create_follow_up).get(inquiries::list_follow_ups),
        )
        .route(
            "/inquiries/{id}/follow-ups/{follow_up_id}/complete",
            post(inquiries::complete_follow_up),
        )
        .route("/tours", get(tours::list_tours))
        .route("/tours/request", post(tours::request_tour))
        .route("/tours/{id}", get(tours::get_tour))
        .route("/tours/{id}/confirm", post(tours::confirm_tour))
        .route("/tours/{id}/reschedule", post(tours::reschedule_tour))
        .route("/tours/{id}/cancel", post(tours::cancel_tour))
        .route("/tours/{id}/complete", post(tours::complete_tour))
        .route("/shifts", post(shifts::create_shift).get(shifts::list_shifts))
        .route("/shifts/{id}", get(shifts::get_shift))
        .route("/shifts/{id}/accept", post(shifts::accept_shift))
        .route("/shifts/{id}/complete", post(shifts::complete_shift))
        .route("/shifts/{id}/cancel", post(shifts::cancel_shift))
        .route("/shifts/{id}/timesheet", post(shifts::submit_timesheet))
        .route("/timesheets/{id}/approve", post(shifts::approve_timesheet))
        .route("/timesheets/{id}/reject", post(shifts::reject_timesheet))
        .route("/matching/homes", post(matching::recommend_homes))
        .route(
            "/marketplace/listings",
            post(marketplace::create_listing).get(marketplace::list_listings),
        )
        .route(
            "/marketplace/listings/{id}",
            get(marketplace::get_listing).patch(marketplace::update_listing),
        )
        .route(
            "/marketplace/listings/{id}/applications",
            post(marketplace::apply_to_listing)
                .get(marketplace::list_applications)
                .delete(marketplace::withdraw_application),
        )
        .route("/marketplace/applications/{id}", patch(marketplace::review_application))
        .route("/favorites", get(favorites::list_favorites).post(favorites::add_favorite))
        .route("/favorites/{home_id}", delete(favorites::remove_favorite))
        .route("/audit-logs", get(audit::list_audit_logs))
        .route_layer(from_fn_with_state(state.clone(), service_token_middleware));

    let cfg_arc = state.config.clone();
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .route("/metrics/prometheus", get(health::metrics_prometheus))
        .route("/version", get(health::version))
        .merge(api)
        .with_state(state)
        .layer(from_fn_with_state(cfg_arc, security_headers_middleware))
}

/// Appends ` AND <column> IN (...)`. An empty id list matches nothing.
pub(crate) fn push_in(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, ids: &[String]) {
    if ids.is_empty() {
        qb.push(" AND 1=0");
        return;
    }
    qb.push(" AND ").push(column).push(" IN (");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id.clone());
    }
    separated.push_unseparated(")");
}

/// `%term%` for a LIKE filter, or `None` for a blank term.
pub(crate) fn like_pattern(term: Option<&str>) -> Option<String> {
    term.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| format!("%{}%", t.replace('%', "").replace('_', "")))
}
