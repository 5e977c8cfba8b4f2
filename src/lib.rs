//! # CareLink Backend Library
//!
//! Core library for CareLink, a multi-tenant marketplace API for assisted
//! living: operators list homes, families inquire and book tours, residents
//! move through admission and discharge, and caregivers pick up shifts.
//!
//! ## Architecture
//!
//! - **Axum**: HTTP server and routing
//! - **SQLx**: asynchronous SQLite access; every multi-row write runs in a transaction
//! - **Tokio**: async runtime and background tasks
//! - **Serde**: JSON request and response bodies
//!
//! ## Core Components
//!
//! - [`config`]: layered configuration (embedded defaults, file, environment)
//! - [`db`]: schema creation and the bootstrap admin
//! - [`error`]: the API error type and its JSON rendering
//! - [`permissions`]: role permissions and data scopes
//! - [`lifecycle`]: resident transitions and home occupancy
//! - [`inquiry`]: the lead funnel and inquiry conversion
//! - [`family`]: family profile lookup and placeholder creation
//! - [`scheduling`]: tour and shift status rules, timesheet pay
//! - [`matching`]: rule and embedding based home scoring
//! - [`marketplace`]: caregiver listing and application status rules
//! - [`audit`]: audit trail recording, querying and retention
//! - [`export`]: CSV rendering
//! - [`metrics`]: business counters
//! - [`middleware`]: identity, rate limiting, validation, security headers
//! - [`routes`]: HTTP handlers
//! - [`state`]: shared application state
//! - [`types`]: records and enums shared across modules

pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod family;
pub mod inquiry;
pub mod lifecycle;
pub mod marketplace;
pub mod matching;
pub mod metrics;
pub mod middleware;
pub mod permissions;
pub mod routes;
pub mod scheduling;
pub mod state;
pub mod types;

#[cfg(test)]
mod tests;
