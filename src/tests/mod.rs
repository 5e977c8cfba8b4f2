//! Integration and unit tests for the CareLink API.
//!
//! API tests drive the full router with `tower::ServiceExt::oneshot` against a
//! fresh SQLite file per test; the fixtures live in [`support`].
//!
//! ## Test Modules
//!
//! - **api_tests**: identity, service token, users, homes and caregiver assignment
//! - **lifecycle_api_tests**: resident transitions and the occupancy invariant
//! - **inquiry_api_tests**: the lead funnel, conversion and follow-ups
//! - **scheduling_api_tests**: tours, shifts and timesheets
//! - **matching_api_tests**: home recommendations
//! - **marketplace_api_tests**: caregiver listings and applications
//! - **favorites_reviews_api_tests**: saved homes and home reviews
//! - **audit_api_tests**: audit log query, export and retention
//! - **health_api_tests**: health, readiness and metrics endpoints
//! - **error_tests**: error rendering
//! - **config_tests**: configuration loading and validation
//! - **db_tests**: schema and bootstrap admin
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test
//! cargo test lifecycle_api_tests
//! ```

pub mod support;

pub mod api_tests;
pub mod db_tests;
pub mod inquiry_api_tests;
pub mod marketplace_api_tests;
pub mod matching_api_tests;
