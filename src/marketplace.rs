//! Caregiver job listings and the applications caregivers send to them.
//!
//! A listing is OPEN while it takes applications. The poster moves each
//! application through the hiring steps; accepting one hires the caregiver
//! and the listing becomes HIRED. A caregiver may withdraw an application
//! that is still in progress and apply again later.

use crate::error::AppError;
use crate::types::{ApplicationStatus, ListingStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketplaceError {
    #[error("listing is {0} and not taking applications")]
    ListingNotOpen(ListingStatus),
    #[error("cannot move a listing from {from} to {to}")]
    Listing { from: ListingStatus, to: ListingStatus },
    #[error("cannot move an application from {from} to {to}")]
    Application { from: ApplicationStatus, to: ApplicationStatus },
    #[error("an application with status {0} already exists")]
    AlreadyApplied(ApplicationStatus),
}

impl From<MarketplaceError> for AppError {
    fn from(err: MarketplaceError) -> Self {
        let details = match &err {
            MarketplaceError::ListingNotOpen(status) => serde_json::json!({ "listing_status": status }),
            MarketplaceError::Listing { from, to } => serde_json::json!({ "status": from, "requested": to }),
            MarketplaceError::Application { from, to } => serde_json::json!({ "status": from, "requested": to }),
            MarketplaceError::AlreadyApplied(status) => serde_json::json!({ "status": status }),
        };
        AppError::Conflict { message: err.to_string(), details: Some(details) }
    }
}

/// Still in the hiring pipeline.
pub fn is_in_progress(status: ApplicationStatus) -> bool {
    use ApplicationStatus::*;
    matches!(status, Applied | Invited | Interviewing | Offered)
}

/// Statuses the poster may move an application to from `current`.
pub fn review_targets(current: ApplicationStatus) -> &'static [ApplicationStatus] {
    use ApplicationStatus::*;
    match current {
        Applied => &[Invited, Interviewing, Offered, Rejected],
        Invited => &[Interviewing, Offered, Rejected],
        Interviewing => &[Offered, Rejected],
        Offered => &[Accepted, Rejected],
        Accepted | Rejected | Withdrawn => &[],
    }
}

/// Checks a poster's status change on an application.
pub fn review(current: ApplicationStatus, next: ApplicationStatus) -> Result<ApplicationStatus, MarketplaceError> {
    if review_targets(current).contains(&next) {
        Ok(next)
    } else {
        Err(MarketplaceError::Application { from: current, to: next })
    }
}

/// Statuses an application can be reviewed into `next` from, for the guarded UPDATE.
pub fn review_sources(next: ApplicationStatus) -> Vec<ApplicationStatus> {
    ApplicationStatus::ALL.iter().copied().filter(|s| review_targets(*s).contains(&next)).collect()
}

pub fn withdraw(current: ApplicationStatus) -> Result<ApplicationStatus, MarketplaceError> {
    if is_in_progress(current) {
        Ok(ApplicationStatus::Withdrawn)
    } else {
        Err(MarketplaceError::Application { from: current, to: ApplicationStatus::Withdrawn })
    }
}

/// Decides whether a caregiver may apply, given the listing and any earlier
/// application of theirs. Only a withdrawn application is reopened.
pub fn apply(listing: ListingStatus, existing: Option<ApplicationStatus>) -> Result<ApplicationStatus, MarketplaceError> {
    if listing != ListingStatus::Open {
        return Err(MarketplaceError::ListingNotOpen(listing));
    }
    match existing {
        None | Some(ApplicationStatus::Withdrawn) => Ok(ApplicationStatus::Applied),
        Some(other) => Err(MarketplaceError::AlreadyApplied(other)),
    }
}

/// Posters open and close listings by hand; HIRED is only reached by
/// accepting an application and is final.
pub fn listing_status(current: ListingStatus, next: ListingStatus) -> Result<ListingStatus, MarketplaceError> {
    use ListingStatus::*;
    match (current, next) {
        (Open, Closed) | (Closed, Open) => Ok(next),
        (a, b) if a == b && a != Hired => Ok(next),
        _ => Err(MarketplaceError::Listing { from: current, to: next }),
    }
}
