//! Tour and shift status rules, and timesheet pay.
//!
//! The handlers ask these functions which status an action leads to before
//! issuing a conditional UPDATE guarded by the current status.

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::types::{ShiftStatus, TimesheetStatus, TourStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TourAction {
    Confirm,
    Reschedule,
    Cancel,
    Complete { no_show: bool },
}

impl TourAction {
    pub fn name(&self) -> &'static str {
        match self {
            TourAction::Confirm => "confirm",
            TourAction::Reschedule => "reschedule",
            TourAction::Cancel => "cancel",
            TourAction::Complete { .. } => "complete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftAction {
    Accept,
    Complete,
    Cancel,
}

impl ShiftAction {
    pub fn name(&self) -> &'static str {
        match self {
            ShiftAction::Accept => "accept",
            ShiftAction::Complete => "complete",
            ShiftAction::Cancel => "cancel",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("cannot {action} a tour with status {status}")]
    Tour { action: &'static str, status: TourStatus },
    #[error("cannot {action} a shift with status {status}")]
    Shift { action: &'static str, status: ShiftStatus },
    #[error("timesheet was already {0}")]
    Reviewed(TimesheetStatus),
}

impl From<ScheduleError> for AppError {
    fn from(err: ScheduleError) -> Self {
        let details = match &err {
            ScheduleError::Tour { action, status } => serde_json::json!({ "status": status, "action": action }),
            ScheduleError::Shift { action, status } => serde_json::json!({ "status": status, "action": action }),
            ScheduleError::Reviewed(status) => serde_json::json!({ "status": status }),
        };
        AppError::Conflict { message: err.to_string(), details: Some(details) }
    }
}

/// The status `action` moves a tour to.
pub fn tour_target(current: TourStatus, action: TourAction) -> Result<TourStatus, ScheduleError> {
    use TourStatus::*;
    if !tour_sources(action).contains(&current) {
        return Err(ScheduleError::Tour { action: action.name(), status: current });
    }
    Ok(match action {
        TourAction::Confirm => Confirmed,
        TourAction::Reschedule => Pending,
        TourAction::Cancel => Cancelled,
        TourAction::Complete { no_show: true } => NoShow,
        TourAction::Complete { no_show: false } => Completed,
    })
}

pub fn tour_sources(action: TourAction) -> &'static [TourStatus] {
    use TourStatus::*;
    match action {
        TourAction::Confirm => &[Pending],
        TourAction::Reschedule | TourAction::Cancel => &[Pending, Confirmed],
        TourAction::Complete { .. } => &[Confirmed],
    }
}

pub fn shift_target(current: ShiftStatus, action: ShiftAction) -> Result<ShiftStatus, ScheduleError> {
    use ShiftStatus::*;
    if !shift_sources(action).contains(&current) {
        return Err(ScheduleError::Shift { action: action.name(), status: current });
    }
    Ok(match action {
        ShiftAction::Accept => Assigned,
        ShiftAction::Complete => Completed,
        ShiftAction::Cancel => Cancelled,
    })
}

pub fn shift_sources(action: ShiftAction) -> &'static [ShiftStatus] {
    use ShiftStatus::*;
    match action {
        ShiftAction::Accept => &[Open],
        ShiftAction::Complete => &[Assigned],
        ShiftAction::Cancel => &[Open, Assigned],
    }
}

pub fn check_review(current: TimesheetStatus) -> Result<(), ScheduleError> {
    match current {
        TimesheetStatus::Submitted => Ok(()),
        other => Err(ScheduleError::Reviewed(other)),
    }
}

/// Worked minutes less the break, never negative.
pub fn payable_minutes(start: DateTime<Utc>, end: DateTime<Utc>, break_minutes: i64) -> i64 {
    ((end - start).num_minutes() - break_minutes).max(0)
}

/// `round(minutes × hourly_rate_cents / 60)`, half away from zero.
pub fn amount_cents(minutes: i64, hourly_rate_cents: i64) -> i64 {
    let numerator = minutes as i128 * hourly_rate_cents as i128;
    ((numerator * 2 + 60) / 120) as i64
}

/// The canonical stored form of a timestamp.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
