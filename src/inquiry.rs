//! Inquiry funnel rules and conversion into a resident.

use serde::Deserialize;
use sqlx::SqlitePool;

use crate::error::{AppError, AppResult, OptionExt};
use crate::lifecycle::{insert_resident, NewResident};
use crate::middleware::validation::{parse_date, require_max_len, require_non_empty, Validate};
use crate::types::{now_utc, Inquiry, InquiryStatus, Resident, ResidentStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FunnelError {
    #[error("inquiry is converted and can no longer change")]
    Converted,
    #[error("status CONVERTED is set by the convert operation")]
    ConvertViaPatch,
    #[error("cannot convert an inquiry with status {0}")]
    NotConvertible(InquiryStatus),
}

impl From<FunnelError> for AppError {
    fn from(err: FunnelError) -> Self {
        match err {
            FunnelError::ConvertViaPatch => AppError::validation("status", err.to_string()),
            FunnelError::NotConvertible(status) => AppError::Conflict {
                message: err.to_string(),
                details: Some(serde_json::json!({ "status": status })),
            },
            FunnelError::Converted => AppError::Conflict {
                message: err.to_string(),
                details: Some(serde_json::json!({ "status": InquiryStatus::Converted })),
            },
        }
    }
}

/// Any PATCH to a converted inquiry is refused; CONVERTED is never a PATCH target.
pub fn check_update(current: InquiryStatus, requested: Option<InquiryStatus>) -> Result<(), FunnelError> {
    if current == InquiryStatus::Converted {
        return Err(FunnelError::Converted);
    }
    if requested == Some(InquiryStatus::Converted) {
        return Err(FunnelError::ConvertViaPatch);
    }
    Ok(())
}

pub fn check_convert(current: InquiryStatus) -> Result<(), FunnelError> {
    match current {
        InquiryStatus::Converted => Err(FunnelError::Converted),
        InquiryStatus::ClosedLost => Err(FunnelError::NotConvertible(current)),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConvertRequest {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: String,
    pub gender: String,
    pub care_level: Option<String>,
    pub medical_conditions: Option<String>,
    pub medications: Option<String>,
    pub allergies: Option<String>,
    pub dietary_restrictions: Option<String>,
    pub notes: Option<String>,
}

impl Validate for ConvertRequest {
    fn validate(&self) -> AppResult<()> {
        require_non_empty("first_name", &self.first_name)?;
        require_non_empty("last_name", &self.last_name)?;
        require_max_len("first_name", &self.first_name, 100)?;
        require_max_len("last_name", &self.last_name, 100)?;
        require_non_empty("gender", &self.gender)?;
        let dob = parse_date("date_of_birth", &self.date_of_birth)?;
        if dob >= chrono::Utc::now().date_naive() {
            return Err(AppError::validation("date_of_birth", "must be in the past"));
        }
        Ok(())
    }
}

pub(crate) async fn load_inquiry(db: impl sqlx::SqliteExecutor<'_>, inquiry_id: &str) -> AppResult<Inquiry> {
    let sql = format!("SELECT {} FROM inquiries WHERE id = ?1", Inquiry::COLUMNS);
    let row = sqlx::query(&sql)
        .bind(inquiry_id)
        .fetch_optional(db)
        .await?
        .ok_or_not_found("inquiry")?;
    Inquiry::from_row(&row)
}

/// Creates a PENDING resident for the inquiry's family and home and marks the
/// inquiry CONVERTED, in one transaction.
pub async fn convert(
    db: &SqlitePool,
    inquiry_id: &str,
    converted_by: &str,
    req: &ConvertRequest,
) -> AppResult<(Inquiry, Resident)> {
    let mut tx = db.begin().await?;
    let inquiry = load_inquiry(&mut *tx, inquiry_id).await?;
    check_convert(inquiry.status)?;

    let resident_id = insert_resident(
        &mut *tx,
        &NewResident {
            family_id: inquiry.family_id.clone(),
            home_id: Some(inquiry.home_id.clone()),
            first_name: req.first_name.clone(),
            last_name: req.last_name.clone(),
            date_of_birth: req.date_of_birth.trim().to_string(),
            gender: req.gender.trim().to_uppercase(),
            status: ResidentStatus::Pending,
            care_level: req.care_level.clone(),
            medical_conditions: req.medical_conditions.clone(),
            medications: req.medications.clone(),
            allergies: req.allergies.clone(),
            dietary_restrictions: req.dietary_restrictions.clone(),
        },
    )
    .await?;

    let notes = match (inquiry.internal_notes.as_deref(), req.notes.as_deref().map(str::trim)) {
        (Some(existing), Some(n)) if !n.is_empty() => Some(format!("{}\n[conversion] {}", existing, n)),
        (None, Some(n)) if !n.is_empty() => Some(format!("[conversion] {}", n)),
        (existing, _) => existing.map(str::to_string),
    };
    let now = now_utc();
    sqlx::query(
        "UPDATE inquiries SET status = ?2, converted_resident_id = ?3, converted_at = ?4, internal_notes = ?5, \
         assigned_to_id = COALESCE(assigned_to_id, ?6), updated_at = ?4 WHERE id = ?1",
    )
    .bind(inquiry_id)
    .bind(InquiryStatus::Converted.as_str())
    .bind(&resident_id)
    .bind(&now)
    .bind(notes)
    .bind(converted_by)
    .execute(&mut *tx)
    .await?;

    let inquiry = load_inquiry(&mut *tx, inquiry_id).await?;
    let resident = crate::lifecycle::load_resident(&mut tx, &resident_id).await?;
    tx.commit().await?;

    tracing::info!(inquiry_id, resident_id = %resident.id, "inquiry converted");
    Ok((inquiry, resident))
}
