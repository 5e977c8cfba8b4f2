//! Domain enums and the records handlers read back from the database.
//!
//! Every status column is stored as its upper-case text form; the enums here
//! are the only place that text is spelled out.

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl From<UnknownVariant> for AppError {
    fn from(err: UnknownVariant) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant { kind: stringify!($name), value: s.to_string() }),
                }
            }
        }
    };
}

string_enum!(
    /// Account role; drives the permission table and data scope.
    Role {
        Admin => "ADMIN",
        Operator => "OPERATOR",
        Caregiver => "CAREGIVER",
        Family => "FAMILY",
        Staff => "STAFF",
        Affiliate => "AFFILIATE",
        Provider => "PROVIDER",
    }
);

string_enum!(UserStatus {
    Active => "ACTIVE",
    Pending => "PENDING",
    Suspended => "SUSPENDED",
});

string_enum!(HomeStatus {
    Draft => "DRAFT",
    Active => "ACTIVE",
    Inactive => "INACTIVE",
});

string_enum!(CareLevel {
    Independent => "INDEPENDENT",
    Assisted => "ASSISTED",
    MemoryCare => "MEMORY_CARE",
    SkilledNursing => "SKILLED_NURSING",
});

impl CareLevel {
    /// Accepts the long-form aliases families tend to type (`ASSISTED_LIVING`, ...).
    pub fn parse_lenient(s: &str) -> Option<CareLevel> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INDEPENDENT" | "INDEPENDENT_LIVING" => Some(CareLevel::Independent),
            "ASSISTED" | "ASSISTED_LIVING" => Some(CareLevel::Assisted),
            "MEMORY_CARE" => Some(CareLevel::MemoryCare),
            "SKILLED_NURSING" => Some(CareLevel::SkilledNursing),
            _ => None,
        }
    }
}

string_enum!(
    /// Where a resident stands. Only `Active` residents count toward occupancy.
    ResidentStatus {
        Inquiry => "INQUIRY",
        Pending => "PENDING",
        Active => "ACTIVE",
        Discharged => "DISCHARGED",
        Deceased => "DECEASED",
    }
);

string_enum!(
    /// Lead funnel. `Converted` is terminal.
    InquiryStatus {
        New => "NEW",
        Contacted => "CONTACTED",
        TourScheduled => "TOUR_SCHEDULED",
        TourCompleted => "TOUR_COMPLETED",
        Qualified => "QUALIFIED",
        Converting => "CONVERTING",
        Converted => "CONVERTED",
        PlacementOffered => "PLACEMENT_OFFERED",
        PlacementAccepted => "PLACEMENT_ACCEPTED",
        ClosedLost => "CLOSED_LOST",
    }
);

string_enum!(Urgency {
    Low => "LOW",
    Medium => "MEDIUM",
    High => "HIGH",
    Urgent => "URGENT",
});

string_enum!(ContactMethod {
    Email => "EMAIL",
    Phone => "PHONE",
    Sms => "SMS",
    Any => "ANY",
});

string_enum!(FollowUpStatus {
    Pending => "PENDING",
    Completed => "COMPLETED",
    Cancelled => "CANCELLED",
});

string_enum!(TourStatus {
    Pending => "PENDING",
    Confirmed => "CONFIRMED",
    Completed => "COMPLETED",
    Cancelled => "CANCELLED",
    NoShow => "NO_SHOW",
});

string_enum!(ShiftStatus {
    Open => "OPEN",
    Assigned => "ASSIGNED",
    Completed => "COMPLETED",
    Cancelled => "CANCELLED",
});

string_enum!(TimesheetStatus {
    Submitted => "SUBMITTED",
    Approved => "APPROVED",
    Rejected => "REJECTED",
});

string_enum!(ListingStatus {
    Open => "OPEN",
    Closed => "CLOSED",
    Hired => "HIRED",
});

string_enum!(
    /// A caregiver's application to a listing. `Accepted`, `Rejected` and
    /// `Withdrawn` end the application; only `Withdrawn` can be reopened.
    ApplicationStatus {
        Applied => "APPLIED",
        Invited => "INVITED",
        Interviewing => "INTERVIEWING",
        Offered => "OFFERED",
        Accepted => "ACCEPTED",
        Rejected => "REJECTED",
        Withdrawn => "WITHDRAWN",
    }
);

string_enum!(AuditAction {
    Create => "CREATE",
    Read => "READ",
    Update => "UPDATE",
    Delete => "DELETE",
    AccessDenied => "ACCESS_DENIED",
    Export => "EXPORT",
    Other => "OTHER",
});

fn parse_column<T: std::str::FromStr<Err = UnknownVariant>>(row: &SqliteRow, column: &str) -> AppResult<T> {
    let raw: String = row.try_get(column)?;
    raw.parse::<T>()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt column {}: {}", column, e)))
}

fn parse_json_column<T: serde::de::DeserializeOwned + Default>(row: &SqliteRow, column: &str) -> AppResult<T> {
    let raw: Option<String> = row.try_get(column)?;
    match raw {
        Some(s) if !s.trim().is_empty() => Ok(serde_json::from_str(&s)?),
        _ => Ok(T::default()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub status: UserStatus,
    pub created_at: String,
}

impl User {
    pub fn from_row(row: &SqliteRow) -> AppResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            phone: row.try_get("phone")?,
            role: parse_column(row, "role")?,
            status: parse_column(row, "status")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Home {
    pub id: String,
    pub operator_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: HomeStatus,
    pub care_levels: Vec<CareLevel>,
    pub amenities: Vec<String>,
    pub capacity: i64,
    pub current_occupancy: i64,
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: String,
    pub updated_at: String,
}

impl Home {
    pub const COLUMNS: &'static str = "id, operator_id, name, description, status, care_levels, amenities, capacity, \
        current_occupancy, price_min, price_max, city, state, zip_code, embedding, created_at, updated_at";

    pub fn from_row(row: &SqliteRow) -> AppResult<Self> {
        let embedding: Option<Vec<f32>> = parse_json_column(row, "embedding")?;
        Ok(Self {
            id: row.try_get("id")?,
            operator_id: row.try_get("operator_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            status: parse_column(row, "status")?,
            care_levels: parse_json_column(row, "care_levels")?,
            amenities: parse_json_column(row, "amenities")?,
            capacity: row.try_get("capacity")?,
            current_occupancy: row.try_get("current_occupancy")?,
            price_min: row.try_get("price_min")?,
            price_max: row.try_get("price_max")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
            zip_code: row.try_get("zip_code")?,
            embedding: embedding.filter(|v| !v.is_empty()),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub fn available_beds(&self) -> i64 {
        (self.capacity - self.current_occupancy).max(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resident {
    pub id: String,
    pub family_id: String,
    pub home_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: String,
    pub gender: String,
    pub status: ResidentStatus,
    pub care_level: Option<String>,
    pub medical_conditions: Option<String>,
    pub medications: Option<String>,
    pub allergies: Option<String>,
    pub dietary_restrictions: Option<String>,
    pub admission_date: Option<String>,
    pub discharge_date: Option<String>,
    pub discharge_reason: Option<String>,
    pub date_of_death: Option<String>,
    pub archived_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Resident {
    pub const COLUMNS: &'static str = "id, family_id, home_id, first_name, last_name, date_of_birth, gender, status, \
        care_level, medical_conditions, medications, allergies, dietary_restrictions, admission_date, discharge_date, \
        discharge_reason, date_of_death, archived_at, created_at, updated_at";

    pub fn from_row(row: &SqliteRow) -> AppResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            family_id: row.try_get("family_id")?,
            home_id: row.try_get("home_id")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            date_of_birth: row.try_get("date_of_birth")?,
            gender: row.try_get("gender")?,
            status: parse_column(row, "status")?,
            care_level: row.try_get("care_level")?,
            medical_conditions: row.try_get("medical_conditions")?,
            medications: row.try_get("medications")?,
            allergies: row.try_get("allergies")?,
            dietary_restrictions: row.try_get("dietary_restrictions")?,
            admission_date: row.try_get("admission_date")?,
            discharge_date: row.try_get("discharge_date")?,
            discharge_reason: row.try_get("discharge_reason")?,
            date_of_death: row.try_get("date_of_death")?,
            archived_at: row.try_get("archived_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inquiry {
    pub id: String,
    pub family_id: String,
    pub home_id: String,
    pub status: InquiryStatus,
    pub urgency: Urgency,
    pub contact_name: String,
    pub contact_email: String,
    pub contact_phone: Option<String>,
    pub care_recipient_name: Option<String>,
    pub care_recipient_age: Option<i64>,
    pub care_needs: Vec<String>,
    pub additional_info: Option<String>,
    pub preferred_contact_method: ContactMethod,
    pub assigned_to_id: Option<String>,
    pub internal_notes: Option<String>,
    pub tour_date: Option<String>,
    pub converted_resident_id: Option<String>,
    pub converted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Inquiry {
    pub const COLUMNS: &'static str = "id, family_id, home_id, status, urgency, contact_name, contact_email, \
        contact_phone, care_recipient_name, care_recipient_age, care_needs, additional_info, preferred_contact_method, \
        assigned_to_id, internal_notes, tour_date, converted_resident_id, converted_at, created_at, updated_at";

    pub fn from_row(row: &SqliteRow) -> AppResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            family_id: row.try_get("family_id")?,
            home_id: row.try_get("home_id")?,
            status: parse_column(row, "status")?,
            urgency: parse_column(row, "urgency")?,
            contact_name: row.try_get("contact_name")?,
            contact_email: row.try_get("contact_email")?,
            contact_phone: row.try_get("contact_phone")?,
            care_recipient_name: row.try_get("care_recipient_name")?,
            care_recipient_age: row.try_get("care_recipient_age")?,
            care_needs: parse_json_column(row, "care_needs")?,
            additional_info: row.try_get("additional_info")?,
            preferred_contact_method: parse_column(row, "preferred_contact_method")?,
            assigned_to_id: row.try_get("assigned_to_id")?,
            internal_notes: row.try_get("internal_notes")?,
            tour_date: row.try_get("tour_date")?,
            converted_resident_id: row.try_get("converted_resident_id")?,
            converted_at: row.try_get("converted_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUp {
    pub id: String,
    pub inquiry_id: String,
    pub kind: String,
    pub subject: String,
    pub scheduled_for: String,
    pub status: FollowUpStatus,
    pub completed_at: Option<String>,
    pub completed_by: Option<String>,
    pub created_at: String,
}

impl FollowUp {
    pub fn from_row(row: &SqliteRow) -> AppResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            inquiry_id: row.try_get("inquiry_id")?,
            kind: row.try_get("kind")?,
            subject: row.try_get("subject")?,
            scheduled_for: row.try_get("scheduled_for")?,
            status: parse_column(row, "status")?,
            completed_at: row.try_get("completed_at")?,
            completed_by: row.try_get("completed_by")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tour {
    pub id: String,
    pub family_id: String,
    pub home_id: String,
    pub status: TourStatus,
    pub requested_times: Vec<String>,
    pub confirmed_time: Option<String>,
    pub family_notes: Option<String>,
    pub operator_notes: Option<String>,
    pub cancel_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Tour {
    pub fn from_row(row: &SqliteRow) -> AppResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            family_id: row.try_get("family_id")?,
            home_id: row.try_get("home_id")?,
            status: parse_column(row, "status")?,
            requested_times: parse_json_column(row, "requested_times")?,
            confirmed_time: row.try_get("confirmed_time")?,
            family_notes: row.try_get("family_notes")?,
            operator_notes: row.try_get("operator_notes")?,
            cancel_reason: row.try_get("cancel_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shift {
    pub id: String,
    pub home_id: String,
    pub caregiver_id: Option<String>,
    pub status: ShiftStatus,
    pub start_time: String,
    pub end_time: String,
    pub hourly_rate_cents: i64,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Shift {
    pub fn from_row(row: &SqliteRow) -> AppResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            home_id: row.try_get("home_id")?,
            caregiver_id: row.try_get("caregiver_id")?,
            status: parse_column(row, "status")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            hourly_rate_cents: row.try_get("hourly_rate_cents")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timesheet {
    pub id: String,
    pub shift_id: String,
    pub caregiver_id: String,
    pub status: TimesheetStatus,
    pub start_time: String,
    pub end_time: String,
    pub break_minutes: i64,
    pub notes: Option<String>,
    pub payable_minutes: Option<i64>,
    pub amount_cents: Option<i64>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: String,
}

impl Timesheet {
    pub fn from_row(row: &SqliteRow) -> AppResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            shift_id: row.try_get("shift_id")?,
            caregiver_id: row.try_get("caregiver_id")?,
            status: parse_column(row, "status")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            break_minutes: row.try_get("break_minutes")?,
            notes: row.try_get("notes")?,
            payable_minutes: row.try_get("payable_minutes")?,
            amount_cents: row.try_get("amount_cents")?,
            reviewed_by: row.try_get("reviewed_by")?,
            reviewed_at: row.try_get("reviewed_at")?,
            rejection_reason: row.try_get("rejection_reason")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub posted_by_user_id: String,
    pub home_id: Option<String>,
    pub title: String,
    pub description: String,
    pub hourly_rate_min_cents: Option<i64>,
    pub hourly_rate_max_cents: Option<i64>,
    pub setting: Option<String>,
    pub care_types: Vec<String>,
    pub services: Vec<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub status: ListingStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl Listing {
    pub const COLUMNS: &'static str = "id, posted_by_user_id, home_id, title, description, hourly_rate_min_cents, \
        hourly_rate_max_cents, setting, care_types, services, city, state, zip_code, start_time, end_time, status, \
        created_at, updated_at";

    pub fn from_row(row: &SqliteRow) -> AppResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            posted_by_user_id: row.try_get("posted_by_user_id")?,
            home_id: row.try_get("home_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            hourly_rate_min_cents: row.try_get("hourly_rate_min_cents")?,
            hourly_rate_max_cents: row.try_get("hourly_rate_max_cents")?,
            setting: row.try_get("setting")?,
            care_types: parse_json_column(row, "care_types")?,
            services: parse_json_column(row, "services")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
            zip_code: row.try_get("zip_code")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            status: parse_column(row, "status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingApplication {
    pub id: String,
    pub listing_id: String,
    pub caregiver_id: String,
    pub status: ApplicationStatus,
    pub note: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ListingApplication {
    pub const COLUMNS: &'static str = "id, listing_id, caregiver_id, status, note, created_at, updated_at";

    pub fn from_row(row: &SqliteRow) -> AppResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            listing_id: row.try_get("listing_id")?,
            caregiver_id: row.try_get("caregiver_id")?,
            status: parse_column(row, "status")?,
            note: row.try_get("note")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// A family's saved home with the listing fields a favorites page shows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoriteHome {
    pub home_id: String,
    pub name: String,
    pub status: HomeStatus,
    pub city: Option<String>,
    pub state: Option<String>,
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,
    pub available_beds: i64,
    pub created_at: String,
}

impl FavoriteHome {
    pub fn from_row(row: &SqliteRow) -> AppResult<Self> {
        let capacity: i64 = row.try_get("capacity")?;
        let occupancy: i64 = row.try_get("current_occupancy")?;
        Ok(Self {
            home_id: row.try_get("home_id")?,
            name: row.try_get("name")?,
            status: parse_column(row, "status")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
            price_min: row.try_get("price_min")?,
            price_max: row.try_get("price_max")?,
            available_beds: (capacity - occupancy).max(0),
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeReview {
    pub id: String,
    pub home_id: String,
    pub family_id: String,
    pub reviewer_user_id: String,
    pub rating: i64,
    pub title: Option<String>,
    pub content: Option<String>,
    pub is_public: bool,
    pub created_at: String,
}

impl HomeReview {
    pub const COLUMNS: &'static str =
        "id, home_id, family_id, reviewer_user_id, rating, title, content, is_public, created_at";

    pub fn from_row(row: &SqliteRow) -> AppResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            home_id: row.try_get("home_id")?,
            family_id: row.try_get("family_id")?,
            reviewer_user_id: row.try_get("reviewer_user_id")?,
            rating: row.try_get("rating")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            is_public: row.try_get("is_public")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub user_id: Option<String>,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: String,
}

impl AuditEntry {
    pub fn from_row(row: &SqliteRow) -> AppResult<Self> {
        let metadata: Option<String> = row.try_get("metadata")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            action: parse_column(row, "action")?,
            resource_type: row.try_get("resource_type")?,
            resource_id: row.try_get("resource_id")?,
            description: row.try_get("description")?,
            metadata: metadata.map(|m| serde_json::from_str(&m)).transpose()?,
            ip_address: row.try_get("ip_address")?,
            user_agent: row.try_get("user_agent")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Standard paged list envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Current UTC time in the same format the schema defaults use.
pub fn now_utc() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Today's UTC date as `YYYY-MM-DD`.
pub fn today_utc() -> String {
    chrono::Utc::now().date_naive().format("%Y-%m-%d").to_string()
}
