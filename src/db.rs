use sqlx::SqlitePool;

const TABLES: &[(&str, &str)] = &[
    (
        "users",
        r#"CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            phone TEXT NULL,
            role TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'ACTIVE',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            CHECK (role IN ('ADMIN', 'OPERATOR', 'CAREGIVER', 'FAMILY', 'STAFF', 'AFFILIATE', 'PROVIDER')),
            CHECK (status IN ('ACTIVE', 'PENDING', 'SUSPENDED'))
        )"#,
    ),
    (
        "operators",
        r#"CREATE TABLE IF NOT EXISTS operators (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            company_name TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        )"#,
    ),
    (
        "families",
        r#"CREATE TABLE IF NOT EXISTS families (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        )"#,
    ),
    (
        "caregivers",
        r#"CREATE TABLE IF NOT EXISTS caregivers (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            hourly_rate_cents INTEGER NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        )"#,
    ),
    (
        "homes",
        r#"CREATE TABLE IF NOT EXISTS homes (
            id TEXT PRIMARY KEY,
            operator_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NULL,
            status TEXT NOT NULL,
            care_levels TEXT NOT NULL,
            amenities TEXT NOT NULL,
            capacity INTEGER NOT NULL,
            current_occupancy INTEGER NOT NULL DEFAULT 0,
            price_min INTEGER NULL,
            price_max INTEGER NULL,
            city TEXT NULL,
            state TEXT NULL,
            zip_code TEXT NULL,
            embedding TEXT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            CHECK (status IN ('DRAFT', 'ACTIVE', 'INACTIVE')),
            CHECK (capacity >= 1),
            CHECK (current_occupancy >= 0 AND current_occupancy <= capacity),
            CHECK (price_min IS NULL OR price_min >= 0),
            CHECK (price_max IS NULL OR price_max >= 0),
            FOREIGN KEY(operator_id) REFERENCES operators(id) ON DELETE CASCADE
        )"#,
    ),
    (
        "caregiver_homes",
        r#"CREATE TABLE IF NOT EXISTS caregiver_homes (
            caregiver_id TEXT NOT NULL,
            home_id TEXT NOT NULL,
            assigned_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            PRIMARY KEY (caregiver_id, home_id),
            FOREIGN KEY(caregiver_id) REFERENCES caregivers(id) ON DELETE CASCADE,
            FOREIGN KEY(home_id) REFERENCES homes(id) ON DELETE CASCADE
        )"#,
    ),
    (
        "residents",
        r#"CREATE TABLE IF NOT EXISTS residents (
            id TEXT PRIMARY KEY,
            family_id TEXT NOT NULL,
            home_id TEXT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            date_of_birth TEXT NOT NULL,
            gender TEXT NOT NULL,
            status TEXT NOT NULL,
            care_level TEXT NULL,
            medical_conditions TEXT NULL,
            medications TEXT NULL,
            allergies TEXT NULL,
            dietary_restrictions TEXT NULL,
            admission_date TEXT NULL,
            discharge_date TEXT NULL,
            discharge_reason TEXT NULL,
            date_of_death TEXT NULL,
            archived_at TEXT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            CHECK (status IN ('INQUIRY', 'PENDING', 'ACTIVE', 'DISCHARGED', 'DECEASED')),
            CHECK (status != 'ACTIVE' OR home_id IS NOT NULL),
            FOREIGN KEY(family_id) REFERENCES families(id),
            FOREIGN KEY(home_id) REFERENCES homes(id)
        )"#,
    ),
    (
        "inquiries",
        r#"CREATE TABLE IF NOT EXISTS inquiries (
            id TEXT PRIMARY KEY,
            family_id TEXT NOT NULL,
            home_id TEXT NOT NULL,
            status TEXT NOT NULL,
            urgency TEXT NOT NULL,
            contact_name TEXT NOT NULL,
            contact_email TEXT NOT NULL,
            contact_phone TEXT NULL,
            care_recipient_name TEXT NULL,
            care_recipient_age INTEGER NULL,
            care_needs TEXT NOT NULL DEFAULT '[]',
            additional_info TEXT NULL,
            preferred_contact_method TEXT NOT NULL DEFAULT 'ANY',
            assigned_to_id TEXT NULL,
            internal_notes TEXT NULL,
            tour_date TEXT NULL,
            converted_resident_id TEXT NULL,
            converted_at TEXT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            CHECK (status IN ('NEW', 'CONTACTED', 'TOUR_SCHEDULED', 'TOUR_COMPLETED', 'QUALIFIED', 'CONVERTING',
                              'CONVERTED', 'PLACEMENT_OFFERED', 'PLACEMENT_ACCEPTED', 'CLOSED_LOST')),
            CHECK (urgency IN ('LOW', 'MEDIUM', 'HIGH', 'URGENT')),
            FOREIGN KEY(family_id) REFERENCES families(id),
            FOREIGN KEY(home_id) REFERENCES homes(id),
            FOREIGN KEY(assigned_to_id) REFERENCES users(id),
            FOREIGN KEY(converted_resident_id) REFERENCES residents(id)
        )"#,
    ),
    (
        "inquiry_follow_ups",
        r#"CREATE TABLE IF NOT EXISTS inquiry_follow_ups (
            id TEXT PRIMARY KEY,
            inquiry_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            subject TEXT NOT NULL,
            scheduled_for TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            completed_at TEXT NULL,
            completed_by TEXT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            CHECK (status IN ('PENDING', 'COMPLETED', 'CANCELLED')),
            FOREIGN KEY(inquiry_id) REFERENCES inquiries(id) ON DELETE CASCADE
        )"#,
    ),
    (
        "tours",
        r#"CREATE TABLE IF NOT EXISTS tours (
            id TEXT PRIMARY KEY,
            family_id TEXT NOT NULL,
            home_id TEXT NOT NULL,
            status TEXT NOT NULL,
            requested_times TEXT NOT NULL,
            confirmed_time TEXT NULL,
            family_notes TEXT NULL,
            operator_notes TEXT NULL,
            cancel_reason TEXT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            CHECK (status IN ('PENDING', 'CONFIRMED', 'COMPLETED', 'CANCELLED', 'NO_SHOW')),
            FOREIGN KEY(family_id) REFERENCES families(id),
            FOREIGN KEY(home_id) REFERENCES homes(id) ON DELETE CASCADE
        )"#,
    ),
    (
        "shifts",
        r#"CREATE TABLE IF NOT EXISTS shifts (
            id TEXT PRIMARY KEY,
            home_id TEXT NOT NULL,
            caregiver_id TEXT NULL,
            status TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            hourly_rate_cents INTEGER NOT NULL,
            notes TEXT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            CHECK (status IN ('OPEN', 'ASSIGNED', 'COMPLETED', 'CANCELLED')),
            CHECK (status = 'OPEN' OR status = 'CANCELLED' OR caregiver_id IS NOT NULL),
            CHECK (end_time > start_time),
            CHECK (hourly_rate_cents >= 0),
            FOREIGN KEY(home_id) REFERENCES homes(id) ON DELETE CASCADE,
            FOREIGN KEY(caregiver_id) REFERENCES caregivers(id)
        )"#,
    ),
    (
        "timesheets",
        r#"CREATE TABLE IF NOT EXISTS timesheets (
            id TEXT PRIMARY KEY,
            shift_id TEXT NOT NULL UNIQUE,
            caregiver_id TEXT NOT NULL,
            status TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            break_minutes INTEGER NOT NULL DEFAULT 0,
            notes TEXT NULL,
            payable_minutes INTEGER NULL,
            amount_cents INTEGER NULL,
            reviewed_by TEXT NULL,
            reviewed_at TEXT NULL,
            rejection_reason TEXT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            CHECK (status IN ('SUBMITTED', 'APPROVED', 'REJECTED')),
            CHECK (end_time > start_time),
            CHECK (break_minutes >= 0),
            FOREIGN KEY(shift_id) REFERENCES shifts(id) ON DELETE CASCADE,
            FOREIGN KEY(caregiver_id) REFERENCES caregivers(id)
        )"#,
    ),
    (
        "listings",
        r#"CREATE TABLE IF NOT EXISTS listings (
            id TEXT PRIMARY KEY,
            posted_by_user_id TEXT NOT NULL,
            home_id TEXT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            hourly_rate_min_cents INTEGER NULL,
            hourly_rate_max_cents INTEGER NULL,
            setting TEXT NULL,
            care_types TEXT NOT NULL DEFAULT '[]',
            services TEXT NOT NULL DEFAULT '[]',
            city TEXT NULL,
            state TEXT NULL,
            zip_code TEXT NULL,
            start_time TEXT NULL,
            end_time TEXT NULL,
            status TEXT NOT NULL DEFAULT 'OPEN',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            CHECK (status IN ('OPEN', 'CLOSED', 'HIRED')),
            CHECK (hourly_rate_min_cents IS NULL OR hourly_rate_max_cents IS NULL
                   OR hourly_rate_min_cents <= hourly_rate_max_cents),
            FOREIGN KEY(posted_by_user_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY(home_id) REFERENCES homes(id) ON DELETE SET NULL
        )"#,
    ),
    (
        "listing_applications",
        r#"CREATE TABLE IF NOT EXISTS listing_applications (
            id TEXT PRIMARY KEY,
            listing_id TEXT NOT NULL,
            caregiver_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'APPLIED',
            note TEXT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            UNIQUE (listing_id, caregiver_id),
            CHECK (status IN ('APPLIED', 'INVITED', 'INTERVIEWING', 'OFFERED', 'ACCEPTED', 'REJECTED', 'WITHDRAWN')),
            FOREIGN KEY(listing_id) REFERENCES listings(id) ON DELETE CASCADE,
            FOREIGN KEY(caregiver_id) REFERENCES caregivers(id) ON DELETE CASCADE
        )"#,
    ),
    (
        "favorites",
        r#"CREATE TABLE IF NOT EXISTS favorites (
            family_id TEXT NOT NULL,
            home_id TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            PRIMARY KEY (family_id, home_id),
            FOREIGN KEY(family_id) REFERENCES families(id) ON DELETE CASCADE,
            FOREIGN KEY(home_id) REFERENCES homes(id) ON DELETE CASCADE
        )"#,
    ),
    (
        "home_reviews",
        r#"CREATE TABLE IF NOT EXISTS home_reviews (
            id TEXT PRIMARY KEY,
            home_id TEXT NOT NULL,
            family_id TEXT NOT NULL,
            reviewer_user_id TEXT NOT NULL,
            rating INTEGER NOT NULL,
            title TEXT NULL,
            content TEXT NULL,
            is_public INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            UNIQUE (home_id, reviewer_user_id),
            CHECK (rating BETWEEN 1 AND 5),
            FOREIGN KEY(home_id) REFERENCES homes(id) ON DELETE CASCADE,
            FOREIGN KEY(family_id) REFERENCES families(id) ON DELETE CASCADE,
            FOREIGN KEY(reviewer_user_id) REFERENCES users(id) ON DELETE CASCADE
        )"#,
    ),
    (
        "audit_logs",
        r#"CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            user_id TEXT NULL,
            action TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            resource_id TEXT NULL,
            description TEXT NOT NULL,
            metadata TEXT NULL,
            ip_address TEXT NULL,
            user_agent TEXT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
        )"#,
    ),
];

const INDEXES: &[(&str, &str)] = &[
    ("idx_homes_operator", "CREATE INDEX IF NOT EXISTS idx_homes_operator ON homes(operator_id)"),
    ("idx_homes_status", "CREATE INDEX IF NOT EXISTS idx_homes_status ON homes(status)"),
    ("idx_residents_home_status", "CREATE INDEX IF NOT EXISTS idx_residents_home_status ON residents(home_id, status)"),
    ("idx_residents_family", "CREATE INDEX IF NOT EXISTS idx_residents_family ON residents(family_id)"),
    ("idx_inquiries_home_status", "CREATE INDEX IF NOT EXISTS idx_inquiries_home_status ON inquiries(home_id, status)"),
    ("idx_inquiries_family", "CREATE INDEX IF NOT EXISTS idx_inquiries_family ON inquiries(family_id)"),
    ("idx_follow_ups_inquiry", "CREATE INDEX IF NOT EXISTS idx_follow_ups_inquiry ON inquiry_follow_ups(inquiry_id, scheduled_for)"),
    ("idx_tours_home", "CREATE INDEX IF NOT EXISTS idx_tours_home ON tours(home_id, status)"),
    ("idx_tours_family", "CREATE INDEX IF NOT EXISTS idx_tours_family ON tours(family_id)"),
    ("idx_shifts_home_status", "CREATE INDEX IF NOT EXISTS idx_shifts_home_status ON shifts(home_id, status)"),
    ("idx_shifts_caregiver", "CREATE INDEX IF NOT EXISTS idx_shifts_caregiver ON shifts(caregiver_id)"),
    ("idx_listings_status", "CREATE INDEX IF NOT EXISTS idx_listings_status ON listings(status, created_at DESC)"),
    ("idx_listings_poster", "CREATE INDEX IF NOT EXISTS idx_listings_poster ON listings(posted_by_user_id)"),
    ("idx_applications_caregiver", "CREATE INDEX IF NOT EXISTS idx_applications_caregiver ON listing_applications(caregiver_id)"),
    ("idx_favorites_home", "CREATE INDEX IF NOT EXISTS idx_favorites_home ON favorites(home_id)"),
    ("idx_reviews_home", "CREATE INDEX IF NOT EXISTS idx_reviews_home ON home_reviews(home_id, is_public, created_at DESC)"),
    ("idx_audit_created", "CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_logs(created_at DESC)"),
    ("idx_audit_resource", "CREATE INDEX IF NOT EXISTS idx_audit_resource ON audit_logs(resource_type, resource_id)"),
    ("idx_audit_user", "CREATE INDEX IF NOT EXISTS idx_audit_user ON audit_logs(user_id)"),
];

pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    // Pragmas for better durability/performance
    if let Err(e) = sqlx::query("PRAGMA journal_mode=WAL;").execute(pool).await {
        tracing::warn!("Failed to set WAL journal mode: {}", e);
    }
    if let Err(e) = sqlx::query("PRAGMA synchronous=NORMAL;").execute(pool).await {
        tracing::warn!("Failed to set synchronous mode: {}", e);
    }
    // Foreign keys carry the tenant relationships - fail if this doesn't work
    sqlx::query("PRAGMA foreign_keys=ON;").execute(pool).await?;
    if let Err(e) = sqlx::query("PRAGMA busy_timeout=10000;").execute(pool).await {
        tracing::warn!("Failed to set busy_timeout: {}", e);
    }

    for (name, ddl) in TABLES {
        if let Err(e) = sqlx::query(ddl).execute(pool).await {
            tracing::error!("Failed to create table {}: {}", name, e);
            return Err(anyhow::anyhow!("Schema initialisation failed on {}: {}", name, e));
        }
    }

    for (name, query) in INDEXES {
        if let Err(e) = sqlx::query(query).execute(pool).await {
            match &e {
                sqlx::Error::Database(db_err) => {
                    let msg = db_err.message().to_lowercase();
                    if msg.contains("already exists") || msg.contains("duplicate") {
                        tracing::debug!("Index {} already exists, skipping", name);
                    } else {
                        tracing::warn!("Failed to create index {}: {}", name, e);
                    }
                }
                _ => {
                    tracing::warn!("Failed to create index {}: {}", name, e);
                }
            }
        }
    }

    Ok(())
}

/// Creates the configured bootstrap administrator when the database has none.
///
/// Returns the new admin's id, or `None` when nothing was created.
pub async fn ensure_bootstrap_admin(pool: &SqlitePool, email: Option<&str>) -> anyhow::Result<Option<String>> {
    let Some(email) = email.map(str::trim).filter(|e| !e.is_empty()) else {
        return Ok(None);
    };
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'ADMIN'")
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        return Ok(None);
    }
    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO users (id, email, first_name, last_name, role, status) VALUES (?1, ?2, 'System', 'Admin', 'ADMIN', 'ACTIVE')",
    )
    .bind(&id)
    .bind(email.to_lowercase())
    .execute(pool)
    .await?;
    Ok(Some(id))
}
