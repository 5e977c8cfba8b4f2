#[cfg(test)]
mod tests {
    use crate::db;
    use sqlx::migrate::MigrateDatabase;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;
    use uuid::Uuid;

    async fn setup_test_db() -> (sqlx::SqlitePool, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_url = format!("sqlite:{}", dir.path().join("db-test.db").display());

        sqlx::Sqlite::create_database(&db_url).await.unwrap();

        let pool = SqlitePoolOptions::new().max_connections(1).connect(&db_url).await.unwrap();

        db::init_db(&pool).await.unwrap();

        (pool, dir)
    }

    async fn insert_user(pool: &sqlx::SqlitePool, role: &str) -> String {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO users (id, email, first_name, last_name, role) VALUES (?1, ?2, 'T', 'User', ?3)")
            .bind(&id)
            .bind(format!("{}@example.com", id))
            .bind(role)
            .execute(pool)
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_init_db() {
        let (pool, _dir) = setup_test_db().await;

        let tables: Vec<String> = sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(&pool)
            .await
            .unwrap();

        for table in [
            "users",
            "operators",
            "families",
            "caregivers",
            "homes",
            "caregiver_homes",
            "residents",
            "inquiries",
            "inquiry_follow_ups",
            "tours",
            "shifts",
            "timesheets",
            "listings",
            "listing_applications",
            "favorites",
            "home_reviews",
            "audit_logs",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_init_db_is_idempotent() {
        let (pool, _dir) = setup_test_db().await;
        db::init_db(&pool).await.unwrap();

        let indexes: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(indexes > 0);
    }

    #[tokio::test]
    async fn test_occupancy_cannot_go_negative() {
        let (pool, _dir) = setup_test_db().await;
        let user_id = insert_user(&pool, "OPERATOR").await;
        sqlx::query("INSERT INTO operators (id, user_id, company_name) VALUES ('op-1', ?1, 'Acme Care')")
            .bind(&user_id)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO homes (id, operator_id, name, status, care_levels, amenities, capacity) \
             VALUES ('home-1', 'op-1', 'Oak', 'ACTIVE', '[\"ASSISTED\"]', '[]', 4)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let result = sqlx::query("UPDATE homes SET current_occupancy = current_occupancy - 1 WHERE id = 'home-1'")
            .execute(&pool)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_checks_reject_out_of_domain_rows() {
        let (pool, _dir) = setup_test_db().await;
        let user_id = insert_user(&pool, "OPERATOR").await;
        let family_user = insert_user(&pool, "FAMILY").await;
        sqlx::query("INSERT INTO operators (id, user_id, company_name) VALUES ('op-1', ?1, 'Acme Care')")
            .bind(&user_id)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO families (id, user_id) VALUES ('fam-1', ?1)")
            .bind(&family_user)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO homes (id, operator_id, name, status, care_levels, amenities, capacity, current_occupancy) \
             VALUES ('home-1', 'op-1', 'Oak', 'ACTIVE', '[\"ASSISTED\"]', '[]', 2, 2)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let over = sqlx::query("UPDATE homes SET current_occupancy = 3 WHERE id = 'home-1'").execute(&pool).await;
        let err = over.unwrap_err();
        assert!(matches!(crate::error::AppError::from(err), crate::error::AppError::Conflict { .. }));
        assert!(sqlx::query("UPDATE homes SET capacity = 1 WHERE id = 'home-1'").execute(&pool).await.is_err());
        assert!(sqlx::query("UPDATE homes SET status = 'OPEN' WHERE id = 'home-1'").execute(&pool).await.is_err());
        assert!(sqlx::query("INSERT INTO users (id, email, first_name, last_name, role) VALUES ('u-x', 'x@y.z', 'A', 'B', 'ROOT')")
            .execute(&pool)
            .await
            .is_err());

        let resident = "INSERT INTO residents (id, family_id, home_id, first_name, last_name, date_of_birth, gender, status) \
                        VALUES (?1, 'fam-1', ?2, 'Ruth', 'Baker', '1938-04-12', 'F', ?3)";
        let cases: [(&str, Option<&str>, &str, bool); 3] = [
            ("r-1", None, "ACTIVE", false),
            ("r-2", Some("home-1"), "MOVED_OUT", false),
            ("r-3", None, "PENDING", true),
        ];
        for (id, home, status, accepted) in cases {
            let result = sqlx::query(resident).bind(id).bind(home).bind(status).execute(&pool).await;
            assert_eq!(result.is_ok(), accepted, "{} {}", id, status);
        }
    }

    #[tokio::test]
    async fn test_one_timesheet_per_shift() {
        let (pool, _dir) = setup_test_db().await;
        let operator_user = insert_user(&pool, "OPERATOR").await;
        let caregiver_user = insert_user(&pool, "CAREGIVER").await;
        sqlx::query("INSERT INTO operators (id, user_id, company_name) VALUES ('op-1', ?1, 'Acme Care')")
            .bind(&operator_user)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO caregivers (id, user_id) VALUES ('cg-1', ?1)")
            .bind(&caregiver_user)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO homes (id, operator_id, name, status, care_levels, amenities, capacity) \
             VALUES ('home-1', 'op-1', 'Oak', 'ACTIVE', '[]', '[]', 4)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO shifts (id, home_id, caregiver_id, status, start_time, end_time, hourly_rate_cents) \
             VALUES ('shift-1', 'home-1', 'cg-1', 'ASSIGNED', '2026-01-01T08:00:00Z', '2026-01-01T16:00:00Z', 2000)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let insert = "INSERT INTO timesheets (id, shift_id, caregiver_id, status, start_time, end_time) \
                      VALUES (?1, 'shift-1', 'cg-1', 'SUBMITTED', '2026-01-01T08:00:00Z', '2026-01-01T16:00:00Z')";
        sqlx::query(insert).bind("ts-1").execute(&pool).await.unwrap();
        assert!(sqlx::query(insert).bind("ts-2").execute(&pool).await.is_err());
    }

    #[tokio::test]
    async fn test_bootstrap_admin_created_once() {
        let (pool, _dir) = setup_test_db().await;

        assert!(db::ensure_bootstrap_admin(&pool, None).await.unwrap().is_none());
        assert!(db::ensure_bootstrap_admin(&pool, Some("  ")).await.unwrap().is_none());

        let id = db::ensure_bootstrap_admin(&pool, Some("Root@CareLink.test")).await.unwrap().unwrap();
        let (email, role, status): (String, String, String) =
            sqlx::query_as("SELECT email, role, status FROM users WHERE id = ?1")
                .bind(&id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(email, "root@carelink.test");
        assert_eq!(role, "ADMIN");
        assert_eq!(status, "ACTIVE");

        // An admin already exists, so nothing more is created
        assert!(db::ensure_bootstrap_admin(&pool, Some("other@carelink.test")).await.unwrap().is_none());
        let admins: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'ADMIN'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(admins, 1);
    }

    #[tokio::test]
    async fn test_audit_created_at_default_format() {
        let (pool, _dir) = setup_test_db().await;
        sqlx::query("INSERT INTO audit_logs (id, action, resource_type, description) VALUES ('a-1', 'READ', 'home', 'x')")
            .execute(&pool)
            .await
            .unwrap();
        let created_at: String = sqlx::query_scalar("SELECT created_at FROM audit_logs WHERE id = 'a-1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&created_at).is_ok(), "{}", created_at);
        assert!(created_at.ends_with('Z'));
    }
}
