//! Shared fixtures for the API tests: a file-backed database in a temp dir,
//! the full API router, seeded users and a JSON request helper.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;
use tower::ServiceExt;

use crate::config::AppConfig;
use crate::types::Role;
use crate::{db, routes, state::AppState};

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    _dir: TempDir,
}

/// A seeded user and the profile row its role owns, if any.
pub struct TestUser {
    pub id: String,
    pub profile_id: Option<String>,
}

impl TestUser {
    pub fn profile(&self) -> &str {
        self.profile_id.as_deref().unwrap_or_default()
    }
}

pub async fn setup() -> TestApp {
    setup_with(AppConfig::default()).await
}

pub async fn setup_with(config: AppConfig) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("carelink-test.db"))
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new().max_connections(4).connect_with(options).await.unwrap();
    db::init_db(&pool).await.unwrap();

    let state = AppState::new(pool, config);
    let app = routes::api_router(state.clone());
    TestApp { app, state, _dir: dir }
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
}

/// An RFC 3339 timestamp `days` from now.
pub fn days_from_now(days: i64) -> String {
    crate::scheduling::format_timestamp(chrono::Utc::now() + chrono::Duration::days(days))
}

impl TestApp {
    pub async fn send(&self, method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn call(&self, method: &str, uri: &str, user: &str, body: Option<Value>) -> (StatusCode, Value) {
        let response = self.send(method, uri, Some(user), body).await;
        let status = response.status();
        (status, body_json(response).await)
    }

    pub async fn get(&self, uri: &str, user: &str) -> (StatusCode, Value) {
        self.call("GET", uri, user, None).await
    }

    pub async fn post(&self, uri: &str, user: &str, body: Value) -> (StatusCode, Value) {
        self.call("POST", uri, user, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, user: &str, body: Value) -> (StatusCode, Value) {
        self.call("PATCH", uri, user, Some(body)).await
    }

    /// Inserts an ACTIVE user straight into the database with the profile row
    /// its role needs.
    pub async fn user(&self, role: Role) -> TestUser {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO users (id, email, first_name, last_name, role, status) VALUES (?1, ?2, 'Test', ?3, ?4, 'ACTIVE')",
        )
        .bind(&id)
        .bind(format!("{}@example.com", id))
        .bind(role.as_str())
        .bind(role.as_str())
        .execute(&self.state.db)
        .await
        .unwrap();

        let table = match role {
            Role::Operator => Some("operators"),
            Role::Family => Some("families"),
            Role::Caregiver => Some("caregivers"),
            _ => None,
        };
        let profile_id = match table {
            Some(table) => {
                let profile_id = uuid::Uuid::new_v4().to_string();
                let sql = match table {
                    "operators" => {
                        "INSERT INTO operators (id, user_id, company_name) VALUES (?1, ?2, 'Test Care LLC')".to_string()
                    }
                    _ => format!("INSERT INTO {} (id, user_id) VALUES (?1, ?2)", table),
                };
                sqlx::query(&sql).bind(&profile_id).bind(&id).execute(&self.state.db).await.unwrap();
                Some(profile_id)
            }
            None => None,
        };
        TestUser { id, profile_id }
    }

    /// Creates an ACTIVE home owned by `operator` through the API.
    pub async fn home(&self, operator: &TestUser, capacity: i64) -> String {
        let (status, body) = self
            .post(
                "/homes",
                &operator.id,
                json!({
                    "name": "Maple Grove",
                    "description": "Garden home with a memory care wing",
                    "status": "ACTIVE",
                    "care_levels": ["ASSISTED", "MEMORY_CARE"],
                    "amenities": ["garden", "pet friendly"],
                    "capacity": capacity,
                    "price_min": 3000,
                    "price_max": 5000,
                    "city": "Springfield",
                    "state": "IL",
                    "zip_code": "62701"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["id"].as_str().unwrap().to_string()
    }

    /// Creates a PENDING resident of `family` through the API as `actor`.
    pub async fn resident(&self, actor: &TestUser, family: &TestUser, home_id: Option<&str>) -> String {
        let (status, body) = self
            .post(
                "/residents",
                &actor.id,
                json!({
                    "family_id": family.profile(),
                    "home_id": home_id,
                    "first_name": "Ruth",
                    "last_name": "Baker",
                    "date_of_birth": "1938-04-12",
                    "gender": "F",
                    "status": "PENDING",
                    "care_level": "ASSISTED"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["id"].as_str().unwrap().to_string()
    }

    pub async fn occupancy(&self, home_id: &str) -> (i64, i64) {
        sqlx::query_as::<_, (i64, i64)>(
            "SELECT current_occupancy, (SELECT COUNT(*) FROM residents WHERE home_id = ?1 AND status = 'ACTIVE') \
             FROM homes WHERE id = ?1",
        )
        .bind(home_id)
        .fetch_one(&self.state.db)
        .await
        .unwrap()
    }

    pub async fn audit_count(&self, action: &str, resource_type: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs WHERE action = ?1 AND resource_type = ?2")
            .bind(action)
            .bind(resource_type)
            .fetch_one(&self.state.db)
            .await
            .unwrap()
    }
}
