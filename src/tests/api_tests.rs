#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use crate::config::{AppConfig, SecurityConfig};
    use crate::tests::support::{body_json, setup, setup_with};
    use crate::types::Role;

    #[tokio::test]
    async fn test_identity_is_required() {
        let t = setup().await;

        let response = t.send("GET", "/users/me", None, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");

        let unknown = uuid::Uuid::new_v4().to_string();
        let (status, _) = t.get("/users/me", &unknown).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let suspended = t.user(Role::Family).await;
        sqlx::query("UPDATE users SET status = 'SUSPENDED' WHERE id = ?1")
            .bind(&suspended.id)
            .execute(&t.state.db)
            .await
            .unwrap();
        let (status, body) = t.get("/users/me", &suspended.id).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"]["message"].as_str().unwrap().contains("not active"));
    }

    #[tokio::test]
    async fn test_service_token_guards_api_but_not_health() {
        let mut config = AppConfig::default();
        config.security = Some(SecurityConfig { service_token: Some("gateway-secret".to_string()), ..Default::default() });
        let t = setup_with(config).await;
        let admin = t.user(Role::Admin).await;

        let (status, _) = t.get("/users/me", &admin.id).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = |token: &str| {
            Request::builder()
                .uri("/users/me")
                .header("x-user-id", admin.id.as_str())
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap()
        };
        let response = t.app.clone().oneshot(request("wrong")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = t.app.clone().oneshot(request("gateway-secret")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = t.send("GET", "/healthz", None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_security_headers_present() {
        let t = setup().await;
        let admin = t.user(Role::Admin).await;
        let response = t.send("GET", "/users/me", Some(&admin.id), None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let headers = response.headers();
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "DENY");
        assert_eq!(headers["referrer-policy"], "no-referrer");
        assert_eq!(headers[header::CACHE_CONTROL], "no-store");
        assert!(headers.get("strict-transport-security").is_none());
    }

    #[tokio::test]
    async fn test_create_user_with_profile() {
        let t = setup().await;
        let admin = t.user(Role::Admin).await;

        let request = json!({
            "email": "Grace.Hopper@Example.org",
            "first_name": "Grace",
            "last_name": "Hopper",
            "role": "OPERATOR",
            "company_name": "Sunrise Living"
        });
        let (status, body) = t.post("/users", &admin.id, request.clone()).await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        assert_eq!(body["user"]["email"], "grace.hopper@example.org");
        assert_eq!(body["user"]["status"], "ACTIVE");
        let user_id = body["user"]["id"].as_str().unwrap().to_string();
        let operator_id = body["operator_id"].as_str().unwrap().to_string();

        let (status, body) = t.post("/users", &admin.id, request).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["details"]["field"], "email");

        let (status, me) = t.get("/users/me", &user_id).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["role"], "OPERATOR");
        assert_eq!(me["operator_id"], operator_id.as_str());
        assert_eq!(me["scope"]["kind"], "homes");
        let perms: Vec<&str> = me["permissions"].as_array().unwrap().iter().map(|p| p.as_str().unwrap()).collect();
        assert!(perms.contains(&"homes.create"));
        assert!(!perms.contains(&"audit_logs.view"));

        let (status, _) = t.post("/users", &user_id, json!({
            "email": "x@example.org", "first_name": "X", "last_name": "Y", "role": "ADMIN"
        }))
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = t.post("/users", &admin.id, json!({
            "email": "not-an-email", "first_name": "X", "last_name": "Y", "role": "FAMILY"
        }))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_user_self_or_permission() {
        let t = setup().await;
        let admin = t.user(Role::Admin).await;
        let family = t.user(Role::Family).await;
        let other = t.user(Role::Family).await;

        let (status, body) = t.get(&format!("/users/{}", family.id), &family.id).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "FAMILY");

        let (status, _) = t.get(&format!("/users/{}", other.id), &family.id).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = t.get(&format!("/users/{}", other.id), &admin.id).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = t.get(&format!("/users/{}", uuid::Uuid::new_v4()), &admin.id).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = t.get("/users/not-a-uuid", &admin.id).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_home_visibility_by_status_and_scope() {
        let t = setup().await;
        let operator = t.user(Role::Operator).await;
        let rival = t.user(Role::Operator).await;
        let family = t.user(Role::Family).await;
        let active = t.home(&operator, 4).await;
        let (status, draft) = t
            .post("/homes", &operator.id, json!({ "name": "Back Office", "care_levels": ["INDEPENDENT"], "capacity": 2 }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let draft_id = draft["id"].as_str().unwrap();

        let (_, listed) = t.get("/homes", &family.id).await;
        let ids: Vec<&str> = listed["items"].as_array().unwrap().iter().map(|h| h["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec![active.as_str()]);
        let (status, _) = t.get(&format!("/homes/{}", draft_id), &family.id).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, own) = t.get("/homes", &operator.id).await;
        assert_eq!(own["items"].as_array().unwrap().len(), 2);
        let (_, others) = t.get("/homes", &rival.id).await;
        assert!(others["items"].as_array().unwrap().is_empty());
        let (_, public) = t.get("/homes?status=ACTIVE", &rival.id).await;
        assert_eq!(public["items"].as_array().unwrap().len(), 1);

        let (_, filtered) = t.get("/homes?care_level=memory_care&zip=62701", &family.id).await;
        assert_eq!(filtered["items"].as_array().unwrap().len(), 1);
        let (status, _) = t.get("/homes?care_level=spa", &family.id).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = t.patch(&format!("/homes/{}", active), &rival.id, json!({ "name": "Mine now" })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_home_capacity_and_delete_rules() {
        let t = setup().await;
        let admin = t.user(Role::Admin).await;
        let operator = t.user(Role::Operator).await;
        let family = t.user(Role::Family).await;
        let home = t.home(&operator, 3).await;
        for _ in 0..2 {
            let resident = t.resident(&operator, &family, Some(&home)).await;
            let (status, _) = t.post(&format!("/residents/{}/admit", resident), &operator.id, json!({})).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = t.patch(&format!("/homes/{}", home), &operator.id, json!({ "capacity": 1 })).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["details"]["current_occupancy"], 2);
        let (status, body) = t.patch(&format!("/homes/{}", home), &operator.id, json!({ "capacity": 2 })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["capacity"], 2);

        let (status, report) = t.get(&format!("/homes/{}/occupancy", home), &operator.id).await;
        assert_eq!(status, StatusCode::OK, "{}", report);
        assert_eq!(report["active_residents"], 2);

        let (status, _) = t.call("DELETE", &format!("/homes/{}", home), &operator.id, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = t.call("DELETE", &format!("/homes/{}", home), &admin.id, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["details"]["active_residents"], 2);
    }

    #[tokio::test]
    async fn test_delete_empty_home() {
        let t = setup().await;
        let admin = t.user(Role::Admin).await;
        let operator = t.user(Role::Operator).await;
        let family = t.user(Role::Family).await;
        let home = t.home(&operator, 3).await;
        let resident = t.resident(&operator, &family, Some(&home)).await;

        let (status, _) = t.call("DELETE", &format!("/homes/{}", home), &admin.id, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = t.get(&format!("/homes/{}", home), &admin.id).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // The pending resident stays on file without a home
        let (status, body) = t.get(&format!("/residents/{}", resident), &admin.id).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["home_id"].is_null());
    }

    #[tokio::test]
    async fn test_assign_caregiver_is_idempotent() {
        let t = setup().await;
        let operator = t.user(Role::Operator).await;
        let rival = t.user(Role::Operator).await;
        let caregiver = t.user(Role::Caregiver).await;
        let home = t.home(&operator, 3).await;
        let uri = format!("/caregivers/{}/homes", caregiver.profile());

        let (status, body) = t.post(&uri, &operator.id, json!({ "home_id": home })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["assigned"], true);
        let (_, body) = t.post(&uri, &operator.id, json!({ "home_id": home })).await;
        assert_eq!(body["assigned"], false);

        let (status, _) = t.post(&uri, &rival.id, json!({ "home_id": home })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, me) = t.get("/users/me", &caregiver.id).await;
        assert_eq!(me["scope"]["home_ids"], json!([home]));
    }

    #[tokio::test]
    async fn test_update_home_clears_description() {
        let t = setup().await;
        let operator = t.user(Role::Operator).await;
        let home = t.home(&operator, 3).await;
        let uri = format!("/homes/{}", home);

        let (status, body) = t.patch(&uri, &operator.id, json!({ "name": "Maple Grove East" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["description"], "Garden home with a memory care wing");

        let (status, body) = t.patch(&uri, &operator.id, json!({ "description": "" })).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert!(body["description"].is_null());
        let (_, body) = t.get(&uri, &operator.id).await;
        assert!(body["description"].is_null());
        assert_eq!(body["name"], "Maple Grove East");
    }
}
