#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    use crate::tests::support::{days_from_now, setup, TestApp, TestUser};
    use crate::types::Role;

    async fn post_listing(t: &TestApp, poster: &TestUser, extra: Value) -> String {
        let mut body = json!({
            "title": "Weekday companion care",
            "description": "Afternoon visits for my father, light meal prep",
            "hourly_rate_min_cents": 2200,
            "hourly_rate_max_cents": 2800,
            "care_types": ["companionship", " meal prep ", "", "Companionship"],
            "city": "Springfield",
            "state": "IL",
            "start_time": days_from_now(7),
            "end_time": days_from_now(90)
        });
        if let (Some(base), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        let (status, listing) = t.post("/marketplace/listings", &poster.id, body).await;
        assert_eq!(status, StatusCode::CREATED, "{}", listing);
        listing["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_apply_withdraw_and_reapply() {
        let t = setup().await;
        let family = t.user(Role::Family).await;
        let caregiver = t.user(Role::Caregiver).await;
        let listing = post_listing(&t, &family, json!({})).await;
        let listing_uri = format!("/marketplace/listings/{}", listing);
        let applications_uri = format!("{}/applications", listing_uri);

        let (_, body) = t.get(&listing_uri, &caregiver.id).await;
        assert_eq!(body["status"], "OPEN");
        assert_eq!(body["care_types"], json!(["companionship", "meal prep"]));
        assert_eq!(body["applied_by_me"], false);

        let (status, application) =
            t.post(&applications_uri, &caregiver.id, json!({ "note": "Five years of home care experience" })).await;
        assert_eq!(status, StatusCode::CREATED, "{}", application);
        assert_eq!(application["status"], "APPLIED");
        assert_eq!(application["caregiver_id"], caregiver.profile());
        let application_id = application["id"].as_str().unwrap().to_string();

        let (status, body) = t.call("POST", &applications_uri, &caregiver.id, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["details"]["status"], "APPLIED");

        let (_, body) = t.get(&listing_uri, &caregiver.id).await;
        assert_eq!(body["applied_by_me"], true);
        assert_eq!(body["application_count"], 1);

        let (status, body) = t.call("DELETE", &applications_uri, &caregiver.id, None).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["status"], "WITHDRAWN");

        // The badge clears once the application is withdrawn
        let (_, body) = t.get(&listing_uri, &caregiver.id).await;
        assert_eq!(body["applied_by_me"], false);
        assert_eq!(body["application_count"], 0);

        let (status, _) = t.call("DELETE", &applications_uri, &caregiver.id, None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        // Reapplying reopens the same application
        let (status, body) = t.call("POST", &applications_uri, &caregiver.id, None).await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        assert_eq!(body["id"], application_id.as_str());
        assert_eq!(body["status"], "APPLIED");
        assert_eq!(body["note"], Value::Null);

        let stranger = t.user(Role::Caregiver).await;
        let (status, _) = t.call("DELETE", &applications_uri, &stranger.id, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(t.audit_count("CREATE", "listing_application").await, 2);
        assert_eq!(t.audit_count("UPDATE", "listing_application").await, 1);
    }

    #[tokio::test]
    async fn test_accepting_an_application_hires_the_listing() {
        let t = setup().await;
        let family = t.user(Role::Family).await;
        let other_family = t.user(Role::Family).await;
        let first = t.user(Role::Caregiver).await;
        let second = t.user(Role::Caregiver).await;
        let listing = post_listing(&t, &family, json!({})).await;
        let applications_uri = format!("/marketplace/listings/{}/applications", listing);

        let (_, a) = t.call("POST", &applications_uri, &first.id, None).await;
        let (_, b) = t.call("POST", &applications_uri, &second.id, None).await;
        let a = a["id"].as_str().unwrap().to_string();
        let b = b["id"].as_str().unwrap().to_string();

        let (status, body) = t.get(&applications_uri, &family.id).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"].as_array().unwrap().len(), 2);
        let (status, _) = t.get(&applications_uri, &other_family.id).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = t.get(&applications_uri, &first.id).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let review = |id: &str| format!("/marketplace/applications/{}", id);
        // Hiring skips no steps
        let (status, body) = t.patch(&review(&a), &family.id, json!({ "status": "ACCEPTED" })).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["details"]["status"], "APPLIED");
        let (status, _) = t.patch(&review(&a), &other_family.id, json!({ "status": "OFFERED" })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        for step in ["INTERVIEWING", "OFFERED"] {
            let (status, body) = t.patch(&review(&a), &family.id, json!({ "status": step })).await;
            assert_eq!(status, StatusCode::OK, "{}", body);
            assert_eq!(body["status"], step);
        }
        let (status, _) = t.patch(&review(&b), &family.id, json!({ "status": "OFFERED" })).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = t.patch(&review(&a), &family.id, json!({ "status": "ACCEPTED" })).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["status"], "ACCEPTED");
        let (_, body) = t.get(&format!("/marketplace/listings/{}", listing), &first.id).await;
        assert_eq!(body["status"], "HIRED");
        assert_eq!(body["applied_by_me"], true);

        // One hire per listing
        let (status, body) = t.patch(&review(&b), &family.id, json!({ "status": "ACCEPTED" })).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["details"]["listing_status"], "HIRED");
        let (_, body) = t.get(&applications_uri, &family.id).await;
        let statuses: Vec<&str> = body["items"].as_array().unwrap().iter().map(|a| a["status"].as_str().unwrap()).collect();
        assert!(statuses.contains(&"ACCEPTED") && statuses.contains(&"OFFERED"));

        let late = t.user(Role::Caregiver).await;
        let (status, body) = t.call("POST", &applications_uri, &late.id, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["details"]["listing_status"], "HIRED");
        let (status, _) = t.call("DELETE", &applications_uri, &first.id, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_listing_filters_and_status_changes() {
        let t = setup().await;
        let operator = t.user(Role::Operator).await;
        let other_operator = t.user(Role::Operator).await;
        let caregiver = t.user(Role::Caregiver).await;
        let home = t.home(&operator, 5).await;

        let night = post_listing(
            &t,
            &operator,
            json!({ "home_id": home, "title": "Overnight aide", "city": "Peoria", "hourly_rate_min_cents": null }),
        )
        .await;
        let day = post_listing(&t, &operator, json!({})).await;

        let (status, body) = t.get("/marketplace/listings?city=peoria", &caregiver.id).await;
        assert_eq!(status, StatusCode::OK);
        let items = body["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["id"], night.as_str());
        assert_eq!(items[0]["home_id"], home.as_str());
        let (_, body) = t.get("/marketplace/listings?q=overnight", &caregiver.id).await;
        assert_eq!(body["items"].as_array().unwrap().len(), 1);

        let uri = format!("/marketplace/listings/{}", day);
        let (status, _) = t.patch(&uri, &other_operator.id, json!({ "status": "CLOSED" })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = t.patch(&uri, &operator.id, json!({ "status": "CLOSED" })).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["status"], "CLOSED");
        assert_eq!(body["title"], "Weekday companion care");

        let (_, body) = t.get("/marketplace/listings", &caregiver.id).await;
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
        let (_, body) = t.get("/marketplace/listings?status=CLOSED", &caregiver.id).await;
        assert_eq!(body["items"][0]["id"], day.as_str());
        let (_, body) = t.get("/marketplace/listings?mine=true", &operator.id).await;
        assert_eq!(body["items"].as_array().unwrap().len(), 2);

        let (status, _) = t.call("POST", &format!("{}/applications", uri), &caregiver.id, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = t.patch(&uri, &operator.id, json!({ "status": "HIRED" })).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, body) = t.patch(&uri, &operator.id, json!({ "status": "OPEN" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "OPEN");
    }

    #[tokio::test]
    async fn test_listing_validation_and_roles() {
        let t = setup().await;
        let operator = t.user(Role::Operator).await;
        let other_operator = t.user(Role::Operator).await;
        let caregiver = t.user(Role::Caregiver).await;
        let family = t.user(Role::Family).await;
        let home = t.home(&operator, 5).await;

        let base = json!({ "title": "Live-in aide", "description": "Full time" });
        let (status, _) = t.post("/marketplace/listings", &caregiver.id, base.clone()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = t
            .post(
                "/marketplace/listings",
                &family.id,
                json!({ "title": "Aide", "description": "x", "hourly_rate_min_cents": 3000, "hourly_rate_max_cents": 2000 }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["details"]["field"], "hourly_rate_max_cents");

        let (status, _) = t
            .post("/marketplace/listings", &family.id, json!({ "title": "  ", "description": "Full time" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Listings tied to a home stay within the poster's scope
        let (status, _) = t
            .post(
                "/marketplace/listings",
                &other_operator.id,
                json!({ "title": "Aide", "description": "Full time", "home_id": home }),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // Families browse listings but cannot apply
        let listing = post_listing(&t, &operator, json!({})).await;
        let (status, _) = t.get(&format!("/marketplace/listings/{}", listing), &family.id).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) =
            t.call("POST", &format!("/marketplace/listings/{}/applications", listing), &family.id, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
