#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    use crate::tests::support::{days_from_now, setup, TestApp, TestUser};
    use crate::types::Role;

    async fn file_inquiry(t: &TestApp, family: &TestUser, home_id: &str) -> Value {
        let (status, body) = t
            .post(
                "/inquiries",
                &family.id,
                json!({
                    "home_id": home_id,
                    "contact_name": "Anna Keller",
                    "contact_email": "anna.keller@example.org",
                    "care_recipient_name": "Otto Keller",
                    "care_recipient_age": 84,
                    "care_needs": ["mobility", "diabetes"],
                    "urgency": "HIGH"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body
    }

    #[tokio::test]
    async fn test_family_files_inquiry_for_active_home() {
        let t = setup().await;
        let operator = t.user(Role::Operator).await;
        let family = t.user(Role::Family).await;
        let home = t.home(&operator, 5).await;

        let inquiry = file_inquiry(&t, &family, &home).await;
        assert_eq!(inquiry["status"], "NEW");
        assert_eq!(inquiry["urgency"], "HIGH");
        assert_eq!(inquiry["preferred_contact_method"], "ANY");
        assert_eq!(inquiry["family_id"], family.profile());
        assert_eq!(inquiry["care_needs"], json!(["mobility", "diabetes"]));

        // The operator of the home sees it, another operator does not
        let (status, body) = t.get("/inquiries", &operator.id).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
        let other = t.user(Role::Operator).await;
        let (_, body) = t.get("/inquiries", &other.id).await;
        assert!(body["items"].as_array().unwrap().is_empty());
        let uri = format!("/inquiries/{}", inquiry["id"].as_str().unwrap());
        let (status, _) = t.get(&uri, &other.id).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_inquiry_for_draft_home_is_a_conflict() {
        let t = setup().await;
        let operator = t.user(Role::Operator).await;
        let family = t.user(Role::Family).await;
        let (status, body) = t
            .post(
                "/homes",
                &operator.id,
                json!({ "name": "Not Yet Open", "care_levels": ["ASSISTED"], "capacity": 10 }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "DRAFT");

        let (status, body) = t
            .post(
                "/inquiries",
                &family.id,
                json!({
                    "home_id": body["id"],
                    "contact_name": "Anna Keller",
                    "contact_email": "anna.keller@example.org"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["details"]["home_status"], "DRAFT");
    }

    #[tokio::test]
    async fn test_affiliate_inquiry_creates_placeholder_family() {
        let t = setup().await;
        let operator = t.user(Role::Operator).await;
        let affiliate = t.user(Role::Affiliate).await;
        let home = t.home(&operator, 5).await;

        let (status, body) = t
            .post(
                "/inquiries",
                &affiliate.id,
                json!({
                    "home_id": home,
                    "contact_name": "Lena",
                    "contact_email": "lena@example.org"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        let family_id = body["family_id"].as_str().unwrap();

        let (email, status): (String, String) = sqlx::query_as(
            "SELECT u.email, u.status FROM families f JOIN users u ON u.id = f.user_id WHERE f.id = ?1",
        )
        .bind(family_id)
        .fetch_one(&t.state.db)
        .await
        .unwrap();
        assert_eq!(email, "lena@example.org");
        assert_eq!(status, "PENDING");

        // A second lead from the same contact lands on the same family
        let (_, again) = t
            .post(
                "/inquiries",
                &affiliate.id,
                json!({ "home_id": home, "contact_name": "Lena", "contact_email": "LENA@example.org" }),
            )
            .await;
        assert_eq!(again["family_id"], family_id);
    }

    #[tokio::test]
    async fn test_patch_moves_through_funnel_but_not_to_converted() {
        let t = setup().await;
        let operator = t.user(Role::Operator).await;
        let family = t.user(Role::Family).await;
        let home = t.home(&operator, 5).await;
        let inquiry = file_inquiry(&t, &family, &home).await;
        let uri = format!("/inquiries/{}", inquiry["id"].as_str().unwrap());

        let (status, body) = t
            .patch(&uri, &operator.id, json!({ "status": "CONTACTED", "internal_notes": "called back", "assigned_to_id": operator.id }))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["status"], "CONTACTED");
        assert_eq!(body["assigned_to_id"], operator.id.as_str());

        let (status, body) = t.patch(&uri, &operator.id, json!({ "status": "CONVERTED" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["details"]["field"], "status");

        let (status, _) = t.patch(&uri, &operator.id, json!({ "family_id": family.profile() })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Families read but do not work leads
        let (status, _) = t.patch(&uri, &family.id, json!({ "status": "QUALIFIED" })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_convert_creates_pending_resident_once() {
        let t = setup().await;
        let operator = t.user(Role::Operator).await;
        let family = t.user(Role::Family).await;
        let home = t.home(&operator, 5).await;
        let inquiry = file_inquiry(&t, &family, &home).await;
        let id = inquiry["id"].as_str().unwrap();

        let convert = json!({
            "first_name": "Otto",
            "last_name": "Keller",
            "date_of_birth": "1941-02-11",
            "gender": "m",
            "care_level": "ASSISTED",
            "notes": "moving in after rehab"
        });
        let (status, body) = t.post(&format!("/inquiries/{}/convert", id), &operator.id, convert.clone()).await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        assert_eq!(body["inquiry"]["status"], "CONVERTED");
        assert_eq!(body["resident"]["status"], "PENDING");
        assert_eq!(body["resident"]["gender"], "M");
        assert_eq!(body["resident"]["home_id"], home.as_str());
        assert_eq!(body["resident"]["family_id"], family.profile());
        assert_eq!(body["inquiry"]["converted_resident_id"], body["resident"]["id"]);
        assert!(body["inquiry"]["internal_notes"].as_str().unwrap().contains("moving in after rehab"));
        // A pending resident takes no bed
        assert_eq!(t.occupancy(&home).await, (0, 0));

        let (status, _) = t.post(&format!("/inquiries/{}/convert", id), &operator.id, convert).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = t.patch(&format!("/inquiries/{}", id), &operator.id, json!({ "urgency": "LOW" })).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let converted: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM residents WHERE family_id = ?1")
            .bind(family.profile())
            .fetch_one(&t.state.db)
            .await
            .unwrap();
        assert_eq!(converted, 1);
    }

    #[tokio::test]
    async fn test_closed_lost_inquiry_cannot_convert() {
        let t = setup().await;
        let operator = t.user(Role::Operator).await;
        let family = t.user(Role::Family).await;
        let home = t.home(&operator, 5).await;
        let inquiry = file_inquiry(&t, &family, &home).await;
        let id = inquiry["id"].as_str().unwrap();

        t.patch(&format!("/inquiries/{}", id), &operator.id, json!({ "status": "CLOSED_LOST" })).await;
        let (status, body) = t
            .post(
                &format!("/inquiries/{}/convert", id),
                &operator.id,
                json!({ "first_name": "Otto", "last_name": "Keller", "date_of_birth": "1941-02-11", "gender": "M" }),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["details"]["status"], "CLOSED_LOST");
    }

    #[tokio::test]
    async fn test_follow_ups_complete_once() {
        let t = setup().await;
        let operator = t.user(Role::Operator).await;
        let family = t.user(Role::Family).await;
        let home = t.home(&operator, 5).await;
        let inquiry = file_inquiry(&t, &family, &home).await;
        let base = format!("/inquiries/{}/follow-ups", inquiry["id"].as_str().unwrap());

        let (status, follow_up) = t
            .post(&base, &operator.id, json!({ "scheduled_for": days_from_now(2), "type": "CALL", "subject": "Check on tour dates" }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", follow_up);
        assert_eq!(follow_up["status"], "PENDING");

        let (status, body) = t.get(&base, &operator.id).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"].as_array().unwrap().len(), 1);

        let complete = format!("{}/{}/complete", base, follow_up["id"].as_str().unwrap());
        let (status, body) = t.post(&complete, &operator.id, json!({})).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["status"], "COMPLETED");
        assert_eq!(body["completed_by"], operator.id.as_str());

        let (status, _) = t.post(&complete, &operator.id, json!({})).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_provider_sees_only_assigned_inquiries() {
        let t = setup().await;
        let operator = t.user(Role::Operator).await;
        let provider = t.user(Role::Provider).await;
        let family = t.user(Role::Family).await;
        let home = t.home(&operator, 5).await;
        let assigned = file_inquiry(&t, &family, &home).await;
        file_inquiry(&t, &family, &home).await;

        let uri = format!("/inquiries/{}", assigned["id"].as_str().unwrap());
        let (status, _) = t.get(&uri, &provider.id).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        t.patch(&uri, &operator.id, json!({ "assigned_to_id": provider.id })).await;
        let (status, _) = t.get(&uri, &provider.id).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = t.get("/inquiries", &provider.id).await;
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
    }
}
