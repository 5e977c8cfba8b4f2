#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    use crate::config::AppConfig;
    use crate::tests::support::{setup, setup_with, TestApp, TestUser};
    use crate::types::Role;

    async fn listed_home(
        t: &TestApp,
        operator: &TestUser,
        name: &str,
        status: &str,
        prices: (i64, i64),
        embedding: Option<Vec<f32>>,
    ) -> String {
        let (status, body) = t
            .post(
                "/homes",
                &operator.id,
                json!({
                    "name": name,
                    "status": status,
                    "care_levels": ["ASSISTED"],
                    "amenities": ["Medication Management", "Garden"],
                    "capacity": 12,
                    "price_min": prices.0,
                    "price_max": prices.1,
                    "zip_code": "62701",
                    "embedding": embedding
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["id"].as_str().unwrap().to_string()
    }

    fn match_ids(body: &Value) -> Vec<String> {
        body["matches"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["home"]["id"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_recommendations_rank_active_homes_by_fit() {
        let t = setup().await;
        let operator = t.user(Role::Operator).await;
        let family = t.user(Role::Family).await;
        let affordable = listed_home(&t, &operator, "Cedar House", "ACTIVE", (3000, 4000), None).await;
        let pricey = listed_home(&t, &operator, "Harbor View", "ACTIVE", (9000, 12000), None).await;
        listed_home(&t, &operator, "Still Building", "DRAFT", (3000, 4000), None).await;

        let (status, body) = t
            .post(
                "/matching/homes",
                &family.id,
                json!({
                    "budget_min": 3000,
                    "budget_max": 4000,
                    "care_level": "ASSISTED",
                    "medical_conditions": ["diabetes"],
                    "zip_code": "62701"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["candidates"], 2);
        assert_eq!(match_ids(&body), vec![affordable.clone(), pricey]);

        let best = &body["matches"][0];
        assert_eq!(best["match_factors"]["budget_score"], 100.0);
        assert!(best["fit_score"].as_f64().unwrap() > body["matches"][1]["fit_score"].as_f64().unwrap());
        assert!(best["home"].get("embedding").is_none());
        assert_eq!(body["semantic"]["provider"], "hashing");
        assert_eq!(t.state.metrics.get_snapshot().matches_computed, 1);

        let (_, body) = t
            .post(
                "/matching/homes",
                &family.id,
                json!({ "budget_min": 3000, "budget_max": 4000, "care_level": "ASSISTED", "limit": 1 }),
            )
            .await;
        assert_eq!(match_ids(&body), vec![affordable]);
    }

    #[tokio::test]
    async fn test_supplied_embedding_blends_semantic_score() {
        let t = setup().await;
        let operator = t.user(Role::Operator).await;
        let family = t.user(Role::Family).await;
        let near = listed_home(&t, &operator, "Near", "ACTIVE", (3000, 4000), Some(vec![0.0, 1.0, 0.0])).await;
        let far = listed_home(&t, &operator, "Far", "ACTIVE", (3000, 4000), Some(vec![1.0, 0.0, 0.0])).await;

        let (status, body) = t
            .post(
                "/matching/homes",
                &family.id,
                json!({
                    "budget_min": 3000,
                    "budget_max": 4000,
                    "care_level": "ASSISTED",
                    "embedding": [0.0, 1.0, 0.0]
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["semantic"]["enabled"], true);
        assert_eq!(body["semantic"]["provider"], "request");
        assert_eq!(match_ids(&body), vec![near, far]);
        assert_eq!(body["matches"][0]["semantic_score"], 100.0);
        assert_eq!(body["matches"][1]["semantic_score"], 0.0);
        // Identical rule inputs, so only the semantic part separates them
        assert_eq!(body["matches"][0]["rule_score"], body["matches"][1]["rule_score"]);
    }

    #[tokio::test]
    async fn test_disabled_provider_scores_rules_only() {
        let mut config = AppConfig::default();
        config.matching.embedding_provider = "none".to_string();
        let t = setup_with(config).await;
        let operator = t.user(Role::Operator).await;
        let family = t.user(Role::Family).await;
        listed_home(&t, &operator, "Cedar House", "ACTIVE", (3000, 4000), None).await;

        let (status, body) = t
            .post("/matching/homes", &family.id, json!({ "budget_min": 3000, "budget_max": 4000, "care_level": "ASSISTED" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["semantic"]["enabled"], false);
        assert_eq!(body["semantic"]["provider"], "none");
        let top = &body["matches"][0];
        assert!(top["semantic_score"].is_null());
        assert_eq!(top["fit_score"], top["rule_score"]);
    }

    #[tokio::test]
    async fn test_invalid_preferences_are_rejected() {
        let t = setup().await;
        let family = t.user(Role::Family).await;
        let (status, body) = t
            .post("/matching/homes", &family.id, json!({ "budget_min": 5000, "budget_max": 1000, "care_level": "ASSISTED" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["details"]["field"], "budget_max");

        let (status, _) = t
            .post("/matching/homes", &family.id, json!({ "budget_min": 0, "budget_max": 1000, "care_level": "  " }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
