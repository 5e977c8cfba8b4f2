use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::{
    error::AppResult,
    matching::{self, MatchPreferences},
    metrics::Metrics,
    middleware::{auth::CurrentUser, ip::ClientIp, validation::ValidatedJson},
    permissions::{self, Permission},
    state::AppState,
    types::{Home, HomeStatus},
};

/// A supplied vector wins; otherwise the provider is asked and failures fall
/// back to rule-only scoring.
async fn preference_embedding(state: &AppState, prefs: &MatchPreferences) -> (Option<Vec<f32>>, &'static str) {
    if let Some(v) = &prefs.embedding {
        return (Some(v.clone()), "request");
    }
    match state.embeddings.embed(&prefs.embedding_text()).await {
        Ok(v) => (v, state.embeddings.name()),
        Err(e) => {
            tracing::warn!(provider = state.embeddings.name(), "preference embedding failed: {}", e);
            (None, state.embeddings.name())
        }
    }
}

pub async fn recommend_homes(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    user: CurrentUser,
    ValidatedJson(prefs): ValidatedJson<MatchPreferences>,
) -> AppResult<impl IntoResponse> {
    state.rate_limiter.check_endpoint_limit("/matching/homes", ip).await?;
    permissions::require(&user, Permission::HomesView)?;
    let cfg = &state.config.matching;
    let limit = prefs.limit.unwrap_or(cfg.default_limit).min(cfg.max_limit);

    let sql = format!("SELECT {} FROM homes WHERE status = ?1 ORDER BY id", Home::COLUMNS);
    let rows = sqlx::query(&sql).bind(HomeStatus::Active.as_str()).fetch_all(&state.db).await?;
    let homes = rows.iter().map(Home::from_row).collect::<AppResult<Vec<_>>>()?;

    let (embedding, source) = preference_embedding(&state, &prefs).await;
    let ranked = matching::rank(&homes, &prefs, embedding.as_deref(), cfg.semantic_weight, limit);
    Metrics::inc(&state.metrics.matches_computed);
    tracing::debug!(candidates = homes.len(), returned = ranked.len(), semantic = embedding.is_some(), "homes ranked");

    let matches: Vec<_> = ranked
        .into_iter()
        .filter_map(|score| {
            let home = homes.iter().find(|h| h.id == score.home_id)?;
            Some(json!({
                "home": home,
                "fit_score": score.fit_score,
                "rule_score": score.rule_score,
                "semantic_score": score.semantic_score,
                "match_factors": score.match_factors,
            }))
        })
        .collect();

    Ok(Json(json!({
        "matches": matches,
        "candidates": homes.len(),
        "semantic": {
            "enabled": embedding.is_some(),
            "provider": source,
            "weight": cfg.semantic_weight,
        },
    })))
}
