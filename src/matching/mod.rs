//! Home recommendation scoring.
//!
//! The fit score of a home is a weighted rule score (budget, condition, care
//! level, location, amenities) optionally blended with the cosine similarity
//! between the family's preference embedding and the home's embedding.

pub mod semantic;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::middleware::validation::Validate;
use crate::types::{CareLevel, Home};

pub const WEIGHT_BUDGET: f64 = 0.30;
pub const WEIGHT_CONDITION: f64 = 0.25;
pub const WEIGHT_CARE_LEVEL: f64 = 0.20;
pub const WEIGHT_LOCATION: f64 = 0.15;
pub const WEIGHT_AMENITIES: f64 = 0.10;

/// What a family is looking for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchPreferences {
    pub budget_min: f64,
    pub budget_max: f64,
    #[serde(default)]
    pub medical_conditions: Vec<String>,
    pub care_level: String,
    pub religion: Option<String>,
    #[serde(default)]
    pub dietary_needs: Vec<String>,
    #[serde(default)]
    pub hobbies: Vec<String>,
    /// `HAS_PETS` / `PET_FRIENDLY` require a pet friendly home; any other value is satisfied.
    pub pet_preferences: Option<String>,
    pub zip_code: Option<String>,
    /// Free text folded into the preference embedding.
    pub notes: Option<String>,
    /// Precomputed preference embedding; skips the provider.
    pub embedding: Option<Vec<f32>>,
    pub limit: Option<usize>,
}

impl Validate for MatchPreferences {
    fn validate(&self) -> AppResult<()> {
        if !self.budget_min.is_finite() || !self.budget_max.is_finite() {
            return Err(AppError::validation("budget_min", "budget must be a finite number"));
        }
        if self.budget_min < 0.0 {
            return Err(AppError::validation("budget_min", "must be >= 0"));
        }
        if self.budget_min > self.budget_max {
            return Err(AppError::validation("budget_max", "must be >= budget_min"));
        }
        if self.care_level.trim().is_empty() {
            return Err(AppError::validation("care_level", "must not be empty"));
        }
        if let Some(e) = &self.embedding {
            if e.is_empty() || e.iter().any(|x| !x.is_finite()) {
                return Err(AppError::validation("embedding", "must be a non-empty vector of finite numbers"));
            }
        }
        if self.limit == Some(0) {
            return Err(AppError::validation("limit", "must be >= 1"));
        }
        Ok(())
    }
}

impl MatchPreferences {
    /// Text the embedding provider sees for these preferences.
    pub fn embedding_text(&self) -> String {
        let mut parts: Vec<&str> = vec![self.care_level.as_str()];
        parts.extend(self.medical_conditions.iter().map(String::as_str));
        parts.extend(self.dietary_needs.iter().map(String::as_str));
        parts.extend(self.hobbies.iter().map(String::as_str));
        if let Some(r) = &self.religion {
            parts.push(r);
        }
        if let Some(n) = &self.notes {
            parts.push(n);
        }
        parts.join(" ").replace('_', " ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchFactors {
    pub budget_score: f64,
    pub condition_score: f64,
    pub care_level_score: f64,
    pub location_score: f64,
    pub amenities_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeScore {
    pub home_id: String,
    pub fit_score: f64,
    pub rule_score: f64,
    pub semantic_score: Option<f64>,
    pub match_factors: MatchFactors,
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// 0–100. Homes without a full price range score a neutral 50.
pub fn budget_score(home_min: Option<i64>, home_max: Option<i64>, budget_min: f64, budget_max: f64) -> f64 {
    let (home_min, home_max) = match (home_min, home_max) {
        (Some(lo), Some(hi)) if lo > 0 && hi > 0 => (lo as f64, hi as f64),
        _ => return 50.0,
    };

    if home_min <= budget_max && home_max >= budget_min {
        let budget_range = budget_max - budget_min;
        if budget_range <= 0.0 {
            return 100.0;
        }
        let overlap = home_max.min(budget_max) - home_min.max(budget_min);
        return 70.0 + (overlap / budget_range) * 30.0;
    }

    if home_min > budget_max {
        if budget_max <= 0.0 {
            return 0.0;
        }
        let excess = (home_min - budget_max) / budget_max;
        return if excess < 0.1 {
            60.0
        } else if excess < 0.2 {
            40.0
        } else if excess < 0.3 {
            20.0
        } else {
            0.0
        };
    }

    if home_max < budget_min {
        let deficit = (budget_min - home_max) / budget_min;
        return if deficit < 0.1 {
            65.0
        } else if deficit < 0.2 {
            50.0
        } else if deficit < 0.3 {
            30.0
        } else {
            10.0
        };
    }

    50.0
}

fn condition_features(condition: &str) -> &'static [&'static str] {
    match condition.trim().to_lowercase().as_str() {
        "dementia" => &["Memory Care", "Dementia Care", "Alzheimer's Care", "Secure Unit"],
        "alzheimers" => &["Memory Care", "Alzheimer's Care", "Dementia Care", "Secure Unit"],
        "diabetes" => &["Medication Management", "Diabetic Meal Plans", "Medical Monitoring"],
        "mobility_issues" => &["Wheelchair Accessible", "Physical Therapy", "Grab Bars", "Ramps"],
        "incontinence" => &["Personal Care", "Assisted Bathing", "24/7 Care"],
        "heart_disease" => &["Medical Monitoring", "24/7 Nursing", "Emergency Response"],
        "stroke" => &["Physical Therapy", "Occupational Therapy", "Speech Therapy"],
        "parkinsons" => &["Physical Therapy", "Fall Prevention", "Medication Management"],
        _ => &[],
    }
}

fn has_amenity_like(amenities_lower: &[String], feature: &str) -> bool {
    let feature = feature.to_lowercase();
    amenities_lower.iter().any(|a| a.contains(&feature) || feature.contains(a.as_str()))
}

/// 0–100. Share of the features the conditions call for, plus 20, capped at 100.
pub fn condition_score(amenities: &[String], conditions: &[String]) -> f64 {
    if conditions.is_empty() {
        return 100.0;
    }
    let amenities_lower: Vec<String> = amenities.iter().map(|a| a.to_lowercase()).filter(|a| !a.is_empty()).collect();

    let mut possible = 0usize;
    let mut matched = 0usize;
    for condition in conditions {
        let features = condition_features(condition);
        possible += features.len();
        matched += features.iter().filter(|f| has_amenity_like(&amenities_lower, f)).count();
    }
    if possible == 0 {
        return 100.0;
    }
    (matched as f64 / possible as f64 * 100.0 + 20.0).min(100.0)
}

/// 0–100. Unknown requested level scores 50.
pub fn care_level_score(offered: &[CareLevel], requested: &str) -> f64 {
    let Some(required) = CareLevel::parse_lenient(requested) else {
        return 50.0;
    };
    if offered.contains(&required) {
        100.0
    } else if required == CareLevel::Assisted && offered.contains(&CareLevel::MemoryCare) {
        80.0
    } else if offered.contains(&CareLevel::SkilledNursing) {
        70.0
    } else {
        0.0
    }
}

/// 0–100 from zip codes alone: same zip, same 3-digit area, then numeric area distance.
pub fn location_score(home_zip: Option<&str>, family_zip: Option<&str>) -> f64 {
    let home_zip = home_zip.map(str::trim).filter(|z| !z.is_empty());
    let family_zip = family_zip.map(str::trim).filter(|z| !z.is_empty());
    let (Some(home_zip), Some(family_zip)) = (home_zip, family_zip) else {
        return 50.0;
    };
    if home_zip == family_zip {
        return 100.0;
    }
    let home_prefix: String = home_zip.chars().take(3).collect();
    let family_prefix: String = family_zip.chars().take(3).collect();
    if home_prefix == family_prefix {
        return 80.0;
    }
    let diff = match (home_prefix.parse::<i64>(), family_prefix.parse::<i64>()) {
        (Ok(a), Ok(b)) => (a - b).abs(),
        _ => return 10.0,
    };
    match diff {
        0..=5 => 60.0,
        6..=10 => 40.0,
        11..=20 => 20.0,
        _ => 10.0,
    }
}

/// 0–100 across religion, dietary needs, pets and hobbies; each present factor
/// is worth 25 and the sum is normalised by the number of factors present.
/// Lowercased, trimmed terms; blank entries are dropped since an empty
/// needle matches every amenity.
fn terms(raw: &[String]) -> Vec<String> {
    raw.iter().map(|t| t.trim().to_lowercase()).filter(|t| !t.is_empty()).collect()
}

pub fn amenities_score(amenities: &[String], prefs: &MatchPreferences) -> f64 {
    let lower: Vec<String> = amenities.iter().map(|a| a.to_lowercase()).collect();
    let any = |pred: &dyn Fn(&str) -> bool| lower.iter().any(|a| pred(a));

    let mut score = 0.0;
    let mut factors = 0u32;

    if let Some(religion) = prefs.religion.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        factors += 1;
        let religion = religion.to_lowercase();
        if any(&|a| a.contains(&religion) || a.contains("chaplain") || a.contains("religious")) {
            score += 25.0;
        }
    }

    let diets = terms(&prefs.dietary_needs);
    if !diets.is_empty() {
        factors += 1;
        let hits = diets
            .iter()
            .filter(|diet| any(&|a| a.contains(diet.as_str()) || a.contains("dietary") || a.contains("meal")))
            .count();
        score += hits as f64 / diets.len() as f64 * 25.0;
    }

    if let Some(pets) = prefs.pet_preferences.as_deref().filter(|p| !p.trim().is_empty()) {
        factors += 1;
        let needs_pets = matches!(pets.trim().to_uppercase().as_str(), "HAS_PETS" | "PET_FRIENDLY");
        if !needs_pets || any(&|a| a.contains("pet") || a.contains("animal")) {
            score += 25.0;
        }
    }

    let hobbies = terms(&prefs.hobbies);
    if !hobbies.is_empty() {
        factors += 1;
        let hits = hobbies
            .iter()
            .filter(|hobby| any(&|a| a.contains(hobby.as_str()) || a.contains("activity") || a.contains("recreation")))
            .count();
        score += hits as f64 / hobbies.len() as f64 * 25.0;
    }

    if factors == 0 {
        return 100.0;
    }
    (score / factors as f64 * 4.0).min(100.0)
}

pub fn rule_factors(home: &Home, prefs: &MatchPreferences) -> MatchFactors {
    MatchFactors {
        budget_score: budget_score(home.price_min, home.price_max, prefs.budget_min, prefs.budget_max),
        condition_score: condition_score(&home.amenities, &prefs.medical_conditions),
        care_level_score: care_level_score(&home.care_levels, &prefs.care_level),
        location_score: location_score(home.zip_code.as_deref(), prefs.zip_code.as_deref()),
        amenities_score: amenities_score(&home.amenities, prefs),
    }
}

pub fn weighted_rule_score(f: &MatchFactors) -> f64 {
    f.budget_score * WEIGHT_BUDGET
        + f.condition_score * WEIGHT_CONDITION
        + f.care_level_score * WEIGHT_CARE_LEVEL
        + f.location_score * WEIGHT_LOCATION
        + f.amenities_score * WEIGHT_AMENITIES
}

/// `rule·(1−w) + semantic·w`, or the rule score alone without a semantic score.
pub fn combine(rule: f64, semantic: Option<f64>, semantic_weight: f64) -> f64 {
    match semantic {
        Some(s) => {
            let w = semantic_weight.clamp(0.0, 1.0);
            rule * (1.0 - w) + s * w
        }
        None => rule,
    }
}

pub fn score_home(
    home: &Home,
    prefs: &MatchPreferences,
    preference_embedding: Option<&[f32]>,
    semantic_weight: f64,
) -> HomeScore {
    let factors = rule_factors(home, prefs);
    let rule = weighted_rule_score(&factors);
    let semantic = match (preference_embedding, home.embedding.as_deref()) {
        (Some(p), Some(h)) => semantic::semantic_score(p, h),
        _ => None,
    };
    HomeScore {
        home_id: home.id.clone(),
        fit_score: round2(combine(rule, semantic, semantic_weight)),
        rule_score: round2(rule),
        semantic_score: semantic.map(round2),
        match_factors: MatchFactors {
            budget_score: round2(factors.budget_score),
            condition_score: round2(factors.condition_score),
            care_level_score: round2(factors.care_level_score),
            location_score: round2(factors.location_score),
            amenities_score: round2(factors.amenities_score),
        },
    }
}

/// Scores every home and keeps the best `limit`, highest fit first, ties by home id.
pub fn rank(
    homes: &[Home],
    prefs: &MatchPreferences,
    preference_embedding: Option<&[f32]>,
    semantic_weight: f64,
    limit: usize,
) -> Vec<HomeScore> {
    let mut scored: Vec<HomeScore> = homes
        .iter()
        .map(|h| score_home(h, prefs, preference_embedding, semantic_weight))
        .collect();
    scored.sort_by(|a, b| b.fit_score.total_cmp(&a.fit_score).then_with(|| a.home_id.cmp(&b.home_id)));
    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HomeStatus;

    fn home(id: &str) -> Home {
        Home {
            id: id.to_string(),
            operator_id: "op".to_string(),
            name: format!("Home {}", id),
            description: None,
            status: HomeStatus::Active,
            care_levels: vec![CareLevel::Assisted],
            amenities: vec![],
            capacity: 10,
            current_occupancy: 0,
            price_min: Some(3000),
            price_max: Some(5000),
            city: None,
            state: None,
            zip_code: Some("94110".to_string()),
            embedding: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn prefs() -> MatchPreferences {
        MatchPreferences {
            budget_min: 3000.0,
            budget_max: 5000.0,
            care_level: "ASSISTED".to_string(),
            zip_code: Some("94110".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn budget_bands() {
        assert_eq!(budget_score(None, Some(4000), 3000.0, 5000.0), 50.0);
        assert_eq!(budget_score(Some(0), Some(4000), 3000.0, 5000.0), 50.0);
        assert_eq!(budget_score(Some(3000), Some(5000), 3000.0, 5000.0), 100.0);
        assert_eq!(budget_score(Some(4000), Some(6000), 3000.0, 5000.0), 85.0);
        assert_eq!(budget_score(Some(4000), Some(4000), 4000.0, 4000.0), 100.0);
        // too expensive
        assert_eq!(budget_score(Some(5400), Some(6000), 3000.0, 5000.0), 60.0);
        assert_eq!(budget_score(Some(5900), Some(6000), 3000.0, 5000.0), 40.0);
        assert_eq!(budget_score(Some(6400), Some(7000), 3000.0, 5000.0), 20.0);
        assert_eq!(budget_score(Some(9000), Some(9500), 3000.0, 5000.0), 0.0);
        // cheaper
        assert_eq!(budget_score(Some(2000), Some(2800), 3000.0, 5000.0), 65.0);
        assert_eq!(budget_score(Some(2000), Some(2500), 3000.0, 5000.0), 50.0);
        assert_eq!(budget_score(Some(1500), Some(2200), 3000.0, 5000.0), 30.0);
        assert_eq!(budget_score(Some(1000), Some(1500), 3000.0, 5000.0), 10.0);
    }

    #[test]
    fn condition_matching() {
        let amenities = vec!["Memory Care".to_string(), "Secure Unit".to_string()];
        assert_eq!(condition_score(&amenities, &[]), 100.0);
        assert_eq!(condition_score(&amenities, &["unknown".to_string()]), 100.0);
        // dementia: 2 of 4 features
        assert_eq!(condition_score(&amenities, &["Dementia".to_string()]), 70.0);
        // 4 of 4 caps at 100
        let full = vec![
            "memory care".to_string(),
            "dementia care".to_string(),
            "alzheimer's care".to_string(),
            "secure unit".to_string(),
        ];
        assert_eq!(condition_score(&full, &["dementia".to_string()]), 100.0);
        assert_eq!(condition_score(&[], &["stroke".to_string()]), 20.0);
    }

    #[test]
    fn care_level_compatibility() {
        use CareLevel::*;
        assert_eq!(care_level_score(&[Assisted], "ASSISTED_LIVING"), 100.0);
        assert_eq!(care_level_score(&[MemoryCare], "ASSISTED"), 80.0);
        assert_eq!(care_level_score(&[SkilledNursing], "INDEPENDENT"), 70.0);
        assert_eq!(care_level_score(&[Independent], "MEMORY_CARE"), 0.0);
        assert_eq!(care_level_score(&[Independent], "HOSPICE"), 50.0);
    }

    #[test]
    fn location_by_zip() {
        assert_eq!(location_score(None, Some("94110")), 50.0);
        assert_eq!(location_score(Some("94110"), None), 50.0);
        assert_eq!(location_score(Some("94110"), Some("94110")), 100.0);
        assert_eq!(location_score(Some("94115"), Some("94110")), 80.0);
        assert_eq!(location_score(Some("94615"), Some("94110")), 60.0);
        assert_eq!(location_score(Some("95110"), Some("94110")), 40.0);
        assert_eq!(location_score(Some("95610"), Some("94110")), 20.0);
        assert_eq!(location_score(Some("10001"), Some("94110")), 10.0);
        assert_eq!(location_score(Some("SW1A"), Some("94110")), 10.0);
    }

    #[test]
    fn amenities_factors() {
        let mut p = prefs();
        assert_eq!(amenities_score(&[], &p), 100.0);

        p.religion = Some("Catholic".to_string());
        p.pet_preferences = Some("HAS_PETS".to_string());
        let amenities = vec!["Chaplain on site".to_string()];
        // religion hit, pets miss
        assert_eq!(amenities_score(&amenities, &p), 50.0);

        p.pet_preferences = Some("NO_PETS".to_string());
        assert_eq!(amenities_score(&amenities, &p), 100.0);

        p.hobbies = vec!["gardening".to_string(), "chess".to_string()];
        // 25 + 25 + 12.5 over 3 factors
        let s = amenities_score(&vec!["Chaplain".to_string(), "Gardening club".to_string()], &p);
        assert!((s - 83.333).abs() < 0.01, "{}", s);
    }

    #[test]
    fn blank_terms_are_ignored() {
        let mut p = prefs();
        p.dietary_needs = vec!["  ".to_string(), String::new()];
        p.hobbies = vec![String::new()];
        let amenities = vec!["Pool".to_string()];
        // no usable terms, so neither factor counts
        assert_eq!(amenities_score(&amenities, &p), 100.0);

        p.religion = Some("Jewish".to_string());
        assert_eq!(amenities_score(&amenities, &p), 0.0);

        p.dietary_needs = vec!["kosher".to_string(), " ".to_string()];
        // the blank entry neither matches nor dilutes the kosher miss
        assert_eq!(amenities_score(&amenities, &p), 0.0);
        assert_eq!(amenities_score(&vec!["Kosher kitchen".to_string()], &p), 50.0);
    }

    #[test]
    fn perfect_home_scores_100() {
        let s = score_home(&home("a"), &prefs(), None, 0.3);
        assert_eq!(s.rule_score, 100.0);
        assert_eq!(s.fit_score, 100.0);
        assert_eq!(s.semantic_score, None);
    }

    #[test]
    fn semantic_blend() {
        assert_eq!(combine(80.0, None, 0.3), 80.0);
        assert!((combine(80.0, Some(50.0), 0.3) - 71.0).abs() < 1e-9);
        assert_eq!(combine(80.0, Some(50.0), 0.0), 80.0);
        assert_eq!(combine(80.0, Some(50.0), 1.0), 50.0);

        let mut h = home("a");
        h.embedding = Some(vec![1.0, 0.0]);
        let s = score_home(&h, &prefs(), Some(&[0.0, 1.0]), 0.5);
        assert_eq!(s.semantic_score, Some(0.0));
        assert_eq!(s.fit_score, 50.0);

        // dimension mismatch falls back to rule score
        let s = score_home(&h, &prefs(), Some(&[1.0, 0.0, 0.0]), 0.5);
        assert_eq!(s.semantic_score, None);
        assert_eq!(s.fit_score, 100.0);
    }

    #[test]
    fn rank_orders_by_score_then_id() {
        let mut far = home("c");
        far.zip_code = Some("10001".to_string());
        let homes = vec![far, home("b"), home("a")];
        let ranked = rank(&homes, &prefs(), None, 0.3, 10);
        let ids: Vec<&str> = ranked.iter().map(|s| s.home_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(rank(&homes, &prefs(), None, 0.3, 1).len(), 1);
    }
}
