use carelink::matching::semantic::HashingEmbeddings;
use carelink::matching::{rank, MatchPreferences};
use carelink::types::{CareLevel, Home, HomeStatus};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

const AMENITIES: &[&str] = &[
    "Memory Care",
    "Medication Management",
    "Physical Therapy",
    "Wheelchair Accessible",
    "Garden",
    "Pet Friendly",
    "Chapel",
    "Library",
    "Fitness Center",
    "Diabetic Meal Plans",
];

fn synthetic_homes(count: usize, embedder: Option<&HashingEmbeddings>) -> Vec<Home> {
    (0..count)
        .map(|i| {
            let amenities: Vec<String> =
                AMENITIES.iter().skip(i % 4).step_by(1 + i % 3).map(|a| a.to_string()).collect();
            let care_levels = match i % 3 {
                0 => vec![CareLevel::Assisted],
                1 => vec![CareLevel::Assisted, CareLevel::MemoryCare],
                _ => vec![CareLevel::Independent],
            };
            let price_min = 2500 + (i as i64 % 20) * 150;
            let name = format!("Home {}", i);
            let embedding = embedder.and_then(|e| e.embed_text(&format!("{} {}", name, amenities.join(" "))));
            Home {
                id: format!("{:08}", i),
                operator_id: "op".to_string(),
                name,
                description: None,
                status: HomeStatus::Active,
                care_levels,
                amenities,
                capacity: 40,
                current_occupancy: (i % 40) as i64,
                price_min: Some(price_min),
                price_max: Some(price_min + 1500),
                city: None,
                state: None,
                zip_code: Some(format!("{:05}", 62700 + i % 50)),
                embedding,
                created_at: String::new(),
                updated_at: String::new(),
            }
        })
        .collect()
}

fn preferences() -> MatchPreferences {
    MatchPreferences {
        budget_min: 3000.0,
        budget_max: 4500.0,
        medical_conditions: vec!["dementia".to_string(), "diabetes".to_string()],
        care_level: "MEMORY_CARE".to_string(),
        hobbies: vec!["gardening".to_string(), "reading".to_string()],
        pet_preferences: Some("HAS_PETS".to_string()),
        zip_code: Some("62701".to_string()),
        ..Default::default()
    }
}

fn bench_rule_only(c: &mut Criterion) {
    let prefs = preferences();
    let mut group = c.benchmark_group("rank_rule_only");
    for count in [100usize, 1_000, 10_000] {
        let homes = synthetic_homes(count, None);
        group.bench_with_input(BenchmarkId::from_parameter(count), &homes, |b, homes| {
            b.iter(|| rank(black_box(homes), black_box(&prefs), None, 0.3, 10))
        });
    }
    group.finish();
}

fn bench_with_embeddings(c: &mut Criterion) {
    let embedder = HashingEmbeddings::new(256);
    let mut prefs = preferences();
    prefs.notes = Some("quiet garden, visits from the family dog".to_string());
    let preference = embedder.embed_text(&prefs.embedding_text());

    let mut group = c.benchmark_group("rank_blended");
    for count in [100usize, 1_000, 10_000] {
        let homes = synthetic_homes(count, Some(&embedder));
        group.bench_with_input(BenchmarkId::from_parameter(count), &homes, |b, homes| {
            b.iter(|| rank(black_box(homes), black_box(&prefs), preference.as_deref(), 0.3, 10))
        });
    }
    group.finish();
}

fn bench_embed_text(c: &mut Criterion) {
    let embedder = HashingEmbeddings::new(256);
    let text = preferences().embedding_text();
    c.bench_function("hashing_embed_preferences", |b| b.iter(|| embedder.embed_text(black_box(&text))));
}

criterion_group!(benches, bench_rule_only, bench_with_embeddings, bench_embed_text);
criterion_main!(benches);
