//! Embedding similarity for the semantic half of the fit score.

use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use crate::config::MatchingConfig;

/// Cosine similarity mapped to a 0–100 score.
///
/// `None` when either vector is empty, the dimensions differ, or a norm is zero.
/// Negative similarity is clamped to 0.
pub fn semantic_score(a: &[f32], b: &[f32]) -> Option<f64> {
    cosine_similarity(a, b).map(|c| c.clamp(0.0, 1.0) * 100.0)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 || !dot.is_finite() {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Turns free text into a vector comparable with stored home embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means the provider has nothing to offer for this text.
    async fn embed(&self, text: &str) -> anyhow::Result<Option<Vec<f32>>>;
}

/// Provider used when semantic matching is switched off.
pub struct DisabledEmbeddings;

#[async_trait]
impl EmbeddingProvider for DisabledEmbeddings {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn embed(&self, _text: &str) -> anyhow::Result<Option<Vec<f32>>> {
        Ok(None)
    }
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "for", "from", "has", "have", "in", "is", "it", "of", "on", "or",
    "that", "the", "to", "with", "we", "our", "she", "he", "her", "his", "they",
];

/// Local feature-hashing bag of words: each token lands in one signed bucket,
/// then the vector is L2-normalised. Stable across processes and builds.
pub struct HashingEmbeddings {
    dims: usize,
}

impl HashingEmbeddings {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_text(&self, text: &str) -> Option<Vec<f32>> {
        let mut v = vec![0.0f32; self.dims];
        let mut any = false;
        for token in tokenize(text) {
            let h = fnv1a(token.as_bytes());
            let idx = (h % self.dims as u64) as usize;
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
            any = true;
        }
        if !any {
            return None;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return None;
        }
        v.iter_mut().for_each(|x| *x /= norm);
        Some(v)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddings {
    fn name(&self) -> &'static str {
        "hashing"
    }

    async fn embed(&self, text: &str) -> anyhow::Result<Option<Vec<f32>>> {
        Ok(self.embed_text(text))
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|t| t.len() >= 2 && !STOPWORDS.contains(&t.as_str()))
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Memoises another provider's vectors by exact input text.
pub struct CachedEmbeddings {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl CachedEmbeddings {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { inner, cache: Mutex::new(LruCache::new(capacity)) }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbeddings {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn embed(&self, text: &str) -> anyhow::Result<Option<Vec<f32>>> {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(text) {
                return Ok(Some(hit.clone()));
            }
        }
        let fresh = self.inner.embed(text).await?;
        if let Some(v) = &fresh {
            if let Ok(mut cache) = self.cache.lock() {
                cache.put(text.to_string(), v.clone());
            }
        }
        Ok(fresh)
    }
}

/// Builds the provider named in `[matching]`, wrapped in the LRU cache.
pub fn provider_from_config(cfg: &MatchingConfig) -> Arc<dyn EmbeddingProvider> {
    match cfg.embedding_provider.as_str() {
        "hashing" => Arc::new(CachedEmbeddings::new(
            Arc::new(HashingEmbeddings::new(cfg.embedding_dims)),
            cfg.embedding_cache_size,
        )),
        _ => Arc::new(DisabledEmbeddings),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), None);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), None);
        let same = cosine_similarity(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]).expect("parallel vectors");
        assert!((same - 1.0).abs() < 1e-9);
    }

    #[test]
    fn semantic_score_clamps_negative_similarity() {
        assert_eq!(semantic_score(&[1.0, 0.0], &[-1.0, 0.0]), Some(0.0));
        let orthogonal = semantic_score(&[1.0, 0.0], &[0.0, 1.0]).expect("orthogonal");
        assert!(orthogonal.abs() < 1e-9);
        let full = semantic_score(&[0.5, 0.5], &[0.5, 0.5]).expect("identical");
        assert!((full - 100.0).abs() < 1e-9);
    }

    #[test]
    fn hashing_embeddings_are_deterministic_and_normalised() {
        let p = HashingEmbeddings::new(64);
        let a = p.embed_text("Memory care with a secure garden").expect("tokens");
        let b = p.embed_text("memory CARE with a secure garden!").expect("tokens");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(p.embed_text("a an the").is_none());
    }

    #[test]
    fn related_text_scores_higher_than_unrelated() {
        let p = HashingEmbeddings::new(256);
        let pref = p.embed_text("dementia memory care secure unit garden").expect("pref");
        let close = p.embed_text("secure memory care unit with garden walks").expect("close");
        let far = p.embed_text("golf course tennis swimming pool").expect("far");
        let close_score = semantic_score(&pref, &close).unwrap_or(0.0);
        let far_score = semantic_score(&pref, &far).unwrap_or(0.0);
        assert!(close_score > far_score, "{} <= {}", close_score, far_score);
    }

    struct CountingProvider(AtomicUsize);

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn embed(&self, _text: &str) -> anyhow::Result<Option<Vec<f32>>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Some(vec![1.0, 0.0]))
        }
    }

    #[tokio::test]
    async fn cache_serves_repeated_text() {
        let inner = Arc::new(CountingProvider(AtomicUsize::new(0)));
        let cached = CachedEmbeddings::new(inner.clone(), 2);
        cached.embed("one").await.expect("embed");
        cached.embed("one").await.expect("embed");
        assert_eq!(inner.0.load(Ordering::SeqCst), 1);
        cached.embed("two").await.expect("embed");
        cached.embed("three").await.expect("embed");
        assert_eq!(cached.cached_len(), 2);
        cached.embed("one").await.expect("embed");
        assert_eq!(inner.0.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn disabled_provider_yields_nothing() {
        assert!(DisabledEmbeddings.embed("anything").await.expect("embed").is_none());
    }
}
