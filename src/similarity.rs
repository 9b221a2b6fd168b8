use async_trait::async_trait;
use futures::try_join;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::Config;
use crate::error::{ApiError, ApiResult};

const EMBED_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/text-embedding-004:embedContent";
const EMBED_MODEL: &str = "models/text-embedding-004";
const EMBED_TIMEOUT: Duration = Duration::from_secs(20);

/// Turns a text into a fixed-length dense vector. The production
/// implementation calls a remote model; tests plug in deterministic stubs.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> ApiResult<Vec<f32>>;
}

pub struct GeminiEmbedder {
    http: reqwest::Client,
    api_key: String,
}

impl GeminiEmbedder {
    pub fn new(http: reqwest::Client, api_key: String) -> Self {
        Self { http, api_key }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    content: EmbedContent<'a>,
}

#[derive(Serialize)]
struct EmbedContent<'a> {
    parts: Vec<EmbedPart<'a>>,
}

#[derive(Serialize)]
struct EmbedPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: EmbedValues,
}

#[derive(Deserialize)]
struct EmbedValues {
    values: Vec<f32>,
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str) -> ApiResult<Vec<f32>> {
        let request = EmbedRequest {
            model: EMBED_MODEL,
            content: EmbedContent {
                parts: vec![EmbedPart { text }],
            },
        };
        let response = self
            .http
            .post(EMBED_URL)
            .timeout(EMBED_TIMEOUT)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::external("embedding", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(400).collect();
            return Err(ApiError::external(
                "embedding",
                format!("{status}: {snippet}"),
            ));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| ApiError::external("embedding", e))?;
        Ok(parsed.embedding.values)
    }
}

/// Bounded similarity over a pluggable embedder.
pub struct SimilarityEngine {
    embedder: Arc<dyn Embedder>,
}

impl SimilarityEngine {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    /// Similarity in [0, 1] between two texts. Each text is embedded exactly
    /// once, the two embeddings concurrently; an embedding failure
    /// propagates instead of degrading to a zero score.
    pub async fn score(&self, text_a: &str, text_b: &str) -> ApiResult<f64> {
        let (a, b) = try_join!(self.embedder.embed(text_a), self.embedder.embed(text_b))?;
        Ok(cosine_similarity(&a, &b))
    }
}

static ENGINE: OnceCell<SimilarityEngine> = OnceCell::const_new();

/// Process-lifetime engine. The first caller runs the initialization (client
/// construction plus a probe embedding that exercises the credential);
/// concurrent callers await that same in-flight initialization instead of
/// starting their own. `main` awaits this at startup and exits on failure.
pub async fn shared_engine(config: &Config) -> ApiResult<&'static SimilarityEngine> {
    ENGINE
        .get_or_try_init(|| async {
            let embedder = GeminiEmbedder::new(reqwest::Client::new(), config.gemini_api_key.clone());
            let probe = embedder.embed("warm-up").await?;
            info!(dimensions = probe.len(), "embedding capability initialized");
            Ok(SimilarityEngine::new(Arc::new(embedder)))
        })
        .await
}

/// Cosine similarity clamped into [0, 1]. Zero-magnitude or
/// length-mismatched vectors are degenerate inputs scoring 0, not errors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let mag_a = a.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();
    let mag_b = b.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    (dot / (mag_a * mag_b)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic letter-frequency embedding, good enough to give related
    /// texts higher cosine than unrelated ones.
    struct BagOfLetters {
        calls: AtomicUsize,
    }

    impl BagOfLetters {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for BagOfLetters {
        async fn embed(&self, text: &str) -> ApiResult<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut v = vec![0.0f32; 26];
            for c in text.chars().filter(|c| c.is_ascii_alphabetic()) {
                v[(c.to_ascii_lowercase() as usize) - ('a' as usize)] += 1.0;
            }
            Ok(v)
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> ApiResult<Vec<f32>> {
            Err(ApiError::external("embedding", "model offline"))
        }
    }

    #[test]
    fn identical_vectors_score_one() {
        let v = [1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn zero_vector_is_degenerate_not_an_error() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn mismatched_lengths_are_degenerate() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn opposite_vectors_clamp_to_zero() {
        assert_eq!(cosine_similarity(&[1.0, 1.0], &[-1.0, -1.0]), 0.0);
    }

    #[tokio::test]
    async fn score_embeds_each_text_exactly_once() {
        let embedder = Arc::new(BagOfLetters::new());
        let engine = SimilarityEngine::new(embedder.clone());
        engine.score("save for a laptop", "buy a boat").await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn self_similarity_dominates_unrelated_text() {
        let engine = SimilarityEngine::new(Arc::new(BagOfLetters::new()));
        let same = engine
            .score("save for a laptop", "save for a laptop")
            .await
            .unwrap();
        let other = engine.score("save for a laptop", "zzz qqq").await.unwrap();
        assert!((0.0..=1.0).contains(&same));
        assert!((0.0..=1.0).contains(&other));
        assert!(same >= other);
    }

    #[tokio::test]
    async fn embedding_failure_propagates_instead_of_scoring_zero() {
        let engine = SimilarityEngine::new(Arc::new(FailingEmbedder));
        let result = engine.score("a", "b").await;
        assert!(matches!(result, Err(ApiError::External { .. })));
    }
}
