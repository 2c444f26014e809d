use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Version tag of the extraction model that produced this vector
    /// (e.g., "w600k_r50"). Vectors are comparable only within one tag.
    pub model_version: String,
}

impl Embedding {
    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. A zero-norm
    /// operand yields 0.0 rather than dividing by zero.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

/// An enrolled identity with its stored embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: String,
    pub name: String,
    /// Stored enrollment photo, relative to the upload directory.
    pub photo_path: String,
    pub embedding: Embedding,
    pub created_at: String,
}

/// Result of matching a probe embedding against the enrolled gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity of the best candidate [-1, 1].
    pub similarity: f32,
    /// Id of the matched identity (if any).
    pub identity_id: Option<String>,
    /// Name of the matched identity (if any).
    pub identity_name: Option<String>,
}

impl MatchResult {
    fn no_match(similarity: f32) -> Self {
        MatchResult {
            matched: false,
            similarity,
            identity_id: None,
            identity_name: None,
        }
    }
}

/// Strategy for comparing a probe embedding against the enrolled gallery.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[IdentityRecord], threshold: f32)
        -> MatchResult;
}

/// Brute-force cosine similarity matcher.
///
/// Scans the entire gallery on every call. Gallery entries whose
/// model-version tag differs from the probe's are excluded from
/// comparison: similarity across extraction models is meaningless.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[IdentityRecord],
        threshold: f32,
    ) -> MatchResult {
        // Seed below any attainable score so the first comparison wins
        // provisionally. Strict `>` keeps the first-seen entry on ties.
        let mut best_sim = -1.0f32;
        let mut best_idx: Option<usize> = None;

        for (i, record) in gallery.iter().enumerate() {
            if record.embedding.model_version != probe.model_version {
                tracing::warn!(
                    identity = %record.name,
                    stored = %record.embedding.model_version,
                    probe = %probe.model_version,
                    "model version mismatch, excluding from comparison"
                );
                continue;
            }

            let sim = probe.similarity(&record.embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim >= threshold => MatchResult {
                matched: true,
                similarity: best_sim,
                identity_id: Some(gallery[idx].id.clone()),
                identity_name: Some(gallery[idx].name.clone()),
            },
            Some(_) => MatchResult::no_match(best_sim),
            None => MatchResult::no_match(0.0),
        }
    }
}
