use serde::{Deserialize, Serialize};

/// A face found by the external detector, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl Detection {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }
}

/// Face embedding vector produced by the external embedder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Scale to unit length. A zero vector is returned unchanged.
    pub fn l2_normalized(self) -> Self {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            Self {
                values: self.values.iter().map(|x| x / norm).collect(),
            }
        } else {
            self
        }
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. For two unit
    /// vectors this equals the plain dot product.
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

/// One enrolled identity in the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub person_name: String,
    pub embedding: Embedding,
    /// True once `embedding` has been scaled to unit length.
    pub normalized: bool,
}

impl GalleryEntry {
    /// Build an entry, normalizing the embedding on the way in.
    pub fn new(person_name: impl Into<String>, embedding: Embedding) -> Self {
        Self {
            person_name: person_name.into(),
            embedding: embedding.l2_normalized(),
            normalized: true,
        }
    }
}

/// Why a recognition attempt ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionReason {
    NoFaces,
    NoMatch,
    Matched,
}

/// Outcome of one recognition attempt over a whole frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub matched: bool,
    pub person_name: Option<String>,
    /// Similarity of the accepted match.
    pub confidence: Option<f32>,
    pub reason: RecognitionReason,
    /// Number of faces the detector reported.
    pub faces: usize,
}

impl RecognitionResult {
    pub fn no_faces() -> Self {
        Self {
            matched: false,
            person_name: None,
            confidence: None,
            reason: RecognitionReason::NoFaces,
            faces: 0,
        }
    }

    pub fn no_match(faces: usize) -> Self {
        Self {
            matched: false,
            person_name: None,
            confidence: None,
            reason: RecognitionReason::NoMatch,
            faces,
        }
    }

    pub fn matched(person_name: String, confidence: f32, faces: usize) -> Self {
        Self {
            matched: true,
            person_name: Some(person_name),
            confidence: Some(confidence),
            reason: RecognitionReason::Matched,
            faces,
        }
    }
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity of the best entry [-1, 1], matched or not.
    pub similarity: f32,
    /// Index of the matched gallery entry (if any).
    pub index: Option<usize>,
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchResult;
}

/// Cosine similarity matcher.
///
/// Always iterates ALL gallery entries. A match requires a similarity
/// strictly greater than the threshold; ties keep the earliest entry.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchResult {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.iter().enumerate() {
            if entry.embedding.dim() != probe.dim() {
                continue;
            }
            let sim = probe.similarity(&entry.embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim > threshold => MatchResult {
                matched: true,
                similarity: best_sim,
                index: Some(idx),
            },
            _ => MatchResult {
                matched: false,
                similarity: if best_sim == f32::NEG_INFINITY { 0.0 } else { best_sim },
                index: None,
            },
        }
    }
}
