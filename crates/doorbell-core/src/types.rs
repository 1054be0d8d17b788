use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw detector output in frame coordinates, before clipping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Axis-aligned face rectangle in frame pixels, clipped to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
}

impl FaceRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32, confidence: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
        }
    }

    /// Clip a raw detection to a `frame_width` × `frame_height` frame.
    ///
    /// Returns `None` when nothing of the box remains inside the frame.
    pub fn clip(bbox: &BoundingBox, frame_width: u32, frame_height: u32) -> Option<Self> {
        let x = bbox.x.max(0.0).floor() as u32;
        let y = bbox.y.max(0.0).floor() as u32;
        if x >= frame_width || y >= frame_height {
            return None;
        }
        let w = (bbox.width.max(0.0) as u32).min(frame_width - x);
        let h = (bbox.height.max(0.0) as u32).min(frame_height - y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Self::new(x, y, w, h, bbox.confidence))
    }

    pub fn center(&self) -> (f32, f32) {
        (
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }

    pub fn area(&self) -> f32 {
        self.width as f32 * self.height as f32
    }

    /// Length of the shorter side.
    pub fn min_side(&self) -> u32 {
        self.width.min(self.height)
    }
}

/// Guards the division in [`Embedding::new`] for near-zero vectors.
const NORM_EPSILON: f32 = 1e-9;

/// L2-normalized face embedding vector.
///
/// Serialized as a bare JSON array so person records stay readable.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Build an embedding from raw model output, normalizing to unit length.
    pub fn new(raw: Vec<f32>) -> Self {
        Self {
            values: normalize(raw),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Cosine similarity in [-1, 1], or `None` when the lengths differ or
    /// either side is empty.
    pub fn similarity(&self, other: &Embedding) -> Option<f32> {
        if self.values.len() != other.values.len() || self.values.is_empty() {
            return None;
        }

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        Some(if denom > 0.0 { dot / denom } else { 0.0 })
    }

    /// Fold a fresh capture into a stored embedding.
    ///
    /// Equal lengths average the two vectors and re-normalize; a length
    /// change (new model) or an empty stored vector replaces outright.
    pub fn merge(&self, fresh: &Embedding) -> Embedding {
        let fresh = Embedding::new(fresh.values.clone());
        if self.values.is_empty() || self.values.len() != fresh.values.len() {
            return fresh;
        }
        let averaged = self
            .values
            .iter()
            .zip(fresh.values.iter())
            .map(|(a, b)| (a + b) / 2.0)
            .collect();
        Embedding::new(averaged)
    }
}

/// Divide by the L2 norm. A zero vector stays zero.
pub fn normalize(mut values: Vec<f32>) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > NORM_EPSILON {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
    values
}

/// Category an enrolled person belongs to; drives auto-unlock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PersonGroup {
    Owner,
    Family,
    Friend,
    Other(String),
}

impl PersonGroup {
    pub fn as_str(&self) -> &str {
        match self {
            PersonGroup::Owner => "owner",
            PersonGroup::Family => "family",
            PersonGroup::Friend => "friend",
            PersonGroup::Other(s) => s,
        }
    }
}

impl Default for PersonGroup {
    fn default() -> Self {
        PersonGroup::Friend
    }
}

impl From<&str> for PersonGroup {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => PersonGroup::Owner,
            "family" => PersonGroup::Family,
            "friend" => PersonGroup::Friend,
            other => PersonGroup::Other(other.to_string()),
        }
    }
}

impl From<String> for PersonGroup {
    fn from(s: String) -> Self {
        PersonGroup::from(s.as_str())
    }
}

impl From<PersonGroup> for String {
    fn from(g: PersonGroup) -> Self {
        g.as_str().to_string()
    }
}

impl fmt::Display for PersonGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An enrolled person, as held by the person store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    /// Short zero-padded code ("001"), assigned in increasing order.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub group: PersonGroup,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub embedding: Embedding,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// Outcome of matching a probe embedding against the enrolled people.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Best-scoring person, if any person had a comparable embedding.
    pub person: Option<Person>,
    /// Cosine similarity of the best match, or [`NO_CANDIDATES`].
    pub similarity: f32,
    /// Number of people whose embedding length matched the probe.
    pub candidates: usize,
}

/// Similarity reported when no enrolled embedding could be compared.
pub const NO_CANDIDATES: f32 = -1.0;

impl MatchResult {
    /// False when nobody was comparable, as opposed to a low-similarity miss.
    pub fn has_candidates(&self) -> bool {
        self.candidates > 0
    }
}

/// Strategy for comparing a probe embedding against the enrolled people.
pub trait Matcher {
    fn best_match(&self, probe: &Embedding, people: &[Person]) -> MatchResult;
}

/// Cosine similarity matcher. People whose embedding length differs from
/// the probe are skipped; ties resolve to the earliest-listed person.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn best_match(&self, probe: &Embedding, people: &[Person]) -> MatchResult {
        let mut best_sim = NO_CANDIDATES;
        let mut best_idx: Option<usize> = None;
        let mut candidates = 0usize;

        for (i, person) in people.iter().enumerate() {
            let Some(sim) = probe.similarity(&person.embedding) else {
                continue;
            };
            candidates += 1;
            if best_idx.is_none() || sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        MatchResult {
            person: best_idx.map(|idx| people[idx].clone()),
            similarity: best_sim,
            candidates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(id: &str, values: Vec<f32>) -> Person {
        Person {
            id: id.into(),
            name: format!("person-{id}"),
            group: PersonGroup::Friend,
            note: String::new(),
            embedding: Embedding::new(values),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_normalize_unit_length() {
        let e = Embedding::new(vec![3.0, 4.0, 12.0]);
        assert!((e.norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_idempotent() {
        let once = Embedding::new(vec![0.3, -1.7, 2.2, 9.0]);
        let twice = Embedding::new(once.values.clone());
        for (a, b) in once.values.iter().zip(twice.values.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_normalize_zero_vector() {
        let e = Embedding::new(vec![0.0, 0.0]);
        assert_eq!(e.values, vec![0.0, 0.0]);
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&a).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!(a.similarity(&b).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![-1.0, 0.0]);
        assert!((a.similarity(&b).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_length_mismatch() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!(a.similarity(&b).is_none());
    }

    #[test]
    fn test_merge_same_length_averages() {
        let stored = Embedding::new(vec![1.0, 0.0]);
        let fresh = Embedding::new(vec![0.0, 1.0]);
        let merged = stored.merge(&fresh);
        let expected = std::f32::consts::FRAC_1_SQRT_2;
        assert_eq!(merged.len(), 2);
        assert!((merged.values[0] - expected).abs() < 1e-6);
        assert!((merged.values[1] - expected).abs() < 1e-6);
        assert!((merged.norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_merge_length_change_replaces() {
        let stored = Embedding::new(vec![1.0, 0.0]);
        let fresh = Embedding::new(vec![0.0, 0.0, 2.0]);
        let merged = stored.merge(&fresh);
        assert_eq!(merged.values, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_merge_into_empty_replaces() {
        let merged = Embedding::default().merge(&Embedding::new(vec![2.0, 0.0]));
        assert_eq!(merged.values, vec![1.0, 0.0]);
    }

    #[test]
    fn test_group_roundtrip_strings() {
        assert_eq!(PersonGroup::from("Owner"), PersonGroup::Owner);
        assert_eq!(PersonGroup::from("courier"), PersonGroup::Other("courier".into()));
        assert_eq!(String::from(PersonGroup::Family), "family");
    }

    #[test]
    fn test_clip_region() {
        let bbox = BoundingBox {
            x: -10.0, y: 5.0, width: 50.0, height: 500.0,
            confidence: 0.9, landmarks: None,
        };
        let region = FaceRegion::clip(&bbox, 100, 100).unwrap();
        assert_eq!((region.x, region.y, region.width, region.height), (0, 5, 50, 95));
    }

    #[test]
    fn test_clip_region_outside() {
        let bbox = BoundingBox {
            x: 120.0, y: 5.0, width: 50.0, height: 50.0,
            confidence: 0.9, landmarks: None,
        };
        assert!(FaceRegion::clip(&bbox, 100, 100).is_none());
    }

    #[test]
    fn test_cosine_matcher_scans_every_candidate() {
        // Best match is the last entry; all entries must be compared.
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let people = vec![
            person("001", vec![0.0, 1.0, 0.0]),
            person("002", vec![0.0, 0.0, 1.0]),
            person("003", vec![1.0, 0.0, 0.0]),
        ];

        let result = CosineMatcher.best_match(&probe, &people);
        assert_eq!(result.person.as_ref().map(|p| p.id.as_str()), Some("003"));
        assert!((result.similarity - 1.0).abs() < 1e-6);
        assert_eq!(result.candidates, 3);
    }

    #[test]
    fn test_matcher_own_embedding_selects_self() {
        let people = vec![
            person("001", vec![0.2, 0.9, 0.1]),
            person("002", vec![0.7, 0.1, 0.7]),
        ];
        let result = CosineMatcher.best_match(&people[1].embedding, &people);
        assert_eq!(result.person.unwrap().id, "002");
        assert!((result.similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_matcher_tie_prefers_first() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let people = vec![person("001", vec![1.0, 0.0]), person("002", vec![1.0, 0.0])];
        let result = CosineMatcher.best_match(&probe, &people);
        assert_eq!(result.person.unwrap().id, "001");
    }

    #[test]
    fn test_matcher_skips_incompatible_lengths() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let people = vec![
            person("001", vec![1.0, 0.0, 0.0]),
            person("002", vec![0.0, 1.0]),
        ];
        let result = CosineMatcher.best_match(&probe, &people);
        assert_eq!(result.person.unwrap().id, "002");
        assert_eq!(result.candidates, 1);
        assert!(result.similarity.abs() < 1e-6);
    }

    #[test]
    fn test_matcher_no_candidates_sentinel() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let people = vec![person("001", vec![1.0, 0.0, 0.0])];
        let result = CosineMatcher.best_match(&probe, &people);
        assert!(result.person.is_none());
        assert!(!result.has_candidates());
        assert_eq!(result.similarity, NO_CANDIDATES);
    }

    #[test]
    fn test_matcher_empty_gallery() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let result = CosineMatcher.best_match(&probe, &[]);
        assert!(result.person.is_none());
        assert_eq!(result.similarity, NO_CANDIDATES);
    }

    #[test]
    fn test_matcher_negative_similarity_is_genuine() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let people = vec![person("001", vec![-1.0, 0.0])];
        let result = CosineMatcher.best_match(&probe, &people);
        assert!(result.has_candidates());
        assert!((result.similarity + 1.0).abs() < 1e-6);
    }
}
