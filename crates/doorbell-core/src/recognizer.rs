//! Detect → embed → match, composed over the resolved backends.
//!
//! Every backend failure is absorbed here: the caller only ever sees
//! `None` for "no face" or "no embedding".

use crate::backend::Backend;
use crate::detector::FaceDetect;
use crate::embedder::FaceEmbed;
use crate::frame::Frame;
use crate::types::{BoundingBox, CosineMatcher, Embedding, FaceRegion, MatchResult, Matcher, Person};

pub type DetectorBackend = Backend<Box<dyn FaceDetect>>;
pub type EmbedderBackend = Backend<Box<dyn FaceEmbed>>;

/// Output of [`Recognizer::extract`].
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub embedding: Option<Embedding>,
    pub region: Option<FaceRegion>,
    /// Pixels of `region`, kept even when embedding failed.
    pub crop: Option<Frame>,
}

pub struct Recognizer {
    detector: DetectorBackend,
    embedder: EmbedderBackend,
    matcher: Box<dyn Matcher + Send>,
    min_confidence: f32,
}

impl Recognizer {
    pub fn new(detector: DetectorBackend, embedder: EmbedderBackend, min_confidence: f32) -> Self {
        Self {
            detector,
            embedder,
            matcher: Box::new(CosineMatcher),
            min_confidence,
        }
    }

    /// `(detector, embedder)` backend labels for status reporting.
    pub fn backend_kinds(&self) -> (&'static str, &'static str) {
        (self.detector.kind(), self.embedder.kind())
    }

    /// Most confident face in `frame`, clipped to its bounds.
    pub fn detect(&mut self, frame: &Frame) -> Option<FaceRegion> {
        if frame.is_empty() {
            return None;
        }
        let detector = self.detector.get_mut()?;
        let faces = match detector.detect(frame) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed");
                return None;
            }
        };

        let mut best: Option<&BoundingBox> = None;
        for face in faces.iter().filter(|f| f.confidence >= self.min_confidence) {
            match best {
                Some(b) if face.confidence <= b.confidence => {}
                _ => best = Some(face),
            }
        }

        let best = best?;
        let region = FaceRegion::clip(best, frame.width, frame.height);
        if region.is_none() {
            tracing::debug!(confidence = best.confidence, "detected face fell outside the frame");
        }
        region
    }

    /// Unit-length embedding of a face crop.
    pub fn embed(&mut self, face: &Frame) -> Option<Embedding> {
        if face.is_empty() {
            return None;
        }
        let embedder = self.embedder.get_mut()?;
        match embedder.embed(face) {
            Ok(raw) => Some(Embedding::new(raw)),
            Err(e) => {
                tracing::warn!(error = %e, "face embedding failed");
                None
            }
        }
    }

    pub fn extract(&mut self, frame: &Frame) -> Extraction {
        let Some(region) = self.detect(frame) else {
            return Extraction::default();
        };
        let crop = frame.crop(&region);
        if crop.is_empty() {
            return Extraction::default();
        }
        let embedding = self.embed(&crop);
        Extraction {
            embedding,
            region: Some(region),
            crop: Some(crop),
        }
    }

    pub fn match_people(&self, embedding: &Embedding, people: &[Person]) -> MatchResult {
        self.matcher.best_match(embedding, people)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorError;
    use crate::embedder::RecognizerError;
    use crate::types::PersonGroup;

    struct FixedDetector(Vec<BoundingBox>);

    impl FaceDetect for FixedDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    struct FailingDetector;

    impl FaceDetect for FailingDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
            Err(DetectorError::InferenceFailed("boom".into()))
        }
    }

    struct ConstEmbedder(Vec<f32>);

    impl FaceEmbed for ConstEmbedder {
        fn embed(&mut self, _face: &Frame) -> Result<Vec<f32>, RecognizerError> {
            Ok(self.0.clone())
        }
    }

    struct FailingEmbedder;

    impl FaceEmbed for FailingEmbedder {
        fn embed(&mut self, _face: &Frame) -> Result<Vec<f32>, RecognizerError> {
            Err(RecognizerError::InferenceFailed("boom".into()))
        }
    }

    fn bbox(x: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x,
            y: 10.0,
            width: 20.0,
            height: 20.0,
            confidence: conf,
            landmarks: None,
        }
    }

    fn recognizer(faces: Vec<BoundingBox>, embedder: EmbedderBackend) -> Recognizer {
        Recognizer::new(Backend::Primary(Box::new(FixedDetector(faces))), embedder, 0.5)
    }

    fn person(id: &str, values: Vec<f32>) -> Person {
        Person {
            id: id.into(),
            name: id.into(),
            group: PersonGroup::Owner,
            note: String::new(),
            embedding: Embedding::new(values),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_detect_picks_highest_confidence() {
        let mut r = recognizer(
            vec![bbox(0.0, 0.7), bbox(30.0, 0.95), bbox(60.0, 0.8)],
            Backend::Unavailable,
        );
        let region = r.detect(&Frame::filled(100, 100, [0, 0, 0])).unwrap();
        assert_eq!(region.x, 30);
        assert!((region.confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_detect_tie_keeps_first_seen() {
        let mut r = recognizer(vec![bbox(5.0, 0.9), bbox(50.0, 0.9)], Backend::Unavailable);
        let region = r.detect(&Frame::filled(100, 100, [0, 0, 0])).unwrap();
        assert_eq!(region.x, 5);
    }

    #[test]
    fn test_detect_applies_confidence_floor() {
        let mut r = recognizer(vec![bbox(5.0, 0.3)], Backend::Unavailable);
        assert!(r.detect(&Frame::filled(100, 100, [0, 0, 0])).is_none());
    }

    #[test]
    fn test_detect_failure_is_no_face() {
        let mut r = Recognizer::new(
            Backend::Fallback(Box::new(FailingDetector)),
            Backend::Unavailable,
            0.5,
        );
        assert!(r.detect(&Frame::filled(100, 100, [0, 0, 0])).is_none());

        let mut r = Recognizer::new(Backend::Unavailable, Backend::Unavailable, 0.5);
        assert!(r.detect(&Frame::filled(100, 100, [0, 0, 0])).is_none());
    }

    #[test]
    fn test_extract_without_embedder_keeps_crop() {
        let mut r = recognizer(vec![bbox(10.0, 0.9)], Backend::Unavailable);
        let out = r.extract(&Frame::filled(100, 100, [9, 9, 9]));
        assert!(out.embedding.is_none());
        assert!(out.region.is_some());
        let crop = out.crop.unwrap();
        assert_eq!((crop.width, crop.height), (20, 20));
    }

    #[test]
    fn test_extract_embedding_failure_keeps_crop() {
        let mut r = recognizer(
            vec![bbox(10.0, 0.9)],
            Backend::Primary(Box::new(FailingEmbedder)),
        );
        let out = r.extract(&Frame::filled(100, 100, [9, 9, 9]));
        assert!(out.embedding.is_none());
        assert!(out.crop.is_some());
    }

    #[test]
    fn test_extract_no_face_is_all_none() {
        let mut r = recognizer(vec![], Backend::Primary(Box::new(ConstEmbedder(vec![1.0]))));
        let out = r.extract(&Frame::filled(100, 100, [0, 0, 0]));
        assert!(out.embedding.is_none() && out.region.is_none() && out.crop.is_none());
    }

    #[test]
    fn test_extract_normalizes_embedding() {
        let mut r = recognizer(
            vec![bbox(10.0, 0.9)],
            Backend::Primary(Box::new(ConstEmbedder(vec![3.0, 4.0]))),
        );
        let emb = r.extract(&Frame::filled(100, 100, [0, 0, 0])).embedding.unwrap();
        assert!((emb.values[0] - 0.6).abs() < 1e-6);
        assert!((emb.values[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_match_people_self_match() {
        let r = recognizer(vec![], Backend::Unavailable);
        let people = vec![person("001", vec![0.0, 1.0]), person("002", vec![1.0, 0.2])];
        let result = r.match_people(&people[1].embedding, &people);
        assert_eq!(result.person.unwrap().id, "002");
        assert!((result.similarity - 1.0).abs() < 1e-6);
    }
}
