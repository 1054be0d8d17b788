//! Heuristic anti-spoof assessment.
//!
//! Three signals are fused per call:
//!
//! - sharpness: Laplacian variance of the face crop against a bar that scales
//!   with face area. A hard gate.
//! - movement: displacement of the face centre since the previous call,
//!   relative to the shorter side of the current box.
//! - model: spoof-model probability, averaged over a trailing window.
//!
//! The window and last centre persist across calls until [`LivenessChecker::reset`].

use crate::backend::Backend;
use crate::frame::{laplacian_variance, Frame};
use crate::onnx::{InputGeometry, InputLayout};
use crate::types::FaceRegion;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use thiserror::Error;

const SPOOF_DEFAULT_GEOMETRY: InputGeometry = InputGeometry {
    layout: InputLayout::Nhwc,
    width: 80,
    height: 80,
};

/// Probability assumed when no spoof model is loaded.
pub const PERMISSIVE_PROBABILITY: f32 = 1.0;

#[derive(Error, Debug)]
pub enum LivenessError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LivenessConfig {
    /// Number of model probabilities averaged.
    pub window: usize,
    /// Mean probability that alone makes a face real.
    pub primary_threshold: f32,
    /// Mean probability that suffices when movement was observed.
    pub lower_threshold: f32,
    pub blur_base: f64,
    pub blur_min: f64,
    /// Face area (px²) at which the sharpness bar equals `blur_base`.
    pub blur_area_ref: f64,
    pub movement_ratio: f32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            window: 5,
            primary_threshold: 0.25,
            lower_threshold: 0.18,
            blur_base: 100.0,
            blur_min: 50.0,
            blur_area_ref: 6400.0,
            movement_ratio: 0.15,
        }
    }
}

impl LivenessConfig {
    /// Sharpness bar for a face of `area` pixels.
    pub fn sharpness_threshold(&self, area: f64) -> f64 {
        self.blur_min.max(self.blur_base * area / self.blur_area_ref)
    }
}

/// Spoof/real classifier. Returns the probability that the face is real.
pub trait SpoofModel: Send {
    fn predict(&mut self, face: &Frame) -> Result<f32, LivenessError>;
}

/// RGB anti-spoof model via ONNX Runtime.
pub struct OnnxSpoofModel {
    session: Session,
    geometry: InputGeometry,
}

impl OnnxSpoofModel {
    pub fn load(model_path: &Path) -> Result<Self, LivenessError> {
        if !model_path.exists() {
            return Err(LivenessError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;
        let geometry = InputGeometry::discover(&session, SPOOF_DEFAULT_GEOMETRY);

        tracing::info!(
            path = %model_path.display(),
            layout = ?geometry.layout,
            width = geometry.width,
            height = geometry.height,
            "loaded liveness model"
        );
        Ok(Self { session, geometry })
    }
}

impl SpoofModel for OnnxSpoofModel {
    fn predict(&mut self, face: &Frame) -> Result<f32, LivenessError> {
        let input = self.geometry.tensor(face, |p| p as f32 / 255.0);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LivenessError::InferenceFailed(format!("liveness extraction: {e}")))?;
        Ok(real_probability(raw))
    }
}

/// The "real" probability is the last output element, clamped to [0, 1].
/// An empty output counts as a spoof.
pub fn real_probability(raw: &[f32]) -> f32 {
    raw.last().map_or(0.0, |p| p.clamp(0.0, 1.0))
}

/// Rolling state carried between calls for one subject.
#[derive(Debug, Clone, Default)]
pub struct LivenessSession {
    probabilities: VecDeque<f32>,
    last_center: Option<(f32, f32)>,
}

impl LivenessSession {
    /// Append a probability, evicting beyond `window`, and return the mean.
    pub fn push_probability(&mut self, probability: f32, window: usize) -> f32 {
        self.probabilities.push_back(probability);
        while self.probabilities.len() > window.max(1) {
            self.probabilities.pop_front();
        }
        self.probabilities.iter().sum::<f32>() / self.probabilities.len() as f32
    }

    /// Displacement of `region`'s centre since the last call, as a fraction
    /// of its shorter side. `None` on the first observation.
    pub fn observe(&mut self, region: &FaceRegion) -> Option<f32> {
        let center = region.center();
        let previous = self.last_center.replace(center);
        let (px, py) = previous?;
        let dx = center.0 - px;
        let dy = center.1 - py;
        let side = region.min_side().max(1) as f32;
        Some((dx * dx + dy * dy).sqrt() / side)
    }

    pub fn samples(&self) -> usize {
        self.probabilities.len()
    }

    pub fn clear(&mut self) {
        self.probabilities.clear();
        self.last_center = None;
    }
}

/// Per-call diagnostic values behind a verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessSignals {
    pub sharpness: f64,
    pub sharpness_threshold: f64,
    pub sharpness_ok: bool,
    /// `None` when no previous centre existed.
    pub movement_ratio: Option<f32>,
    pub movement_ok: bool,
    /// This frame's model probability.
    pub probability: f32,
    pub mean_probability: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessVerdict {
    pub is_real: bool,
    pub mean_probability: f32,
    pub signals: LivenessSignals,
}

/// Real if the mean clears the primary bar, or clears the lower bar with
/// movement. A failed sharpness gate overrides both.
pub fn fuse(config: &LivenessConfig, sharpness_ok: bool, movement_ok: bool, mean: f32) -> bool {
    let real =
        mean >= config.primary_threshold || (movement_ok && mean >= config.lower_threshold);
    real && sharpness_ok
}

pub type SpoofBackend = Backend<Box<dyn SpoofModel>>;

pub struct LivenessChecker {
    config: LivenessConfig,
    model: SpoofBackend,
    session: LivenessSession,
}

impl LivenessChecker {
    pub fn new(config: LivenessConfig, model: SpoofBackend) -> Self {
        Self {
            config,
            model,
            session: LivenessSession::default(),
        }
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    pub fn backend_kind(&self) -> &'static str {
        self.model.kind()
    }

    pub fn session(&self) -> &LivenessSession {
        &self.session
    }

    pub fn reset(&mut self) {
        self.session.clear();
    }

    pub fn assess(&mut self, frame: &Frame, region: &FaceRegion) -> LivenessVerdict {
        let crop = frame.crop(region);

        let sharpness = if crop.is_empty() {
            0.0
        } else {
            laplacian_variance(&crop.to_grayscale(), crop.width as usize, crop.height as usize)
        };
        let sharpness_threshold = self.config.sharpness_threshold(crop.area() as f64);
        let sharpness_ok = !crop.is_empty() && sharpness >= sharpness_threshold;

        let movement_ratio = self.session.observe(region);
        let movement_ok = movement_ratio.is_some_and(|r| r >= self.config.movement_ratio);

        let probability = self.predict(&crop);
        let mean_probability = self.session.push_probability(probability, self.config.window);

        let is_real = fuse(&self.config, sharpness_ok, movement_ok, mean_probability);
        tracing::debug!(
            is_real,
            sharpness,
            sharpness_threshold,
            movement_ok,
            probability,
            mean_probability,
            "liveness assessed"
        );

        LivenessVerdict {
            is_real,
            mean_probability,
            signals: LivenessSignals {
                sharpness,
                sharpness_threshold,
                sharpness_ok,
                movement_ratio,
                movement_ok,
                probability,
                mean_probability,
            },
        }
    }

    fn predict(&mut self, crop: &Frame) -> f32 {
        let Some(model) = self.model.get_mut() else {
            return PERMISSIVE_PROBABILITY;
        };
        if crop.is_empty() {
            return 0.0;
        }
        match model.predict(crop) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "liveness inference failed; counting as spoof");
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedModel(f32);

    impl SpoofModel for FixedModel {
        fn predict(&mut self, _face: &Frame) -> Result<f32, LivenessError> {
            Ok(self.0)
        }
    }

    struct FailingModel;

    impl SpoofModel for FailingModel {
        fn predict(&mut self, _face: &Frame) -> Result<f32, LivenessError> {
            Err(LivenessError::InferenceFailed("boom".into()))
        }
    }

    /// 100x100 frame with a high-contrast checkerboard; very sharp.
    fn sharp_frame() -> Frame {
        let (w, h) = (100u32, 100u32);
        let mut data = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                let v = if (x + y) % 2 == 0 { 255 } else { 0 };
                data.extend_from_slice(&[v, v, v]);
            }
        }
        Frame::new(data, w, h).unwrap()
    }

    fn checker(model: SpoofBackend) -> LivenessChecker {
        LivenessChecker::new(LivenessConfig::default(), model)
    }

    fn region(x: u32) -> FaceRegion {
        FaceRegion::new(x, 20, 40, 40, 0.9)
    }

    #[test]
    fn test_static_sequence_real_on_probability_alone() {
        let mut c = checker(Backend::Primary(Box::new(FixedModel(0.9))));
        let frame = sharp_frame();
        let mut last = None;
        for _ in 0..5 {
            last = Some(c.assess(&frame, &region(20)));
        }
        let verdict = last.unwrap();
        assert!(verdict.is_real);
        assert!(!verdict.signals.movement_ok);
        assert!(verdict.signals.sharpness_ok);
        assert!((verdict.mean_probability - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_static_sequence_below_primary_is_spoof() {
        // 0.2 clears the lower bar, but a static face never counts as moving.
        let mut c = checker(Backend::Primary(Box::new(FixedModel(0.2))));
        let frame = sharp_frame();
        for _ in 0..5 {
            assert!(!c.assess(&frame, &region(20)).is_real);
        }
    }

    #[test]
    fn test_movement_enables_lower_threshold() {
        let mut c = checker(Backend::Primary(Box::new(FixedModel(0.2))));
        let frame = sharp_frame();
        assert!(!c.assess(&frame, &region(10)).is_real);
        let verdict = c.assess(&frame, &region(30));
        assert!(verdict.signals.movement_ok);
        assert!(verdict.is_real);
    }

    #[test]
    fn test_blurry_face_forced_spoof() {
        let mut c = checker(Backend::Primary(Box::new(FixedModel(1.0))));
        let flat = Frame::filled(100, 100, [128, 128, 128]);
        let verdict = c.assess(&flat, &region(20));
        assert!(!verdict.signals.sharpness_ok);
        assert!((verdict.mean_probability - 1.0).abs() < 1e-6);
        assert!(!verdict.is_real);
    }

    #[test]
    fn test_first_observation_has_no_movement() {
        let mut c = checker(Backend::Unavailable);
        let verdict = c.assess(&sharp_frame(), &region(20));
        assert_eq!(verdict.signals.movement_ratio, None);
        assert!(!verdict.signals.movement_ok);
    }

    #[test]
    fn test_missing_model_is_permissive() {
        let mut c = checker(Backend::Unavailable);
        let verdict = c.assess(&sharp_frame(), &region(20));
        assert!((verdict.signals.probability - PERMISSIVE_PROBABILITY).abs() < 1e-6);
        assert!(verdict.is_real);
    }

    #[test]
    fn test_model_error_counts_as_spoof() {
        let mut c = checker(Backend::Primary(Box::new(FailingModel)));
        let verdict = c.assess(&sharp_frame(), &region(20));
        assert_eq!(verdict.signals.probability, 0.0);
        assert!(!verdict.is_real);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut s = LivenessSession::default();
        for p in [0.0, 0.0, 1.0, 1.0] {
            s.push_probability(p, 2);
        }
        assert_eq!(s.samples(), 2);
        assert!((s.push_probability(1.0, 2) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_reset_clears_session() {
        let mut c = checker(Backend::Unavailable);
        let frame = sharp_frame();
        c.assess(&frame, &region(10));
        c.assess(&frame, &region(30));
        c.reset();
        assert_eq!(c.session().samples(), 0);
        assert_eq!(c.assess(&frame, &region(50)).signals.movement_ratio, None);
    }

    #[test]
    fn test_sharpness_threshold_scales_with_area() {
        let cfg = LivenessConfig::default();
        assert!((cfg.sharpness_threshold(1600.0) - 50.0).abs() < 1e-9);
        assert!((cfg.sharpness_threshold(12800.0) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_fuse_rule() {
        let cfg = LivenessConfig::default();
        assert!(fuse(&cfg, true, false, 0.25));
        assert!(!fuse(&cfg, true, false, 0.2));
        assert!(fuse(&cfg, true, true, 0.18));
        assert!(!fuse(&cfg, true, true, 0.1));
        assert!(!fuse(&cfg, false, true, 1.0));
    }

    #[test]
    fn test_real_probability_output_shapes() {
        assert_eq!(real_probability(&[]), 0.0);
        assert!((real_probability(&[0.7]) - 0.7).abs() < 1e-6);
        assert!((real_probability(&[0.1, 0.9]) - 0.9).abs() < 1e-6);
        assert_eq!(real_probability(&[0.2, 1.7]), 1.0);
    }
}
