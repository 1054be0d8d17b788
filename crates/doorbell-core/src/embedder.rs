//! Face embedding backend via ONNX Runtime.
//!
//! Extracts an L2-normalized identity embedding from a face crop. Works with
//! ArcFace-style models (NCHW 112×112) and MobileFaceNet-style exports; the
//! input layout and size are read from the model at load time.

use crate::frame::Frame;
use crate::onnx::{InputGeometry, InputLayout};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EMBED_MEAN: f32 = 127.5;
const EMBED_STD: f32 = 128.0;
const EMBED_DEFAULT_GEOMETRY: InputGeometry = InputGeometry {
    layout: InputLayout::Nchw,
    width: 112,
    height: 112,
};

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face crop is empty")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A face embedding backend. Returns the raw (unnormalized) model output.
pub trait FaceEmbed: Send {
    fn embed(&mut self, face: &Frame) -> Result<Vec<f32>, RecognizerError>;
}

/// ONNX embedding model.
pub struct OnnxEmbedder {
    session: Session,
    geometry: InputGeometry,
}

impl OnnxEmbedder {
    /// Load an embedding model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let geometry = InputGeometry::discover(&session, EMBED_DEFAULT_GEOMETRY);
        tracing::info!(
            path = %model_path.display(),
            layout = ?geometry.layout,
            width = geometry.width,
            height = geometry.height,
            "loaded embedding model"
        );

        Ok(Self { session, geometry })
    }
}

impl FaceEmbed for OnnxEmbedder {
    fn embed(&mut self, face: &Frame) -> Result<Vec<f32>, RecognizerError> {
        if face.is_empty() {
            return Err(RecognizerError::EmptyCrop);
        }

        let input = self
            .geometry
            .tensor(face, |p| (p as f32 - EMBED_MEAN) / EMBED_STD);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.is_empty() {
            return Err(RecognizerError::InferenceFailed("empty embedding output".into()));
        }
        Ok(raw.to_vec())
    }
}
