//! Registry of the ONNX models the pipeline knows how to load.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("unknown model key: {0}")]
    UnknownKey(String),
}

#[derive(Debug, Clone, Copy)]
pub struct ModelSpec {
    pub key: &'static str,
    pub filename: &'static str,
}

pub const REGISTRY: &[ModelSpec] = &[
    ModelSpec {
        key: "detection_scrfd_10g",
        filename: "det_10g.onnx",
    },
    ModelSpec {
        key: "detection_scrfd_500m",
        filename: "det_500m.onnx",
    },
    ModelSpec {
        key: "embedding_arcface",
        filename: "w600k_r50.onnx",
    },
    ModelSpec {
        key: "embedding_mobilefacenet",
        filename: "mobilefacenet.onnx",
    },
    ModelSpec {
        key: "liveness_modelrgb",
        filename: "modelrgb.onnx",
    },
];

pub fn lookup(key: &str) -> Option<&'static ModelSpec> {
    REGISTRY.iter().find(|spec| spec.key == key)
}

/// Resolve a model key to its file path under `model_dir`.
pub fn model_path(key: &str, model_dir: &Path) -> Result<PathBuf, ModelError> {
    let spec = lookup(key).ok_or_else(|| ModelError::UnknownKey(key.to_string()))?;
    Ok(model_dir.join(spec.filename))
}

/// Return the keys that are unknown or whose file is missing.
pub fn sanity_check<'a>(keys: impl IntoIterator<Item = &'a str>, model_dir: &Path) -> Vec<String> {
    keys.into_iter()
        .filter(|key| match model_path(key, model_dir) {
            Ok(path) => !path.exists(),
            Err(_) => true,
        })
        .map(str::to_string)
        .collect()
}

/// `$XDG_DATA_HOME/doorbell/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("doorbell")
        .join("models")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_path_known_key() {
        let path = model_path("embedding_arcface", Path::new("/models")).unwrap();
        assert_eq!(path, PathBuf::from("/models/w600k_r50.onnx"));
    }

    #[test]
    fn test_model_path_unknown_key() {
        assert!(matches!(
            model_path("nope", Path::new("/models")),
            Err(ModelError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_sanity_check_reports_missing() {
        let dir = Path::new("/nonexistent-doorbell-models");
        let missing = sanity_check(["liveness_modelrgb", "bogus"], dir);
        assert_eq!(missing, vec!["liveness_modelrgb".to_string(), "bogus".to_string()]);
    }

    #[test]
    fn test_registry_keys_unique() {
        for (i, a) in REGISTRY.iter().enumerate() {
            for b in &REGISTRY[i + 1..] {
                assert_ne!(a.key, b.key);
            }
        }
    }
}
