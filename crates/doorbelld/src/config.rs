use doorbell_core::{ControllerSettings, LivenessConfig, PersonGroup};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{key} must be within [0, 1], got {value}")]
    OutOfUnitRange { key: &'static str, value: f32 },
    #[error("{key} must be positive, got {value}")]
    NotPositive { key: &'static str, value: f64 },
    #[error("{key} must not be negative, got {value}")]
    Negative { key: &'static str, value: f64 },
    #[error("{key} must be a finite number, got {value}")]
    NotFinite { key: &'static str, value: f64 },
    #[error("{key} is not a usable duration in seconds, got {value}")]
    BadDuration { key: &'static str, value: f32 },
    #[error("DOORBELL_LIVENESS_WINDOW must be at least 1")]
    EmptyWindow,
    #[error("DOORBELL_LIVENESS_LOWER_THRESHOLD ({lower}) exceeds the primary threshold ({primary})")]
    ThresholdOrder { lower: f32, primary: f32 },
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Number of frames to discard after opening the camera.
    pub warmup_frames: usize,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Holds the person store and the event log.
    pub data_dir: PathBuf,
    /// Minimum detector confidence for a face to count.
    pub detection_confidence: f32,
    /// Cosine similarity threshold for a positive match.
    pub recognition_threshold: f32,
    /// Periodic preview sampling interval; 0 disables sampling.
    pub sample_interval_ms: u64,
    pub detection_model_key: String,
    pub detection_fallback_key: String,
    pub embedding_model_key: String,
    pub embedding_fallback_key: String,
    pub liveness_model_key: String,
    pub auto_unlock_groups: Vec<PersonGroup>,
    pub door_unlock_secs: f32,
    pub doorlock_enabled: bool,
    pub triggers_enabled: bool,
    pub pir_recent_window_secs: f32,
    pub button_bounce_secs: f32,
    pub button_pin: u32,
    pub pir_pin: u32,
    pub relay_pin: u32,
    pub liveness: LivenessConfig,
    pub notify_enabled: bool,
    /// Serve on the session bus instead of the system bus (development mode).
    pub session_bus: bool,
    /// Default tracing directive when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Config {
    /// Load configuration from `DOORBELL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let parse_f32 = |key: &str, default: f32| parse_or(get(key), default);
        let parse_u32 = |key: &str, default: u32| parse_or(get(key), default);
        let string = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let data_dir = get("DOORBELL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| xdg_data_home(&get).join("doorbell"));
        let model_dir = get("DOORBELL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("models"));

        let liveness_defaults = LivenessConfig::default();

        Self {
            camera_device: string("DOORBELL_CAMERA_DEVICE", "/dev/video0"),
            camera_width: parse_u32("DOORBELL_CAMERA_WIDTH", 640),
            camera_height: parse_u32("DOORBELL_CAMERA_HEIGHT", 480),
            warmup_frames: parse_or(get("DOORBELL_WARMUP_FRAMES"), 4),
            model_dir,
            data_dir,
            detection_confidence: parse_f32("DOORBELL_FACE_DETECTION_CONFIDENCE", 0.6),
            recognition_threshold: parse_f32("DOORBELL_RECOGNITION_THRESHOLD", 0.45),
            sample_interval_ms: parse_or(get("DOORBELL_SAMPLE_INTERVAL_MS"), 500),
            detection_model_key: string("DOORBELL_DETECTION_MODEL_KEY", "detection_scrfd_10g"),
            detection_fallback_key: string(
                "DOORBELL_DETECTION_MODEL_FALLBACK",
                "detection_scrfd_500m",
            ),
            embedding_model_key: string("DOORBELL_EMBEDDING_MODEL_KEY", "embedding_arcface"),
            embedding_fallback_key: string(
                "DOORBELL_EMBEDDING_MODEL_FALLBACK",
                "embedding_mobilefacenet",
            ),
            liveness_model_key: string("DOORBELL_LIVENESS_MODEL_KEY", "liveness_modelrgb"),
            auto_unlock_groups: split_groups(get("DOORBELL_AUTO_UNLOCK_GROUPS").as_deref()),
            door_unlock_secs: parse_f32("DOORBELL_DOOR_UNLOCK_SECONDS", 5.0),
            doorlock_enabled: parse_bool(get("DOORBELL_DOORLOCK_ENABLED"), false),
            triggers_enabled: parse_bool(get("DOORBELL_TRIGGERS_ENABLED"), true),
            pir_recent_window_secs: parse_f32("DOORBELL_PIR_RECENT_WINDOW_SECS", 6.0),
            button_bounce_secs: parse_f32("DOORBELL_BUTTON_BOUNCE_SECS", 0.2),
            button_pin: parse_u32("DOORBELL_BUTTON_PIN", 17),
            pir_pin: parse_u32("DOORBELL_PIR_PIN", 27),
            relay_pin: parse_u32("DOORBELL_RELAY_PIN", 22),
            liveness: LivenessConfig {
                window: parse_or(get("DOORBELL_LIVENESS_WINDOW"), liveness_defaults.window),
                primary_threshold: parse_f32(
                    "DOORBELL_LIVENESS_PRIMARY_THRESHOLD",
                    liveness_defaults.primary_threshold,
                ),
                lower_threshold: parse_f32(
                    "DOORBELL_LIVENESS_LOWER_THRESHOLD",
                    liveness_defaults.lower_threshold,
                ),
                blur_base: parse_or(get("DOORBELL_LIVENESS_BLUR_BASE"), liveness_defaults.blur_base),
                blur_min: parse_or(get("DOORBELL_LIVENESS_BLUR_MIN"), liveness_defaults.blur_min),
                blur_area_ref: parse_or(
                    get("DOORBELL_LIVENESS_BLUR_AREA_REF"),
                    liveness_defaults.blur_area_ref,
                ),
                movement_ratio: parse_f32(
                    "DOORBELL_LIVENESS_MOVEMENT_RATIO",
                    liveness_defaults.movement_ratio,
                ),
            },
            notify_enabled: parse_bool(get("DOORBELL_NOTIFY_ENABLED"), true),
            session_bus: get("DOORBELL_SESSION_BUS").is_some(),
            log_level: string("DOORBELL_LOG_LEVEL", "info"),
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("DOORBELL_FACE_DETECTION_CONFIDENCE", self.detection_confidence),
            ("DOORBELL_RECOGNITION_THRESHOLD", self.recognition_threshold),
            ("DOORBELL_LIVENESS_PRIMARY_THRESHOLD", self.liveness.primary_threshold),
            ("DOORBELL_LIVENESS_LOWER_THRESHOLD", self.liveness.lower_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfUnitRange { key, value });
            }
        }
        if self.liveness.window == 0 {
            return Err(ConfigError::EmptyWindow);
        }
        if self.liveness.lower_threshold > self.liveness.primary_threshold {
            return Err(ConfigError::ThresholdOrder {
                lower: self.liveness.lower_threshold,
                primary: self.liveness.primary_threshold,
            });
        }
        for (key, value) in [
            ("DOORBELL_LIVENESS_BLUR_AREA_REF", self.liveness.blur_area_ref),
            ("DOORBELL_LIVENESS_BLUR_BASE", self.liveness.blur_base),
            ("DOORBELL_LIVENESS_BLUR_MIN", self.liveness.blur_min),
            ("DOORBELL_LIVENESS_MOVEMENT_RATIO", self.liveness.movement_ratio as f64),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NotFinite { key, value });
            }
        }
        // Converted with Duration::from_secs_f32 at startup.
        for (key, value) in [
            ("DOORBELL_DOOR_UNLOCK_SECONDS", self.door_unlock_secs),
            ("DOORBELL_PIR_RECENT_WINDOW_SECS", self.pir_recent_window_secs),
            ("DOORBELL_BUTTON_BOUNCE_SECS", self.button_bounce_secs),
        ] {
            if Duration::try_from_secs_f32(value).is_err() {
                return Err(ConfigError::BadDuration { key, value });
            }
        }
        for (key, value) in [
            ("DOORBELL_LIVENESS_BLUR_AREA_REF", self.liveness.blur_area_ref),
            ("DOORBELL_DOOR_UNLOCK_SECONDS", self.door_unlock_secs as f64),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::NotPositive { key, value });
            }
        }
        for (key, value) in [
            ("DOORBELL_LIVENESS_BLUR_BASE", self.liveness.blur_base),
            ("DOORBELL_LIVENESS_BLUR_MIN", self.liveness.blur_min),
            ("DOORBELL_LIVENESS_MOVEMENT_RATIO", self.liveness.movement_ratio as f64),
        ] {
            if !(value >= 0.0) {
                return Err(ConfigError::Negative { key, value });
            }
        }
        Ok(())
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            recognition_threshold: self.recognition_threshold,
            auto_unlock_groups: self.auto_unlock_groups.clone(),
            unlock_duration: self.unlock_duration(),
        }
    }

    pub fn unlock_duration(&self) -> Duration {
        Duration::from_secs_f32(self.door_unlock_secs)
    }

    pub fn face_db_path(&self) -> PathBuf {
        self.data_dir.join("face_db.json")
    }

    pub fn events_log_path(&self) -> PathBuf {
        self.data_dir.join("logs").join("events.jsonl")
    }

    /// Every model key the daemon may try to load.
    pub fn model_keys(&self) -> [&str; 5] {
        [
            self.detection_model_key.as_str(),
            self.detection_fallback_key.as_str(),
            self.embedding_model_key.as_str(),
            self.embedding_fallback_key.as_str(),
            self.liveness_model_key.as_str(),
        ]
    }
}

/// Load `KEY=VALUE` lines from a `.env` file into the process environment.
/// Variables that are already set win. A missing file is not an error.
///
/// Mutates the environment, so it must run while the process is still
/// single-threaded (before the tokio runtime is built).
pub fn load_dotenv(path: &Path) -> usize {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return 0;
    };
    let pending = unset_entries(&contents, |key| std::env::var_os(key).is_some());
    for (key, value) in &pending {
        std::env::set_var(key, value);
    }
    pending.len()
}

/// Entries of `contents` whose key is not already set.
fn unset_entries(contents: &str, is_set: impl Fn(&str) -> bool) -> Vec<(String, String)> {
    parse_dotenv(contents)
        .into_iter()
        .filter(|(key, _)| !is_set(key))
        .collect()
}

pub fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), unquote(value.trim()).to_string()))
        .collect()
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && bytes[0] == bytes[bytes.len() - 1]
        && (bytes[0] == b'"' || bytes[0] == b'\'')
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn xdg_data_home(get: &impl Fn(&str) -> Option<String>) -> PathBuf {
    get("XDG_DATA_HOME").map(PathBuf::from).unwrap_or_else(|| {
        let home = get("HOME").unwrap_or_else(|| "/tmp".to_string());
        PathBuf::from(home).join(".local/share")
    })
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    match value {
        Some(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

fn split_groups(value: Option<&str>) -> Vec<PersonGroup> {
    let groups: Vec<PersonGroup> = value
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(PersonGroup::from)
        .collect();
    if groups.is_empty() {
        vec![PersonGroup::Owner, PersonGroup::Family]
    } else {
        groups
    }
}
