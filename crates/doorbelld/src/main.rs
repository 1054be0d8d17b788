use anyhow::{Context, Result};
use clap::Parser;
use doorbell_core::detector::{FaceDetect, ScrfdDetector};
use doorbell_core::embedder::{FaceEmbed, OnnxEmbedder};
use doorbell_core::liveness::{OnnxSpoofModel, SpoofModel};
use doorbell_core::{
    models, Backend, Controller, Dispatcher, FrameSource, LivenessChecker, PersonStore, Recognizer,
};
use doorbell_hw::{Camera, DoorLock, NoCamera, TriggerGate, TriggerListener};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod audit;
mod config;
mod dbus_interface;
mod engine;
mod notifier;
mod sampler;
mod store;

use config::Config;
use dbus_interface::{DoorbellService, ServiceInfo};

const BUS_NAME: &str = "org.doorbell.Doorbell1";
const OBJECT_PATH: &str = "/org/doorbell/Doorbell1";

#[derive(Parser, Debug)]
#[command(name = "doorbelld", version, about = "Smart doorbell access-control daemon")]
struct Cli {
    /// Do not register on D-Bus; run triggers and sampling only.
    #[arg(long)]
    headless: bool,

    /// Suppress outbound notifications.
    #[arg(long)]
    no_notify: bool,

    /// Drive the door relay even if DOORBELL_DOORLOCK_ENABLED is off.
    #[arg(long)]
    unlock: bool,

    /// Tracing directive used when RUST_LOG is unset.
    #[arg(long)]
    log_level: Option<String>,

    /// Environment file loaded before configuration.
    #[arg(long, default_value = ".env")]
    env_file: String,
}

fn model_file(key: &str, dir: &Path) -> Result<std::path::PathBuf, String> {
    models::model_path(key, dir).map_err(|e| e.to_string())
}

fn load_detector(key: &str, dir: &Path, threshold: f32) -> Result<Box<dyn FaceDetect>, String> {
    let path = model_file(key, dir)?;
    let detector = ScrfdDetector::load(&path, threshold).map_err(|e| e.to_string())?;
    Ok(Box::new(detector))
}

fn load_embedder(key: &str, dir: &Path) -> Result<Box<dyn FaceEmbed>, String> {
    let path = model_file(key, dir)?;
    let embedder = OnnxEmbedder::load(&path).map_err(|e| e.to_string())?;
    Ok(Box::new(embedder))
}

fn load_spoof_model(key: &str, dir: &Path) -> Result<Box<dyn SpoofModel>, String> {
    let path = model_file(key, dir)?;
    let model = OnnxSpoofModel::load(&path).map_err(|e| e.to_string())?;
    Ok(Box::new(model))
}

fn open_camera(config: &Config) -> (Box<dyn FrameSource>, bool) {
    match Camera::open(&config.camera_device, config.camera_width, config.camera_height) {
        Ok(camera) => {
            if config.warmup_frames > 0 {
                camera.warmup(config.warmup_frames);
            }
            (Box::new(camera), true)
        }
        Err(e) => {
            tracing::warn!(
                device = %config.camera_device,
                error = %e,
                "camera unavailable; recognitions will report no face"
            );
            (Box::new(NoCamera), false)
        }
    }
}

fn build_recognizer(config: &Config) -> Recognizer {
    let dir = config.model_dir.as_path();
    let detector = Backend::resolve(
        "detector",
        || load_detector(&config.detection_model_key, dir, config.detection_confidence),
        || load_detector(&config.detection_fallback_key, dir, config.detection_confidence),
    );
    let embedder = Backend::resolve(
        "embedder",
        || load_embedder(&config.embedding_model_key, dir),
        || load_embedder(&config.embedding_fallback_key, dir),
    );
    Recognizer::new(detector, embedder, config.detection_confidence)
}

// The environment file is applied before the runtime starts any threads.
fn main() -> Result<()> {
    let cli = Cli::parse();
    let applied = config::load_dotenv(Path::new(&cli.env_file));

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?
        .block_on(run(cli, applied))
}

async fn run(cli: Cli, applied: usize) -> Result<()> {
    let mut config = Config::from_env();
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if cli.no_notify {
        config.notify_enabled = false;
    }
    if cli.unlock {
        config.doorlock_enabled = true;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!(env_vars = applied, "doorbelld starting");
    config.validate().context("invalid configuration")?;

    let door = Arc::new(DoorLock::from_sysfs(config.relay_pin, config.doorlock_enabled));

    let missing = models::sanity_check(config.model_keys(), &config.model_dir);
    for key in &missing {
        tracing::warn!(key = %key, dir = %config.model_dir.display(), "model missing");
    }

    let recognizer = build_recognizer(&config);
    let spoof = Backend::single("liveness", || {
        load_spoof_model(&config.liveness_model_key, &config.model_dir)
    });
    let liveness = LivenessChecker::new(config.liveness.clone(), spoof);

    let (source, camera_available) = open_camera(&config);

    let store: Arc<dyn PersonStore> = Arc::new(
        store::JsonPersonStore::open(&config.face_db_path()).context("opening person store")?,
    );
    let audit = Arc::new(audit::JsonlAuditLog::new(&config.events_log_path()));
    let notifier = Arc::new(notifier::LogNotifier::new(config.notify_enabled));
    let dispatcher = Arc::new(Dispatcher::new(
        door.clone(),
        notifier,
        audit,
        config.unlock_duration(),
    ));

    let controller = Controller::new(
        source,
        recognizer,
        liveness,
        Arc::clone(&store),
        dispatcher,
        config.controller_settings(),
    );
    let engine = engine::spawn_engine(controller).context("spawning engine thread")?;

    // One recognition task per accepted press.
    let _listener = if config.triggers_enabled {
        let (tx, mut rx) = mpsc::channel(8);
        let gate = TriggerGate::new(
            Duration::from_secs_f32(config.pir_recent_window_secs),
            Duration::from_secs_f32(config.button_bounce_secs),
        );
        match TriggerListener::start_sysfs(config.button_pin, config.pir_pin, gate, tx) {
            Ok(listener) => {
                let engine = engine.clone();
                tokio::spawn(async move {
                    while let Some(trigger) = rx.recv().await {
                        let engine = engine.clone();
                        tokio::spawn(async move {
                            let waited = trigger.at.elapsed();
                            match engine.handle_trigger().await {
                                Ok(result) => tracing::info!(
                                    event = %result.event_type,
                                    known = result.known,
                                    queued_ms = waited.as_millis() as u64,
                                    "doorbell handled"
                                ),
                                Err(e) => tracing::error!(error = %e, "doorbell handling failed"),
                            }
                        });
                    }
                });
                Some(listener)
            }
            Err(e) => {
                tracing::warn!(error = %e, "trigger inputs unavailable; doorbell button disabled");
                None
            }
        }
    } else {
        tracing::info!("triggers disabled via DOORBELL_TRIGGERS_ENABLED=0");
        None
    };

    let _sampler = (config.sample_interval_ms > 0).then(|| {
        sampler::spawn_sampler(
            engine.clone(),
            Duration::from_millis(config.sample_interval_ms),
        )
    });

    let _conn = if cli.headless {
        tracing::info!("headless mode; D-Bus interface not registered");
        None
    } else {
        let service = DoorbellService {
            engine: engine.clone(),
            store: Arc::clone(&store),
            info: ServiceInfo {
                camera_device: config.camera_device.clone(),
                camera_available,
                doorlock_enabled: door.is_enabled(),
                recognition_threshold: config.recognition_threshold,
            },
        };
        let builder = if config.session_bus {
            tracing::info!("using session bus");
            zbus::connection::Builder::session()?
        } else {
            zbus::connection::Builder::system()?
        };
        let conn = builder
            .name(BUS_NAME)?
            .serve_at(OBJECT_PATH, service)?
            .build()
            .await
            .context("registering on D-Bus")?;
        tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "D-Bus interface registered");
        Some(conn)
    };

    tracing::info!("doorbelld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("doorbelld shutting down");

    Ok(())
}
