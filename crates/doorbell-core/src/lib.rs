//! doorbell-core — Trigger-to-decision pipeline for a face-recognising doorbell.
//!
//! SCRFD detection and ONNX embedding/anti-spoof models run via ONNX Runtime
//! on the CPU. The [`Controller`] fuses match score and liveness into an
//! unlock/notify/log decision and hands side effects to collaborators
//! described in [`interfaces`].

pub mod backend;
pub mod controller;
pub mod decision;
pub mod detector;
pub mod embedder;
pub mod frame;
pub mod interfaces;
pub mod liveness;
pub mod models;
pub mod onnx;
pub mod recognizer;
pub mod types;

pub use backend::Backend;
pub use controller::{Controller, Dispatcher, RecognitionResult, ResultCache};
pub use decision::{ControllerSettings, EventType, Intent};
pub use frame::Frame;
pub use interfaces::{
    AuditLog, AuditRecord, DoorActuator, FrameSource, Notification, Notifier, NotifyCategory,
    PersonStore, PersonUpdate, StoreError,
};
pub use liveness::{LivenessChecker, LivenessConfig};
pub use recognizer::Recognizer;
pub use types::{Embedding, FaceRegion, Person, PersonGroup};
