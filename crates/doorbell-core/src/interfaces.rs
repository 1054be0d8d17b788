//! Contracts of the collaborators the pipeline drives.
//!
//! Implementations live in the hardware crate and the daemon. Apart from the
//! person store, none of these report failure to the caller.

use crate::frame::Frame;
use crate::types::{Embedding, Person, PersonGroup};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Source of RGB frames. `None` on any transient capture failure.
pub trait FrameSource: Send {
    fn capture(&self) -> Option<Frame>;
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
}

/// Fields to change on an enrolled person. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct PersonUpdate {
    pub name: Option<String>,
    pub group: Option<PersonGroup>,
    pub note: Option<String>,
    /// Merged into the stored embedding when lengths match, replaces otherwise.
    pub embedding: Option<Embedding>,
}

/// Enrolled-person storage.
pub trait PersonStore: Send + Sync {
    /// Snapshot in insertion order.
    fn list(&self) -> Vec<Person>;
    fn get(&self, id: &str) -> Option<Person>;
    /// Returns the new person's id.
    fn add(
        &self,
        name: &str,
        group: PersonGroup,
        note: &str,
        embedding: &Embedding,
    ) -> Result<String, StoreError>;
    /// `Ok(false)` for an unknown id.
    fn update(&self, id: &str, update: PersonUpdate) -> Result<bool, StoreError>;
    /// `Ok(false)` for an unknown id.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

/// Door relay. Fire-and-forget.
pub trait DoorActuator: Send + Sync {
    fn unlock_async(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyCategory {
    Known,
    Unknown,
    Spoof,
}

/// Payload handed to a [`Notifier`].
#[derive(Debug, Clone)]
pub struct Notification {
    pub category: NotifyCategory,
    pub frame: Option<Arc<Frame>>,
    pub person_name: Option<String>,
    pub group: Option<PersonGroup>,
    pub score: Option<f32>,
}

/// Outbound alerts. Best effort; implementations swallow their own errors.
pub trait Notifier: Send + Sync {
    fn send(&self, notification: &Notification);
}

/// One audit entry. Never carries image data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub known: bool,
    pub person_id: Option<String>,
    pub person_name: Option<String>,
    pub group: Option<PersonGroup>,
    pub note: Option<String>,
    pub score: Option<f32>,
    pub is_real: bool,
    pub event_type: crate::decision::EventType,
}

/// Append-only event log.
pub trait AuditLog: Send + Sync {
    fn append(&self, record: &AuditRecord);
}
