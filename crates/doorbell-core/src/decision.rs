//! Pure access decision.
//!
//! [`decide`] turns a match and a liveness verdict into a classification plus
//! the side effects to request. Nothing here touches hardware; the
//! [`Dispatcher`](crate::controller::Dispatcher) executes the commands.

use crate::interfaces::NotifyCategory;
use crate::types::{Person, PersonGroup};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Classification recorded with every result and audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Button,
    Preview,
    Manual,
    NoFace,
    Spoof,
    ManualUnlock,
    Capture,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Button => "button",
            EventType::Preview => "preview",
            EventType::Manual => "manual",
            EventType::NoFace => "no_face",
            EventType::Spoof => "spoof",
            EventType::ManualUnlock => "manual_unlock",
            EventType::Capture => "capture",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller of a recognition permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intent {
    pub log_event: bool,
    pub allow_unlock: bool,
    pub notify: bool,
    pub event_type: EventType,
}

impl Intent {
    /// Doorbell press: everything enabled.
    pub fn button() -> Self {
        Self {
            log_event: true,
            allow_unlock: true,
            notify: true,
            event_type: EventType::Button,
        }
    }

    /// Periodic sampling: no side effects.
    pub fn preview() -> Self {
        Self {
            log_event: false,
            allow_unlock: false,
            notify: false,
            event_type: EventType::Preview,
        }
    }

    /// On-demand recognition from the control interface: no side effects.
    pub fn manual() -> Self {
        Self {
            event_type: EventType::Manual,
            ..Self::preview()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub recognition_threshold: f32,
    pub auto_unlock_groups: Vec<PersonGroup>,
    pub unlock_duration: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            recognition_threshold: 0.45,
            auto_unlock_groups: vec![PersonGroup::Owner, PersonGroup::Family],
            unlock_duration: Duration::from_secs(5),
        }
    }
}

/// A side effect requested by a decision, in execution order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Unlock(Duration),
    Notify(NotifyCategory),
    Audit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub known: bool,
    pub event_type: EventType,
    pub commands: Vec<Command>,
}

/// Decide the outcome for a detected face.
///
/// `person` is the best match (if any) and `similarity` its raw score.
pub fn decide(
    settings: &ControllerSettings,
    intent: &Intent,
    person: Option<&Person>,
    similarity: f32,
    is_real: bool,
) -> Decision {
    let known = person.is_some() && similarity >= settings.recognition_threshold && is_real;
    let event_type = if is_real {
        intent.event_type
    } else {
        EventType::Spoof
    };

    let mut commands = Vec::new();
    if intent.allow_unlock && known {
        if let Some(p) = person {
            if settings.auto_unlock_groups.contains(&p.group) {
                commands.push(Command::Unlock(settings.unlock_duration));
            }
        }
    }
    if intent.notify {
        let category = if !is_real {
            NotifyCategory::Spoof
        } else if known {
            NotifyCategory::Known
        } else {
            NotifyCategory::Unknown
        };
        commands.push(Command::Notify(category));
    }
    if intent.log_event {
        commands.push(Command::Audit);
    }

    Decision {
        known,
        event_type,
        commands,
    }
}

/// Outcome when there was no frame, no face or no embedding.
pub fn decide_no_face(intent: &Intent) -> Decision {
    let commands = if intent.log_event {
        vec![Command::Audit]
    } else {
        Vec::new()
    };
    Decision {
        known: false,
        event_type: EventType::NoFace,
        commands,
    }
}
