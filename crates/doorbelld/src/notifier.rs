use doorbell_core::{Notification, Notifier, NotifyCategory};

/// Notifier that records alerts in the daemon log.
///
/// Stands in for an external messaging channel; with `enabled == false`
/// every alert is dropped at debug level.
pub struct LogNotifier {
    enabled: bool,
}

impl LogNotifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Human-readable line for an alert.
    pub fn message(notification: &Notification) -> String {
        let name = notification.person_name.as_deref().unwrap_or("unknown");
        let score = notification
            .score
            .map(|s| format!("{s:.2}"))
            .unwrap_or_else(|| "-".into());
        match notification.category {
            NotifyCategory::Known => {
                let group = notification
                    .group
                    .as_ref()
                    .map(|g| g.as_str())
                    .unwrap_or("-");
                format!("{name} ({group}) is at the door, score {score}")
            }
            NotifyCategory::Unknown => format!("unknown visitor at the door, score {score}"),
            NotifyCategory::Spoof => format!("possible spoof attempt as {name}, score {score}"),
        }
    }
}

impl Notifier for LogNotifier {
    fn send(&self, notification: &Notification) {
        if !self.enabled {
            tracing::debug!(category = ?notification.category, "notification suppressed");
            return;
        }
        let (width, height) = notification
            .frame
            .as_ref()
            .map(|f| (f.width, f.height))
            .unwrap_or((0, 0));
        let message = Self::message(notification);
        match notification.category {
            NotifyCategory::Spoof => tracing::warn!(width, height, "{message}"),
            _ => tracing::info!(width, height, "{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doorbell_core::PersonGroup;

    fn note(category: NotifyCategory) -> Notification {
        Notification {
            category,
            frame: None,
            person_name: Some("Ada".into()),
            group: Some(PersonGroup::Family),
            score: Some(0.734),
        }
    }

    #[test]
    fn test_known_message_names_person_and_group() {
        let msg = LogNotifier::message(&note(NotifyCategory::Known));
        assert_eq!(msg, "Ada (family) is at the door, score 0.73");
    }

    #[test]
    fn test_unknown_message_without_score() {
        let mut n = note(NotifyCategory::Unknown);
        n.score = None;
        assert_eq!(LogNotifier::message(&n), "unknown visitor at the door, score -");
    }

    #[test]
    fn test_disabled_notifier_does_not_panic() {
        LogNotifier::new(false).send(&note(NotifyCategory::Spoof));
        LogNotifier::new(true).send(&note(NotifyCategory::Spoof));
    }
}
