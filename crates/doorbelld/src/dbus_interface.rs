use crate::engine::{EngineError, EngineHandle, EnrollRequest};
use doorbell_core::{Intent, Person, PersonGroup, PersonStore, PersonUpdate};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use zbus::interface;

/// Values reported by `Status` that do not change after startup.
pub struct ServiceInfo {
    pub camera_device: String,
    pub camera_available: bool,
    pub doorlock_enabled: bool,
    pub recognition_threshold: f32,
}

/// D-Bus control surface of the doorbell daemon.
///
/// Bus name: org.doorbell.Doorbell1
/// Object path: /org/doorbell/Doorbell1
pub struct DoorbellService {
    pub engine: EngineHandle,
    pub store: Arc<dyn PersonStore>,
    pub info: ServiceInfo,
}

/// Enrolled person as listed over the bus. Embeddings stay in the daemon.
#[derive(Debug, Serialize)]
pub struct PersonSummary<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub group: &'a str,
    pub note: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

impl<'a> From<&'a Person> for PersonSummary<'a> {
    fn from(p: &'a Person) -> Self {
        Self {
            id: &p.id,
            name: &p.name,
            group: p.group.as_str(),
            note: &p.note,
            created_at: &p.created_at,
            updated_at: &p.updated_at,
        }
    }
}

/// Empty strings mean "leave unchanged".
pub fn person_update(name: &str, group: &str, note: &str) -> PersonUpdate {
    let non_empty = |s: &str| (!s.trim().is_empty()).then(|| s.trim().to_string());
    PersonUpdate {
        name: non_empty(name),
        group: non_empty(group).map(PersonGroup::from),
        note: non_empty(note),
        embedding: None,
    }
}

fn failed(e: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

fn to_json(value: &impl Serialize) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(failed)
}

fn engine_failed(op: &str, e: EngineError) -> zbus::fdo::Error {
    tracing::error!(error = %e, op, "engine request failed");
    failed(e)
}

/// Store deletes rewrite the whole file; keep them off the bus executor.
async fn remove_blocking(store: Arc<dyn PersonStore>, id: String) -> zbus::fdo::Result<bool> {
    tokio::task::spawn_blocking(move || store.delete(&id))
        .await
        .map_err(failed)?
        .map_err(failed)
}

#[interface(name = "org.doorbell.Doorbell1")]
impl DoorbellService {
    /// Run a recognition now, without unlocking, notifying or logging.
    ///
    /// Returns the result as JSON.
    async fn recognize(&self) -> zbus::fdo::Result<String> {
        tracing::info!("recognize requested");
        let result = self
            .engine
            .recognize(Intent::manual())
            .await
            .map_err(|e| engine_failed("recognize", e))?;
        to_json(&result)
    }

    /// Unlock the door unconditionally and record it.
    async fn manual_unlock(&self) -> zbus::fdo::Result<String> {
        let engine = self.engine.clone();
        let record = tokio::task::spawn_blocking(move || engine.manual_unlock())
            .await
            .map_err(failed)?;
        to_json(&record)
    }

    /// Most recent recognition result as JSON, or `null`.
    async fn last_result(&self) -> zbus::fdo::Result<String> {
        to_json(&self.engine.cache().last_result())
    }

    async fn list_people(&self) -> zbus::fdo::Result<String> {
        let people = self.store.list();
        let summaries: Vec<PersonSummary<'_>> = people.iter().map(PersonSummary::from).collect();
        to_json(&summaries)
    }

    /// Enroll from the cached face, capturing one if needed.
    ///
    /// Returns the new person's id.
    async fn enroll(&self, name: &str, group: &str, note: &str) -> zbus::fdo::Result<String> {
        tracing::info!(name, group, "enroll requested");
        if name.trim().is_empty() {
            return Err(zbus::fdo::Error::InvalidArgs("name must not be empty".into()));
        }
        let request = EnrollRequest {
            name: name.trim().to_string(),
            group: PersonGroup::from(group),
            note: note.to_string(),
        };
        self.engine
            .enroll(request)
            .await
            .map_err(|e| engine_failed("enroll", e))?
            .ok_or_else(|| failed("no face detected"))
    }

    async fn enroll_from_file(
        &self,
        path: &str,
        name: &str,
        group: &str,
        note: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(path, name, group, "enroll from file requested");
        if name.trim().is_empty() {
            return Err(zbus::fdo::Error::InvalidArgs("name must not be empty".into()));
        }
        let request = EnrollRequest {
            name: name.trim().to_string(),
            group: PersonGroup::from(group),
            note: note.to_string(),
        };
        self.engine
            .enroll_from_file(PathBuf::from(path), request)
            .await
            .map_err(|e| engine_failed("enroll_from_file", e))?
            .ok_or_else(|| failed(format!("no face found in {path}")))
    }

    /// Change fields of an enrolled person. Empty strings keep the current
    /// value; `reembed` folds in a freshly captured face.
    async fn update_person(
        &self,
        id: &str,
        name: &str,
        group: &str,
        note: &str,
        reembed: bool,
    ) -> zbus::fdo::Result<bool> {
        tracing::info!(id, reembed, "update person requested");
        self.engine
            .update_person(id.to_string(), person_update(name, group, note), reembed)
            .await
            .map_err(|e| engine_failed("update_person", e))
    }

    async fn remove_person(&self, id: &str) -> zbus::fdo::Result<bool> {
        let removed = remove_blocking(Arc::clone(&self.store), id.to_string()).await?;
        if removed {
            tracing::info!(id, "person removed");
        } else {
            tracing::warn!(id, "person not found");
        }
        Ok(removed)
    }

    async fn reset_liveness(&self) -> zbus::fdo::Result<()> {
        self.engine
            .reset_liveness()
            .await
            .map_err(|e| engine_failed("reset_liveness", e))
    }

    /// Return daemon status information as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self
            .engine
            .status()
            .await
            .map_err(|e| engine_failed("status", e))?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "camera": self.info.camera_device,
            "camera_available": self.info.camera_available,
            "doorlock_enabled": self.info.doorlock_enabled,
            "recognition_threshold": self.info.recognition_threshold,
            "backends": {
                "detector": status.detector,
                "embedder": status.embedder,
                "liveness": status.liveness,
            },
            "people": status.people,
            "liveness_samples": status.liveness_samples,
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonPersonStore;
    use doorbell_core::Embedding;

    #[test]
    fn test_person_update_skips_empty_fields() {
        let u = person_update("", "  ", "front gate");
        assert!(u.name.is_none());
        assert!(u.group.is_none());
        assert_eq!(u.note.as_deref(), Some("front gate"));
        assert!(u.embedding.is_none());
    }

    #[test]
    fn test_person_update_parses_group() {
        let u = person_update("Ada", "Family", "");
        assert_eq!(u.name.as_deref(), Some("Ada"));
        assert_eq!(u.group, Some(PersonGroup::Family));
    }

    #[test]
    fn test_summary_omits_embedding() {
        let p = Person {
            id: "001".into(),
            name: "Ada".into(),
            group: PersonGroup::Owner,
            note: String::new(),
            embedding: Embedding::new(vec![1.0, 0.0]),
            created_at: "t0".into(),
            updated_at: "t1".into(),
        };
        let json = serde_json::to_value(PersonSummary::from(&p)).unwrap();
        assert_eq!(json["group"], "owner");
        assert!(json.get("embedding").is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_remove_runs_off_the_async_thread() {
        let store: Arc<dyn PersonStore> = Arc::new(JsonPersonStore::in_memory());
        let id = store
            .add("Ada", PersonGroup::Owner, "", &Embedding::new(vec![1.0, 0.0]))
            .unwrap();

        assert!(remove_blocking(Arc::clone(&store), id.clone()).await.unwrap());
        assert!(!remove_blocking(Arc::clone(&store), id).await.unwrap());
        assert!(store.list().is_empty());
    }
}
