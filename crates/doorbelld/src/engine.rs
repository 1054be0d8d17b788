use doorbell_core::controller::ControllerStatus;
use doorbell_core::{
    Controller, Dispatcher, Intent, PersonGroup, PersonUpdate, RecognitionResult, ResultCache,
    StoreError,
};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Fields for a new enrollment.
pub struct EnrollRequest {
    pub name: String,
    pub group: PersonGroup,
    pub note: String,
}

/// Messages sent to the engine thread.
enum EngineRequest {
    Recognize {
        intent: Intent,
        reply: oneshot::Sender<RecognitionResult>,
    },
    Trigger {
        reply: oneshot::Sender<RecognitionResult>,
    },
    Enroll {
        person: EnrollRequest,
        reply: oneshot::Sender<Result<Option<String>, StoreError>>,
    },
    EnrollFromFile {
        path: PathBuf,
        person: EnrollRequest,
        reply: oneshot::Sender<Result<Option<String>, StoreError>>,
    },
    UpdatePerson {
        id: String,
        update: PersonUpdate,
        reembed: bool,
        reply: oneshot::Sender<Result<bool, StoreError>>,
    },
    ResetLiveness {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<ControllerStatus>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// Everything that touches the camera or the models goes through the
/// thread. Cache reads, manual unlock and store reads/deletes do not.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    cache: Arc<ResultCache>,
    dispatcher: Arc<Dispatcher>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Capture a frame and run the pipeline with `intent`.
    pub async fn recognize(&self, intent: Intent) -> Result<RecognitionResult, EngineError> {
        self.request(|reply| EngineRequest::Recognize { intent, reply })
            .await
    }

    /// Doorbell press.
    pub async fn handle_trigger(&self) -> Result<RecognitionResult, EngineError> {
        self.request(|reply| EngineRequest::Trigger { reply }).await
    }

    pub async fn enroll(&self, person: EnrollRequest) -> Result<Option<String>, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::Enroll { person, reply })
            .await??)
    }

    pub async fn enroll_from_file(
        &self,
        path: PathBuf,
        person: EnrollRequest,
    ) -> Result<Option<String>, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::EnrollFromFile {
                path,
                person,
                reply,
            })
            .await??)
    }

    pub async fn update_person(
        &self,
        id: String,
        update: PersonUpdate,
        reembed: bool,
    ) -> Result<bool, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::UpdatePerson {
                id,
                update,
                reembed,
                reply,
            })
            .await??)
    }

    pub async fn reset_liveness(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::ResetLiveness { reply })
            .await
    }

    pub async fn status(&self) -> Result<ControllerStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Unlock now, without waiting for a recognition in progress.
    pub fn manual_unlock(&self) -> doorbell_core::AuditRecord {
        self.dispatcher.manual_unlock(None, &self.cache)
    }
}

/// Spawn the engine on a dedicated OS thread that owns `controller`.
pub fn spawn_engine(mut controller: Controller) -> std::io::Result<EngineHandle> {
    let cache = controller.cache();
    let dispatcher = controller.dispatcher();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("doorbell-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                handle_request(&mut controller, req);
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle {
        tx,
        cache,
        dispatcher,
    })
}

fn handle_request(controller: &mut Controller, req: EngineRequest) {
    match req {
        EngineRequest::Recognize { intent, reply } => {
            let frame = controller.capture_frame();
            let _ = reply.send(controller.recognize(frame, intent));
        }
        EngineRequest::Trigger { reply } => {
            let _ = reply.send(controller.handle_trigger());
        }
        EngineRequest::Enroll { person, reply } => {
            let result = controller.enroll(&person.name, person.group, &person.note);
            let _ = reply.send(result);
        }
        EngineRequest::EnrollFromFile {
            path,
            person,
            reply,
        } => {
            let result =
                controller.enroll_from_file(&path, &person.name, person.group, &person.note);
            let _ = reply.send(result);
        }
        EngineRequest::UpdatePerson {
            id,
            update,
            reembed,
            reply,
        } => {
            let _ = reply.send(controller.update_person(&id, update, reembed));
        }
        EngineRequest::ResetLiveness { reply } => {
            controller.reset_liveness();
            let _ = reply.send(());
        }
        EngineRequest::Status { reply } => {
            let _ = reply.send(controller.status());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::LogNotifier;
    use crate::store::JsonPersonStore;
    use doorbell_core::{
        AuditLog, AuditRecord, Backend, ControllerSettings, EventType, LivenessChecker,
        LivenessConfig, Recognizer,
    };
    use doorbell_hw::{DoorLock, NoCamera};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Audits(Mutex<Vec<AuditRecord>>);

    impl AuditLog for Audits {
        fn append(&self, record: &AuditRecord) {
            self.0.lock().unwrap().push(record.clone());
        }
    }

    fn engine() -> (EngineHandle, Arc<Audits>) {
        let audits = Arc::new(Audits::default());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(DoorLock::disabled()),
            Arc::new(LogNotifier::new(false)),
            audits.clone(),
            Duration::from_secs(5),
        ));
        let controller = Controller::new(
            Box::new(NoCamera),
            Recognizer::new(Backend::Unavailable, Backend::Unavailable, 0.5),
            LivenessChecker::new(LivenessConfig::default(), Backend::Unavailable),
            Arc::new(JsonPersonStore::in_memory()),
            dispatcher,
            ControllerSettings::default(),
        );
        (spawn_engine(controller).unwrap(), audits)
    }

    #[tokio::test]
    async fn test_trigger_without_camera_logs_no_face() {
        let (engine, audits) = engine();
        let result = engine.handle_trigger().await.unwrap();
        assert_eq!(result.event_type, EventType::NoFace);
        assert!(!result.known);
        assert_eq!(audits.0.lock().unwrap().len(), 1);
        assert_eq!(
            engine.cache().last_result().map(|r| r.event_type),
            Some(EventType::NoFace)
        );
    }

    #[tokio::test]
    async fn test_manual_recognition_has_no_side_effects() {
        let (engine, audits) = engine();
        let result = engine.recognize(Intent::manual()).await.unwrap();
        assert_eq!(result.event_type, EventType::NoFace);
        assert!(audits.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enroll_without_face_returns_none() {
        let (engine, _) = engine();
        let person = EnrollRequest {
            name: "Ada".into(),
            group: PersonGroup::Owner,
            note: String::new(),
        };
        assert_eq!(engine.enroll(person).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_status_reports_degraded_backends() {
        let (engine, _) = engine();
        let status = engine.status().await.unwrap();
        assert_eq!(status.detector, "unavailable");
        assert_eq!(status.embedder, "unavailable");
        assert_eq!(status.liveness, "unavailable");
        assert_eq!(status.people, 0);
    }

    #[tokio::test]
    async fn test_manual_unlock_audits_defaults() {
        let (engine, audits) = engine();
        let record = engine.manual_unlock();
        assert_eq!(record.event_type, EventType::ManualUnlock);
        assert!(record.is_real);
        assert!(!record.known);
        assert_eq!(audits.0.lock().unwrap().len(), 1);
    }
}
