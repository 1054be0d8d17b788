//! End-to-end orchestration: frame → recognizer → liveness → decision →
//! side effects, plus the last-result cache shared with readers.

use crate::decision::{decide, decide_no_face, Command, ControllerSettings, EventType, Intent};
use crate::frame::Frame;
use crate::interfaces::{
    AuditLog, AuditRecord, DoorActuator, FrameSource, Notification, Notifier, PersonStore,
    PersonUpdate, StoreError,
};
use crate::liveness::{LivenessChecker, LivenessSignals};
use crate::recognizer::Recognizer;
use crate::types::{Embedding, FaceRegion, Person, PersonGroup};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Outcome of one recognition.
#[derive(Debug, Clone, Serialize)]
pub struct RecognitionResult {
    pub known: bool,
    pub person_id: Option<String>,
    pub person_name: Option<String>,
    pub group: Option<PersonGroup>,
    pub note: Option<String>,
    /// Best similarity, floored at 0. `None` when no face was processed.
    pub score: Option<f32>,
    /// Enrolled people comparable with the probe. Zero means `score` is
    /// not a similarity at all.
    pub candidates: usize,
    pub is_real: bool,
    pub event_type: EventType,
    pub region: Option<FaceRegion>,
    pub liveness: Option<LivenessSignals>,
    #[serde(skip)]
    pub frame: Option<Arc<Frame>>,
}

impl RecognitionResult {
    pub fn new(event_type: EventType, frame: Option<Arc<Frame>>) -> Self {
        Self {
            known: false,
            person_id: None,
            person_name: None,
            group: None,
            note: None,
            score: None,
            candidates: 0,
            is_real: false,
            event_type,
            region: None,
            liveness: None,
            frame,
        }
    }

    pub fn audit_record(&self) -> AuditRecord {
        AuditRecord {
            known: self.known,
            person_id: self.person_id.clone(),
            person_name: self.person_name.clone(),
            group: self.group.clone(),
            note: self.note.clone(),
            score: self.score,
            is_real: self.is_real,
            event_type: self.event_type,
        }
    }

    fn set_person(&mut self, person: &Person) {
        self.person_id = Some(person.id.clone());
        self.person_name = Some(person.name.clone());
        self.group = Some(person.group.clone());
        self.note = Some(person.note.clone());
    }
}

#[derive(Debug, Clone, Default)]
struct CacheSlot {
    pub result: Option<RecognitionResult>,
    pub face_crop: Option<Frame>,
    pub embedding: Option<Embedding>,
}

/// Most recent result, face crop and embedding behind one lock.
///
/// Reads return copies. A `None` crop or embedding on update keeps the
/// previous one.
#[derive(Default)]
pub struct ResultCache {
    inner: Mutex<CacheSlot>,
}

impl ResultCache {
    fn lock(&self) -> MutexGuard<'_, CacheSlot> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn update(
        &self,
        result: RecognitionResult,
        face_crop: Option<Frame>,
        embedding: Option<Embedding>,
    ) {
        let mut slot = self.lock();
        slot.result = Some(result);
        if face_crop.is_some() {
            slot.face_crop = face_crop;
        }
        if embedding.is_some() {
            slot.embedding = embedding;
        }
    }

    pub fn last_result(&self) -> Option<RecognitionResult> {
        self.lock().result.clone()
    }

    pub fn last_face_crop(&self) -> Option<Frame> {
        self.lock().face_crop.clone()
    }

    pub fn last_embedding(&self) -> Option<Embedding> {
        self.lock().embedding.clone()
    }
}

/// Executes decision commands against the side-effect collaborators.
pub struct Dispatcher {
    door: Arc<dyn DoorActuator>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditLog>,
    unlock_duration: Duration,
}

impl Dispatcher {
    pub fn new(
        door: Arc<dyn DoorActuator>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditLog>,
        unlock_duration: Duration,
    ) -> Self {
        Self {
            door,
            notifier,
            audit,
            unlock_duration,
        }
    }

    pub fn execute(&self, commands: &[Command], result: &RecognitionResult) {
        for command in commands {
            match command {
                Command::Unlock(duration) => {
                    tracing::info!(
                        person = result.person_name.as_deref().unwrap_or("-"),
                        seconds = duration.as_secs_f32(),
                        "auto-unlock"
                    );
                    self.door.unlock_async(*duration);
                }
                Command::Notify(category) => self.notifier.send(&Notification {
                    category: *category,
                    frame: result.frame.clone(),
                    person_name: result.person_name.clone(),
                    group: result.group.clone(),
                    score: result.score,
                }),
                Command::Audit => self.audit.append(&result.audit_record()),
            }
        }
    }

    /// Unlock unconditionally and log it. Identity fields come from
    /// `context`, else from the cached last result.
    pub fn manual_unlock(
        &self,
        context: Option<RecognitionResult>,
        cache: &ResultCache,
    ) -> AuditRecord {
        self.door.unlock_async(self.unlock_duration);

        let record = match context.or_else(|| cache.last_result()) {
            Some(ctx) => AuditRecord {
                event_type: EventType::ManualUnlock,
                ..ctx.audit_record()
            },
            None => AuditRecord {
                known: false,
                person_id: None,
                person_name: None,
                group: None,
                note: None,
                score: None,
                is_real: true,
                event_type: EventType::ManualUnlock,
            },
        };
        tracing::info!(person = record.person_name.as_deref().unwrap_or("-"), "manual unlock");
        self.audit.append(&record);
        record
    }
}

/// Backend and store summary for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub detector: &'static str,
    pub embedder: &'static str,
    pub liveness: &'static str,
    pub people: usize,
    pub liveness_samples: usize,
}

pub struct Controller {
    source: Box<dyn FrameSource>,
    recognizer: Recognizer,
    liveness: LivenessChecker,
    store: Arc<dyn PersonStore>,
    dispatcher: Arc<Dispatcher>,
    cache: Arc<ResultCache>,
    settings: ControllerSettings,
}

impl Controller {
    pub fn new(
        source: Box<dyn FrameSource>,
        recognizer: Recognizer,
        liveness: LivenessChecker,
        store: Arc<dyn PersonStore>,
        dispatcher: Arc<Dispatcher>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            source,
            recognizer,
            liveness,
            store,
            dispatcher,
            cache: Arc::new(ResultCache::default()),
            settings,
        }
    }

    pub fn cache(&self) -> Arc<ResultCache> {
        Arc::clone(&self.cache)
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn capture_frame(&self) -> Option<Frame> {
        self.source.capture()
    }

    /// Doorbell press: capture and run with every side effect allowed.
    pub fn handle_trigger(&mut self) -> RecognitionResult {
        let frame = self.capture_frame();
        self.recognize(frame, Intent::button())
    }

    pub fn recognize(&mut self, frame: Option<Frame>, intent: Intent) -> RecognitionResult {
        let Some(frame) = frame else {
            return self.finish_no_face(&intent, None);
        };
        let frame = Arc::new(frame);

        let extraction = self.recognizer.extract(&frame);
        let (Some(embedding), Some(region)) = (extraction.embedding, extraction.region) else {
            return self.finish_no_face(&intent, Some(frame));
        };

        let people = self.store.list();
        let matched = self.recognizer.match_people(&embedding, &people);
        let verdict = self.liveness.assess(&frame, &region);

        let decision = decide(
            &self.settings,
            &intent,
            matched.person.as_ref(),
            matched.similarity,
            verdict.is_real,
        );

        let mut result = RecognitionResult::new(decision.event_type, Some(frame));
        if let Some(person) = &matched.person {
            result.set_person(person);
        }
        result.score = Some(matched.similarity.max(0.0));
        result.candidates = matched.candidates;
        result.is_real = verdict.is_real;
        result.known = decision.known;
        result.region = Some(region);
        result.liveness = Some(verdict.signals);

        tracing::info!(
            event = %result.event_type,
            known = result.known,
            person = result.person_id.as_deref().unwrap_or("-"),
            score = matched.similarity,
            candidates = matched.candidates,
            is_real = result.is_real,
            "recognition finished"
        );

        self.dispatcher.execute(&decision.commands, &result);
        self.cache
            .update(result.clone(), extraction.crop, Some(embedding));
        result
    }

    fn finish_no_face(&self, intent: &Intent, frame: Option<Arc<Frame>>) -> RecognitionResult {
        let decision = decide_no_face(intent);
        let result = RecognitionResult::new(decision.event_type, frame);
        tracing::debug!(has_frame = result.frame.is_some(), "no face");
        self.dispatcher.execute(&decision.commands, &result);
        self.cache.update(result.clone(), None, None);
        result
    }

    /// Capture a frame and extract a face for enrollment. Updates only the
    /// crop/embedding side of the cache.
    pub fn capture_face_embedding(&mut self) -> Option<(Embedding, Frame)> {
        let frame = self.capture_frame()?;
        let extraction = self.recognizer.extract(&frame);
        let embedding = extraction.embedding?;
        let crop = extraction.crop?;
        self.cache.update(
            RecognitionResult::new(EventType::Capture, None),
            Some(crop.clone()),
            Some(embedding.clone()),
        );
        Some((embedding, crop))
    }

    /// Extract a face from an image file. Leaves the cache alone.
    pub fn embedding_from_file(&mut self, path: &Path) -> Option<(Embedding, Frame)> {
        let frame = match Frame::open(path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read image");
                return None;
            }
        };
        let extraction = self.recognizer.extract(&frame);
        Some((extraction.embedding?, extraction.crop?))
    }

    pub fn last_result(&self) -> Option<RecognitionResult> {
        self.cache.last_result()
    }

    pub fn last_face_crop(&self) -> Option<Frame> {
        self.cache.last_face_crop()
    }

    pub fn last_embedding(&self) -> Option<Embedding> {
        self.cache.last_embedding()
    }

    pub fn manual_unlock(&self, context: Option<RecognitionResult>) -> AuditRecord {
        self.dispatcher.manual_unlock(context, &self.cache)
    }

    pub fn reset_liveness(&mut self) {
        self.liveness.reset();
        tracing::debug!("liveness session reset");
    }

    /// Enroll from the cached embedding, capturing one if none is cached.
    /// `Ok(None)` when no face could be obtained.
    pub fn enroll(
        &mut self,
        name: &str,
        group: PersonGroup,
        note: &str,
    ) -> Result<Option<String>, StoreError> {
        let embedding = match self.cache.last_embedding() {
            Some(e) => e,
            None => match self.capture_face_embedding() {
                Some((e, _)) => e,
                None => return Ok(None),
            },
        };
        let id = self.store.add(name, group, note, &embedding)?;
        tracing::info!(id = %id, name, "person enrolled");
        Ok(Some(id))
    }

    pub fn enroll_from_file(
        &mut self,
        path: &Path,
        name: &str,
        group: PersonGroup,
        note: &str,
    ) -> Result<Option<String>, StoreError> {
        let Some((embedding, _)) = self.embedding_from_file(path) else {
            return Ok(None);
        };
        let id = self.store.add(name, group, note, &embedding)?;
        tracing::info!(id = %id, name, path = %path.display(), "person enrolled from file");
        Ok(Some(id))
    }

    /// Apply field changes; with `reembed`, fold in a freshly captured face.
    pub fn update_person(
        &mut self,
        id: &str,
        mut update: PersonUpdate,
        reembed: bool,
    ) -> Result<bool, StoreError> {
        if reembed {
            match self.capture_face_embedding() {
                Some((embedding, _)) => update.embedding = Some(embedding),
                None => tracing::warn!(id, "re-embed requested but no face captured"),
            }
        }
        self.store.update(id, update)
    }

    pub fn remove_person(&self, id: &str) -> Result<bool, StoreError> {
        self.store.delete(id)
    }

    pub fn status(&self) -> ControllerStatus {
        let (detector, embedder) = self.recognizer.backend_kinds();
        ControllerStatus {
            detector,
            embedder,
            liveness: self.liveness.backend_kind(),
            people: self.store.list().len(),
            liveness_samples: self.liveness.session().samples(),
        }
    }
}
