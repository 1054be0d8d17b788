use doorbell_core::{Embedding, Person, PersonGroup, PersonStore, PersonUpdate, StoreError};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// JSON-file person store.
///
/// The whole file is a JSON array of people, rewritten on every change.
/// Records are loaded one by one: older records missing `group`, `note` or
/// timestamps are upgraded and written back, and unusable records are
/// skipped. A file with skipped records or one that does not parse at all
/// is copied to `<path>.bak` before anything is written over it.
pub struct JsonPersonStore {
    /// `None` keeps everything in memory (tests).
    path: Option<PathBuf>,
    people: Mutex<Vec<Person>>,
}

fn now() -> String {
    chrono::Local::now().to_rfc3339()
}

/// Fill in fields older files lack. Returns true if anything was added.
fn migrate_record(record: &mut Map<String, Value>, now: &str) -> bool {
    let mut migrated = false;
    for (key, default) in [("group", PersonGroup::Friend.as_str()), ("note", "")] {
        if !record.contains_key(key) {
            record.insert(key.to_string(), Value::from(default));
            migrated = true;
        }
    }
    if !record.contains_key("created_at") {
        record.insert("created_at".into(), Value::from(now));
        migrated = true;
    }
    if !record.contains_key("updated_at") {
        let created = record.get("created_at").cloned().unwrap_or_else(|| Value::from(now));
        record.insert("updated_at".into(), created);
        migrated = true;
    }
    migrated
}

/// Contents of a store file after per-record recovery.
struct Loaded {
    people: Vec<Person>,
    /// Records were upgraded and should be written back.
    migrated: bool,
    /// Some input could not be used; the file must be kept aside before
    /// the first rewrite.
    damaged: bool,
}

/// Numeric ids from hand-edited files become zero-padded strings.
fn coerce_id(record: &mut Map<String, Value>) -> bool {
    let Some(Value::Number(n)) = record.get("id") else {
        return false;
    };
    let id = match n.as_u64() {
        Some(n) => format!("{n:03}"),
        None => n.to_string(),
    };
    record.insert("id".into(), Value::from(id));
    true
}

/// Parse file contents into people, one record at a time. Records that
/// cannot be used are logged and skipped; the rest still load.
fn parse_people(contents: &str) -> Loaded {
    let records: Vec<Value> = match serde_json::from_str(contents) {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(error = %e, "person store unreadable; starting empty");
            return Loaded {
                people: Vec::new(),
                migrated: false,
                damaged: true,
            };
        }
    };

    let now = now();
    let mut loaded = Loaded {
        people: Vec::with_capacity(records.len()),
        migrated: false,
        damaged: false,
    };
    for (index, record) in records.into_iter().enumerate() {
        let Value::Object(mut map) = record else {
            tracing::warn!(index, "skipping person record that is not an object");
            loaded.damaged = true;
            continue;
        };
        let changed = coerce_id(&mut map) | migrate_record(&mut map, &now);
        match serde_json::from_value::<Person>(Value::Object(map)) {
            Ok(person) => {
                loaded.migrated |= changed;
                loaded.people.push(person);
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "skipping malformed person record");
                loaded.damaged = true;
            }
        }
    }
    loaded
}

/// `<path>.bak` next to the store file.
fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

fn next_id(people: &[Person]) -> String {
    let max = people
        .iter()
        .filter_map(|p| p.id.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    format!("{:03}", max + 1)
}

fn check_embedding(embedding: &Embedding) -> Result<(), StoreError> {
    if embedding.values.iter().any(|v| !v.is_finite()) {
        return Err(StoreError::InvalidEmbedding("non-finite value".into()));
    }
    Ok(())
}

impl JsonPersonStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !path.exists() {
            std::fs::write(path, "[]")?;
        }

        let contents = std::fs::read_to_string(path)?;
        let loaded = parse_people(&contents);
        if loaded.damaged {
            let backup = backup_path(path);
            std::fs::copy(path, &backup)?;
            tracing::warn!(
                path = %path.display(),
                backup = %backup.display(),
                loaded = loaded.people.len(),
                "person store damaged; original kept as backup"
            );
        }
        let store = Self {
            path: Some(path.to_path_buf()),
            people: Mutex::new(loaded.people),
        };
        if loaded.migrated {
            tracing::info!(path = %path.display(), "migrated person records");
            store.save(&store.lock())?;
        }
        tracing::info!(path = %path.display(), people = store.lock().len(), "person store opened");
        Ok(store)
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            people: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Person>> {
        self.people.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn save(&self, people: &[Person]) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(people)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl PersonStore for JsonPersonStore {
    fn list(&self) -> Vec<Person> {
        self.lock().clone()
    }

    fn get(&self, id: &str) -> Option<Person> {
        self.lock().iter().find(|p| p.id == id).cloned()
    }

    fn add(
        &self,
        name: &str,
        group: PersonGroup,
        note: &str,
        embedding: &Embedding,
    ) -> Result<String, StoreError> {
        check_embedding(embedding)?;
        let mut people = self.lock();
        let id = next_id(&people);
        let now = now();
        people.push(Person {
            id: id.clone(),
            name: name.to_string(),
            group,
            note: note.to_string(),
            embedding: Embedding::new(embedding.values.clone()),
            created_at: now.clone(),
            updated_at: now,
        });
        self.save(&people)?;
        Ok(id)
    }

    fn update(&self, id: &str, update: PersonUpdate) -> Result<bool, StoreError> {
        if let Some(e) = &update.embedding {
            check_embedding(e)?;
        }
        let mut people = self.lock();
        let Some(person) = people.iter_mut().find(|p| p.id == id) else {
            return Ok(false);
        };
        if let Some(name) = update.name {
            person.name = name;
        }
        if let Some(group) = update.group {
            person.group = group;
        }
        if let Some(note) = update.note {
            person.note = note;
        }
        if let Some(fresh) = update.embedding {
            person.embedding = person.embedding.merge(&fresh);
        }
        person.updated_at = now();
        self.save(&people)?;
        Ok(true)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut people = self.lock();
        let before = people.len();
        people.retain(|p| p.id != id);
        if people.len() == before {
            return Ok(false);
        }
        self.save(&people)?;
        Ok(true)
    }
}
