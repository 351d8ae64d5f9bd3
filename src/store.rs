//! Persistence: the three entity-store verbs and the upsert gateway on top of them.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, StoreError, WizardError};
use crate::report::Report;
use crate::session::{SessionId, WizardSession};

/// Field map of a stored entity.
pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub id: String,
    pub fields: Fields,
}

/// Equality filter over top-level fields.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    pub equals: Fields,
}

impl EntityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.insert(field.into(), value.into());
        self
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        self.equals
            .iter()
            .all(|(key, expected)| fields.get(key) == Some(expected))
    }
}

/// The hosted entity store. Only these three verbs are relied on.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn list(&self, filter: &EntityFilter) -> std::result::Result<Vec<EntityRecord>, StoreError>;

    async fn create(&self, fields: Fields) -> std::result::Result<EntityRecord, StoreError>;

    /// Overwrite the given top-level fields, leaving the others alone.
    async fn update(
        &self,
        id: &str,
        partial: Fields,
    ) -> std::result::Result<EntityRecord, StoreError>;
}

/// Process-local entity store with failure injection and call counters.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    records: Mutex<Vec<EntityRecord>>,
    fail_writes: AtomicUsize,
    fail_reads: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
    lists: AtomicUsize,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<EntityRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Default::default()
        }
    }

    /// Make the next `count` create/update calls fail as unavailable.
    pub fn fail_next_writes(&self, count: usize) {
        self.fail_writes.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` list calls fail as unavailable.
    pub fn fail_next_reads(&self, count: usize) {
        self.fail_reads.store(count, Ordering::SeqCst);
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Successful create and update calls combined.
    pub fn write_count(&self) -> usize {
        self.create_count() + self.update_count()
    }

    pub fn list_count(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub async fn records(&self) -> Vec<EntityRecord> {
        self.records.lock().await.clone()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn list(&self, filter: &EntityFilter) -> std::result::Result<Vec<EntityRecord>, StoreError> {
        if Self::take_failure(&self.fail_reads) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        self.lists.fetch_add(1, Ordering::SeqCst);
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|r| filter.matches(&r.fields))
            .cloned()
            .collect())
    }

    async fn create(&self, fields: Fields) -> std::result::Result<EntityRecord, StoreError> {
        if Self::take_failure(&self.fail_writes) {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        let record = EntityRecord {
            id: uuid::Uuid::new_v4().to_string(),
            fields,
        };
        self.records.lock().await.push(record.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    async fn update(
        &self,
        id: &str,
        partial: Fields,
    ) -> std::result::Result<EntityRecord, StoreError> {
        if Self::take_failure(&self.fail_writes) {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.fields.extend(partial);
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(record.clone())
    }
}

/// Result of a gateway save.
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    /// The session as the store now holds it, `id` included.
    pub session: WizardSession,
    /// Top-level fields written. Empty when the save was a no-op.
    pub changed_fields: Vec<String>,
}

impl SaveOutcome {
    pub fn written(&self) -> bool {
        !self.changed_fields.is_empty()
    }
}

const LAST_SAVED_AT: &str = "last_saved_at";

/// Upsert semantics for wizard sessions over an [`EntityStore`].
///
/// Stateless apart from its store handle; the caller passes the last confirmed
/// session as the diff baseline.
#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn EntityStore>,
    wizard_type: String,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn EntityStore>, wizard_type: impl Into<String>) -> Self {
        Self {
            store,
            wizard_type: wizard_type.into(),
        }
    }

    pub fn wizard_type(&self) -> &str {
        &self.wizard_type
    }

    /// Most recently saved session for this owner and wizard type.
    #[instrument(skip_all, fields(owner_key = owner_key, wizard_type = %self.wizard_type))]
    pub async fn load_latest(&self, owner_key: &str) -> Result<Option<WizardSession>> {
        let filter = EntityFilter::new()
            .eq("owner_key", owner_key)
            .eq("wizard_type", self.wizard_type.as_str());
        let records = self
            .store
            .list(&filter)
            .await
            .map_err(|e| WizardError::persistence("load", e))?;

        let mut sessions = records
            .into_iter()
            .map(session_from_record)
            .collect::<Result<Vec<_>>>()?;
        if sessions.len() > 1 {
            warn!(
                count = sessions.len(),
                "More than one stored session for owner; using the latest"
            );
        }
        sessions.sort_by_key(|s| s.last_saved_at);
        Ok(sessions.pop())
    }

    /// Create or update `draft`, writing only fields that differ from `baseline`.
    ///
    /// Without an id the session is matched by owner key, so a second "first save"
    /// never creates a duplicate.
    #[instrument(skip_all, fields(owner_key = %draft.owner_key, session_id = ?draft.id))]
    pub async fn save(
        &self,
        draft: &WizardSession,
        baseline: Option<&WizardSession>,
    ) -> Result<SaveOutcome> {
        let payload = session_fields(draft)?;

        let (id, previous) = match &draft.id {
            Some(id) => (
                Some(id.clone()),
                baseline.filter(|b| b.id.as_ref() == Some(id)).cloned(),
            ),
            None => match self.load_latest(&draft.owner_key).await? {
                Some(existing) => (existing.id.clone(), Some(existing)),
                None => (None, None),
            },
        };

        let Some(id) = id else {
            let mut fields = payload;
            fields.insert(LAST_SAVED_AT.to_string(), json!(Utc::now()));
            let changed: Vec<String> = fields.keys().cloned().collect();
            let record = self
                .store
                .create(fields)
                .await
                .map_err(|e| WizardError::persistence("create", e))?;
            info!(session_id = %record.id, "Created wizard session");
            return Ok(SaveOutcome {
                session: session_from_record(record)?,
                changed_fields: changed,
            });
        };

        let changed = match &previous {
            Some(previous) => changed_fields(&session_fields(previous)?, &payload)?,
            None => payload.keys().cloned().collect(),
        };

        if changed.is_empty() {
            debug!(session_id = %id, "Nothing changed since last save; skipping write");
            let mut session = previous.unwrap_or_else(|| draft.clone());
            session.id = Some(id);
            return Ok(SaveOutcome {
                session,
                changed_fields: changed,
            });
        }

        let mut partial: Fields = changed
            .iter()
            .filter_map(|key| payload.get(key).map(|v| (key.clone(), v.clone())))
            .collect();
        partial.insert(LAST_SAVED_AT.to_string(), json!(Utc::now()));

        let record = self
            .store
            .update(id.as_str(), partial)
            .await
            .map_err(|e| WizardError::persistence("update", e))?;
        debug!(session_id = %id, fields = ?changed, "Updated wizard session");
        Ok(SaveOutcome {
            session: session_from_record(record)?,
            changed_fields: changed,
        })
    }

    /// Store a report on an existing session.
    #[instrument(skip_all, fields(session_id = %id))]
    pub async fn attach_report(&self, id: &SessionId, report: &Report) -> Result<WizardSession> {
        let mut partial = Fields::new();
        partial.insert("report".to_string(), serde_json::to_value(report)?);
        partial.insert(LAST_SAVED_AT.to_string(), json!(Utc::now()));
        let record = self
            .store
            .update(id.as_str(), partial)
            .await
            .map_err(|e| WizardError::persistence("attach report to", e))?;
        session_from_record(record)
    }
}

/// Stored fields of a session, without the diagnostic timestamp.
fn session_fields(session: &WizardSession) -> Result<Fields> {
    match serde_json::to_value(session)? {
        Value::Object(mut fields) => {
            fields.remove(LAST_SAVED_AT);
            Ok(fields)
        }
        _ => Err(WizardError::contract("session did not serialize to an object")),
    }
}

fn session_from_record(record: EntityRecord) -> Result<WizardSession> {
    let EntityRecord { id, fields } = record;
    let mut session: WizardSession = serde_json::from_value(Value::Object(fields))
        .map_err(|e| WizardError::contract(format!("stored session `{id}` is malformed: {e}")))?;
    session.id = Some(SessionId::new(id));
    Ok(session)
}

/// Top-level fields touched by the JSON Patch from `before` to `after`.
fn changed_fields(before: &Fields, after: &Fields) -> Result<Vec<String>> {
    let before = Value::Object(before.clone());
    let after_value = Value::Object(after.clone());
    let patch = json_patch::diff(&before, &after_value);
    let ops = serde_json::to_value(&patch)?;

    let mut fields = BTreeSet::new();
    for op in ops.as_array().into_iter().flatten() {
        let Some(path) = op.get("path").and_then(Value::as_str) else {
            continue;
        };
        match path.split('/').nth(1) {
            Some(top) if !top.is_empty() => {
                fields.insert(top.replace("~1", "/").replace("~0", "~"));
            }
            _ => return Ok(after.keys().cloned().collect()),
        }
    }
    Ok(fields.into_iter().collect())
}
