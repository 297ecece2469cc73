use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::persist::{DocumentCell, PersistConfig, PersistQueue};
use super::storage::{DocumentStorage, JsonFileStorage, StoreError};
use super::types::{Message, MessageId, MessagePatch, PersistedDocument, Session, SessionId};

/// Owns the persisted document and is its only writer.
///
/// Structural mutations (create, rename, delete, selection, appending a
/// message, replacing the document) are written before the call returns.
/// Message patches coming from streaming runs are coalesced and written when
/// the stream settles, or on [`SessionStore::flush`].
#[derive(Clone)]
pub struct SessionStore {
    cell: Arc<DocumentCell>,
    queue: PersistQueue,
}

impl SessionStore {
    /// Open the JSON document at `path`.
    pub async fn open(path: impl Into<PathBuf>, config: PersistConfig) -> Result<Self, StoreError> {
        Self::load(Arc::new(JsonFileStorage::new(path)), config).await
    }

    /// Load the document from `storage`.
    ///
    /// A missing or unreadable document is replaced by an empty one, which is
    /// written straight away. Reading never fails; the only error is a failed
    /// write of the reseeded or repaired document.
    pub async fn load(
        storage: Arc<dyn DocumentStorage>,
        config: PersistConfig,
    ) -> Result<Self, StoreError> {
        let (document, needs_write) = match storage.read().await {
            Ok(Some(mut document)) => {
                let repaired = repair(&mut document);
                (document, repaired)
            }
            Ok(None) => {
                info!(target: "session::store", "No session store found, seeding an empty one");
                (PersistedDocument::default(), true)
            }
            Err(err) => {
                warn!(
                    target: "session::store",
                    error = %err,
                    "Session store unreadable, reseeding with an empty document"
                );
                if let Err(quarantine_err) = storage.quarantine().await {
                    warn!(target: "session::store", error = %quarantine_err, "Could not move unreadable store aside");
                }
                (PersistedDocument::default(), true)
            }
        };

        let cell = Arc::new(DocumentCell {
            document: Mutex::new(document),
            storage,
        });
        let queue = PersistQueue::spawn(cell.clone(), config);
        let store = Self { cell, queue };

        if needs_write {
            store.queue.write_now().await?;
        }
        Ok(store)
    }

    pub async fn get_all(&self) -> PersistedDocument {
        self.cell.document.lock().await.clone()
    }

    pub async fn session(&self, id: &SessionId) -> Option<Session> {
        self.cell.document.lock().await.session(id).cloned()
    }

    pub async fn active_session_id(&self) -> Option<SessionId> {
        self.cell.document.lock().await.active_session_id.clone()
    }

    /// Replace the whole document.
    pub async fn set_all(&self, document: PersistedDocument) -> Result<(), StoreError> {
        *self.cell.document.lock().await = document;
        self.queue.write_now().await
    }

    /// Insert `session` at the front of the list and make it active.
    pub async fn create_session(&self, session: Session) -> Result<(), StoreError> {
        {
            let mut doc = self.cell.document.lock().await;
            doc.active_session_id = Some(session.id.clone());
            doc.sessions.insert(0, session);
        }
        self.queue.write_now().await
    }

    /// Replace the session with the same id in place. Unknown ids are ignored.
    pub async fn update_session(&self, session: Session) -> Result<(), StoreError> {
        {
            let mut doc = self.cell.document.lock().await;
            match doc.session_mut(&session.id) {
                Some(existing) => {
                    *existing = session;
                    existing.touch();
                }
                None => debug!(target: "session::store", session_id = %session.id, "update_session: unknown id"),
            }
        }
        self.queue.write_now().await
    }

    pub async fn rename_session(
        &self,
        id: &SessionId,
        title: impl Into<String>,
    ) -> Result<bool, StoreError> {
        let renamed = {
            let mut doc = self.cell.document.lock().await;
            match doc.session_mut(id) {
                Some(session) => {
                    session.title = title.into();
                    session.touch();
                    true
                }
                None => false,
            }
        };
        self.queue.write_now().await?;
        Ok(renamed)
    }

    /// Remove a session. Deleting the active session moves the pointer to the
    /// new first session, or clears it when none remain.
    pub async fn delete_session(&self, id: &SessionId) -> Result<(), StoreError> {
        {
            let mut doc = self.cell.document.lock().await;
            doc.sessions.retain(|s| &s.id != id);
            if doc.active_session_id.as_ref() == Some(id) {
                doc.active_session_id = doc.sessions.first().map(|s| s.id.clone());
            }
        }
        self.queue.write_now().await
    }

    /// Set the active pointer. Membership is not checked; an unknown id is
    /// kept as given until the next load repairs it.
    pub async fn set_active_session(&self, id: Option<SessionId>) -> Result<(), StoreError> {
        {
            let mut doc = self.cell.document.lock().await;
            if let Some(id) = id.as_ref().filter(|id| !doc.contains(id)) {
                warn!(target: "session::store", session_id = %id, "Active session set to an unknown id");
            }
            doc.active_session_id = id;
        }
        self.queue.write_now().await
    }

    /// Append a message to the end of a session. Returns `false` if the session is gone.
    pub async fn append_message(
        &self,
        session_id: &SessionId,
        message: Message,
    ) -> Result<bool, StoreError> {
        let appended = {
            let mut doc = self.cell.document.lock().await;
            match doc.session_mut(session_id) {
                Some(session) => {
                    session.messages.push(message);
                    session.touch();
                    true
                }
                None => false,
            }
        };
        if appended {
            self.queue.write_now().await?;
        }
        Ok(appended)
    }

    /// Patch a message in place. The write is deferred and coalesced.
    /// Returns `false` if the session or message no longer exists.
    pub async fn update_message(
        &self,
        session_id: &SessionId,
        message_id: &MessageId,
        patch: MessagePatch,
    ) -> Result<bool, StoreError> {
        let updated = {
            let mut doc = self.cell.document.lock().await;
            let Some(session) = doc.session_mut(session_id) else {
                return Ok(false);
            };
            let Some(message) = session.messages.iter_mut().find(|m| &m.id == message_id) else {
                return Ok(false);
            };
            message.apply(patch);
            session.touch();
            true
        };
        if updated {
            self.queue.schedule()?;
        }
        Ok(updated)
    }

    /// Write any deferred change now and report a deferred write failure.
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.queue.flush().await
    }
}

/// Fix recoverable inconsistencies in a freshly loaded document.
/// Returns `true` when anything changed.
fn repair(doc: &mut PersistedDocument) -> bool {
    let mut changed = false;

    let mut seen = HashSet::new();
    let before = doc.sessions.len();
    doc.sessions.retain(|s| seen.insert(s.id.clone()));
    if doc.sessions.len() != before {
        warn!(
            target: "session::store",
            dropped = before - doc.sessions.len(),
            "Dropped sessions with duplicate ids"
        );
        changed = true;
    }

    if !doc.active_pointer_is_valid() {
        warn!(target: "session::store", "Active session pointer was dangling, resetting");
        doc.active_session_id = doc.sessions.first().map(|s| s.id.clone());
        changed = true;
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::storage::{DocumentStorage, MemoryStorage};
    use crate::session::types::Role;
    use proptest::prelude::*;
    use std::time::Duration;

    async fn memory_store() -> (SessionStore, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let store = SessionStore::load(storage.clone(), PersistConfig::default())
            .await
            .unwrap();
        (store, storage)
    }

    #[tokio::test]
    async fn load_seeds_and_persists_default_document() {
        let (store, storage) = memory_store().await;
        assert_eq!(store.get_all().await, PersistedDocument::default());
        assert_eq!(storage.write_count(), 1);
    }

    #[tokio::test]
    async fn load_heals_corrupt_contents() {
        let storage = Arc::new(MemoryStorage::with_raw("{\"sessions\": [oops"));
        let store = SessionStore::load(storage.clone(), PersistConfig::default())
            .await
            .unwrap();
        assert_eq!(store.get_all().await, PersistedDocument::default());
        assert_eq!(
            storage.raw().as_deref(),
            Some(r#"{"sessions":[],"activeSessionId":null}"#)
        );
    }

    #[tokio::test]
    async fn load_repairs_dangling_active_pointer() {
        let raw = r#"{"sessions":[{"id":"a","title":"A","createdAt":1,"updatedAt":1,"messages":[]}],
                      "activeSessionId":"missing"}"#;
        let storage = Arc::new(MemoryStorage::with_raw(raw));
        let store = SessionStore::load(storage.clone(), PersistConfig::default())
            .await
            .unwrap();
        assert_eq!(store.active_session_id().await, Some(SessionId::from("a")));
        assert_eq!(storage.write_count(), 1);
    }

    #[tokio::test]
    async fn create_prepends_and_activates() {
        let (store, _) = memory_store().await;
        let first = Session::new("first");
        let second = Session::new("second");
        store.create_session(first.clone()).await.unwrap();
        store.create_session(second.clone()).await.unwrap();

        let doc = store.get_all().await;
        assert_eq!(doc.sessions[0].id, second.id);
        assert_eq!(doc.sessions[1].id, first.id);
        assert_eq!(doc.active_session_id, Some(second.id));
    }

    #[tokio::test]
    async fn deleting_active_session_moves_pointer_to_first() {
        let (store, _) = memory_store().await;
        let a = Session::new("a");
        let b = Session::new("b");
        store.create_session(a.clone()).await.unwrap();
        store.create_session(b.clone()).await.unwrap();

        store.delete_session(&b.id).await.unwrap();
        assert_eq!(store.active_session_id().await, Some(a.id.clone()));

        store.delete_session(&a.id).await.unwrap();
        assert_eq!(store.active_session_id().await, None);
    }

    #[tokio::test]
    async fn deleting_inactive_session_keeps_pointer() {
        let (store, _) = memory_store().await;
        let a = Session::new("a");
        let b = Session::new("b");
        store.create_session(a.clone()).await.unwrap();
        store.create_session(b.clone()).await.unwrap();

        store.delete_session(&a.id).await.unwrap();
        assert_eq!(store.active_session_id().await, Some(b.id));
    }

    #[tokio::test]
    async fn update_session_ignores_unknown_ids() {
        let (store, _) = memory_store().await;
        let a = Session::new("a");
        store.create_session(a.clone()).await.unwrap();

        store.update_session(Session::new("stranger")).await.unwrap();
        let doc = store.get_all().await;
        assert_eq!(doc.sessions.len(), 1);
        assert_eq!(doc.sessions[0].title, "a");

        let mut renamed = a.clone();
        renamed.title = "renamed".to_string();
        store.update_session(renamed).await.unwrap();
        assert_eq!(store.session(&a.id).await.unwrap().title, "renamed");
    }

    #[tokio::test]
    async fn set_active_tolerates_unknown_id() {
        let (store, _) = memory_store().await;
        store
            .set_active_session(Some(SessionId::from("ghost")))
            .await
            .unwrap();
        assert_eq!(store.active_session_id().await, Some(SessionId::from("ghost")));
    }

    #[tokio::test]
    async fn discrete_mutations_write_immediately() {
        let (store, storage) = memory_store().await;
        let session = Session::new("chat");
        store.create_session(session.clone()).await.unwrap();
        store
            .append_message(&session.id, Message::user("hello"))
            .await
            .unwrap();
        store.rename_session(&session.id, "hello").await.unwrap();
        assert_eq!(storage.write_count(), 4);
    }

    #[tokio::test]
    async fn append_and_update_refresh_updated_at() {
        let (store, _) = memory_store().await;
        let mut session = Session::new("chat");
        session.updated_at = 0;
        store.create_session(session.clone()).await.unwrap();

        let message = Message::streaming_placeholder();
        assert!(store.append_message(&session.id, message.clone()).await.unwrap());
        let after_append = store.session(&session.id).await.unwrap();
        assert!(after_append.updated_at > 0);

        assert!(
            store
                .update_message(&session.id, &message.id, MessagePatch::finished("done"))
                .await
                .unwrap()
        );
        let stored = store.session(&session.id).await.unwrap();
        let stored_message = stored.message(&message.id).unwrap();
        assert_eq!(stored_message.content, "done");
        assert_eq!(stored_message.role, Role::Assistant);
        assert!(!stored_message.is_streaming);
    }

    #[tokio::test]
    async fn update_message_on_missing_targets_is_a_no_op() {
        let (store, storage) = memory_store().await;
        let updated = store
            .update_message(
                &SessionId::from("nope"),
                &MessageId::from("nope"),
                MessagePatch::finished("x"),
            )
            .await
            .unwrap();
        assert!(!updated);
        store.flush().await.unwrap();
        assert_eq!(storage.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_of_message_updates_coalesce_into_one_write() {
        let (store, storage) = memory_store().await;
        let session = Session::new("chat");
        store.create_session(session.clone()).await.unwrap();
        let message = Message::streaming_placeholder();
        store.append_message(&session.id, message.clone()).await.unwrap();
        let baseline = storage.write_count();

        let mut buffer = String::new();
        for i in 0..40 {
            buffer.push_str(&i.to_string());
            store
                .update_message(&session.id, &message.id, MessagePatch::streaming(buffer.clone()))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(storage.write_count(), baseline);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(storage.write_count(), baseline + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_updates_are_written_by_max_delay() {
        let (store, storage) = memory_store().await;
        let session = Session::new("chat");
        store.create_session(session.clone()).await.unwrap();
        let message = Message::streaming_placeholder();
        store.append_message(&session.id, message.clone()).await.unwrap();
        let baseline = storage.write_count();

        for _ in 0..250 {
            store
                .update_message(&session.id, &message.id, MessagePatch::streaming("x"))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(storage.write_count() > baseline);
    }

    #[tokio::test]
    async fn flush_forces_pending_write() {
        let (store, storage) = memory_store().await;
        let session = Session::new("chat");
        store.create_session(session.clone()).await.unwrap();
        let message = Message::streaming_placeholder();
        store.append_message(&session.id, message.clone()).await.unwrap();
        let baseline = storage.write_count();

        store
            .update_message(&session.id, &message.id, MessagePatch::finished("final"))
            .await
            .unwrap();
        store.flush().await.unwrap();
        assert_eq!(storage.write_count(), baseline + 1);
        assert!(storage.raw().unwrap().contains("final"));

        store.flush().await.unwrap();
        assert_eq!(storage.write_count(), baseline + 1);
    }

    #[tokio::test]
    async fn write_failures_are_surfaced() {
        let (store, storage) = memory_store().await;
        storage.set_fail_writes(true);
        let err = store.create_session(Session::new("x")).await.unwrap_err();
        assert!(err.is_write_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_write_failures_are_reported_by_flush() {
        let (store, storage) = memory_store().await;
        let session = Session::new("chat");
        store.create_session(session.clone()).await.unwrap();
        let message = Message::streaming_placeholder();
        store.append_message(&session.id, message.clone()).await.unwrap();

        storage.set_fail_writes(true);
        store
            .update_message(&session.id, &message.id, MessagePatch::streaming("a"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        storage.set_fail_writes(false);
        let err = store.flush().await.unwrap_err();
        assert!(err.is_write_failure());
        store.flush().await.unwrap();
        assert_eq!(on_disk(&storage).await, store.get_all().await);
    }

    async fn on_disk(storage: &MemoryStorage) -> PersistedDocument {
        storage.read().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn failed_flush_keeps_the_change_for_the_next_one() {
        let (store, storage) = memory_store().await;
        let session = Session::new("chat");
        store.create_session(session.clone()).await.unwrap();
        let message = Message::streaming_placeholder();
        store.append_message(&session.id, message.clone()).await.unwrap();
        store
            .update_message(&session.id, &message.id, MessagePatch::finished("FINAL-ANSWER"))
            .await
            .unwrap();

        storage.set_fail_writes(true);
        assert!(store.flush().await.unwrap_err().is_write_failure());
        assert!(!storage.raw().unwrap().contains("FINAL-ANSWER"));

        storage.set_fail_writes(false);
        store.flush().await.unwrap();
        assert!(storage.raw().unwrap().contains("FINAL-ANSWER"));
        assert_eq!(on_disk(&storage).await, store.get_all().await);
    }

    #[tokio::test]
    async fn failed_discrete_writes_are_retried_by_flush() {
        let (store, storage) = memory_store().await;
        let keep = Session::new("keep");
        let gone = Session::new("gone");
        store.create_session(keep.clone()).await.unwrap();

        storage.set_fail_writes(true);
        assert!(store.create_session(gone.clone()).await.is_err());
        assert!(store.delete_session(&keep.id).await.is_err());
        let writes_before = storage.write_count();

        storage.set_fail_writes(false);
        store.flush().await.unwrap();
        assert!(storage.write_count() > writes_before);

        let disk = on_disk(&storage).await;
        assert_eq!(disk, store.get_all().await);
        assert_eq!(disk.sessions.len(), 1);
        assert_eq!(disk.sessions[0].id, gone.id);
        assert_eq!(disk.active_session_id, Some(gone.id));

        // Nothing left to write once the file is current.
        let writes = storage.write_count();
        store.flush().await.unwrap();
        assert_eq!(storage.write_count(), writes);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");

        let mut session = Session::new("Round trip");
        let mut reply = Message::new(Role::Assistant, "partial");
        reply.error = Some("stream dropped".to_string());
        session.messages = vec![Message::user("question"), reply];
        let doc = PersistedDocument {
            active_session_id: Some(session.id.clone()),
            sessions: vec![session, Session::new("Other")],
        };

        let store = SessionStore::open(&path, PersistConfig::default())
            .await
            .unwrap();
        store.set_all(doc.clone()).await.unwrap();

        let reopened = SessionStore::open(&path, PersistConfig::default())
            .await
            .unwrap();
        assert_eq!(reopened.get_all().await, doc);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Create,
        Rename(usize),
        Delete(usize),
        Select(usize),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Create),
            (0usize..8).prop_map(Op::Rename),
            (0usize..8).prop_map(Op::Delete),
            (0usize..8).prop_map(Op::Select),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn active_pointer_stays_valid(ops in prop::collection::vec(arb_op(), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let (store, _) = memory_store().await;
                for op in ops {
                    let ids: Vec<SessionId> =
                        store.get_all().await.sessions.into_iter().map(|s| s.id).collect();
                    match op {
                        Op::Create => store.create_session(Session::new("s")).await.unwrap(),
                        Op::Rename(i) => {
                            if let Some(id) = ids.get(i % ids.len().max(1)) {
                                store.rename_session(id, "renamed").await.unwrap();
                            }
                        }
                        Op::Delete(i) => {
                            if let Some(id) = ids.get(i % ids.len().max(1)) {
                                store.delete_session(id).await.unwrap();
                            }
                        }
                        Op::Select(i) => {
                            if let Some(id) = ids.get(i % ids.len().max(1)) {
                                store.set_active_session(Some(id.clone())).await.unwrap();
                            }
                        }
                    }
                    let doc = store.get_all().await;
                    assert!(doc.active_pointer_is_valid());
                }
            });
        }
    }
}
