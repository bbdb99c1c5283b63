use crate::history::codec;
use crate::history::reducer::{ Action, HistoryWarning };
use crate::history::SnapshotStore;
use crate::models::chat::{ Chat, ChatMessage, History };
use log::{ debug, error, info, warn };
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_STORAGE_KEY: &str = "chatHistory";
pub const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_millis(500);

enum PendingWrite {
    Save(String),
    Remove,
}

/// Owns the chat history and keeps its persisted snapshot in sync.
pub struct ChatSession {
    history: History,
    store: Arc<dyn SnapshotStore>,
    storage_key: String,
    save_debounce: Duration,
    activated: bool,
    load_failed: bool,
    pending_save: Option<JoinHandle<()>>,
}

impl ChatSession {
    pub fn new(store: Arc<dyn SnapshotStore>, storage_key: impl Into<String>, save_debounce: Duration) -> Self {
        Self {
            history: History::default(),
            store,
            storage_key: storage_key.into(),
            save_debounce,
            activated: false,
            load_failed: false,
            pending_save: None,
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn current_chat_id(&self) -> Option<&str> {
        self.history.current_chat_id.as_deref()
    }

    pub fn current_chat(&self) -> Option<&Chat> {
        self.history.current_chat()
    }

    pub fn current_messages(&self) -> &[ChatMessage] {
        self.history.current_messages()
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    /// Restores the persisted snapshot. Only the first successful read has any
    /// effect. While the store cannot be read, writes are held back and the
    /// next call retries.
    pub async fn activate(&mut self) {
        if self.activated {
            return;
        }
        let retrying = self.load_failed;
        if !retrying && !self.history.chats.is_empty() {
            self.activated = true;
            return;
        }

        let raw = match self.store.load(&self.storage_key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to read saved chat history, holding writes until it can be read: {}", e);
                self.load_failed = true;
                return;
            }
        };
        self.activated = true;
        self.load_failed = false;

        let Some(raw) = raw else {
            debug!("No saved chat history under '{}'", self.storage_key);
            if retrying {
                self.schedule_save();
            }
            return;
        };

        match codec::decode(&raw) {
            Ok(saved) => {
                info!("Restored {} chat(s) from saved history", saved.chats.len());
                let (chats, current_chat_id) = if retrying {
                    self.merged_with(saved)
                } else {
                    (saved.chats, saved.current_chat_id)
                };
                self.dispatch(Action::ReplaceAll { chats, current_chat_id });
                if self.history.chats.is_empty() {
                    warn!("Saved chat history held no valid chats, removing it");
                    self.remove_snapshot().await;
                } else if retrying {
                    self.schedule_save();
                }
            }
            Err(e) => {
                warn!("Discarding unreadable chat history: {}", e);
                self.remove_snapshot().await;
                if retrying {
                    self.schedule_save();
                }
            }
        }
    }

    /// Chats started while the store was unreadable go first, then the saved ones.
    fn merged_with(&self, saved: History) -> (Vec<Chat>, Option<String>) {
        let mut chats = self.history.chats.clone();
        chats.extend(saved.chats.into_iter().filter(|chat| !self.history.contains_chat(&chat.id)));
        let current_chat_id = self.history.current_chat_id.clone().or(saved.current_chat_id);
        (chats, current_chat_id)
    }

    async fn remove_snapshot(&self) {
        if let Err(e) = self.store.remove(&self.storage_key).await {
            error!("Failed to remove saved chat history: {}", e);
        }
    }

    pub fn start_new_chat(&mut self, seed: ChatMessage) -> Option<HistoryWarning> {
        debug!("Starting new chat with message {}", seed.id);
        self.dispatch(Action::StartChat(seed))
    }

    /// Callers own id uniqueness and must have started a chat first.
    pub fn add_message_to_chat(&mut self, message: ChatMessage) -> Option<HistoryWarning> {
        self.dispatch(Action::AppendMessage(message))
    }

    pub fn load_chat(&mut self, id: &str) -> Option<HistoryWarning> {
        self.dispatch(Action::SelectChat(id.to_string()))
    }

    pub fn delete_chat(&mut self, id: &str) -> Option<HistoryWarning> {
        self.dispatch(Action::DeleteChat(id.to_string()))
    }

    pub fn clear_current(&mut self) -> Option<HistoryWarning> {
        self.dispatch(Action::ClearCurrent)
    }

    pub fn clear_all(&mut self) -> Option<HistoryWarning> {
        self.dispatch(Action::ClearAll)
    }

    fn dispatch(&mut self, action: Action) -> Option<HistoryWarning> {
        let before = self.history.clone();
        let warning = self.history.dispatch(action);
        if warning.is_none() && self.history != before {
            self.schedule_save();
        }
        warning
    }

    fn pending_write(&self) -> Option<PendingWrite> {
        if self.history.chats.is_empty() {
            return Some(PendingWrite::Remove);
        }
        match codec::encode(&self.history) {
            Ok(raw) => Some(PendingWrite::Save(raw)),
            Err(e) => {
                error!("Failed to serialize chat history: {}", e);
                None
            }
        }
    }

    fn cancel_pending(&mut self) -> bool {
        match self.pending_save.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    fn schedule_save(&mut self) {
        self.cancel_pending();
        if self.load_failed {
            debug!("Saved chat history could not be read yet, not writing");
            return;
        }
        let Some(write) = self.pending_write() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let key = self.storage_key.clone();
        let delay = self.save_debounce;

        self.pending_save = Some(
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                perform_write(store.as_ref(), &key, write).await;
            })
        );
    }

    /// Writes the latest snapshot now if a debounced write is still pending.
    pub async fn flush(&mut self) {
        if !self.cancel_pending() {
            return;
        }
        if let Some(write) = self.pending_write() {
            perform_write(self.store.as_ref(), &self.storage_key, write).await;
        }
    }
}

async fn perform_write(store: &dyn SnapshotStore, key: &str, write: PendingWrite) {
    let result = match write {
        PendingWrite::Save(raw) => {
            debug!("Saving chat history ({} bytes)", raw.len());
            store.save(key, &raw).await
        }
        PendingWrite::Remove => {
            debug!("Chat history is empty, removing saved snapshot");
            store.remove(key).await
        }
    };
    if let Err(e) = result {
        error!("Failed to persist chat history: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{ MemorySnapshotStore, StoreError };
    use crate::models::chat::Role;
    use async_trait::async_trait;
    use std::sync::atomic::{ AtomicBool, Ordering };

    /// Memory store whose reads fail while `offline` is set.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemorySnapshotStore,
        offline: AtomicBool,
    }

    #[async_trait]
    impl SnapshotStore for FlakyStore {
        async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "store offline").into());
            }
            self.inner.load(key).await
        }

        async fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.inner.save(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key).await
        }
    }

    const KEY: &str = "chatHistory";

    fn session_with(store: &Arc<MemorySnapshotStore>) -> ChatSession {
        ChatSession::new(store.clone(), KEY, DEFAULT_SAVE_DEBOUNCE)
    }

    async fn settle() {
        tokio::time::sleep(DEFAULT_SAVE_DEBOUNCE + Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_changes_is_written_once() {
        let store = Arc::new(MemorySnapshotStore::default());
        let mut session = session_with(&store);
        session.activate().await;

        session.start_new_chat(ChatMessage::user("Plan a trip to Kyoto"));
        session.add_message_to_chat(ChatMessage::assistant("When?"));
        session.add_message_to_chat(ChatMessage::user("April"));
        assert_eq!(store.write_count(), 0);

        settle().await;
        assert_eq!(store.write_count(), 1);
        let saved = codec::decode(&store.get(KEY).unwrap()).unwrap();
        assert_eq!(&saved, session.history());
        assert_eq!(saved.chats[0].messages.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn restores_saved_history_once() {
        let store = Arc::new(MemorySnapshotStore::default());
        let mut first = session_with(&store);
        first.activate().await;
        first.start_new_chat(ChatMessage::user("Gift ideas for my sister"));
        first.flush().await;

        let mut second = session_with(&store);
        second.activate().await;
        assert_eq!(second.history(), first.history());
        assert_eq!(second.current_messages().len(), 1);
        assert_eq!(second.current_messages()[0].role, Role::User);

        second.clear_all();
        second.activate().await;
        assert!(second.history().chats.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_snapshot_is_discarded() {
        let store = Arc::new(MemorySnapshotStore::with_entry(KEY, "{\"history\": [{\"id\": 1}]}"));
        let mut session = session_with(&store);
        session.activate().await;

        assert!(session.history().chats.is_empty());
        assert_eq!(store.get(KEY), None);
    }

    #[tokio::test(start_paused = true)]
    async fn emptied_history_removes_snapshot() {
        let store = Arc::new(MemorySnapshotStore::default());
        let mut session = session_with(&store);
        session.activate().await;
        session.start_new_chat(ChatMessage::user("hello"));
        settle().await;
        assert!(store.get(KEY).is_some());

        let id = session.current_chat_id().unwrap().to_string();
        session.delete_chat(&id);
        settle().await;
        assert_eq!(store.get(KEY), None);
        assert_eq!(session.current_chat_id(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_actions_do_not_schedule_writes() {
        let store = Arc::new(MemorySnapshotStore::default());
        let mut session = session_with(&store);
        session.activate().await;

        assert_eq!(
            session.add_message_to_chat(ChatMessage::user("orphan")),
            Some(HistoryWarning::NoCurrentChat)
        );
        assert!(session.load_chat("missing").is_some());
        session.clear_current();
        settle().await;
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_without_pending_write_is_a_noop() {
        let store = Arc::new(MemorySnapshotStore::default());
        let mut session = session_with(&store);
        session.flush().await;
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn save_waits_for_quiet_period_after_last_change() {
        let store = Arc::new(MemorySnapshotStore::default());
        let mut session = session_with(&store);
        session.activate().await;

        session.start_new_chat(ChatMessage::user("Plan a trip to Oslo"));
        tokio::time::sleep(Duration::from_millis(400)).await;
        session.add_message_to_chat(ChatMessage::assistant("Which month?"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.write_count(), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        tokio::task::yield_now().await;
        assert_eq!(store.write_count(), 1);
        let saved = codec::decode(&store.get(KEY).unwrap()).unwrap();
        assert_eq!(saved.chats[0].messages.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_without_valid_chats_is_removed() {
        let raw = r#"{"history": [{"id": "c1", "title": "Empty", "createdAt": "2024-01-01T00:00:00Z",
            "messages": []}], "currentChatId": "c1"}"#;
        let store = Arc::new(MemorySnapshotStore::with_entry(KEY, raw));
        let mut session = session_with(&store);
        session.activate().await;
        settle().await;

        assert!(session.history().chats.is_empty());
        assert_eq!(session.current_chat_id(), None);
        assert_eq!(store.get(KEY), None);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_store_holds_writes_until_load_succeeds() {
        let saved = {
            let mut history = History::default();
            history.dispatch(Action::StartChat(ChatMessage::user("Saved trip")));
            codec::encode(&history).unwrap()
        };
        let store = Arc::new(FlakyStore::default());
        store.inner.save(KEY, &saved).await.unwrap();
        store.offline.store(true, Ordering::SeqCst);

        let mut session = ChatSession::new(store.clone(), KEY, DEFAULT_SAVE_DEBOUNCE);
        session.activate().await;
        assert!(session.history().chats.is_empty());

        session.start_new_chat(ChatMessage::user("New trip"));
        settle().await;
        assert_eq!(store.inner.get(KEY).as_deref(), Some(saved.as_str()));

        store.offline.store(false, Ordering::SeqCst);
        session.activate().await;
        let titles: Vec<&str> = session.history().chats
            .iter()
            .map(|c| c.title.as_str())
            .collect();
        assert_eq!(titles, vec!["New trip", "Saved trip"]);
        assert_eq!(session.current_chat().unwrap().title, "New trip");

        settle().await;
        let persisted = codec::decode(&store.inner.get(KEY).unwrap()).unwrap();
        assert_eq!(&persisted, session.history());
    }
}
