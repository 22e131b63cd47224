//! Live message synchronization.
//!
//! One [`ChatSync`] exists per signed-in identity. It maintains:
//!
//! * a public-room subscription capped at the most recent N messages,
//! * one detail subscription for the currently active private chat,
//! * one latest-message-only subscription per contact, driving the
//!   per-contact unread counters.
//!
//! Every snapshot replaces the previous message list wholesale; there is no
//! incremental patching. Feeds are `watch` channels so consumers always see
//! the latest snapshot without queueing history.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::channel::ChannelId;
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{created_at_field, ChatMessage};
use crate::store::{Direction, DocumentStore, Query, SnapshotEvent};

// ─── Channel Feeds ─────────────────────────────────────

/// Where a channel's subscription currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Unsubscribed,
    Subscribing,
    Synced,
    Error(String),
}

/// Latest full view of one channel: its sync state plus the complete
/// message list, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSnapshot {
    pub state: SyncState,
    pub messages: Vec<ChatMessage>,
}

impl ChannelSnapshot {
    fn empty(state: SyncState) -> Self {
        Self {
            state,
            messages: Vec::new(),
        }
    }
}

// ─── Unread Ledger ─────────────────────────────────────

#[derive(Default)]
struct UnreadSlot {
    count: u32,
    /// Id of the newest message already accounted for. A latest-message
    /// subscription can re-deliver the same snapshot; each distinct message
    /// counts once.
    last_seen_latest: Option<String>,
}

/// Per-contact unread counters, shared between the watcher tasks and the
/// calls that reset them.
struct UnreadLedger {
    slots: Mutex<HashMap<Uuid, UnreadSlot>>,
    active: Mutex<Option<Uuid>>,
    tx: watch::Sender<HashMap<Uuid, u32>>,
}

impl UnreadLedger {
    fn new() -> Self {
        let (tx, _) = watch::channel(HashMap::new());
        Self {
            slots: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
            tx,
        }
    }

    fn publish(&self, slots: &HashMap<Uuid, UnreadSlot>) {
        let counts = slots
            .iter()
            .filter(|(_, slot)| slot.count > 0)
            .map(|(id, slot)| (*id, slot.count))
            .collect();
        // send_replace keeps the value even with no receiver subscribed
        self.tx.send_replace(counts);
    }

    fn observe_latest(&self, contact: Uuid, latest: &ChatMessage) {
        let is_active = *self.active.lock().expect("lock poisoned") == Some(contact);
        let mut slots = self.slots.lock().expect("lock poisoned");
        let slot = slots.entry(contact).or_default();

        let already_counted = slot.last_seen_latest.as_deref() == Some(latest.id.as_str());
        slot.last_seen_latest = Some(latest.id.clone());

        if !already_counted && !is_active && latest.author_id == contact {
            slot.count += 1;
            self.publish(&slots);
        }
    }

    fn set_active(&self, contact: Option<Uuid>) {
        *self.active.lock().expect("lock poisoned") = contact;
        if let Some(id) = contact {
            self.reset(id);
        }
    }

    fn reset(&self, contact: Uuid) {
        let mut slots = self.slots.lock().expect("lock poisoned");
        if let Some(slot) = slots.get_mut(&contact) {
            if slot.count != 0 {
                slot.count = 0;
                self.publish(&slots);
            }
        }
    }

    fn forget(&self, contact: Uuid) {
        let mut slots = self.slots.lock().expect("lock poisoned");
        if slots.remove(&contact).is_some_and(|slot| slot.count > 0) {
            self.publish(&slots);
        }
    }
}

// ─── Synchronizer ──────────────────────────────────────

pub struct ChatSync {
    store: Arc<dyn DocumentStore>,
    config: AppConfig,
    user_id: Uuid,
    display_name: String,

    public_tx: Arc<watch::Sender<ChannelSnapshot>>,
    public_task: Mutex<Option<JoinHandle<()>>>,

    active_tx: Arc<watch::Sender<ChannelSnapshot>>,
    active_task: Mutex<Option<JoinHandle<()>>>,

    watchers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    unread: Arc<UnreadLedger>,
}

impl ChatSync {
    /// Start synchronizing for one identity. The public-room subscription
    /// opens immediately.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        config: AppConfig,
        user_id: Uuid,
        display_name: impl Into<String>,
    ) -> Self {
        let (public_tx, _) = watch::channel(ChannelSnapshot::empty(SyncState::Subscribing));
        let public_tx = Arc::new(public_tx);
        let (active_tx, _) = watch::channel(ChannelSnapshot::empty(SyncState::Unsubscribed));

        let sync = Self {
            store,
            config,
            user_id,
            display_name: display_name.into(),
            public_tx: public_tx.clone(),
            public_task: Mutex::new(None),
            active_tx: Arc::new(active_tx),
            active_task: Mutex::new(None),
            watchers: Mutex::new(HashMap::new()),
            unread: Arc::new(UnreadLedger::new()),
        };

        let task = sync.spawn_public_watch();
        *sync.public_task.lock().expect("lock poisoned") = Some(task);
        sync
    }

    /// Latest public-room snapshot. Messages are oldest first and capped at
    /// the configured history limit.
    pub fn public_feed(&self) -> watch::Receiver<ChannelSnapshot> {
        self.public_tx.subscribe()
    }

    /// Latest snapshot of the active private chat. `Unsubscribed` and empty
    /// while no chat is active.
    pub fn active_feed(&self) -> watch::Receiver<ChannelSnapshot> {
        self.active_tx.subscribe()
    }

    /// Per-contact unread counts. Contacts with zero unread are absent.
    pub fn unread_feed(&self) -> watch::Receiver<HashMap<Uuid, u32>> {
        self.unread.tx.subscribe()
    }

    pub fn unread_for(&self, contact: Uuid) -> u32 {
        self.unread
            .tx
            .borrow()
            .get(&contact)
            .copied()
            .unwrap_or(0)
    }

    fn spawn_public_watch(&self) -> JoinHandle<()> {
        let query = Query::collection(&self.config.public_collection)
            .order_by(created_at_field(), Direction::Descending)
            .limit(self.config.public_history_limit);
        let mut sub = self.store.subscribe(query);
        let tx = self.public_tx.clone();

        tokio::spawn(async move {
            while let Some(event) = sub.next().await {
                match event {
                    SnapshotEvent::Snapshot(docs) => {
                        // Query is newest-first so the cap keeps recent
                        // messages; flip back to display order.
                        let mut messages: Vec<ChatMessage> =
                            docs.iter().filter_map(ChatMessage::from_doc).collect();
                        messages.reverse();
                        tx.send_replace(ChannelSnapshot {
                            state: SyncState::Synced,
                            messages,
                        });
                    }
                    SnapshotEvent::Error(e) => {
                        tracing::error!(error = %e, "public channel subscription failed");
                        tx.send_replace(ChannelSnapshot::empty(SyncState::Error(e.to_string())));
                    }
                }
            }
        })
    }

    /// Switch the active private chat. Tears down the previous detail
    /// subscription, hard-resets the new contact's unread count, and opens
    /// a full-history subscription for the pair channel. `None` closes the
    /// active chat.
    pub fn set_active(&self, contact: Option<Uuid>) {
        if let Some(task) = self.active_task.lock().expect("lock poisoned").take() {
            task.abort();
        }
        self.unread.set_active(contact);

        let Some(contact) = contact else {
            self.active_tx
                .send_replace(ChannelSnapshot::empty(SyncState::Unsubscribed));
            return;
        };

        self.active_tx
            .send_replace(ChannelSnapshot::empty(SyncState::Subscribing));

        let channel = ChannelId::direct(self.user_id, contact);
        let query = Query::collection(channel.collection(&self.config))
            .order_by(created_at_field(), Direction::Ascending);
        let mut sub = self.store.subscribe(query);
        let tx = self.active_tx.clone();
        let unread = self.unread.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = sub.next().await {
                match event {
                    SnapshotEvent::Snapshot(docs) => {
                        let messages = docs.iter().filter_map(ChatMessage::from_doc).collect();
                        tx.send_replace(ChannelSnapshot {
                            state: SyncState::Synced,
                            messages,
                        });
                        // Viewing the chat keeps it read
                        unread.reset(contact);
                    }
                    SnapshotEvent::Error(e) => {
                        tracing::error!(contact = %contact, error = %e, "active chat subscription failed");
                        tx.send_replace(ChannelSnapshot::empty(SyncState::Error(e.to_string())));
                    }
                }
            }
        });
        *self.active_task.lock().expect("lock poisoned") = Some(task);
    }

    /// Reconcile the contact watcher set against the current contact list.
    /// New contacts get a latest-message watcher; departed contacts lose
    /// theirs along with any unread count.
    pub fn set_contacts(&self, contacts: &[Uuid]) {
        let mut watchers = self.watchers.lock().expect("lock poisoned");

        let departed: Vec<Uuid> = watchers
            .keys()
            .filter(|id| !contacts.contains(id))
            .copied()
            .collect();
        for id in departed {
            if let Some(task) = watchers.remove(&id) {
                task.abort();
            }
            self.unread.forget(id);
        }

        for &contact in contacts {
            if watchers.contains_key(&contact) {
                continue;
            }
            watchers.insert(contact, self.spawn_contact_watch(contact));
        }
    }

    fn spawn_contact_watch(&self, contact: Uuid) -> JoinHandle<()> {
        let channel = ChannelId::direct(self.user_id, contact);
        let query = Query::collection(channel.collection(&self.config))
            .order_by(created_at_field(), Direction::Descending)
            .limit(1);
        let mut sub = self.store.subscribe(query);
        let unread = self.unread.clone();

        tokio::spawn(async move {
            while let Some(event) = sub.next().await {
                match event {
                    SnapshotEvent::Snapshot(docs) => {
                        if let Some(latest) = docs.first().and_then(ChatMessage::from_doc) {
                            unread.observe_latest(contact, &latest);
                        }
                    }
                    SnapshotEvent::Error(e) => {
                        tracing::warn!(contact = %contact, error = %e, "contact watcher failed");
                    }
                }
            }
        })
    }

    /// Append to the public room. Whitespace-only text writes nothing and
    /// returns `Ok(None)`.
    pub async fn send_public(&self, text: &str) -> AppResult<Option<String>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let fields = ChatMessage::create_fields(text, self.user_id, &self.display_name, None);
        let id = self.store.add(&self.config.public_collection, fields).await?;
        Ok(Some(id))
    }

    /// Append to the pair channel with `recipient`. Whitespace-only text
    /// writes nothing and returns `Ok(None)`.
    pub async fn send_private(&self, text: &str, recipient: Uuid) -> AppResult<Option<String>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let channel = ChannelId::direct(self.user_id, recipient);
        let fields =
            ChatMessage::create_fields(text, self.user_id, &self.display_name, Some(recipient));
        let id = self
            .store
            .add(&channel.collection(&self.config), fields)
            .await?;
        tracing::debug!(recipient = %recipient, "private message sent");
        Ok(Some(id))
    }

    /// Delete every message in a channel, one document at a time. Partial
    /// failure reports how far it got and which deletions failed.
    pub async fn clear(&self, channel: &ChannelId) -> AppResult<usize> {
        let collection = channel.collection(&self.config);
        let docs = self.store.query(&Query::collection(&collection)).await?;

        // Deletions run concurrently; failures are collected, not fatal
        let results = futures::future::join_all(docs.iter().map(|doc| {
            let path = format!("{collection}/{}", doc.id);
            let store = &self.store;
            async move { (doc.id.clone(), store.delete(&path).await) }
        }))
        .await;

        let mut deleted = 0;
        let mut failed = Vec::new();
        for (id, result) in results {
            match result {
                Ok(()) => deleted += 1,
                Err(e) => {
                    tracing::warn!(message = %id, error = %e, "message deletion failed");
                    failed.push(id);
                }
            }
        }

        if failed.is_empty() {
            tracing::info!(channel = %channel, deleted, "channel cleared");
            Ok(deleted)
        } else {
            Err(AppError::ClearFailed { deleted, failed })
        }
    }

    /// Stop every subscription this synchronizer owns. Feeds go quiet; no
    /// further snapshots are delivered.
    pub fn shutdown(&self) {
        if let Some(task) = self.public_task.lock().expect("lock poisoned").take() {
            task.abort();
        }
        if let Some(task) = self.active_task.lock().expect("lock poisoned").take() {
            task.abort();
        }
        for (_, task) in self.watchers.lock().expect("lock poisoned").drain() {
            task.abort();
        }
        self.public_tx
            .send_replace(ChannelSnapshot::empty(SyncState::Unsubscribed));
        self.active_tx
            .send_replace(ChannelSnapshot::empty(SyncState::Unsubscribed));
        tracing::debug!(user = %self.user_id, "synchronizer shut down");
    }
}

impl Drop for ChatSync {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryBackend;

    fn sync_for(store: &Arc<MemoryBackend>, name: &str) -> (Uuid, ChatSync) {
        let id = Uuid::new_v4();
        let sync = ChatSync::new(store.clone(), AppConfig::test_default(), id, name);
        (id, sync)
    }

    async fn synced(rx: &mut watch::Receiver<ChannelSnapshot>) -> ChannelSnapshot {
        loop {
            rx.changed().await.unwrap();
            let snap = rx.borrow().clone();
            if snap.state == SyncState::Synced {
                return snap;
            }
        }
    }

    #[tokio::test]
    async fn public_feed_delivers_in_order() {
        let store = Arc::new(MemoryBackend::new());
        let (_, alice) = sync_for(&store, "Alice");
        let mut feed = alice.public_feed();

        alice.send_public("first").await.unwrap();
        let snap = synced(&mut feed).await;
        assert_eq!(snap.messages.len(), 1);

        alice.send_public("second").await.unwrap();
        let snap = synced(&mut feed).await;
        assert_eq!(snap.messages.len(), 2);
        assert_eq!(snap.messages[0].text, "first");
        assert_eq!(snap.messages[1].text, "second");
    }

    #[tokio::test]
    async fn public_feed_caps_at_history_limit() {
        let store = Arc::new(MemoryBackend::new());
        let mut config = AppConfig::test_default();
        config.public_history_limit = 3;
        let id = Uuid::new_v4();
        let sync = ChatSync::new(store.clone(), config, id, "Alice");
        let mut feed = sync.public_feed();

        for n in 0..5 {
            sync.send_public(&format!("msg {n}")).await.unwrap();
        }

        let snap = loop {
            let snap = synced(&mut feed).await;
            if snap.messages.last().is_some_and(|m| m.text == "msg 4") {
                break snap;
            }
        };
        // Oldest two fell off the window
        assert_eq!(snap.messages.len(), 3);
        assert_eq!(snap.messages[0].text, "msg 2");
    }

    #[tokio::test]
    async fn empty_send_writes_nothing() {
        let store = Arc::new(MemoryBackend::new());
        let (_, alice) = sync_for(&store, "Alice");

        assert_eq!(alice.send_public("   ").await.unwrap(), None);
        assert_eq!(alice.send_private("\n\t", Uuid::new_v4()).await.unwrap(), None);

        let config = AppConfig::test_default();
        let docs = store
            .query(&Query::collection(&config.public_collection))
            .await
            .unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn private_chat_is_shared_both_ways() {
        let store = Arc::new(MemoryBackend::new());
        let (alice_id, alice) = sync_for(&store, "Alice");
        let (bob_id, bob) = sync_for(&store, "Bob");

        alice.set_active(Some(bob_id));
        let mut alice_feed = alice.active_feed();
        bob.set_active(Some(alice_id));
        let mut bob_feed = bob.active_feed();

        alice.send_private("hi bob", bob_id).await.unwrap();
        bob.send_private("hi alice", alice_id).await.unwrap();

        let snap = loop {
            let snap = synced(&mut alice_feed).await;
            if snap.messages.len() == 2 {
                break snap;
            }
        };
        assert_eq!(snap.messages[0].text, "hi bob");
        assert_eq!(snap.messages[0].author_id, alice_id);
        assert_eq!(snap.messages[1].text, "hi alice");

        let snap = loop {
            let snap = synced(&mut bob_feed).await;
            if snap.messages.len() == 2 {
                break snap;
            }
        };
        assert_eq!(snap.messages[1].author_id, bob_id);
    }

    #[tokio::test]
    async fn unread_counts_messages_from_inactive_contacts() {
        let store = Arc::new(MemoryBackend::new());
        let (alice_id, alice) = sync_for(&store, "Alice");
        let (bob_id, bob) = sync_for(&store, "Bob");

        alice.set_contacts(&[bob_id]);
        let mut unread = alice.unread_feed();

        bob.send_private("you there?", alice_id).await.unwrap();
        unread.changed().await.unwrap();
        assert_eq!(unread.borrow().get(&bob_id), Some(&1));

        bob.send_private("hello?", alice_id).await.unwrap();
        unread.changed().await.unwrap();
        assert_eq!(unread.borrow().get(&bob_id), Some(&2));
    }

    #[tokio::test]
    async fn opening_the_chat_resets_unread() {
        let store = Arc::new(MemoryBackend::new());
        let (alice_id, alice) = sync_for(&store, "Alice");
        let (bob_id, bob) = sync_for(&store, "Bob");

        alice.set_contacts(&[bob_id]);
        let mut unread = alice.unread_feed();
        bob.send_private("ping", alice_id).await.unwrap();
        unread.changed().await.unwrap();
        assert_eq!(alice.unread_for(bob_id), 1);

        alice.set_active(Some(bob_id));
        assert_eq!(alice.unread_for(bob_id), 0);
    }

    #[tokio::test]
    async fn own_messages_do_not_count_as_unread() {
        let store = Arc::new(MemoryBackend::new());
        let (alice_id, alice) = sync_for(&store, "Alice");
        let (bob_id, _bob) = sync_for(&store, "Bob");

        alice.set_contacts(&[bob_id]);
        alice.send_private("hey bob", bob_id).await.unwrap();

        // Give the watcher a chance to observe the write
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(alice.unread_for(bob_id), 0);
        let _ = alice_id;
    }

    #[tokio::test]
    async fn messages_while_active_do_not_count() {
        let store = Arc::new(MemoryBackend::new());
        let (alice_id, alice) = sync_for(&store, "Alice");
        let (bob_id, bob) = sync_for(&store, "Bob");

        alice.set_contacts(&[bob_id]);
        alice.set_active(Some(bob_id));
        let mut feed = alice.active_feed();

        bob.send_private("live message", alice_id).await.unwrap();
        let snap = synced(&mut feed).await;
        assert_eq!(snap.messages.len(), 1);
        assert_eq!(alice.unread_for(bob_id), 0);
    }

    #[tokio::test]
    async fn departed_contacts_lose_their_counter() {
        let store = Arc::new(MemoryBackend::new());
        let (alice_id, alice) = sync_for(&store, "Alice");
        let (bob_id, bob) = sync_for(&store, "Bob");

        alice.set_contacts(&[bob_id]);
        let mut unread = alice.unread_feed();
        bob.send_private("ping", alice_id).await.unwrap();
        unread.changed().await.unwrap();

        alice.set_contacts(&[]);
        assert_eq!(alice.unread_for(bob_id), 0);
    }

    #[tokio::test]
    async fn clear_deletes_the_whole_channel() {
        let store = Arc::new(MemoryBackend::new());
        let (alice_id, alice) = sync_for(&store, "Alice");
        let (bob_id, bob) = sync_for(&store, "Bob");

        alice.send_private("one", bob_id).await.unwrap();
        bob.send_private("two", alice_id).await.unwrap();

        let channel = ChannelId::direct(alice_id, bob_id);
        assert_eq!(alice.clear(&channel).await.unwrap(), 2);

        let config = AppConfig::test_default();
        let docs = store
            .query(&Query::collection(channel.collection(&config)))
            .await
            .unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn clear_reports_partial_failure() {
        use crate::errors::{StoreError, StoreResult};
        use crate::store::{Document, Fields, Subscription};
        use async_trait::async_trait;

        /// Wraps the memory backend but refuses to delete one document.
        struct StickyDelete {
            inner: Arc<MemoryBackend>,
            sticky: String,
        }

        #[async_trait]
        impl DocumentStore for StickyDelete {
            async fn get(&self, path: &str) -> StoreResult<Option<Document>> {
                self.inner.get(path).await
            }
            async fn set(&self, path: &str, fields: Fields, merge: bool) -> StoreResult<()> {
                self.inner.set(path, fields, merge).await
            }
            async fn add(&self, collection: &str, fields: Fields) -> StoreResult<String> {
                self.inner.add(collection, fields).await
            }
            async fn delete(&self, path: &str) -> StoreResult<()> {
                if path.ends_with(&self.sticky) {
                    return Err(StoreError::PermissionDenied("rules".into()));
                }
                self.inner.delete(path).await
            }
            async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
                self.inner.query(query).await
            }
            fn subscribe(&self, query: Query) -> Subscription {
                self.inner.subscribe(query)
            }
        }

        let inner = Arc::new(MemoryBackend::new());
        let alice_id = Uuid::new_v4();
        let bob_id = Uuid::new_v4();
        let channel = ChannelId::direct(alice_id, bob_id);
        let config = AppConfig::test_default();
        let collection = channel.collection(&config);

        let stuck = inner
            .add(&collection, ChatMessage::create_fields("keep", bob_id, "Bob", Some(alice_id)))
            .await
            .unwrap();
        inner
            .add(&collection, ChatMessage::create_fields("gone", bob_id, "Bob", Some(alice_id)))
            .await
            .unwrap();

        let store = Arc::new(StickyDelete {
            inner,
            sticky: stuck.clone(),
        });
        let sync = ChatSync::new(store, config, alice_id, "Alice");

        match sync.clear(&channel).await {
            Err(AppError::ClearFailed { deleted, failed }) => {
                assert_eq!(deleted, 1);
                assert_eq!(failed, vec![stuck]);
            }
            other => panic!("expected ClearFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn store_errors_surface_as_degraded_state() {
        use crate::errors::{StoreError, StoreResult};
        use crate::store::{Document, Fields, Subscription};
        use async_trait::async_trait;
        use tokio::sync::mpsc;

        /// Store whose subscriptions fail immediately.
        struct DeniedStore;

        #[async_trait]
        impl DocumentStore for DeniedStore {
            async fn get(&self, _: &str) -> StoreResult<Option<Document>> {
                Err(StoreError::PermissionDenied("rules".into()))
            }
            async fn set(&self, _: &str, _: Fields, _: bool) -> StoreResult<()> {
                Err(StoreError::PermissionDenied("rules".into()))
            }
            async fn add(&self, _: &str, _: Fields) -> StoreResult<String> {
                Err(StoreError::PermissionDenied("rules".into()))
            }
            async fn delete(&self, _: &str) -> StoreResult<()> {
                Err(StoreError::PermissionDenied("rules".into()))
            }
            async fn query(&self, _: &Query) -> StoreResult<Vec<Document>> {
                Err(StoreError::PermissionDenied("rules".into()))
            }
            fn subscribe(&self, _: Query) -> Subscription {
                let (tx, rx) = mpsc::unbounded_channel();
                let task = tokio::spawn(async move {
                    let _ = tx.send(SnapshotEvent::Error(StoreError::PermissionDenied(
                        "rules".into(),
                    )));
                });
                Subscription::new(rx, task)
            }
        }

        let sync = ChatSync::new(
            Arc::new(DeniedStore),
            AppConfig::test_default(),
            Uuid::new_v4(),
            "Alice",
        );

        let mut public = sync.public_feed();
        while !matches!(public.borrow().state, SyncState::Error(_)) {
            public.changed().await.unwrap();
        }

        sync.set_active(Some(Uuid::new_v4()));
        let mut active = sync.active_feed();
        while !matches!(active.borrow().state, SyncState::Error(_)) {
            active.changed().await.unwrap();
        }

        // No retry loop: the state stays degraded
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(matches!(public.borrow().state, SyncState::Error(_)));
        assert!(matches!(active.borrow().state, SyncState::Error(_)));
    }

    #[tokio::test]
    async fn shutdown_stops_all_feeds() {
        let store = Arc::new(MemoryBackend::new());
        let (alice_id, alice) = sync_for(&store, "Alice");
        let (bob_id, bob) = sync_for(&store, "Bob");

        alice.set_contacts(&[bob_id]);
        alice.set_active(Some(bob_id));
        alice.shutdown();

        let unread_before = alice.unread_for(bob_id);
        bob.send_private("into the void", alice_id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(alice.unread_for(bob_id), unread_before);
        assert_eq!(alice.public_feed().borrow().state, SyncState::Unsubscribed);
        assert_eq!(alice.active_feed().borrow().state, SyncState::Unsubscribed);
    }
}
