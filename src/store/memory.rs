//! In-process [`DocumentStore`] with real live-query semantics.
//!
//! Collections are JSON document maps guarded by an `RwLock`; every write
//! pings a per-collection `broadcast` channel, and each subscription is a
//! spawned task that re-runs its query and delivers a full replacement
//! snapshot on every ping. Server timestamps come from a monotonic
//! microsecond clock, so `created_at` order always agrees with write order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::errors::{StoreError, StoreResult};

use super::{
    check_collection_path, encode_time, is_server_timestamp, split_doc_path, Direction, Document,
    DocumentStore, Fields, Query, SnapshotEvent, Subscription,
};

struct CollectionState {
    docs: RwLock<BTreeMap<String, Fields>>,
    notify: broadcast::Sender<()>,
}

impl CollectionState {
    fn new() -> Self {
        let (notify, _) = broadcast::channel(64);
        Self {
            docs: RwLock::new(BTreeMap::new()),
            notify,
        }
    }
}

pub struct MemoryBackend {
    collections: DashMap<String, Arc<CollectionState>>,
    /// Last issued server timestamp, in microseconds since the epoch.
    clock_us: AtomicI64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            collections: DashMap::new(),
            clock_us: AtomicI64::new(0),
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn collection(&self, path: &str) -> Arc<CollectionState> {
        self.collections
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(CollectionState::new()))
            .clone()
    }

    /// Monotonic server clock: wall time, bumped by at least 1µs per call.
    fn server_now(&self) -> DateTime<Utc> {
        loop {
            let last = self.clock_us.load(Ordering::SeqCst);
            let next = Utc::now().timestamp_micros().max(last + 1);
            if self
                .clock_us
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return DateTime::from_timestamp_micros(next).unwrap_or_else(Utc::now);
            }
        }
    }

    fn resolve_sentinels(&self, fields: &mut Fields) {
        let mut resolved: Option<Value> = None;
        for value in fields.values_mut() {
            if is_server_timestamp(value) {
                let ts = resolved
                    .get_or_insert_with(|| encode_time(self.server_now()))
                    .clone();
                *value = ts;
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryBackend {
    async fn get(&self, path: &str) -> StoreResult<Option<Document>> {
        let (collection, id) = split_doc_path(path)?;
        let state = self.collection(&collection);
        let docs = state.docs.read().expect("collection lock poisoned");
        Ok(docs.get(&id).map(|fields| Document {
            id,
            fields: fields.clone(),
        }))
    }

    async fn set(&self, path: &str, mut fields: Fields, merge: bool) -> StoreResult<()> {
        let (collection, id) = split_doc_path(path)?;
        self.resolve_sentinels(&mut fields);

        let state = self.collection(&collection);
        {
            let mut docs = state.docs.write().expect("collection lock poisoned");
            if merge {
                let entry = docs.entry(id).or_default();
                for (key, value) in fields {
                    entry.insert(key, value);
                }
            } else {
                docs.insert(id, fields);
            }
        }
        let _ = state.notify.send(());
        Ok(())
    }

    async fn add(&self, collection: &str, mut fields: Fields) -> StoreResult<String> {
        check_collection_path(collection)?;
        self.resolve_sentinels(&mut fields);
        let id = Uuid::new_v4().to_string();

        let state = self.collection(collection);
        {
            let mut docs = state.docs.write().expect("collection lock poisoned");
            docs.insert(id.clone(), fields);
        }
        let _ = state.notify.send(());
        Ok(id)
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        let (collection, id) = split_doc_path(path)?;
        let state = self.collection(&collection);
        let removed = {
            let mut docs = state.docs.write().expect("collection lock poisoned");
            docs.remove(&id).is_some()
        };
        if removed {
            let _ = state.notify.send(());
        }
        Ok(())
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        check_collection_path(&query.collection)?;
        let state = self.collection(&query.collection);
        let docs = state.docs.read().expect("collection lock poisoned");
        Ok(run_query(&docs, query))
    }

    fn subscribe(&self, query: Query) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();

        if let Err(e) = check_collection_path(&query.collection) {
            // Surface the bad path through the error callback path, once.
            let task = tokio::spawn(async move {
                let _ = tx.send(SnapshotEvent::Error(e));
            });
            return Subscription::new(rx, task);
        }

        let state = self.collection(&query.collection);
        let task = tokio::spawn(async move {
            let mut notify = state.notify.subscribe();

            let emit = |tx: &mpsc::UnboundedSender<SnapshotEvent>| {
                let snapshot = {
                    let docs = state.docs.read().expect("collection lock poisoned");
                    run_query(&docs, &query)
                };
                tx.send(SnapshotEvent::Snapshot(snapshot)).is_ok()
            };

            // Initial snapshot reflects current state
            if !emit(&tx) {
                return;
            }

            loop {
                match notify.recv().await {
                    // Lagged receivers just re-snapshot: full-replacement
                    // semantics make missed pings harmless.
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        if !emit(&tx) {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Subscription::new(rx, task)
    }
}

fn run_query(docs: &BTreeMap<String, Fields>, query: &Query) -> Vec<Document> {
    let mut result: Vec<Document> = docs
        .iter()
        .filter(|(_, fields)| {
            query
                .filters
                .iter()
                .all(|(field, expected)| fields.get(field) == Some(expected))
        })
        .map(|(id, fields)| Document {
            id: id.clone(),
            fields: fields.clone(),
        })
        .collect();

    if let Some((field, direction)) = &query.order_by {
        result.sort_by(|a, b| {
            let ord = value_cmp(a.fields.get(field), b.fields.get(field));
            match direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            }
        });
    }

    if let Some(limit) = query.limit {
        result.truncate(limit);
    }

    result
}

/// Order JSON values for `order_by`: strings lexicographically (timestamps
/// are fixed-width RFC 3339, so this is chronological), numbers numerically,
/// missing values first.
fn value_cmp(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => match (x, y) {
            (Value::String(s), Value::String(t)) => s.cmp(t),
            (Value::Number(m), Value::Number(n)) => m
                .as_f64()
                .partial_cmp(&n.as_f64())
                .unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}
