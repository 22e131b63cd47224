//! Document-store seam.
//!
//! The external backend is a schemaless real-time document database. This
//! module defines the capability set the client core consumes (point
//! reads/writes, equality queries, and live snapshot subscriptions) plus
//! the wire-level document and query types. [`memory::MemoryBackend`] is the
//! in-process implementation used by tests and local mode.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::errors::{StoreError, StoreResult};

pub use memory::MemoryBackend;

/// A document's field map. Schemaless at this level; typed decoding with
/// defaulting happens in `models`.
pub type Fields = serde_json::Map<String, Value>;

/// A document as returned by reads, queries, and snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn bool_field(&self, name: &str) -> Option<bool> {
        self.fields.get(name).and_then(Value::as_bool)
    }

    pub fn i64_field(&self, name: &str) -> Option<i64> {
        self.fields.get(name).and_then(Value::as_i64)
    }

    /// Parse an RFC 3339 timestamp field.
    pub fn time_field(&self, name: &str) -> Option<DateTime<Utc>> {
        self.str_field(name)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }
}

// ─── Server Timestamp Sentinel ─────────────────────────

const SENTINEL_KEY: &str = "__sentinel__";
const SERVER_TIMESTAMP: &str = "server_timestamp";

/// Sentinel value resolved by the backend to its own monotonic clock at
/// write time. Message ordering relies on this being server-assigned.
pub fn server_timestamp() -> Value {
    json!({ SENTINEL_KEY: SERVER_TIMESTAMP })
}

pub(crate) fn is_server_timestamp(value: &Value) -> bool {
    value.get(SENTINEL_KEY).and_then(Value::as_str) == Some(SERVER_TIMESTAMP)
}

/// Canonical wire encoding for timestamps. Fixed-width UTC RFC 3339 so that
/// lexicographic order equals chronological order.
pub fn encode_time(t: DateTime<Utc>) -> Value {
    Value::String(t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
}

// ─── Queries ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// An equality-filtered, optionally ordered and capped collection query.
/// Mirrors the subset of the backend query surface the app actually uses.
#[derive(Debug, Clone)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(path: impl Into<String>) -> Self {
        Self {
            collection: path.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filters.push((field.into(), value));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }
}

// ─── Live Subscriptions ────────────────────────────────

/// One emission from a live subscription: either a full replacement snapshot
/// of the query result, or a store failure. There is no incremental-patch
/// form; consumers must treat every snapshot as the complete current state.
#[derive(Debug)]
pub enum SnapshotEvent {
    Snapshot(Vec<Document>),
    Error(StoreError),
}

/// Handle to a live query. Dropping the handle (or calling
/// [`Subscription::unsubscribe`]) cancels the underlying delivery task;
/// leaked subscriptions are a correctness bug (stale cross-identity
/// updates), so teardown is never optional.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<SnapshotEvent>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<SnapshotEvent>, task: JoinHandle<()>) -> Self {
        Self { rx, task }
    }

    /// Await the next emission. `None` once the subscription is torn down
    /// backend-side.
    pub async fn next(&mut self) -> Option<SnapshotEvent> {
        self.rx.recv().await
    }

    pub fn unsubscribe(self) {
        // Drop impl aborts the task
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ─── The Seam ──────────────────────────────────────────

/// Capability set consumed from the external document database.
///
/// Paths are slash-joined segment strings: an even segment count addresses a
/// document (`users/{uid}`), an odd count a collection
/// (`privateMessages/{channel}/messages`).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read. `Ok(None)` when the document does not exist.
    async fn get(&self, path: &str) -> StoreResult<Option<Document>>;

    /// Write a document. With `merge`, existing fields not present in
    /// `fields` are preserved; without, the document is replaced.
    async fn set(&self, path: &str, fields: Fields, merge: bool) -> StoreResult<()>;

    /// Append a document with a generated id to a collection. Returns the id.
    async fn add(&self, collection: &str, fields: Fields) -> StoreResult<String>;

    /// Delete a document. Deleting a missing document is a no-op.
    async fn delete(&self, path: &str) -> StoreResult<()>;

    /// One-shot query.
    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>>;

    /// Open a live subscription. The first snapshot reflects the current
    /// result; each subsequent write to the collection re-emits the full
    /// result. Delivery order follows backend write order, but delivery is
    /// not exactly-once.
    fn subscribe(&self, query: Query) -> Subscription;
}

/// Split a document path into (collection, document id).
pub(crate) fn split_doc_path(path: &str) -> StoreResult<(String, String)> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 || segments.len() % 2 != 0 {
        return Err(StoreError::InvalidArgument(format!(
            "not a document path: {path}"
        )));
    }
    let id = segments[segments.len() - 1].to_string();
    let collection = segments[..segments.len() - 1].join("/");
    Ok((collection, id))
}

pub(crate) fn check_collection_path(path: &str) -> StoreResult<()> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() || segments.len() % 2 == 0 {
        return Err(StoreError::InvalidArgument(format!(
            "not a collection path: {path}"
        )));
    }
    Ok(())
}
