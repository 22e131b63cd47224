//! Contact graph: directed edges under `users/{owner}/contacts`.
//!
//! Each edge stores a document reference to the target profile; listing
//! resolves every edge to the target's current snapshot and skips edges
//! whose target no longer exists. Edges are create/delete only.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::AppResult;
use crate::models::{Contact, ContactEdge, UserProfile};
use crate::store::{DocumentStore, Query, SnapshotEvent};

/// Live feed of an owner's resolved contact list. Each snapshot of the edge
/// collection re-emits the full list. Dropping the feed tears the
/// subscription down.
pub struct ContactsFeed {
    rx: mpsc::UnboundedReceiver<Vec<Contact>>,
    task: JoinHandle<()>,
}

impl ContactsFeed {
    pub async fn next(&mut self) -> Option<Vec<Contact>> {
        self.rx.recv().await
    }
}

impl Drop for ContactsFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct ContactStore {
    store: Arc<dyn DocumentStore>,
    config: AppConfig,
}

impl ContactStore {
    pub fn new(store: Arc<dyn DocumentStore>, config: AppConfig) -> Self {
        Self { store, config }
    }

    fn edges_collection(&self, owner: Uuid) -> String {
        format!("{}/{}/contacts", self.config.users_collection, owner)
    }

    fn profile_ref(&self, target: Uuid) -> String {
        format!("{}/{}", self.config.users_collection, target)
    }

    /// Watch `owner`'s contact list. Unresolvable edges (dangling reference,
    /// transient read failure) are skipped for that snapshot, not fatal.
    pub fn list(&self, owner: Uuid) -> ContactsFeed {
        let mut edges = self
            .store
            .subscribe(Query::collection(self.edges_collection(owner)));
        let store = self.store.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            while let Some(event) = edges.next().await {
                let docs = match event {
                    SnapshotEvent::Snapshot(docs) => docs,
                    SnapshotEvent::Error(e) => {
                        tracing::warn!(owner = %owner, error = %e, "contact feed error");
                        continue;
                    }
                };

                let mut contacts = Vec::new();
                for edge in docs.iter().filter_map(ContactEdge::from_doc) {
                    match store.get(&edge.user_ref).await {
                        Ok(Some(doc)) => {
                            if let Some(profile) = UserProfile::from_doc(&doc) {
                                contacts.push(Contact {
                                    edge_id: edge.id,
                                    profile,
                                });
                            }
                        }
                        Ok(None) => {
                            tracing::debug!(target = %edge.user_ref, "skipping dangling contact edge");
                        }
                        Err(e) => {
                            tracing::warn!(target = %edge.user_ref, error = %e, "contact resolution failed");
                        }
                    }
                }

                if tx.send(contacts).is_err() {
                    return;
                }
            }
        });

        ContactsFeed { rx, task }
    }

    /// Add `target` to `owner`'s contacts. Does not deduplicate; adding the
    /// same target twice yields two edges.
    pub async fn add(&self, owner: Uuid, target: Uuid) -> AppResult<String> {
        let fields = ContactEdge::create_fields(&self.profile_ref(target));
        let edge_id = self.store.add(&self.edges_collection(owner), fields).await?;
        tracing::debug!(owner = %owner, target = %target, "contact added");
        Ok(edge_id)
    }

    /// Remove the first edge from `owner` to `target`. A no-op when no such
    /// edge exists.
    pub async fn remove(&self, owner: Uuid, target: Uuid) -> AppResult<()> {
        let query = Query::collection(self.edges_collection(owner)).where_eq(
            "userRef",
            serde_json::json!(self.profile_ref(target)),
        );
        let edges = self.store.query(&query).await?;

        if let Some(edge) = edges.first() {
            let path = format!("{}/{}", self.edges_collection(owner), edge.id);
            self.store.delete(&path).await?;
            tracing::debug!(owner = %owner, target = %target, "contact removed");
        }
        Ok(())
    }
}
