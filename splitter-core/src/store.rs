//! Remote object store interface and the in-memory implementation.
//!
//! # Versioning
//!
//! [`MemoryStore`] keeps one revision counter for the whole collection. Every
//! successful write bumps it and stamps the written object with the new
//! value (rendered as a decimal string). A watch started from version `v`
//! replays retained history after `v` and then follows the live feed.
//!
//! # Conditional writes
//!
//! `update` and `update_status` compare the caller's `resource_version` with
//! the stored one and fail with [`StoreError::Conflict`] on mismatch. An
//! object without a version token is written unconditionally.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::error::StoreError;
use crate::resource::Resource;
use crate::types::{ObjectKey, ObjectList, WatchEvent};

/// Incremental change feed returned by [`RemoteStore::watch`].
pub type WatchStream<O> = BoxStream<'static, Result<WatchEvent<O>, StoreError>>;

/// Number of events [`MemoryStore`] retains for watch replay by default.
pub const DEFAULT_HISTORY: usize = 1024;

/// The list/watch/get/update surface the controller needs from a store.
#[async_trait]
pub trait RemoteStore<O: Resource>: Send + Sync + 'static {
    /// Full snapshot plus the version to start a watch from.
    async fn list(&self) -> Result<ObjectList<O>, StoreError>;

    /// Change feed starting just after `from_version`.
    async fn watch(&self, from_version: &str) -> Result<WatchStream<O>, StoreError>;

    async fn get(&self, key: &ObjectKey) -> Result<O, StoreError>;

    async fn create(&self, object: &O) -> Result<O, StoreError>;

    /// Conditional write of everything except the status.
    async fn update(&self, object: &O) -> Result<O, StoreError>;

    /// Conditional write of the status only.
    async fn update_status(&self, object: &O) -> Result<O, StoreError>;

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

type Revisioned<O> = (u64, WatchEvent<O>);

struct Inner<O> {
    objects: BTreeMap<ObjectKey, O>,
    revision: u64,
    history: VecDeque<Revisioned<O>>,
    history_limit: usize,
    /// Highest revision evicted from `history`.
    compacted: u64,
}

impl<O: Resource> Inner<O> {
    fn next_revision(&mut self) -> u64 {
        self.revision = self.revision.saturating_add(1);
        self.revision
    }

    /// Append to history and publish. Called with the lock held so the live
    /// feed and the history never disagree about ordering.
    fn record(&mut self, revision: u64, event: WatchEvent<O>, feed: &broadcast::Sender<Revisioned<O>>) {
        self.history.push_back((revision, event.clone()));
        while self.history.len() > self.history_limit {
            if let Some((evicted, _)) = self.history.pop_front() {
                self.compacted = evicted;
            }
        }
        // No receivers is fine: nobody is watching.
        let _ = feed.send((revision, event));
    }
}

/// In-process object store with list/watch and optimistic concurrency.
pub struct MemoryStore<O> {
    inner: Arc<Mutex<Inner<O>>>,
    feed: broadcast::Sender<Revisioned<O>>,
}

impl<O> Clone for MemoryStore<O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            feed: self.feed.clone(),
        }
    }
}

impl<O: Resource> Default for MemoryStore<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: Resource> MemoryStore<O> {
    pub fn new() -> Self {
        Self::with_history(DEFAULT_HISTORY)
    }

    /// Store retaining at most `history_limit` events for watch replay.
    /// Watches from older versions fail with [`StoreError::Expired`].
    pub fn with_history(history_limit: usize) -> Self {
        let history_limit = history_limit.max(1);
        let (feed, _) = broadcast::channel(history_limit.max(16));
        Self {
            inner: Arc::new(Mutex::new(Inner {
                objects: BTreeMap::new(),
                revision: 0,
                history: VecDeque::new(),
                history_limit,
                compacted: 0,
            })),
            feed,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<O>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current collection revision.
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().objects.is_empty()
    }

    /// All objects, ordered by key.
    pub fn snapshot(&self) -> Vec<O> {
        self.lock().objects.values().cloned().collect()
    }
}

fn check_version<O: Resource>(stored: &O, incoming: &O) -> Result<(), StoreError> {
    match incoming.resource_version() {
        None => Ok(()),
        Some(expected) if Some(expected) == stored.resource_version() => Ok(()),
        Some(expected) => Err(StoreError::Conflict {
            kind: O::KIND,
            key: incoming.key(),
            expected: Some(expected.to_owned()),
            actual: stored.resource_version().unwrap_or_default().to_owned(),
        }),
    }
}

fn not_found<O: Resource>(key: &ObjectKey) -> StoreError {
    StoreError::NotFound {
        kind: O::KIND,
        key: key.clone(),
    }
}

#[async_trait]
impl<O: Resource> RemoteStore<O> for MemoryStore<O> {
    async fn list(&self) -> Result<ObjectList<O>, StoreError> {
        let inner = self.lock();
        Ok(ObjectList {
            items: inner.objects.values().cloned().collect(),
            resource_version: inner.revision.to_string(),
        })
    }

    async fn watch(&self, from_version: &str) -> Result<WatchStream<O>, StoreError> {
        let from: u64 = from_version
            .parse()
            .map_err(|_| StoreError::InvalidVersion(from_version.to_owned()))?;

        let (backlog, rx) = {
            let inner = self.lock();
            if from < inner.compacted {
                return Err(StoreError::Expired {
                    version: from_version.to_owned(),
                });
            }
            let backlog: Vec<Result<WatchEvent<O>, StoreError>> = inner
                .history
                .iter()
                .filter(|(revision, _)| *revision > from)
                .map(|(_, event)| Ok(event.clone()))
                .collect();
            // Subscribe under the lock: every later write lands on `rx`,
            // every earlier one is in `backlog`.
            (backlog, self.feed.subscribe())
        };

        let version = from_version.to_owned();
        let live = BroadcastStream::new(rx).map(move |item| match item {
            Ok((_, event)) => Ok(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(kind = O::KIND, skipped, "watch consumer lagged behind store");
                Err(StoreError::Expired {
                    version: version.clone(),
                })
            }
        });
        Ok(stream::iter(backlog).chain(live).boxed())
    }

    async fn get(&self, key: &ObjectKey) -> Result<O, StoreError> {
        self.lock()
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| not_found::<O>(key))
    }

    async fn create(&self, object: &O) -> Result<O, StoreError> {
        let key = object.key();
        let mut inner = self.lock();
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists { kind: O::KIND, key });
        }
        let revision = inner.next_revision();
        let mut created = object.clone();
        let meta = created.meta_mut();
        meta.resource_version = Some(revision.to_string());
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = Some(Utc::now());
        }
        inner.objects.insert(key, created.clone());
        inner.record(revision, WatchEvent::Added(created.clone()), &self.feed);
        Ok(created)
    }

    async fn update(&self, object: &O) -> Result<O, StoreError> {
        let key = object.key();
        let mut inner = self.lock();
        let stored = inner.objects.get(&key).ok_or_else(|| not_found::<O>(&key))?;
        check_version(stored, object)?;
        let mut updated = object.clone();
        *updated.status_mut() = stored.status().clone();
        updated.meta_mut().creation_timestamp = stored.meta().creation_timestamp;
        let revision = inner.next_revision();
        updated.meta_mut().resource_version = Some(revision.to_string());
        inner.objects.insert(key, updated.clone());
        inner.record(revision, WatchEvent::Modified(updated.clone()), &self.feed);
        Ok(updated)
    }

    async fn update_status(&self, object: &O) -> Result<O, StoreError> {
        let key = object.key();
        let mut inner = self.lock();
        let stored = inner.objects.get(&key).ok_or_else(|| not_found::<O>(&key))?;
        check_version(stored, object)?;
        let mut updated = stored.clone();
        *updated.status_mut() = object.status().clone();
        let revision = inner.next_revision();
        updated.meta_mut().resource_version = Some(revision.to_string());
        inner.objects.insert(key, updated.clone());
        inner.record(revision, WatchEvent::Modified(updated.clone()), &self.feed);
        Ok(updated)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let mut removed = inner.objects.remove(key).ok_or_else(|| not_found::<O>(key))?;
        let revision = inner.next_revision();
        removed.meta_mut().resource_version = Some(revision.to_string());
        inner.record(revision, WatchEvent::Deleted(removed), &self.feed);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
