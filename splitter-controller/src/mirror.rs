//! Local mirror of a remote collection.
//!
//! A [`Reflector`] is the only writer: it lists the store, replaces the
//! mirror's contents, then applies watch events in order. Readers get cheap
//! clones of [`Mirror`] and never touch the store on the read path.
//!
//! ```text
//!   list ──▶ replace ──▶ notify all ──▶ mark synced ──▶ watch ─┬─▶ apply + notify
//!    ▲                                                         │
//!    └──────────── stream ended / expired / transport error ───┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use splitter_core::{ObjectKey, RemoteStore, Resource, StoreError, WatchEvent};
use splitter_queue::{ItemExponentialBackoff, RateLimiter};
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::controller::millis;
use crate::error::ControllerError;

type Objects<O> = Arc<RwLock<HashMap<ObjectKey, O>>>;

/// Create an empty mirror and its single writer.
pub fn mirror<O: Resource>() -> (Mirror<O>, MirrorWriter<O>) {
    let objects: Objects<O> = Arc::new(RwLock::new(HashMap::new()));
    let (synced_tx, synced_rx) = watch::channel(false);
    (
        Mirror {
            objects: Arc::clone(&objects),
            synced: synced_rx,
        },
        MirrorWriter {
            objects,
            synced: synced_tx,
        },
    )
}

// ---------------------------------------------------------------------------
// Read side
// ---------------------------------------------------------------------------

/// Read-only view of the mirrored collection.
pub struct Mirror<O> {
    objects: Objects<O>,
    synced: watch::Receiver<bool>,
}

impl<O> Clone for Mirror<O> {
    fn clone(&self) -> Self {
        Self {
            objects: Arc::clone(&self.objects),
            synced: self.synced.clone(),
        }
    }
}

impl<O: Resource> Mirror<O> {
    /// Owned copy of the object stored under `key`.
    pub async fn get(&self, key: &ObjectKey) -> Option<O> {
        self.objects.read().await.get(key).cloned()
    }

    /// Every mirrored object, ordered by key.
    pub async fn list(&self) -> Vec<O> {
        self.list_matching(|_| true).await
    }

    pub async fn list_matching<F>(&self, predicate: F) -> Vec<O>
    where
        F: Fn(&O) -> bool,
    {
        let mut items: Vec<O> = self
            .objects
            .read()
            .await
            .values()
            .filter(|o| predicate(o))
            .cloned()
            .collect();
        items.sort_by_key(|o| o.key());
        items
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// `true` once the first full listing has been applied.
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Resolve once the mirror has synced. Returns `false` if the writer was
    /// dropped before that happened.
    pub async fn wait_synced(&self) -> bool {
        let mut synced = self.synced.clone();
        let ok = synced.wait_for(|done| *done).await.is_ok();
        ok
    }

    pub(crate) fn sync_signal(&self) -> watch::Receiver<bool> {
        self.synced.clone()
    }
}

// ---------------------------------------------------------------------------
// Write side
// ---------------------------------------------------------------------------

/// Exclusive write handle; owned by one [`Reflector`].
pub struct MirrorWriter<O> {
    objects: Objects<O>,
    synced: watch::Sender<bool>,
}

impl<O: Resource> MirrorWriter<O> {
    /// Replace the whole contents with a fresh listing. Entries missing from
    /// `items` are dropped without notification. Returns the listed keys.
    pub async fn replace(&self, items: Vec<O>) -> Vec<ObjectKey> {
        let fresh: HashMap<ObjectKey, O> = items.into_iter().map(|o| (o.key(), o)).collect();
        let mut keys: Vec<ObjectKey> = fresh.keys().cloned().collect();
        keys.sort();
        *self.objects.write().await = fresh;
        keys
    }

    /// Apply one watch event. Returns the key to enqueue, if any; deletions
    /// enqueue nothing.
    pub async fn apply(&self, event: &WatchEvent<O>) -> Option<ObjectKey> {
        let mut objects = self.objects.write().await;
        match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                let key = obj.key();
                objects.insert(key.clone(), obj.clone());
                Some(key)
            }
            WatchEvent::Deleted(obj) => {
                objects.remove(&obj.key());
                None
            }
        }
    }

    pub fn mark_synced(&self) {
        self.synced.send_replace(true);
    }

    pub async fn keys(&self) -> Vec<ObjectKey> {
        let mut keys: Vec<ObjectKey> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// A reader over the same contents.
    pub fn reader(&self) -> Mirror<O> {
        Mirror {
            objects: Arc::clone(&self.objects),
            synced: self.synced.subscribe(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reflector
// ---------------------------------------------------------------------------

const DEFAULT_RELIST_BASE: Duration = Duration::from_secs(1);
const DEFAULT_RELIST_MAX: Duration = Duration::from_secs(30);

/// Keeps a [`MirrorWriter`] in step with a [`RemoteStore`] and reports every
/// key that needs attention on a notification channel.
pub struct Reflector<O, S> {
    store: Arc<S>,
    writer: MirrorWriter<O>,
    notify: Option<mpsc::Sender<ObjectKey>>,
    resync: Option<Duration>,
    relist_backoff: ItemExponentialBackoff<()>,
}

impl<O, S> Reflector<O, S>
where
    O: Resource,
    S: RemoteStore<O>,
{
    pub fn new(store: Arc<S>, writer: MirrorWriter<O>) -> Self {
        Self {
            store,
            writer,
            notify: None,
            resync: None,
            relist_backoff: ItemExponentialBackoff::new(DEFAULT_RELIST_BASE, DEFAULT_RELIST_MAX),
        }
    }

    pub fn with_notifications(mut self, tx: mpsc::Sender<ObjectKey>) -> Self {
        self.notify = Some(tx);
        self
    }

    /// Re-notify every mirrored key each `period`. A zero period disables it.
    pub fn with_resync(mut self, period: Duration) -> Self {
        self.resync = (!period.is_zero()).then_some(period);
        self
    }

    pub fn with_relist_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.relist_backoff = ItemExponentialBackoff::new(base, max);
        self
    }

    /// Run until `shutdown` fires. Store failures are logged and retried;
    /// they never end the loop.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ControllerError> {
        loop {
            let outcome = tokio::select! {
                _ = shutdown.recv() => break,
                outcome = self.list_and_watch() => outcome,
            };

            match outcome {
                Ok(()) => {
                    tracing::debug!(kind = O::KIND, "watch stream ended; relisting");
                }
                Err(err) => {
                    let delay = self.relist_backoff.when(&());
                    tracing::warn!(
                        kind = O::KIND,
                        error = %err,
                        retry_in_ms = millis(delay),
                        "list/watch failed; relisting"
                    );
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        tracing::debug!(kind = O::KIND, "reflector stopped");
        Ok(())
    }

    async fn list_and_watch(&self) -> Result<(), StoreError> {
        let listing = self.store.list().await?;
        self.relist_backoff.forget(&());

        let keys = self.writer.replace(listing.items).await;
        tracing::info!(
            kind = O::KIND,
            count = keys.len(),
            version = %listing.resource_version,
            "mirror listed"
        );
        for key in keys {
            self.send(key).await;
        }
        self.writer.mark_synced();

        let mut stream = self.store.watch(&listing.resource_version).await?;
        let mut resync = self.resync.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                event = stream.next() => match event {
                    None => return Ok(()),
                    Some(Err(err)) => return Err(err),
                    Some(Ok(event)) => {
                        tracing::trace!(
                            kind = O::KIND,
                            key = %event.object().key(),
                            event = event.kind(),
                            "watch event"
                        );
                        if let Some(key) = self.writer.apply(&event).await {
                            self.send(key).await;
                        }
                    }
                },
                () = next_tick(&mut resync) => {
                    let keys = self.writer.keys().await;
                    tracing::debug!(kind = O::KIND, count = keys.len(), "periodic resync");
                    for key in keys {
                        self.send(key).await;
                    }
                }
            }
        }
    }

    async fn send(&self, key: ObjectKey) {
        if let Some(tx) = &self.notify {
            // A closed channel means the controller is stopping.
            let _ = tx.send(key).await;
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
