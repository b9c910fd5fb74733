#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use splitter_controller::{ErrorSink, ProcessError};
use splitter_core::{MemoryStore, ObjectKey, ObjectList, RemoteStore, Resource, StoreError, WatchStream};
use tokio::sync::watch;

/// `MemoryStore` wrapper that counts calls, can hold `list` closed, and can
/// inject list/watch failures.
pub struct Instrumented<O: Resource> {
    pub inner: MemoryStore<O>,
    pub lists: AtomicUsize,
    pub watches: AtomicUsize,
    pub status_writes: AtomicUsize,
    pub failing_lists: AtomicUsize,
    pub expiring_watches: AtomicUsize,
    gate: watch::Sender<bool>,
}

impl<O: Resource> Instrumented<O> {
    pub fn new(inner: MemoryStore<O>) -> Self {
        Self {
            inner,
            lists: AtomicUsize::new(0),
            watches: AtomicUsize::new(0),
            status_writes: AtomicUsize::new(0),
            failing_lists: AtomicUsize::new(0),
            expiring_watches: AtomicUsize::new(0),
            gate: watch::channel(true).0,
        }
    }

    /// `list` blocks until [`open`](Self::open) is called.
    pub fn gated(inner: MemoryStore<O>) -> Self {
        let store = Self::new(inner);
        store.gate.send_replace(false);
        store
    }

    pub fn open(&self) {
        self.gate.send_replace(true);
    }
}

/// Current value of one of the [`Instrumented`] call counters.
pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl<O: Resource> RemoteStore<O> for Instrumented<O> {
    async fn list(&self) -> Result<ObjectList<O>, StoreError> {
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        self.lists.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failing_lists) {
            return Err(StoreError::Transport("connection reset".into()));
        }
        self.inner.list().await
    }

    async fn watch(&self, from_version: &str) -> Result<WatchStream<O>, StoreError> {
        self.watches.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.expiring_watches) {
            return Err(StoreError::Expired {
                version: from_version.to_owned(),
            });
        }
        self.inner.watch(from_version).await
    }

    async fn get(&self, key: &ObjectKey) -> Result<O, StoreError> {
        self.inner.get(key).await
    }

    async fn create(&self, object: &O) -> Result<O, StoreError> {
        self.inner.create(object).await
    }

    async fn update(&self, object: &O) -> Result<O, StoreError> {
        self.inner.update(object).await
    }

    async fn update_status(&self, object: &O) -> Result<O, StoreError> {
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update_status(object).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        self.inner.delete(key).await
    }
}

/// Records every dropped key.
#[derive(Default)]
pub struct RecordingSink(pub Mutex<Vec<(ObjectKey, String)>>);

impl RecordingSink {
    pub fn reports(&self) -> Vec<(ObjectKey, String)> {
        self.0.lock().expect("lock").clone()
    }
}

impl ErrorSink for RecordingSink {
    fn report(&self, key: &ObjectKey, error: &ProcessError) {
        self.0
            .lock()
            .expect("lock")
            .push((key.clone(), error.to_string()));
    }
}

/// Poll `check` every 10ms (of tokio time) until it holds, for at most `limit`.
pub async fn eventually<F>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
