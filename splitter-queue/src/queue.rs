//! Deduplicating, delaying work queue.
//!
//! ## Key states
//!
//! ```text
//!            add             get              done
//!   (none) ───────▶ dirty ────────▶ processing ─────▶ (none)
//!                     ▲                 │
//!                     └─── add ─────────┘  (re-queued when done)
//! ```
//!
//! - `dirty` is the set of keys that need processing; a key is in the ready
//!   list exactly when it is dirty and not processing.
//! - `processing` is the in-flight set. `get` never hands out a key that is
//!   already in it, so one key is never worked on twice at once.
//! - `add_after` parks a key with a ready time; it is moved into `dirty`
//!   once the time passes. Parking the same key again keeps the earlier time.
//!
//! All state sits behind one mutex. Waiting happens outside the lock on a
//! [`Notify`] plus a timer for the earliest parked key.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Stand-in ready time for delays too long to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

// ---------------------------------------------------------------------------
// Parked entries
// ---------------------------------------------------------------------------

struct Parked<K> {
    ready_at: Instant,
    seq: u64,
    key: K,
}

impl<K> PartialEq for Parked<K> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl<K> Eq for Parked<K> {}

impl<K> PartialOrd for Parked<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Parked<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ready_at
            .cmp(&other.ready_at)
            .then(self.seq.cmp(&other.seq))
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct State<K> {
    ready: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    parked: BinaryHeap<Reverse<Parked<K>>>,
    /// Authoritative ready time per parked key; heap entries that disagree
    /// are stale and skipped.
    parked_at: HashMap<K, Instant>,
    seq: u64,
    shutting_down: bool,
}

impl<K: Clone + Eq + Hash> State<K> {
    fn new() -> Self {
        Self {
            ready: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            parked: BinaryHeap::new(),
            parked_at: HashMap::new(),
            seq: 0,
            shutting_down: false,
        }
    }

    /// Mark `key` dirty. Returns `true` when it was appended to the ready list.
    fn insert(&mut self, key: K) -> bool {
        if self.dirty.contains(&key) {
            return false;
        }
        self.dirty.insert(key.clone());
        if self.processing.contains(&key) {
            return false;
        }
        self.ready.push_back(key);
        true
    }

    /// Returns `true` when the new ready time is the earliest parked one.
    fn park(&mut self, key: K, ready_at: Instant) -> bool {
        if let Some(existing) = self.parked_at.get(&key) {
            if *existing <= ready_at {
                return false;
            }
        }
        self.seq = self.seq.wrapping_add(1);
        self.parked_at.insert(key.clone(), ready_at);
        self.parked.push(Reverse(Parked {
            ready_at,
            seq: self.seq,
            key,
        }));
        self.next_deadline() == Some(ready_at)
    }

    /// Move every parked key whose time has come into the ready list.
    fn promote_due(&mut self, now: Instant) {
        while let Some(Reverse(head)) = self.parked.peek() {
            if head.ready_at > now {
                break;
            }
            let Some(Reverse(entry)) = self.parked.pop() else {
                break;
            };
            if self.parked_at.get(&entry.key) != Some(&entry.ready_at) {
                continue;
            }
            self.parked_at.remove(&entry.key);
            self.insert(entry.key);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.parked.peek().map(|Reverse(entry)| entry.ready_at)
    }
}

// ---------------------------------------------------------------------------
// WorkQueue
// ---------------------------------------------------------------------------

/// Work queue keyed by `K`: no duplicates among pending and in-flight keys,
/// delayed insertion, cooperative shutdown.
pub struct WorkQueue<K> {
    state: Mutex<State<K>>,
    wakeup: Notify,
}

impl<K: Clone + Eq + Hash> Default for WorkQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Eq + Hash> WorkQueue<K> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::new()),
            wakeup: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `key` for immediate processing.
    ///
    /// No-op when the key is already pending. When the key is in flight it
    /// is marked for redelivery after [`done`](Self::done). Ignored after
    /// [`shutdown`](Self::shutdown).
    pub fn add(&self, key: K) {
        let mut state = self.lock();
        if state.shutting_down {
            return;
        }
        if state.insert(key) {
            self.wakeup.notify_one();
        }
    }

    /// Queue `key` once `delay` has elapsed. A zero delay is [`add`](Self::add).
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let mut state = self.lock();
        if state.shutting_down {
            return;
        }
        let now = Instant::now();
        let ready_at = now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE);
        if state.park(key, ready_at) {
            // Sleepers computed their timer from an older deadline.
            self.wakeup.notify_waiters();
        }
    }

    /// Wait for a ready key and mark it in flight.
    ///
    /// Returns `None` once the queue is shut down and no ready keys remain.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.lock();
                state.promote_due(Instant::now());
                if let Some(key) = state.ready.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    if !state.ready.is_empty() {
                        self.wakeup.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
                state.next_deadline()
            };

            match deadline {
                Some(at) => {
                    tokio::select! {
                        () = &mut notified => {}
                        () = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Release the in-flight mark. A key re-added while in flight becomes
    /// ready again immediately.
    pub fn done(&self, key: &K) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.ready.push_back(key.clone());
            self.wakeup.notify_one();
        }
    }

    /// Stop accepting keys, drop parked ones, and wake every waiter.
    /// Keys already ready are still handed out; after that `get` returns `None`.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.shutting_down = true;
        state.parked.clear();
        state.parked_at.clear();
        self.wakeup.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of keys ready for `get`.
    pub fn len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys currently in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().processing.len()
    }

    /// Number of keys waiting on a delay.
    pub fn parked(&self) -> usize {
        self.lock().parked_at.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
