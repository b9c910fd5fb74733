//! Controller lifecycle: reflectors, notification pump, worker pool.
//!
//! # Task layout
//!
//! ```text
//!   Reflector (primary) ──keys──▶ pump ──add──▶ RateLimitingQueue ──get──▶ worker × N
//!   Reflector (secondary) × M        (mirror only, gated at cold start)
//! ```
//!
//! # Shutdown order
//!
//! 1. `ControllerHandle::stop` broadcasts on the shutdown channel.
//! 2. The queue is shut down; workers finish their current key, drain the
//!    ready list and exit.
//! 3. Reflectors and the pump observe the broadcast and exit.
//! 4. Join failures from any task surface as [`ControllerError::Join`].

use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use splitter_core::{ObjectKey, RemoteStore, Resource};
use splitter_queue::RateLimitingQueue;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};

use crate::config::ControllerConfig;
use crate::error::{ControllerError, ProcessError};
use crate::mirror::{Mirror, MirrorWriter, Reflector};
use crate::pipeline::{self, Outcome};
use crate::reconcile::Reconcile;
use crate::report::{ErrorSink, LogSink};

/// Capacity of the reflector → queue notification channel.
pub const NOTIFY_CAPACITY: usize = 1024;

type TaskResult = Result<(), ControllerError>;
type SecondaryRun = Box<dyn FnOnce(broadcast::Receiver<()>) -> BoxFuture<'static, TaskResult> + Send>;

struct Secondary {
    synced: watch::Receiver<bool>,
    run: SecondaryRun,
}

/// Stops a running (or not yet started) [`Controller`].
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    shutdown: broadcast::Sender<()>,
}

impl ControllerHandle {
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }
}

/// Level-triggered controller for objects of type `O`.
pub struct Controller<O, S, R> {
    store: Arc<S>,
    mirror: Mirror<O>,
    writer: MirrorWriter<O>,
    reconciler: Arc<R>,
    config: ControllerConfig,
    queue: Arc<RateLimitingQueue<ObjectKey>>,
    sink: Arc<dyn ErrorSink>,
    secondaries: Vec<Secondary>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl<O, S, R> Controller<O, S, R>
where
    O: Resource,
    S: RemoteStore<O>,
    R: Reconcile<O>,
{
    pub fn new(
        store: Arc<S>,
        writer: MirrorWriter<O>,
        reconciler: Arc<R>,
        config: ControllerConfig,
    ) -> Self {
        let queue = Arc::new(RateLimitingQueue::new(Box::new(config.rate_limiter())));
        // Subscribed up front so a stop issued before `run` is not lost.
        let (shutdown_tx, shutdown_rx) = broadcast::channel(16);
        Self {
            store,
            mirror: writer.reader(),
            writer,
            reconciler,
            config,
            queue,
            sink: Arc::new(LogSink),
            secondaries: Vec::new(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Mirror another collection the reconcile step reads from. Workers do
    /// not start until it has synced; its events enqueue nothing.
    pub fn with_secondary<O2, S2>(mut self, store: Arc<S2>, writer: MirrorWriter<O2>) -> Self
    where
        O2: Resource,
        S2: RemoteStore<O2>,
    {
        let synced = writer.reader().sync_signal();
        let (base, max) = self.config.relist_backoff();
        let reflector = Reflector::new(store, writer).with_relist_backoff(base, max);
        self.secondaries.push(Secondary {
            synced,
            run: Box::new(move |shutdown| reflector.run(shutdown).boxed()),
        });
        self
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            shutdown: self.shutdown_tx.clone(),
        }
    }

    /// Reader over the primary mirror.
    pub fn mirror(&self) -> Mirror<O> {
        self.mirror.clone()
    }

    pub fn queue(&self) -> Arc<RateLimitingQueue<ObjectKey>> {
        Arc::clone(&self.queue)
    }

    /// Run until [`ControllerHandle::stop`] is called.
    pub async fn run(self, workers: usize) -> Result<(), ControllerError> {
        if workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "worker count must be at least 1".into(),
            ));
        }

        let Controller {
            store,
            mirror,
            writer,
            reconciler,
            config,
            queue,
            sink,
            secondaries,
            shutdown_tx,
            mut shutdown_rx,
        } = self;

        let (notify_tx, notify_rx) = mpsc::channel::<ObjectKey>(NOTIFY_CAPACITY);
        let mut tasks: Vec<(&'static str, JoinHandle<TaskResult>)> = Vec::new();
        let mut sync_signals = vec![mirror.sync_signal()];

        let (base, max) = config.relist_backoff();
        let reflector = Reflector::new(Arc::clone(&store), writer)
            .with_notifications(notify_tx)
            .with_resync(config.resync_period())
            .with_relist_backoff(base, max);
        tasks.push(("reflector", tokio::spawn(reflector.run(shutdown_tx.subscribe()))));

        for secondary in secondaries {
            sync_signals.push(secondary.synced);
            tasks.push((
                "secondary_reflector",
                tokio::spawn((secondary.run)(shutdown_tx.subscribe())),
            ));
        }

        tasks.push((
            "notification_pump",
            tokio::spawn(pump(notify_rx, Arc::clone(&queue), shutdown_tx.subscribe())),
        ));

        tracing::info!(kind = O::KIND, mirrors = sync_signals.len(), "waiting for mirrors to sync");
        let synced = tokio::select! {
            _ = shutdown_rx.recv() => false,
            synced = wait_all_synced(sync_signals) => synced,
        };

        let mut worker_handles = Vec::with_capacity(workers);
        if synced {
            tracing::info!(kind = O::KIND, workers, "mirrors synced; starting workers");
            let shared = Arc::new(Shared {
                store,
                mirror,
                reconciler,
                queue: Arc::clone(&queue),
                sink,
                max_retries: config.max_retries,
            });
            for id in 0..workers {
                worker_handles.push(tokio::spawn(worker(id, Arc::clone(&shared))));
            }
            let _ = shutdown_rx.recv().await;
        }

        tracing::info!(kind = O::KIND, "stopping controller");
        queue.shutdown();
        let worker_results = join_all(worker_handles).await;
        // Tasks spawned after an early stop subscribed too late to see it.
        let _ = shutdown_tx.send(());
        let mut task_results = Vec::with_capacity(tasks.len());
        for (task, handle) in tasks {
            task_results.push((task, handle.await));
        }

        for result in worker_results {
            handle_join("worker", result)?;
        }
        for (task, result) in task_results {
            handle_join(task, result)?;
        }
        tracing::info!(kind = O::KIND, "controller stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn pump(
    mut notify_rx: mpsc::Receiver<ObjectKey>,
    queue: Arc<RateLimitingQueue<ObjectKey>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> TaskResult {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_key = notify_rx.recv() => {
                let Some(key) = maybe_key else { break };
                queue.add(key);
            }
        }
    }
    Ok(())
}

/// `false` if any mirror's writer went away before syncing.
async fn wait_all_synced(signals: Vec<watch::Receiver<bool>>) -> bool {
    let waits = signals.into_iter().map(|mut rx| async move {
        rx.wait_for(|synced| *synced).await.is_ok()
    });
    join_all(waits).await.into_iter().all(|ok| ok)
}

struct Shared<O, S, R> {
    store: Arc<S>,
    mirror: Mirror<O>,
    reconciler: Arc<R>,
    queue: Arc<RateLimitingQueue<ObjectKey>>,
    sink: Arc<dyn ErrorSink>,
    max_retries: u32,
}

async fn worker<O, S, R>(id: usize, shared: Arc<Shared<O, S, R>>) -> TaskResult
where
    O: Resource,
    S: RemoteStore<O>,
    R: Reconcile<O>,
{
    tracing::debug!(worker = id, "worker started");
    while let Some(key) = shared.queue.get().await {
        let result =
            pipeline::process(&key, &shared.mirror, shared.store.as_ref(), shared.reconciler.as_ref())
                .await;
        shared.handle_result(&key, result);
        shared.queue.done(&key);
    }
    tracing::debug!(worker = id, "worker stopped");
    Ok(())
}

impl<O, S, R> Shared<O, S, R> {
    fn handle_result(&self, key: &ObjectKey, result: Result<Outcome, ProcessError>) {
        match result {
            Ok(outcome) => {
                tracing::debug!(key = %key, ?outcome, "reconciled");
                self.queue.forget(key);
            }
            Err(err) => {
                let failures = self.queue.num_requeues(key);
                if failures < self.max_retries {
                    let delay = self.queue.add_rate_limited(key.clone());
                    let delay_ms = millis(delay);
                    if err.is_conflict() {
                        tracing::debug!(key = %key, error = %err, delay_ms, "write conflict; requeued");
                    } else {
                        tracing::warn!(
                            key = %key,
                            error = %err,
                            attempt = failures + 1,
                            delay_ms,
                            "reconcile failed; requeued"
                        );
                    }
                } else {
                    self.queue.forget(key);
                    tracing::warn!(
                        key = %key,
                        error = %err,
                        attempts = failures + 1,
                        "dropping key after exhausting retries"
                    );
                    self.sink.report(key, &err);
                }
            }
        }
    }
}

/// Whole milliseconds for log fields, saturating at `u64::MAX`.
pub(crate) fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

fn handle_join(task: &'static str, result: Result<TaskResult, JoinError>) -> TaskResult {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(ControllerError::Join {
            task,
            message: err.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
