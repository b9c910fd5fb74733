mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{count, eventually, Instrumented};
use splitter_controller::{mirror, Reflector};
use splitter_core::{Deployment, MemoryStore, ObjectKey, RemoteStore};
use tokio::sync::{broadcast, mpsc};

const LIMIT: Duration = Duration::from_secs(5);

fn spawn_reflector(
    store: &Arc<Instrumented<Deployment>>,
) -> (
    splitter_controller::Mirror<Deployment>,
    mpsc::Receiver<ObjectKey>,
    broadcast::Sender<()>,
    tokio::task::JoinHandle<Result<(), splitter_controller::ControllerError>>,
) {
    let (reader, writer) = mirror();
    let (tx, rx) = mpsc::channel(64);
    let (shutdown_tx, _) = broadcast::channel(1);
    let task = tokio::spawn(
        Reflector::new(Arc::clone(store), writer)
            .with_notifications(tx)
            .with_relist_backoff(Duration::from_millis(10), Duration::from_millis(100))
            .run(shutdown_tx.subscribe()),
    );
    (reader, rx, shutdown_tx, task)
}

#[tokio::test(start_paused = true)]
async fn expired_watch_triggers_relist() {
    let inner = MemoryStore::new();
    inner
        .create(&Deployment::new("default", "web", 1))
        .await
        .expect("seed");
    let store = Arc::new(Instrumented::new(inner));
    store.expiring_watches.store(1, Ordering::SeqCst);

    let (reader, mut rx, shutdown_tx, task) = spawn_reflector(&store);

    assert!(eventually(LIMIT, || count(&store.lists) >= 2).await);
    assert!(reader.has_synced());

    // Both listings notify the same key; the queue collapses them downstream.
    let web = ObjectKey::namespaced("default", "web");
    assert_eq!(rx.recv().await, Some(web.clone()));
    assert_eq!(rx.recv().await, Some(web));

    // The second watch succeeded, so live events flow again.
    store
        .create(&Deployment::new("default", "api", 1))
        .await
        .expect("create");
    assert_eq!(rx.recv().await, Some(ObjectKey::namespaced("default", "api")));

    shutdown_tx.send(()).expect("shutdown");
    task.await.expect("join").expect("reflector");
}

#[tokio::test(start_paused = true)]
async fn failed_list_backs_off_and_retries() {
    let store = Arc::new(Instrumented::new(MemoryStore::new()));
    store.failing_lists.store(3, Ordering::SeqCst);

    let (reader, _rx, shutdown_tx, task) = spawn_reflector(&store);

    let start = tokio::time::Instant::now();
    assert!(eventually(LIMIT, || reader.has_synced()).await);
    assert_eq!(count(&store.lists), 4);
    // 10ms + 20ms + 40ms of backoff before the fourth list.
    assert!(start.elapsed() >= Duration::from_millis(70));

    shutdown_tx.send(()).expect("shutdown");
    task.await.expect("join").expect("reflector");
}

#[tokio::test(start_paused = true)]
async fn burst_of_writes_reaches_the_mirror() {
    let store = Arc::new(Instrumented::new(MemoryStore::with_history(2)));
    let (reader, mut rx, shutdown_tx, task) = spawn_reflector(&store);
    assert!(eventually(LIMIT, || reader.has_synced()).await);

    for name in ["a", "b", "c", "d"] {
        store
            .create(&Deployment::new("default", name, 1))
            .await
            .expect("create");
    }
    let mut notified = Vec::new();
    while notified.len() < 4 {
        notified.push(rx.recv().await.expect("notification"));
    }
    notified.sort();
    notified.dedup();
    assert_eq!(notified.len(), 4);
    assert_eq!(reader.len().await, 4);

    shutdown_tx.send(()).expect("shutdown");
    task.await.expect("join").expect("reflector");
}
