mod common;

use std::io;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{count, eventually, Instrumented, RecordingSink};
use splitter_controller::{mirror, Controller, ControllerConfig, ControllerError, FnReconciler};
use splitter_core::{Cluster, Deployment, MemoryStore, ObjectKey, RemoteStore, Resource};

const LIMIT: Duration = Duration::from_secs(5);

async fn seeded(names: &[&str]) -> Arc<Instrumented<Deployment>> {
    let inner = MemoryStore::new();
    for name in names {
        inner
            .create(&Deployment::new("default", *name, 3))
            .await
            .expect("seed");
    }
    Arc::new(Instrumented::new(inner))
}

fn counting<F>(calls: Arc<AtomicUsize>, f: F) -> FnReconciler<Deployment, impl Fn(&mut Deployment) -> Result<(), io::Error> + Send + Sync + 'static>
where
    F: Fn(usize, &mut Deployment) -> Result<(), io::Error> + Send + Sync + 'static,
{
    FnReconciler::new(move |d: &mut Deployment| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        f(n, d)
    })
}

// ---------------------------------------------------------------------------
// Cold start
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn workers_wait_until_every_mirror_has_synced() {
    let deployments = seeded(&["web"]).await;
    let clusters = Arc::new(Instrumented::gated(MemoryStore::<Cluster>::new()));
    let calls = Arc::new(AtomicUsize::new(0));

    let (_, writer) = mirror();
    let (cluster_mirror, cluster_writer) = mirror::<Cluster>();
    let controller = Controller::new(
        Arc::clone(&deployments),
        writer,
        Arc::new(counting(Arc::clone(&calls), |_, _| Ok(()))),
        ControllerConfig::default(),
    )
    .with_secondary(Arc::clone(&clusters), cluster_writer);
    let handle = controller.handle();
    let primary = controller.mirror();
    let task = tokio::spawn(controller.run(2));

    assert!(
        eventually(LIMIT, || primary.has_synced()).await,
        "primary mirror syncs on its own"
    );
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0, "no reconcile before cold start completes");
    assert!(!cluster_mirror.has_synced());

    clusters.open();
    assert!(eventually(LIMIT, || calls.load(Ordering::SeqCst) >= 1).await);

    handle.stop();
    task.await.expect("join").expect("controller");
}

#[tokio::test]
async fn stop_before_run_returns_without_dispatching() {
    let deployments = seeded(&["web"]).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let (_, writer) = mirror();
    let controller = Controller::new(
        deployments,
        writer,
        Arc::new(counting(Arc::clone(&calls), |_, _| Ok(()))),
        ControllerConfig::default(),
    );
    controller.handle().stop();

    tokio::time::timeout(Duration::from_secs(5), controller.run(2))
        .await
        .expect("run returns promptly")
        .expect("clean stop");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn zero_workers_is_a_config_error() {
    let deployments = seeded(&[]).await;
    let (_, writer) = mirror();
    let controller = Controller::new(
        deployments,
        writer,
        Arc::new(counting(Arc::new(AtomicUsize::new(0)), |_, _| Ok(()))),
        ControllerConfig::default(),
    );
    let err = controller.run(0).await.expect_err("zero workers");
    assert!(matches!(err, ControllerError::InvalidConfig(_)));
}

// ---------------------------------------------------------------------------
// Status write-back
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn changed_status_is_written_exactly_once() {
    let deployments = seeded(&["web"]).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let (_, writer) = mirror();
    let controller = Controller::new(
        Arc::clone(&deployments),
        writer,
        Arc::new(counting(Arc::clone(&calls), |_, d| {
            d.status.ready_replicas = d.spec.desired_replicas();
            Ok(())
        })),
        ControllerConfig::default(),
    );
    let handle = controller.handle();
    let queue = controller.queue();
    let task = tokio::spawn(controller.run(2));

    let key = ObjectKey::namespaced("default", "web");
    assert!(
        eventually(LIMIT, || {
            deployments
                .inner
                .snapshot()
                .iter()
                .any(|d| d.key() == key && d.status.ready_replicas == 3)
        })
        .await
    );
    // The write echoes back as a Modified event; that second pass is a no-op.
    assert!(eventually(LIMIT, || calls.load(Ordering::SeqCst) >= 2).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(count(&deployments.status_writes), 1);
    assert_eq!(queue.num_requeues(&key), 0);

    handle.stop();
    task.await.expect("join").expect("controller");
}

#[tokio::test(start_paused = true)]
async fn no_op_reconcile_never_writes() {
    let deployments = seeded(&["a", "b", "c"]).await;
    let revision = deployments.inner.revision();
    let calls = Arc::new(AtomicUsize::new(0));
    let (_, writer) = mirror();
    let controller = Controller::new(
        Arc::clone(&deployments),
        writer,
        Arc::new(counting(Arc::clone(&calls), |_, _| Ok(()))),
        ControllerConfig::default(),
    );
    let handle = controller.handle();
    let task = tokio::spawn(controller.run(3));

    assert!(eventually(LIMIT, || calls.load(Ordering::SeqCst) >= 3).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(count(&deployments.status_writes), 0);
    assert_eq!(deployments.inner.revision(), revision);

    handle.stop();
    task.await.expect("join").expect("controller");
}

#[tokio::test(start_paused = true)]
async fn spec_change_is_observed_on_the_next_pass() {
    let deployments = seeded(&["web"]).await;
    let seen = Arc::new(AtomicI32::new(0));
    let (_, writer) = mirror();
    let reconciler = {
        let seen = Arc::clone(&seen);
        FnReconciler::new(move |d: &mut Deployment| {
            seen.store(d.spec.desired_replicas(), Ordering::SeqCst);
            Ok::<(), io::Error>(())
        })
    };
    let controller = Controller::new(
        Arc::clone(&deployments),
        writer,
        Arc::new(reconciler),
        ControllerConfig::default(),
    );
    let handle = controller.handle();
    let task = tokio::spawn(controller.run(1));

    assert!(eventually(LIMIT, || seen.load(Ordering::SeqCst) == 3).await);

    let key = ObjectKey::namespaced("default", "web");
    let mut web = deployments.get(&key).await.expect("get");
    web.spec.replicas = Some(7);
    deployments.update(&web).await.expect("update");
    assert!(eventually(LIMIT, || seen.load(Ordering::SeqCst) == 7).await);

    handle.stop();
    task.await.expect("join").expect("controller");
}

// ---------------------------------------------------------------------------
// Retries
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn always_failing_key_is_retried_then_reported_once() {
    let deployments = seeded(&["web"]).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let sink = Arc::new(RecordingSink::default());
    let (_, writer) = mirror();
    let controller = Controller::new(
        Arc::clone(&deployments),
        writer,
        Arc::new(counting(Arc::clone(&calls), |_, _| {
            Err(io::Error::new(io::ErrorKind::Other, "backend unavailable"))
        })),
        ControllerConfig::default(),
    )
    .with_error_sink(sink.clone());
    let handle = controller.handle();
    let task = tokio::spawn(controller.run(2));

    assert!(eventually(LIMIT, || !sink.reports().is_empty()).await);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 6, "one attempt plus five retries");

    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0, ObjectKey::namespaced("default", "web"));
    assert!(reports[0].1.contains("backend unavailable"));

    handle.stop();
    task.await.expect("join").expect("controller");
}

#[tokio::test(start_paused = true)]
async fn transient_failures_recover_and_reset_the_counter() {
    let deployments = seeded(&["web"]).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let sink = Arc::new(RecordingSink::default());
    let (_, writer) = mirror();
    let controller = Controller::new(
        Arc::clone(&deployments),
        writer,
        Arc::new(counting(Arc::clone(&calls), |n, d| {
            if n < 3 {
                return Err(io::Error::new(io::ErrorKind::Other, "flaky"));
            }
            d.status.ready_replicas = 3;
            Ok(())
        })),
        ControllerConfig::default(),
    )
    .with_error_sink(sink.clone());
    let handle = controller.handle();
    let queue = controller.queue();
    let task = tokio::spawn(controller.run(1));

    let key = ObjectKey::namespaced("default", "web");
    assert!(
        eventually(LIMIT, || count(&deployments.status_writes) == 1)
        .await
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(queue.num_requeues(&key), 0);
    assert!(sink.reports().is_empty());

    handle.stop();
    task.await.expect("join").expect("controller");
}

#[tokio::test(start_paused = true)]
async fn panicking_reconcile_is_retried() {
    let deployments = seeded(&["web"]).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let (_, writer) = mirror();
    let controller = Controller::new(
        Arc::clone(&deployments),
        writer,
        Arc::new(counting(Arc::clone(&calls), |n, d| {
            if n == 0 {
                panic!("first pass explodes");
            }
            d.status.ready_replicas = 1;
            Ok(())
        })),
        ControllerConfig::default(),
    );
    let handle = controller.handle();
    let task = tokio::spawn(controller.run(1));

    assert!(
        eventually(LIMIT, || count(&deployments.status_writes) == 1)
        .await,
        "worker survives the panic and the retry succeeds"
    );

    handle.stop();
    task.await.expect("join").expect("controller");
}
