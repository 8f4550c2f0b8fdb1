//! Several replicas sharing one store, probing local HTTP stubs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use regionwatch::store::LibsqlStore;
use regionwatch::{
    Clock, CoordinationContext, CycleCoordinator, CycleOutcome, CycleSettings, LeaseStore, ManualClock, MemoryStore,
    OwnerId, ProbeExecutor, ResultStore, Target, MONITORING_CYCLE_LOCK,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

/// A status endpoint answering 200 with a small JSON body after `delay`
async fn status_endpoint(delay: Duration) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                tokio::time::sleep(delay).await;
                let body = r#"{"status":"ok"}"#;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    Url::parse(&format!("http://{addr}/status?stats=1")).unwrap()
}

async fn targets() -> Arc<[Target]> {
    vec![
        Target::new("us-east", status_endpoint(Duration::from_millis(100)).await),
        Target::new("eu-west", status_endpoint(Duration::from_millis(100)).await),
        Target::new("ap-southeast", status_endpoint(Duration::from_millis(100)).await),
    ]
    .into()
}

fn replica<S>(owner: &str, store: Arc<S>, clock: Arc<ManualClock>, targets: Arc<[Target]>) -> CycleCoordinator
where
    S: LeaseStore + ResultStore + 'static,
{
    let settings = CycleSettings { targets, probe_timeout: Duration::from_secs(5), ..CycleSettings::default() };
    let ctx = CoordinationContext {
        owner_id: OwnerId::from(owner),
        leases: store.clone(),
        results: store,
        clock,
        settings,
    };

    let client = reqwest::Client::builder().timeout(Duration::from_secs(5)).no_proxy().build().unwrap();
    CycleCoordinator::with_probe(ctx, ProbeExecutor::from_client(client, Duration::from_secs(5)))
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_only_one_replica_runs_the_cycle() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let store = Arc::new(MemoryStore::new());
    let clock = clock();
    let targets = targets().await;
    let replicas: Vec<_> =
        ["p1", "p2", "p3"].iter().map(|owner| replica(owner, store.clone(), clock.clone(), targets.clone())).collect();

    let outcomes = futures::future::join_all(replicas.iter().map(|r| r.run())).await;

    let completed: Vec<_> = outcomes
        .iter()
        .filter_map(|outcome| match outcome.as_ref().unwrap() {
            CycleOutcome::Completed(report) => Some(report),
            CycleOutcome::Skipped(_) => None,
        })
        .collect();

    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].written, 3);
    assert!(completed[0].results.iter().all(|r| r.is_healthy && r.status_code == 200));
    assert_eq!(store.result_count().await, 3);
    assert!(store.get_lease(MONITORING_CYCLE_LOCK).await.unwrap().is_none());
}

#[tokio::test]
async fn test_replicas_take_turns_across_hours() {
    let store = Arc::new(MemoryStore::new());
    let clock = clock();
    let targets = targets().await;
    let p1 = replica("p1", store.clone(), clock.clone(), targets.clone());
    let p2 = replica("p2", store.clone(), clock.clone(), targets.clone());

    assert!(matches!(p1.run().await.unwrap(), CycleOutcome::Completed(_)));

    // Same hour: the lease is free again but the bucket is already written
    let CycleOutcome::Completed(again) = p2.run().await.unwrap() else {
        panic!("lease should be free after release");
    };
    assert_eq!(again.written, 0);
    assert_eq!(again.duplicates, 3);

    clock.advance(Duration::from_secs(3600));
    let CycleOutcome::Completed(next_hour) = p2.run().await.unwrap() else {
        panic!("lease should be free after release");
    };
    assert_eq!(next_hour.written, 3);
    assert_eq!(store.result_count().await, 6);

    let summary = p1.hub().summary(clock.now()).await.unwrap();
    assert_eq!(summary.online_count(), 3);
}

#[tokio::test]
async fn test_crashed_holder_blocks_until_ttl_then_replica_takes_over() {
    let store = Arc::new(MemoryStore::new());
    let clock = clock();
    let targets = targets().await;
    let crashed = replica("crashed", store.clone(), clock.clone(), targets.clone());
    let survivor = replica("survivor", store.clone(), clock.clone(), targets.clone());

    // The crashed replica took the lease and never released it
    assert!(crashed.lock().acquire(MONITORING_CYCLE_LOCK, Duration::from_secs(600)).await.unwrap().is_granted());

    clock.advance(Duration::from_secs(5 * 60));
    assert!(matches!(survivor.run().await.unwrap(), CycleOutcome::Skipped(_)));

    clock.advance(Duration::from_secs(6 * 60));
    let CycleOutcome::Completed(report) = survivor.run().await.unwrap() else {
        panic!("expired lease should be taken over");
    };
    assert_eq!(report.results.len(), 3);
}

#[tokio::test]
async fn test_replicas_coordinate_through_libsql() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    let path = path.to_string_lossy();

    // Two handles on one database file, as two processes would have
    let first = Arc::new(LibsqlStore::open(&path, 2).await.unwrap());
    let second = Arc::new(LibsqlStore::open(&path, 2).await.unwrap());

    let clock = clock();
    let targets = targets().await;
    let p1 = replica("p1", first.clone(), clock.clone(), targets.clone());
    let p2 = replica("p2", second.clone(), clock.clone(), targets.clone());

    // p1 holds the lease, so p2 sees it through its own connection pool
    assert!(p1.lock().acquire(MONITORING_CYCLE_LOCK, Duration::from_secs(600)).await.unwrap().is_granted());
    assert!(matches!(p2.run().await.unwrap(), CycleOutcome::Skipped(_)));
    assert!(p1.lock().release(MONITORING_CYCLE_LOCK, p1.lock().owner_id()).await.unwrap());

    let CycleOutcome::Completed(report) = p2.run().await.unwrap() else {
        panic!("lease should be free after release");
    };
    assert_eq!(report.written, 3);

    // p1 runs the same hour again; every key is already taken
    let CycleOutcome::Completed(report) = p1.run().await.unwrap() else {
        panic!("lease should be free after release");
    };
    assert_eq!(report.duplicates, 3);

    let stored = second.results_since(clock.now() - chrono::TimeDelta::hours(1), None).await.unwrap();
    assert_eq!(stored.len(), 3);
    assert!(first.get_lease(MONITORING_CYCLE_LOCK).await.unwrap().is_none());
}
