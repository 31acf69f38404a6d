//! Integration tests for the waypoint retry queue.
//!
//! Drives the queue against a wiremock backend to verify FIFO delivery,
//! sequence assignment, and the tail-requeue behavior after failures.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use serde_json::json;
use waymark_core::{store::mock::MemoryConfigStore, ConfigKey, SystemClock};
use waymark_delivery::{
    client::WAYPOINTS_PATH, environment::NoopBridge, BackendClient, CredentialCache,
    EnvironmentResolver, QueueConfig, WaypointQueue,
};
use wiremock::{matchers, Mock, MockServer, Request, ResponseTemplate};

/// Response delay long enough that a burst of enqueues lands while the
/// first delivery is still in flight.
const RESPONSE_DELAY: Duration = Duration::from_millis(100);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn queue_over(store: Arc<MemoryConfigStore>) -> WaypointQueue {
    let client = Arc::new(BackendClient::with_defaults().unwrap());
    let environment = Arc::new(EnvironmentResolver::new(store.clone(), Arc::new(NoopBridge)));
    let credentials =
        Arc::new(CredentialCache::new(store.clone(), client.clone(), environment.clone()));
    WaypointQueue::new(
        QueueConfig { retry_delay: Duration::from_millis(10), ..QueueConfig::default() },
        store,
        client,
        credentials,
        environment,
        Arc::new(SystemClock::new()),
    )
}

async fn seeded_store(server: &MockServer) -> Arc<MemoryConfigStore> {
    let store = Arc::new(MemoryConfigStore::new());
    store.seed_str(ConfigKey::BaseUrl, server.uri()).await;
    store.seed_str(ConfigKey::AppVersion, "3.2.0").await;
    store.seed_str(ConfigKey::AuthHash, "h1").await;
    store
}

fn sort_index(request: &Request) -> u64 {
    let body: serde_json::Value = request.body_json().unwrap();
    body["sortIndex"].as_u64().unwrap()
}

async fn wait_until_drained(queue: &WaypointQueue, server: &MockServer, expected_requests: usize) {
    for _ in 0..100 {
        let received = server.received_requests().await.unwrap_or_default().len();
        if received >= expected_requests && queue.pending_len().await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("queue did not drain in time");
}

#[tokio::test]
async fn fifo_delivery_with_strictly_increasing_sequences() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path(WAYPOINTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_delay(RESPONSE_DELAY))
        .mount(&server)
        .await;

    let queue = queue_over(seeded_store(&server).await);
    for n in 0..3 {
        queue.enqueue(json!({"n": n})).await?;
    }

    wait_until_drained(&queue, &server, 3).await;

    let requests = server.received_requests().await.unwrap();
    let order: Vec<u64> = requests.iter().map(sort_index).collect();
    assert_eq!(order, [0, 1, 2]);

    queue.shutdown();
    Ok(())
}

#[tokio::test]
async fn successful_delivery_removes_exactly_one_item() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path(WAYPOINTS_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let queue = queue_over(seeded_store(&server).await);
    queue.enqueue(json!({"kind": "ping"})).await?;

    wait_until_drained(&queue, &server, 1).await;

    // Exactly one request; nothing delivered twice.
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    queue.shutdown();
    Ok(())
}

#[tokio::test]
async fn failed_item_is_retried_after_the_rest_of_the_queue() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;

    // The first attempt on the waypoint with sort index 1 fails; everything
    // else succeeds. Mounted first so it wins while armed.
    Mock::given(matchers::method("POST"))
        .and(matchers::path(WAYPOINTS_PATH))
        .and(matchers::body_partial_json(json!({"sortIndex": 1})))
        .respond_with(ResponseTemplate::new(500).set_delay(RESPONSE_DELAY))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path(WAYPOINTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_delay(RESPONSE_DELAY))
        .mount(&server)
        .await;

    let queue = queue_over(seeded_store(&server).await);
    for n in 0..3 {
        queue.enqueue(json!({"n": n})).await?;
    }

    wait_until_drained(&queue, &server, 4).await;

    // Attempt order: 0 ok, 1 fails, 2 ok, 1 retried ok. Delivery order
    // observed by the backend is therefore 0, 2, 1 - the tail requeue
    // trades strict ordering for forward progress.
    let requests = server.received_requests().await.unwrap();
    let attempts: Vec<u64> = requests.iter().map(sort_index).collect();
    assert_eq!(attempts, [0, 1, 2, 1]);

    queue.shutdown();
    Ok(())
}

#[tokio::test]
async fn backend_outage_loses_nothing() -> Result<()> {
    let server = MockServer::start().await;

    // Two failures per item, then recovery.
    Mock::given(matchers::method("POST"))
        .and(matchers::path(WAYPOINTS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(4)
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path(WAYPOINTS_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let queue = queue_over(seeded_store(&server).await);
    queue.enqueue(json!({"n": 0})).await?;
    queue.enqueue(json!({"n": 1})).await?;

    wait_until_drained(&queue, &server, 6).await;

    // Both items eventually delivered exactly once despite the outage.
    let requests = server.received_requests().await.unwrap();
    let mut delivered: Vec<u64> = requests[requests.len() - 2..].iter().map(sort_index).collect();
    delivered.sort_unstable();
    assert_eq!(delivered, [0, 1]);

    queue.shutdown();
    Ok(())
}
