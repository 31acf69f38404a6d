//! Ordered, persisted-sequence retry queue for waypoints.
//!
//! Waypoints get a durable, monotonically increasing sort index at enqueue
//! time and drain one at a time to the backend. A single worker owns the
//! drain loop; failed items go back to the **tail** and the loop moves on,
//! so under sustained failure an item is only retried after everything
//! else currently queued has been attempted. That tail requeue trades
//! strict delivery order for forward progress and is preserved behavior,
//! not a guarantee: callers must tolerate out-of-order arrival after a
//! failure (the sort index lets the backend reorder).
//!
//! The queue is unbounded; the worst case under a dead backend is queue
//! growth, never data loss from this path.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use waymark_core::{models::Waypoint, Clock, ConfigKey, ConfigMap, ConfigStore};

use crate::{
    client::BackendClient,
    credential::CredentialCache,
    environment::EnvironmentResolver,
    error::Result,
};

/// Configuration for the waypoint queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Delay after a failed attempt before the next delivery attempt.
    pub retry_delay: Duration,
    /// Cap for the per-cycle exponential backoff.
    pub max_retry_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { retry_delay: Duration::from_millis(250), max_retry_delay: Duration::from_secs(30) }
    }
}

/// Ordered retry queue for waypoint delivery.
///
/// Cloneable handle; all clones share one pending list and one worker.
#[derive(Clone)]
pub struct WaypointQueue {
    inner: Arc<Inner>,
}

struct Inner {
    config: QueueConfig,
    store: Arc<dyn ConfigStore>,
    client: Arc<BackendClient>,
    credentials: Arc<CredentialCache>,
    environment: Arc<EnvironmentResolver>,
    clock: Arc<dyn Clock>,
    pending: Mutex<VecDeque<Waypoint>>,
    draining: AtomicBool,
    shutdown: CancellationToken,
}

impl WaypointQueue {
    /// Creates a queue over the given collaborators.
    pub fn new(
        config: QueueConfig,
        store: Arc<dyn ConfigStore>,
        client: Arc<BackendClient>,
        credentials: Arc<CredentialCache>,
        environment: Arc<EnvironmentResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                client,
                credentials,
                environment,
                clock,
                pending: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Assigns the next persisted sequence number, appends the waypoint to
    /// the tail, and starts the drain loop if it is idle.
    ///
    /// Returns the assigned sequence. The counter increment is serialized
    /// under the queue lock, so concurrent producers get strictly
    /// increasing sequences in enqueue order.
    ///
    /// # Errors
    ///
    /// `Store` if reading or persisting the sequence counter fails; the
    /// waypoint is not queued in that case.
    pub async fn enqueue(&self, payload: serde_json::Value) -> Result<u64> {
        let sequence = {
            let mut pending = self.inner.pending.lock().await;
            let sequence = self.inner.next_sequence().await?;
            pending.push_back(Waypoint { payload, sequence });
            sequence
        };

        tracing::debug!(sequence, "waypoint enqueued");
        self.inner.clone().spawn_drain();
        Ok(sequence)
    }

    /// Starts the drain loop if it is not already running.
    pub fn drain(&self) {
        self.inner.clone().spawn_drain();
    }

    /// Number of waypoints waiting for delivery (excluding one in flight).
    pub async fn pending_len(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// Stops the drain loop after the in-flight attempt completes.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

impl Inner {
    /// Reads, increments, and persists the sequence counter.
    ///
    /// The assigned value is the stored counter; the successor is persisted
    /// before the waypoint is queued, so a sequence is never handed out
    /// twice even across process restarts.
    async fn next_sequence(&self) -> Result<u64> {
        let current = self
            .store
            .get(&[ConfigKey::SortIndex])
            .await?
            .get_u64(ConfigKey::SortIndex)?
            .unwrap_or(0);

        let mut entries = ConfigMap::new();
        entries.insert_u64(ConfigKey::SortIndex, current + 1);
        self.store.set(entries).await?;
        Ok(current)
    }

    /// Spawns the drain worker unless one is already running.
    fn spawn_drain(self: Arc<Self>) {
        if self.draining.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err()
        {
            return;
        }

        tokio::spawn(async move {
            self.run_drain().await;
            self.draining.store(false, Ordering::Release);

            // An enqueue that raced the empty observation saw the worker as
            // still running; pick its item up rather than stranding it.
            if !self.pending.lock().await.is_empty() && !self.shutdown.is_cancelled() {
                self.clone().spawn_drain();
            }
        });
    }

    async fn run_drain(&self) {
        let mut backoff = self.config.retry_delay;

        loop {
            if self.shutdown.is_cancelled() {
                return;
            }

            let Some(waypoint) = self.pending.lock().await.pop_front() else {
                tracing::debug!("waypoint queue drained");
                return;
            };

            let sequence = waypoint.sequence;
            match self.deliver(&waypoint).await {
                Ok(()) => {
                    tracing::info!(sequence, "waypoint delivered");
                    backoff = self.config.retry_delay;
                },
                Err(error) => {
                    tracing::warn!(sequence, %error, "waypoint delivery failed, requeued at tail");
                    self.pending.lock().await.push_back(waypoint);

                    tokio::select! {
                        () = self.shutdown.cancelled() => return,
                        () = self.clock.sleep(backoff) => {},
                    }
                    backoff = (backoff * 2).min(self.config.max_retry_delay);
                },
            }
        }
    }

    /// Attempts delivery of one waypoint.
    ///
    /// Requires credential, base URL, and app version; if any is missing
    /// the attempt fails without a network call.
    async fn deliver(&self, waypoint: &Waypoint) -> Result<()> {
        let credential = self.credentials.get().await?;
        let environment = self.environment.environment().await?;

        self.client
            .send_waypoint(
                &environment.base_url,
                &credential.value,
                &environment.app_version,
                waypoint,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use waymark_core::{store::mock::MemoryConfigStore, SystemClock};

    use super::*;
    use crate::{
        environment::NoopBridge,
        error::{DeliveryError, Prerequisite},
    };

    fn queue_over(store: Arc<MemoryConfigStore>) -> WaypointQueue {
        let client = Arc::new(BackendClient::with_defaults().unwrap());
        let environment = Arc::new(EnvironmentResolver::new(store.clone(), Arc::new(NoopBridge)));
        let credentials =
            Arc::new(CredentialCache::new(store.clone(), client.clone(), environment.clone()));
        WaypointQueue::new(
            QueueConfig::default(),
            store,
            client,
            credentials,
            environment,
            Arc::new(SystemClock::new()),
        )
    }

    #[tokio::test]
    async fn sequences_survive_restart() {
        let store = Arc::new(MemoryConfigStore::new());

        let first = queue_over(store.clone());
        first.shutdown(); // keep items pending, no delivery attempts
        assert_eq!(first.enqueue(json!({"n": 1})).await.unwrap(), 0);
        assert_eq!(first.enqueue(json!({"n": 2})).await.unwrap(), 1);

        // A new queue over the same store continues where the old one left
        // off; sequences are never reused.
        let second = queue_over(store);
        second.shutdown();
        assert_eq!(second.enqueue(json!({"n": 3})).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn enqueue_store_failure_queues_nothing() {
        let store = Arc::new(MemoryConfigStore::new());
        let queue = queue_over(store.clone());
        queue.shutdown();

        store.inject_error("write failed").await;
        assert!(matches!(queue.enqueue(json!({})).await, Err(DeliveryError::Store(_))));
        assert_eq!(queue.pending_len().await, 0);
    }

    #[tokio::test]
    async fn missing_prerequisite_fails_before_any_network_call() {
        // Base URL present, app version absent: the attempt must fail on
        // the missing prerequisite without touching the (dead) backend.
        let store = Arc::new(MemoryConfigStore::new());
        store.seed_str(ConfigKey::BaseUrl, "http://127.0.0.1:1").await;
        store.seed_str(ConfigKey::AuthHash, "h1").await;
        let queue = queue_over(store);
        queue.shutdown();

        queue.enqueue(json!({"n": 1})).await.unwrap();

        let waypoint = queue.inner.pending.lock().await.pop_front().unwrap();
        let result = queue.inner.deliver(&waypoint).await;
        assert!(matches!(
            result,
            Err(DeliveryError::PrerequisiteUnavailable { missing: Prerequisite::AppVersion })
        ));
        queue.inner.pending.lock().await.push_back(waypoint);

        // Failed item sits at the tail (here: head of a one-item queue).
        let pending = queue.inner.pending.lock().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.front().map(|w| w.sequence), Some(0));
    }

    #[tokio::test]
    async fn absent_credential_leaves_item_pending_at_head() {
        // Base URL and app version present, credential absent and not
        // fetchable: the attempt fails recoverably and the item stays
        // queued at the head.
        let store = Arc::new(MemoryConfigStore::new());
        store.seed_str(ConfigKey::BaseUrl, "http://127.0.0.1:1").await;
        store.seed_str(ConfigKey::AppVersion, "3.2.0").await;
        let queue = queue_over(store);
        queue.shutdown();

        queue.enqueue(json!({"n": 1})).await.unwrap();

        let waypoint = queue.inner.pending.lock().await.pop_front().unwrap();
        let result = queue.inner.deliver(&waypoint).await;
        assert!(matches!(
            result,
            Err(DeliveryError::PrerequisiteUnavailable { missing: Prerequisite::Credential })
        ));
        queue.inner.pending.lock().await.push_back(waypoint);

        let pending = queue.inner.pending.lock().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.front().map(|w| w.sequence), Some(0));
    }

    #[tokio::test]
    async fn requeue_preserves_length_and_moves_item_to_tail() {
        let store = Arc::new(MemoryConfigStore::new());
        let queue = queue_over(store);
        queue.shutdown();

        for n in 0..3 {
            queue.enqueue(json!({"n": n})).await.unwrap();
        }

        // Simulate one failed attempt on the head: pop, requeue at tail.
        let head = queue.inner.pending.lock().await.pop_front().unwrap();
        queue.inner.pending.lock().await.push_back(head);

        let pending = queue.inner.pending.lock().await;
        let order: Vec<u64> = pending.iter().map(|w| w.sequence).collect();
        assert_eq!(order, [1, 2, 0]);
    }
}
