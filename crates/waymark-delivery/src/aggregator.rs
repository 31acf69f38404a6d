//! Debounced batching of visit events.
//!
//! Visits accumulate in memory and flush as one request after a quiet
//! period: every `submit` restarts the countdown, so bursts of rapid
//! navigations collapse into a single batch. This path is at-most-once —
//! the buffer is cleared when a send is attempted, even if it fails.
//!
//! Known gap, preserved deliberately: a flush abandoned because the
//! credential or base URL is unresolved does not reschedule itself. The
//! buffered events sit until a future `submit` arms the timer again.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::Mutex;
use waymark_core::{Clock, VisitEvent};

use crate::{client::BackendClient, credential::CredentialCache, environment::EnvironmentResolver};

/// Configuration for the visit aggregator.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Quiet period that must elapse after the last submit before a flush.
    pub debounce: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self { debounce: Duration::from_millis(5000) }
    }
}

/// Debounced batch aggregator for visit events.
///
/// Cloneable handle; all clones share one buffer and one countdown.
#[derive(Clone)]
pub struct VisitAggregator {
    inner: Arc<Inner>,
}

struct Inner {
    config: AggregatorConfig,
    credentials: Arc<CredentialCache>,
    environment: Arc<EnvironmentResolver>,
    client: Arc<BackendClient>,
    clock: Arc<dyn Clock>,
    buffer: Mutex<Vec<VisitEvent>>,
    // Bumped on every submit; a countdown only flushes if it is still the
    // latest, which cancels superseded timers without tracking handles.
    generation: AtomicU64,
}

impl VisitAggregator {
    /// Creates an aggregator over the given collaborators.
    pub fn new(
        config: AggregatorConfig,
        credentials: Arc<CredentialCache>,
        environment: Arc<EnvironmentResolver>,
        client: Arc<BackendClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                credentials,
                environment,
                client,
                clock,
                buffer: Mutex::new(Vec::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Buffers a visit event and restarts the flush countdown.
    ///
    /// Never fails from the producer's perspective; delivery problems are
    /// absorbed here (abandoned flush or dropped batch).
    pub async fn submit(&self, event: VisitEvent) {
        let pending = {
            let mut buffer = self.inner.buffer.lock().await;
            buffer.push(event);
            buffer.len()
        };
        tracing::debug!(pending, "visit buffered");

        let armed = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.clock.sleep(inner.config.debounce).await;
            if inner.generation.load(Ordering::SeqCst) == armed {
                inner.flush().await;
            }
        });
    }

    /// Number of events buffered and awaiting a flush.
    pub async fn pending_len(&self) -> usize {
        self.inner.buffer.lock().await.len()
    }
}

impl Inner {
    async fn flush(&self) {
        let credential = match self.credentials.get().await {
            Ok(credential) => credential,
            Err(error) => {
                tracing::debug!(%error, "flush abandoned, credential unavailable");
                return;
            },
        };
        let base_url = match self.environment.base_url().await {
            Ok(url) => url,
            Err(error) => {
                tracing::debug!(%error, "flush abandoned, base URL unavailable");
                return;
            },
        };

        // From here on the batch is consumed: at-most-once delivery.
        let events = {
            let mut buffer = self.buffer.lock().await;
            std::mem::take(&mut *buffer)
        };
        if events.is_empty() {
            return;
        }

        match self.client.send_visited_urls(&base_url, &credential.value, &events).await {
            Ok(()) => tracing::info!(count = events.len(), "visit batch flushed"),
            Err(error) => {
                tracing::warn!(count = events.len(), %error, "visit batch dropped");
            },
        }
    }
}
