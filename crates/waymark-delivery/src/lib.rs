//! Durable event delivery for the waymark browser-extension SDK.
//!
//! This crate implements the client-side delivery subsystem: page visits
//! accumulate in a debounced batch aggregator, waypoints move through an
//! ordered, persisted-sequence retry queue, and both paths share a lazily
//! fetched credential and a companion-supplied backend location.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐   ┌─────────────────┐
//! │ VisitAggregator│   │ WaypointQueue   │
//! └───────┬────────┘   └───────┬─────────┘
//!         │                    │
//!         ▼                    ▼
//! ┌────────────────┐   ┌─────────────────┐   ┌───────────────┐
//! │ CredentialCache│──▶│ Environment     │──▶│ CompanionBridge│
//! └───────┬────────┘   │ Resolver        │   └───────────────┘
//!         │            └───────┬─────────┘
//!         ▼                    ▼
//! ┌────────────────┐   ┌─────────────────┐
//! │ BackendClient  │   │ ConfigStore     │
//! └────────────────┘   └─────────────────┘
//! ```
//!
//! # Delivery guarantees
//!
//! - Visit batches are **at-most-once**: a batch whose POST fails is
//!   dropped.
//! - Waypoints are **at-least-once** with tail requeue on failure; the
//!   persisted sort index lets the backend restore order.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use waymark_core::{store::mock::MemoryConfigStore, SystemClock};
//! use waymark_delivery::{environment::NoopBridge, DeliveryConfig, DeliveryEngine};
//!
//! # async fn example() -> waymark_delivery::Result<()> {
//! let store = Arc::new(MemoryConfigStore::new());
//! let engine = DeliveryEngine::new(
//!     store,
//!     Arc::new(NoopBridge),
//!     DeliveryConfig::default(),
//!     Arc::new(SystemClock::new()),
//! )?;
//!
//! engine.enqueue_waypoint(serde_json::json!({"kind": "ping"})).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregator;
pub mod client;
pub mod credential;
pub mod environment;
pub mod error;
pub mod queue;

use std::sync::Arc;

use waymark_core::{
    models::{EnvironmentUpdate, InstallId, VisitEvent},
    Clock, ConfigStore,
};

pub use crate::{
    aggregator::{AggregatorConfig, VisitAggregator},
    client::{BackendClient, ClientConfig},
    credential::CredentialCache,
    environment::{CompanionBridge, EnvironmentResolver},
    error::{DeliveryError, Prerequisite, Result},
    queue::{QueueConfig, WaypointQueue},
};

/// Configuration for the whole delivery subsystem.
#[derive(Debug, Clone, Default)]
pub struct DeliveryConfig {
    /// HTTP client configuration.
    pub client: ClientConfig,
    /// Visit aggregator configuration.
    pub aggregator: AggregatorConfig,
    /// Waypoint queue configuration.
    pub queue: QueueConfig,
}

/// Wires the delivery components over one store, bridge, and clock.
///
/// Embedders construct one engine per extension process and feed it from
/// platform glue: page loads into `submit_visit`, producer events into
/// `enqueue_waypoint`, and the companion's native-messaging answer into
/// `apply_environment`.
pub struct DeliveryEngine {
    aggregator: VisitAggregator,
    queue: WaypointQueue,
    credentials: Arc<CredentialCache>,
    environment: Arc<EnvironmentResolver>,
}

impl DeliveryEngine {
    /// Creates an engine over the given store and companion bridge.
    ///
    /// # Errors
    ///
    /// Returns `Network` if the HTTP client cannot be built.
    pub fn new(
        store: Arc<dyn ConfigStore>,
        bridge: Arc<dyn CompanionBridge>,
        config: DeliveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let client = Arc::new(BackendClient::new(config.client)?);
        let environment = Arc::new(EnvironmentResolver::new(store.clone(), bridge));
        let credentials =
            Arc::new(CredentialCache::new(store.clone(), client.clone(), environment.clone()));

        let aggregator = VisitAggregator::new(
            config.aggregator,
            credentials.clone(),
            environment.clone(),
            client.clone(),
            clock.clone(),
        );
        let queue = WaypointQueue::new(
            config.queue,
            store,
            client,
            credentials.clone(),
            environment.clone(),
            clock,
        );

        Ok(Self { aggregator, queue, credentials, environment })
    }

    /// Buffers a visit event for debounced batch delivery.
    pub async fn submit_visit(&self, event: VisitEvent) {
        self.aggregator.submit(event).await;
    }

    /// Queues a waypoint for ordered delivery, returning its sequence.
    ///
    /// # Errors
    ///
    /// `Store` if the sequence counter cannot be read or persisted.
    pub async fn enqueue_waypoint(&self, payload: serde_json::Value) -> Result<u64> {
        self.queue.enqueue(payload).await
    }

    /// Persists environment data received from the companion application.
    ///
    /// # Errors
    ///
    /// `Store` if the config store rejects the write.
    pub async fn apply_environment(&self, update: EnvironmentUpdate) -> Result<()> {
        self.environment.apply_update(update).await?;
        // Deliveries parked on missing prerequisites can proceed now.
        self.queue.drain();
        Ok(())
    }

    /// Returns the per-installation identifier, minting one on first use.
    ///
    /// # Errors
    ///
    /// `Store` if the config store fails.
    pub async fn install_id(&self) -> Result<InstallId> {
        self.credentials.install_id().await
    }

    /// Number of buffered visits awaiting a flush.
    pub async fn pending_visits(&self) -> usize {
        self.aggregator.pending_len().await
    }

    /// Number of waypoints awaiting delivery.
    pub async fn pending_waypoints(&self) -> usize {
        self.queue.pending_len().await
    }

    /// Stops the waypoint drain loop.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}
