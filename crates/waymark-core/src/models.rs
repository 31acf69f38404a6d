//! Domain types exchanged with the backend and the companion application.
//!
//! `VisitEvent` and `Waypoint` are the two payload kinds the delivery
//! subsystem moves; `Credential` and `Environment` are the cached
//! prerequisites both delivery paths depend on. Wire field names follow the
//! backend contract, so these types serialize directly into request bodies.

use std::fmt;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::time::{format_timestamp_micros, format_utc_offset};

/// A completed page visit, queued for batched delivery.
///
/// Created on page-load completion and discarded after the batch it was
/// flushed in is attempted. Timestamps carry microsecond precision even
/// though most producers only resolve milliseconds; the extra digits are
/// zero-padded to satisfy the backend's fixed-width format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitEvent {
    /// Fully qualified URL of the visited page.
    pub url: String,
    /// Page title at load completion.
    pub title: String,
    /// UTC timestamp formatted `YYYY-MM-DD HH:MM:SS.ffffff`.
    pub timestamp_utc: String,
    /// Local UTC offset formatted `±hh:mm`.
    pub time_zone_offset: String,
}

impl VisitEvent {
    /// Creates a visit event for a page load observed at `at` with the
    /// producer's local `offset`.
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        at: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            timestamp_utc: format_timestamp_micros(at),
            time_zone_offset: format_utc_offset(offset),
        }
    }
}

/// A discrete location/activity event queued for ordered, durable delivery.
///
/// The sequence number is assigned at enqueue time from the persisted
/// counter and is never reused, even across process restarts. The payload
/// is opaque to the delivery subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    /// Opaque JSON payload supplied by the producer.
    pub payload: serde_json::Value,
    /// Persisted, monotonically increasing sort index.
    pub sequence: u64,
}

/// Where a credential came from on this resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialOrigin {
    /// Read from the config store without a network call.
    Cached,
    /// Fetched from the backend during this resolution.
    Fetched,
}

/// The auth hash identifying this installation to the backend.
///
/// Cached indefinitely once obtained; never explicitly invalidated, only
/// overwritten by a later successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// The auth-hash token value.
    pub value: String,
    /// Whether this resolution hit the cache or the network.
    pub origin: CredentialOrigin,
}

impl Credential {
    /// Creates a credential resolved from the config store.
    pub fn cached(value: impl Into<String>) -> Self {
        Self { value: value.into(), origin: CredentialOrigin::Cached }
    }

    /// Creates a credential freshly fetched from the backend.
    pub fn fetched(value: impl Into<String>) -> Self {
        Self { value: value.into(), origin: CredentialOrigin::Fetched }
    }
}

/// Backend location and companion-app version, cached once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Backend base URL.
    pub base_url: String,
    /// Companion application version.
    pub app_version: String,
}

/// Environment data delivered asynchronously by the companion application.
///
/// Persisted to the config store as one write when the companion's answer
/// arrives; until then, resolution fails recoverably.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentUpdate {
    /// Backend base URL.
    pub base_url: String,
    /// Companion application version.
    pub app_version: String,
    /// Auth hash already held by the companion, if any.
    pub auth_hash: String,
}

/// Per-installation identifier, a UUID-formatted 128-bit value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallId(pub String);

impl fmt::Display for InstallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
